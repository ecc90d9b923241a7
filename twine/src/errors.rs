use std::fmt;

#[derive(Debug)]
pub enum TwineError {
    Io(std::io::Error),
    Parse(String),
    Config(String),
    /// The service control primitive refused or failed an operation.
    Control(String),
    /// A wait-for-status elapsed before the service reached the wanted state.
    Timeout { service: String, desired: String },
    NotFound(String),
    /// The execution gateway already has an operation in flight.
    Busy,
    InvalidRecipients(String),
    Notify(String),
    Custom(String),
}

impl fmt::Display for TwineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwineError::Io(e) => write!(f, "IO error: {}", e),
            TwineError::Parse(msg) => write!(f, "Parse error: {}", msg),
            TwineError::Config(msg) => write!(f, "Config error: {}", msg),
            TwineError::Control(msg) => write!(f, "Service control error: {}", msg),
            TwineError::Timeout { service, desired } => {
                write!(f, "Timed out waiting for '{}' to reach {}", service, desired)
            }
            TwineError::NotFound(what) => write!(f, "Not found: {}", what),
            TwineError::Busy => write!(f, "Another operation is already in progress"),
            TwineError::InvalidRecipients(msg) => write!(f, "Invalid recipients: {}", msg),
            TwineError::Notify(msg) => write!(f, "Notification failed: {}", msg),
            TwineError::Custom(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for TwineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TwineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TwineError {
    fn from(err: std::io::Error) -> TwineError {
        TwineError::Io(err)
    }
}

impl From<toml::de::Error> for TwineError {
    fn from(err: toml::de::Error) -> TwineError {
        TwineError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TwineError {
    fn from(err: serde_json::Error) -> TwineError {
        TwineError::Parse(err.to_string())
    }
}
