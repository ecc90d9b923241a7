use serde::{Deserialize, Serialize};

/// Lifecycle state of a monitored service, as reported by the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[default]
    None,
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
    Error,
}

impl ServiceStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(Self::None),
            "stopped" => Some(Self::Stopped),
            "startpending" => Some(Self::StartPending),
            "stoppending" => Some(Self::StopPending),
            "running" => Some(Self::Running),
            "continuepending" => Some(Self::ContinuePending),
            "pausepending" => Some(Self::PausePending),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::None => "None",
            ServiceStatus::Stopped => "Stopped",
            ServiceStatus::StartPending => "StartPending",
            ServiceStatus::StopPending => "StopPending",
            ServiceStatus::Running => "Running",
            ServiceStatus::ContinuePending => "ContinuePending",
            ServiceStatus::PausePending => "PausePending",
            ServiceStatus::Paused => "Paused",
            ServiceStatus::Error => "Error",
        }
    }

    /// True for the states an unexpected stop is reported on.
    pub fn is_stopping_or_stopped(&self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::StopPending)
    }
}

/// Toggle applied to one or more services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToggleAction {
    Start,
    Stop,
    Restart,
}

impl ToggleAction {
    /// Status every handle should end up in once the action completes.
    pub fn desired_status(&self) -> ServiceStatus {
        match self {
            ToggleAction::Stop => ServiceStatus::Stopped,
            ToggleAction::Start | ToggleAction::Restart => ServiceStatus::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleAction::Start => "start",
            ToggleAction::Stop => "stop",
            ToggleAction::Restart => "restart",
        }
    }
}

/// Log levels to control verbosity of logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Fail,
    Ok,
}

impl LogLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "fail" | "error" => Some(Self::Fail),
            "ok" => Some(Self::Ok),
            _ => None,
        }
    }
}
