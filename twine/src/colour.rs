/// ANSI styling for console logs and `tctl status`.
pub mod color {
    use crate::status::{LogLevel, ServiceStatus};

    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const MAGENTA: &str = "\x1b[35m";
    pub const CYAN: &str = "\x1b[36m";

    pub fn paint(code: &str, text: &str) -> String {
        format!("{code}{text}{RESET}")
    }

    pub fn level_color(level: LogLevel) -> &'static str {
        match level {
            LogLevel::Debug => MAGENTA,
            LogLevel::Info => CYAN,
            LogLevel::Warn => YELLOW,
            LogLevel::Fail => RED,
            LogLevel::Ok => GREEN,
        }
    }

    pub fn status_color(status: ServiceStatus) -> &'static str {
        match status {
            ServiceStatus::Running => GREEN,
            ServiceStatus::Stopped | ServiceStatus::None => DIM,
            ServiceStatus::Paused => BLUE,
            ServiceStatus::Error => RED,
            _ => YELLOW,
        }
    }

    pub fn color_time(time_str: &str) -> String {
        paint(DIM, time_str)
    }

    pub fn color_level(level: LogLevel, level_str: &str) -> String {
        paint(level_color(level), level_str)
    }

    pub fn color_status(status: ServiceStatus) -> String {
        paint(status_color(status), status.as_str())
    }

}
