use std::fs::{metadata, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use regex::Regex;
use terminal_size::{Width, terminal_size};

use crate::colour::color::{color_level, color_time, paint, BOLD, GREEN};
use crate::errors::TwineError;
use crate::status::LogLevel;
use crate::time::format_duration;

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("ANSI pattern compiles"));

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Ok => "OK",
            LogLevel::Fail => "FAIL",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Debug => "DBG",
        }
    }
}

/// Logging interface handed to the engine components.
///
/// Shared across the gateway worker and the monitor thread, so it takes
/// `&self` and implementations handle their own locking.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Fail, message);
    }

    fn error_exception(&self, err: &dyn std::error::Error, message: &str) {
        self.log(LogLevel::Fail, &format!("{message}: {err}"));
    }
}

// === CONSOLE LOGGER ===

pub trait ConsoleLogger {
    fn message(&mut self, level: LogLevel, message: &str, duration: Duration);
    fn banner(&mut self, message: &str);
}

pub struct ConsoleLoggerImpl {
    pub min_level: LogLevel,
}

impl ConsoleLoggerImpl {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    /// Message on the left, level tag pushed to the right edge of the terminal.
    fn format_console(&self, level: LogLevel, message: &str, duration: Duration) -> String {
        let left = format!("{} {message}", color_time(&format_duration(duration)));
        let tag = padded_level(level);

        let width = terminal_size().map_or(80, |(Width(w), _)| w as usize);
        let used = strip_ansi_codes(&left).chars().count() + tag.chars().count();
        let padding = width.saturating_sub(used).max(1);

        format!("{left}{}{}", " ".repeat(padding), color_level(level, &tag))
    }
}

impl ConsoleLogger for ConsoleLoggerImpl {
    fn message(&mut self, level: LogLevel, message: &str, duration: Duration) {
        if level >= self.min_level {
            println!("{}", self.format_console(level, message, duration));
        }
    }

    fn banner(&mut self, message: &str) {
        println!("{}\n", paint(&format!("{BOLD}{GREEN}"), message));
    }
}

// === FILE LOGGER ===

pub trait FileLogger {
    fn log(&mut self, level: LogLevel, message: &str);

    fn initialize(&mut self, console_logger: &mut dyn ConsoleLogger) -> Result<(), TwineError>;
}

pub struct FileLoggerImpl {
    pub min_level: LogLevel,
    pub file_path: String,
    has_initialized: bool,
    buffer: Vec<String>,
}

impl FileLoggerImpl {
    pub fn new(min_level: LogLevel, file_path: impl Into<String>) -> Self {
        Self {
            min_level,
            file_path: file_path.into(),
            has_initialized: false,
            buffer: Vec::new(),
        }
    }

    fn format_file(&self, level: LogLevel, message: &str) -> String {
        let timestamp = chrono::Local::now().format("[%d-%m-%Y %H:%M:%S]");
        format!("{} {timestamp} {message}", padded_level(level))
    }

    fn write_session_header(&self) -> Result<(), TwineError> {
        let is_existing_file = metadata(&self.file_path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        if is_existing_file {
            let mut file = OpenOptions::new().append(true).open(&self.file_path)?;
            writeln!(file, "\n────────── NEW SESSION ──────────")?;
        }
        Ok(())
    }
}

impl FileLogger for FileLoggerImpl {
    fn log(&mut self, level: LogLevel, message: &str) {
        if level < self.min_level {
            return;
        }

        let line = self.format_file(level, message);

        if !self.has_initialized {
            self.buffer.push(line);
            return;
        }

        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
        {
            let _ = writeln!(file, "{}", line);
        }
    }

    fn initialize(&mut self, console_logger: &mut dyn ConsoleLogger) -> Result<(), TwineError> {
        if self.has_initialized {
            return Ok(());
        }

        if let Some(parent) = Path::new(&self.file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.write_session_header()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        for entry in self.buffer.drain(..) {
            writeln!(file, "{}", entry)?;
        }
        self.has_initialized = true;

        console_logger.message(
            LogLevel::Info,
            &format!("File logger initialized: {}", self.file_path),
            Duration::ZERO,
        );

        Ok(())
    }
}

// === SHARED LOGGER ===

/// Fans each record out to a console and a file sink.
pub struct SharedLogger {
    console: Arc<Mutex<dyn ConsoleLogger + Send>>,
    file: Arc<Mutex<dyn FileLogger + Send>>,
    started: Instant,
}

impl SharedLogger {
    pub fn new(
        console: Arc<Mutex<dyn ConsoleLogger + Send>>,
        file: Arc<Mutex<dyn FileLogger + Send>>,
    ) -> Self {
        Self {
            console,
            file,
            started: Instant::now(),
        }
    }
}

impl Logger for SharedLogger {
    fn log(&self, level: LogLevel, message: &str) {
        if let Ok(mut con) = self.console.lock() {
            con.message(level, message, self.started.elapsed());
        }
        if let Ok(mut file) = self.file.lock() {
            file.log(level, message);
        }
    }
}

// === HELPERS ===

fn padded_level(level: LogLevel) -> String {
    format!("[ {:^4} ]", level.as_str())
}

fn strip_ansi_codes(s: &str) -> String {
    ANSI_RE.replace_all(s, "").to_string()
}
