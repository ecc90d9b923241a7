use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use twine::config::LogsConfig;
use twine::errors::TwineError;
use twine::log::Logger;
use walkdir::WalkDir;

use crate::service::ServiceHandle;

/// What happens to a service's log files when it is stopped or restarted.
///
/// `ignore_logs` is kept equal to `!(archive_logs || clear_logs)` after
/// every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingPolicy {
    ignore_logs: bool,
    archive_logs: bool,
    clear_logs: bool,
    archive_path: Option<PathBuf>,
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self {
            ignore_logs: true,
            archive_logs: false,
            clear_logs: false,
            archive_path: None,
        }
    }
}

impl LoggingPolicy {
    pub fn new(archive_logs: bool, clear_logs: bool, archive_path: Option<PathBuf>) -> Self {
        let mut policy = Self {
            archive_path,
            ..Self::default()
        };
        policy.set_archive_logs(archive_logs);
        policy.set_clear_logs(clear_logs);
        policy
    }

    pub fn ignore_logs(&self) -> bool {
        self.ignore_logs
    }

    pub fn archive_logs(&self) -> bool {
        self.archive_logs
    }

    pub fn clear_logs(&self) -> bool {
        self.clear_logs
    }

    pub fn archive_path(&self) -> Option<&Path> {
        self.archive_path.as_deref()
    }

    pub fn set_archive_logs(&mut self, value: bool) {
        self.archive_logs = value;
        self.sync_ignore();
    }

    pub fn set_clear_logs(&mut self, value: bool) {
        self.clear_logs = value;
        self.sync_ignore();
    }

    /// Turning ignore on drops both actions. Turning it off only sticks
    /// while an action is enabled; otherwise it snaps back to true.
    pub fn set_ignore_logs(&mut self, value: bool) {
        if value {
            self.archive_logs = false;
            self.clear_logs = false;
        }
        self.sync_ignore();
    }

    pub fn set_archive_path(&mut self, path: Option<PathBuf>) {
        self.archive_path = path;
    }

    fn sync_ignore(&mut self) {
        self.ignore_logs = !(self.archive_logs || self.clear_logs);
    }
}

impl From<&LogsConfig> for LoggingPolicy {
    fn from(cfg: &LogsConfig) -> Self {
        LoggingPolicy::new(cfg.archive, cfg.clear, cfg.archive_path.as_ref().map(PathBuf::from))
    }
}

/// A log file tied to the service that writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub service: String,
    pub path: PathBuf,
}

pub trait LogArchiver: Send + Sync {
    fn archive_and_clear(&self, files: &[LogFile], policy: &LoggingPolicy) -> Result<(), TwineError>;
}

/// Copies logs into `<archive_path>/<timestamp>/<service>/` and truncates
/// them in place.
pub struct FsLogArchiver;

impl FsLogArchiver {
    fn archive(&self, files: &[LogFile], root: &Path, failures: &mut Vec<String>) {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();

        for file in files {
            let Some(file_name) = file.path.file_name() else {
                failures.push(format!("{}: not a file path", file.path.display()));
                continue;
            };

            let dest_dir = root.join(&stamp).join(&file.service);
            let result = fs::create_dir_all(&dest_dir)
                .and_then(|_| fs::copy(&file.path, dest_dir.join(file_name)));

            if let Err(e) = result {
                failures.push(format!("archive {}: {}", file.path.display(), e));
            }
        }
    }

    fn clear(&self, files: &[LogFile], failures: &mut Vec<String>) {
        for file in files {
            if let Err(e) = OpenOptions::new().write(true).truncate(true).open(&file.path) {
                failures.push(format!("clear {}: {}", file.path.display(), e));
            }
        }
    }
}

impl LogArchiver for FsLogArchiver {
    fn archive_and_clear(&self, files: &[LogFile], policy: &LoggingPolicy) -> Result<(), TwineError> {
        if policy.ignore_logs() {
            return Ok(());
        }

        let mut failures = Vec::new();

        if policy.archive_logs() {
            let root = policy
                .archive_path()
                .ok_or_else(|| TwineError::Config("log archiving enabled without archive_path".into()))?;
            self.archive(files, root, &mut failures);
        }

        // Never clear what failed to archive.
        if policy.clear_logs() && failures.is_empty() {
            self.clear(files, &mut failures);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TwineError::Custom(format!(
                "Log archival completed with errors: {}",
                failures.join("; ")
            )))
        }
    }
}

/// Collects the logs of stopped services and hands them to the archiver as
/// one batch.
pub struct LogLifecycleCoordinator {
    archiver: Arc<dyn LogArchiver>,
    logger: Arc<dyn Logger>,
}

impl LogLifecycleCoordinator {
    pub fn new(archiver: Arc<dyn LogArchiver>, logger: Arc<dyn Logger>) -> Self {
        Self { archiver, logger }
    }

    pub fn collect(&self, handles: &[Arc<ServiceHandle>]) -> Vec<LogFile> {
        let mut files = Vec::new();

        for handle in handles {
            for path in &handle.log_files {
                if path.is_file() {
                    files.push(LogFile {
                        service: handle.name.clone(),
                        path: path.clone(),
                    });
                }
            }

            if let Some(dir) = &handle.log_dir {
                for entry in WalkDir::new(dir)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(Result::ok)
                    .filter(|e| e.file_type().is_file())
                {
                    files.push(LogFile {
                        service: handle.name.clone(),
                        path: entry.into_path(),
                    });
                }
            }
        }

        files
    }

    pub fn archive_and_clear(&self, handles: &[Arc<ServiceHandle>], policy: &LoggingPolicy) {
        if policy.ignore_logs() {
            return;
        }

        let files = self.collect(handles);
        if files.is_empty() {
            self.logger.debug("No log files to archive");
            return;
        }

        match self.archiver.archive_and_clear(&files, policy) {
            Ok(()) => self.logger.info(&format!(
                "Processed {} log file(s) (archive: {}, clear: {})",
                files.len(),
                policy.archive_logs(),
                policy.clear_logs()
            )),
            Err(e) => self.logger.error_exception(&e, "Failed to archive service logs"),
        }
    }
}
