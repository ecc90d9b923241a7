//! Test doubles for the engine's collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use twine::errors::TwineError;
use twine::log::Logger;
use twine::status::{LogLevel, ServiceStatus};

use crate::control::ServiceControl;
use crate::logs::{LogArchiver, LogFile, LoggingPolicy};
use crate::responder::{FailureNotice, Notifier};
use crate::service::{OrderSpec, ServiceHandle};

pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug)]
pub struct FakeState {
    pub status: ServiceStatus,
    /// Status the service lands in after a successful start.
    pub after_start: ServiceStatus,
    /// Status the service lands in after a successful stop.
    pub after_stop: ServiceStatus,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_query: bool,
    pub exists: bool,
    pub start_calls: usize,
    pub stop_calls: usize,
}

/// Scripted service control. Clones share state so a test can play the
/// part of an external process flipping the service.
#[derive(Clone)]
pub struct FakeControl {
    name: String,
    state: Arc<Mutex<FakeState>>,
    journal: Journal,
}

impl FakeControl {
    pub fn new(name: &str, status: ServiceStatus) -> Self {
        Self::with_journal(name, status, Journal::default())
    }

    pub fn with_journal(name: &str, status: ServiceStatus, journal: Journal) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(FakeState {
                status,
                after_start: ServiceStatus::Running,
                after_stop: ServiceStatus::Stopped,
                fail_start: false,
                fail_stop: false,
                fail_query: false,
                exists: true,
                start_calls: 0,
                stop_calls: 0,
            })),
            journal,
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_external_status(&self, status: ServiceStatus) {
        self.state().status = status;
    }
}

impl ServiceControl for FakeControl {
    fn status(&self) -> Result<ServiceStatus, TwineError> {
        let state = self.state();
        if state.fail_query {
            return Err(TwineError::Control(format!("{} unreachable", self.name)));
        }
        Ok(state.status)
    }

    fn start(&self) -> Result<(), TwineError> {
        self.journal.lock().unwrap().push(format!("start {}", self.name));
        let mut state = self.state();
        state.start_calls += 1;
        if state.fail_start {
            return Err(TwineError::Control(format!("{} refused to start", self.name)));
        }
        state.status = state.after_start;
        Ok(())
    }

    fn stop(&self) -> Result<(), TwineError> {
        self.journal.lock().unwrap().push(format!("stop {}", self.name));
        let mut state = self.state();
        state.stop_calls += 1;
        if state.fail_stop {
            return Err(TwineError::Control(format!("{} refused to stop", self.name)));
        }
        state.status = state.after_stop;
        Ok(())
    }

    fn wait_for_status(
        &self,
        desired: ServiceStatus,
        _timeout: Option<Duration>,
    ) -> Result<(), TwineError> {
        if self.state().status == desired {
            Ok(())
        } else {
            Err(TwineError::Timeout {
                service: self.name.clone(),
                desired: desired.as_str().to_string(),
            })
        }
    }

    fn exists(&self) -> Result<bool, TwineError> {
        Ok(self.state().exists)
    }
}

/// Builds a handle whose cached status matches the fake's.
pub fn fake_handle(name: &str, control: &FakeControl, order: OrderSpec) -> Arc<ServiceHandle> {
    let status = control.state().status;
    Arc::new(
        ServiceHandle::new(name, name, Box::new(control.clone()))
            .with_order(order)
            .with_status(status),
    )
}

#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingArchiver {
    pub calls: Mutex<Vec<Vec<LogFile>>>,
}

impl LogArchiver for RecordingArchiver {
    fn archive_and_clear(&self, files: &[LogFile], _policy: &LoggingPolicy) -> Result<(), TwineError> {
        self.calls.lock().unwrap().push(files.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<FailureNotice>>,
    pub fail: bool,
}

impl Notifier for RecordingNotifier {
    fn send_service_failure(&self, notice: &FailureNotice) -> Result<(), TwineError> {
        if self.fail {
            return Err(TwineError::Notify("smtp relay refused".into()));
        }
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}
