use std::sync::Arc;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use twine::log::Logger;
use twine::status::ServiceStatus;
use twine::time::Stopwatch;

use crate::service::{HandleId, ServiceHandle};

/// Status changes observed outside an internal update window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleEvent {
    UnexpectedStop {
        id: HandleId,
        name: String,
        status: ServiceStatus,
    },
    ExternalChange {
        id: HandleId,
        name: String,
        old: ServiceStatus,
        new: ServiceStatus,
    },
}

/// Holds a handle's internal update window open and closes it on drop.
/// If a control call panics mid-toggle the handle is made toggleable again
/// and any restart guard is cleared.
struct InternalUpdate<'a>(&'a ServiceHandle);

impl<'a> InternalUpdate<'a> {
    fn begin(handle: &'a ServiceHandle) -> Self {
        handle.begin_internal_update();
        handle.set_can_toggle(false);
        Self(handle)
    }
}

impl Drop for InternalUpdate<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.finish_restart();
        }
        self.0.end_internal_update();
    }
}

/// Drives a single handle through start, stop and refresh.
pub struct ToggleController {
    logger: Arc<dyn Logger>,
    events: Option<Sender<HandleEvent>>,
}

impl ToggleController {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            events: None,
        }
    }

    /// Registers the single event subscriber, replacing any previous one.
    pub fn subscribe(&mut self) -> Receiver<HandleEvent> {
        let (tx, rx) = channel();
        self.events = Some(tx);
        rx
    }

    pub fn stop(&self, handle: &ServiceHandle) -> ServiceStatus {
        let current = handle.status();
        if current != ServiceStatus::Running {
            self.logger
                .debug(&format!("'{}' is not running ({})", handle.name, current.as_str()));
            return ServiceStatus::Stopped;
        }

        if !handle.can_toggle() {
            self.logger
                .warn(&format!("'{}' cannot be stopped right now", handle.name));
            return current;
        }

        let update = InternalUpdate::begin(handle);

        let timer = Stopwatch::start();
        self.logger.info(&format!("Stopping '{}'", handle.name));

        match handle.control().stop() {
            Ok(()) => {
                if self.wait_for_status(handle, ServiceStatus::Stopped) {
                    self.logger.info(&format!(
                        "Stopped '{}' {}",
                        handle.name,
                        timer.stamp()
                    ));
                }
            }
            Err(e) => self
                .logger
                .error_exception(&e, &format!("Failed to stop '{}'", handle.name)),
        }

        self.refresh(handle);

        if !handle.is_restarting() {
            handle.set_can_toggle(true);
        }
        drop(update);

        handle.status()
    }

    pub fn start(&self, handle: &ServiceHandle) -> ServiceStatus {
        let current = handle.status();
        if current == ServiceStatus::Running {
            self.logger
                .info(&format!("'{}' is already running", handle.name));
            return current;
        }

        let update = InternalUpdate::begin(handle);

        let timer = Stopwatch::start();

        if current == ServiceStatus::Stopped {
            self.logger.info(&format!("Starting '{}'", handle.name));

            match handle.control().start() {
                Ok(()) => {
                    if self.wait_for_status(handle, ServiceStatus::Running) {
                        self.logger.info(&format!(
                            "Started '{}' {}",
                            handle.name,
                            timer.stamp()
                        ));
                    } else {
                        self.logger
                            .error(&format!("'{}' failed to start", handle.name));
                    }
                }
                Err(e) => self
                    .logger
                    .error_exception(&e, &format!("Failed to start '{}'", handle.name)),
            }
        } else {
            self.logger.warn(&format!(
                "'{}' cannot be started from {}",
                handle.name,
                current.as_str()
            ));
        }

        self.refresh(handle);
        handle.set_can_toggle(true);
        drop(update);

        handle.status()
    }

    /// Re-reads the OS status into the handle and reports changes nobody
    /// inside the engine asked for.
    ///
    /// A reading that overlapped the start of an internal update is dropped,
    /// since the toggle that began will refresh the handle itself.
    pub fn refresh(&self, handle: &ServiceHandle) {
        let epoch = handle.update_epoch();
        let new = match handle.control().refresh().and_then(|_| handle.control().status()) {
            Ok(status) => status,
            Err(e) => {
                self.logger
                    .error_exception(&e, &format!("Failed to query '{}'", handle.name));
                ServiceStatus::Error
            }
        };

        let Some((old, internal)) = handle.store_reading(epoch, new) else {
            self.logger.debug(&format!(
                "Discarded stale reading for '{}' ({})",
                handle.name,
                new.as_str()
            ));
            return;
        };
        if old == new || internal {
            return;
        }

        let event = if handle.notify_on_stop && new.is_stopping_or_stopped() {
            HandleEvent::UnexpectedStop {
                id: handle.id(),
                name: handle.name.clone(),
                status: new,
            }
        } else {
            HandleEvent::ExternalChange {
                id: handle.id(),
                name: handle.name.clone(),
                old,
                new,
            }
        };

        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn wait_for_status(&self, handle: &ServiceHandle, desired: ServiceStatus) -> bool {
        match handle.control().wait_for_status(desired, handle.timeout) {
            Ok(()) => true,
            Err(e) => {
                self.logger.error_exception(
                    &e,
                    &format!("'{}' did not reach {}", handle.name, desired.as_str()),
                );
                false
            }
        }
    }
}
