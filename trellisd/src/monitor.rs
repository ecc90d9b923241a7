use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use twine::config::NotifyConfig;
use twine::log::Logger;

use crate::responder::{FailureResponder, FailureState};
use crate::service::ServiceHandle;
use crate::toggle::{HandleEvent, ToggleController};

const SHUTDOWN_CHECK: Duration = Duration::from_millis(100);

/// Periodically refreshes every handle and routes the resulting events.
pub struct StatusMonitor {
    handles: Vec<Arc<ServiceHandle>>,
    controller: Arc<ToggleController>,
    responder: Arc<FailureResponder>,
    notify: NotifyConfig,
    events: Receiver<HandleEvent>,
    interval: Duration,
    logger: Arc<dyn Logger>,
}

impl StatusMonitor {
    pub fn new(
        handles: Vec<Arc<ServiceHandle>>,
        controller: Arc<ToggleController>,
        responder: Arc<FailureResponder>,
        notify: NotifyConfig,
        events: Receiver<HandleEvent>,
        interval: Duration,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            handles,
            controller,
            responder,
            notify,
            events,
            interval,
            logger,
        }
    }

    pub fn responder(&self) -> &Arc<FailureResponder> {
        &self.responder
    }

    pub fn poll_once(&self) {
        for handle in &self.handles {
            // The toggle controller owns the handle for now.
            if handle.is_receiving_internal_update() {
                continue;
            }
            self.controller.refresh(handle);
        }

        self.drain_events();
    }

    /// Handles every event queued so far, including those raised by toggles.
    pub fn drain_events(&self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    pub fn run(self, shutdown: Arc<AtomicBool>) {
        self.logger.info(&format!(
            "Monitoring {} service(s) every {}s",
            self.handles.len(),
            self.interval.as_secs()
        ));

        while !shutdown.load(Ordering::SeqCst) {
            self.poll_once();

            let next = Instant::now() + self.interval;
            while Instant::now() < next && !shutdown.load(Ordering::SeqCst) {
                thread::sleep(SHUTDOWN_CHECK);
            }
        }

        self.logger.info("Status monitor stopped");
    }

    fn handle_event(&self, event: HandleEvent) {
        match event {
            HandleEvent::UnexpectedStop { name, status, .. } => {
                self.logger.warn(&format!(
                    "'{}' stopped unexpectedly ({})",
                    name,
                    status.as_str()
                ));

                let state = FailureState {
                    service_name: name,
                    notify_on_stop: true,
                    recipients: self.notify.recipients.clone(),
                    max_per_minute: self.notify.max_per_minute,
                    max_per_day: self.notify.max_per_day,
                };
                self.responder.handle_failure(&state);
            }
            HandleEvent::ExternalChange { name, old, new, .. } => {
                self.logger.info(&format!(
                    "'{}' changed externally: {} -> {}",
                    name,
                    old.as_str(),
                    new.as_str()
                ));
            }
        }
    }
}
