use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use twine::errors::TwineError;
use twine::log::Logger;
use twine::status::{ServiceStatus, ToggleAction};
use twine::time::{format_duration, Stopwatch};

use crate::dispatcher::OrderedBatchDispatcher;
use crate::logs::LoggingPolicy;
use crate::service::ServiceHandle;

#[derive(Debug, Clone)]
pub enum ToggleTarget {
    Single(Arc<ServiceHandle>),
    Group(Vec<Arc<ServiceHandle>>),
}

/// One unit of work for the gateway.
#[derive(Debug, Clone)]
pub struct ToggleRequest {
    pub action: ToggleAction,
    pub target: ToggleTarget,
    pub policy: LoggingPolicy,
}

/// Outcome delivered once the scheduled unit has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub action: ToggleAction,
    /// Resulting status of a single toggle, or the group's aggregate status.
    pub status: ServiceStatus,
    pub elapsed: Duration,
}

impl Completion {
    pub fn succeeded(&self) -> bool {
        self.status == self.action.desired_status()
    }
}

/// Runs one toggle at a time on a background thread and hands the outcome
/// back through a channel.
pub struct ExecutionGateway {
    dispatcher: Arc<OrderedBatchDispatcher>,
    logger: Arc<dyn Logger>,
    in_flight: Arc<AtomicBool>,
}

impl ExecutionGateway {
    pub fn new(dispatcher: Arc<OrderedBatchDispatcher>, logger: Arc<dyn Logger>) -> Self {
        Self {
            dispatcher,
            logger,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Schedules `request` and returns immediately. There is no queue and no
    /// cancellation: while a unit is running further calls fail with `Busy`.
    pub fn run(&self, request: ToggleRequest) -> Result<Receiver<Completion>, TwineError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TwineError::Busy);
        }

        let (tx, rx) = channel();
        let dispatcher = Arc::clone(&self.dispatcher);
        let logger = Arc::clone(&self.logger);
        let in_flight = Arc::clone(&self.in_flight);

        let spawned = thread::Builder::new()
            .name("trellis-toggle".into())
            .spawn(move || {
                let timer = Stopwatch::start();
                let action = request.action;

                let status = match panic::catch_unwind(AssertUnwindSafe(|| {
                    execute(&dispatcher, &request)
                })) {
                    Ok(status) => status,
                    Err(_) => {
                        logger.error(&format!("{} operation aborted unexpectedly", action.as_str()));
                        ServiceStatus::Error
                    }
                };

                let elapsed = timer.elapsed();
                logger.debug(&format!(
                    "{} finished with {} {}",
                    action.as_str(),
                    status.as_str(),
                    format_duration(elapsed)
                ));

                in_flight.store(false, Ordering::SeqCst);
                let _ = tx.send(Completion {
                    action,
                    status,
                    elapsed,
                });
            });

        if let Err(e) = spawned {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(TwineError::Io(e));
        }

        Ok(rx)
    }
}

fn execute(dispatcher: &OrderedBatchDispatcher, request: &ToggleRequest) -> ServiceStatus {
    match &request.target {
        ToggleTarget::Single(handle) => {
            dispatcher.toggle_group(request.action, slice::from_ref(handle), &request.policy)
        }
        ToggleTarget::Group(handles) => {
            dispatcher.toggle_group(request.action, handles, &request.policy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{LogArchiver, LogFile, LogLifecycleCoordinator};
    use crate::service::OrderSpec;
    use crate::testing::{fake_handle, FakeControl, MemoryLogger, RecordingArchiver};
    use crate::toggle::ToggleController;
    use std::sync::Barrier;
    use twine::status::LogLevel;

    fn gateway_with(archiver: Arc<dyn LogArchiver>) -> (ExecutionGateway, Arc<MemoryLogger>) {
        let logger = Arc::new(MemoryLogger::default());
        let controller = Arc::new(ToggleController::new(logger.clone()));
        let logs = LogLifecycleCoordinator::new(archiver, logger.clone());
        let dispatcher = Arc::new(OrderedBatchDispatcher::new(controller, logs, logger.clone()));
        (ExecutionGateway::new(dispatcher, logger.clone()), logger)
    }

    fn gateway() -> (ExecutionGateway, Arc<MemoryLogger>) {
        gateway_with(Arc::new(RecordingArchiver::default()))
    }

    #[test]
    fn single_toggle_completes_on_channel() {
        let (gw, _) = gateway();
        let fake = FakeControl::new("svc", ServiceStatus::Stopped);
        let handle = fake_handle("svc", &fake, OrderSpec::default());

        let rx = gw
            .run(ToggleRequest {
                action: ToggleAction::Start,
                target: ToggleTarget::Single(handle.clone()),
                policy: LoggingPolicy::default(),
            })
            .unwrap();

        let done = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(done.action, ToggleAction::Start);
        assert_eq!(done.status, ServiceStatus::Running);
        assert!(done.succeeded());
        assert!(!gw.is_busy());
    }

    #[test]
    fn group_failure_surfaces_as_status() {
        let (gw, _) = gateway();
        let ok = FakeControl::new("ok", ServiceStatus::Running);
        let stuck = FakeControl::new("stuck", ServiceStatus::Running);
        stuck.state().fail_stop = true;

        let rx = gw
            .run(ToggleRequest {
                action: ToggleAction::Stop,
                target: ToggleTarget::Group(vec![
                    fake_handle("ok", &ok, OrderSpec::default()),
                    fake_handle("stuck", &stuck, OrderSpec::default()),
                ]),
                policy: LoggingPolicy::default(),
            })
            .unwrap();

        let done = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(done.status, ServiceStatus::Running);
        assert!(!done.succeeded());
    }

    /// Blocks inside the batch until the test releases it.
    struct GateArchiver {
        entered: Barrier,
        release: Barrier,
    }

    impl LogArchiver for GateArchiver {
        fn archive_and_clear(&self, _files: &[LogFile], _policy: &LoggingPolicy) -> Result<(), TwineError> {
            self.entered.wait();
            self.release.wait();
            Ok(())
        }
    }

    #[test]
    fn second_run_while_busy_is_rejected() {
        let gate = Arc::new(GateArchiver {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        let (gw, _) = gateway_with(gate.clone());

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("svc.log");
        std::fs::write(&log, "x").unwrap();
        let fake = FakeControl::new("svc", ServiceStatus::Running);
        let handle = Arc::new(
            ServiceHandle::new("svc", "svc", Box::new(fake))
                .with_logs(vec![log], None)
                .with_status(ServiceStatus::Running),
        );

        let request = ToggleRequest {
            action: ToggleAction::Stop,
            target: ToggleTarget::Single(handle),
            policy: LoggingPolicy::new(false, true, None),
        };

        let rx = gw.run(request.clone()).unwrap();
        gate.entered.wait();

        assert!(gw.is_busy());
        assert!(matches!(gw.run(request), Err(TwineError::Busy)));

        gate.release.wait();
        let done = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(done.status, ServiceStatus::Stopped);
        assert!(!gw.is_busy());
    }

    struct PanickingArchiver;

    impl LogArchiver for PanickingArchiver {
        fn archive_and_clear(&self, _files: &[LogFile], _policy: &LoggingPolicy) -> Result<(), TwineError> {
            panic!("archiver exploded");
        }
    }

    #[test]
    fn panic_in_unit_is_reported_as_error_status() {
        let (gw, logger) = gateway_with(Arc::new(PanickingArchiver));

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("svc.log");
        std::fs::write(&log, "x").unwrap();
        let fake = FakeControl::new("svc", ServiceStatus::Running);
        let handle = Arc::new(
            ServiceHandle::new("svc", "svc", Box::new(fake))
                .with_logs(vec![log], None)
                .with_status(ServiceStatus::Running),
        );

        let rx = gw
            .run(ToggleRequest {
                action: ToggleAction::Stop,
                target: ToggleTarget::Single(handle),
                policy: LoggingPolicy::new(false, true, None),
            })
            .unwrap();

        let done = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(done.status, ServiceStatus::Error);
        assert!(logger.contains(LogLevel::Fail, "aborted unexpectedly"));
        assert!(!gw.is_busy());

        // The gateway stays usable afterwards.
        let spare = FakeControl::new("spare", ServiceStatus::Stopped);
        let rx = gw
            .run(ToggleRequest {
                action: ToggleAction::Start,
                target: ToggleTarget::Single(fake_handle("spare", &spare, OrderSpec::default())),
                policy: LoggingPolicy::default(),
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().status, ServiceStatus::Running);
    }

    #[test]
    fn restart_single_handle() {
        let (gw, _) = gateway();
        let fake = FakeControl::new("svc", ServiceStatus::Running);
        let handle = fake_handle("svc", &fake, OrderSpec::default());

        let rx = gw
            .run(ToggleRequest {
                action: ToggleAction::Restart,
                target: ToggleTarget::Single(handle.clone()),
                policy: LoggingPolicy::default(),
            })
            .unwrap();

        let done = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(done.status, ServiceStatus::Running);
        assert_eq!(fake.state().stop_calls, 1);
        assert_eq!(fake.state().start_calls, 1);
        assert!(handle.can_toggle());
        assert!(!handle.is_restarting());
    }
}
