use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use twine::config::{Config, ServiceConfig};
use twine::errors::TwineError;
use twine::ipc::ServiceSnapshot;
use twine::log::Logger;
use twine::status::ToggleAction;

use crate::control::ServiceControl;
use crate::dispatcher::OrderedBatchDispatcher;
use crate::gateway::{Completion, ExecutionGateway, ToggleRequest, ToggleTarget};
use crate::logs::{LogArchiver, LogLifecycleCoordinator, LoggingPolicy};
use crate::monitor::StatusMonitor;
use crate::responder::{FailureResponder, Notifier};
use crate::service::{OrderSpec, ServiceHandle};
use crate::toggle::ToggleController;

/// Owns the monitored handles and the engine built around them.
pub struct ServiceManager {
    handles: Vec<Arc<ServiceHandle>>,
    gateway: ExecutionGateway,
    policy: LoggingPolicy,
    shutdown: Arc<AtomicBool>,
    logger: Arc<dyn Logger>,
}

impl ServiceManager {
    /// Builds the engine from config. `make_control` binds each configured
    /// service to the OS; services the OS does not know are skipped.
    pub fn from_config<F>(
        config: &Config,
        logger: Arc<dyn Logger>,
        make_control: F,
        archiver: Arc<dyn LogArchiver>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(ServiceManager, StatusMonitor), TwineError>
    where
        F: Fn(&ServiceConfig) -> Result<Box<dyn ServiceControl>, TwineError>,
    {
        let mut controller = ToggleController::new(Arc::clone(&logger));
        let events = controller.subscribe();
        let controller = Arc::new(controller);

        let mut handles = Vec::new();
        for svc in &config.services {
            match Self::build_handle(svc, &make_control) {
                Ok(Some(handle)) => {
                    logger.info(&format!(
                        "Monitoring '{}' ({}) - {}",
                        handle.name,
                        handle.service_name,
                        handle.status().as_str()
                    ));
                    handles.push(Arc::new(handle));
                }
                Ok(None) => logger.warn(&format!(
                    "Service '{}' not found on {}, skipping",
                    svc.service_name,
                    svc.machine.as_deref().unwrap_or("this machine")
                )),
                Err(e) => logger.error_exception(&e, &format!("Cannot monitor '{}'", svc.name)),
            }
        }

        let policy = LoggingPolicy::from(&config.logs);
        if policy.archive_logs() && policy.archive_path().is_none() {
            logger.warn("Log archiving is enabled but no archive_path is set");
        }

        let logs = LogLifecycleCoordinator::new(archiver, Arc::clone(&logger));
        let dispatcher = Arc::new(OrderedBatchDispatcher::new(
            Arc::clone(&controller),
            logs,
            Arc::clone(&logger),
        ));
        let gateway = ExecutionGateway::new(dispatcher, Arc::clone(&logger));

        let responder = Arc::new(FailureResponder::new(Arc::clone(&logger), notifier));
        let monitor = StatusMonitor::new(
            handles.clone(),
            controller,
            responder,
            config.notify.clone(),
            events,
            Duration::from_secs(config.daemon.poll_interval_secs),
            Arc::clone(&logger),
        );

        let manager = ServiceManager {
            handles,
            gateway,
            policy,
            shutdown: Arc::new(AtomicBool::new(false)),
            logger,
        };

        Ok((manager, monitor))
    }

    fn build_handle<F>(svc: &ServiceConfig, make_control: &F) -> Result<Option<ServiceHandle>, TwineError>
    where
        F: Fn(&ServiceConfig) -> Result<Box<dyn ServiceControl>, TwineError>,
    {
        let control = make_control(svc)?;
        if !control.exists()? {
            return Ok(None);
        }

        let status = control.status()?;
        let timeout = match svc.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Some(
            ServiceHandle::new(&svc.name, &svc.service_name, control)
                .with_order(OrderSpec::new(svc.start_order, svc.stop_order))
                .with_timeout(timeout)
                .with_notify_on_stop(svc.notify_on_stop)
                .with_logs(
                    svc.log_files.iter().map(PathBuf::from).collect(),
                    svc.log_dir.as_ref().map(PathBuf::from),
                )
                .with_status(status),
        ))
    }

    pub fn logger(&self) -> Arc<dyn Logger> {
        Arc::clone(&self.logger)
    }

    pub fn handles(&self) -> &[Arc<ServiceHandle>] {
        &self.handles
    }

    pub fn policy(&self) -> &LoggingPolicy {
        &self.policy
    }

    /// Matches on display name or OS service name, ignoring case. An empty
    /// list selects every handle.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<ServiceHandle>>, TwineError> {
        if names.is_empty() {
            return Ok(self.handles.clone());
        }

        names
            .iter()
            .map(|name| {
                self.handles
                    .iter()
                    .find(|h| {
                        h.name.eq_ignore_ascii_case(name) || h.service_name.eq_ignore_ascii_case(name)
                    })
                    .cloned()
                    .ok_or_else(|| TwineError::NotFound(format!("service '{}'", name)))
            })
            .collect()
    }

    pub fn toggle(&self, action: ToggleAction, names: &[String]) -> Result<Receiver<Completion>, TwineError> {
        let mut handles = self.resolve(names)?;

        let target = if handles.len() == 1 {
            ToggleTarget::Single(handles.remove(0))
        } else {
            ToggleTarget::Group(handles)
        };

        self.logger.info(&format!("Scheduling {}", action.as_str()));

        self.gateway.run(ToggleRequest {
            action,
            target,
            policy: self.policy.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.gateway.is_busy()
    }

    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        self.handles
            .iter()
            .map(|h| ServiceSnapshot {
                name: h.name.clone(),
                service_name: h.service_name.clone(),
                status: h.status(),
                can_toggle: h.can_toggle(),
                is_restarting: h.is_restarting(),
            })
            .collect()
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Raises the shutdown flag. Monitored services are left running.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
