use std::sync::Arc;

use twine::log::Logger;
use twine::status::{ServiceStatus, ToggleAction};

use crate::logs::{LogLifecycleCoordinator, LoggingPolicy};
use crate::ordering::compute_order;
use crate::service::{HandleId, ServiceHandle};
use crate::toggle::ToggleController;

/// Applies one toggle to a batch of handles, strictly one at a time, in
/// the order produced by [`compute_order`].
pub struct OrderedBatchDispatcher {
    controller: Arc<ToggleController>,
    logs: LogLifecycleCoordinator,
    logger: Arc<dyn Logger>,
}

impl OrderedBatchDispatcher {
    pub fn new(
        controller: Arc<ToggleController>,
        logs: LogLifecycleCoordinator,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            controller,
            logs,
            logger,
        }
    }

    pub fn compute_order(&self, desired: ServiceStatus, handles: &[Arc<ServiceHandle>]) -> Vec<HandleId> {
        compute_order(desired, handles)
    }

    /// Returns the desired status when every handle got there, otherwise the
    /// status of the last handle that did not. Earlier failures are logged only.
    pub fn toggle_group(
        &self,
        action: ToggleAction,
        handles: &[Arc<ServiceHandle>],
        policy: &LoggingPolicy,
    ) -> ServiceStatus {
        let desired = action.desired_status();
        let order = compute_order(desired, handles);
        let mut result = desired;

        self.logger.debug(&format!(
            "{} {} service(s) in order: {}",
            action.as_str(),
            handles.len(),
            self.describe(&order, handles)
        ));

        let mut touched = Vec::with_capacity(order.len());

        for id in &order {
            let Some(handle) = find(handles, id) else {
                return result;
            };

            let status = match action {
                ToggleAction::Start => self.controller.start(handle),
                ToggleAction::Stop => self.controller.stop(handle),
                ToggleAction::Restart => {
                    handle.set_restarting(true);
                    self.controller.stop(handle)
                }
            };

            let accepted = status == desired
                || (action == ToggleAction::Restart && status == ServiceStatus::Stopped);
            if !accepted {
                self.report_mismatch(handle, desired, status);
                result = status;
            }

            touched.push(handle.clone());
        }

        if action != ToggleAction::Start {
            self.logs.archive_and_clear(&touched, policy);
        }

        if action == ToggleAction::Restart {
            for id in &order {
                let Some(handle) = find(handles, id) else {
                    return result;
                };

                let status = self.controller.start(handle);
                handle.finish_restart();

                if status != desired {
                    self.report_mismatch(handle, desired, status);
                    result = status;
                }
            }
        }

        result
    }

    fn report_mismatch(&self, handle: &ServiceHandle, desired: ServiceStatus, actual: ServiceStatus) {
        self.logger.error(&format!(
            "'{}' did not reach {} (now {})",
            handle.name,
            desired.as_str(),
            actual.as_str()
        ));
    }

    fn describe(&self, order: &[HandleId], handles: &[Arc<ServiceHandle>]) -> String {
        order
            .iter()
            .filter_map(|id| find(handles, id).map(|h| h.name.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn find<'a>(handles: &'a [Arc<ServiceHandle>], id: &HandleId) -> Option<&'a Arc<ServiceHandle>> {
    handles.iter().find(|h| h.id() == *id)
}
