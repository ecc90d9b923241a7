use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use twine::status::ServiceStatus;
use uuid::Uuid;

use crate::control::ServiceControl;

pub type HandleId = Uuid;

/// Start/stop positions used by the batch ordering pass. 0 means unordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderSpec {
    pub start_order: u32,
    pub stop_order: u32,
}

impl OrderSpec {
    pub fn new(start_order: u32, stop_order: u32) -> Self {
        Self {
            start_order,
            stop_order,
        }
    }

    /// Start order when heading to `Running`, stop order otherwise.
    pub fn for_status(&self, desired: ServiceStatus) -> u32 {
        if desired == ServiceStatus::Running {
            self.start_order
        } else {
            self.stop_order
        }
    }
}

/// One monitored service.
///
/// Status and flags are only mutated by the toggle controller while
/// `is_receiving_internal_update` is held, or by a refresh outside that
/// window. Callers must keep at most one toggle in flight per handle.
pub struct ServiceHandle {
    id: HandleId,
    pub name: String,
    pub service_name: String,
    pub order: OrderSpec,
    /// `None` waits indefinitely for a status transition.
    pub timeout: Option<Duration>,
    pub notify_on_stop: bool,
    pub log_files: Vec<PathBuf>,
    pub log_dir: Option<PathBuf>,

    control: Box<dyn ServiceControl>,
    status: Mutex<ServiceStatus>,
    is_restarting: AtomicBool,
    can_toggle: AtomicBool,
    receiving_internal_update: AtomicBool,
    /// Bumped each time an internal update begins.
    update_epoch: AtomicU64,
}

impl ServiceHandle {
    pub fn new(
        name: impl Into<String>,
        service_name: impl Into<String>,
        control: Box<dyn ServiceControl>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            service_name: service_name.into(),
            order: OrderSpec::default(),
            timeout: None,
            notify_on_stop: false,
            log_files: Vec::new(),
            log_dir: None,
            control,
            status: Mutex::new(ServiceStatus::None),
            is_restarting: AtomicBool::new(false),
            can_toggle: AtomicBool::new(true),
            receiving_internal_update: AtomicBool::new(false),
            update_epoch: AtomicU64::new(0),
        }
    }

    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order = order;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_notify_on_stop(mut self, notify: bool) -> Self {
        self.notify_on_stop = notify;
        self
    }

    pub fn with_logs(mut self, files: Vec<PathBuf>, dir: Option<PathBuf>) -> Self {
        self.log_files = files;
        self.log_dir = dir;
        self
    }

    /// Seeds the cached status without going through refresh.
    pub fn with_status(self, status: ServiceStatus) -> Self {
        self.replace_status(status);
        self
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn control(&self) -> &dyn ServiceControl {
        self.control.as_ref()
    }

    pub fn status(&self) -> ServiceStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores `status` and returns the previous value.
    pub(crate) fn replace_status(&self, status: ServiceStatus) -> ServiceStatus {
        let mut current = self.status.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, status)
    }

    pub(crate) fn update_epoch(&self) -> u64 {
        self.update_epoch.load(Ordering::SeqCst)
    }

    /// Stores a reading taken while `epoch` was current. Returns `None` and
    /// leaves the cache alone if an internal update began since then,
    /// otherwise the previous status and whether an internal update is held.
    pub(crate) fn store_reading(&self, epoch: u64, status: ServiceStatus) -> Option<(ServiceStatus, bool)> {
        let mut current = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if self.update_epoch() != epoch {
            return None;
        }
        let old = std::mem::replace(&mut *current, status);
        Some((old, self.is_receiving_internal_update()))
    }

    pub fn is_restarting(&self) -> bool {
        self.is_restarting.load(Ordering::SeqCst)
    }

    pub(crate) fn set_restarting(&self, value: bool) {
        self.is_restarting.store(value, Ordering::SeqCst);
    }

    pub fn can_toggle(&self) -> bool {
        self.can_toggle.load(Ordering::SeqCst)
    }

    pub(crate) fn set_can_toggle(&self, value: bool) {
        self.can_toggle.store(value, Ordering::SeqCst);
    }

    pub fn is_receiving_internal_update(&self) -> bool {
        self.receiving_internal_update.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_internal_update(&self) {
        // Under the status lock so `store_reading` sees both or neither.
        let _status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        self.update_epoch.fetch_add(1, Ordering::SeqCst);
        self.receiving_internal_update.store(true, Ordering::SeqCst);
    }

    pub(crate) fn end_internal_update(&self) {
        self.receiving_internal_update.store(false, Ordering::SeqCst);
    }

    /// Clears the restart guard and makes the handle toggleable again.
    pub(crate) fn finish_restart(&self) {
        self.set_restarting(false);
        self.set_can_toggle(true);
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("service_name", &self.service_name)
            .field("status", &self.status())
            .field("order", &self.order)
            .finish()
    }
}
