use std::sync::Arc;

use twine::status::ServiceStatus;

use crate::service::{HandleId, ServiceHandle};

/// Resolves the execution order of a batch heading to `desired`.
///
/// The sequence starts with one empty slot per handle. Explicitly ordered
/// handles are inserted at `order - 1`, shifting later entries right;
/// unordered handles (order 0) are appended. Empty slots are stripped at
/// the end, so unordered handles run last in encounter order. A repeated
/// order value puts the later handle ahead of the earlier one.
pub fn compute_order(desired: ServiceStatus, handles: &[Arc<ServiceHandle>]) -> Vec<HandleId> {
    let mut slots: Vec<Option<HandleId>> = vec![None; handles.len()];

    for handle in handles {
        let order = handle.order.for_status(desired) as usize;
        if order == 0 {
            slots.push(Some(handle.id()));
            continue;
        }

        // Orders past the end of the sequence land at the end.
        let index = (order - 1).min(slots.len());
        slots.insert(index, Some(handle.id()));
    }

    slots.into_iter().flatten().collect()
}
