//! Trigger predicates: the per-cycle gate on dispatch.
//!
//! After readiness collection the executor evaluates its trigger over the
//! handle table; only when it returns true does the cycle take and
//! execute anything.

use crate::handle::{Handle, HandleKind};
use std::sync::Arc;

/// Per-cycle dispatch gate evaluated over the live handles.
pub type Trigger = Box<dyn FnMut(TriggerView<'_>) -> bool + Send>;

/// Read-only view of one handle, as seen by a trigger.
#[derive(Debug, Clone, Copy)]
pub struct TriggerHandle {
    pub kind: HandleKind,
    pub endpoint_addr: usize,
    pub data_available: bool,
}

/// Read-only view of the handle table, in insertion order.
pub struct TriggerView<'a> {
    pub(crate) handles: &'a [Handle],
}

impl TriggerView<'_> {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TriggerHandle> + '_ {
        self.handles.iter().map(|handle| TriggerHandle {
            kind: handle.entry.kind(),
            endpoint_addr: handle.entry.endpoint_addr(),
            data_available: handle.data_available,
        })
    }
}

/// Stable address of an endpoint, for matching against
/// [`TriggerHandle::endpoint_addr`].
pub fn endpoint_addr<E: ?Sized>(endpoint: &Arc<E>) -> usize {
    Arc::as_ptr(endpoint) as *const () as usize
}

/// Fires when every registered handle has data available.
pub fn trigger_all() -> Trigger {
    Box::new(|view| view.iter().all(|handle| handle.data_available))
}

/// Fires when at least one registered handle has data available.
pub fn trigger_any() -> Trigger {
    Box::new(|view| view.iter().any(|handle| handle.data_available))
}

/// Fires when the given endpoint's handle has data available.
pub fn trigger_one<E: ?Sized>(endpoint: &Arc<E>) -> Trigger {
    let addr = endpoint_addr(endpoint);
    Box::new(move |view| {
        view.iter()
            .any(|handle| handle.endpoint_addr == addr && handle.data_available)
    })
}

/// Fires every cycle.
pub fn trigger_always() -> Trigger {
    Box::new(|_| true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Entry, GuardConditionEntry, Invocation};
    use embros_core::{RawGuardCondition, Result, Waitable};

    struct FakeGuard;

    impl Waitable for FakeGuard {
        fn ready(&self) -> bool {
            false
        }
    }

    impl RawGuardCondition for FakeGuard {
        fn trigger(&self) -> Result<()> {
            Ok(())
        }
    }

    fn guard_handle(available: bool) -> (Arc<FakeGuard>, Handle) {
        let endpoint = Arc::new(FakeGuard);
        let mut handle = Handle::new(
            Entry::GuardCondition(GuardConditionEntry {
                endpoint: endpoint.clone(),
                waitable: endpoint.clone(),
                callback: Box::new(|| ()),
            }),
            Invocation::OnNewData,
        );
        handle.data_available = available;
        (endpoint, handle)
    }

    #[test]
    fn test_any_and_all() {
        let (_, ready) = guard_handle(true);
        let (_, idle) = guard_handle(false);
        let handles = [ready, idle];

        let mut any = trigger_any();
        let mut all = trigger_all();
        let mut always = trigger_always();
        assert!(any(TriggerView { handles: &handles }));
        assert!(!all(TriggerView { handles: &handles }));
        assert!(always(TriggerView { handles: &handles }));
    }

    #[test]
    fn test_one_matches_endpoint() {
        let (ready_endpoint, ready) = guard_handle(true);
        let (idle_endpoint, idle) = guard_handle(false);
        let handles = [ready, idle];

        let mut one_ready = trigger_one(&ready_endpoint);
        let mut one_idle = trigger_one(&idle_endpoint);
        assert!(one_ready(TriggerView { handles: &handles }));
        assert!(!one_idle(TriggerView { handles: &handles }));
    }
}
