//! Wake-up plumbing shared by every endpoint type.

use embros_core::WaitSignal;
use parking_lot::Mutex;
use std::sync::Arc;

/// Holder for the wait-set signal an endpoint is currently attached to.
pub(crate) struct SignalSlot(Mutex<Option<Arc<WaitSignal>>>);

impl SignalSlot {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(None))
    }

    pub(crate) fn set(&self, signal: &Arc<WaitSignal>) {
        *self.0.lock() = Some(signal.clone());
    }

    pub(crate) fn notify(&self) {
        if let Some(signal) = &*self.0.lock() {
            signal.notify();
        }
    }
}
