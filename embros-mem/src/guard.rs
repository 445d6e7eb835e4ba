//! Manually triggerable readiness sources.

use crate::signal::SignalSlot;
use embros_core::{RawGuardCondition, Result, WaitSignal, Waitable};
use parking_lot::Mutex;
use std::sync::Arc;

/// A latched flag that any thread can raise to wake a blocked executor.
pub struct GuardCondition {
    triggered: Mutex<bool>,
    signal: SignalSlot,
}

impl GuardCondition {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            triggered: Mutex::new(false),
            signal: SignalSlot::new(),
        })
    }
}

impl Waitable for GuardCondition {
    /// Consumes the latched trigger, as waiting on it does in the
    /// underlying middleware model.
    fn ready(&self) -> bool {
        let mut triggered = self.triggered.lock();
        std::mem::replace(&mut *triggered, false)
    }

    fn attach(&self, signal: &Arc<WaitSignal>) {
        self.signal.set(signal);
    }
}

impl RawGuardCondition for GuardCondition {
    fn trigger(&self) -> Result<()> {
        *self.triggered.lock() = true;
        self.signal.notify();
        Ok(())
    }
}
