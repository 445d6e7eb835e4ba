#![allow(dead_code)]

use embros_core::ActionTypes;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared event log for observing callback order across a test.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(log: &EventLog, event: impl Into<String>) {
    log.lock().push(event.into());
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().clone()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountGoal {
    pub target: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountFeedback {
    pub current: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountResult {
    pub total: u32,
}

/// Action used throughout the integration tests: count up to a target.
pub struct CountAction;

impl ActionTypes for CountAction {
    type Goal = CountGoal;
    type Feedback = CountFeedback;
    type Result = CountResult;
}
