//! Core traits and types for the embros deterministic executor.
//!
//! This crate defines what the executor consumes without depending on any
//! particular middleware: the endpoint traits, the readiness aggregation
//! primitive (wait-set), the error taxonomy, and the action protocol
//! types. Backends (such as `embros-mem`) implement the traits; the
//! `embros` crate drives them.

pub mod action;
pub mod endpoint;
pub mod error;
pub mod wait;

#[cfg(feature = "logging")]
pub mod logger;

pub use action::{
    ActionTypes, CancelCode, CancelRequest, CancelResponse, FeedbackMessage, GoalEvent, GoalInfo,
    GoalStatus, GoalStatusArray, GoalStatusEntry, GoalUuid, ResultRequest, ResultResponse,
    SendGoalRequest, SendGoalResponse, transition,
};
pub use endpoint::{
    ActionClientEndpoint, ActionClientReadiness, ActionServerEndpoint, ActionServerReadiness,
    ClientEndpoint, ContextHandle, RawGuardCondition, RawTimer, RequestHeader, ServiceEndpoint,
    Subscribe, Waitable,
};
pub use error::{Error, Result};
pub use wait::{EntityCounters, WaitKind, WaitSet, WaitSignal};
