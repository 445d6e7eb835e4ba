//! Traits a middleware backend implements so the executor can wait on and
//! drain its endpoints.
//!
//! Every trait here is object-safe: the executor stores endpoints as
//! `Arc<dyn …>` and identifies them by the `Arc` data pointer. Message
//! types are fixed per trait object, so no downcasting happens on the
//! take path.

use crate::{
    action::{
        ActionTypes, CancelRequest, CancelResponse, FeedbackMessage, GoalStatusArray,
        ResultRequest, ResultResponse, SendGoalRequest, SendGoalResponse,
    },
    error::Result,
    wait::{EntityCounters, WaitSet, WaitSignal},
};
use std::{sync::Arc, time::Instant};

/// Validity handle of the middleware context.
pub trait ContextHandle: Send + Sync {
    /// False once the context has been torn down. `spin` exits when this
    /// turns false.
    fn is_valid(&self) -> bool;

    /// Tears the context down.
    fn shutdown(&self);
}

/// An entity a wait-set can block on.
pub trait Waitable: Send + Sync {
    /// Non-blocking readiness probe. For guard conditions this consumes
    /// the trigger.
    fn ready(&self) -> bool;

    /// Registers the wait-set's wake-up signal with this endpoint. The
    /// default is a no-op for entities that become ready by time alone.
    fn attach(&self, signal: &Arc<WaitSignal>) {
        let _ = signal;
    }
}

/// Correlates a service response with its request and originating client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestHeader {
    pub client_id: u64,
    pub sequence: i64,
}

/// Receiving half of a topic.
pub trait Subscribe<T>: Waitable {
    /// Moves one message out of the queue. `Ok(None)` when the queue is
    /// empty (the non-fatal "take failed" outcome).
    fn try_take(&self) -> Result<Option<T>>;
}

/// Server side of a service.
pub trait ServiceEndpoint<Req, Res>: Waitable {
    /// Drains one request together with its reply header.
    fn try_take_request(&self) -> Result<Option<(RequestHeader, Req)>>;

    /// Sends the response for a previously taken request.
    fn send_response(&self, header: &RequestHeader, response: &Res) -> Result<()>;
}

/// Client side of a service.
pub trait ClientEndpoint<Req, Res>: Waitable {
    /// Sends a request, returning its sequence number.
    fn send_request(&self, request: &Req) -> Result<i64>;

    /// Drains one response together with the sequence number it answers.
    fn try_take_response(&self) -> Result<Option<(i64, Res)>>;
}

/// A middleware timer. The user callback is owned by the timer itself;
/// the executor only decides when to fire it.
pub trait RawTimer: Waitable {
    /// Invokes the timer callback and advances the deadline. Returns
    /// `Err(TimerCanceled)` once the timer has been canceled.
    fn call(&self) -> Result<()>;

    /// Next fire time, or `None` when canceled. The wait-set uses this to
    /// bound its sleep.
    fn next_deadline(&self) -> Option<Instant>;
}

/// A manually triggerable readiness source.
pub trait RawGuardCondition: Waitable {
    /// Marks the condition ready and wakes any blocked wait-set.
    fn trigger(&self) -> Result<()>;
}

/// Readiness of an action client's five sub-entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionClientReadiness {
    pub feedback: bool,
    pub status: bool,
    pub goal_response: bool,
    pub cancel_response: bool,
    pub result_response: bool,
}

impl ActionClientReadiness {
    pub fn any(&self) -> bool {
        self.feedback
            || self.status
            || self.goal_response
            || self.cancel_response
            || self.result_response
    }
}

/// Readiness of an action server's sub-entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionServerReadiness {
    pub goal_request: bool,
    pub cancel_request: bool,
    pub result_request: bool,
    pub goal_expired: bool,
}

impl ActionServerReadiness {
    pub fn any(&self) -> bool {
        self.goal_request || self.cancel_request || self.result_request || self.goal_expired
    }
}

/// Client side of an action.
pub trait ActionClientEndpoint<A: ActionTypes>: Send + Sync {
    /// How many wait-set slots this endpoint occupies per kind.
    fn wait_set_entities(&self) -> EntityCounters;

    /// Registers every sub-entity with the wait-set, remembering the
    /// assigned indices for the readiness snapshot.
    fn register(&self, wait_set: &mut WaitSet) -> Result<()>;

    /// Reads the per-sub-entity readiness back from the wait-set.
    fn readiness(&self, wait_set: &WaitSet) -> ActionClientReadiness;

    fn send_goal_request(&self, request: &SendGoalRequest<A::Goal>) -> Result<i64>;
    fn try_take_goal_response(&self) -> Result<Option<(i64, SendGoalResponse)>>;

    fn send_cancel_request(&self, request: &CancelRequest) -> Result<i64>;
    fn try_take_cancel_response(&self) -> Result<Option<(i64, CancelResponse)>>;

    fn send_result_request(&self, request: &ResultRequest) -> Result<i64>;
    fn try_take_result_response(&self) -> Result<Option<(i64, ResultResponse<A::Result>)>>;

    fn try_take_feedback(&self) -> Result<Option<FeedbackMessage<A::Feedback>>>;
    fn try_take_status(&self) -> Result<Option<GoalStatusArray>>;
}

/// Server side of an action.
pub trait ActionServerEndpoint<A: ActionTypes>: Send + Sync {
    /// How many wait-set slots this endpoint occupies per kind.
    fn wait_set_entities(&self) -> EntityCounters;

    /// Registers every sub-entity with the wait-set, remembering the
    /// assigned indices for the readiness snapshot.
    fn register(&self, wait_set: &mut WaitSet) -> Result<()>;

    /// Reads the per-sub-entity readiness back from the wait-set.
    fn readiness(&self, wait_set: &WaitSet) -> ActionServerReadiness;

    fn try_take_goal_request(&self) -> Result<Option<(RequestHeader, SendGoalRequest<A::Goal>)>>;
    fn send_goal_response(&self, header: &RequestHeader, response: &SendGoalResponse)
    -> Result<()>;

    fn try_take_cancel_request(&self) -> Result<Option<(RequestHeader, CancelRequest)>>;
    fn send_cancel_response(&self, header: &RequestHeader, response: &CancelResponse)
    -> Result<()>;

    fn try_take_result_request(&self) -> Result<Option<(RequestHeader, ResultRequest)>>;
    fn send_result_response(
        &self,
        header: &RequestHeader,
        response: &ResultResponse<A::Result>,
    ) -> Result<()>;

    fn publish_feedback(&self, feedback: &FeedbackMessage<A::Feedback>) -> Result<()>;
    fn publish_status(&self, status: &GoalStatusArray) -> Result<()>;
}
