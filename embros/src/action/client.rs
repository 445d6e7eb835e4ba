//! Action client sub-engine.
//!
//! The executor advances one state machine per in-flight goal: the goal
//! response is matched by sequence number, feedback by UUID, and cancel
//! and result responses by their own sequence numbers. An accepted goal
//! automatically issues its result request; a rejected goal and a
//! delivered result release the per-goal slot back to the pool.
//!
//! User callbacks run with the goal pool unlocked, so issuing a new goal
//! from inside a callback is legal.

use crate::{
    action::pool::GoalPool,
    handle::{ActionWork, HandleKind},
};
use embros_core::{
    ActionClientEndpoint, ActionClientReadiness, ActionTypes, CancelRequest, CancelResponse,
    EntityCounters, Error, FeedbackMessage, GoalInfo, GoalStatus, GoalUuid, Result, ResultRequest,
    ResultResponse, SendGoalRequest, SendGoalResponse, WaitSet,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Callbacks dispatched for one registered action client.
pub struct ClientCallbacks<A: ActionTypes> {
    /// Invoked once per goal with the server's accept/reject decision.
    pub on_goal_response: Box<dyn FnMut(&GoalUuid, bool) + Send>,

    /// Invoked for each feedback sample, if present.
    pub on_feedback: Option<Box<dyn FnMut(&GoalUuid, &A::Feedback) + Send>>,

    /// Invoked when the result arrives; the goal slot is released after.
    pub on_result: Box<dyn FnMut(&GoalUuid, GoalStatus, &A::Result) + Send>,

    /// Invoked with the outcome of a cancel request, if present.
    pub on_cancel: Option<Box<dyn FnMut(&GoalUuid, bool) + Send>>,
}

pub(crate) struct ClientGoal<A: ActionTypes> {
    uuid: GoalUuid,
    goal_sequence: i64,
    cancel_sequence: Option<i64>,
    result_sequence: Option<i64>,
    status: GoalStatus,
    accepted: bool,
    goal_response: Option<SendGoalResponse>,
    feedback: Option<FeedbackMessage<A::Feedback>>,
    cancel_response: Option<CancelResponse>,
    result_response: Option<ResultResponse<A::Result>>,
}

impl<A: ActionTypes> ClientGoal<A> {
    fn new(uuid: GoalUuid, goal_sequence: i64) -> Self {
        Self {
            uuid,
            goal_sequence,
            cancel_sequence: None,
            result_sequence: None,
            status: GoalStatus::Unknown,
            accepted: false,
            goal_response: None,
            feedback: None,
            cancel_response: None,
            result_response: None,
        }
    }
}

pub(crate) struct ClientCore<A: ActionTypes> {
    endpoint: Arc<dyn ActionClientEndpoint<A>>,
    pool: GoalPool<ClientGoal<A>>,
    next_uuid: u64,
}

impl<A: ActionTypes> ClientCore<A> {
    fn new_uuid(&mut self) -> GoalUuid {
        self.next_uuid += 1;
        let mut uuid = [0u8; 16];
        uuid[..8].copy_from_slice(&self.next_uuid.to_le_bytes());
        uuid
    }

    fn send_goal(&mut self, goal: A::Goal) -> Result<GoalUuid> {
        if self.pool.free_count() == 0 {
            return Err(Error::CapacityExceeded);
        }
        let uuid = self.new_uuid();
        let sequence = self.endpoint.send_goal_request(&SendGoalRequest {
            goal_id: uuid,
            goal,
        })?;
        let _ = self.pool.acquire(ClientGoal::new(uuid, sequence));
        Ok(uuid)
    }

    fn send_cancel(&mut self, uuid: &GoalUuid) -> Result<()> {
        let index = self.pool.find(|goal| goal.uuid == *uuid).ok_or(Error::NotFound)?;
        let sequence = self.endpoint.send_cancel_request(&CancelRequest {
            goal_info: GoalInfo {
                goal_id: *uuid,
                stamp_nanos: 0,
            },
        })?;
        if let Some(goal) = self.pool.get_mut(index) {
            goal.cancel_sequence = Some(sequence);
        }
        Ok(())
    }
}

/// User-facing action client handle. Registered with an executor through
/// [`Executor::add_action_client`](crate::Executor::add_action_client);
/// goals are issued here and dispatched there.
pub struct Client<A: ActionTypes> {
    endpoint: Arc<dyn ActionClientEndpoint<A>>,
    core: Arc<Mutex<ClientCore<A>>>,
}

impl<A: ActionTypes> Client<A> {
    /// Wraps an action client endpoint, allocating a pool of `pool_size`
    /// goal slots. This is the only allocation the client performs.
    pub fn new(
        endpoint: Arc<impl ActionClientEndpoint<A> + 'static>,
        pool_size: usize,
    ) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::InvalidArgument("goal pool size must be non-zero"));
        }
        let endpoint: Arc<dyn ActionClientEndpoint<A>> = endpoint;
        Ok(Self {
            endpoint: endpoint.clone(),
            core: Arc::new(Mutex::new(ClientCore {
                endpoint,
                pool: GoalPool::new(pool_size),
                next_uuid: 0,
            })),
        })
    }

    /// Issues a goal, returning its UUID. Fails with `CapacityExceeded`
    /// when every goal slot is in flight.
    pub fn send_goal(&self, goal: A::Goal) -> Result<GoalUuid> {
        self.core.lock().send_goal(goal)
    }

    /// Requests cancellation of an in-flight goal.
    pub fn send_cancel(&self, uuid: &GoalUuid) -> Result<()> {
        self.core.lock().send_cancel(uuid)
    }

    /// Number of free goal slots.
    pub fn free_goals(&self) -> usize {
        self.core.lock().pool.free_count()
    }

    pub(crate) fn endpoint_addr(&self) -> usize {
        Arc::as_ptr(&self.endpoint) as *const () as usize
    }

    pub(crate) fn entry(&self, callbacks: ClientCallbacks<A>) -> ClientEntry<A> {
        ClientEntry {
            endpoint: self.endpoint.clone(),
            core: self.core.clone(),
            callbacks,
            readiness: ActionClientReadiness::default(),
        }
    }
}

enum ClientEvent<A: ActionTypes> {
    GoalResponse {
        index: usize,
        uuid: GoalUuid,
        accepted: bool,
    },
    Feedback {
        uuid: GoalUuid,
        message: FeedbackMessage<A::Feedback>,
    },
    CancelResponse {
        uuid: GoalUuid,
        cancelled: bool,
    },
    Result {
        index: usize,
        uuid: GoalUuid,
        response: ResultResponse<A::Result>,
    },
}

pub(crate) struct ClientEntry<A: ActionTypes> {
    endpoint: Arc<dyn ActionClientEndpoint<A>>,
    core: Arc<Mutex<ClientCore<A>>>,
    callbacks: ClientCallbacks<A>,
    readiness: ActionClientReadiness,
}

impl<A: ActionTypes> ClientEntry<A> {
    /// Pops one consumable per-goal event, clearing its flag. Goal
    /// bookkeeping that must precede the user callback happens here,
    /// under the lock.
    fn next_event(core: &mut ClientCore<A>) -> Option<ClientEvent<A>> {
        let mut cursor = core.pool.used_head();
        while let Some(index) = cursor {
            cursor = core.pool.next_used(index);
            let Some(goal) = core.pool.get_mut(index) else {
                continue;
            };
            let uuid = goal.uuid;

            if let Some(response) = goal.goal_response.take() {
                if response.accepted {
                    goal.accepted = true;
                    goal.status = GoalStatus::Accepted;
                }
                return Some(ClientEvent::GoalResponse {
                    index,
                    uuid,
                    accepted: response.accepted,
                });
            }
            if let Some(message) = goal.feedback.take() {
                return Some(ClientEvent::Feedback { uuid, message });
            }
            if let Some(response) = goal.cancel_response.take() {
                let cancelled = response
                    .goals_canceling
                    .iter()
                    .any(|info| info.goal_id == uuid);
                if cancelled {
                    goal.status = GoalStatus::Canceling;
                }
                return Some(ClientEvent::CancelResponse { uuid, cancelled });
            }
            if let Some(response) = goal.result_response.take() {
                return Some(ClientEvent::Result {
                    index,
                    uuid,
                    response,
                });
            }
        }
        None
    }
}

impl<A: ActionTypes> ActionWork for ClientEntry<A> {
    fn kind(&self) -> HandleKind {
        HandleKind::ActionClient
    }

    fn endpoint_addr(&self) -> usize {
        Arc::as_ptr(&self.endpoint) as *const () as usize
    }

    fn wait_set_entities(&self) -> EntityCounters {
        self.endpoint.wait_set_entities()
    }

    fn register(&mut self, wait_set: &mut WaitSet) -> Result<()> {
        self.endpoint.register(wait_set)
    }

    fn refresh(&mut self, wait_set: &WaitSet) -> bool {
        self.readiness = self.endpoint.readiness(wait_set);
        self.readiness.any()
    }

    fn take(&mut self) -> Result<()> {
        let mut core = self.core.lock();

        if self.readiness.goal_response {
            self.readiness.goal_response = false;
            if let Some((sequence, response)) = self.endpoint.try_take_goal_response()? {
                match core.pool.find(|goal| goal.goal_sequence == sequence) {
                    Some(index) => {
                        if let Some(goal) = core.pool.get_mut(index) {
                            goal.goal_response = Some(response);
                        }
                    }
                    None => debug!(sequence, "goal response without a matching goal"),
                }
            }
        }

        if self.readiness.feedback {
            self.readiness.feedback = false;
            if let Some(message) = self.endpoint.try_take_feedback()? {
                match core.pool.find(|goal| goal.uuid == message.goal_id) {
                    Some(index) => {
                        if let Some(goal) = core.pool.get_mut(index) {
                            goal.feedback = Some(message);
                        }
                    }
                    None => debug!("feedback for an unknown goal"),
                }
            }
        }

        if self.readiness.status {
            self.readiness.status = false;
            if let Some(array) = self.endpoint.try_take_status()? {
                for entry in &array.status_list {
                    if let Some(index) =
                        core.pool.find(|goal| goal.uuid == entry.info.goal_id)
                        && let Some(goal) = core.pool.get_mut(index)
                    {
                        goal.status = entry.status;
                    }
                }
            }
        }

        if self.readiness.cancel_response {
            self.readiness.cancel_response = false;
            if let Some((sequence, response)) = self.endpoint.try_take_cancel_response()? {
                match core
                    .pool
                    .find(|goal| goal.cancel_sequence == Some(sequence))
                {
                    Some(index) => {
                        if let Some(goal) = core.pool.get_mut(index) {
                            goal.cancel_response = Some(response);
                        }
                    }
                    None => debug!(sequence, "cancel response without a matching goal"),
                }
            }
        }

        if self.readiness.result_response {
            self.readiness.result_response = false;
            if let Some((sequence, response)) = self.endpoint.try_take_result_response()? {
                match core
                    .pool
                    .find(|goal| goal.result_sequence == Some(sequence))
                {
                    Some(index) => {
                        if let Some(goal) = core.pool.get_mut(index) {
                            goal.result_response = Some(response);
                        }
                    }
                    None => debug!(sequence, "result response without a matching goal"),
                }
            }
        }

        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        loop {
            let event = Self::next_event(&mut self.core.lock());
            match event {
                Some(ClientEvent::GoalResponse {
                    index,
                    uuid,
                    accepted,
                }) => {
                    (self.callbacks.on_goal_response)(&uuid, accepted);
                    if accepted {
                        let sequence = self
                            .endpoint
                            .send_result_request(&ResultRequest { goal_id: uuid })?;
                        if let Some(goal) = self.core.lock().pool.get_mut(index) {
                            goal.result_sequence = Some(sequence);
                        }
                    } else {
                        let _ = self.core.lock().pool.release(index);
                    }
                }
                Some(ClientEvent::Feedback { uuid, message }) => {
                    if let Some(callback) = &mut self.callbacks.on_feedback {
                        callback(&uuid, &message.feedback);
                    }
                }
                Some(ClientEvent::CancelResponse { uuid, cancelled }) => {
                    if let Some(callback) = &mut self.callbacks.on_cancel {
                        callback(&uuid, cancelled);
                    }
                }
                Some(ClientEvent::Result {
                    index,
                    uuid,
                    response,
                }) => {
                    (self.callbacks.on_result)(&uuid, response.status, &response.result);
                    let _ = self.core.lock().pool.release(index);
                }
                None => return Ok(()),
            }
        }
    }
}
