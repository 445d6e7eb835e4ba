//! Action server sub-engine.
//!
//! Incoming goal requests acquire a slot from the goal pool; cancel and
//! result requests are routed to their goal by UUID. The execute step
//! runs the user goal and cancel callbacks and sends the wire responses;
//! goals end through the [`Server`] helpers and their slots are released
//! on the executor's next pass.
//!
//! User callbacks run with the goal pool unlocked, so the helpers may be
//! called from inside a callback or from a worker thread.

use crate::{
    action::pool::GoalPool,
    handle::{ActionWork, HandleKind},
};
use embros_core::{
    ActionServerEndpoint, ActionServerReadiness, ActionTypes, CancelCode, CancelResponse,
    EntityCounters, Error, FeedbackMessage, GoalEvent, GoalInfo, GoalStatus, GoalStatusArray,
    GoalStatusEntry, GoalUuid, RequestHeader, Result, ResultResponse, SendGoalRequest,
    SendGoalResponse, WaitSet, transition,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Callbacks dispatched for one registered action server.
pub struct ServerCallbacks<A: ActionTypes> {
    /// Decides whether a new goal is accepted.
    pub on_goal: Box<dyn FnMut(&SendGoalRequest<A::Goal>) -> bool + Send>,

    /// Decides whether an admissible cancel request is honoured.
    pub on_cancel: Box<dyn FnMut(&GoalInfo) -> bool + Send>,
}

pub(crate) struct ServerGoal<A: ActionTypes> {
    uuid: GoalUuid,
    request: Option<SendGoalRequest<A::Goal>>,
    goal_header: Option<RequestHeader>,
    cancel_header: Option<RequestHeader>,
    result_header: Option<RequestHeader>,
    status: GoalStatus,
    pending_goal: bool,
    pending_cancel: bool,
    ended: bool,

    /// Terminal result awaiting a result request.
    result: Option<ResultResponse<A::Result>>,
}

pub(crate) struct ServerCore<A: ActionTypes> {
    endpoint: Arc<dyn ActionServerEndpoint<A>>,
    pool: GoalPool<ServerGoal<A>>,
}

impl<A: ActionTypes> ServerCore<A> {
    fn publish_status(&self) -> Result<()> {
        let mut array = GoalStatusArray::default();
        let mut cursor = self.pool.used_head();
        while let Some(index) = cursor {
            cursor = self.pool.next_used(index);
            if let Some(goal) = self.pool.get(index) {
                array.status_list.push(GoalStatusEntry {
                    info: GoalInfo {
                        goal_id: goal.uuid,
                        stamp_nanos: 0,
                    },
                    status: goal.status,
                });
            }
        }
        self.endpoint.publish_status(&array)
    }

    /// Moves a goal to a terminal state and delivers its result to the
    /// stashed result request, or parks the result until one arrives.
    fn finish(&mut self, uuid: &GoalUuid, event: GoalEvent, result: A::Result) -> Result<()> {
        let index = self
            .pool
            .find(|goal| goal.uuid == *uuid)
            .ok_or(Error::NotFound)?;
        let goal = self.pool.get_mut(index).ok_or(Error::NotFound)?;

        // A goal finished before its result request arrives is still in
        // Accepted; run it through Executing so the transition holds.
        let mut status = goal.status;
        if status == GoalStatus::Accepted
            && let Some(next) = transition(status, GoalEvent::Execute)
        {
            status = next;
        }
        let status = transition(status, event)
            .ok_or(Error::InvalidArgument("goal cannot end from its current state"))?;
        goal.status = status;
        goal.ended = true;

        let response = ResultResponse { status, result };
        match goal.result_header.take() {
            Some(header) => self.endpoint.send_result_response(&header, &response)?,
            None => goal.result = Some(response),
        }
        self.publish_status()
    }

    fn feedback(&self, uuid: &GoalUuid, feedback: A::Feedback) -> Result<()> {
        self.pool
            .find(|goal| goal.uuid == *uuid)
            .ok_or(Error::NotFound)?;
        self.endpoint.publish_feedback(&FeedbackMessage {
            goal_id: *uuid,
            feedback,
        })
    }
}

/// User-facing action server handle. Registered with an executor through
/// [`Executor::add_action_server`](crate::Executor::add_action_server);
/// goals end through the helpers here.
pub struct Server<A: ActionTypes> {
    endpoint: Arc<dyn ActionServerEndpoint<A>>,
    core: Arc<Mutex<ServerCore<A>>>,
}

impl<A: ActionTypes> Server<A> {
    /// Wraps an action server endpoint, allocating a pool of `pool_size`
    /// goal slots together with their goal-request storage. This is the
    /// only allocation the server performs.
    pub fn new(
        endpoint: Arc<impl ActionServerEndpoint<A> + 'static>,
        pool_size: usize,
    ) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::InvalidArgument("goal pool size must be non-zero"));
        }
        let endpoint: Arc<dyn ActionServerEndpoint<A>> = endpoint;
        Ok(Self {
            endpoint: endpoint.clone(),
            core: Arc::new(Mutex::new(ServerCore {
                endpoint,
                pool: GoalPool::new(pool_size),
            })),
        })
    }

    /// Ends the goal successfully and delivers `result`.
    pub fn succeed(&self, uuid: &GoalUuid, result: A::Result) -> Result<()> {
        self.core.lock().finish(uuid, GoalEvent::Succeed, result)
    }

    /// Aborts the goal and delivers `result`.
    pub fn abort(&self, uuid: &GoalUuid, result: A::Result) -> Result<()> {
        self.core.lock().finish(uuid, GoalEvent::Abort, result)
    }

    /// Completes cancellation of a goal in `Canceling` and delivers
    /// `result`.
    pub fn canceled(&self, uuid: &GoalUuid, result: A::Result) -> Result<()> {
        self.core.lock().finish(uuid, GoalEvent::Canceled, result)
    }

    /// Publishes a feedback sample for an in-flight goal.
    pub fn publish_feedback(&self, uuid: &GoalUuid, feedback: A::Feedback) -> Result<()> {
        self.core.lock().feedback(uuid, feedback)
    }

    /// Current status of a goal, if its slot is still live.
    pub fn goal_status(&self, uuid: &GoalUuid) -> Option<GoalStatus> {
        let core = self.core.lock();
        let index = core.pool.find(|goal| goal.uuid == *uuid)?;
        core.pool.get(index).map(|goal| goal.status)
    }

    /// Number of free goal slots.
    pub fn free_goals(&self) -> usize {
        self.core.lock().pool.free_count()
    }

    pub(crate) fn endpoint_addr(&self) -> usize {
        Arc::as_ptr(&self.endpoint) as *const () as usize
    }

    pub(crate) fn entry(&self, callbacks: ServerCallbacks<A>) -> ServerEntry<A> {
        ServerEntry {
            endpoint: self.endpoint.clone(),
            core: self.core.clone(),
            callbacks,
            readiness: ActionServerReadiness::default(),
        }
    }
}

enum ServerEvent<A: ActionTypes> {
    Goal {
        index: usize,
        header: RequestHeader,
        request: SendGoalRequest<A::Goal>,
    },
    Cancel {
        index: usize,
        header: RequestHeader,
        info: GoalInfo,
    },
}

pub(crate) struct ServerEntry<A: ActionTypes> {
    endpoint: Arc<dyn ActionServerEndpoint<A>>,
    core: Arc<Mutex<ServerCore<A>>>,
    callbacks: ServerCallbacks<A>,
    readiness: ActionServerReadiness,
}

impl<A: ActionTypes> ServerEntry<A> {
    /// Pops one pending decision, clearing its flag under the lock.
    fn next_event(core: &mut ServerCore<A>) -> Option<ServerEvent<A>> {
        let mut cursor = core.pool.used_head();
        while let Some(index) = cursor {
            cursor = core.pool.next_used(index);
            let Some(goal) = core.pool.get_mut(index) else {
                continue;
            };

            if goal.pending_goal {
                goal.pending_goal = false;
                if let Some(header) = goal.goal_header.take()
                    && let Some(request) = goal.request.clone()
                {
                    return Some(ServerEvent::Goal {
                        index,
                        header,
                        request,
                    });
                }
            }
            if goal.pending_cancel {
                goal.pending_cancel = false;
                if let Some(header) = goal.cancel_header.take() {
                    return Some(ServerEvent::Cancel {
                        index,
                        header,
                        info: GoalInfo {
                            goal_id: goal.uuid,
                            stamp_nanos: 0,
                        },
                    });
                }
            }
        }
        None
    }
}

impl<A: ActionTypes> ActionWork for ServerEntry<A> {
    fn kind(&self) -> HandleKind {
        HandleKind::ActionServer
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

        if self.readiness.goal_request {
            self.readiness.goal_request = false;
            if let Some((header, request)) = self.endpoint.try_take_goal_request()? {
                if core.pool.free_count() == 0 {
                    warn!("goal pool exhausted; rejecting goal");
                    if let Err(e) = self.endpoint.send_goal_response(
                        &header,
                        &SendGoalResponse {
                            accepted: false,
                            stamp_nanos: 0,
                        },
                    ) {
                        warn!("failed to send goal rejection: {e}");
                    }
                } else {
                    let _ = core.pool.acquire(ServerGoal {
                        uuid: request.goal_id,
                        request: Some(request),
                        goal_header: Some(header),
                        cancel_header: None,
                        result_header: None,
                        status: GoalStatus::Unknown,
                        pending_goal: true,
                        pending_cancel: false,
                        ended: false,
                        result: None,
                    });
                }
            }
        }

        if self.readiness.cancel_request {
            self.readiness.cancel_request = false;
            if let Some((header, request)) = self.endpoint.try_take_cancel_request()? {
                let uuid = request.goal_info.goal_id;
                // Immediate rejections are courtesy replies and never
                // abort the cycle.
                match core.pool.find(|goal| goal.uuid == uuid) {
                    None => {
                        if let Err(e) = self.endpoint.send_cancel_response(
                            &header,
                            &CancelResponse::rejected(CancelCode::UnknownGoal),
                        ) {
                            warn!("failed to send cancel rejection: {e}");
                        }
                    }
                    Some(index) => {
                        if let Some(goal) = core.pool.get_mut(index) {
                            match transition(goal.status, GoalEvent::CancelGoal) {
                                Some(next) => {
                                    goal.status = next;
                                    goal.cancel_header = Some(header);
                                    goal.pending_cancel = true;
                                }
                                None => {
                                    let code = if goal.status.is_terminal() {
                                        CancelCode::GoalTerminated
                                    } else {
                                        CancelCode::Rejected
                                    };
                                    if let Err(e) = self.endpoint.send_cancel_response(
                                        &header,
                                        &CancelResponse::rejected(code),
                                    ) {
                                        warn!("failed to send cancel rejection: {e}");
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        if self.readiness.result_request {
            self.readiness.result_request = false;
            if let Some((header, request)) = self.endpoint.try_take_result_request()? {
                match core.pool.find(|goal| goal.uuid == request.goal_id) {
                    None => debug!("result request for an unknown goal"),
                    Some(index) => {
                        let mut publish = false;
                        if let Some(goal) = core.pool.get_mut(index) {
                            if goal.ended {
                                if let Some(result) = goal.result.take() {
                                    self.endpoint.send_result_response(&header, &result)?;
                                }
                            } else {
                                goal.result_header = Some(header);
                                if let Some(next) = transition(goal.status, GoalEvent::Execute) {
                                    goal.status = next;
                                    publish = true;
                                }
                            }
                        }
                        if publish {
                            core.publish_status()?;
                        }
                    }
                }
            }
        }

        // Goal expiry is reported by the readiness snapshot but the
        // reference middleware never raises it.
        // TODO: reap expired goals once the middleware grows an expiry clock.
        self.readiness.goal_expired = false;

        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        let mut publish = false;

        loop {
            let event = Self::next_event(&mut self.core.lock());
            match event {
                Some(ServerEvent::Goal {
                    index,
                    header,
                    request,
                }) => {
                    let accepted = (self.callbacks.on_goal)(&request);
                    if accepted {
                        if let Some(goal) = self.core.lock().pool.get_mut(index) {
                            goal.status = GoalStatus::Accepted;
                        }
                        self.endpoint.send_goal_response(
                            &header,
                            &SendGoalResponse {
                                accepted: true,
                                stamp_nanos: 0,
                            },
                        )?;
                        publish = true;
                    } else {
                        self.endpoint.send_goal_response(
                            &header,
                            &SendGoalResponse {
                                accepted: false,
                                stamp_nanos: 0,
                            },
                        )?;
                        let _ = self.core.lock().pool.release(index);
                    }
                }
                Some(ServerEvent::Cancel {
                    index,
                    header,
                    info,
                }) => {
                    let accepted = (self.callbacks.on_cancel)(&info);
                    if accepted {
                        self.endpoint.send_cancel_response(
                            &header,
                            &CancelResponse {
                                return_code: CancelCode::None,
                                goals_canceling: vec![info],
                            },
                        )?;
                        publish = true;
                    } else {
                        if let Some(goal) = self.core.lock().pool.get_mut(index) {
                            goal.status = GoalStatus::Executing;
                        }
                        self.endpoint.send_cancel_response(
                            &header,
                            &CancelResponse::rejected(CancelCode::Rejected),
                        )?;
                    }
                }
                None => break,
            }
        }

        // Release slots whose goal has ended and whose result has been
        // delivered.
        {
            let mut core = self.core.lock();
            let mut cursor = core.pool.used_head();
            while let Some(index) = cursor {
                cursor = core.pool.next_used(index);
                let release = core
                    .pool
                    .get(index)
                    .is_some_and(|goal| goal.ended && goal.result.is_none());
                if release {
                    let _ = core.pool.release(index);
                }
            }
        }

        if publish {
            self.core.lock().publish_status()?;
        }
        Ok(())
    }
}
