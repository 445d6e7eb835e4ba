//! Action endpoints composed from the service and topic primitives.
//!
//! An action named `n` occupies five sub-entities: the `n/_action/send_goal`,
//! `n/_action/cancel_goal`, and `n/_action/get_result` services, plus the
//! `n/_action/feedback` and `n/_action/status` topics. Wait-set sizing and
//! readiness are reported per sub-entity.

use crate::{
    service::{Client, Server},
    topic::{Publisher, Subscription},
};
use embros_core::{
    ActionClientEndpoint, ActionClientReadiness, ActionServerEndpoint, ActionServerReadiness,
    ActionTypes, CancelRequest, CancelResponse, ClientEndpoint, EntityCounters, FeedbackMessage,
    GoalStatusArray, RequestHeader, Result, ResultRequest, ResultResponse, SendGoalRequest,
    SendGoalResponse, ServiceEndpoint, Subscribe, WaitKind, WaitSet, Waitable,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default, Clone, Copy)]
struct ClientIndices {
    goal: usize,
    cancel: usize,
    result: usize,
    feedback: usize,
    status: usize,
}

/// Client-side transport of one action.
pub struct ActionClient<A: ActionTypes> {
    pub(crate) goal: Arc<Client<SendGoalRequest<A::Goal>, SendGoalResponse>>,
    pub(crate) cancel: Arc<Client<CancelRequest, CancelResponse>>,
    pub(crate) result: Arc<Client<ResultRequest, ResultResponse<A::Result>>>,
    pub(crate) feedback: Arc<Subscription<FeedbackMessage<A::Feedback>>>,
    pub(crate) status: Arc<Subscription<GoalStatusArray>>,
    indices: Mutex<Option<ClientIndices>>,
}

impl<A: ActionTypes> ActionClient<A> {
    pub(crate) fn new(
        goal: Arc<Client<SendGoalRequest<A::Goal>, SendGoalResponse>>,
        cancel: Arc<Client<CancelRequest, CancelResponse>>,
        result: Arc<Client<ResultRequest, ResultResponse<A::Result>>>,
        feedback: Arc<Subscription<FeedbackMessage<A::Feedback>>>,
        status: Arc<Subscription<GoalStatusArray>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            goal,
            cancel,
            result,
            feedback,
            status,
            indices: Mutex::new(None),
        })
    }
}

impl<A: ActionTypes> ActionClientEndpoint<A> for ActionClient<A> {
    fn wait_set_entities(&self) -> EntityCounters {
        EntityCounters {
            subscriptions: 2,
            clients: 3,
            ..Default::default()
        }
    }

    fn register(&self, wait_set: &mut WaitSet) -> Result<()> {
        let indices = ClientIndices {
            goal: wait_set.add_client(self.goal.clone() as Arc<dyn Waitable>)?,
            cancel: wait_set.add_client(self.cancel.clone() as Arc<dyn Waitable>)?,
            result: wait_set.add_client(self.result.clone() as Arc<dyn Waitable>)?,
            feedback: wait_set.add_subscription(self.feedback.clone() as Arc<dyn Waitable>)?,
            status: wait_set.add_subscription(self.status.clone() as Arc<dyn Waitable>)?,
        };
        *self.indices.lock() = Some(indices);
        Ok(())
    }

    fn readiness(&self, wait_set: &WaitSet) -> ActionClientReadiness {
        let Some(indices) = *self.indices.lock() else {
            return ActionClientReadiness::default();
        };
        ActionClientReadiness {
            goal_response: wait_set.is_ready(WaitKind::Client, indices.goal),
            cancel_response: wait_set.is_ready(WaitKind::Client, indices.cancel),
            result_response: wait_set.is_ready(WaitKind::Client, indices.result),
            feedback: wait_set.is_ready(WaitKind::Subscription, indices.feedback),
            status: wait_set.is_ready(WaitKind::Subscription, indices.status),
        }
    }

    fn send_goal_request(&self, request: &SendGoalRequest<A::Goal>) -> Result<i64> {
        self.goal.send_request(request)
    }

    fn try_take_goal_response(&self) -> Result<Option<(i64, SendGoalResponse)>> {
        self.goal.try_take_response()
    }

    fn send_cancel_request(&self, request: &CancelRequest) -> Result<i64> {
        self.cancel.send_request(request)
    }

    fn try_take_cancel_response(&self) -> Result<Option<(i64, CancelResponse)>> {
        self.cancel.try_take_response()
    }

    fn send_result_request(&self, request: &ResultRequest) -> Result<i64> {
        self.result.send_request(request)
    }

    fn try_take_result_response(&self) -> Result<Option<(i64, ResultResponse<A::Result>)>> {
        self.result.try_take_response()
    }

    fn try_take_feedback(&self) -> Result<Option<FeedbackMessage<A::Feedback>>> {
        self.feedback.try_take()
    }

    fn try_take_status(&self) -> Result<Option<GoalStatusArray>> {
        self.status.try_take()
    }
}

#[derive(Default, Clone, Copy)]
struct ServerIndices {
    goal: usize,
    cancel: usize,
    result: usize,
}

/// Server-side transport of one action.
pub struct ActionServer<A: ActionTypes> {
    pub(crate) goal: Arc<Server<SendGoalRequest<A::Goal>, SendGoalResponse>>,
    pub(crate) cancel: Arc<Server<CancelRequest, CancelResponse>>,
    pub(crate) result: Arc<Server<ResultRequest, ResultResponse<A::Result>>>,
    pub(crate) feedback: Publisher<FeedbackMessage<A::Feedback>>,
    pub(crate) status: Publisher<GoalStatusArray>,
    indices: Mutex<Option<ServerIndices>>,
}

impl<A: ActionTypes> ActionServer<A> {
    pub(crate) fn new(
        goal: Arc<Server<SendGoalRequest<A::Goal>, SendGoalResponse>>,
        cancel: Arc<Server<CancelRequest, CancelResponse>>,
        result: Arc<Server<ResultRequest, ResultResponse<A::Result>>>,
        feedback: Publisher<FeedbackMessage<A::Feedback>>,
        status: Publisher<GoalStatusArray>,
    ) -> Arc<Self> {
        Arc::new(Self {
            goal,
            cancel,
            result,
            feedback,
            status,
            indices: Mutex::new(None),
        })
    }
}

impl<A: ActionTypes> ActionServerEndpoint<A> for ActionServer<A> {
    fn wait_set_entities(&self) -> EntityCounters {
        EntityCounters {
            services: 3,
            ..Default::default()
        }
    }

    fn register(&self, wait_set: &mut WaitSet) -> Result<()> {
        let indices = ServerIndices {
            goal: wait_set.add_service(self.goal.clone() as Arc<dyn Waitable>)?,
            cancel: wait_set.add_service(self.cancel.clone() as Arc<dyn Waitable>)?,
            result: wait_set.add_service(self.result.clone() as Arc<dyn Waitable>)?,
        };
        *self.indices.lock() = Some(indices);
        Ok(())
    }

    fn readiness(&self, wait_set: &WaitSet) -> ActionServerReadiness {
        let Some(indices) = *self.indices.lock() else {
            return ActionServerReadiness::default();
        };
        ActionServerReadiness {
            goal_request: wait_set.is_ready(WaitKind::Service, indices.goal),
            cancel_request: wait_set.is_ready(WaitKind::Service, indices.cancel),
            result_request: wait_set.is_ready(WaitKind::Service, indices.result),
            goal_expired: false,
        }
    }

    fn try_take_goal_request(&self) -> Result<Option<(RequestHeader, SendGoalRequest<A::Goal>)>> {
        self.goal.try_take_request()
    }

    fn send_goal_response(
        &self,
        header: &RequestHeader,
        response: &SendGoalResponse,
    ) -> Result<()> {
        self.goal.send_response(header, response)
    }

    fn try_take_cancel_request(&self) -> Result<Option<(RequestHeader, CancelRequest)>> {
        self.cancel.try_take_request()
    }

    fn send_cancel_response(
        &self,
        header: &RequestHeader,
        response: &CancelResponse,
    ) -> Result<()> {
        self.cancel.send_response(header, response)
    }

    fn try_take_result_request(&self) -> Result<Option<(RequestHeader, ResultRequest)>> {
        self.result.try_take_request()
    }

    fn send_result_response(
        &self,
        header: &RequestHeader,
        response: &ResultResponse<A::Result>,
    ) -> Result<()> {
        self.result.send_response(header, response)
    }

    fn publish_feedback(&self, feedback: &FeedbackMessage<A::Feedback>) -> Result<()> {
        self.feedback.publish(feedback)
    }

    fn publish_status(&self, status: &GoalStatusArray) -> Result<()> {
        self.status.publish(status)
    }
}
