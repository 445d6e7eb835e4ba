//! Middleware context: validity plus the topic and service registry.

use crate::{
    action::{ActionClient, ActionServer},
    guard::GuardCondition,
    service::{Client, Server, ServiceHub},
    timer::Timer,
    topic::{Publisher, Subscription, TopicHub},
};
use embros_core::{
    ActionTypes, CancelRequest, CancelResponse, ContextHandle, Error, FeedbackMessage,
    GoalStatusArray, Result, ResultRequest, ResultResponse, SendGoalRequest, SendGoalResponse,
};
use parking_lot::Mutex;
use std::{
    any::Any,
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

#[derive(Default)]
struct Registry {
    topics: HashMap<String, Box<dyn Any + Send>>,
    services: HashMap<String, Box<dyn Any + Send>>,
}

/// Owner of every in-process endpoint. All endpoint constructors live
/// here; executors only borrow the context to observe validity.
pub struct Context {
    valid: AtomicBool,
    registry: Mutex<Registry>,
    next_client_id: AtomicU64,
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            valid: AtomicBool::new(true),
            registry: Mutex::new(Registry::default()),
            next_client_id: AtomicU64::new(1),
        })
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.valid.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::ContextInvalid)
        }
    }

    fn topic_hub<T: Send + 'static>(&self, topic: &str) -> Result<Arc<Mutex<TopicHub<T>>>> {
        if topic.is_empty() {
            return Err(Error::InvalidArgument("topic name must not be empty"));
        }
        let mut registry = self.registry.lock();
        match registry.topics.get(topic) {
            Some(existing) => existing
                .downcast_ref::<Arc<Mutex<TopicHub<T>>>>()
                .cloned()
                .ok_or(Error::InvalidArgument(
                    "topic already exists with a different message type",
                )),
            None => {
                let hub = Arc::new(Mutex::new(TopicHub::new()));
                registry
                    .topics
                    .insert(topic.to_string(), Box::new(hub.clone()));
                Ok(hub)
            }
        }
    }

    fn service_hub<Req, Res>(&self, name: &str) -> Result<Arc<Mutex<ServiceHub<Req, Res>>>>
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        if name.is_empty() {
            return Err(Error::InvalidArgument("service name must not be empty"));
        }
        let mut registry = self.registry.lock();
        match registry.services.get(name) {
            Some(existing) => existing
                .downcast_ref::<Arc<Mutex<ServiceHub<Req, Res>>>>()
                .cloned()
                .ok_or(Error::InvalidArgument(
                    "service already exists with different message types",
                )),
            None => {
                let hub = Arc::new(Mutex::new(ServiceHub::new()));
                registry
                    .services
                    .insert(name.to_string(), Box::new(hub.clone()));
                Ok(hub)
            }
        }
    }

    pub fn create_publisher<T: Clone + Send + 'static>(
        &self,
        topic: &str,
    ) -> Result<Publisher<T>> {
        self.ensure_valid()?;
        Ok(Publisher {
            hub: self.topic_hub::<T>(topic)?,
        })
    }

    pub fn create_subscription<T: Send + 'static>(
        &self,
        topic: &str,
    ) -> Result<Arc<Subscription<T>>> {
        self.ensure_valid()?;
        Ok(self.topic_hub::<T>(topic)?.lock().subscribe())
    }

    pub fn create_service<Req, Res>(&self, name: &str) -> Result<Arc<Server<Req, Res>>>
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        self.ensure_valid()?;
        Ok(ServiceHub::bind_server(&self.service_hub(name)?))
    }

    pub fn create_client<Req, Res>(&self, name: &str) -> Result<Arc<Client<Req, Res>>>
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        self.ensure_valid()?;
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        Ok(ServiceHub::bind_client(&self.service_hub(name)?, client_id))
    }

    pub fn create_timer(
        &self,
        period: Duration,
        callback: Box<dyn FnMut() + Send>,
    ) -> Result<Arc<Timer>> {
        self.ensure_valid()?;
        Timer::new(period, callback)
    }

    pub fn create_guard_condition(&self) -> Result<Arc<GuardCondition>> {
        self.ensure_valid()?;
        Ok(GuardCondition::new())
    }

    pub fn create_action_client<A: ActionTypes>(&self, name: &str) -> Result<Arc<ActionClient<A>>> {
        self.ensure_valid()?;
        Ok(ActionClient::new(
            self.create_client::<SendGoalRequest<A::Goal>, SendGoalResponse>(&format!(
                "{name}/_action/send_goal"
            ))?,
            self.create_client::<CancelRequest, CancelResponse>(&format!(
                "{name}/_action/cancel_goal"
            ))?,
            self.create_client::<ResultRequest, ResultResponse<A::Result>>(&format!(
                "{name}/_action/get_result"
            ))?,
            self.create_subscription::<FeedbackMessage<A::Feedback>>(&format!(
                "{name}/_action/feedback"
            ))?,
            self.create_subscription::<GoalStatusArray>(&format!("{name}/_action/status"))?,
        ))
    }

    pub fn create_action_server<A: ActionTypes>(&self, name: &str) -> Result<Arc<ActionServer<A>>> {
        self.ensure_valid()?;
        Ok(ActionServer::new(
            self.create_service::<SendGoalRequest<A::Goal>, SendGoalResponse>(&format!(
                "{name}/_action/send_goal"
            ))?,
            self.create_service::<CancelRequest, CancelResponse>(&format!(
                "{name}/_action/cancel_goal"
            ))?,
            self.create_service::<ResultRequest, ResultResponse<A::Result>>(&format!(
                "{name}/_action/get_result"
            ))?,
            self.create_publisher::<FeedbackMessage<A::Feedback>>(&format!(
                "{name}/_action/feedback"
            ))?,
            self.create_publisher::<GoalStatusArray>(&format!("{name}/_action/status"))?,
        ))
    }
}

impl ContextHandle for Context {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embros_core::Subscribe;

    #[test]
    fn test_shutdown_invalidates() {
        let context = Context::new();
        assert!(context.is_valid());
        context.shutdown();
        assert!(!context.is_valid());
        assert!(context.create_publisher::<u32>("chatter").is_err());
    }

    #[test]
    fn test_topic_type_mismatch() {
        let context = Context::new();
        let _publisher = context.create_publisher::<u32>("chatter").unwrap();
        let result = context.create_subscription::<String>("chatter");
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_pub_sub_through_registry() {
        let context = Context::new();
        let subscription = context.create_subscription::<String>("chatter").unwrap();
        let publisher = context.create_publisher::<String>("chatter").unwrap();

        publisher.publish(&"hello".to_string()).unwrap();
        assert_eq!(
            subscription.try_take().unwrap().as_deref(),
            Some("hello")
        );
    }
}
