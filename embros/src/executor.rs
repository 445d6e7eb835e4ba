//! The executor: registration, readiness collection, and dispatch.
//!
//! One executor owns one handle table and one wait-set and is driven by
//! one thread. Each cycle collects readiness through the wait-set,
//! evaluates the trigger, and then takes and executes per the selected
//! data-communication semantics. All allocation happens at configuration
//! time; the spin loops themselves never touch the allocator.

use crate::{
    action::{
        client::{Client, ClientCallbacks},
        server::{Server, ServerCallbacks},
    },
    handle::{
        ClientDispatch, Entry, GuardConditionEntry, Handle, HandleKind, Invocation,
        ServiceDispatch, SubscriptionDispatch, TypedClient, TypedService, TypedSubscription,
    },
    table::HandleTable,
    trigger::{Trigger, TriggerView, endpoint_addr, trigger_any},
};
use embros_core::{
    ActionTypes, ClientEndpoint, ContextHandle, Error, RawGuardCondition, RawTimer, RequestHeader,
    Result, ServiceEndpoint, Subscribe, WaitSet, Waitable,
};
use std::{
    any::Any,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

/// Wait timeout used by `spin` until overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Data-communication semantics of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantics {
    /// Take-then-execute per handle, interleaved: a later handle's
    /// execution observes outputs published earlier in the same cycle.
    RclcppLike,

    /// Logical execution time: all takes complete before any callback
    /// runs, so every callback of a cycle sees the same input set.
    Let,
}

/// Deterministic, statically sized callback executor.
///
/// # Example
///
/// ```
/// use embros::{Executor, Invocation};
/// use embros_mem::Context;
/// use std::time::Duration;
///
/// let ctx = Context::new();
/// let subscription = ctx.create_subscription::<String>("chatter").unwrap();
/// let publisher = ctx.create_publisher::<String>("chatter").unwrap();
///
/// let mut executor = Executor::new(ctx.clone(), 4).unwrap();
/// executor
///     .add_subscription(
///         &subscription,
///         |msg: Option<&String>| {
///             if let Some(msg) = msg {
///                 println!("received: {msg}");
///             }
///         },
///         Invocation::OnNewData,
///     )
///     .unwrap();
///
/// publisher.publish(&"hello".to_string()).unwrap();
/// let fired = executor.spin_some(Duration::from_millis(100)).unwrap();
/// assert!(fired);
/// ```
pub struct Executor {
    context: Arc<dyn ContextHandle>,
    table: Option<HandleTable>,
    wait_set: Option<WaitSet>,
    timeout: Duration,
    semantics: Semantics,
    trigger: Trigger,
    invocation_time: Option<Instant>,
}

impl Executor {
    /// Creates an executor with room for `capacity` handles. The handle
    /// table is the executor's single allocation.
    pub fn new(context: Arc<dyn ContextHandle>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument("capacity must be non-zero"));
        }
        Ok(Self {
            context,
            table: Some(HandleTable::with_capacity(capacity)),
            wait_set: None,
            timeout: DEFAULT_TIMEOUT,
            semantics: Semantics::RclcppLike,
            trigger: trigger_any(),
            invocation_time: None,
        })
    }

    /// Sets the wait timeout used by `spin`, `spin_one_period`, and
    /// `spin_period`.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_semantics(&mut self, semantics: Semantics) {
        self.semantics = semantics;
    }

    pub fn semantics(&self) -> Semantics {
        self.semantics
    }

    /// Replaces the trigger predicate. The default is
    /// [`trigger_any`](crate::trigger::trigger_any).
    pub fn set_trigger(&mut self, trigger: Trigger) {
        self.trigger = trigger;
    }

    /// Anchor of the periodic spin phase; advanced by exactly one period
    /// per `spin_one_period` call.
    pub fn invocation_time(&self) -> Option<Instant> {
        self.invocation_time
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.table.as_ref().map(HandleTable::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle capacity fixed at construction.
    pub fn capacity(&self) -> usize {
        self.table.as_ref().map(HandleTable::capacity).unwrap_or(0)
    }

    /// Releases the handle table and wait-set. Idempotent: finalizing an
    /// already-finalized executor is a no-op success.
    pub fn fini(&mut self) -> Result<()> {
        self.table = None;
        self.wait_set = None;
        Ok(())
    }

    fn table_mut(&mut self) -> Result<&mut HandleTable> {
        self.table.as_mut().ok_or(Error::Uninitialized)
    }

    fn push(&mut self, entry: Entry, invocation: Invocation) -> Result<()> {
        self.table_mut()?.push(Handle::new(entry, invocation))?;
        // Structural mutation: the wait-set is rebuilt on the next spin.
        self.wait_set = None;
        Ok(())
    }

    fn remove_where(
        &mut self,
        addr: usize,
        matches_kind: impl Fn(HandleKind) -> bool,
    ) -> Result<()> {
        self.table_mut()?.remove_where(addr, matches_kind)?;
        self.wait_set = None;
        Ok(())
    }

    /// Registers a subscription. The callback receives `None` when the
    /// invocation policy is `Always` and no message was taken.
    pub fn add_subscription<T, S>(
        &mut self,
        subscription: &Arc<S>,
        callback: impl FnMut(Option<&T>) + Send + 'static,
        invocation: Invocation,
    ) -> Result<()>
    where
        T: Send + 'static,
        S: Subscribe<T> + 'static,
    {
        let endpoint: Arc<dyn Subscribe<T>> = subscription.clone();
        let waitable: Arc<dyn Waitable> = subscription.clone();
        self.push(
            Entry::Subscription(Box::new(TypedSubscription {
                endpoint,
                waitable,
                buffer: None,
                dispatch: SubscriptionDispatch::Plain(Box::new(callback)),
            })),
            invocation,
        )
    }

    /// Registers a subscription whose callback receives a caller-owned
    /// context value alongside each message.
    pub fn add_subscription_with_context<T, S, C>(
        &mut self,
        subscription: &Arc<S>,
        mut callback: impl FnMut(Option<&T>, &mut C) + Send + 'static,
        context: C,
        invocation: Invocation,
    ) -> Result<()>
    where
        T: Send + 'static,
        S: Subscribe<T> + 'static,
        C: Send + 'static,
    {
        let endpoint: Arc<dyn Subscribe<T>> = subscription.clone();
        let waitable: Arc<dyn Waitable> = subscription.clone();
        let adapter = move |message: Option<&T>, erased: &mut (dyn Any + Send)| {
            if let Some(context) = erased.downcast_mut::<C>() {
                callback(message, context);
            }
        };
        self.push(
            Entry::Subscription(Box::new(TypedSubscription {
                endpoint,
                waitable,
                buffer: None,
                dispatch: SubscriptionDispatch::WithContext {
                    callback: Box::new(adapter),
                    context: Box::new(context),
                },
            })),
            invocation,
        )
    }

    pub fn remove_subscription<T, S>(&mut self, subscription: &Arc<S>) -> Result<()>
    where
        T: Send + 'static,
        S: Subscribe<T> + 'static,
    {
        self.remove_where(endpoint_addr(subscription), |kind| {
            matches!(
                kind,
                HandleKind::Subscription | HandleKind::SubscriptionWithContext
            )
        })
    }

    /// Registers a timer. The timer's own callback fires through the
    /// middleware's call operation when the timer becomes ready.
    pub fn add_timer<T: RawTimer + 'static>(&mut self, timer: &Arc<T>) -> Result<()> {
        let timer: Arc<dyn RawTimer> = timer.clone();
        self.push(Entry::Timer(timer), Invocation::OnNewData)
    }

    pub fn remove_timer<T: RawTimer + 'static>(&mut self, timer: &Arc<T>) -> Result<()> {
        self.remove_where(endpoint_addr(timer), |kind| kind == HandleKind::Timer)
    }

    /// Registers a service client; the callback receives each response.
    pub fn add_client<Req, Res, C>(
        &mut self,
        client: &Arc<C>,
        callback: impl FnMut(&Res) + Send + 'static,
    ) -> Result<()>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        C: ClientEndpoint<Req, Res> + 'static,
    {
        let endpoint: Arc<dyn ClientEndpoint<Req, Res>> = client.clone();
        let waitable: Arc<dyn Waitable> = client.clone();
        self.push(
            Entry::Client(Box::new(TypedClient {
                endpoint,
                waitable,
                buffer: None,
                dispatch: ClientDispatch::Plain(Box::new(callback)),
            })),
            Invocation::OnNewData,
        )
    }

    /// Registers a service client; the callback also receives the
    /// sequence number of the request the response answers.
    pub fn add_client_with_request_id<Req, Res, C>(
        &mut self,
        client: &Arc<C>,
        callback: impl FnMut(&Res, i64) + Send + 'static,
    ) -> Result<()>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        C: ClientEndpoint<Req, Res> + 'static,
    {
        let endpoint: Arc<dyn ClientEndpoint<Req, Res>> = client.clone();
        let waitable: Arc<dyn Waitable> = client.clone();
        self.push(
            Entry::Client(Box::new(TypedClient {
                endpoint,
                waitable,
                buffer: None,
                dispatch: ClientDispatch::WithRequestId(Box::new(callback)),
            })),
            Invocation::OnNewData,
        )
    }

    pub fn remove_client<Req, Res, C>(&mut self, client: &Arc<C>) -> Result<()>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        C: ClientEndpoint<Req, Res> + 'static,
    {
        self.remove_where(endpoint_addr(client), |kind| {
            matches!(kind, HandleKind::Client | HandleKind::ClientWithRequestId)
        })
    }

    /// Registers a service; the callback's return value is sent back as
    /// the response.
    pub fn add_service<Req, Res, S>(
        &mut self,
        service: &Arc<S>,
        callback: impl FnMut(&Req) -> Res + Send + 'static,
    ) -> Result<()>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        S: ServiceEndpoint<Req, Res> + 'static,
    {
        let endpoint: Arc<dyn ServiceEndpoint<Req, Res>> = service.clone();
        let waitable: Arc<dyn Waitable> = service.clone();
        self.push(
            Entry::Service(Box::new(TypedService {
                endpoint,
                waitable,
                buffer: None,
                dispatch: ServiceDispatch::Plain(Box::new(callback)),
            })),
            Invocation::OnNewData,
        )
    }

    pub fn add_service_with_request_id<Req, Res, S>(
        &mut self,
        service: &Arc<S>,
        callback: impl FnMut(&Req, &RequestHeader) -> Res + Send + 'static,
    ) -> Result<()>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        S: ServiceEndpoint<Req, Res> + 'static,
    {
        let endpoint: Arc<dyn ServiceEndpoint<Req, Res>> = service.clone();
        let waitable: Arc<dyn Waitable> = service.clone();
        self.push(
            Entry::Service(Box::new(TypedService {
                endpoint,
                waitable,
                buffer: None,
                dispatch: ServiceDispatch::WithRequestId(Box::new(callback)),
            })),
            Invocation::OnNewData,
        )
    }

    pub fn add_service_with_context<Req, Res, S, C>(
        &mut self,
        service: &Arc<S>,
        mut callback: impl FnMut(&Req, &mut C) -> Res + Send + 'static,
        context: C,
    ) -> Result<()>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        S: ServiceEndpoint<Req, Res> + 'static,
        C: Send + 'static,
    {
        let endpoint: Arc<dyn ServiceEndpoint<Req, Res>> = service.clone();
        let waitable: Arc<dyn Waitable> = service.clone();
        let adapter = move |request: &Req, erased: &mut (dyn Any + Send)| -> Res {
            match erased.downcast_mut::<C>() {
                Some(context) => callback(request, context),
                // Unreachable: the context is boxed together with this
                // adapter below.
                None => unreachable!("callback context type mismatch"),
            }
        };
        self.push(
            Entry::Service(Box::new(TypedService {
                endpoint,
                waitable,
                buffer: None,
                dispatch: ServiceDispatch::WithContext {
                    callback: Box::new(adapter),
                    context: Box::new(context),
                },
            })),
            Invocation::OnNewData,
        )
    }

    pub fn remove_service<Req, Res, S>(&mut self, service: &Arc<S>) -> Result<()>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        S: ServiceEndpoint<Req, Res> + 'static,
    {
        self.remove_where(endpoint_addr(service), |kind| {
            matches!(
                kind,
                HandleKind::Service
                    | HandleKind::ServiceWithRequestId
                    | HandleKind::ServiceWithContext
            )
        })
    }

    /// Registers a guard condition with the callback to run when it is
    /// triggered.
    pub fn add_guard_condition<G: RawGuardCondition + 'static>(
        &mut self,
        guard_condition: &Arc<G>,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<()> {
        let endpoint: Arc<dyn RawGuardCondition> = guard_condition.clone();
        let waitable: Arc<dyn Waitable> = guard_condition.clone();
        self.push(
            Entry::GuardCondition(GuardConditionEntry {
                endpoint,
                waitable,
                callback: Box::new(callback),
            }),
            Invocation::OnNewData,
        )
    }

    pub fn remove_guard_condition<G: RawGuardCondition + 'static>(
        &mut self,
        guard_condition: &Arc<G>,
    ) -> Result<()> {
        self.remove_where(endpoint_addr(guard_condition), |kind| {
            kind == HandleKind::GuardCondition
        })
    }

    /// Registers an action client. Goal, feedback, cancel, and result
    /// traffic for goals issued through `client` is dispatched to
    /// `callbacks`.
    pub fn add_action_client<A: ActionTypes>(
        &mut self,
        client: &Client<A>,
        callbacks: ClientCallbacks<A>,
    ) -> Result<()> {
        self.push(
            Entry::ActionClient(Box::new(client.entry(callbacks))),
            Invocation::OnNewData,
        )
    }

    pub fn remove_action_client<A: ActionTypes>(&mut self, client: &Client<A>) -> Result<()> {
        self.remove_where(client.endpoint_addr(), |kind| {
            kind == HandleKind::ActionClient
        })
    }

    /// Registers an action server with its goal and cancel decision
    /// callbacks.
    pub fn add_action_server<A: ActionTypes>(
        &mut self,
        server: &Server<A>,
        callbacks: ServerCallbacks<A>,
    ) -> Result<()> {
        self.push(
            Entry::ActionServer(Box::new(server.entry(callbacks))),
            Invocation::OnNewData,
        )
    }

    pub fn remove_action_server<A: ActionTypes>(&mut self, server: &Server<A>) -> Result<()> {
        self.remove_where(server.endpoint_addr(), |kind| {
            kind == HandleKind::ActionServer
        })
    }

    /// Ensures a wait-set sized to the current per-kind counters exists.
    /// Registration and removal invalidate it; the rebuild is deferred to
    /// here so a batch of registrations costs one allocation.
    pub fn prepare(&mut self) -> Result<()> {
        let table = self.table.as_ref().ok_or(Error::Uninitialized)?;
        if self.wait_set.is_none() {
            self.wait_set = Some(WaitSet::new(&table.counters()));
        }
        Ok(())
    }

    /// Runs one cycle: collect readiness with `timeout`, evaluate the
    /// trigger, then take and execute per the configured semantics.
    ///
    /// Returns `Ok(false)` when the wait timed out (no callbacks ran) and
    /// `Ok(true)` otherwise. Non-fatal conditions (take failed, timer
    /// canceled) never abort the cycle; any other middleware failure
    /// returns immediately, leaving the remaining handles for the next
    /// cycle.
    pub fn spin_some(&mut self, timeout: Duration) -> Result<bool> {
        self.prepare()?;
        let table = self.table.as_mut().ok_or(Error::Uninitialized)?;
        let wait_set = self.wait_set.as_mut().ok_or(Error::Uninitialized)?;

        // Collection: rebuild the wait-set contents in insertion order,
        // capturing each handle's slot index.
        wait_set.clear();
        for handle in table.iter_mut() {
            handle.index = None;
            handle.data_available = false;
            handle.taken = false;
            match &mut handle.entry {
                Entry::Subscription(work) => {
                    handle.index = Some(wait_set.add_subscription(work.waitable())?);
                }
                Entry::Timer(timer) => {
                    handle.index = Some(wait_set.add_timer(timer.clone())?);
                }
                Entry::Client(work) => {
                    handle.index = Some(wait_set.add_client(work.waitable())?);
                }
                Entry::Service(work) => {
                    handle.index = Some(wait_set.add_service(work.waitable())?);
                }
                Entry::GuardCondition(entry) => {
                    handle.index = Some(wait_set.add_guard_condition(entry.waitable.clone())?);
                }
                Entry::ActionClient(work) | Entry::ActionServer(work) => {
                    work.register(wait_set)?;
                }
            }
        }

        if !wait_set.wait(timeout)? {
            return Ok(false);
        }

        // Refresh readiness flags from the wait-set.
        for handle in table.iter_mut() {
            handle.data_available = match (&mut handle.entry, handle.index) {
                (Entry::ActionClient(work) | Entry::ActionServer(work), _) => {
                    work.refresh(wait_set)
                }
                (entry, Some(index)) => entry
                    .wait_kind()
                    .map(|kind| wait_set.is_ready(kind, index))
                    .unwrap_or(false),
                (_, None) => false,
            };
        }

        if !(self.trigger)(TriggerView {
            handles: table.handles(),
        }) {
            return Ok(true);
        }

        match self.semantics {
            Semantics::RclcppLike => {
                for handle in table.iter_mut() {
                    take_handle(handle)?;
                    execute_handle(handle)?;
                }
            }
            Semantics::Let => {
                for handle in table.iter_mut() {
                    take_handle(handle)?;
                }
                for handle in table.iter_mut() {
                    execute_handle(handle)?;
                }
            }
        }

        Ok(true)
    }

    /// Spins until the context becomes invalid. Timeouts continue the
    /// loop; any error exits with it.
    pub fn spin(&mut self) -> Result<()> {
        while self.context.is_valid() {
            self.spin_some(self.timeout)?;
        }
        Ok(())
    }

    /// Runs one cycle, then sleeps so the cycle's total duration equals
    /// `period`. The phase anchor is seeded on the first call and
    /// advances by exactly one period per call, so jitter in one cycle
    /// never shifts subsequent ones. An overrunning cycle skips the
    /// sleep.
    pub fn spin_one_period(&mut self, period: Duration) -> Result<bool> {
        let anchor = *self.invocation_time.get_or_insert_with(Instant::now);
        let fired = self.spin_some(self.timeout)?;

        let next = anchor + period;
        self.invocation_time = Some(next);
        if let Some(remaining) = next.checked_duration_since(Instant::now()) {
            thread::sleep(remaining);
        } else {
            debug!("cycle overran its period; skipping sleep");
        }
        Ok(fired)
    }

    /// Spins with a fixed period until the context becomes invalid.
    pub fn spin_period(&mut self, period: Duration) -> Result<()> {
        while self.context.is_valid() {
            self.spin_one_period(period)?;
        }
        Ok(())
    }
}

/// Drains at most one payload into the handle's buffer. A failed take
/// clears `data_available` and the cycle continues.
fn take_handle(handle: &mut Handle) -> Result<()> {
    if !handle.data_available {
        return Ok(());
    }
    match &mut handle.entry {
        Entry::Subscription(work) => {
            handle.taken = work.take()?;
            if !handle.taken {
                handle.data_available = false;
            }
        }
        Entry::Client(work) => {
            handle.taken = work.take()?;
            if !handle.taken {
                handle.data_available = false;
            }
        }
        Entry::Service(work) => {
            handle.taken = work.take()?;
            if !handle.taken {
                handle.data_available = false;
            }
        }
        // Readiness is authoritative; there is nothing to drain.
        Entry::Timer(_) | Entry::GuardCondition(_) => handle.taken = true,
        Entry::ActionClient(work) | Entry::ActionServer(work) => work.take()?,
    }
    Ok(())
}

/// Invokes the handle's callback per its invocation policy. Per-goal
/// flags make action dispatch self-gating.
fn execute_handle(handle: &mut Handle) -> Result<()> {
    if let Entry::ActionClient(work) | Entry::ActionServer(work) = &mut handle.entry {
        return work.execute();
    }

    let fire = handle.invocation == Invocation::Always || handle.taken;
    if !fire {
        return Ok(());
    }
    let new_data = handle.taken;
    handle.taken = false;

    match &mut handle.entry {
        Entry::Subscription(work) => work.execute(new_data)?,
        Entry::Client(work) => work.execute()?,
        Entry::Service(work) => work.execute()?,
        Entry::Timer(timer) => match timer.call() {
            Err(Error::TimerCanceled) => debug!("timer canceled; skipping"),
            other => other?,
        },
        Entry::GuardCondition(entry) => (entry.callback)(),
        Entry::ActionClient(_) | Entry::ActionServer(_) => {}
    }
    Ok(())
}
