//! Handle records: one registered source, its callback, and its buffers.
//!
//! Each kind of source pairs its endpoint, message buffer, and callback
//! inside a typed work object; the [`Entry`] variant then fixes the kind,
//! so an endpoint can never be dispatched through the wrong callback
//! shape. Message types are erased at the work-object boundary.

use embros_core::{
    ClientEndpoint, EntityCounters, Error, RawGuardCondition, RawTimer, RequestHeader, Result,
    ServiceEndpoint, Subscribe, WaitKind, WaitSet, Waitable,
};
use std::{any::Any, sync::Arc};

/// When a handle's callback fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Only when the handle was ready and a take succeeded this cycle.
    OnNewData,

    /// Every cycle in which the executor dispatches, ready or not.
    Always,
}

/// Kind of a registered handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Subscription,
    SubscriptionWithContext,
    Timer,
    Client,
    ClientWithRequestId,
    Service,
    ServiceWithRequestId,
    ServiceWithContext,
    GuardCondition,
    ActionClient,
    ActionServer,
}

/// Type-erased callback context handed to `*WithContext` callbacks.
pub type CallbackContext = dyn Any + Send;

fn erased_addr<E: ?Sized>(endpoint: &Arc<E>) -> usize {
    Arc::as_ptr(endpoint) as *const () as usize
}

pub(crate) trait SubscriptionWork: Send {
    fn kind(&self) -> HandleKind;
    fn endpoint_addr(&self) -> usize;
    fn waitable(&self) -> Arc<dyn Waitable>;

    /// Drains one message into the buffer. `Ok(false)` when the take
    /// found nothing.
    fn take(&mut self) -> Result<bool>;

    /// Invokes the callback; `new_data` selects whether the buffered
    /// message or `None` is passed.
    fn execute(&mut self, new_data: bool) -> Result<()>;
}

pub(crate) enum SubscriptionDispatch<T> {
    Plain(Box<dyn FnMut(Option<&T>) + Send>),
    WithContext {
        callback: Box<dyn FnMut(Option<&T>, &mut CallbackContext) + Send>,
        context: Box<CallbackContext>,
    },
}

pub(crate) struct TypedSubscription<T> {
    pub(crate) endpoint: Arc<dyn Subscribe<T>>,
    pub(crate) waitable: Arc<dyn Waitable>,
    pub(crate) buffer: Option<T>,
    pub(crate) dispatch: SubscriptionDispatch<T>,
}

impl<T: Send + 'static> SubscriptionWork for TypedSubscription<T> {
    fn kind(&self) -> HandleKind {
        match self.dispatch {
            SubscriptionDispatch::Plain(_) => HandleKind::Subscription,
            SubscriptionDispatch::WithContext { .. } => HandleKind::SubscriptionWithContext,
        }
    }

    fn endpoint_addr(&self) -> usize {
        erased_addr(&self.endpoint)
    }

    fn waitable(&self) -> Arc<dyn Waitable> {
        self.waitable.clone()
    }

    fn take(&mut self) -> Result<bool> {
        match self.endpoint.try_take() {
            Ok(Some(message)) => {
                self.buffer = Some(message);
                Ok(true)
            }
            Ok(None) | Err(Error::TakeFailed) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn execute(&mut self, new_data: bool) -> Result<()> {
        let message = if new_data { self.buffer.as_ref() } else { None };
        match &mut self.dispatch {
            SubscriptionDispatch::Plain(callback) => callback(message),
            SubscriptionDispatch::WithContext { callback, context } => {
                callback(message, context.as_mut())
            }
        }
        Ok(())
    }
}

pub(crate) trait ClientWork: Send {
    fn kind(&self) -> HandleKind;
    fn endpoint_addr(&self) -> usize;
    fn waitable(&self) -> Arc<dyn Waitable>;
    fn take(&mut self) -> Result<bool>;

    /// Invokes the callback with the buffered response, consuming it.
    fn execute(&mut self) -> Result<()>;
}

pub(crate) enum ClientDispatch<Res> {
    Plain(Box<dyn FnMut(&Res) + Send>),
    WithRequestId(Box<dyn FnMut(&Res, i64) + Send>),
}

pub(crate) struct TypedClient<Req, Res> {
    pub(crate) endpoint: Arc<dyn ClientEndpoint<Req, Res>>,
    pub(crate) waitable: Arc<dyn Waitable>,
    pub(crate) buffer: Option<(i64, Res)>,
    pub(crate) dispatch: ClientDispatch<Res>,
}

impl<Req: Send + 'static, Res: Send + 'static> ClientWork for TypedClient<Req, Res> {
    fn kind(&self) -> HandleKind {
        match self.dispatch {
            ClientDispatch::Plain(_) => HandleKind::Client,
            ClientDispatch::WithRequestId(_) => HandleKind::ClientWithRequestId,
        }
    }

    fn endpoint_addr(&self) -> usize {
        erased_addr(&self.endpoint)
    }

    fn waitable(&self) -> Arc<dyn Waitable> {
        self.waitable.clone()
    }

    fn take(&mut self) -> Result<bool> {
        match self.endpoint.try_take_response() {
            Ok(Some(response)) => {
                self.buffer = Some(response);
                Ok(true)
            }
            Ok(None) | Err(Error::TakeFailed) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn execute(&mut self) -> Result<()> {
        if let Some((sequence, response)) = self.buffer.take() {
            match &mut self.dispatch {
                ClientDispatch::Plain(callback) => callback(&response),
                ClientDispatch::WithRequestId(callback) => callback(&response, sequence),
            }
        }
        Ok(())
    }
}

pub(crate) trait ServiceWork: Send {
    fn kind(&self) -> HandleKind;
    fn endpoint_addr(&self) -> usize;
    fn waitable(&self) -> Arc<dyn Waitable>;
    fn take(&mut self) -> Result<bool>;

    /// Invokes the callback on the buffered request and sends the
    /// response. A send failure is fatal for the cycle.
    fn execute(&mut self) -> Result<()>;
}

pub(crate) enum ServiceDispatch<Req, Res> {
    Plain(Box<dyn FnMut(&Req) -> Res + Send>),
    WithRequestId(Box<dyn FnMut(&Req, &RequestHeader) -> Res + Send>),
    WithContext {
        callback: Box<dyn FnMut(&Req, &mut CallbackContext) -> Res + Send>,
        context: Box<CallbackContext>,
    },
}

pub(crate) struct TypedService<Req, Res> {
    pub(crate) endpoint: Arc<dyn ServiceEndpoint<Req, Res>>,
    pub(crate) waitable: Arc<dyn Waitable>,
    pub(crate) buffer: Option<(RequestHeader, Req)>,
    pub(crate) dispatch: ServiceDispatch<Req, Res>,
}

impl<Req: Send + 'static, Res: Send + 'static> ServiceWork for TypedService<Req, Res> {
    fn kind(&self) -> HandleKind {
        match self.dispatch {
            ServiceDispatch::Plain(_) => HandleKind::Service,
            ServiceDispatch::WithRequestId(_) => HandleKind::ServiceWithRequestId,
            ServiceDispatch::WithContext { .. } => HandleKind::ServiceWithContext,
        }
    }

    fn endpoint_addr(&self) -> usize {
        erased_addr(&self.endpoint)
    }

    fn waitable(&self) -> Arc<dyn Waitable> {
        self.waitable.clone()
    }

    fn take(&mut self) -> Result<bool> {
        match self.endpoint.try_take_request() {
            Ok(Some(request)) => {
                self.buffer = Some(request);
                Ok(true)
            }
            Ok(None) | Err(Error::TakeFailed) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn execute(&mut self) -> Result<()> {
        if let Some((header, request)) = self.buffer.take() {
            let response = match &mut self.dispatch {
                ServiceDispatch::Plain(callback) => callback(&request),
                ServiceDispatch::WithRequestId(callback) => callback(&request, &header),
                ServiceDispatch::WithContext { callback, context } => {
                    callback(&request, context.as_mut())
                }
            };
            self.endpoint.send_response(&header, &response)?;
        }
        Ok(())
    }
}

pub(crate) struct GuardConditionEntry {
    pub(crate) endpoint: Arc<dyn RawGuardCondition>,
    pub(crate) waitable: Arc<dyn Waitable>,
    pub(crate) callback: Box<dyn FnMut() + Send>,
}

/// Work object of an action endpoint. Per-goal bookkeeping lives behind
/// this trait; the executor only drives register/refresh/take/execute.
pub(crate) trait ActionWork: Send {
    fn kind(&self) -> HandleKind;
    fn endpoint_addr(&self) -> usize;
    fn wait_set_entities(&self) -> EntityCounters;
    fn register(&mut self, wait_set: &mut WaitSet) -> Result<()>;

    /// Refreshes the per-sub-entity readiness snapshot; returns true if
    /// any sub-entity is ready.
    fn refresh(&mut self, wait_set: &WaitSet) -> bool;

    fn take(&mut self) -> Result<()>;
    fn execute(&mut self) -> Result<()>;
}

/// Tagged payload of one handle.
pub(crate) enum Entry {
    Subscription(Box<dyn SubscriptionWork>),
    Timer(Arc<dyn RawTimer>),
    Client(Box<dyn ClientWork>),
    Service(Box<dyn ServiceWork>),
    GuardCondition(GuardConditionEntry),
    ActionClient(Box<dyn ActionWork>),
    ActionServer(Box<dyn ActionWork>),
}

impl Entry {
    pub(crate) fn kind(&self) -> HandleKind {
        match self {
            Entry::Subscription(work) => work.kind(),
            Entry::Timer(_) => HandleKind::Timer,
            Entry::Client(work) => work.kind(),
            Entry::Service(work) => work.kind(),
            Entry::GuardCondition(_) => HandleKind::GuardCondition,
            Entry::ActionClient(_) => HandleKind::ActionClient,
            Entry::ActionServer(_) => HandleKind::ActionServer,
        }
    }

    pub(crate) fn endpoint_addr(&self) -> usize {
        match self {
            Entry::Subscription(work) => work.endpoint_addr(),
            Entry::Timer(timer) => erased_addr(timer),
            Entry::Client(work) => work.endpoint_addr(),
            Entry::Service(work) => work.endpoint_addr(),
            Entry::GuardCondition(entry) => erased_addr(&entry.endpoint),
            Entry::ActionClient(work) | Entry::ActionServer(work) => work.endpoint_addr(),
        }
    }

    /// Wait-set slots this entry occupies.
    pub(crate) fn wait_set_entities(&self) -> EntityCounters {
        match self {
            Entry::Subscription(_) => EntityCounters {
                subscriptions: 1,
                ..Default::default()
            },
            Entry::Timer(_) => EntityCounters {
                timers: 1,
                ..Default::default()
            },
            Entry::Client(_) => EntityCounters {
                clients: 1,
                ..Default::default()
            },
            Entry::Service(_) => EntityCounters {
                services: 1,
                ..Default::default()
            },
            Entry::GuardCondition(_) => EntityCounters {
                guard_conditions: 1,
                ..Default::default()
            },
            Entry::ActionClient(work) | Entry::ActionServer(work) => work.wait_set_entities(),
        }
    }

    /// Wait-set slot kind of single-entity entries; action endpoints
    /// track their own sub-entity indices.
    pub(crate) fn wait_kind(&self) -> Option<WaitKind> {
        match self {
            Entry::Subscription(_) => Some(WaitKind::Subscription),
            Entry::Timer(_) => Some(WaitKind::Timer),
            Entry::Client(_) => Some(WaitKind::Client),
            Entry::Service(_) => Some(WaitKind::Service),
            Entry::GuardCondition(_) => Some(WaitKind::GuardCondition),
            Entry::ActionClient(_) | Entry::ActionServer(_) => None,
        }
    }
}

/// One registered source, schedulable as a unit.
pub(crate) struct Handle {
    pub(crate) entry: Entry,
    pub(crate) invocation: Invocation,

    /// Wait-set index assigned during collection; `None` before the first
    /// collection and for action endpoints.
    pub(crate) index: Option<usize>,

    /// Readiness observed by the last collection.
    pub(crate) data_available: bool,

    /// Whether this cycle's take latched new data.
    pub(crate) taken: bool,
}

impl Handle {
    pub(crate) fn new(entry: Entry, invocation: Invocation) -> Self {
        Self {
            entry,
            invocation,
            index: None,
            data_available: false,
            taken: false,
        }
    }
}
