//! In-process reference middleware for the embros executor.
//!
//! Everything lives in one [`Context`]: topics fan out over per-subscription
//! queues, services route responses back to the requesting client, timers are
//! deadline-driven, and action endpoints are composed from the service and
//! topic primitives. All endpoints implement the `embros-core` traits, so an
//! executor can be driven entirely inside one process.
//!
//! # Example
//!
//! ```
//! use embros_core::Subscribe;
//! use embros_mem::Context;
//!
//! let ctx = Context::new();
//! let subscription = ctx.create_subscription::<String>("chatter").unwrap();
//! let publisher = ctx.create_publisher::<String>("chatter").unwrap();
//!
//! publisher.publish(&"hello".to_string()).unwrap();
//! assert_eq!(subscription.try_take().unwrap().as_deref(), Some("hello"));
//! ```

mod action;
mod context;
mod guard;
mod service;
mod signal;
mod timer;
mod topic;

pub use action::{ActionClient, ActionServer};
pub use context::Context;
pub use guard::GuardCondition;
pub use service::{Client, Server};
pub use timer::Timer;
pub use topic::{Publisher, Subscription};
