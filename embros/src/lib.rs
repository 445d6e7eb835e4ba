//! Deterministic, statically sized callback executor for pub/sub and
//! request/response middleware.
//!
//! The executor waits on a fixed set of sources — subscriptions, timers,
//! service clients and servers, guard conditions, and action endpoints —
//! and dispatches user callbacks in registration order. Every allocation
//! happens while configuring; the spin loops run allocation-free, which
//! is what makes the executor usable in hard-realtime control loops.
//!
//! Two data-communication semantics are selectable per executor:
//! [`Semantics::RclcppLike`] interleaves take and execute per handle,
//! while [`Semantics::Let`] latches every input before running any
//! callback, giving all callbacks of a cycle the same input set.
//!
//! Dispatch is additionally gated by a [`trigger`] predicate evaluated
//! over the collected readiness each cycle.
//!
//! # Example
//!
//! ```
//! use embros::{Executor, Invocation, trigger};
//! use embros_mem::Context;
//! use std::time::Duration;
//!
//! let ctx = Context::new();
//! let subscription = ctx.create_subscription::<i64>("ticks").unwrap();
//! let publisher = ctx.create_publisher::<i64>("ticks").unwrap();
//!
//! let mut executor = Executor::new(ctx.clone(), 4).unwrap();
//! executor.set_trigger(trigger::trigger_one(&subscription));
//! executor
//!     .add_subscription(
//!         &subscription,
//!         |tick: Option<&i64>| {
//!             if let Some(tick) = tick {
//!                 println!("tick {tick}");
//!             }
//!         },
//!         Invocation::OnNewData,
//!     )
//!     .unwrap();
//!
//! publisher.publish(&1).unwrap();
//! executor.spin_some(Duration::from_millis(50)).unwrap();
//! ```

pub mod action;
pub mod trigger;

mod executor;
mod handle;
mod table;

pub use executor::{DEFAULT_TIMEOUT, Executor, Semantics};
pub use handle::{HandleKind, Invocation};
pub use trigger::{Trigger, TriggerHandle, TriggerView};

// Re-exported so downstream code can name the shared error type without
// a separate embros-core dependency.
pub use embros_core::{Error, Result};
