//! Per-goal state machines the executor advances for action clients and
//! servers.

pub mod client;
pub mod server;

pub(crate) mod pool;

pub use client::{Client, ClientCallbacks};
pub use server::{Server, ServerCallbacks};
