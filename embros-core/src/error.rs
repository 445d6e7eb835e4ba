//! Error types shared by the executor and middleware backends.

use thiserror::Error;

/// Result type for embros operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving an executor.
///
/// Timeouts are deliberately absent: blocking operations report them as
/// `Ok(false)` so that an expired wait never aborts a spin loop.
#[derive(Debug, Error)]
pub enum Error {
    /// A required parameter was null, empty, or out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The handle table or a goal pool is full.
    #[error("capacity exceeded")]
    CapacityExceeded,

    /// The endpoint is not registered with this executor.
    #[error("no handle registered for this endpoint")]
    NotFound,

    /// The executor has been finalized or was never initialized.
    #[error("executor is not initialized")]
    Uninitialized,

    /// A take found no data. Non-fatal; the cycle continues.
    #[error("nothing to take")]
    TakeFailed,

    /// The timer was canceled. Non-fatal; the cycle continues.
    #[error("timer was canceled")]
    TimerCanceled,

    /// A wait-set slot vector is full.
    #[error("wait set is full")]
    WaitSetFull,

    /// The middleware context has been shut down.
    #[error("context has been shut down")]
    ContextInvalid,

    /// Any other middleware failure. Fatal for the current cycle.
    #[error("middleware error: {0}")]
    Middleware(String),
}
