//! Client for the Platform HTTP API. Calls carry a bearer credential and
//! JSON bodies; failures map through the error classifier, retries follow
//! bounded exponential backoff, and a circuit breaker guards repeated
//! failures.

pub mod circuit;
pub mod client;
pub mod error;
pub mod retry;
pub mod scripted;
pub mod types;

pub use circuit::{CircuitBreaker, CircuitState, GuardedPlatform};
pub use client::{PlatformApi, PlatformClient};
pub use error::PlatformError;
pub use retry::{RetryConfig, RetryExecutor};
pub use scripted::ScriptedPlatform;
pub use types::{
    AllowlistInfo, Community, EntryReceipt, NewTask, NotificationPayload, PlatformTask,
    TaskCompletion,
};
