//! Backend client layer: sends canonical events to the decision backend,
//! retries transient failures, and correlates out-of-band replies back to
//! the waiting caller or to a delivery sink.

pub mod chat_client;
pub mod client;
pub mod correlation;
pub mod error;
pub mod mock;
pub mod notifier;
pub mod openai_compat;
pub mod retry;
pub mod universal_im;

pub use chat_client::*;
pub use client::*;
pub use correlation::*;
pub use error::*;
pub use mock::*;
pub use notifier::*;
pub use openai_compat::*;
pub use retry::{next_backoff_ms, RetryPolicy, BASE_BACKOFF_MS};
pub use universal_im::*;
