//! # Knot Common
//!
//! Shared plumbing for the Knot offline agent crates.
//!
//! - Logging configuration and subscriber setup
//! - Retry with exponential backoff for host-driven lifecycle events

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};
pub use retry::{retry_with_backoff, RetryConfig};
