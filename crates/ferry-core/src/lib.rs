//! Shared primitives for the ticket bridge workspace.
//!
//! Holds the immutable runtime configuration, the error taxonomy used across
//! engine components, timestamp helpers, atomic file writes, and the bounded
//! retry policy applied to outbound platform calls.

pub mod atomic_io;
pub mod clock;
pub mod config;
pub mod error;
pub mod retry;

pub use atomic_io::{write_bytes_atomic, write_text_atomic};
pub use clock::now_unix_ms;
pub use config::BridgeConfig;
pub use error::FerryError;
pub use retry::{retry_delay_ms, RetryPolicy};
