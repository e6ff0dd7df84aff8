// Module declarations
pub mod sys;
pub mod time;

// Re-exports
pub use sys::memory_usage_mb;
pub use time::{current_timestamp, current_timestamp_ms, timestamp_to_readable, with_timeout};
