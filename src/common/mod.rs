//! Small utilities shared across components.

mod backoff;

pub use backoff::ExponentialBackoff;
