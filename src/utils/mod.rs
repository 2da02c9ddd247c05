//! Common utilities

pub mod throttle;

pub use throttle::LogThrottler;
