//! Port Interfaces
//!
//! Contracts between the application services and the outside world,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RateSource`: point-in-time rate lookups
//! - `RateTicks`: "rates changed" notifications from the same source

mod rate_source_port;

pub use rate_source_port::{RateSource, RateTicks};

#[cfg(test)]
pub use rate_source_port::MockRateSource;
