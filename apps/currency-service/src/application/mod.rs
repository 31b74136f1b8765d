//! Application Layer - Use cases and port definitions.
//!
//! This layer holds the rate source port and the services built on it:
//! unary lookup, stream sessions, the live-session registry and the
//! broadcast coordinator.

/// Port interfaces for external systems (rate source).
pub mod ports;

/// Application services for lookups, sessions and broadcast.
pub mod services;
