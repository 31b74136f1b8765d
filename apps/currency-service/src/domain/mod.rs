//! Domain Layer - Currency types and subscription rules.
//!
//! This layer holds the transport-agnostic types of the service: currency
//! codes and pairs, the error taxonomy, and per-session subscription sets.

/// Currencies, currency pairs and rate snapshots.
pub mod currency;

/// Error taxonomy and gRPC code mapping.
pub mod error;

/// Per-session subscription tracking.
pub mod subscription;
