//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations behind the application ports, plus the outer
//! gRPC and HTTP surfaces.

/// gRPC server for rate lookups and rate streams.
pub mod grpc;

/// Environment configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Simulated EUR-based rate source.
pub mod rates;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;
