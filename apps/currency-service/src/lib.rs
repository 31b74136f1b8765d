#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Currency Service - Live Exchange Rate Distribution
//!
//! A gRPC service that answers point-in-time currency rate lookups and keeps
//! subscribed clients up to date as rates move.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: currencies, pairs, subscriptions and the error taxonomy
//! - **Application**: the rate source port, unary lookups, stream sessions,
//!   the session registry and the broadcast coordinator
//! - **Infrastructure**: the gRPC server, the simulated rate source,
//!   configuration, health, metrics and telemetry
//!
//! # Data Flow
//!
//! ```text
//!  SimulatedRateSource --tick--> BroadcastCoordinator
//!          ^                          |  one lookup per distinct pair
//!          |                          v
//!      RateLookup             SessionRegistry --> StreamSession --> client
//!          ^                                           ^
//!          |                                           |
//!       GetRate                                 SubscribeRates
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Currencies, pairs, subscriptions and errors.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::currency::{Currency, CurrencyPair, RateSnapshot, UnknownCurrencyCode};
pub use domain::error::{ErrorCode, RateError, RateSourceError};
pub use domain::subscription::{SessionId, Subscription, SubscriptionSet};

// Ports and services
pub use application::ports::{RateSource, RateTicks};
pub use application::services::{
    BroadcastCoordinator, RateLookup, SessionRegistry, SessionSettings, SessionState,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServiceConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{
    CurrencyServer, FILE_DESCRIPTOR_SET, proto::currency::v1 as proto, reflection_service,
};

// Rate source
pub use infrastructure::rates::SimulatedRateSource;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
