//! Configuration Module
//!
//! Environment-driven configuration for the currency service.

mod settings;

pub use settings::{ConfigError, RateSettings, ServerSettings, ServiceConfig, load_reference_rates};
