//! gRPC Currency Server
//!
//! Implements the `currency.v1.CurrencyService` gRPC service.
//!
//! # Architecture
//!
//! - `GetRate` validates the request and delegates to the unary lookup.
//! - `SubscribeRates` opens a stream session, runs its receive loop on a
//!   spawned task, and streams the session's outbound queue back to the
//!   client. Rate updates are pushed into that queue by the broadcast
//!   coordinator.
//! - Errors use rich `tonic-types` details on the unary path and in-band
//!   `RateError` messages on the stream.
//! - The compiled schema is served through gRPC server reflection.

pub mod server;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod currency {
        pub mod v1 {
            include!(concat!(env!("OUT_DIR"), "/currency.v1.rs"));
        }
    }
}

pub use server::{CurrencyServer, rate_error_status, request_to_pair};

use tonic_reflection::server::v1::{ServerReflection, ServerReflectionServer};

/// Encoded `FileDescriptorSet` of the `currency.v1` package.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/currency_descriptor.bin"));

/// Build the gRPC reflection service for the `currency.v1` schema.
///
/// # Errors
///
/// Returns an error if the embedded descriptor set cannot be decoded.
pub fn reflection_service()
-> Result<ServerReflectionServer<impl ServerReflection>, tonic_reflection::server::Error> {
    tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
}
