//! Build Script for Currency Service
//!
//! Generates Rust protobuf stubs for the `currency.v1` package from
//! `proto/currency/v1/currency.proto`.
//!
//! The schema is parsed with `protox`, so `protoc` is not needed on the build
//! host. The encoded file descriptor set is also written to `OUT_DIR` for the
//! gRPC reflection service.
//!
//! # Panics Policy
//!
//! Build scripts intentionally use `.expect()` and panic on failure because:
//! - Build scripts MUST halt the build process when prerequisites are missing
//! - There is no caller to propagate errors to - the build system handles panics
//! - Descriptive panic messages guide developers to fix configuration issues
#![allow(clippy::expect_used)]

use std::env;
use std::path::PathBuf;

use prost::Message;

const PROTO_ROOT: &str = "proto";
const PROTO_FILES: &[&str] = &["currency/v1/currency.proto"];
const DESCRIPTOR_FILE: &str = "currency_descriptor.bin";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={PROTO_ROOT}");

    // Emit cfg for coverage detection
    if env::var("CARGO_LLVM_COV").is_ok()
        || env::var("LLVM_PROFILE_FILE").is_ok()
        || env::var("RUSTFLAGS")
            .map(|f| f.contains("instrument-coverage"))
            .unwrap_or(false)
    {
        println!("cargo:rustc-cfg=coverage");
    }

    let fds = protox::compile(PROTO_FILES, [PROTO_ROOT]).expect("Failed to parse protobuf schema");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    std::fs::write(out_dir.join(DESCRIPTOR_FILE), fds.encode_to_vec())
        .expect("Failed to write file descriptor set");

    tonic_prost_build::configure()
        .build_client(true) // Enable client for integration tests
        .build_server(true)
        .compile_fds(fds)
        .expect("Failed to compile protobuf definitions");
}
