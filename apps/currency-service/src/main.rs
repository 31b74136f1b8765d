//! Currency Service Binary
//!
//! Starts the rate source, the broadcast coordinator, the gRPC server and the
//! health server, then waits for SIGTERM or Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin currency-service
//! ```
//!
//! # Environment Variables
//!
//! - `CURRENCY_GRPC_PORT`: gRPC server port (default: 9092)
//! - `CURRENCY_HEALTH_PORT`: health check HTTP port (default: 8083)
//! - `CURRENCY_RATE_INTERVAL_SECS`: rate refresh interval (default: 5)
//! - `CURRENCY_RATE_JITTER`: maximum relative change per refresh (default: 0.1)
//! - `CURRENCY_RATES_FILE`: JSON file of EUR-based reference rates
//! - `CURRENCY_SESSION_QUEUE_CAPACITY`: outbound queue per stream (default: 64)
//! - `CURRENCY_MAX_SEND_FAILURES`: consecutive full-queue drops before a
//!   stream is closed, 0 to never close (default: 0)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use currency_service::infrastructure::config::load_reference_rates;
use currency_service::infrastructure::grpc::proto::currency::v1::currency_service_server::CurrencyServiceServer;
use currency_service::infrastructure::grpc::reflection_service;
use currency_service::infrastructure::telemetry;
use currency_service::{
    BroadcastCoordinator, CurrencyServer, HealthServer, HealthServerState, RateLookup,
    ServiceConfig, SessionRegistry, SimulatedRateSource, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

/// Upper bound on waiting for background tasks after shutdown is requested.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting currency service");

    let _metrics_handle = init_metrics();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let reference_rates = match &config.rates.rates_file {
        Some(path) => load_reference_rates(path)
            .with_context(|| format!("loading rates from {}", path.display()))?,
        None => SimulatedRateSource::default_rates(),
    };

    let shutdown_token = CancellationToken::new();

    let rates = Arc::new(SimulatedRateSource::new(reference_rates));
    let monitor = rates.monitor(
        config.rates.interval,
        config.rates.jitter,
        shutdown_token.clone(),
    );

    let registry = Arc::new(SessionRegistry::new(
        config.sessions,
        shutdown_token.clone(),
    ));

    let coordinator = Arc::new(BroadcastCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&rates) as _,
    ));
    let broadcast = {
        let coordinator = Arc::clone(&coordinator);
        let ticks = rates.ticks();
        let cancel = shutdown_token.clone();
        tokio::spawn(async move { coordinator.run(ticks, cancel).await })
    };

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.rates.interval,
        Arc::clone(&registry),
        Arc::clone(&coordinator),
        Arc::clone(&rates),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.server.grpc_port));
    let grpc_service = CurrencyServiceServer::new(CurrencyServer::new(
        RateLookup::new(Arc::clone(&rates) as _),
        Arc::clone(&registry),
    ));
    let reflection = reflection_service().context("failed to build gRPC reflection service")?;
    let grpc_shutdown = shutdown_token.clone();
    let grpc = tokio::spawn(async move {
        tracing::info!(addr = %grpc_addr, "gRPC server listening");
        if let Err(e) = Server::builder()
            .add_service(grpc_service)
            .add_service(reflection)
            .serve_with_shutdown(grpc_addr, grpc_shutdown.clone().cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "gRPC server error");
            grpc_shutdown.cancel();
        }
        tracing::info!("gRPC server stopped");
    });

    tracing::info!("Currency service ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(grpc, broadcast, monitor);
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, exiting with tasks still running"
        );
    }

    tracing::info!(
        open_sessions = registry.len(),
        "Currency service stopped"
    );
    Ok(())
}

fn log_config(config: &ServiceConfig) {
    tracing::info!(
        grpc_port = config.server.grpc_port,
        health_port = config.server.health_port,
        interval_secs = config.rates.interval.as_secs(),
        jitter = config.rates.jitter,
        queue_capacity = config.sessions.queue_capacity,
        max_send_failures = config.sessions.max_send_failures,
        "Configuration loaded"
    );
    if let Some(path) = &config.rates.rates_file {
        tracing::debug!(path = %path.display(), "Reference rates file");
    }
}

/// Load `.env` from the current directory or the nearest ancestor that has one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    if let Some(env_path) = cwd
        .ancestors()
        .skip(1)
        .map(|dir| dir.join(".env"))
        .find(|path| path.exists())
    {
        let _ = dotenvy::from_path(&env_path);
    }
}

/// Wait for SIGTERM or Ctrl+C, then cancel every task.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Shutdown requested internally");
        }
    }

    shutdown_token.cancel();
}
