//! gRPC Server Implementation
//!
//! Implements the `CurrencyService` gRPC service: unary `GetRate` and the
//! bidirectional `SubscribeRates` stream. Each stream is bridged to a
//! [`StreamSession`](crate::application::services::StreamSession) whose
//! receive loop runs on its own task.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tonic_types::{ErrorDetails, StatusExt};
use tracing::{debug, warn};

use super::proto::currency::v1::{
    self as proto, RateRequest, RateResponse, StreamingRateResponse,
    currency_service_server::CurrencyService, streaming_rate_response,
};
use crate::application::services::{
    InboundRequest, RateLookup, SessionMessage, SessionRegistry,
};
use crate::domain::currency::{Currency, CurrencyPair, RateSnapshot};
use crate::domain::error::{ERROR_DOMAIN, RateError, RateSourceError};
use crate::infrastructure::metrics;

// =============================================================================
// Type Aliases
// =============================================================================

type RpcResult<T> = Result<Response<T>, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

// =============================================================================
// Server Implementation
// =============================================================================

/// gRPC server for currency rates.
#[derive(Debug, Clone)]
pub struct CurrencyServer {
    lookup: RateLookup,
    registry: Arc<SessionRegistry>,
}

impl CurrencyServer {
    /// Create a server over the unary lookup and the live-session registry.
    #[must_use]
    pub const fn new(lookup: RateLookup, registry: Arc<SessionRegistry>) -> Self {
        Self { lookup, registry }
    }
}

#[tonic::async_trait]
impl CurrencyService for CurrencyServer {
    type SubscribeRatesStream = BoxedStream<StreamingRateResponse>;

    async fn get_rate(&self, request: Request<RateRequest>) -> RpcResult<RateResponse> {
        let req = request.into_inner();

        let result = match request_to_pair(&req) {
            Ok(pair) => self.lookup.get_rate(pair).await,
            Err(e) => Err(e),
        };

        match result.and_then(|snapshot| snapshot_to_proto(&snapshot)) {
            Ok(response) => {
                metrics::record_unary_request(None);
                Ok(Response::new(response))
            }
            Err(e) => {
                warn!(base = req.base, destination = req.destination, error = %e, "GetRate failed");
                metrics::record_unary_request(Some(e.code()));
                Err(rate_error_status(&e))
            }
        }
    }

    async fn subscribe_rates(
        &self,
        request: Request<Streaming<RateRequest>>,
    ) -> RpcResult<Self::SubscribeRatesStream> {
        let inbound = request
            .into_inner()
            .map(|item| item.map(|req| request_to_pair(&req)));
        let inbound: Pin<Box<dyn Stream<Item = Result<InboundRequest, Status>> + Send>> =
            Box::pin(inbound);

        let (session, outbound) = self.registry.open();
        let registry = Arc::clone(&self.registry);
        debug!(session_id = session.id(), "Rate stream opened");

        tokio::spawn(async move {
            registry.serve(session, inbound).await;
        });

        let stream = ReceiverStream::new(outbound).map(|message| Ok(message_to_proto(message)));
        Ok(Response::new(Box::pin(stream) as Self::SubscribeRatesStream))
    }
}

// =============================================================================
// Conversion Functions
// =============================================================================

/// Wire code of a currency. Domain variants are declared in wire order.
#[must_use]
pub const fn currency_to_proto(currency: Currency) -> i32 {
    currency as i32
}

/// Currency for a wire code, if it is in the enumerated set.
#[must_use]
pub fn currency_from_proto(code: i32) -> Option<Currency> {
    usize::try_from(code)
        .ok()
        .and_then(|index| Currency::ALL.get(index).copied())
}

/// Decode a request into a currency pair.
///
/// # Errors
///
/// Returns [`RateError::UnknownCurrency`] naming the first field whose code
/// is outside the enumerated set.
pub fn request_to_pair(req: &RateRequest) -> Result<CurrencyPair, RateError> {
    let unknown = |field| RateError::UnknownCurrency {
        field,
        base: req.base,
        destination: req.destination,
    };
    let base = currency_from_proto(req.base).ok_or_else(|| unknown("base"))?;
    let destination = currency_from_proto(req.destination).ok_or_else(|| unknown("destination"))?;
    Ok(CurrencyPair::new(base, destination))
}

fn pair_to_request(pair: CurrencyPair) -> RateRequest {
    RateRequest {
        base: currency_to_proto(pair.base()),
        destination: currency_to_proto(pair.destination()),
    }
}

/// The request an error refers to, as the client sent it.
fn error_request(err: &RateError) -> RateRequest {
    match err {
        RateError::UnknownCurrency {
            base, destination, ..
        } => RateRequest {
            base: *base,
            destination: *destination,
        },
        RateError::SameCurrency { pair }
        | RateError::AlreadyExists { pair }
        | RateError::RateUnavailable { pair, .. } => pair_to_request(*pair),
    }
}

/// Finite double for a decimal rate, or `None` if it has none.
fn decimal_to_f64(d: Decimal) -> Option<f64> {
    d.to_f64().filter(|v| v.is_finite())
}

fn unrepresentable_rate(snapshot: &RateSnapshot) -> RateError {
    RateError::RateUnavailable {
        pair: snapshot.pair,
        source: RateSourceError::Computation(format!(
            "rate {} is not representable as a double",
            snapshot.rate
        )),
    }
}

/// Wire form of a rate. A rate with no finite double is reported as
/// unavailable rather than sent as a wrong number.
fn snapshot_to_proto(snapshot: &RateSnapshot) -> Result<RateResponse, RateError> {
    let rate = decimal_to_f64(snapshot.rate).ok_or_else(|| unrepresentable_rate(snapshot))?;
    Ok(RateResponse {
        base: currency_to_proto(snapshot.pair.base()),
        destination: currency_to_proto(snapshot.pair.destination()),
        rate,
    })
}

fn rate_error_to_proto(err: &RateError) -> proto::RateError {
    proto::RateError {
        code: err.grpc_code() as i32,
        message: err.to_string(),
        request: Some(error_request(err)),
    }
}

fn message_to_proto(message: SessionMessage) -> StreamingRateResponse {
    let message = match message {
        SessionMessage::Rate(snapshot) => match snapshot_to_proto(&snapshot) {
            Ok(response) => streaming_rate_response::Message::RateResponse(response),
            Err(e) => {
                warn!(pair = %snapshot.pair, error = %e, "Rate update not sent");
                streaming_rate_response::Message::Error(rate_error_to_proto(&e))
            }
        },
        SessionMessage::Rejected(err) => {
            streaming_rate_response::Message::Error(rate_error_to_proto(&err))
        }
    };
    StreamingRateResponse {
        message: Some(message),
    }
}

fn currency_label(code: i32) -> String {
    proto::Currency::try_from(code)
        .map_or_else(|_| code.to_string(), |c| c.as_str_name().to_string())
}

/// Build a `Status` with `ErrorInfo` and, for validation errors, a
/// `BadRequest` field violation.
#[must_use]
pub fn rate_error_status(err: &RateError) -> Status {
    let request = error_request(err);
    let metadata = HashMap::from([
        ("base".to_string(), currency_label(request.base)),
        ("destination".to_string(), currency_label(request.destination)),
    ]);

    let mut details = ErrorDetails::new();
    details.set_error_info(err.code().reason(), ERROR_DOMAIN, metadata);
    if let Some(field) = err.field() {
        details.add_bad_request_violation(field, err.to_string());
    }

    Status::with_error_details(err.grpc_code(), err.to_string(), details)
}

// =============================================================================
// Tests
// =============================================================================
