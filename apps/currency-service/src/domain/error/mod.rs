//! Rate Errors
//!
//! Error types shared by the unary lookup, the stream sessions and the
//! broadcast coordinator. Each [`RateError`] carries an [`ErrorCode`] that
//! fixes its gRPC status code and the stable reason string clients see in
//! `ErrorInfo`.
//!
//! # gRPC Status Codes
//!
//! | Code | Name | Usage |
//! |------|------|-------|
//! | `INVALID_ARGUMENT` (3) | Invalid Argument | Same currency on both sides, unknown code |
//! | `NOT_FOUND` (5) | Not Found | Currency absent from the rate table |
//! | `ALREADY_EXISTS` (6) | Already Exists | Duplicate subscription in one session |
//! | `UNAVAILABLE` (14) | Unavailable | Rate could not be computed |

use thiserror::Error;
use tonic::Code;

use super::currency::{Currency, CurrencyPair};

/// Domain for currency service errors (gRPC `ErrorInfo.domain`).
pub const ERROR_DOMAIN: &str = "currency.v1";

// =============================================================================
// Error Codes
// =============================================================================

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Base and destination are the same currency.
    SameCurrency,
    /// A currency code outside the enumerated set.
    UnknownCurrency,
    /// The session already holds a subscription for the pair.
    DuplicateSubscription,
    /// The rate source has no entry for one of the currencies.
    CurrencyNotQuoted,
    /// The rate source failed to compute the rate.
    RateUnavailable,
}

impl ErrorCode {
    /// gRPC status code for this error.
    #[must_use]
    pub const fn grpc_code(&self) -> Code {
        match self {
            Self::SameCurrency | Self::UnknownCurrency => Code::InvalidArgument,
            Self::DuplicateSubscription => Code::AlreadyExists,
            Self::CurrencyNotQuoted => Code::NotFound,
            Self::RateUnavailable => Code::Unavailable,
        }
    }

    /// Reason string for gRPC `ErrorInfo`.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::SameCurrency => "SAME_CURRENCY",
            Self::UnknownCurrency => "UNKNOWN_CURRENCY",
            Self::DuplicateSubscription => "DUPLICATE_SUBSCRIPTION",
            Self::CurrencyNotQuoted => "CURRENCY_NOT_QUOTED",
            Self::RateUnavailable => "RATE_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

// =============================================================================
// Rate Source Errors
// =============================================================================

/// Failure reported by a rate source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateSourceError {
    /// The currency has no entry in the source's table.
    #[error("no rate found for currency {0}")]
    UnknownCurrency(Currency),

    /// The rate could not be computed.
    #[error("rate computation failed: {0}")]
    Computation(String),
}

// =============================================================================
// Rate Errors
// =============================================================================

/// Errors surfaced to clients by rate lookups and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    /// Base and destination are the same currency.
    #[error(
        "base currency {} can not be the same as the destination currency {}",
        .pair.base(),
        .pair.destination()
    )]
    SameCurrency {
        /// The rejected pair.
        pair: CurrencyPair,
    },

    /// A request field carried a code outside the enumerated set.
    ///
    /// Holds both raw codes so the rejected request can be echoed back.
    #[error("unknown currency code in field {field} (base {base}, destination {destination})")]
    UnknownCurrency {
        /// Request field name (`base` or `destination`).
        field: &'static str,
        /// Raw base code.
        base: i32,
        /// Raw destination code.
        destination: i32,
    },

    /// The pair is already subscribed on this session.
    #[error("unable to subscribe for currency as subscription already exists: {pair}")]
    AlreadyExists {
        /// The duplicated pair.
        pair: CurrencyPair,
    },

    /// The rate source could not produce a rate.
    #[error("unable to get rate for {pair}: {source}")]
    RateUnavailable {
        /// The pair that was looked up.
        pair: CurrencyPair,
        /// Underlying source failure.
        #[source]
        source: RateSourceError,
    },
}

impl RateError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SameCurrency { .. } => ErrorCode::SameCurrency,
            Self::UnknownCurrency { .. } => ErrorCode::UnknownCurrency,
            Self::AlreadyExists { .. } => ErrorCode::DuplicateSubscription,
            Self::RateUnavailable {
                source: RateSourceError::UnknownCurrency(_),
                ..
            } => ErrorCode::CurrencyNotQuoted,
            Self::RateUnavailable { .. } => ErrorCode::RateUnavailable,
        }
    }

    /// gRPC status code.
    #[must_use]
    pub const fn grpc_code(&self) -> Code {
        self.code().grpc_code()
    }

    /// The pair the error refers to, when the request decoded into one.
    #[must_use]
    pub const fn pair(&self) -> Option<CurrencyPair> {
        match self {
            Self::SameCurrency { pair }
            | Self::AlreadyExists { pair }
            | Self::RateUnavailable { pair, .. } => Some(*pair),
            Self::UnknownCurrency { .. } => None,
        }
    }

    /// The request field at fault, for validation errors.
    #[must_use]
    pub const fn field(&self) -> Option<&'static str> {
        match self {
            Self::SameCurrency { .. } => Some("destination"),
            Self::UnknownCurrency { field, .. } => Some(*field),
            Self::AlreadyExists { .. } | Self::RateUnavailable { .. } => None,
        }
    }

    /// Raw code of the offending field, for [`RateError::UnknownCurrency`].
    #[must_use]
    pub fn value(&self) -> Option<i32> {
        match self {
            Self::UnknownCurrency { field, base, .. } if *field == "base" => Some(*base),
            Self::UnknownCurrency { destination, .. } => Some(*destination),
            _ => None,
        }
    }

    /// Whether this is a client-side validation failure.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self.grpc_code(), Code::InvalidArgument)
    }
}

// =============================================================================
// Tests
// =============================================================================
