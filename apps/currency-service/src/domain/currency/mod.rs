//! Currency Types
//!
//! Currency codes, currency pairs and rate snapshots. These types are
//! transport-agnostic; the gRPC layer converts them to and from protobuf.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::RateError;

// =============================================================================
// Currency
// =============================================================================

/// ECB reference currency.
///
/// The set is fixed and shared with clients through the protobuf schema.
/// Variants are declared in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum Currency {
    Eur,
    Usd,
    Jpy,
    Bgn,
    Czk,
    Dkk,
    Gbp,
    Huf,
    Pln,
    Ron,
    Sek,
    Chf,
    Isk,
    Nok,
    Hrk,
    Rub,
    Try,
    Aud,
    Brl,
    Cad,
    Cny,
    Hkd,
    Idr,
    Ils,
    Inr,
    Krw,
    Mxn,
    Myr,
    Nzd,
    Php,
    Sgd,
    Thb,
    Zar,
}

impl Currency {
    /// All currencies, in wire order.
    pub const ALL: [Self; 33] = [
        Self::Eur,
        Self::Usd,
        Self::Jpy,
        Self::Bgn,
        Self::Czk,
        Self::Dkk,
        Self::Gbp,
        Self::Huf,
        Self::Pln,
        Self::Ron,
        Self::Sek,
        Self::Chf,
        Self::Isk,
        Self::Nok,
        Self::Hrk,
        Self::Rub,
        Self::Try,
        Self::Aud,
        Self::Brl,
        Self::Cad,
        Self::Cny,
        Self::Hkd,
        Self::Idr,
        Self::Ils,
        Self::Inr,
        Self::Krw,
        Self::Mxn,
        Self::Myr,
        Self::Nzd,
        Self::Php,
        Self::Sgd,
        Self::Thb,
        Self::Zar,
    ];

    /// ISO 4217 code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eur => "EUR",
            Self::Usd => "USD",
            Self::Jpy => "JPY",
            Self::Bgn => "BGN",
            Self::Czk => "CZK",
            Self::Dkk => "DKK",
            Self::Gbp => "GBP",
            Self::Huf => "HUF",
            Self::Pln => "PLN",
            Self::Ron => "RON",
            Self::Sek => "SEK",
            Self::Chf => "CHF",
            Self::Isk => "ISK",
            Self::Nok => "NOK",
            Self::Hrk => "HRK",
            Self::Rub => "RUB",
            Self::Try => "TRY",
            Self::Aud => "AUD",
            Self::Brl => "BRL",
            Self::Cad => "CAD",
            Self::Cny => "CNY",
            Self::Hkd => "HKD",
            Self::Idr => "IDR",
            Self::Ils => "ILS",
            Self::Inr => "INR",
            Self::Krw => "KRW",
            Self::Mxn => "MXN",
            Self::Myr => "MYR",
            Self::Nzd => "NZD",
            Self::Php => "PHP",
            Self::Sgd => "SGD",
            Self::Thb => "THB",
            Self::Zar => "ZAR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a string that is not a known currency code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown currency code: {0}")]
pub struct UnknownCurrencyCode(pub String);

impl FromStr for Currency {
    type Err = UnknownCurrencyCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == code)
            .ok_or(UnknownCurrencyCode(s.to_string()))
    }
}

// =============================================================================
// Currency Pair
// =============================================================================

/// An ordered (base, destination) pair identifying a conversion rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    base: Currency,
    destination: Currency,
}

impl CurrencyPair {
    /// Create a pair. Self-referential pairs are representable; use
    /// [`CurrencyPair::validate`] before acting on one.
    #[must_use]
    pub const fn new(base: Currency, destination: Currency) -> Self {
        Self { base, destination }
    }

    /// Base currency.
    #[must_use]
    pub const fn base(&self) -> Currency {
        self.base
    }

    /// Destination currency.
    #[must_use]
    pub const fn destination(&self) -> Currency {
        self.destination
    }

    /// Whether base and destination are the same currency.
    #[must_use]
    pub fn is_self_referential(&self) -> bool {
        self.base == self.destination
    }

    /// Check the pair can be quoted.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::SameCurrency`] when base equals destination.
    pub fn validate(self) -> Result<Self, RateError> {
        if self.is_self_referential() {
            return Err(RateError::SameCurrency { pair: self });
        }
        Ok(self)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.destination)
    }
}

// =============================================================================
// Rate Snapshot
// =============================================================================

/// A rate for one pair, computed at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateSnapshot {
    /// The quoted pair.
    pub pair: CurrencyPair,
    /// Units of destination currency per unit of base currency.
    pub rate: Decimal,
    /// When the rate was computed.
    pub as_of: DateTime<Utc>,
}

impl RateSnapshot {
    /// Snapshot a rate as of now.
    #[must_use]
    pub fn now(pair: CurrencyPair, rate: Decimal) -> Self {
        Self {
            pair,
            rate,
            as_of: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
