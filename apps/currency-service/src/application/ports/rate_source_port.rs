//! Rate Source Port (Driven Port)
//!
//! Interface to the provider of exchange rates.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::domain::currency::CurrencyPair;
use crate::domain::error::RateSourceError;

/// Change feed of a rate source.
///
/// The value is a monotonically increasing tick counter. Receivers only see
/// the latest value, so ticks that arrive while a consumer is busy collapse
/// into a single pending change. The feed ends when the sender is dropped.
pub type RateTicks = watch::Receiver<u64>;

/// Provider of point-in-time exchange rates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of `pair.destination()` per unit of `pair.base()`.
    ///
    /// # Errors
    ///
    /// - [`RateSourceError::UnknownCurrency`] if either currency is absent.
    /// - [`RateSourceError::Computation`] if the rate cannot be computed.
    async fn get_rate(&self, pair: CurrencyPair) -> Result<Decimal, RateSourceError>;
}
