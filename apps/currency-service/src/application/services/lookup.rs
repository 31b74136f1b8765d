//! Unary Rate Lookup
//!
//! Stateless request/response path for a single rate query. Validation is
//! the same as for stream subscriptions: a self-referential pair is rejected
//! before the rate source is consulted.

use std::sync::Arc;

use tracing::{debug, info};

use crate::application::ports::RateSource;
use crate::domain::currency::{CurrencyPair, RateSnapshot};
use crate::domain::error::RateError;

/// Answers point-in-time rate queries.
#[derive(Clone)]
pub struct RateLookup {
    source: Arc<dyn RateSource>,
}

impl RateLookup {
    /// Create a lookup over a rate source.
    #[must_use]
    pub fn new(source: Arc<dyn RateSource>) -> Self {
        Self { source }
    }

    /// Look up the current rate for a pair.
    ///
    /// # Errors
    ///
    /// - [`RateError::SameCurrency`] if base equals destination; no lookup
    ///   is performed.
    /// - [`RateError::RateUnavailable`] if the rate source fails.
    pub async fn get_rate(&self, pair: CurrencyPair) -> Result<RateSnapshot, RateError> {
        info!(base = %pair.base(), destination = %pair.destination(), "Handle GetRate");

        let pair = pair.validate()?;
        let rate = self
            .source
            .get_rate(pair)
            .await
            .map_err(|source| RateError::RateUnavailable { pair, source })?;

        debug!(%pair, %rate, "Rate resolved");
        Ok(RateSnapshot::now(pair, rate))
    }
}

impl std::fmt::Debug for RateLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLookup").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::MockRateSource;
    use crate::domain::currency::Currency;
    use crate::domain::error::RateSourceError;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn returns_rate_from_source() {
        let pair = CurrencyPair::new(Currency::Usd, Currency::Eur);
        let mut source = MockRateSource::new();
        source
            .expect_get_rate()
            .with(eq(pair))
            .times(1)
            .returning(|_| Ok(dec("0.92")));

        let lookup = RateLookup::new(Arc::new(source));
        let snapshot = lookup.get_rate(pair).await.unwrap();

        assert_eq!(snapshot.pair, pair);
        assert_eq!(snapshot.rate, dec("0.92"));
    }

    #[tokio::test]
    async fn source_failure_propagates_as_unavailable() {
        let pair = CurrencyPair::new(Currency::Usd, Currency::Jpy);
        let mut source = MockRateSource::new();
        source
            .expect_get_rate()
            .returning(|_| Err(RateSourceError::UnknownCurrency(Currency::Jpy)));

        let lookup = RateLookup::new(Arc::new(source));
        let err = lookup.get_rate(pair).await.unwrap_err();

        assert_eq!(
            err,
            RateError::RateUnavailable {
                pair,
                source: RateSourceError::UnknownCurrency(Currency::Jpy),
            }
        );
    }

    proptest! {
        #[test]
        fn same_currency_is_rejected_without_lookup(idx in 0..Currency::ALL.len()) {
            let currency = Currency::ALL[idx];
            let mut source = MockRateSource::new();
            source.expect_get_rate().never();
            let lookup = RateLookup::new(Arc::new(source));

            let result = tokio_test::block_on(
                lookup.get_rate(CurrencyPair::new(currency, currency)),
            );

            prop_assert!(
                matches!(result, Err(RateError::SameCurrency { .. })),
                "expected SameCurrency rejection"
            );
        }
    }
}
