//! Simulated Rate Source
//!
//! In-process [`RateSource`] backed by an EUR-based reference table.
//! Cross rates are computed as `destination / base` and rounded to six
//! decimal places. A monitor task perturbs every rate on a fixed interval and
//! publishes a tick on the change feed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::ports::{RateSource, RateTicks};
use crate::domain::currency::{Currency, CurrencyPair};
use crate::domain::error::RateSourceError;

/// Decimal places of computed cross rates.
const RATE_SCALE: u32 = 6;

/// Decimal places kept in the reference table after perturbation.
const TABLE_SCALE: u32 = 10;

/// ECB reference rates (units per EUR) used when no rates file is given.
const DEFAULT_RATES: [(Currency, &str); 32] = [
    (Currency::Usd, "1.0856"),
    (Currency::Jpy, "161.12"),
    (Currency::Bgn, "1.9558"),
    (Currency::Czk, "25.283"),
    (Currency::Dkk, "7.4589"),
    (Currency::Gbp, "0.85465"),
    (Currency::Huf, "395.63"),
    (Currency::Pln, "4.3188"),
    (Currency::Ron, "4.9754"),
    (Currency::Sek, "11.4455"),
    (Currency::Chf, "0.9744"),
    (Currency::Isk, "150.10"),
    (Currency::Nok, "11.6215"),
    (Currency::Hrk, "7.5345"),
    (Currency::Rub, "98.4210"),
    (Currency::Try, "35.0411"),
    (Currency::Aud, "1.6297"),
    (Currency::Brl, "5.9410"),
    (Currency::Cad, "1.4717"),
    (Currency::Cny, "7.8402"),
    (Currency::Hkd, "8.4902"),
    (Currency::Idr, "17633.93"),
    (Currency::Ils, "4.0162"),
    (Currency::Inr, "90.5850"),
    (Currency::Krw, "1487.21"),
    (Currency::Mxn, "19.9285"),
    (Currency::Myr, "5.0958"),
    (Currency::Nzd, "1.7973"),
    (Currency::Php, "63.316"),
    (Currency::Sgd, "1.4562"),
    (Currency::Thb, "39.189"),
    (Currency::Zar, "20.0123"),
];

/// Simulated, EUR-based rate source.
#[derive(Debug)]
pub struct SimulatedRateSource {
    rates: RwLock<HashMap<Currency, Decimal>>,
    ticks: watch::Sender<u64>,
}

impl Default for SimulatedRateSource {
    fn default() -> Self {
        Self::new(Self::default_rates())
    }
}

impl SimulatedRateSource {
    /// Create a source over a table of units per EUR. EUR itself is always
    /// quoted at 1.
    #[must_use]
    pub fn new(mut rates: HashMap<Currency, Decimal>) -> Self {
        rates.insert(Currency::Eur, Decimal::ONE);
        let (ticks, _) = watch::channel(0);
        Self {
            rates: RwLock::new(rates),
            ticks,
        }
    }

    /// The built-in ECB reference table.
    #[must_use]
    pub fn default_rates() -> HashMap<Currency, Decimal> {
        DEFAULT_RATES
            .iter()
            .filter_map(|(currency, rate)| rate.parse().ok().map(|r| (*currency, r)))
            .collect()
    }

    /// Change feed; one tick per refresh.
    #[must_use]
    pub fn ticks(&self) -> RateTicks {
        self.ticks.subscribe()
    }

    /// Number of ticks published so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        *self.ticks.borrow()
    }

    /// Whether any cross rate can be answered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.rates.read().len() > 1
    }

    /// Set the rate (units per EUR) for one currency. Does not publish a tick.
    pub fn set_rate(&self, currency: Currency, rate: Decimal) {
        self.rates.write().insert(currency, rate);
    }

    /// Publish a "rates changed" tick.
    pub fn publish_tick(&self) {
        self.ticks.send_modify(|tick| *tick += 1);
    }

    /// Perturb every non-EUR rate by a random factor in
    /// `[1 - jitter, 1 + jitter]` and publish a tick.
    pub fn refresh(&self, jitter: f64) {
        let mut rng = rand::rng();
        {
            let mut rates = self.rates.write();
            for (currency, rate) in rates.iter_mut() {
                if *currency == Currency::Eur {
                    continue;
                }
                let change = rng.random::<f64>() * jitter;
                let factor = if rng.random_bool(0.5) {
                    1.0 + change
                } else {
                    1.0 - change
                };
                if let Some(factor) = Decimal::from_f64(factor) {
                    *rate = (*rate * factor).round_dp(TABLE_SCALE);
                }
            }
        }
        self.publish_tick();
    }

    /// Spawn a task that refreshes rates every `interval` until cancelled.
    pub fn monitor(
        self: &Arc<Self>,
        interval: Duration,
        jitter: f64,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let source = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            timer.tick().await;

            info!(interval_secs = interval.as_secs(), jitter, "Rate monitor started");

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        info!("Rate monitor stopped");
                        break;
                    }

                    _ = timer.tick() => {
                        source.refresh(jitter);
                        debug!(tick = source.tick_count(), "Rates refreshed");
                    }
                }
            }
        })
    }

    fn reference_rate(&self, currency: Currency) -> Result<Decimal, RateSourceError> {
        self.rates
            .read()
            .get(&currency)
            .copied()
            .ok_or(RateSourceError::UnknownCurrency(currency))
    }
}

#[async_trait]
impl RateSource for SimulatedRateSource {
    async fn get_rate(&self, pair: CurrencyPair) -> Result<Decimal, RateSourceError> {
        let base = self.reference_rate(pair.base())?;
        let destination = self.reference_rate(pair.destination())?;

        destination
            .checked_div(base)
            .map(|rate| rate.round_dp(RATE_SCALE))
            .ok_or_else(|| {
                RateSourceError::Computation(format!("cannot divide by {} rate {base}", pair.base()))
            })
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn table(entries: &[(Currency, &str)]) -> HashMap<Currency, Decimal> {
        entries.iter().map(|(c, r)| (*c, dec(r))).collect()
    }

    #[test]
    fn default_table_covers_every_currency() {
        let source = SimulatedRateSource::default();
        for currency in Currency::ALL {
            assert!(source.reference_rate(currency).is_ok(), "{currency} missing");
        }
        assert!(source.is_ready());
    }

    #[test_case(Currency::Eur, Currency::Usd, "1.1")]
    #[test_case(Currency::Usd, Currency::Eur, "0.909091")]
    #[test_case(Currency::Usd, Currency::Gbp, "0.772727")]
    #[test_case(Currency::Gbp, Currency::Usd, "1.294118")]
    fn cross_rates_divide_destination_by_base(base: Currency, destination: Currency, expected: &str) {
        let source = SimulatedRateSource::new(table(&[
            (Currency::Usd, "1.1"),
            (Currency::Gbp, "0.85"),
        ]));

        let rate =
            tokio_test::block_on(source.get_rate(CurrencyPair::new(base, destination))).unwrap();

        assert_eq!(rate, dec(expected));
    }

    #[tokio::test]
    async fn missing_currency_is_unknown() {
        let source = SimulatedRateSource::new(table(&[(Currency::Usd, "1.1")]));

        let err = source
            .get_rate(CurrencyPair::new(Currency::Usd, Currency::Jpy))
            .await
            .unwrap_err();

        assert_eq!(err, RateSourceError::UnknownCurrency(Currency::Jpy));
    }

    #[tokio::test]
    async fn zero_base_is_a_computation_error() {
        let source = SimulatedRateSource::new(table(&[
            (Currency::Usd, "0"),
            (Currency::Gbp, "0.85"),
        ]));

        let err = source
            .get_rate(CurrencyPair::new(Currency::Usd, Currency::Gbp))
            .await
            .unwrap_err();

        assert!(matches!(err, RateSourceError::Computation(_)));
    }

    #[test]
    fn refresh_stays_within_jitter_and_publishes_tick() {
        let source = SimulatedRateSource::new(table(&[(Currency::Usd, "1.0")]));
        let mut ticks = source.ticks();

        for _ in 0..50 {
            source.refresh(0.1);
            let usd = source.reference_rate(Currency::Usd).unwrap();
            assert!(usd > Decimal::ZERO);
        }

        assert_eq!(source.reference_rate(Currency::Eur).unwrap(), Decimal::ONE);
        assert!(ticks.has_changed().unwrap());
        assert_eq!(*ticks.borrow_and_update(), 50);
    }

    #[test]
    fn single_refresh_is_bounded() {
        let source = SimulatedRateSource::new(table(&[(Currency::Usd, "2.0")]));

        source.refresh(0.1);

        let usd = source.reference_rate(Currency::Usd).unwrap();
        assert!(usd >= dec("1.8") && usd <= dec("2.2"), "rate {usd} out of bounds");
    }

    #[test]
    fn zero_jitter_keeps_rates() {
        let source = SimulatedRateSource::new(table(&[(Currency::Usd, "1.0856")]));

        source.refresh(0.0);

        assert_eq!(source.reference_rate(Currency::Usd).unwrap(), dec("1.0856"));
        assert_eq!(source.tick_count(), 1);
    }

    #[tokio::test]
    async fn monitor_ticks_on_interval_until_cancelled() {
        let source = Arc::new(SimulatedRateSource::default());
        let mut ticks = source.ticks();
        let cancel = CancellationToken::new();

        let handle = source.monitor(Duration::from_millis(20), 0.1, cancel.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            ticks.changed().await.unwrap();
            ticks.changed().await.unwrap();
        })
        .await
        .unwrap();
        assert!(*ticks.borrow_and_update() >= 2);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
