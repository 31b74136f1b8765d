//! Broadcast Coordinator
//!
//! Pushes fresh rates to every live session on each rate-source tick.
//!
//! # Cycle
//!
//! 1. Snapshot the live sessions.
//! 2. For each session, for each subscribed pair, look the rate up. Each
//!    distinct pair is looked up at most once per cycle and the result is
//!    shared, so sessions on the same pair see the same value.
//! 3. Queue the update on the session. A failed lookup skips the pair; a
//!    failed send affects only that session.
//!
//! Cycles never overlap. Ticks that arrive while a cycle runs collapse into
//! one follow-up cycle.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::SessionRegistry;
use super::session::{SendError, SessionMessage};
use crate::application::ports::{RateSource, RateTicks};
use crate::domain::currency::{CurrencyPair, RateSnapshot};
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Reports and Statistics
// =============================================================================

/// Outcome of one broadcast cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Sessions visited.
    pub sessions: usize,
    /// Distinct pairs looked up.
    pub lookups: usize,
    /// Updates queued to clients.
    pub delivered: u64,
    /// Pairs whose lookup failed.
    pub lookup_failures: u64,
    /// Updates dropped because a session's queue was full.
    pub queue_full: u64,
    /// Updates not sent because a session was gone.
    pub disconnected: u64,
    /// Wall time of the cycle.
    pub duration: Duration,
}

impl CycleReport {
    /// Total send failures.
    #[must_use]
    pub const fn send_failures(&self) -> u64 {
        self.queue_full + self.disconnected
    }
}

/// Cumulative broadcast statistics, as exposed on the health endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastStatsSnapshot {
    /// Completed cycles.
    pub cycles: u64,
    /// Updates queued to clients.
    pub updates_sent: u64,
    /// Updates that could not be queued.
    pub send_failures: u64,
    /// Failed rate lookups.
    pub lookup_failures: u64,
    /// End of the last cycle.
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Duration of the last cycle in milliseconds.
    pub last_cycle_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct BroadcastStats {
    cycles: AtomicU64,
    updates_sent: AtomicU64,
    send_failures: AtomicU64,
    lookup_failures: AtomicU64,
    last_cycle: RwLock<Option<(DateTime<Utc>, Duration)>>,
}

impl BroadcastStats {
    fn record(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.updates_sent
            .fetch_add(report.delivered, Ordering::Relaxed);
        self.send_failures
            .fetch_add(report.send_failures(), Ordering::Relaxed);
        self.lookup_failures
            .fetch_add(report.lookup_failures, Ordering::Relaxed);
        *self.last_cycle.write() = Some((Utc::now(), report.duration));
    }

    fn snapshot(&self) -> BroadcastStatsSnapshot {
        let last = *self.last_cycle.read();
        BroadcastStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            updates_sent: self.updates_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            last_cycle_at: last.map(|(at, _)| at),
            last_cycle_ms: last.map(|(_, d)| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Fans rate updates out to all live sessions.
pub struct BroadcastCoordinator {
    registry: Arc<SessionRegistry>,
    source: Arc<dyn RateSource>,
    stats: BroadcastStats,
}

impl BroadcastCoordinator {
    /// Create a coordinator over the live sessions and a rate source.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, source: Arc<dyn RateSource>) -> Self {
        Self {
            registry,
            source,
            stats: BroadcastStats::default(),
        }
    }

    /// Cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run a cycle per tick until cancelled or the tick feed closes.
    pub async fn run(&self, mut ticks: RateTicks, cancel: CancellationToken) {
        info!("Broadcast coordinator started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("Broadcast coordinator shutting down");
                    break;
                }

                changed = ticks.changed() => {
                    if changed.is_err() {
                        info!("Rate feed closed, stopping broadcast");
                        break;
                    }
                    let tick = *ticks.borrow_and_update();
                    let report = self.run_cycle().await;
                    debug!(
                        tick,
                        sessions = report.sessions,
                        lookups = report.lookups,
                        delivered = report.delivered,
                        lookup_failures = report.lookup_failures,
                        send_failures = report.send_failures(),
                        duration_ms = report.duration.as_millis(),
                        "Broadcast cycle complete"
                    );
                }
            }
        }
    }

    /// Run one broadcast cycle over the current live sessions.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let sessions = self.registry.snapshot();
        let mut rates: HashMap<CurrencyPair, Option<RateSnapshot>> = HashMap::new();
        let mut report = CycleReport {
            sessions: sessions.len(),
            ..CycleReport::default()
        };

        for session in &sessions {
            for pair in session.subscriptions().pairs() {
                let snapshot = match rates.entry(pair) {
                    Entry::Occupied(entry) => entry.get().clone(),
                    Entry::Vacant(entry) => {
                        let snapshot = self.lookup(pair).await;
                        if snapshot.is_none() {
                            report.lookup_failures += 1;
                        }
                        entry.insert(snapshot).clone()
                    }
                };

                let Some(snapshot) = snapshot else {
                    continue;
                };

                match session.send(SessionMessage::Rate(snapshot)) {
                    Ok(()) => report.delivered += 1,
                    Err(SendError::QueueFull) => {
                        report.queue_full += 1;
                        debug!(session_id = session.id(), %pair, "Dropped rate update, queue full");
                    }
                    Err(SendError::Disconnected) => {
                        report.disconnected += 1;
                        debug!(session_id = session.id(), %pair, "Session gone, update not sent");
                    }
                }
            }
        }

        report.lookups = rates.len();
        report.duration = started.elapsed();

        self.stats.record(&report);
        metrics::record_updates_sent(report.delivered);
        metrics::record_updates_dropped(DropReason::QueueFull, report.queue_full);
        metrics::record_updates_dropped(DropReason::Disconnected, report.disconnected);
        metrics::record_lookup_failures(report.lookup_failures);
        metrics::record_cycle_duration(report.duration);

        report
    }

    async fn lookup(&self, pair: CurrencyPair) -> Option<RateSnapshot> {
        match self.source.get_rate(pair).await {
            Ok(rate) => Some(RateSnapshot::now(pair, rate)),
            Err(e) => {
                warn!(
                    base = %pair.base(),
                    destination = %pair.destination(),
                    error = %e,
                    "Unable to get updated rate"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for BroadcastCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastCoordinator")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use mockall::predicate::eq;
    use rust_decimal::Decimal;
    use tokio::sync::{Notify, watch};

    use super::*;
    use crate::application::ports::MockRateSource;
    use crate::application::services::session::{SessionSettings, SessionState};
    use crate::domain::currency::Currency;
    use crate::domain::error::RateSourceError;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn usd_eur() -> CurrencyPair {
        CurrencyPair::new(Currency::Usd, Currency::Eur)
    }

    fn usd_gbp() -> CurrencyPair {
        CurrencyPair::new(Currency::Usd, Currency::Gbp)
    }

    fn registry(settings: SessionSettings) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(settings, CancellationToken::new()))
    }

    fn rate_of(message: Option<SessionMessage>) -> (CurrencyPair, Decimal) {
        match message {
            Some(SessionMessage::Rate(snapshot)) => (snapshot.pair, snapshot.rate),
            other => panic!("expected rate update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn distinct_pairs_get_independent_updates() {
        let registry = registry(SessionSettings::default());
        let (session, mut rx) = registry.open();
        session.subscriptions().subscribe(usd_eur()).unwrap();
        session.subscriptions().subscribe(usd_gbp()).unwrap();

        let mut source = MockRateSource::new();
        source
            .expect_get_rate()
            .with(eq(usd_eur()))
            .returning(|_| Ok(dec("0.92")));
        source
            .expect_get_rate()
            .with(eq(usd_gbp()))
            .returning(|_| Ok(dec("0.79")));

        let coordinator = BroadcastCoordinator::new(Arc::clone(&registry), Arc::new(source));
        let report = coordinator.run_cycle().await;

        assert_eq!(report.delivered, 2);
        let mut received = vec![rate_of(rx.recv().await), rate_of(rx.recv().await)];
        received.sort();
        let mut expected = vec![(usd_eur(), dec("0.92")), (usd_gbp(), dec("0.79"))];
        expected.sort();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn lookup_failure_skips_pair_only() {
        let registry = registry(SessionSettings::default());
        let (session, mut rx) = registry.open();
        session.subscriptions().subscribe(usd_eur()).unwrap();
        session.subscriptions().subscribe(usd_gbp()).unwrap();

        let mut source = MockRateSource::new();
        source
            .expect_get_rate()
            .with(eq(usd_eur()))
            .returning(|_| Err(RateSourceError::Computation("boom".to_string())));
        source
            .expect_get_rate()
            .with(eq(usd_gbp()))
            .returning(|_| Ok(dec("0.79")));

        let coordinator = BroadcastCoordinator::new(Arc::clone(&registry), Arc::new(source));
        let report = coordinator.run_cycle().await;

        assert_eq!(report.lookup_failures, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(rate_of(rx.recv().await), (usd_gbp(), dec("0.79")));
        assert!(rx.try_recv().is_err());
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn shared_pair_is_looked_up_once_per_cycle() {
        let registry = registry(SessionSettings::default());
        let (a, mut rx_a) = registry.open();
        let (b, mut rx_b) = registry.open();
        a.subscriptions().subscribe(usd_eur()).unwrap();
        b.subscriptions().subscribe(usd_eur()).unwrap();

        let mut source = MockRateSource::new();
        source
            .expect_get_rate()
            .times(1)
            .returning(|_| Ok(dec("0.90")));

        let coordinator = BroadcastCoordinator::new(Arc::clone(&registry), Arc::new(source));
        let report = coordinator.run_cycle().await;

        assert_eq!(report.lookups, 1);
        assert_eq!(report.delivered, 2);
        assert_eq!(rate_of(rx_a.recv().await), rate_of(rx_b.recv().await));
    }

    #[tokio::test]
    async fn send_failure_is_isolated_to_session() {
        let registry = registry(SessionSettings {
            queue_capacity: 1,
            max_send_failures: 0,
        });
        let (slow, _slow_rx) = registry.open();
        let (healthy, mut healthy_rx) = registry.open();
        slow.subscriptions().subscribe(usd_eur()).unwrap();
        healthy.subscriptions().subscribe(usd_eur()).unwrap();

        let mut source = MockRateSource::new();
        source.expect_get_rate().returning(|_| Ok(dec("0.90")));
        let coordinator = BroadcastCoordinator::new(Arc::clone(&registry), Arc::new(source));

        // First cycle fills the slow session's queue
        coordinator.run_cycle().await;
        healthy_rx.recv().await.unwrap();

        let report = coordinator.run_cycle().await;

        assert_eq!(report.queue_full, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(rate_of(healthy_rx.recv().await), (usd_eur(), dec("0.90")));
        assert_eq!(slow.state(), SessionState::Open);
        assert!(!slow.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn disconnected_session_is_failed_and_others_still_served() {
        let registry = registry(SessionSettings::default());
        let (gone, gone_rx) = registry.open();
        let (alive, mut alive_rx) = registry.open();
        gone.subscriptions().subscribe(usd_eur()).unwrap();
        alive.subscriptions().subscribe(usd_eur()).unwrap();
        drop(gone_rx);

        let mut source = MockRateSource::new();
        source.expect_get_rate().returning(|_| Ok(dec("0.90")));
        let coordinator = BroadcastCoordinator::new(Arc::clone(&registry), Arc::new(source));

        let report = coordinator.run_cycle().await;

        assert_eq!(report.disconnected, 1);
        assert_eq!(report.delivered, 1);
        assert!(gone.cancel_token().is_cancelled());
        assert!(alive_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn closed_sessions_are_not_visited() {
        let registry = registry(SessionSettings::default());
        let (session, mut rx) = registry.open();
        session.subscriptions().subscribe(usd_eur()).unwrap();
        registry.close(session.id());

        let mut source = MockRateSource::new();
        source.expect_get_rate().never();
        let coordinator = BroadcastCoordinator::new(Arc::clone(&registry), Arc::new(source));

        let report = coordinator.run_cycle().await;

        assert_eq!(report.sessions, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stats_accumulate_across_cycles() {
        let registry = registry(SessionSettings::default());
        let (session, _rx) = registry.open();
        session.subscriptions().subscribe(usd_eur()).unwrap();

        let mut source = MockRateSource::new();
        source.expect_get_rate().returning(|_| Ok(dec("0.90")));
        let coordinator = BroadcastCoordinator::new(Arc::clone(&registry), Arc::new(source));

        coordinator.run_cycle().await;
        coordinator.run_cycle().await;

        let stats = coordinator.stats();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.updates_sent, 2);
        assert!(stats.last_cycle_at.is_some());
    }

    /// Source whose first lookup blocks until released.
    struct GatedSource {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RateSource for GatedSource {
        async fn get_rate(&self, _pair: CurrencyPair) -> Result<Decimal, RateSourceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(Decimal::ONE)
        }
    }

    #[tokio::test]
    async fn ticks_during_a_cycle_coalesce_into_one_follow_up() {
        let registry = registry(SessionSettings::default());
        let (session, _rx) = registry.open();
        session.subscriptions().subscribe(usd_eur()).unwrap();

        let source = Arc::new(GatedSource {
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let coordinator = Arc::new(BroadcastCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&source) as Arc<dyn RateSource>,
        ));
        let (tick_tx, ticks) = watch::channel(0_u64);
        let cancel = CancellationToken::new();

        let handle = {
            let coordinator = Arc::clone(&coordinator);
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.run(ticks, cancel).await })
        };

        tick_tx.send_modify(|t| *t += 1);
        source.entered.notified().await;

        // Three ticks while the first cycle is blocked
        for _ in 0..3 {
            tick_tx.send_modify(|t| *t += 1);
        }
        source.release.notify_one();

        tokio::time::timeout(Duration::from_secs(1), async {
            while coordinator.stats().cycles < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(coordinator.stats().cycles, 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_feed_closes() {
        let registry = registry(SessionSettings::default());
        let source = MockRateSource::new();
        let coordinator = BroadcastCoordinator::new(registry, Arc::new(source));
        let (tick_tx, ticks) = watch::channel(0_u64);

        drop(tick_tx);

        tokio::time::timeout(
            Duration::from_secs(1),
            coordinator.run(ticks, CancellationToken::new()),
        )
        .await
        .unwrap();
    }
}
