//! Subscription Tracking
//!
//! Per-session subscription sets. A session owns exactly one
//! [`SubscriptionSet`]; its receive loop is the only writer and the broadcast
//! coordinator reads a copy of the pairs on every cycle.
//!
//! # Design
//!
//! - A subscribe request is validated before it touches the set, so a
//!   rejected request never changes it.
//! - Within one set no two subscriptions share a pair.
//! - Sets are never shared between sessions; two clients on the same pair
//!   each hold their own subscription.

use std::collections::HashSet;

use parking_lot::RwLock;

use super::currency::CurrencyPair;
use super::error::RateError;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a stream session (one gRPC client).
pub type SessionId = u64;

/// One session's interest in one currency pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Owning session.
    pub session: SessionId,
    /// Subscribed pair.
    pub pair: CurrencyPair,
}

// =============================================================================
// Subscription Set
// =============================================================================

/// The set of pairs one session is subscribed to.
///
/// # Example
///
/// ```rust
/// use currency_service::domain::currency::{Currency, CurrencyPair};
/// use currency_service::domain::subscription::SubscriptionSet;
///
/// let set = SubscriptionSet::new(7);
/// let pair = CurrencyPair::new(Currency::Usd, Currency::Eur);
///
/// assert!(set.subscribe(pair).is_ok());
/// // Subscribing again is rejected and leaves the set unchanged
/// assert!(set.subscribe(pair).is_err());
/// assert_eq!(set.len(), 1);
/// ```
#[derive(Debug)]
pub struct SubscriptionSet {
    session: SessionId,
    pairs: RwLock<HashSet<CurrencyPair>>,
}

impl SubscriptionSet {
    /// Create an empty set for a session.
    #[must_use]
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            pairs: RwLock::new(HashSet::new()),
        }
    }

    /// Owning session.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Validate and record a subscription.
    ///
    /// # Errors
    ///
    /// - [`RateError::SameCurrency`] if base equals destination.
    /// - [`RateError::AlreadyExists`] if the pair is already subscribed.
    ///
    /// The set is unchanged on error.
    pub fn subscribe(&self, pair: CurrencyPair) -> Result<Subscription, RateError> {
        let pair = pair.validate()?;

        if !self.pairs.write().insert(pair) {
            return Err(RateError::AlreadyExists { pair });
        }

        Ok(Subscription {
            session: self.session,
            pair,
        })
    }

    /// Copy of the subscribed pairs. Order is unspecified.
    #[must_use]
    pub fn pairs(&self) -> Vec<CurrencyPair> {
        self.pairs.read().iter().copied().collect()
    }

    /// Whether the pair is subscribed.
    #[must_use]
    pub fn contains(&self, pair: &CurrencyPair) -> bool {
        self.pairs.read().contains(pair)
    }

    /// Number of subscribed pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.read().len()
    }

    /// Whether nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
