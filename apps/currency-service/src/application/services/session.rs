//! Stream Sessions
//!
//! One [`StreamSession`] per connected client. The session's receive loop is
//! the only writer of its subscription set; the broadcast coordinator reads
//! the set and pushes rate updates through [`StreamSession::send`].
//!
//! # Lifecycle
//!
//! ```text
//! Open ──(inbound ends)────────────► Closed
//!   │ ──(server shutdown)──────────► Closed
//!   │ ──(inbound read error)───────► Failed
//!   └─(outbound lost / evicted)────► Failed
//! ```
//!
//! Both terminal states are final. Sends are refused once the session has
//! left `Open`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::currency::{CurrencyPair, RateSnapshot};
use crate::domain::error::RateError;
use crate::domain::subscription::{SessionId, SubscriptionSet};
use crate::infrastructure::metrics::{self, SubscriptionOutcome};

// =============================================================================
// Types
// =============================================================================

/// A decoded inbound request. Requests that failed to decode carry the
/// rejection to send back.
pub type InboundRequest = Result<CurrencyPair, RateError>;

/// A message queued for delivery to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    /// A rate update for a subscribed pair.
    Rate(RateSnapshot),
    /// An in-band rejection of a request.
    Rejected(RateError),
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Receiving requests and accepting sends.
    Open,
    /// Ended cleanly (client closed its side, or server shutdown).
    Closed,
    /// Ended by a transport error or a lost outbound stream.
    Failed,
}

impl SessionState {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Failure to queue a message for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The outbound queue is full; the message was dropped.
    #[error("outbound queue full")]
    QueueFull,
    /// The client's outbound stream is gone or the session has ended.
    #[error("session disconnected")]
    Disconnected,
}

/// Per-session delivery counters.
#[derive(Debug, Default)]
pub struct SessionStats {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl SessionStats {
    /// Messages queued for the client.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Messages dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Settings shared by every session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Outbound queue capacity per session.
    pub queue_capacity: usize,
    /// Consecutive queue-full drops that evict a session. `0` never evicts.
    pub max_send_failures: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_send_failures: 0,
        }
    }
}

/// One client's live bidirectional stream.
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    subscriptions: SubscriptionSet,
    outbound: mpsc::Sender<SessionMessage>,
    cancel: CancellationToken,
    state: RwLock<SessionState>,
    outbound_lost: AtomicBool,
    consecutive_failures: AtomicU32,
    max_send_failures: u32,
    stats: SessionStats,
}

impl StreamSession {
    /// Create a session and the receiving half of its outbound queue.
    ///
    /// `cancel` should be a child of the server's shutdown token.
    #[must_use]
    pub fn new(
        id: SessionId,
        settings: SessionSettings,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<SessionMessage>) {
        let (outbound, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let session = Self {
            id,
            subscriptions: SubscriptionSet::new(id),
            outbound,
            cancel,
            state: RwLock::new(SessionState::Open),
            outbound_lost: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            max_send_failures: settings.max_send_failures,
            stats: SessionStats::default(),
        };
        (session, rx)
    }

    /// Session identity.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// The session's subscriptions.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    /// Delivery counters.
    #[must_use]
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Cancellation token observed by the receive loop.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queue a message for the client without waiting.
    ///
    /// A lost outbound stream cancels the session. Queue-full drops cancel it
    /// only once `max_send_failures` consecutive drops have been reached.
    ///
    /// # Errors
    ///
    /// - [`SendError::QueueFull`] if the outbound queue is full.
    /// - [`SendError::Disconnected`] if the client's stream is gone or the
    ///   session has ended.
    pub fn send(&self, message: SessionMessage) -> Result<(), SendError> {
        if self.cancel.is_cancelled() || self.state().is_terminal() {
            return Err(SendError::Disconnected);
        }

        match self.outbound.try_send(message) {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if self.max_send_failures > 0 && failures >= self.max_send_failures {
                    warn!(
                        session_id = self.id,
                        failures, "Evicting session after consecutive send failures"
                    );
                    self.mark_outbound_lost();
                }
                Err(SendError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = self.id, "Outbound stream closed");
                self.mark_outbound_lost();
                Err(SendError::Disconnected)
            }
        }
    }

    fn mark_outbound_lost(&self) {
        self.outbound_lost.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    /// Run the receive loop until the client closes, the transport fails, or
    /// the session is cancelled. Returns the terminal state.
    ///
    /// Inbound requests are processed in order. Rejected requests produce one
    /// in-band error message and the loop continues.
    pub async fn run<S, E>(&self, mut inbound: S) -> SessionState
    where
        S: Stream<Item = Result<InboundRequest, E>> + Unpin,
        E: std::fmt::Display,
    {
        let state = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    break if self.outbound_lost.load(Ordering::Acquire) {
                        SessionState::Failed
                    } else {
                        SessionState::Closed
                    };
                }

                next = inbound.next() => match next {
                    None => {
                        debug!(session_id = self.id, "Client closed stream");
                        break SessionState::Closed;
                    }
                    Some(Err(e)) => {
                        error!(session_id = self.id, error = %e, "Error receiving from client");
                        break SessionState::Failed;
                    }
                    Some(Ok(request)) => self.handle(request),
                }
            }
        };

        *self.state.write() = state;
        // Stops any send racing with termination.
        self.cancel.cancel();
        state
    }

    fn handle(&self, request: InboundRequest) {
        let result = request.and_then(|pair| self.subscriptions.subscribe(pair));

        match result {
            Ok(subscription) => {
                info!(
                    session_id = self.id,
                    base = %subscription.pair.base(),
                    destination = %subscription.pair.destination(),
                    "Subscribed to rate updates"
                );
                metrics::record_subscription(SubscriptionOutcome::Accepted);
            }
            Err(rejection) => self.reject(rejection),
        }
    }

    fn reject(&self, rejection: RateError) {
        warn!(session_id = self.id, error = %rejection, "Rejecting request");
        metrics::record_subscription(SubscriptionOutcome::Rejected);
        metrics::record_request_rejected(rejection.code());

        if let Err(e) = self.send(SessionMessage::Rejected(rejection)) {
            warn!(session_id = self.id, error = %e, "Unable to send rejection");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
