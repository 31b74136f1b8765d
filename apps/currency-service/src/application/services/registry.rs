//! Live Session Registry
//!
//! Process-wide set of open stream sessions. The accept path inserts, the
//! end of each receive loop removes, and the broadcast coordinator takes
//! snapshots. The lock is held only long enough to clone `Arc`s.
//!
//! Session ids come from a process-local counter, so they never repeat while
//! the process runs. The sessions gauge is written under the same write lock
//! as the map, so concurrent opens and closes cannot publish a stale count.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::session::{InboundRequest, SessionMessage, SessionSettings, SessionState, StreamSession};
use crate::domain::subscription::SessionId;
use crate::infrastructure::metrics;

/// Registry of live stream sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<StreamSession>>>,
    next_id: AtomicU64,
    settings: SessionSettings,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    /// Create an empty registry. Sessions get child tokens of `shutdown`.
    #[must_use]
    pub fn new(settings: SessionSettings, shutdown: CancellationToken) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            settings,
            shutdown,
        }
    }

    /// Open and register a new session.
    pub fn open(&self) -> (Arc<StreamSession>, mpsc::Receiver<SessionMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (session, rx) = StreamSession::new(id, self.settings, self.shutdown.child_token());
        let session = Arc::new(session);

        let count = {
            let mut sessions = self.sessions.write();
            sessions.insert(id, Arc::clone(&session));
            metrics::set_sessions(sessions.len());
            sessions.len()
        };
        info!(session_id = id, sessions = count, "Session opened");

        (session, rx)
    }

    /// Remove a session. Returns `true` if it was registered.
    pub fn close(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(&id).is_some();
        if removed {
            metrics::set_sessions(sessions.len());
        }
        removed
    }

    /// Run a session's receive loop to completion, then remove it.
    ///
    /// Removal happens here and nowhere else, whatever ended the loop.
    pub async fn serve<S, E>(&self, session: Arc<StreamSession>, inbound: S) -> SessionState
    where
        S: Stream<Item = Result<InboundRequest, E>> + Unpin,
        E: std::fmt::Display,
    {
        let state = session.run(inbound).await;
        self.close(session.id());
        info!(
            session_id = session.id(),
            ?state,
            sent = session.stats().sent(),
            dropped = session.stats().dropped(),
            "Session ended"
        );
        state
    }

    /// Copy of the live sessions.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<StreamSession>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Look up a live session.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<StreamSession>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Total subscriptions across live sessions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|session| session.subscriptions().len())
            .sum()
    }
}
