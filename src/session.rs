//! Checkpoint session coordination.
//!
//! Every inbound confirmation tool call opens one session: an opaque id, a
//! oneshot resolver, and a bounded wait. The presentation layer (outside
//! this crate) is handed the session via the injected [`Presenter`] and is
//! expected to call [`SessionCoordinator::resolve_session`] once a human
//! answers. Silence resolves the session to "don't continue" after the
//! configured timeout (24 hours by default).
//!
//! Sessions are fully independent: any number may be open at once, and
//! resolving or timing out one never touches another. Records are ephemeral
//! and live only in the in-process map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default wait before a silent session resolves negatively.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// The answer a checkpoint call resumes with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointOutcome {
    pub should_continue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_instruction: Option<String>,
}

impl CheckpointOutcome {
    /// The safe default: stop. Used for timeouts, disposal, and shutdown.
    pub fn halt() -> Self {
        Self {
            should_continue: false,
            user_instruction: None,
        }
    }

    pub fn proceed(user_instruction: Option<String>) -> Self {
        Self {
            should_continue: true,
            user_instruction,
        }
    }
}

/// Surface a pending session to a human. Implemented by the host's dialog
/// layer; must eventually call back into `resolve_session`.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn present(&self, session_id: &str, summary: &str, reason: &str);
}

/// Read-only snapshot of a live session, for host-side listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub summary: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

struct PendingSession {
    summary: String,
    reason: String,
    created_at: DateTime<Utc>,
    seq: u64,
    /// Taken exactly once; `None` means the session is already resolved.
    resolver: Option<oneshot::Sender<CheckpointOutcome>>,
}

/// Coordinates all open confirmation sessions.
pub struct SessionCoordinator {
    sessions: Mutex<HashMap<String, PendingSession>>,
    presenter: RwLock<Option<Arc<dyn Presenter>>>,
    timeout: Duration,
    next_seq: AtomicU64,
    shutting_down: AtomicBool,
}

impl SessionCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            presenter: RwLock::new(None),
            timeout,
            next_seq: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Inject the presentation callback. Replaces any previous one.
    pub fn set_presenter(&self, presenter: Arc<dyn Presenter>) {
        *self.presenter.write() = Some(presenter);
    }

    /// Open a session and wait for its resolution or timeout.
    ///
    /// Never errors: during shutdown, or when the wait expires, the result
    /// is the safe negative outcome. The session is removed from the live
    /// set on every exit path, including cancellation of this future.
    pub async fn open_session(&self, summary: &str, reason: &str) -> CheckpointOutcome {
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!("checkpoint requested during shutdown; answering halt");
            return CheckpointOutcome::halt();
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut sessions = self.sessions.lock();
            sessions.insert(
                id.clone(),
                PendingSession {
                    summary: summary.to_string(),
                    reason: reason.to_string(),
                    created_at: Utc::now(),
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    resolver: Some(tx),
                },
            );
        }
        // Removes the map entry even if this future is dropped mid-wait.
        let _cleanup = SessionCleanup {
            coordinator: self,
            id: &id,
        };

        let presenter = self.presenter.read().clone();
        match presenter {
            Some(p) => p.present(&id, summary, reason).await,
            None => warn!(session_id = %id, "no presenter wired; session will wait for timeout"),
        }

        // `timeout` polls the receiver before the timer, so a resolution
        // arriving in the same tick as expiry wins the race. The timer is
        // dropped with this future; nothing to clear by hand.
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Resolver dropped without an answer (disposal already sent one
            // on every path that takes it; this is belt and braces).
            Ok(Err(_)) => CheckpointOutcome::halt(),
            Err(_elapsed) => {
                debug!(session_id = %id, "checkpoint session timed out");
                CheckpointOutcome::halt()
            }
        }
    }

    /// Fulfill a pending session exactly once.
    ///
    /// Returns `true` if this call performed the resolution. A second call
    /// for the same id, or a call for an unknown id, is a harmless no-op.
    pub fn resolve_session(&self, id: &str, outcome: CheckpointOutcome) -> bool {
        let resolver = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(id) {
                Some(session) => session.resolver.take(),
                None => None,
            }
        };
        match resolver {
            Some(tx) => {
                // A receiver dropped by a canceled waiter is not an error.
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!(session_id = %id, "resolve for unknown or already-resolved session");
                false
            }
        }
    }

    /// Resolve every pending session negatively and refuse new ones.
    ///
    /// Called when the presentation layer is torn down: a live session must
    /// never leave its caller's future hanging.
    pub fn dispose_all(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let mut sessions = self.sessions.lock();
        for (id, session) in sessions.iter_mut() {
            if let Some(tx) = session.resolver.take() {
                debug!(session_id = %id, "disposing pending session");
                let _ = tx.send(CheckpointOutcome::halt());
            }
        }
        sessions.clear();
    }

    /// Look up one session by id.
    pub fn session(&self, id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.lock();
        sessions.get(id).map(|s| SessionInfo {
            id: id.to_string(),
            summary: s.summary.clone(),
            reason: s.reason.clone(),
            created_at: s.created_at,
        })
    }

    /// The most recently opened live session, for callers that address
    /// "whatever is currently open" rather than a specific id.
    pub fn latest_session(&self) -> Option<SessionInfo> {
        let sessions = self.sessions.lock();
        sessions
            .iter()
            .max_by_key(|(_, s)| s.seq)
            .map(|(id, s)| SessionInfo {
                id: id.clone(),
                summary: s.summary.clone(),
                reason: s.reason.clone(),
                created_at: s.created_at,
            })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn remove_session(&self, id: &str) {
        self.sessions.lock().remove(id);
    }
}

struct SessionCleanup<'a> {
    coordinator: &'a SessionCoordinator,
    id: &'a str,
}

impl Drop for SessionCleanup<'_> {
    fn drop(&mut self) {
        self.coordinator.remove_session(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn coordinator(timeout: Duration) -> Arc<SessionCoordinator> {
        Arc::new(SessionCoordinator::new(timeout))
    }

    /// Presenter that records the session id it was shown.
    struct Capture(Mutex<Option<String>>);

    #[async_trait]
    impl Presenter for Capture {
        async fn present(&self, session_id: &str, _summary: &str, _reason: &str) {
            *self.0.lock() = Some(session_id.to_string());
        }
    }

    #[tokio::test]
    async fn resolve_fulfills_waiting_caller() {
        let coord = coordinator(Duration::from_secs(5));
        let capture = Arc::new(Capture(Mutex::new(None)));
        coord.set_presenter(capture.clone());

        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.open_session("built the parser", "turn done").await })
        };
        // Wait until the presenter has seen the session.
        let id = loop {
            if let Some(id) = capture.0.lock().clone() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        assert!(coord.resolve_session(
            &id,
            CheckpointOutcome::proceed(Some("keep going".into()))
        ));
        let outcome = waiter.await.unwrap();
        assert!(outcome.should_continue);
        assert_eq!(outcome.user_instruction.as_deref(), Some("keep going"));
        assert_eq!(coord.session_count(), 0);
    }

    #[tokio::test]
    async fn second_resolve_is_a_noop() {
        let coord = coordinator(Duration::from_secs(5));
        let capture = Arc::new(Capture(Mutex::new(None)));
        coord.set_presenter(capture.clone());

        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.open_session("s", "r").await })
        };
        let id = loop {
            if let Some(id) = capture.0.lock().clone() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        assert!(coord.resolve_session(&id, CheckpointOutcome::proceed(None)));
        assert!(!coord.resolve_session(&id, CheckpointOutcome::halt()));

        let outcome = waiter.await.unwrap();
        // The first resolution is the one the caller observed.
        assert!(outcome.should_continue);
    }

    #[tokio::test]
    async fn timeout_resolves_negative_and_removes_session() {
        let coord = coordinator(Duration::from_millis(30));
        let outcome = coord.open_session("slow", "nobody answers").await;
        assert!(!outcome.should_continue);
        assert_eq!(coord.session_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_sessions_resolve_independently_in_reverse_order() {
        let coord = coordinator(Duration::from_secs(10));

        let mut waiters = Vec::new();
        for i in 0..4 {
            let coord = coord.clone();
            waiters.push(tokio::spawn(async move {
                coord.open_session(&format!("step {i}"), "batch").await
            }));
        }
        while coord.session_count() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Collect ids in open order.
        let ids: Vec<String> = {
            let sessions = coord.sessions.lock();
            let mut entries: Vec<_> = sessions.iter().map(|(id, s)| (s.seq, id.clone())).collect();
            entries.sort_by_key(|(seq, _)| *seq);
            entries.into_iter().map(|(_, id)| id).collect()
        };

        for (i, id) in ids.iter().enumerate().rev() {
            assert!(coord.resolve_session(
                id,
                CheckpointOutcome::proceed(Some(format!("answer {i}")))
            ));
        }

        for (i, waiter) in waiters.into_iter().enumerate() {
            let outcome = waiter.await.unwrap();
            assert!(outcome.should_continue, "session {i}");
        }
        assert_eq!(coord.session_count(), 0);
    }

    #[tokio::test]
    async fn dispose_resolves_every_pending_session() {
        let coord = coordinator(Duration::from_secs(10));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let coord = coord.clone();
                tokio::spawn(async move { coord.open_session("pending", "dispose test").await })
            })
            .collect();
        while coord.session_count() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        coord.dispose_all();
        for waiter in waiters {
            let outcome = waiter.await.unwrap();
            assert!(!outcome.should_continue);
        }
        assert_eq!(coord.session_count(), 0);
    }

    #[tokio::test]
    async fn open_during_shutdown_returns_halt_instead_of_erroring() {
        let coord = coordinator(Duration::from_secs(10));
        coord.dispose_all();
        let outcome = coord.open_session("late", "already shutting down").await;
        assert!(!outcome.should_continue);
        assert_eq!(coord.session_count(), 0);
    }

    #[tokio::test]
    async fn latest_session_tracks_most_recent_open() {
        let coord = coordinator(Duration::from_secs(10));
        let _w1 = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.open_session("first", "a").await })
        };
        while coord.session_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _w2 = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.open_session("second", "b").await })
        };
        while coord.session_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let latest = coord.latest_session().expect("a live session");
        assert_eq!(latest.summary, "second");
        assert!(coord.session(&latest.id).is_some());
        coord.dispose_all();
    }
}
