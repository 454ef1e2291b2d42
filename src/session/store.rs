//! Concurrent session store with two indices and atomic status transitions.
//!
//! # Design
//!
//! Records are indexed by **session id** (the client handle) and by the
//! OAuth **state** parameter (to rejoin browser callbacks), both pointing at
//! the same record. All mutation goes through [`SessionStore::transition`],
//! a compare-and-swap on `status` made linearizable per record by the map's
//! per-entry locking; concurrent transitions on one session see exactly one
//! winner.
//!
//! Expiry is enforced twice: lazily on access, and by a background sweeper
//! that marks overdue sessions `EXPIRED` and drops them after a grace
//! window so late pollers get a clean `SESSION_EXPIRED` before the record
//! disappears entirely.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::DashMap;
use rand::Rng;
use tracing::debug;

use super::state::{now_unix, SessionState, SessionStatus};
use crate::{Error, Result};

/// How often the background sweeper runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How long an `EXPIRED` (or otherwise terminal) record stays retrievable.
const GRACE_SECS: u64 = 60;

/// In-memory session store backed by two `DashMap` indices.
///
/// - `by_session_id`: session id → `SessionState`
/// - `by_state`:      OAuth state → session id
pub struct SessionStore {
    by_session_id: DashMap<String, SessionState>,
    by_state: DashMap<String, String>,
    max_sessions: usize,
    pending_ttl_secs: u64,
}

impl SessionStore {
    /// Create an empty store with the given ceiling and pending TTL.
    #[must_use]
    pub fn new(max_sessions: usize, pending_ttl_secs: u64) -> Self {
        Self {
            by_session_id: DashMap::new(),
            by_state: DashMap::new(),
            max_sessions,
            pending_ttl_secs,
        }
    }

    /// Number of live records (any status, pre-GC).
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_session_id.len()
    }

    /// `true` when the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_session_id.is_empty()
    }

    /// Create a new `PENDING_CALLBACK` session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backpressure`] when the store is at capacity.
    pub fn create(
        &self,
        pkce_verifier: String,
        pkce_challenge: String,
        nonce: String,
    ) -> Result<SessionState> {
        if self.by_session_id.len() >= self.max_sessions {
            return Err(Error::Backpressure);
        }

        let now = now_unix();
        let session = SessionState {
            session_id: generate_session_id(),
            state: generate_opaque(),
            pkce_verifier,
            pkce_challenge,
            nonce,
            status: SessionStatus::PendingCallback,
            created_at: now,
            expires_at: now + self.pending_ttl_secs,
            user: None,
            candidate_teams: Vec::new(),
            selected_team: None,
        };

        self.by_state
            .insert(session.state.clone(), session.session_id.clone());
        self.by_session_id
            .insert(session.session_id.clone(), session.clone());

        Ok(session)
    }

    /// Look up a session by the OAuth `state` parameter.
    ///
    /// Overdue records are marked `EXPIRED` before being returned, so the
    /// caller sees the post-expiry status.
    #[must_use]
    pub fn find_by_state(&self, state: &str) -> Option<SessionState> {
        let session_id = self.by_state.get(state)?.clone();
        self.find_by_session(&session_id)
    }

    /// Look up a session by its id, lazily marking expiry.
    ///
    /// Records past the grace window are evicted on access, so a session is
    /// never retrievable once `expires_at + 60s` has passed, regardless of
    /// when the sweeper last ran.
    #[must_use]
    pub fn find_by_session(&self, session_id: &str) -> Option<SessionState> {
        if self.evict_if_past_grace(session_id) {
            return None;
        }
        let mut entry = self.by_session_id.get_mut(session_id)?;
        mark_if_overdue(&mut entry);
        Some(entry.clone())
    }

    /// Atomically move a session from `from` to `to`, applying `mutate`
    /// while the record is exclusively held.
    ///
    /// The returned snapshot reflects the record *after* the transition.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] — unknown id (or already swept)
    /// - [`Error::SessionExpired`] — TTL passed (record marked `EXPIRED`)
    /// - [`Error::SessionAlreadyUsed`] — record is `EXCHANGED`
    /// - [`Error::SessionNotReady`] — any other status mismatch
    pub fn transition<F>(
        &self,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
        mutate: F,
    ) -> Result<SessionState>
    where
        F: FnOnce(&mut SessionState),
    {
        if self.evict_if_past_grace(session_id) {
            return Err(Error::SessionNotFound);
        }
        let mut entry = self
            .by_session_id
            .get_mut(session_id)
            .ok_or(Error::SessionNotFound)?;

        mark_if_overdue(&mut entry);

        if entry.status != from {
            return Err(status_error(entry.status));
        }

        mutate(&mut entry);
        entry.status = to;
        Ok(entry.clone())
    }

    /// Best-effort move to `FAILED` from any non-terminal status.
    pub fn fail(&self, session_id: &str) {
        if let Some(mut entry) = self.by_session_id.get_mut(session_id) {
            if !entry.status.is_terminal() {
                entry.status = SessionStatus::Failed;
            }
        }
    }

    /// Move a claimed exchange to `FAILED`.
    ///
    /// The exchange path claims its session (`READY_FOR_EXCHANGE` →
    /// `EXCHANGED`) before talking to Vault; when the mint then fails, the
    /// claim is rewritten to `FAILED` so later attempts see
    /// `SESSION_NOT_READY` rather than a phantom success.
    pub fn fail_exchange(&self, session_id: &str) {
        if let Some(mut entry) = self.by_session_id.get_mut(session_id) {
            if entry.status == SessionStatus::Exchanged {
                entry.status = SessionStatus::Failed;
            }
        }
    }

    /// Drop a record past its grace window, cleaning both indices.
    /// Returns `true` when the record was evicted.
    fn evict_if_past_grace(&self, session_id: &str) -> bool {
        let Some(entry) = self.by_session_id.get(session_id) else {
            return false;
        };
        if now_unix() <= entry.expires_at + GRACE_SECS {
            return false;
        }
        let state = entry.state.clone();
        drop(entry);
        self.by_session_id.remove(session_id);
        self.by_state.remove(&state);
        debug!(%session_id, "Lazy-evicted session past grace window");
        true
    }

    /// Mark overdue sessions `EXPIRED` and drop records past the grace
    /// window. Returns the number of records removed.
    pub fn sweep(&self) -> usize {
        let now = now_unix();

        // Phase 1: mark. Collect ids first; get_mut during iteration would
        // deadlock on the same shard.
        let overdue: Vec<String> = self
            .by_session_id
            .iter()
            .filter(|e| !e.value().status.is_terminal() && now > e.value().expires_at)
            .map(|e| e.key().clone())
            .collect();
        for id in overdue {
            if let Some(mut entry) = self.by_session_id.get_mut(&id) {
                if !entry.status.is_terminal() {
                    debug!(session_id = %id, "Session expired");
                    entry.status = SessionStatus::Expired;
                }
            }
        }

        // Phase 2: drop everything past expiry + grace, regardless of status.
        let removable: Vec<(String, String)> = self
            .by_session_id
            .iter()
            .filter(|e| now > e.value().expires_at + GRACE_SECS)
            .map(|e| (e.key().clone(), e.value().state.clone()))
            .collect();

        let count = removable.len();
        for (id, state) in removable {
            self.by_session_id.remove(&id);
            self.by_state.remove(&state);
            debug!(session_id = %id, "Swept session");
        }
        count
    }
}

/// Mark a record `EXPIRED` when its TTL has passed.
fn mark_if_overdue(entry: &mut SessionState) {
    if !entry.status.is_terminal() && now_unix() > entry.expires_at {
        entry.status = SessionStatus::Expired;
    }
}

/// Map a status mismatch to the client-facing error.
fn status_error(current: SessionStatus) -> Error {
    match current {
        SessionStatus::Expired => Error::SessionExpired,
        SessionStatus::Exchanged => Error::SessionAlreadyUsed,
        _ => Error::SessionNotReady,
    }
}

/// `sess_<22-char base64url>` — 128 bits of entropy, greppable prefix.
fn generate_session_id() -> String {
    format!("sess_{}", generate_opaque())
}

/// 16 random bytes, base64url.
fn generate_opaque() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Spawn a background task sweeping the store every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = store.sweep();
                    if swept > 0 {
                        debug!(count = swept, "Swept expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session sweeper shutting down");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(100, 600)
    }

    fn create_in(store: &SessionStore) -> SessionState {
        store
            .create("verifier".into(), "challenge".into(), "nonce".into())
            .unwrap()
    }

    #[test]
    fn create_indexes_by_both_keys() {
        // GIVEN: a fresh session
        let s = store();
        let session = create_in(&s);

        // THEN: retrievable via both indices, status pending
        let by_id = s.find_by_session(&session.session_id).unwrap();
        let by_state = s.find_by_state(&session.state).unwrap();
        assert_eq!(by_id.session_id, by_state.session_id);
        assert_eq!(by_id.status, SessionStatus::PendingCallback);
        assert!(by_id.session_id.starts_with("sess_"));
    }

    #[test]
    fn ids_and_states_are_unique() {
        let s = store();
        let a = create_in(&s);
        let b = create_in(&s);
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.state, b.state);
    }

    #[test]
    fn create_rejects_at_capacity() {
        // GIVEN: a store with room for one session
        let s = SessionStore::new(1, 600);
        create_in(&s);

        // WHEN: creating a second
        let err = s
            .create("v".into(), "c".into(), "n".into())
            .unwrap_err();

        // THEN: backpressure
        assert!(matches!(err, Error::Backpressure));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn transition_moves_status_and_applies_mutation() {
        let s = store();
        let session = create_in(&s);

        let updated = s
            .transition(
                &session.session_id,
                SessionStatus::PendingCallback,
                SessionStatus::ReadyForExchange,
                |rec| rec.selected_team = Some("mobile-team".into()),
            )
            .unwrap();

        assert_eq!(updated.status, SessionStatus::ReadyForExchange);
        assert_eq!(updated.selected_team.as_deref(), Some("mobile-team"));
    }

    #[test]
    fn transition_rejects_wrong_from_status() {
        let s = store();
        let session = create_in(&s);

        let err = s
            .transition(
                &session.session_id,
                SessionStatus::ReadyForExchange,
                SessionStatus::Exchanged,
                |_| {},
            )
            .unwrap_err();

        assert!(matches!(err, Error::SessionNotReady));
    }

    #[test]
    fn second_exchange_sees_already_used() {
        let s = store();
        let session = create_in(&s);
        s.transition(
            &session.session_id,
            SessionStatus::PendingCallback,
            SessionStatus::ReadyForExchange,
            |_| {},
        )
        .unwrap();

        // First exchange claims the session
        s.transition(
            &session.session_id,
            SessionStatus::ReadyForExchange,
            SessionStatus::Exchanged,
            |_| {},
        )
        .unwrap();

        // Second sees ALREADY_USED
        let err = s
            .transition(
                &session.session_id,
                SessionStatus::ReadyForExchange,
                SessionStatus::Exchanged,
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, Error::SessionAlreadyUsed));
    }

    #[test]
    fn unknown_session_is_not_found() {
        let s = store();
        let err = s
            .transition(
                "sess_nope",
                SessionStatus::ReadyForExchange,
                SessionStatus::Exchanged,
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound));
    }

    #[test]
    fn overdue_session_expires_lazily() {
        // GIVEN: a session whose TTL already passed
        let s = store();
        let session = create_in(&s);
        s.by_session_id
            .get_mut(&session.session_id)
            .unwrap()
            .expires_at = now_unix() - 1;

        // WHEN: any access
        let found = s.find_by_session(&session.session_id).unwrap();
        assert_eq!(found.status, SessionStatus::Expired);

        // THEN: transitions report SESSION_EXPIRED
        let err = s
            .transition(
                &session.session_id,
                SessionStatus::PendingCallback,
                SessionStatus::ReadyForExchange,
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, Error::SessionExpired));
    }

    #[test]
    fn fail_is_sticky_but_never_unterminates() {
        let s = store();
        let session = create_in(&s);

        s.fail(&session.session_id);
        assert_eq!(
            s.find_by_session(&session.session_id).unwrap().status,
            SessionStatus::Failed
        );

        // Failing an exchanged session does nothing
        let session2 = create_in(&s);
        s.transition(
            &session2.session_id,
            SessionStatus::PendingCallback,
            SessionStatus::ReadyForExchange,
            |_| {},
        )
        .unwrap();
        s.transition(
            &session2.session_id,
            SessionStatus::ReadyForExchange,
            SessionStatus::Exchanged,
            |_| {},
        )
        .unwrap();
        s.fail(&session2.session_id);
        assert_eq!(
            s.find_by_session(&session2.session_id).unwrap().status,
            SessionStatus::Exchanged
        );
    }

    #[test]
    fn failed_mint_rewrites_the_claim_to_failed() {
        let s = store();
        let session = create_in(&s);
        s.transition(
            &session.session_id,
            SessionStatus::PendingCallback,
            SessionStatus::ReadyForExchange,
            |_| {},
        )
        .unwrap();
        s.transition(
            &session.session_id,
            SessionStatus::ReadyForExchange,
            SessionStatus::Exchanged,
            |_| {},
        )
        .unwrap();

        s.fail_exchange(&session.session_id);
        assert_eq!(
            s.find_by_session(&session.session_id).unwrap().status,
            SessionStatus::Failed
        );

        // Later exchange attempts see a generic not-ready, not already-used
        let err = s
            .transition(
                &session.session_id,
                SessionStatus::ReadyForExchange,
                SessionStatus::Exchanged,
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotReady));

        // On a non-claimed session fail_exchange is a no-op
        let other = create_in(&s);
        s.fail_exchange(&other.session_id);
        assert_eq!(
            s.find_by_session(&other.session_id).unwrap().status,
            SessionStatus::PendingCallback
        );
    }

    #[test]
    fn sweep_marks_then_drops_after_grace() {
        let s = store();
        let session = create_in(&s);

        // Overdue but within grace: marked EXPIRED, still retrievable
        s.by_session_id
            .get_mut(&session.session_id)
            .unwrap()
            .expires_at = now_unix() - 1;
        assert_eq!(s.sweep(), 0);
        assert_eq!(
            s.find_by_session(&session.session_id).unwrap().status,
            SessionStatus::Expired
        );

        // Past the grace window: dropped from both indices
        s.by_session_id
            .get_mut(&session.session_id)
            .unwrap()
            .expires_at = now_unix() - GRACE_SECS - 5;
        assert_eq!(s.sweep(), 1);
        assert!(s.find_by_session(&session.session_id).is_none());
        assert!(s.find_by_state(&session.state).is_none());
    }

    #[test]
    fn past_grace_sessions_are_evicted_on_access() {
        // Even without the sweeper, a long-overdue session is gone
        let s = store();
        let session = create_in(&s);
        s.by_session_id
            .get_mut(&session.session_id)
            .unwrap()
            .expires_at = now_unix() - GRACE_SECS - 5;

        assert!(s.find_by_session(&session.session_id).is_none());
        assert!(s.find_by_state(&session.state).is_none());
        assert_eq!(s.len(), 0);

        // Transitions on an evicted session report not-found
        let session = create_in(&s);
        s.by_session_id
            .get_mut(&session.session_id)
            .unwrap()
            .expires_at = now_unix() - GRACE_SECS - 5;
        let err = s
            .transition(
                &session.session_id,
                SessionStatus::PendingCallback,
                SessionStatus::ReadyForExchange,
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound));
    }

    #[test]
    fn sweep_leaves_live_sessions_alone() {
        let s = store();
        let session = create_in(&s);
        assert_eq!(s.sweep(), 0);
        assert!(s.find_by_session(&session.session_id).is_some());
    }
}
