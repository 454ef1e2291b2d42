//! Audit logging for session lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with the serialized event in
//! an `audit` field, queryable by any log aggregator. Session ids and team
//! names are logged; token material and PKCE secrets never are.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `session.created` | A new flow starts via `/cli/start` or `/auth/login` |
//! | `session.authenticated` | The IdP callback verified the user |
//! | `session.team_selected` | The user picked a team context |
//! | `token.issued` | A Vault child token was minted for the session |
//! | `session.denied` | Verification, resolution, or Vault refused the flow |

use serde::Serialize;

/// Structured audit event for one session lifecycle transition.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"token.issued"`).
    pub event: &'static str,
    /// Session the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// User email (post-callback events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Selected team.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Candidate teams (for `session.authenticated`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_teams: Option<Vec<String>>,
    /// Policies on the issued token (for `token.issued`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies: Option<Vec<String>>,
    /// Human-readable reason for denial events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn base(event: &'static str, session_id: &str) -> Self {
        Self {
            event,
            session_id: Some(session_id.to_string()),
            user: None,
            team: None,
            candidate_teams: None,
            policies: None,
            reason: None,
        }
    }

    /// Construct a `session.created` event.
    #[must_use]
    pub fn created(session_id: &str) -> Self {
        Self::base("session.created", session_id)
    }

    /// Construct a `session.authenticated` event.
    #[must_use]
    pub fn authenticated(session_id: &str, user: &str, candidates: &[String]) -> Self {
        Self {
            user: Some(user.to_string()),
            candidate_teams: Some(candidates.to_vec()),
            ..Self::base("session.authenticated", session_id)
        }
    }

    /// Construct a `session.team_selected` event.
    #[must_use]
    pub fn team_selected(session_id: &str, team: &str) -> Self {
        Self {
            team: Some(team.to_string()),
            ..Self::base("session.team_selected", session_id)
        }
    }

    /// Construct a `token.issued` event.
    #[must_use]
    pub fn issued(session_id: &str, user: &str, team: &str, policies: &[String]) -> Self {
        Self {
            user: Some(user.to_string()),
            team: Some(team.to_string()),
            policies: Some(policies.to_vec()),
            ..Self::base("token.issued", session_id)
        }
    }

    /// Construct a `session.denied` event.
    #[must_use]
    pub fn denied(session_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            event: "session.denied",
            session_id: session_id.map(str::to_string),
            user: None,
            team: None,
            candidate_teams: None,
            policies: None,
            reason: Some(reason.into()),
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "broker audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_event_carries_team_and_policies() {
        let event = AuditEvent::issued(
            "sess_abc",
            "alice@ex.com",
            "mobile-team",
            &["base".to_string(), "mobile-team".to_string()],
        );
        assert_eq!(event.event, "token.issued");
        assert_eq!(event.team.as_deref(), Some("mobile-team"));
        assert_eq!(event.policies.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn denied_event_keeps_reason_and_optional_session() {
        let event = AuditEvent::denied(None, "no team assignment");
        assert_eq!(event.event, "session.denied");
        assert!(event.session_id.is_none());
        assert_eq!(event.reason.as_deref(), Some("no team assignment"));
    }

    #[test]
    fn events_serialize_without_null_noise() {
        let json = serde_json::to_string(&AuditEvent::created("sess_abc")).unwrap();
        assert!(json.contains("session.created"));
        assert!(!json.contains("null"));
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&AuditEvent::team_selected("sess_abc", "backend-team"));
    }
}
