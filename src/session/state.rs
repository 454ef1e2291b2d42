//! Session record and status definitions.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Current Unix time in seconds.
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Where a session sits in the authentication flow.
///
/// Statuses only move forward; `Exchanged`, `Failed`, and `Expired` are
/// terminal and immutable except for garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Created, waiting for the IdP callback.
    PendingCallback,
    /// Callback done, user belongs to several teams.
    AwaitingTeamSelection,
    /// Team fixed, a single exchange is allowed.
    ReadyForExchange,
    /// The one allowed exchange happened.
    Exchanged,
    /// A non-recoverable error occurred.
    Failed,
    /// TTL passed before completion.
    Expired,
}

impl SessionStatus {
    /// Terminal statuses never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exchanged | Self::Failed | Self::Expired)
    }

    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingCallback => "PENDING_CALLBACK",
            Self::AwaitingTeamSelection => "AWAITING_TEAM_SELECTION",
            Self::ReadyForExchange => "READY_FOR_EXCHANGE",
            Self::Exchanged => "EXCHANGED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }
}

/// Identity extracted from the verified ID token / userinfo.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    /// Email address.
    pub email: String,
    /// Display name.
    pub display_name: String,
    /// IdP `sub` claim.
    pub subject: String,
    /// IdP groups, in the order the IdP reported them.
    pub groups: Vec<String>,
}

/// One in-flight authentication flow.
///
/// `session_id` is the only handle ever given to clients; `state` rejoins
/// the browser callback to this record; the PKCE verifier never leaves the
/// broker.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Opaque, URL-safe client handle.
    pub session_id: String,
    /// OAuth `state` parameter sent to the IdP.
    pub state: String,
    /// PKCE code verifier (broker-internal).
    pub pkce_verifier: String,
    /// S256 challenge of the verifier.
    pub pkce_challenge: String,
    /// OIDC nonce, checked against the ID token.
    pub nonce: String,
    /// Flow status.
    pub status: SessionStatus,
    /// Creation time, Unix seconds.
    pub created_at: u64,
    /// Expiry time, Unix seconds. Refreshed on entering `ReadyForExchange`.
    pub expires_at: u64,
    /// Authenticated user; populated after the callback.
    pub user: Option<UserIdentity>,
    /// Teams the user may act as, in deterministic order.
    pub candidate_teams: Vec<String>,
    /// The team this session will exchange as.
    pub selected_team: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_order_forward() {
        assert!(SessionStatus::PendingCallback < SessionStatus::AwaitingTeamSelection);
        assert!(SessionStatus::AwaitingTeamSelection < SessionStatus::ReadyForExchange);
        assert!(SessionStatus::ReadyForExchange < SessionStatus::Exchanged);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!SessionStatus::PendingCallback.is_terminal());
        assert!(!SessionStatus::AwaitingTeamSelection.is_terminal());
        assert!(!SessionStatus::ReadyForExchange.is_terminal());
        assert!(SessionStatus::Exchanged.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Expired.is_terminal());
    }

    #[test]
    fn wire_names_are_screaming_snake() {
        assert_eq!(SessionStatus::PendingCallback.as_str(), "PENDING_CALLBACK");
        assert_eq!(SessionStatus::ReadyForExchange.as_str(), "READY_FOR_EXCHANGE");
        assert_eq!(
            serde_json::to_string(&SessionStatus::AwaitingTeamSelection).unwrap(),
            "\"AWAITING_TEAM_SELECTION\""
        );
    }
}
