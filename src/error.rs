//! Error types for the Vault auth broker

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the broker
pub type Result<T> = std::result::Result<T, Error>;

/// Broker errors
///
/// Every variant maps to exactly one wire-visible error kind and HTTP status
/// via [`Error::wire_kind`] and [`Error::http_status`]. Internal detail stays
/// in the variant payload and is logged at the HTTP boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing env, bad key material). Exit code 1.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session store is at capacity
    #[error("Session store at capacity, try again later")]
    Backpressure,

    /// OAuth `state` parameter missing, unknown, or mismatched
    #[error("State parameter missing or mismatched")]
    InvalidState,

    /// ID token failed signature, issuer, audience, or time validation
    #[error("ID token invalid: {0}")]
    IdTokenInvalid(String),

    /// ID token nonce does not match the session nonce
    #[error("Nonce mismatch between session and ID token")]
    NonceMismatch,

    /// IdP token endpoint refused the authorization code
    #[error("Authorization code exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// No IdP group mapped to a known team
    #[error("No recognized team membership for this user")]
    NoTeamAssignment,

    /// Selected team is not among the session's candidates
    #[error("Team not available for this session: {0}")]
    InvalidTeamSelection(String),

    /// Unknown session id
    #[error("Unknown session")]
    SessionNotFound,

    /// Session exists but is not in `READY_FOR_EXCHANGE`
    #[error("Session is not ready for exchange")]
    SessionNotReady,

    /// Session TTL has passed
    #[error("Session expired")]
    SessionExpired,

    /// Session was already exchanged once
    #[error("Session already exchanged")]
    SessionAlreadyUsed,

    /// A caller-supplied metadata field exceeds the size bound
    #[error("Metadata field too large: {0}")]
    MetadataTooLarge(&'static str),

    /// Transport failure talking to the IdP
    #[error("IdP unreachable: {0}")]
    IdpUnreachable(String),

    /// IdP answered with something unusable (non-2xx, unparseable body)
    #[error("IdP returned an unusable response: {0}")]
    IdpBadResponse(String),

    /// Transport failure talking to Vault
    #[error("Vault unreachable: {0}")]
    VaultUnreachable(String),

    /// Vault rejected the broker JWT login
    #[error("Vault rejected broker authentication: {0}")]
    VaultAuthRejected(String),

    /// Vault JWT role or token role does not exist
    #[error("Vault role missing: {0}")]
    VaultRoleMissing(String),

    /// Token role forbids the requested policies
    #[error("Vault denied requested policies: {0}")]
    VaultPolicyDenied(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unclassified internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wire-visible `error` field value for this error.
    #[must_use]
    pub fn wire_kind(&self) -> &'static str {
        match self {
            Self::Backpressure => "BACKPRESSURE",
            Self::InvalidState => "INVALID_STATE",
            Self::IdTokenInvalid(_) => "ID_TOKEN_INVALID",
            Self::NonceMismatch => "NONCE_MISMATCH",
            Self::TokenExchangeFailed(_) => "TOKEN_EXCHANGE_FAILED",
            Self::NoTeamAssignment => "NO_TEAM_ASSIGNMENT",
            Self::InvalidTeamSelection(_) => "INVALID_TEAM_SELECTION",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionNotReady => "SESSION_NOT_READY",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SessionAlreadyUsed => "SESSION_ALREADY_USED",
            Self::MetadataTooLarge(_) => "METADATA_TOO_LARGE",
            Self::IdpUnreachable(_) => "IDP_UNREACHABLE",
            Self::IdpBadResponse(_) => "IDP_BAD_RESPONSE",
            Self::VaultUnreachable(_) => "VAULT_UNREACHABLE",
            Self::VaultAuthRejected(_) => "VAULT_AUTH_REJECTED",
            Self::VaultRoleMissing(_) => "VAULT_ROLE_MISSING",
            Self::VaultPolicyDenied(_) => "VAULT_POLICY_DENIED",
            _ => "INTERNAL",
        }
    }

    /// HTTP status code for this error at the broker boundary.
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidState
            | Self::IdTokenInvalid(_)
            | Self::NonceMismatch
            | Self::TokenExchangeFailed(_)
            | Self::InvalidTeamSelection(_)
            | Self::MetadataTooLarge(_) => StatusCode::BAD_REQUEST,
            Self::NoTeamAssignment => StatusCode::FORBIDDEN,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::SessionNotReady | Self::SessionAlreadyUsed => StatusCode::CONFLICT,
            Self::SessionExpired => StatusCode::GONE,
            Self::IdpUnreachable(_)
            | Self::IdpBadResponse(_)
            | Self::VaultUnreachable(_)
            | Self::VaultAuthRejected(_)
            | Self::VaultRoleMissing(_)
            | Self::VaultPolicyDenied(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether retrying the same call may succeed (transport-level failures only).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VaultUnreachable(_) | Self::IdpUnreachable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_kinds_are_stable() {
        assert_eq!(Error::Backpressure.wire_kind(), "BACKPRESSURE");
        assert_eq!(Error::InvalidState.wire_kind(), "INVALID_STATE");
        assert_eq!(Error::SessionAlreadyUsed.wire_kind(), "SESSION_ALREADY_USED");
        assert_eq!(
            Error::VaultPolicyDenied("x".into()).wire_kind(),
            "VAULT_POLICY_DENIED"
        );
        assert_eq!(Error::Internal("x".into()).wire_kind(), "INTERNAL");
    }

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(
            Error::Backpressure.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(Error::InvalidState.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NoTeamAssignment.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::SessionNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::SessionNotReady.http_status(), StatusCode::CONFLICT);
        assert_eq!(Error::SessionAlreadyUsed.http_status(), StatusCode::CONFLICT);
        assert_eq!(Error::SessionExpired.http_status(), StatusCode::GONE);
        assert_eq!(
            Error::VaultUnreachable("x".into()).http_status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(Error::VaultUnreachable("conn refused".into()).is_retryable());
        assert!(Error::IdpUnreachable("timeout".into()).is_retryable());
        assert!(!Error::VaultAuthRejected("bad jwt".into()).is_retryable());
        assert!(!Error::SessionExpired.is_retryable());
    }
}
