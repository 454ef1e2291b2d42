//! Broker JWT issuance — short RS256 tokens that Vault's JWT auth trusts.
//!
//! The subject is the **selected team**, not the user: Vault's JWT role
//! binds `user_claim = "sub"`, so every login for a team lands on the same
//! identity alias and entity. User identity travels in auxiliary claims for
//! audit, never in `sub`. Tokens live five minutes and are never stored.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};

use crate::keys::KeyManager;
use crate::session::{now_unix, UserIdentity};
use crate::{Error, Result};

/// Broker JWT lifetime in seconds.
const BROKER_JWT_TTL_SECS: u64 = 300;

/// Upper bound on each caller-supplied metadata field, bytes.
const METADATA_FIELD_MAX: usize = 256;

/// Caller-supplied build metadata woven into the JWT and the Vault token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeMetadata {
    /// CI pipeline identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    /// Repository name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Build target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// CI run identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl ExchangeMetadata {
    /// Enforce the per-field size bound. Untrusted input; checked before
    /// any state transition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MetadataTooLarge`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("pipeline", &self.pipeline),
            ("repo", &self.repo),
            ("target", &self.target),
            ("run_id", &self.run_id),
        ];
        for (name, value) in fields {
            if value.as_ref().is_some_and(|v| v.len() > METADATA_FIELD_MAX) {
                return Err(Error::MetadataTooLarge(name));
            }
        }
        Ok(())
    }
}

/// Claims carried by a broker JWT.
#[derive(Debug, Serialize, Deserialize)]
pub struct BrokerClaims {
    /// Issuer, `bazel-auth-broker` by default.
    pub iss: String,
    /// Subject: the selected team.
    pub sub: String,
    /// Audience bound by Vault's JWT roles.
    pub aud: String,
    /// Issued-at, Unix seconds.
    pub iat: u64,
    /// Expiry, Unix seconds (iat + 300).
    pub exp: u64,
    /// Authenticated user's email.
    pub user_email: String,
    /// Authenticated user's display name.
    pub user_name: String,
    /// IdP subject of the user.
    pub user_sub: String,
    /// IdP groups of the user.
    pub groups: Vec<String>,
    /// Build metadata, present only when supplied.
    #[serde(flatten)]
    pub metadata: ExchangeMetadata,
}

/// Mints broker JWTs with the key manager's active signer.
pub struct JwtIssuer {
    issuer: String,
    audience: String,
    keys: Arc<KeyManager>,
}

impl JwtIssuer {
    /// Create an issuer stamping the given `iss`/`aud` pair.
    #[must_use]
    pub fn new(issuer: String, audience: String, keys: Arc<KeyManager>) -> Self {
        Self {
            issuer,
            audience,
            keys,
        }
    }

    /// Mint a compact JWS for one exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if signing fails.
    pub fn mint(
        &self,
        user: &UserIdentity,
        team: &str,
        metadata: &ExchangeMetadata,
    ) -> Result<String> {
        let now = now_unix();
        let claims = BrokerClaims {
            iss: self.issuer.clone(),
            sub: team.to_string(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + BROKER_JWT_TTL_SECS,
            user_email: user.email.clone(),
            user_name: user.display_name.clone(),
            user_sub: user.subject.clone(),
            groups: user.groups.clone(),
            metadata: metadata.clone(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.keys.kid().to_string());

        jsonwebtoken::encode(&header, &claims, self.keys.encoding_key())
            .map_err(|e| Error::Internal(format!("JWT signing failed: {e}")))
    }
}
