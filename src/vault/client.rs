//! Vault HTTP client.
//!
//! Two-step authentication per exchange:
//!
//! 1. `POST /v1/auth/jwt/login` with the broker JWT against the team-named
//!    JWT role. The JWT's `sub` equals the team and the role's `user_claim`
//!    is `sub`, so Vault binds the login to a stable per-team entity —
//!    every same-team login reuses the same alias.
//! 2. `POST /v1/auth/token/create/<team>-token` with the step-1 token as
//!    parent. The token role bounds policies, TTL, and use count. The
//!    parent token is used for exactly this one call, then dropped.
//!
//! Transport failures and 5xx responses retry with exponential backoff
//! (3 attempts, 250 ms → 1 s → 4 s); Vault's own rejections never retry.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::retry::{with_retry, RetryPolicy};
use crate::{Error, Result};

/// Per-call timeout for Vault requests.
const VAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The `auth` block Vault returns on login and token creation.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultAuth {
    /// The issued token.
    pub client_token: String,
    /// Policies attached to the token.
    #[serde(default)]
    pub policies: Vec<String>,
    /// Identity entity the login bound to (stable per team).
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Token TTL in seconds.
    #[serde(default)]
    pub lease_duration: u64,
    /// Use count, when Vault reports one.
    #[serde(default)]
    pub num_uses: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    auth: VaultAuth,
}

/// Parameters for creating a child token from a token role.
#[derive(Debug, Clone)]
pub struct ChildTokenRequest {
    /// Vault token role, e.g. `mobile-team-token`.
    pub token_role: String,
    /// Requested TTL in seconds (the role may cap it).
    pub ttl_secs: u64,
    /// Requested use limit.
    pub num_uses: u32,
    /// Display name shown in Vault's token lookup.
    pub display_name: String,
    /// Audit metadata echoed back on token lookup.
    pub metadata: BTreeMap<String, String>,
}

/// The child token handed back to the client.
#[derive(Debug, Clone)]
pub struct ChildToken {
    /// The Vault token.
    pub token: String,
    /// Granted TTL in seconds.
    pub ttl: u64,
    /// Remaining uses.
    pub uses_remaining: u32,
    /// Policies carried by the token.
    pub policies: Vec<String>,
}

/// HTTP client for a single Vault instance.
pub struct VaultClient {
    addr: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl VaultClient {
    /// Create a client for the Vault at `addr`.
    #[must_use]
    pub fn new(addr: String) -> Self {
        Self {
            addr: addr.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(VAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy (tests use tight backoffs).
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Authenticate with the team's JWT role using a broker JWT.
    ///
    /// # Errors
    ///
    /// [`Error::VaultUnreachable`] after retries, [`Error::VaultRoleMissing`]
    /// for an unknown role, [`Error::VaultAuthRejected`] when Vault refuses
    /// the JWT.
    pub async fn login_as_team(&self, role: &str, broker_jwt: &str) -> Result<VaultAuth> {
        let url = format!("{}/v1/auth/jwt/login", self.addr);
        let url = url.as_str();

        let auth = with_retry(&self.retry, "vault jwt login", || async move {
            let response = self
                .http
                .post(url)
                .json(&json!({ "jwt": broker_jwt, "role": role }))
                .send()
                .await
                .map_err(|e| Error::VaultUnreachable(format!("jwt login: {e}")))?;

            let status = response.status();
            if status.is_success() {
                let body: AuthResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::VaultAuthRejected(format!("login response: {e}")))?;
                return Ok(body.auth);
            }

            let body = response.text().await.unwrap_or_default();
            Err(match status.as_u16() {
                404 => Error::VaultRoleMissing(format!("jwt role {role}")),
                400..=499 => Error::VaultAuthRejected(format!("HTTP {status}: {body}")),
                _ => Error::VaultUnreachable(format!("HTTP {status}")),
            })
        })
        .await?;

        debug!(
            %role,
            entity_id = auth.entity_id.as_deref().unwrap_or("unknown"),
            "Vault JWT login succeeded"
        );
        Ok(auth)
    }

    /// Create a bounded child token from a token role.
    ///
    /// # Errors
    ///
    /// [`Error::VaultUnreachable`] after retries, [`Error::VaultRoleMissing`]
    /// for an unknown token role, [`Error::VaultPolicyDenied`] when the role
    /// forbids the request, [`Error::VaultAuthRejected`] for a bad parent.
    pub async fn create_child_token(
        &self,
        parent_token: &str,
        request: &ChildTokenRequest,
    ) -> Result<ChildToken> {
        let url = format!("{}/v1/auth/token/create/{}", self.addr, request.token_role);
        let url = url.as_str();
        let body = json!({
            "ttl": format!("{}s", request.ttl_secs),
            "num_uses": request.num_uses,
            "renewable": false,
            "display_name": request.display_name,
            "metadata": request.metadata,
        });
        let body = &body;

        let auth = with_retry(&self.retry, "vault token create", || async move {
            let response = self
                .http
                .post(url)
                .header("X-Vault-Token", parent_token)
                .json(body)
                .send()
                .await
                .map_err(|e| Error::VaultUnreachable(format!("token create: {e}")))?;

            let status = response.status();
            if status.is_success() {
                let body: AuthResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::VaultPolicyDenied(format!("create response: {e}")))?;
                return Ok(body.auth);
            }

            let text = response.text().await.unwrap_or_default();
            warn!(role = %request.token_role, %status, "Vault refused child-token creation");
            Err(match status.as_u16() {
                404 => Error::VaultRoleMissing(format!("token role {}", request.token_role)),
                401 => Error::VaultAuthRejected(format!("HTTP {status}: {text}")),
                400..=499 => Error::VaultPolicyDenied(format!("HTTP {status}: {text}")),
                _ => Error::VaultUnreachable(format!("HTTP {status}")),
            })
        })
        .await?;

        Ok(ChildToken {
            token: auth.client_token,
            ttl: auth.lease_duration,
            uses_remaining: auth.num_uses.unwrap_or(request.num_uses),
            policies: auth.policies,
        })
    }

    /// Whether Vault answers at all. Any HTTP response counts as reachable;
    /// sealed/standby states are Vault's business, not the broker's.
    pub async fn is_reachable(&self) -> bool {
        let url = format!("{}/v1/sys/health", self.addr);
        self.http.get(&url).send().await.is_ok()
    }

    /// Base URL of this Vault.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }
}
