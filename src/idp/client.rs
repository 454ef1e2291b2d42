//! Outbound OIDC client: authorization URL, code exchange, userinfo.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::verify::{IdTokenClaims, IdTokenVerifier};
use crate::config::IdpConfig;
use crate::{Error, Result};

/// Per-call timeout for IdP requests.
const IDP_TIMEOUT: Duration = Duration::from_secs(5);

/// Tokens returned by the IdP token endpoint.
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// OIDC ID token (JWT), always present on success.
    pub id_token: String,
    /// OAuth access token, used for the userinfo endpoint.
    pub access_token: String,
    /// Access-token lifetime in seconds, when the IdP reports it.
    pub expires_in: Option<u64>,
}

/// Raw token endpoint response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Profile data from the userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Flat list of group names.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// OIDC client for the configured IdP.
///
/// Endpoints are Okta-shaped, derived from the issuer URL:
/// `{issuer}/v1/{authorize,token,userinfo,keys}`.
pub struct IdpClient {
    config: IdpConfig,
    http: reqwest::Client,
    verifier: IdTokenVerifier,
}

impl IdpClient {
    /// Create a client for the given IdP configuration.
    #[must_use]
    pub fn new(config: IdpConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(IDP_TIMEOUT)
            .build()
            .unwrap_or_default();

        let mut verifier = IdTokenVerifier::new(
            config.issuer_url.clone(),
            config.client_id.clone(),
            endpoint(&config.issuer_url, "keys"),
        );
        if let Some(ref audience) = config.audience {
            verifier = verifier.with_extra_audience(audience.clone());
        }

        Self {
            config,
            http,
            verifier,
        }
    }

    /// Build the IdP authorization URL for a new flow.
    ///
    /// # Panics
    ///
    /// Panics if the configured issuer URL is unparseable; `Config::validate`
    /// rejects that at startup.
    #[must_use]
    pub fn authorize_url(&self, state: &str, pkce_challenge: &str, nonce: &str) -> String {
        let mut url = Url::parse(&endpoint(&self.config.issuer_url, "authorize"))
            .expect("issuer URL validated at startup");

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("nonce", nonce)
            .append_pair("code_challenge", pkce_challenge)
            .append_pair("code_challenge_method", "S256");

        url.into()
    }

    /// Exchange an authorization code for tokens using the stored PKCE verifier.
    ///
    /// # Errors
    ///
    /// [`Error::IdpUnreachable`] on transport failure;
    /// [`Error::TokenExchangeFailed`] when the IdP answers non-2xx or the
    /// response carries no `id_token`.
    pub async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> Result<TokenSet> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", self.config.redirect_uri.as_str());
        params.insert("client_id", self.config.client_id.as_str());
        params.insert("code_verifier", pkce_verifier);
        if let Some(ref secret) = self.config.client_secret {
            params.insert("client_secret", secret);
        }

        let response = self
            .http
            .post(endpoint(&self.config.issuer_url, "token"))
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::IdpUnreachable(format!("token endpoint: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "IdP refused the authorization code");
            return Err(Error::TokenExchangeFailed(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::IdpBadResponse(format!("token response: {e}")))?;

        let id_token = token
            .id_token
            .ok_or_else(|| Error::TokenExchangeFailed("response carried no id_token".into()))?;

        debug!("Exchanged authorization code for tokens");
        Ok(TokenSet {
            id_token,
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }

    /// Verify an ID token's signature and claims against the session nonce.
    ///
    /// # Errors
    ///
    /// See [`IdTokenVerifier::verify`].
    pub async fn verify_id_token(
        &self,
        id_token: &str,
        expected_nonce: &str,
    ) -> Result<IdTokenClaims> {
        self.verifier.verify(id_token, expected_nonce).await
    }

    /// Fetch profile data for an access token.
    ///
    /// Used when the ID token carries no `groups` claim (provider-dependent).
    ///
    /// # Errors
    ///
    /// [`Error::IdpUnreachable`] on transport failure;
    /// [`Error::IdpBadResponse`] on a non-2xx or unparseable answer.
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<UserInfo> {
        let response = self
            .http
            .get(endpoint(&self.config.issuer_url, "userinfo"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::IdpUnreachable(format!("userinfo endpoint: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::IdpBadResponse(format!("userinfo HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::IdpBadResponse(format!("userinfo body: {e}")))
    }
}

/// Okta-style endpoint path under the issuer.
fn endpoint(issuer_url: &str, leaf: &str) -> String {
    format!("{}/v1/{leaf}", issuer_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idp::pkce;

    fn test_config() -> IdpConfig {
        IdpConfig {
            issuer_url: "https://dev-1234.okta.com/oauth2/default".to_string(),
            client_id: "test-client".to_string(),
            redirect_uri: "http://localhost:8081/auth/callback".to_string(),
            ..IdpConfig::default()
        }
    }

    #[test]
    fn endpoint_derivation_is_okta_shaped() {
        assert_eq!(
            endpoint("https://dev-1234.okta.com/oauth2/default", "token"),
            "https://dev-1234.okta.com/oauth2/default/v1/token"
        );
        // trailing slash does not double up
        assert_eq!(
            endpoint("https://dev-1234.okta.com/oauth2/default/", "keys"),
            "https://dev-1234.okta.com/oauth2/default/v1/keys"
        );
    }

    #[test]
    fn authorize_url_carries_all_flow_parameters() {
        let client = IdpClient::new(test_config());
        let (_, challenge) = pkce::generate_pkce();
        let url = client.authorize_url("st-1", &challenge, "nonce-1");

        assert!(url.starts_with("https://dev-1234.okta.com/oauth2/default/v1/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=test-client"));
        assert!(url.contains("state=st-1"));
        assert!(url.contains("nonce=nonce-1"));
        assert!(url.contains(&format!("code_challenge={challenge}")));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("scope=openid+profile+email+groups"));
    }

    #[test]
    fn userinfo_deserializes_with_missing_optionals() {
        let info: UserInfo = serde_json::from_str(r#"{"sub":"u1"}"#).unwrap();
        assert!(info.email.is_none());
        assert!(info.groups.is_empty());

        let info: UserInfo = serde_json::from_str(
            r#"{"email":"alice@ex.com","name":"Alice","groups":["mobile-developers"]}"#,
        )
        .unwrap();
        assert_eq!(info.email.as_deref(), Some("alice@ex.com"));
        assert_eq!(info.groups, vec!["mobile-developers"]);
    }
}
