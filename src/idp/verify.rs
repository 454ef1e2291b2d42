//! ID-token verification — JWT signature validation and JWKS caching.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Fetch the IdP's JWKS (cached with ETag + TTL; refreshed on unknown `kid`).
//! 3. Verify the RS256 signature and `exp`/`iat` with 60 s clock leeway.
//! 4. Check `iss`, `aud` (= client id, string or array form), and the nonce.
//!
//! The JWKS cache is a single atomically-published slot: readers copy the
//! current snapshot, refreshes install a whole new one. The TTL is clamped
//! to [5 min, 1 h]; a 304 from the IdP (matched ETag) just renews the TTL.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    jwk::{AlgorithmParameters, JwkSet},
    Algorithm, DecodingKey, TokenData, Validation,
};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{Error, Result};

/// JWKS cache TTL bounds.
const JWKS_TTL_MIN: Duration = Duration::from_secs(300);
const JWKS_TTL_MAX: Duration = Duration::from_secs(3600);

/// Clock skew tolerated on `exp`/`iat`, seconds.
const CLOCK_LEEWAY_SECS: u64 = 60;

/// Claims extracted from a verified ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer
    pub iss: String,
    /// Subject (opaque IdP user id)
    pub sub: String,
    /// Audience (string or array)
    #[serde(default)]
    pub aud: serde_json::Value,
    /// Expiry (Unix seconds); validated by the JWT library
    pub exp: u64,
    /// Issued-at (Unix seconds)
    pub iat: u64,
    /// OIDC nonce echoed back by the IdP
    #[serde(default)]
    pub nonce: Option<String>,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Group memberships (provider-dependent; may be absent)
    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

/// Cached JWKS snapshot.
struct CachedJwks {
    keys: JwkSet,
    etag: Option<String>,
    fetched_at: Instant,
}

/// Verifies ID tokens for a single configured issuer.
pub struct IdTokenVerifier {
    issuer: String,
    accepted_audiences: Vec<String>,
    jwks_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
    ttl: Duration,
}

impl IdTokenVerifier {
    /// Create a verifier for one issuer/client pair.
    #[must_use]
    pub fn new(issuer: String, client_id: String, jwks_url: String) -> Self {
        Self {
            issuer,
            accepted_audiences: vec![client_id],
            jwks_url,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            cache: RwLock::new(None),
            ttl: JWKS_TTL_MIN,
        }
    }

    /// Accept a second audience value (custom authorization-server tokens).
    #[must_use]
    pub fn with_extra_audience(mut self, audience: String) -> Self {
        self.accepted_audiences.push(audience);
        self
    }

    /// Override the JWKS cache TTL (clamped to [5 min, 1 h]).
    #[must_use]
    pub fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.clamp(JWKS_TTL_MIN, JWKS_TTL_MAX);
        self
    }

    /// Verify an ID token and return its claims.
    ///
    /// # Errors
    ///
    /// [`Error::IdTokenInvalid`] for signature/iss/aud/exp/alg failures,
    /// [`Error::NonceMismatch`] when the nonce differs from the session's,
    /// [`Error::IdpUnreachable`] / [`Error::IdpBadResponse`] for JWKS fetch
    /// problems.
    pub async fn verify(&self, token: &str, expected_nonce: &str) -> Result<IdTokenClaims> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::IdTokenInvalid(format!("header: {e}")))?;

        if header.alg != Algorithm::RS256 {
            return Err(Error::IdTokenInvalid(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| Error::IdTokenInvalid("missing kid in header".into()))?;

        let decoding_key = self.find_decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = CLOCK_LEEWAY_SECS;
        // Audience is checked manually below to support string and array forms.
        validation.validate_aud = false;

        let token_data: TokenData<IdTokenClaims> =
            jsonwebtoken::decode(token, &decoding_key, &validation)
                .map_err(|e| Error::IdTokenInvalid(e.to_string()))?;
        let claims = token_data.claims;

        if claims.iss != self.issuer {
            return Err(Error::IdTokenInvalid(format!(
                "issuer mismatch: expected {}, got {}",
                self.issuer, claims.iss
            )));
        }

        if !self
            .accepted_audiences
            .iter()
            .any(|aud| audience_matches(&claims.aud, aud))
        {
            return Err(Error::IdTokenInvalid("audience mismatch".into()));
        }

        // iat must not lie in the future beyond the allowed skew
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        if claims.iat > now + CLOCK_LEEWAY_SECS {
            return Err(Error::IdTokenInvalid("token issued in the future".into()));
        }

        if claims.nonce.as_deref() != Some(expected_nonce) {
            return Err(Error::NonceMismatch);
        }

        Ok(claims)
    }

    /// Find a decoding key by `kid`, refreshing the cache once if unknown.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        let jwks = self.get_or_fetch(false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(%kid, "Key not in cached JWKS, refreshing");
        let jwks = self.get_or_fetch(true).await?;
        find_key_in_jwks(&jwks, kid)
            .ok_or_else(|| Error::IdTokenInvalid(format!("unknown key id {kid}")))
    }

    /// Return the cached JWKS, fetching from the IdP when stale or forced.
    async fn get_or_fetch(&self, force: bool) -> Result<JwkSet> {
        let (cached_keys, etag) = {
            let guard = self.cache.read();
            match guard.as_ref() {
                Some(c) if !force && c.fetched_at.elapsed() < self.ttl => {
                    return Ok(c.keys.clone());
                }
                Some(c) => (Some(c.keys.clone()), c.etag.clone()),
                None => (None, None),
            }
        };

        let mut request = self.http.get(&self.jwks_url);
        if let Some(ref etag) = etag {
            request = request.header("If-None-Match", etag);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::IdpUnreachable(format!("JWKS fetch: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            if let Some(keys) = cached_keys {
                let mut guard = self.cache.write();
                if let Some(c) = guard.as_mut() {
                    c.fetched_at = Instant::now();
                }
                return Ok(keys);
            }
            return Err(Error::IdpBadResponse("304 with empty JWKS cache".into()));
        }

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::IdpBadResponse(format!("JWKS HTTP {status}")));
        }

        let new_etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| Error::IdpBadResponse(format!("JWKS body: {e}")))?;

        debug!(url = %self.jwks_url, keys = keys.keys.len(), "Fetched IdP JWKS");

        *self.cache.write() = Some(CachedJwks {
            keys: keys.clone(),
            etag: new_etag,
            fetched_at: Instant::now(),
        });

        Ok(keys)
    }
}

/// Find an RSA JWK by `kid` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        if jwk.common.key_id.as_deref() != Some(kid) {
            continue;
        }
        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            other => {
                warn!(?other, "Non-RSA key in IdP JWKS, skipping");
                None
            }
        };
    }
    None
}

/// Check the `aud` claim (string or array form) against the expected value.
fn audience_matches(aud: &serde_json::Value, expected: &str) -> bool {
    match aud {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Array(arr) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s == expected)),
        _ => false,
    }
}
