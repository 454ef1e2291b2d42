//! Configuration management
//!
//! The broker is configured from an optional YAML file merged with
//! environment variables. The environment names follow the deployment
//! contract (`OKTA_*`, `VAULT_*`, `BROKER_*`); env always wins over the
//! file. Missing required IdP settings or unreadable key material are
//! configuration errors and terminate the process with exit code 1.

use std::{env, path::Path};

use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::teams::TeamConfig;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// IdP (Okta OIDC) configuration
    pub idp: IdpConfig,
    /// Vault configuration
    pub vault: VaultConfig,
    /// Broker token/session configuration
    pub broker: BrokerConfig,
    /// RSA signing key paths
    pub keys: KeyConfig,
    /// Team mapping and per-team Vault settings
    pub teams: TeamConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port` or `:port` (binds all interfaces)
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ":8081".to_string(),
        }
    }
}

/// IdP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdpConfig {
    /// OIDC issuer base URL, e.g. `https://dev-1234.okta.com/oauth2/default`.
    /// Endpoints are derived Okta-style: `{issuer}/v1/{authorize,token,userinfo,keys}`.
    pub issuer_url: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret; optional (public client with PKCE is allowed)
    pub client_secret: Option<String>,
    /// Redirect URI registered with the IdP
    pub redirect_uri: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Expected audience when the IdP issues custom authorization-server
    /// tokens; the ID-token `aud` check always uses `client_id`.
    pub audience: Option<String>,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            issuer_url: String::new(),
            client_id: String::new(),
            client_secret: None,
            redirect_uri: "http://localhost:8081/auth/callback".to_string(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "groups".to_string(),
            ],
            audience: None,
        }
    }
}

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault base URL
    pub addr: String,
    /// Root-equivalent token; used only by the `setup` subcommand
    pub root_token: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            addr: "http://127.0.0.1:8200".to_string(),
            root_token: None,
        }
    }
}

/// Broker JWT and session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// `iss` claim stamped on broker JWTs
    pub issuer: String,
    /// `aud` claim stamped on broker JWTs; must match Vault's bound audience
    pub audience: String,
    /// Session TTL from creation until the IdP callback, seconds
    pub session_ttl_secs: u64,
    /// Session TTL once ready for exchange, seconds
    pub exchange_ttl_secs: u64,
    /// Session store ceiling; creates beyond it are rejected
    pub session_max: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            issuer: "bazel-auth-broker".to_string(),
            audience: "bazel-vault".to_string(),
            session_ttl_secs: 600,
            exchange_ttl_secs: 300,
            session_max: 10_000,
        }
    }
}

/// RSA signing key paths
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeyConfig {
    /// Path to the RSA private key PEM used to sign broker JWTs
    pub signing_key_path: String,
}

impl Config {
    /// Load configuration from an optional YAML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the file is missing/unparseable or a
    /// required setting is absent after merging.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.apply_env(|name| env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Apply the recognized environment variables through `getter`.
    ///
    /// Injected as a closure so tests can override without mutating the
    /// process environment.
    pub fn apply_env(&mut self, getter: impl Fn(&str) -> Option<String>) {
        if let Some(domain) = getter("OKTA_DOMAIN") {
            let server = getter("OKTA_AUTH_SERVER_ID").unwrap_or_else(|| "default".to_string());
            self.idp.issuer_url = format!("https://{domain}/oauth2/{server}");
        }
        if let Some(v) = getter("OKTA_CLIENT_ID") {
            self.idp.client_id = v;
        }
        if let Some(v) = getter("OKTA_CLIENT_SECRET") {
            self.idp.client_secret = Some(v);
        }
        if let Some(v) = getter("OKTA_REDIRECT_URI") {
            self.idp.redirect_uri = v;
        }

        if let Some(v) = getter("VAULT_ADDR") {
            self.vault.addr = v;
        }
        if let Some(v) = getter("VAULT_ROOT_TOKEN") {
            self.vault.root_token = Some(v);
        }

        if let Some(v) = getter("BROKER_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = getter("BROKER_ISSUER") {
            self.broker.issuer = v;
        }
        if let Some(v) = getter("BROKER_JWT_AUDIENCE") {
            self.broker.audience = v;
        }
        if let Some(v) = getter("BROKER_SESSION_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.broker.session_ttl_secs = v;
        }
        if let Some(v) = getter("BROKER_EXCHANGE_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.broker.exchange_ttl_secs = v;
        }
        if let Some(v) = getter("BROKER_SESSION_MAX").and_then(|v| v.parse().ok()) {
            self.broker.session_max = v;
        }
        if let Some(v) = getter("BROKER_JWT_SIGNING_KEY") {
            self.keys.signing_key_path = v;
        }
    }

    /// Check that every required setting is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first missing setting.
    pub fn validate(&self) -> Result<()> {
        if self.idp.issuer_url.is_empty() {
            return Err(Error::Config(
                "IdP issuer is required (OKTA_DOMAIN or idp.issuer_url)".to_string(),
            ));
        }
        if url::Url::parse(&self.idp.issuer_url).is_err() {
            return Err(Error::Config(format!(
                "IdP issuer is not a valid URL: {}",
                self.idp.issuer_url
            )));
        }
        if self.idp.client_id.is_empty() {
            return Err(Error::Config(
                "OKTA_CLIENT_ID is required".to_string(),
            ));
        }
        if self.idp.redirect_uri.is_empty() {
            return Err(Error::Config("OKTA_REDIRECT_URI is required".to_string()));
        }
        if self.keys.signing_key_path.is_empty() {
            return Err(Error::Config(
                "BROKER_JWT_SIGNING_KEY is required".to_string(),
            ));
        }
        Ok(())
    }
}
