//! Vault-side provisioning — the JWT auth and token-role configuration the
//! exchange path depends on.
//!
//! Run via the `setup` subcommand with a root-equivalent token. Provisions:
//!
//! - the JWT auth mount, validating broker JWTs against the broker's public
//!   key and `bound_issuer`;
//! - one JWT role per team (`bound_subject` = team, `user_claim` = `sub`,
//!   audience-bound) so same-team logins share one identity entity;
//! - one token role per team (`<team>-token`) restricting policies,
//!   disabling renewal, and capping TTL. The devops team's token role may
//!   carry every team policy; all others disallow foreign team policies.
//!
//! Policy documents themselves are authored out of band.

use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::teams::TeamConfig;
use crate::{Error, Result};

/// Provisions Vault with the broker's auth configuration.
pub struct VaultProvisioner {
    addr: String,
    root_token: String,
    http: reqwest::Client,
}

impl VaultProvisioner {
    /// Create a provisioner using root-equivalent parent material.
    #[must_use]
    pub fn new(addr: String, root_token: String) -> Self {
        Self {
            addr: addr.trim_end_matches('/').to_string(),
            root_token,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Write the full JWT auth + token-role configuration for every team.
    ///
    /// # Errors
    ///
    /// [`Error::VaultUnreachable`] on transport failure,
    /// [`Error::VaultAuthRejected`] when the root token is refused,
    /// [`Error::Internal`] for any other Vault rejection.
    pub async fn provision(
        &self,
        broker_issuer: &str,
        broker_audience: &str,
        public_key_pem: &str,
        teams: &TeamConfig,
    ) -> Result<()> {
        self.enable_jwt_auth().await?;

        self.write(
            "auth/jwt/config",
            &json!({
                "jwt_validation_pubkeys": [public_key_pem],
                "bound_issuer": broker_issuer,
            }),
        )
        .await?;
        info!(issuer = %broker_issuer, "Configured Vault JWT auth");

        let mut team_names: Vec<&String> = teams.teams.keys().collect();
        team_names.sort();

        for team in team_names {
            self.write_jwt_role(team, broker_audience, teams).await?;
            self.write_token_role(team, teams).await?;
            info!(%team, "Provisioned Vault roles");
        }

        Ok(())
    }

    /// Mount the JWT auth method; an already-mounted path is fine.
    async fn enable_jwt_auth(&self) -> Result<()> {
        let url = format!("{}/v1/sys/auth/jwt", self.addr);
        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &self.root_token)
            .json(&json!({ "type": "jwt" }))
            .send()
            .await
            .map_err(|e| Error::VaultUnreachable(format!("enable jwt auth: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 400 && body.contains("already in use") {
            return Ok(());
        }
        Err(classify(status, &body))
    }

    /// One JWT role per team: subject-bound, audience-bound, `user_claim=sub`.
    async fn write_jwt_role(
        &self,
        team: &str,
        audience: &str,
        teams: &TeamConfig,
    ) -> Result<()> {
        self.write(
            &format!("auth/jwt/role/{team}"),
            &json!({
                "role_type": "jwt",
                "bound_audiences": [audience],
                "bound_subject": team,
                "user_claim": "sub",
                "token_policies": teams.policies(team),
            }),
        )
        .await
    }

    /// One token role per team bounding what child tokens may carry.
    async fn write_token_role(&self, team: &str, teams: &TeamConfig) -> Result<()> {
        let is_devops = teams.devops_team.as_deref() == Some(team);

        let allowed: Vec<String> = if is_devops {
            let mut all: Vec<String> = teams
                .teams
                .keys()
                .flat_map(|t| teams.policies(t))
                .collect();
            all.sort();
            all.dedup();
            all
        } else {
            teams.policies(team)
        };

        let mut disallowed: Vec<String> = if is_devops {
            Vec::new()
        } else {
            teams
                .teams
                .keys()
                .filter(|t| t.as_str() != team)
                .cloned()
                .collect()
        };
        disallowed.sort();

        let settings = teams.settings(team);
        let ttl_max = settings.map_or(14_400, |s| s.ttl_max_secs);
        let role = teams
            .token_role(team)
            .unwrap_or_else(|| format!("{team}-token"));

        self.write(
            &format!("auth/token/roles/{role}"),
            &json!({
                "allowed_policies": allowed,
                "disallowed_policies": disallowed,
                "renewable": false,
                "token_explicit_max_ttl": format!("{ttl_max}s"),
            }),
        )
        .await
    }

    /// POST a logical write with the root token.
    async fn write(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        let url = format!("{}/v1/{path}", self.addr);
        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &self.root_token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::VaultUnreachable(format!("{path}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify(status, &format!("{path}: {text}")))
    }
}

fn classify(status: reqwest::StatusCode, detail: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::VaultAuthRejected(format!("HTTP {status}: {detail}")),
        500..=599 => Error::VaultUnreachable(format!("HTTP {status}: {detail}")),
        _ => Error::Internal(format!("Vault write failed, HTTP {status}: {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn provision_writes_config_and_roles_for_every_team() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/sys/auth/jwt"))
            .and(header("X-Vault-Token", "root"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/auth/jwt/config"))
            .and(body_partial_json(
                serde_json::json!({"bound_issuer": "bazel-auth-broker"}),
            ))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        // Four default teams, one JWT role and one token role each
        Mock::given(method("POST"))
            .and(wiremock::matchers::path_regex(r"^/v1/auth/jwt/role/.+"))
            .respond_with(ResponseTemplate::new(204))
            .expect(4)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::path_regex(r"^/v1/auth/token/roles/.+-token$"))
            .respond_with(ResponseTemplate::new(204))
            .expect(4)
            .mount(&server)
            .await;

        let provisioner = VaultProvisioner::new(server.uri(), "root".to_string());
        provisioner
            .provision(
                "bazel-auth-broker",
                "bazel-vault",
                "-----BEGIN PUBLIC KEY-----\n...",
                &TeamConfig::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn already_mounted_jwt_auth_is_tolerated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sys/auth/jwt"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"errors":["path is already in use at jwt/"]}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let provisioner = VaultProvisioner::new(server.uri(), "root".to_string());
        provisioner
            .provision("bazel-auth-broker", "bazel-vault", "pem", &TeamConfig::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bad_root_token_is_auth_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sys/auth/jwt"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let provisioner = VaultProvisioner::new(server.uri(), "not-root".to_string());
        let err = provisioner
            .provision("bazel-auth-broker", "bazel-vault", "pem", &TeamConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VaultAuthRejected(_)));
    }
}
