//! The broker core — sequences the IdP callback, team selection, and the
//! single-use Vault exchange over the session store.
//!
//! The broker owns its collaborators strictly downward (IdP client, session
//! store, JWT issuer, Vault client); handlers call in, components never call
//! back up. All state-machine transitions happen here through the store's
//! atomic CAS, so concurrent requests on one session serialize cleanly.

pub mod audit;
mod handler;
mod pages;
mod server;

pub use handler::create_router;
pub use server::run;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::Config;
use crate::idp::{pkce, IdpClient, TokenSet};
use crate::jwt::{ExchangeMetadata, JwtIssuer};
use crate::keys::{Jwks, KeyManager};
use crate::session::{now_unix, SessionState, SessionStatus, SessionStore, UserIdentity};
use crate::vault::{ChildTokenRequest, VaultClient};
use crate::{Error, Result};

use audit::AuditEvent;

/// A freshly created flow, as returned by `/cli/start`.
#[derive(Debug, Serialize)]
pub struct StartedSession {
    /// Opaque handle for the client.
    pub session_id: String,
    /// OAuth state parameter baked into the auth URL.
    pub state: String,
    /// Fully formed IdP authorization URL (PKCE and nonce included).
    pub auth_url: String,
    /// Seconds until this session expires.
    pub expires_in: u64,
}

/// What the callback handler should render next.
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Single candidate team; the session is ready to exchange.
    Ready {
        /// Session handle to display.
        session_id: String,
    },
    /// Several candidate teams; the user must pick one.
    NeedsTeamSelection {
        /// Session handle to carry to the selection page.
        session_id: String,
    },
}

/// Metadata echoed back with the child token.
#[derive(Debug, Serialize)]
pub struct TokenMetadata {
    /// Team the token is scoped to.
    pub team: String,
    /// User email.
    pub user: String,
    /// User display name.
    pub name: String,
    /// CI pipeline, when supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    /// Repository, when supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Build target, when supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// CI run id, when supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// The `/exchange` success payload.
#[derive(Debug, Serialize)]
pub struct TokenGrant {
    /// The Vault child token.
    pub token: String,
    /// Granted TTL in seconds.
    pub ttl: u64,
    /// Remaining uses.
    pub uses_remaining: u32,
    /// Policies on the token.
    pub policies: Vec<String>,
    /// Audit metadata.
    pub metadata: TokenMetadata,
}

/// Broker health summary.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Always `"healthy"` when the broker answers.
    pub status: &'static str,
    /// Authentication method identifier.
    pub auth_method: &'static str,
    /// Whether Vault currently answers.
    pub vault_reachable: bool,
}

/// The broker service: orchestrator plus owned collaborators.
pub struct Broker {
    /// Static configuration.
    pub config: Config,
    /// Session store; shared with the background sweeper.
    pub sessions: Arc<SessionStore>,
    idp: IdpClient,
    issuer: JwtIssuer,
    vault: VaultClient,
    keys: Arc<KeyManager>,
}

impl Broker {
    /// Assemble the broker from configuration and loaded key material.
    #[must_use]
    pub fn new(config: Config, keys: Arc<KeyManager>) -> Self {
        let sessions = Arc::new(SessionStore::new(
            config.broker.session_max,
            config.broker.session_ttl_secs,
        ));
        let idp = IdpClient::new(config.idp.clone());
        let issuer = JwtIssuer::new(
            config.broker.issuer.clone(),
            config.broker.audience.clone(),
            Arc::clone(&keys),
        );
        let vault = VaultClient::new(config.vault.addr.clone());

        Self {
            config,
            sessions,
            idp,
            issuer,
            vault,
            keys,
        }
    }

    /// The JWKS document for the active signer.
    #[must_use]
    pub fn jwks(&self) -> &Jwks {
        self.keys.jwks()
    }

    /// Begin a new flow: create a session and build the authorization URL.
    ///
    /// # Errors
    ///
    /// [`Error::Backpressure`] when the session store is full.
    pub fn start_session(&self) -> Result<StartedSession> {
        let (verifier, challenge) = pkce::generate_pkce();
        let nonce = pkce::generate_nonce();

        let session = self
            .sessions
            .create(verifier, challenge.clone(), nonce.clone())?;

        let auth_url = self.idp.authorize_url(&session.state, &challenge, &nonce);

        audit::emit(&AuditEvent::created(&session.session_id));
        Ok(StartedSession {
            session_id: session.session_id,
            state: session.state,
            auth_url,
            expires_in: self.config.broker.session_ttl_secs,
        })
    }

    /// Handle the IdP redirect: rejoin the session by `state`, exchange the
    /// code, verify the ID token, and resolve teams.
    ///
    /// A `state` this broker never issued fails with `INVALID_STATE` before
    /// any IdP traffic. Any failure after the session is located moves it to
    /// `FAILED`.
    ///
    /// # Errors
    ///
    /// See the error taxonomy; notably [`Error::InvalidState`],
    /// [`Error::IdTokenInvalid`], [`Error::NoTeamAssignment`].
    pub async fn handle_callback(
        &self,
        code: &str,
        state_param: &str,
        cookie_state: Option<&str>,
    ) -> Result<CallbackOutcome> {
        let Some(session) = self.sessions.find_by_state(state_param) else {
            audit::emit(&AuditEvent::denied(None, "unknown state parameter"));
            return Err(Error::InvalidState);
        };

        // Strict equality cross-checks, constant-time.
        if !ct_eq(&session.state, state_param) {
            self.sessions.fail(&session.session_id);
            return Err(Error::InvalidState);
        }
        if let Some(cookie) = cookie_state {
            if !ct_eq(cookie, &session.state) {
                self.sessions.fail(&session.session_id);
                return Err(Error::InvalidState);
            }
        }

        match session.status {
            SessionStatus::PendingCallback => {}
            SessionStatus::Expired => return Err(Error::SessionExpired),
            _ => return Err(Error::InvalidState),
        }

        match self.authenticate_session(&session, code).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "Callback failed");
                audit::emit(&AuditEvent::denied(Some(&session.session_id), e.to_string()));
                self.sessions.fail(&session.session_id);
                Err(e)
            }
        }
    }

    /// Inner callback path: IdP round-trips plus the resulting transition.
    async fn authenticate_session(
        &self,
        session: &SessionState,
        code: &str,
    ) -> Result<CallbackOutcome> {
        let tokens = self.idp.exchange_code(code, &session.pkce_verifier).await?;
        let claims = self
            .idp
            .verify_id_token(&tokens.id_token, &session.nonce)
            .await?;

        let user = self.build_identity(&claims, &tokens).await?;

        let candidates = self.config.teams.resolve_teams(&user.groups);
        if candidates.is_empty() {
            return Err(Error::NoTeamAssignment);
        }

        info!(
            session_id = %session.session_id,
            user = %user.email,
            teams = candidates.len(),
            "User authenticated"
        );
        audit::emit(&AuditEvent::authenticated(
            &session.session_id,
            &user.email,
            &candidates,
        ));

        let exchange_ttl = self.config.broker.exchange_ttl_secs;
        if candidates.len() == 1 {
            let team = candidates[0].clone();
            let updated = self
                .sessions
                .transition(
                    &session.session_id,
                    SessionStatus::PendingCallback,
                    SessionStatus::ReadyForExchange,
                    |rec| {
                        rec.user = Some(user.clone());
                        rec.candidate_teams = candidates.clone();
                        rec.selected_team = Some(team.clone());
                        rec.expires_at = now_unix() + exchange_ttl;
                    },
                )
                .map_err(callback_transition_error)?;
            Ok(CallbackOutcome::Ready {
                session_id: updated.session_id,
            })
        } else {
            let updated = self
                .sessions
                .transition(
                    &session.session_id,
                    SessionStatus::PendingCallback,
                    SessionStatus::AwaitingTeamSelection,
                    |rec| {
                        rec.user = Some(user.clone());
                        rec.candidate_teams = candidates.clone();
                    },
                )
                .map_err(callback_transition_error)?;
            Ok(CallbackOutcome::NeedsTeamSelection {
                session_id: updated.session_id,
            })
        }
    }

    /// Assemble the user identity from ID-token claims, falling back to the
    /// userinfo endpoint when the provider omits groups from the token.
    async fn build_identity(
        &self,
        claims: &crate::idp::IdTokenClaims,
        tokens: &TokenSet,
    ) -> Result<UserIdentity> {
        let mut email = claims.email.clone();
        let mut name = claims.name.clone();
        let mut groups = claims.groups.clone();

        if groups.is_none() {
            let info = self.idp.fetch_userinfo(&tokens.access_token).await?;
            email = email.or(info.email);
            name = name.or(info.name);
            groups = Some(info.groups);
        }

        let email =
            email.ok_or_else(|| Error::IdpBadResponse("no email claim for user".into()))?;
        let display_name = name.unwrap_or_else(|| email.clone());

        Ok(UserIdentity {
            email,
            display_name,
            subject: claims.sub.clone(),
            groups: groups.unwrap_or_default(),
        })
    }

    /// Fix the team context for a multi-team session.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`], [`Error::InvalidTeamSelection`],
    /// [`Error::SessionExpired`], [`Error::SessionNotReady`].
    pub fn select_team(&self, session_id: &str, team: &str) -> Result<SessionState> {
        let session = self
            .sessions
            .find_by_session(session_id)
            .ok_or(Error::SessionNotFound)?;

        match session.status {
            SessionStatus::AwaitingTeamSelection => {}
            SessionStatus::Expired => return Err(Error::SessionExpired),
            _ => return Err(Error::SessionNotReady),
        }

        if !session.candidate_teams.iter().any(|t| t == team) {
            return Err(Error::InvalidTeamSelection(team.to_string()));
        }

        let exchange_ttl = self.config.broker.exchange_ttl_secs;
        let team_owned = team.to_string();
        let updated = self.sessions.transition(
            session_id,
            SessionStatus::AwaitingTeamSelection,
            SessionStatus::ReadyForExchange,
            |rec| {
                rec.selected_team = Some(team_owned.clone());
                rec.expires_at = now_unix() + exchange_ttl;
            },
        )?;

        audit::emit(&AuditEvent::team_selected(session_id, team));
        Ok(updated)
    }

    /// The single-use exchange: claim the session, mint the broker JWT,
    /// authenticate to Vault as the team, and create the child token.
    ///
    /// The claim (`READY_FOR_EXCHANGE → EXCHANGED`) happens before any Vault
    /// traffic, so concurrent duplicates lose immediately with
    /// `SESSION_ALREADY_USED` and a token minted for a disconnecting client
    /// is still charged against the session. A Vault failure afterwards
    /// moves the record to `FAILED`.
    ///
    /// # Errors
    ///
    /// Session errors from the claim, then Vault errors from the mint path.
    pub async fn exchange(
        &self,
        session_id: &str,
        metadata: &ExchangeMetadata,
    ) -> Result<TokenGrant> {
        metadata.validate()?;

        let claimed = self.sessions.transition(
            session_id,
            SessionStatus::ReadyForExchange,
            SessionStatus::Exchanged,
            |_| {},
        )?;

        let user = claimed
            .user
            .clone()
            .ok_or_else(|| Error::Internal("ready session without user".into()))?;
        let team = claimed
            .selected_team
            .clone()
            .ok_or_else(|| Error::Internal("ready session without team".into()))?;

        match self.mint_child_token(&user, &team, metadata).await {
            Ok(grant) => {
                info!(session_id, team = %team, user = %user.email, "Issued child token");
                audit::emit(&AuditEvent::issued(
                    session_id,
                    &user.email,
                    &team,
                    &grant.policies,
                ));
                Ok(grant)
            }
            Err(e) => {
                warn!(session_id, error = %e, "Exchange failed after claim");
                audit::emit(&AuditEvent::denied(Some(session_id), e.to_string()));
                self.sessions.fail_exchange(session_id);
                Err(e)
            }
        }
    }

    /// Mint the broker JWT and run the two-step Vault authentication.
    ///
    /// The JWT `sub` and the Vault role are both the selected team — never
    /// derived from the group list again.
    async fn mint_child_token(
        &self,
        user: &UserIdentity,
        team: &str,
        metadata: &ExchangeMetadata,
    ) -> Result<TokenGrant> {
        let settings = self
            .config
            .teams
            .settings(team)
            .ok_or_else(|| Error::Internal(format!("selected team {team} not configured")))?;
        let token_role = self
            .config
            .teams
            .token_role(team)
            .ok_or_else(|| Error::Internal(format!("selected team {team} not configured")))?;

        let broker_jwt = self.issuer.mint(user, team, metadata)?;

        // Step 1: team-bound JWT login. The parent token lives for exactly
        // one child-token creation.
        let parent = self.vault.login_as_team(team, &broker_jwt).await?;

        // Step 2: bounded child token from the team's token role.
        let local_part = user.email.split('@').next().unwrap_or("user");
        let request = ChildTokenRequest {
            token_role,
            ttl_secs: settings.ttl_default_secs.min(settings.ttl_max_secs),
            num_uses: settings.uses,
            display_name: format!("{team}-{local_part}"),
            metadata: vault_metadata(user, team, metadata),
        };

        let child = self
            .vault
            .create_child_token(&parent.client_token, &request)
            .await?;

        Ok(TokenGrant {
            token: child.token,
            ttl: child.ttl,
            uses_remaining: child.uses_remaining,
            policies: child.policies,
            metadata: TokenMetadata {
                team: team.to_string(),
                user: user.email.clone(),
                name: user.display_name.clone(),
                pipeline: metadata.pipeline.clone(),
                repo: metadata.repo.clone(),
                target: metadata.target.clone(),
                run_id: metadata.run_id.clone(),
            },
        })
    }

    /// Health summary for `/health`.
    pub async fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            auth_method: "okta_oidc",
            vault_reachable: self.vault.is_reachable().await,
        }
    }
}

/// Vault token metadata: user identity plus the caller-supplied build context.
fn vault_metadata(
    user: &UserIdentity,
    team: &str,
    metadata: &ExchangeMetadata,
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("team".to_string(), team.to_string());
    map.insert("user".to_string(), user.email.clone());
    map.insert("name".to_string(), user.display_name.clone());
    map.insert("source".to_string(), "oidc-broker".to_string());
    map.insert("groups".to_string(), user.groups.join(","));
    if let Some(ref v) = metadata.pipeline {
        map.insert("pipeline".to_string(), v.clone());
    }
    if let Some(ref v) = metadata.repo {
        map.insert("repo".to_string(), v.clone());
    }
    if let Some(ref v) = metadata.target {
        map.insert("target".to_string(), v.clone());
    }
    if let Some(ref v) = metadata.run_id {
        map.insert("run_id".to_string(), v.clone());
    }
    map
}

/// Callback-path transitions fail as `INVALID_STATE` (a concurrent or
/// replayed callback), except expiry which keeps its own kind.
fn callback_transition_error(e: Error) -> Error {
    match e {
        Error::SessionExpired => Error::SessionExpired,
        _ => Error::InvalidState,
    }
}

/// Constant-time string equality for state parameters.
fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
