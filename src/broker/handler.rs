//! HTTP surface — routes, request/response schemas, and the error boundary.
//!
//! # Routes
//!
//! | Method | Path | Flow |
//! |--------|------|------|
//! | `GET`  | `/` | landing page |
//! | `GET`  | `/health` | health probe |
//! | `GET`  | `/.well-known/jwks.json` | broker JWKS |
//! | `POST` | `/cli/start` | CLI: create a session |
//! | `GET`  | `/auth/login` | browser: 302 to the IdP, sets the state cookie |
//! | `GET`  | `/auth/callback` | IdP redirect target |
//! | `GET`  | `/auth/select-team` | team-selection page |
//! | `POST` | `/auth/select-team` | fix the team context |
//! | `POST` | `/exchange` | single-use child-token exchange |
//!
//! Request bodies are JSON; unknown input fields are ignored, outputs carry
//! no unknown fields. Every internal error is converted to the closed wire
//! taxonomy here and logged with the session id, never with token material.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::pages;
use super::{Broker, CallbackOutcome};
use crate::jwt::ExchangeMetadata;
use crate::session::SessionStatus;
use crate::{Error, Result};

/// Name of the CSRF cross-check cookie set by `/auth/login`.
const STATE_COOKIE: &str = "broker_state";

/// `/exchange` request body.
#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    /// Session handle from the callback page.
    pub session_id: String,
    /// Optional build metadata, woven into the token.
    #[serde(flatten)]
    pub metadata: ExchangeMetadata,
}

/// `/auth/select-team` POST body.
#[derive(Debug, Deserialize)]
pub struct SelectTeamRequest {
    /// Session handle.
    pub session_id: String,
    /// Chosen team; must be among the session's candidates.
    pub team: String,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SelectTeamQuery {
    session_id: String,
}

/// Build the broker router.
pub fn create_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/.well-known/jwks.json", get(jwks))
        .route("/cli/start", post(cli_start))
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/select-team", get(select_team_page).post(select_team))
        .route("/exchange", post(exchange))
        .with_state(broker)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            warn!(kind = self.wire_kind(), error = %self, "Request failed");
        }
        (
            status,
            Json(json!({ "error": self.wire_kind(), "message": self.to_string() })),
        )
            .into_response()
    }
}

/// `GET /` — landing page.
async fn home() -> Html<String> {
    Html(pages::home_page())
}

/// `GET /health` — liveness plus Vault reachability.
async fn health(State(broker): State<Arc<Broker>>) -> Response {
    Json(broker.health().await).into_response()
}

/// `GET /.well-known/jwks.json` — the broker's signing keys.
async fn jwks(State(broker): State<Arc<Broker>>) -> Response {
    Json(broker.jwks().clone()).into_response()
}

/// `POST /cli/start` — create a session for the CLI flow.
async fn cli_start(State(broker): State<Arc<Broker>>) -> Result<Response> {
    let started = broker.start_session()?;
    Ok(Json(started).into_response())
}

/// `GET /auth/login` — create a session and bounce to the IdP.
///
/// The server-side `state` is mirrored into a cookie so the callback can
/// cross-check it against the query parameter.
async fn login(State(broker): State<Arc<Broker>>) -> Result<Response> {
    let started = broker.start_session()?;
    let cookie = format!(
        "{STATE_COOKIE}={}; HttpOnly; SameSite=Lax; Max-Age={}; Path=/auth",
        started.state, broker.config.broker.session_ttl_secs
    );
    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, started.auth_url),
            (header::SET_COOKIE, cookie),
        ],
    )
        .into_response())
}

/// `GET /auth/callback` — the IdP redirect target for both flows.
async fn callback(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response> {
    if let Some(idp_error) = params.error {
        if let Some(ref state) = params.state {
            if let Some(session) = broker.sessions.find_by_state(state) {
                broker.sessions.fail(&session.session_id);
            }
        }
        let detail = params.error_description.unwrap_or(idp_error);
        return Err(Error::TokenExchangeFailed(format!("IdP error: {detail}")));
    }

    let code = params.code.ok_or(Error::InvalidState)?;
    let state = params.state.ok_or(Error::InvalidState)?;
    let cookie_state = state_cookie(&headers);

    match broker
        .handle_callback(&code, &state, cookie_state.as_deref())
        .await?
    {
        CallbackOutcome::Ready { session_id } => {
            Ok(Html(pages::callback_page(&session_id)).into_response())
        }
        CallbackOutcome::NeedsTeamSelection { session_id } => Ok((
            StatusCode::FOUND,
            [(
                header::LOCATION,
                format!("/auth/select-team?session_id={session_id}"),
            )],
        )
            .into_response()),
    }
}

/// `GET /auth/select-team` — render the candidate list.
async fn select_team_page(
    State(broker): State<Arc<Broker>>,
    Query(query): Query<SelectTeamQuery>,
) -> Result<Response> {
    let session = broker
        .sessions
        .find_by_session(&query.session_id)
        .ok_or(Error::SessionNotFound)?;

    match session.status {
        SessionStatus::AwaitingTeamSelection => {}
        SessionStatus::Expired => return Err(Error::SessionExpired),
        _ => return Err(Error::SessionNotReady),
    }

    let email = session.user.as_ref().map_or("", |u| u.email.as_str());
    Ok(Html(pages::select_team_page(
        &session.session_id,
        email,
        &session.candidate_teams,
    ))
    .into_response())
}

/// `POST /auth/select-team` — fix the team and render the callback page.
async fn select_team(
    State(broker): State<Arc<Broker>>,
    Json(request): Json<SelectTeamRequest>,
) -> Result<Response> {
    let updated = broker.select_team(&request.session_id, &request.team)?;
    Ok(Html(pages::callback_page(&updated.session_id)).into_response())
}

/// `POST /exchange` — the single point where a Vault child token is minted.
async fn exchange(
    State(broker): State<Arc<Broker>>,
    Json(request): Json<ExchangeRequest>,
) -> Result<Response> {
    let grant = broker
        .exchange(&request.session_id, &request.metadata)
        .await?;
    Ok(Json(grant).into_response())
}

/// Extract the state cookie, when the browser sent one.
fn state_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name == STATE_COOKIE).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cookie_is_parsed_from_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "other=1; broker_state=st-123; theme=dark".parse().unwrap(),
        );
        assert_eq!(state_cookie(&headers).as_deref(), Some("st-123"));
    }

    #[test]
    fn missing_state_cookie_is_none() {
        let headers = HeaderMap::new();
        assert!(state_cookie(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "theme=dark".parse().unwrap());
        assert!(state_cookie(&headers).is_none());
    }

    #[test]
    fn error_responses_carry_the_wire_kind() {
        let response = Error::SessionAlreadyUsed.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = Error::Backpressure.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn exchange_request_ignores_unknown_fields() {
        let request: ExchangeRequest = serde_json::from_str(
            r#"{"session_id": "sess_1", "pipeline": "ci", "future_field": true}"#,
        )
        .unwrap();
        assert_eq!(request.session_id, "sess_1");
        assert_eq!(request.metadata.pipeline.as_deref(), Some("ci"));
        assert!(request.metadata.repo.is_none());
    }
}
