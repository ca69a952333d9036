//! `/oauth/authorize` + `/oauth/token` (spec.md §4.4) and the workspace-scoped
//! OAuth app management endpoints (SPEC_FULL §3 supplement).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::oauth::{AuthorizeOutcome, AuthorizeRequest, TokenRequest};
use crate::auth::Principal;
use crate::domain::ClientType;
use crate::error::Result;
use crate::services::Services;

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Redirects back to the client with an authorization code (or an error
/// code, per RFC 6749 §4.1.2.1) unless the request failed validation before
/// a trusted `redirect_uri` was established, in which case it responds with
/// a bare 400 rather than redirecting anywhere (spec.md §4.4 step 3).
pub async fn authorize(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let outcome = services
        .oauth
        .authorize(
            user_id,
            AuthorizeRequest {
                response_type: query.response_type,
                client_id: query.client_id,
                redirect_uri: query.redirect_uri,
                scope: query.scope,
                state: query.state,
                code_challenge: query.code_challenge,
                code_challenge_method: query.code_challenge_method,
            },
        )
        .await;

    match outcome {
        AuthorizeOutcome::Redirect { redirect_uri, code, state } => {
            let mut url = redirect_uri;
            url.push_str(if url.contains('?') { "&" } else { "?" });
            url.push_str(&format!("code={}", urlencode(&code)));
            if let Some(state) = state {
                url.push_str(&format!("&state={}", urlencode(&state)));
            }
            Redirect::to(&url).into_response()
        }
        AuthorizeOutcome::RedirectError { redirect_uri, error, description, state } => {
            let mut url = redirect_uri;
            url.push_str(if url.contains('?') { "&" } else { "?" });
            url.push_str(&format!("error={}", error.as_str()));
            url.push_str(&format!("&error_description={}", urlencode(&description)));
            if let Some(state) = state {
                url.push_str(&format!("&state={}", urlencode(&state)));
            }
            Redirect::to(&url).into_response()
        }
        AuthorizeOutcome::BadRequest(err) => err.into_response(),
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
}

pub async fn token(State(services): State<Services>, Form(form): Form<TokenForm>) -> Result<impl IntoResponse> {
    let response = services
        .oauth
        .token(TokenRequest {
            grant_type: form.grant_type,
            code: form.code,
            redirect_uri: form.redirect_uri,
            client_id: form.client_id,
            client_secret: form.client_secret,
            code_verifier: form.code_verifier,
        })
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAppRequest {
    pub client_id: String,
    pub client_type: ClientType,
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub allowed_scopes: Vec<String>,
}

pub async fn register_app(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(workspace_id): Path<Uuid>,
    Json(body): Json<RegisterAppRequest>,
) -> Result<impl IntoResponse> {
    let app = services
        .oauth
        .register_app(
            user_id,
            workspace_id,
            &body.client_id,
            body.client_type,
            body.client_secret.as_deref(),
            body.redirect_uris,
            body.allowed_scopes,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(app)))
}

pub async fn list_apps(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(workspace_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let apps = services.oauth.list_apps(user_id, workspace_id).await?;
    Ok(Json(apps))
}
