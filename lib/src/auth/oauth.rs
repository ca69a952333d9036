//! OAuth2 authorization-code + PKCE server (spec.md §4.4). Pure service
//! logic; the HTTP handlers in `crate::api` translate outcomes into
//! redirects / JSON responses.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::rbac::RbacService;
use crate::auth::secret::{hash_authorization_code, hash_client_secret, verify_client_secret};
use crate::config::OAuthConfig;
use crate::constants::oauth::CODE_ENTROPY_BYTES;
use crate::domain::{ClientType, CodeChallengeMethod, OAuthApp, WorkspaceRole};
use crate::error::{Error, OAuth2ErrorCode};
use crate::persistence::{NewAuthorizationCode, NewOAuthApp, Store};

#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// What the `/oauth/authorize` handler should do with the outcome of a
/// request. `RedirectError` and `Redirect` both carry an already-validated
/// `redirect_uri`; `BadRequest` means no redirect may be emitted at all
/// (spec.md §4.4 step 3: "Mismatch must not redirect").
#[derive(Debug)]
pub enum AuthorizeOutcome {
    Redirect { redirect_uri: String, code: String, state: Option<String> },
    RedirectError { redirect_uri: String, error: OAuth2ErrorCode, description: String, state: Option<String> },
    BadRequest(Error),
}

#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub scope: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    tid: String,
    client_id: String,
    scp: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct OAuth2Service {
    store: Arc<dyn Store>,
    config: OAuthConfig,
    rbac: RbacService,
}

fn looks_like_redirect_uri(uri: &str) -> bool {
    url::Url::parse(uri).map(|u| u.scheme() == "http" || u.scheme() == "https").unwrap_or(false)
}

impl OAuth2Service {
    pub fn new(store: Arc<dyn Store>, config: OAuthConfig, rbac: RbacService) -> Self {
        Self { store, config, rbac }
    }

    /// Registers a new OAuth client under a workspace. Confidential clients
    /// must supply a `client_secret`, returned here once in plaintext; only
    /// its PBKDF2 hash is persisted.
    pub async fn register_app(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        client_id: &str,
        client_type: ClientType,
        client_secret: Option<&str>,
        redirect_uris: Vec<String>,
        allowed_scopes: Vec<String>,
    ) -> Result<OAuthApp, Error> {
        self.rbac.require_workspace_role(user_id, workspace_id, WorkspaceRole::Admin).await?;
        if client_id.trim().is_empty() {
            return Err(Error::Validation("client_id must not be empty".to_string()));
        }
        if redirect_uris.is_empty() {
            return Err(Error::Validation("at least one redirect_uri is required".to_string()));
        }
        let client_secret_hash = match (client_type, client_secret) {
            (ClientType::Confidential, None) => {
                return Err(Error::Validation(
                    "confidential clients require a client_secret".to_string(),
                ))
            }
            (ClientType::Confidential, Some(secret)) => Some(hash_client_secret(secret)?),
            (ClientType::Public, _) => None,
        };

        self.store
            .create_oauth_app(NewOAuthApp {
                workspace_id,
                client_id: client_id.to_string(),
                client_secret_hash,
                client_type,
                redirect_uris,
                allowed_scopes,
            })
            .await
    }

    pub async fn list_apps(&self, user_id: Uuid, workspace_id: Uuid) -> Result<Vec<OAuthApp>, Error> {
        self.rbac.require_workspace_role(user_id, workspace_id, WorkspaceRole::Admin).await?;
        self.store.list_oauth_apps(workspace_id).await
    }

    pub async fn authorize(&self, user_id: Uuid, req: AuthorizeRequest) -> AuthorizeOutcome {
        // Step 1: response_type
        if req.response_type != "code" {
            return if looks_like_redirect_uri(&req.redirect_uri) {
                AuthorizeOutcome::RedirectError {
                    redirect_uri: req.redirect_uri,
                    error: OAuth2ErrorCode::UnsupportedResponseType,
                    description: "response_type must be \"code\"".to_string(),
                    state: req.state,
                }
            } else {
                AuthorizeOutcome::BadRequest(Error::Validation("invalid response_type".to_string()))
            };
        }

        // Step 2: load app
        let app = match self.store.get_oauth_app_by_client_id(&req.client_id).await {
            Ok(Some(app)) => app,
            Ok(None) => {
                return AuthorizeOutcome::BadRequest(Error::oauth2(
                    OAuth2ErrorCode::InvalidRequest,
                    "unknown client_id",
                ))
            }
            Err(e) => return AuthorizeOutcome::BadRequest(e),
        };
        if !app.is_enabled {
            return AuthorizeOutcome::BadRequest(Error::oauth2(
                OAuth2ErrorCode::UnauthorizedClient,
                "this client is disabled",
            ));
        }

        // Step 3: redirect_uri must be registered, exact match. A mismatch
        // must not redirect.
        if !app.redirect_uris.iter().any(|u| u == &req.redirect_uri) {
            return AuthorizeOutcome::BadRequest(Error::oauth2(
                OAuth2ErrorCode::InvalidRequest,
                "redirect_uri is not registered for this client",
            ));
        }

        // From here on redirect_uri is trusted; failures redirect with an
        // error code rather than returning a bare status.
        let redirect_uri = req.redirect_uri.clone();

        // Step 4: PKCE requirements.
        let method = match &req.code_challenge_method {
            Some(m) => match CodeChallengeMethod::parse(m) {
                Some(method) => Some(method),
                None => {
                    return AuthorizeOutcome::RedirectError {
                        redirect_uri,
                        error: OAuth2ErrorCode::InvalidRequest,
                        description: "unsupported code_challenge_method".to_string(),
                        state: req.state,
                    }
                }
            },
            None => None,
        };
        if app.client_type == ClientType::Public
            && (req.code_challenge.is_none() || method != Some(CodeChallengeMethod::S256))
        {
            return AuthorizeOutcome::RedirectError {
                redirect_uri,
                error: OAuth2ErrorCode::InvalidRequest,
                description: "public clients must present a code_challenge using S256".to_string(),
                state: req.state,
            };
        }

        // Step 5: scope intersection.
        let scopes: Vec<String> = match &req.scope {
            None => app.allowed_scopes.clone(),
            Some(requested) => {
                let requested: Vec<&str> = requested.split_whitespace().collect();
                if requested.iter().any(|s| !app.allowed_scopes.iter().any(|a| a == s)) {
                    return AuthorizeOutcome::RedirectError {
                        redirect_uri,
                        error: OAuth2ErrorCode::InvalidScope,
                        description: "requested scope exceeds allowed_scopes".to_string(),
                        state: req.state,
                    };
                }
                requested.into_iter().map(str::to_string).collect()
            }
        };

        // Step 6: generate the code, store only its hash.
        let mut raw = vec![0u8; CODE_ENTROPY_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        let code = URL_SAFE_NO_PAD.encode(&raw);
        let code_hash = hash_authorization_code(&code);

        let result = self
            .store
            .create_authorization_code(NewAuthorizationCode {
                code_hash,
                oauth_app_id: app.id,
                user_id,
                workspace_id: app.workspace_id,
                scopes,
                redirect_uri: redirect_uri.clone(),
                code_challenge: req.code_challenge,
                code_challenge_method: method,
                expires_at: Utc::now() + Duration::seconds(self.config.code_ttl_sec),
            })
            .await;

        if let Err(e) = result {
            return AuthorizeOutcome::BadRequest(e);
        }

        // Step 7.
        AuthorizeOutcome::Redirect { redirect_uri, code, state: req.state }
    }

    pub async fn token(&self, req: TokenRequest) -> Result<TokenResponse, Error> {
        if req.grant_type != "authorization_code" {
            return Err(Error::oauth2(
                OAuth2ErrorCode::UnsupportedGrantType,
                "grant_type must be \"authorization_code\"",
            ));
        }

        let app = self
            .store
            .get_oauth_app_by_client_id(&req.client_id)
            .await?
            .ok_or_else(|| Error::oauth2(OAuth2ErrorCode::InvalidClient, "unknown client_id"))?;

        let code_hash = hash_authorization_code(&req.code);
        let code = self
            .store
            .get_authorization_code_by_hash(&code_hash)
            .await?
            .filter(|c| c.oauth_app_id == app.id)
            .ok_or_else(|| Error::oauth2(OAuth2ErrorCode::InvalidGrant, "unknown or expired code"))?;

        if code.is_used {
            return Err(Error::oauth2(
                OAuth2ErrorCode::InvalidGrant,
                "this authorization code has already been used",
            ));
        }
        if code.is_expired(Utc::now()) {
            return Err(Error::oauth2(OAuth2ErrorCode::InvalidGrant, "authorization code has expired"));
        }
        if code.redirect_uri != req.redirect_uri {
            return Err(Error::oauth2(
                OAuth2ErrorCode::InvalidGrant,
                "redirect_uri does not match the one used at authorization time",
            ));
        }

        if app.client_type == ClientType::Confidential {
            let secret = req
                .client_secret
                .as_deref()
                .ok_or_else(|| Error::oauth2(OAuth2ErrorCode::InvalidClient, "client_secret is required"))?;
            let hash = app
                .client_secret_hash
                .as_deref()
                .ok_or_else(|| Error::oauth2(OAuth2ErrorCode::InvalidClient, "client has no secret configured"))?;
            if !verify_client_secret(secret, hash)? {
                return Err(Error::oauth2(OAuth2ErrorCode::InvalidClient, "invalid client_secret"));
            }
        }

        match &code.code_challenge {
            Some(challenge) => {
                let verifier = req
                    .code_verifier
                    .as_deref()
                    .ok_or_else(|| Error::oauth2(OAuth2ErrorCode::InvalidGrant, "code_verifier is required"))?;
                let ok = match code.code_challenge_method {
                    Some(CodeChallengeMethod::S256) => {
                        let digest = Sha256::digest(verifier.as_bytes());
                        URL_SAFE_NO_PAD.encode(digest) == *challenge
                    }
                    Some(CodeChallengeMethod::Plain) | None => verifier == challenge,
                };
                if !ok {
                    return Err(Error::oauth2(OAuth2ErrorCode::InvalidGrant, "code_verifier does not match"));
                }
            }
            None if app.client_type == ClientType::Public => {
                return Err(Error::oauth2(
                    OAuth2ErrorCode::InvalidGrant,
                    "public clients must use PKCE",
                ));
            }
            None => {}
        }

        let code = match self.store.consume_authorization_code(code.id).await {
            Ok(code) => code,
            Err(Error::Conflict(_)) => {
                return Err(Error::oauth2(
                    OAuth2ErrorCode::InvalidGrant,
                    "this authorization code has already been used",
                ))
            }
            Err(e) => return Err(e),
        };

        let user = self
            .store
            .get_user(code.user_id)
            .await?
            .ok_or_else(|| Error::Database("authorization code references an unknown user".to_string()))?;

        let now = Utc::now();
        let exp = now + Duration::seconds(self.config.access_token_ttl_sec);
        let claims = AccessTokenClaims {
            sub: user.subject,
            tid: code.workspace_id.to_string(),
            client_id: app.client_id,
            scp: code.scopes.join(" "),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };
        let access_token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.config.signing_secret.as_bytes()),
        )
        .map_err(|e| {
            tracing::error!(error = %e, "failed to sign access token");
            Error::Internal
        })?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in: self.config.access_token_ttl_sec,
            scope: claims.scp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryStore, NewOAuthApp};

    async fn setup() -> (Arc<dyn Store>, OAuth2Service, Uuid, Uuid) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let user = store.get_or_create_user("sub|1", None, None).await.unwrap();
        let workspace = store
            .create_workspace("acme", None, None, user.id)
            .await
            .unwrap();
        let config = OAuthConfig {
            access_token_ttl_sec: 3600,
            code_ttl_sec: 60,
            signing_secret: "test-secret".to_string(),
        };
        let rbac = RbacService::new(store.clone());
        let service = OAuth2Service::new(store.clone(), config, rbac);
        (store, service, user.id, workspace.id)
    }

    #[tokio::test]
    async fn rejects_unregistered_redirect_uri_without_redirecting() {
        let (store, service, user_id, workspace_id) = setup().await;
        let app = store
            .create_oauth_app(NewOAuthApp {
                workspace_id,
                client_id: "client-1".to_string(),
                client_secret_hash: None,
                client_type: ClientType::Public,
                redirect_uris: vec!["https://example.test/cb".to_string()],
                allowed_scopes: vec!["files:read".to_string()],
            })
            .await
            .unwrap();

        let outcome = service
            .authorize(
                user_id,
                AuthorizeRequest {
                    response_type: "code".to_string(),
                    client_id: app.client_id.clone(),
                    redirect_uri: "https://attacker.example/cb".to_string(),
                    scope: None,
                    state: None,
                    code_challenge: None,
                    code_challenge_method: None,
                },
            )
            .await;
        assert!(matches!(outcome, AuthorizeOutcome::BadRequest(_)));
    }

    #[tokio::test]
    async fn public_client_without_pkce_redirects_with_invalid_request() {
        let (store, service, user_id, workspace_id) = setup().await;
        let app = store
            .create_oauth_app(NewOAuthApp {
                workspace_id,
                client_id: "client-1".to_string(),
                client_secret_hash: None,
                client_type: ClientType::Public,
                redirect_uris: vec!["https://example.test/cb".to_string()],
                allowed_scopes: vec!["files:read".to_string()],
            })
            .await
            .unwrap();

        let outcome = service
            .authorize(
                user_id,
                AuthorizeRequest {
                    response_type: "code".to_string(),
                    client_id: app.client_id.clone(),
                    redirect_uri: "https://example.test/cb".to_string(),
                    scope: None,
                    state: None,
                    code_challenge: None,
                    code_challenge_method: None,
                },
            )
            .await;
        match outcome {
            AuthorizeOutcome::RedirectError { error, description, .. } => {
                assert_eq!(error, OAuth2ErrorCode::InvalidRequest);
                assert!(description.contains("code_challenge"));
            }
            other => panic!("expected RedirectError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_code_flow_with_pkce_and_replay_rejection() {
        let (store, service, user_id, workspace_id) = setup().await;
        let app = store
            .create_oauth_app(NewOAuthApp {
                workspace_id,
                client_id: "client-1".to_string(),
                client_secret_hash: None,
                client_type: ClientType::Public,
                redirect_uris: vec!["https://example.test/cb".to_string()],
                allowed_scopes: vec!["files:read".to_string()],
            })
            .await
            .unwrap();

        let verifier = "a-sufficiently-long-verifier-string-1234567890";
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

        let outcome = service
            .authorize(
                user_id,
                AuthorizeRequest {
                    response_type: "code".to_string(),
                    client_id: app.client_id.clone(),
                    redirect_uri: "https://example.test/cb".to_string(),
                    scope: None,
                    state: Some("xyz".to_string()),
                    code_challenge: Some(challenge),
                    code_challenge_method: Some("S256".to_string()),
                },
            )
            .await;
        let code = match outcome {
            AuthorizeOutcome::Redirect { code, .. } => code,
            other => panic!("expected Redirect, got {other:?}"),
        };

        let token_req = TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: code.clone(),
            redirect_uri: "https://example.test/cb".to_string(),
            client_id: app.client_id.clone(),
            client_secret: None,
            code_verifier: Some(verifier.to_string()),
        };
        let token = service.token(token_req.clone()).await.unwrap();
        assert_eq!(token.token_type, "Bearer");

        let replay = service.token(token_req).await;
        assert!(matches!(replay, Err(Error::OAuth2 { code: OAuth2ErrorCode::InvalidGrant, .. })));
    }

    #[tokio::test]
    async fn confidential_app_requires_a_secret_and_hashes_it() {
        let (_store, service, user_id, workspace_id) = setup().await;
        let result = service
            .register_app(
                user_id,
                workspace_id,
                "client-2",
                ClientType::Confidential,
                None,
                vec!["https://example.test/cb".to_string()],
                vec!["files:read".to_string()],
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let app = service
            .register_app(
                user_id,
                workspace_id,
                "client-2",
                ClientType::Confidential,
                Some("s3cr3t"),
                vec!["https://example.test/cb".to_string()],
                vec!["files:read".to_string()],
            )
            .await
            .unwrap();
        assert_ne!(app.client_secret_hash.as_deref(), Some("s3cr3t"));
    }

    #[tokio::test]
    async fn non_admin_cannot_list_apps() {
        let (store, service, _user_id, workspace_id) = setup().await;
        let member = store.get_or_create_user("member", None, None).await.unwrap();
        store
            .create_workspace_membership(workspace_id, member.id, WorkspaceRole::Member)
            .await
            .unwrap();

        let result = service.list_apps(member.id, workspace_id).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }
}
