use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientType {
    Public,
    Confidential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CodeChallengeMethod {
    S256,
    Plain,
}

impl CodeChallengeMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "S256" => Some(Self::S256),
            "plain" => Some(Self::Plain),
            _ => None,
        }
    }
}

/// `{id, workspaceId, clientId, clientSecretHash?, clientType, redirectUris,
/// allowedScopes, isEnabled}`. `clientSecretHash` is a PBKDF2-SHA256 hash
/// (salt + iteration count embedded); never the raw secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthApp {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// `{id, codeHash, oauthAppId, userId, workspaceId, scopes, redirectUri,
/// codeChallenge?, codeChallengeMethod?, createdAt, expiresAt, isUsed,
/// usedAt?}`. Only the SHA-256 hash of the code is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationCode {
    pub id: Uuid,
    pub code_hash: String,
    pub oauth_app_id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
