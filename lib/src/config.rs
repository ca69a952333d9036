//! Enumerated configuration surface for the appliance: database, storage,
//! auth, processing, quota, and OAuth2 knobs. Loaded from TOML and overlaid
//! with CLI flags by the binary.

use serde::{Deserialize, Serialize};
use std::fs;

use crate::constants::{database as db_const, oauth as oauth_const, processing as proc_const};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub log_format: LogFormat,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub processing: ProcessingConfig,
    pub quota: QuotaConfig,
    pub oauth: OAuthConfig,
}

/// Log output format. `Auto` resolves to `Json` when stdout is not a TTY
/// (production/container deployments) and `Text` when it is (local dev).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
    #[default]
    Auto,
}

impl LogFormat {
    pub fn resolve(self) -> Self {
        match self {
            LogFormat::Auto => {
                if std::io::IsTerminal::is_terminal(&std::io::stdout()) {
                    LogFormat::Text
                } else {
                    LogFormat::Json
                }
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseProvider {
    Sqlite,
    Postgres,
    Sqlserver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub provider: DatabaseProvider,
    #[serde(rename = "connectionString")]
    pub connection_string: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageProviderKind {
    LocalDisk,
    AzureBlob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProviderKind,
    /// Root directory used by `localDisk`; ignored by other providers.
    pub local_disk_root: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Development,
    Oidc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub dev: DevAuthConfig,
    pub oidc: OidcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevAuthConfig {
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    pub authority: String,
    pub audience: String,
    pub require_https_metadata: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub workers: usize,
    #[serde(rename = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(rename = "backoffBaseMs")]
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// `None` means unlimited.
    #[serde(rename = "workspaceBytes")]
    pub workspace_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(rename = "accessTokenTtlSec")]
    pub access_token_ttl_sec: i64,
    #[serde(rename = "codeTtlSec")]
    pub code_ttl_sec: i64,
    /// Secret used to sign HS256 access tokens. Development default is
    /// fixed; production deployments must override it.
    pub signing_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_format: LogFormat::Auto,
            database: DatabaseConfig {
                provider: DatabaseProvider::Sqlite,
                connection_string: db_const::DEFAULT_SQLITE_PATH.to_string(),
            },
            storage: StorageConfig {
                provider: StorageProviderKind::LocalDisk,
                local_disk_root: "./octopus-data".to_string(),
            },
            auth: AuthConfig {
                mode: AuthMode::Development,
                dev: DevAuthConfig {
                    subject: "dev-user".to_string(),
                    email: Some("dev@example.com".to_string()),
                    display_name: Some("Development User".to_string()),
                },
                oidc: OidcConfig {
                    authority: String::new(),
                    audience: String::new(),
                    require_https_metadata: true,
                },
            },
            processing: ProcessingConfig {
                workers: proc_const::DEFAULT_WORKERS,
                max_attempts: proc_const::DEFAULT_MAX_ATTEMPTS,
                backoff_base_ms: proc_const::DEFAULT_BACKOFF_BASE_MS,
            },
            quota: QuotaConfig {
                workspace_bytes: None,
            },
            oauth: OAuthConfig {
                access_token_ttl_sec: oauth_const::DEFAULT_ACCESS_TOKEN_TTL_SECS,
                code_ttl_sec: oauth_const::DEFAULT_CODE_TTL_SECS,
                signing_secret: "development-only-signing-secret".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config file: {e}")))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string(&config).expect("serialize");
        let parsed: Config = toml::from_str(&serialized).expect("parse");
        assert_eq!(parsed.port, config.port);
        assert_eq!(parsed.database.provider, DatabaseProvider::Sqlite);
    }
}
