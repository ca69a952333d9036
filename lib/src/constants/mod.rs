//! Configuration constants for the Octopus backend.

/// Default server configuration.
pub mod server {
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 8080;

    /// Max request body size accepted by any endpoint (bytes). Large enough
    /// for IFC source uploads; the multipart/content endpoints stream rather
    /// than buffer, but axum still needs an upper bound.
    pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024 * 1024;
}

/// Database / persistence configuration.
pub mod database {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 16;
    pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
    pub const DEFAULT_SQLITE_PATH: &str = "octopus.sqlite3";

    /// Default limit for paginated list endpoints.
    pub const DEFAULT_PAGE_SIZE: i64 = 20;
    /// Maximum allowed page size for paginated list endpoints.
    pub const MAX_PAGE_SIZE: i64 = 100;
}

/// Upload-session state machine configuration.
pub mod upload {
    /// Default reservation TTL (`T_reserve`), in seconds: 24 hours.
    pub const DEFAULT_RESERVE_TTL_SECS: i64 = 24 * 60 * 60;

    /// How often the expiry sweeper runs.
    pub const SWEEP_INTERVAL_SECS: u64 = 60;
}

/// Background job processing configuration.
pub mod processing {
    pub const DEFAULT_WORKERS: usize = 2;
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
    pub const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;

    /// Bound on the in-process queue backlog before `enqueue` starts
    /// reporting pressure via the backlog-growth metric (the queue itself
    /// never refuses work; spec.md calls for "unbounded backlog growth
    /// reported as a metric").
    pub const BACKLOG_WARN_THRESHOLD: usize = 1_000;
}

/// OAuth2 authorization server configuration.
pub mod oauth {
    pub const DEFAULT_CODE_TTL_SECS: i64 = 60;
    pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 3600;

    /// Minimum entropy of an authorization code before url-safe base64
    /// encoding, in bytes (256 bits).
    pub const CODE_ENTROPY_BYTES: usize = 32;

    /// PBKDF2-HMAC-SHA256 iteration count for client-secret hashing.
    pub const PBKDF2_ITERATIONS: u32 = 100_000;
    /// Salt length for client-secret hashing, in bytes.
    pub const PBKDF2_SALT_BYTES: usize = 16;
}

/// Storage key construction.
pub mod storage {
    /// Pool segment used for temporary upload-session objects.
    pub const POOL_UPLOADS: &str = "uploads";
    /// Pool segment used for committed source files.
    pub const POOL_FILES: &str = "files";
    /// Pool segment used for derived artifacts (WexBIM, properties).
    pub const POOL_ARTIFACTS: &str = "artifacts";

    /// Maximum length of a storage key, in bytes, per the Storage Provider
    /// contract.
    pub const MAX_KEY_BYTES: usize = 1000;
}
