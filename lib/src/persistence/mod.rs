//! Transactional metadata store (§5). [`Store`] is the single point of
//! contact every service uses for persistence; [`SqliteStore`] is the
//! appliance's default embedded backend, [`InMemoryStore`] backs unit tests.

pub mod memory_store;
pub mod rows;
pub mod schema;
pub mod sqlite_store;

pub use memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::*;
use crate::error::Result;

/// A page of results plus enough bookkeeping for the caller to render
/// pagination controls.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

/// Optional filters for the file registry list query.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub kind: Option<FileKind>,
    pub category: Option<FileCategory>,
    pub include_deleted: bool,
}

/// A job envelope as persisted in the outbox, ready to be handed to the
/// processing pipeline. See [`crate::processing::JobEnvelope`].
#[derive(Debug, Clone)]
pub struct PersistedJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: String,
    pub attempt: i32,
    pub enqueued_at: DateTime<Utc>,
}

/// A job to be enqueued transactionally alongside some other write (the
/// outbox pattern backing at-least-once delivery, §4.5/§9).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct NewOAuthApp {
    pub workspace_id: Uuid,
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewAuthorizationCode {
    pub code_hash: String,
    pub oauth_app_id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub expires_at: DateTime<Utc>,
}

/// The full persistence contract. Every method that the spec calls out as
/// needing transactional or guarded semantics documents that in its doc
/// comment; implementations must honor it identically.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- Workspaces -----------------------------------------------------

    /// Creates the workspace and an `Owner` membership for `owner_user_id`
    /// in a single transaction.
    async fn create_workspace(
        &self,
        name: &str,
        description: Option<&str>,
        quota_bytes: Option<i64>,
        owner_user_id: Uuid,
    ) -> Result<Workspace>;

    async fn get_workspace(&self, id: Uuid) -> Result<Option<Workspace>>;

    async fn update_workspace(
        &self,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Workspace>;

    async fn list_workspaces_for_user(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Workspace>>;

    async fn workspace_role_for_user(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WorkspaceRole>>;

    async fn create_workspace_membership(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<WorkspaceMembership>;

    async fn delete_workspace_membership(&self, workspace_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// `Σ sizeBytes` over non-deleted files in every project of the
    /// workspace (§4.2 Usage).
    async fn workspace_usage(&self, workspace_id: Uuid) -> Result<i64>;

    // ---- Projects ---------------------------------------------------------

    async fn create_project(
        &self,
        workspace_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>>;

    async fn project_role_for_user(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ProjectRole>>;

    async fn create_project_membership(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
    ) -> Result<ProjectMembership>;

    // ---- Users --------------------------------------------------------

    /// Auto-provisions a `User` row for `subject` if one does not already
    /// exist (§4.4 Principal -> user provisioning).
    async fn get_or_create_user(
        &self,
        subject: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<User>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    // ---- Upload sessions ------------------------------------------------

    async fn create_upload_session(
        &self,
        project_id: Uuid,
        file_name: &str,
        content_type: Option<&str>,
        expected_size_bytes: Option<i64>,
        temp_storage_key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<UploadSession>;

    async fn get_upload_session(&self, id: Uuid) -> Result<Option<UploadSession>>;

    /// Transitions `id` to `Uploading`, rejecting terminal/expired sessions.
    /// Returns `Error::Conflict` if the session is already terminal.
    async fn mark_upload_session_uploading(&self, id: Uuid) -> Result<UploadSession>;

    /// Marks the session `Failed` with no further state change allowed.
    async fn mark_upload_session_failed(&self, id: Uuid) -> Result<UploadSession>;

    /// Guarded commit: only succeeds from `Uploading`; inserts the `File`
    /// row and flips the session to `Committed` atomically. A lost race
    /// (session no longer `Uploading`) yields `Error::Conflict`.
    async fn commit_upload_session(
        &self,
        session_id: Uuid,
        file: NewFile,
    ) -> Result<(UploadSession, File)>;

    /// Sessions past `expiresAt` still in a non-terminal state, for the
    /// expiry sweeper.
    async fn list_expirable_upload_sessions(&self, now: DateTime<Utc>) -> Result<Vec<UploadSession>>;

    async fn mark_upload_session_expired(&self, id: Uuid) -> Result<bool>;

    // ---- Files ------------------------------------------------------------

    async fn get_file(&self, id: Uuid) -> Result<Option<File>>;

    async fn list_files(
        &self,
        project_id: Uuid,
        filter: FileFilter,
        page: i64,
        page_size: i64,
    ) -> Result<Page<File>>;

    async fn insert_file(&self, file: NewFile) -> Result<File>;

    /// Soft-deletes `id`; the caller is responsible for checking link
    /// restrictions first (§4.2 Lineage and soft-delete).
    async fn soft_delete_file(&self, id: Uuid) -> Result<File>;

    async fn create_file_link(
        &self,
        source_file_id: Uuid,
        target_file_id: Uuid,
        link_type: LinkType,
    ) -> Result<FileLink>;

    async fn list_links_from(&self, source_file_id: Uuid) -> Result<Vec<FileLink>>;

    async fn list_links_to(&self, target_file_id: Uuid) -> Result<Vec<FileLink>>;

    /// Soft-deleted files whose bytes have not yet been reclaimed, for the
    /// reclamation sweep (SPEC_FULL §3).
    async fn list_unreclaimed_deleted_files(&self, limit: i64) -> Result<Vec<File>>;

    async fn mark_file_bytes_reclaimed(&self, id: Uuid) -> Result<()>;

    // ---- Models & versions ------------------------------------------------

    async fn create_model(
        &self,
        project_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Model>;

    async fn get_model(&self, id: Uuid) -> Result<Option<Model>>;

    async fn list_models(&self, project_id: Uuid, page: i64, page_size: i64) -> Result<Page<Model>>;

    /// Inserts a `ModelVersion` with `versionNumber = max(existing) + 1` and
    /// the given outbox jobs, all in one transaction (§4.3 durable outbox
    /// requirement). `version_id` is generated by the caller so it can be
    /// embedded in each job's payload ahead of the insert.
    async fn create_model_version_with_jobs(
        &self,
        model_id: Uuid,
        version_id: Uuid,
        ifc_file_id: Uuid,
        jobs: Vec<NewJob>,
    ) -> Result<(ModelVersion, Vec<PersistedJob>)>;

    async fn get_model_version(&self, id: Uuid) -> Result<Option<ModelVersion>>;

    async fn list_model_versions(
        &self,
        model_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<ModelVersion>>;

    /// Guarded update: only applies if the version's current status is in
    /// `expected`. Returns `Error::Conflict` otherwise (§9 guarded
    /// read-modify-write).
    async fn update_model_version_guarded(
        &self,
        id: Uuid,
        expected: &[ModelVersionStatus],
        mutate: ModelVersionUpdate,
    ) -> Result<ModelVersion>;

    // ---- Processing outbox --------------------------------------------

    async fn list_pending_jobs(&self) -> Result<Vec<PersistedJob>>;

    async fn reschedule_job(&self, id: Uuid, attempt: i32, next_attempt_at: DateTime<Utc>) -> Result<()>;

    async fn delete_job(&self, id: Uuid) -> Result<()>;

    // ---- OAuth2 ---------------------------------------------------------

    async fn create_oauth_app(&self, app: NewOAuthApp) -> Result<OAuthApp>;

    async fn get_oauth_app_by_client_id(&self, client_id: &str) -> Result<Option<OAuthApp>>;

    async fn list_oauth_apps(&self, workspace_id: Uuid) -> Result<Vec<OAuthApp>>;

    async fn create_authorization_code(&self, code: NewAuthorizationCode) -> Result<AuthorizationCode>;

    async fn get_authorization_code_by_hash(&self, code_hash: &str) -> Result<Option<AuthorizationCode>>;

    /// Atomically sets `isUsed = true` iff it was previously `false`.
    /// Returns `Error::Conflict` on replay (§4.4 step 7, invariant 6).
    async fn consume_authorization_code(&self, id: Uuid) -> Result<AuthorizationCode>;
}

/// Parameters for inserting a `File` row; timestamps and id are stamped by
/// the store.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub project_id: Uuid,
    pub name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub kind: FileKind,
    pub category: FileCategory,
    pub storage_provider: String,
    pub storage_key: String,
}

/// Sparse update applied by [`Store::update_model_version_guarded`].
#[derive(Debug, Clone, Default)]
pub struct ModelVersionUpdate {
    pub status: Option<ModelVersionStatus>,
    pub wex_bim_file_id: Option<Uuid>,
    pub properties_file_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}
