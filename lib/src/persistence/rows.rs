//! Row types mirroring [`super::schema`] plus conversions to/from the
//! domain types in [`crate::domain`]. Diesel's SQLite backend has no native
//! timestamp/UUID/enum column types usable with `diesel-async`'s wrapper in
//! a portable way, so everything crosses the boundary as `Text`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::*;
use crate::error::{Error, Result};

pub fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("invalid timestamp {s:?}: {e}")))
}

pub fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Database(format!("invalid id {s:?}: {e}")))
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = super::schema::workspaces)]
pub struct WorkspaceRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub quota_bytes: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl WorkspaceRow {
    pub fn from_domain(w: &Workspace) -> Self {
        Self {
            id: w.id.to_string(),
            name: w.name.clone(),
            description: w.description.clone(),
            quota_bytes: w.quota_bytes,
            created_at: fmt_time(w.created_at),
            updated_at: fmt_time(w.updated_at),
        }
    }

    pub fn into_domain(self) -> Result<Workspace> {
        Ok(Workspace {
            id: parse_id(&self.id)?,
            name: self.name,
            description: self.description,
            quota_bytes: self.quota_bytes,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = super::schema::projects)]
pub struct ProjectRow {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRow {
    pub fn from_domain(p: &Project) -> Self {
        Self {
            id: p.id.to_string(),
            workspace_id: p.workspace_id.to_string(),
            name: p.name.clone(),
            description: p.description.clone(),
            created_at: fmt_time(p.created_at),
            updated_at: fmt_time(p.updated_at),
        }
    }

    pub fn into_domain(self) -> Result<Project> {
        Ok(Project {
            id: parse_id(&self.id)?,
            workspace_id: parse_id(&self.workspace_id)?,
            name: self.name,
            description: self.description,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = super::schema::users)]
pub struct UserRow {
    pub id: String,
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn from_domain(u: &User) -> Self {
        Self {
            id: u.id.to_string(),
            subject: u.subject.clone(),
            email: u.email.clone(),
            display_name: u.display_name.clone(),
            created_at: fmt_time(u.created_at),
        }
    }

    pub fn into_domain(self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id)?,
            subject: self.subject,
            email: self.email,
            display_name: self.display_name,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = super::schema::workspace_memberships)]
pub struct WorkspaceMembershipRow {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub role: String,
    pub created_at: String,
}

impl WorkspaceMembershipRow {
    pub fn from_domain(m: &WorkspaceMembership) -> Self {
        Self {
            id: m.id.to_string(),
            workspace_id: m.workspace_id.to_string(),
            user_id: m.user_id.to_string(),
            role: role_to_str(m.role).to_string(),
            created_at: fmt_time(m.created_at),
        }
    }

    pub fn into_domain(self) -> Result<WorkspaceMembership> {
        Ok(WorkspaceMembership {
            id: parse_id(&self.id)?,
            workspace_id: parse_id(&self.workspace_id)?,
            user_id: parse_id(&self.user_id)?,
            role: str_to_workspace_role(&self.role)?,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = super::schema::project_memberships)]
pub struct ProjectMembershipRow {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub role: String,
    pub created_at: String,
}

impl ProjectMembershipRow {
    pub fn from_domain(m: &ProjectMembership) -> Self {
        Self {
            id: m.id.to_string(),
            project_id: m.project_id.to_string(),
            user_id: m.user_id.to_string(),
            role: project_role_to_str(m.role).to_string(),
            created_at: fmt_time(m.created_at),
        }
    }

    pub fn into_domain(self) -> Result<ProjectMembership> {
        Ok(ProjectMembership {
            id: parse_id(&self.id)?,
            project_id: parse_id(&self.project_id)?,
            user_id: parse_id(&self.user_id)?,
            role: str_to_project_role(&self.role)?,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

pub fn role_to_str(role: WorkspaceRole) -> &'static str {
    match role {
        WorkspaceRole::Guest => "guest",
        WorkspaceRole::Member => "member",
        WorkspaceRole::Admin => "admin",
        WorkspaceRole::Owner => "owner",
    }
}

pub fn str_to_workspace_role(s: &str) -> Result<WorkspaceRole> {
    match s {
        "guest" => Ok(WorkspaceRole::Guest),
        "member" => Ok(WorkspaceRole::Member),
        "admin" => Ok(WorkspaceRole::Admin),
        "owner" => Ok(WorkspaceRole::Owner),
        other => Err(Error::Database(format!("unknown workspace role {other:?}"))),
    }
}

pub fn project_role_to_str(role: ProjectRole) -> &'static str {
    match role {
        ProjectRole::Viewer => "viewer",
        ProjectRole::Editor => "editor",
        ProjectRole::ProjectAdmin => "projectAdmin",
    }
}

pub fn str_to_project_role(s: &str) -> Result<ProjectRole> {
    match s {
        "viewer" => Ok(ProjectRole::Viewer),
        "editor" => Ok(ProjectRole::Editor),
        "projectAdmin" => Ok(ProjectRole::ProjectAdmin),
        other => Err(Error::Database(format!("unknown project role {other:?}"))),
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::files)]
pub struct FileRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub kind: String,
    pub category: String,
    pub storage_provider: String,
    pub storage_key: String,
    pub is_deleted: bool,
    pub bytes_reclaimed: bool,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

impl FileRow {
    pub fn from_domain(f: &File) -> Self {
        Self {
            id: f.id.to_string(),
            project_id: f.project_id.to_string(),
            name: f.name.clone(),
            content_type: f.content_type.clone(),
            size_bytes: f.size_bytes,
            checksum: f.checksum.clone(),
            kind: match f.kind {
                FileKind::Source => "source".to_string(),
                FileKind::Artifact => "artifact".to_string(),
            },
            category: category_to_str(f.category).to_string(),
            storage_provider: f.storage_provider.clone(),
            storage_key: f.storage_key.clone(),
            is_deleted: f.is_deleted,
            bytes_reclaimed: f.bytes_reclaimed,
            created_at: fmt_time(f.created_at),
            deleted_at: f.deleted_at.map(fmt_time),
        }
    }

    pub fn into_domain(self) -> Result<File> {
        Ok(File {
            id: parse_id(&self.id)?,
            project_id: parse_id(&self.project_id)?,
            name: self.name,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            checksum: self.checksum,
            kind: match self.kind.as_str() {
                "source" => FileKind::Source,
                "artifact" => FileKind::Artifact,
                other => return Err(Error::Database(format!("unknown file kind {other:?}"))),
            },
            category: str_to_category(&self.category)?,
            storage_provider: self.storage_provider,
            storage_key: self.storage_key,
            is_deleted: self.is_deleted,
            bytes_reclaimed: self.bytes_reclaimed,
            created_at: parse_time(&self.created_at)?,
            deleted_at: self.deleted_at.map(|s| parse_time(&s)).transpose()?,
        })
    }
}

pub fn category_to_str(c: FileCategory) -> &'static str {
    match c {
        FileCategory::Ifc => "ifc",
        FileCategory::WexBim => "wexBim",
        FileCategory::Properties => "properties",
        FileCategory::Thumbnail => "thumbnail",
        FileCategory::Log => "log",
        FileCategory::Other => "other",
    }
}

pub fn str_to_category(s: &str) -> Result<FileCategory> {
    match s {
        "ifc" => Ok(FileCategory::Ifc),
        "wexBim" => Ok(FileCategory::WexBim),
        "properties" => Ok(FileCategory::Properties),
        "thumbnail" => Ok(FileCategory::Thumbnail),
        "log" => Ok(FileCategory::Log),
        "other" => Ok(FileCategory::Other),
        other => Err(Error::Database(format!("unknown file category {other:?}"))),
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = super::schema::file_links)]
pub struct FileLinkRow {
    pub id: String,
    pub source_file_id: String,
    pub target_file_id: String,
    pub link_type: String,
    pub created_at: String,
}

impl FileLinkRow {
    pub fn from_domain(l: &FileLink) -> Self {
        Self {
            id: l.id.to_string(),
            source_file_id: l.source_file_id.to_string(),
            target_file_id: l.target_file_id.to_string(),
            link_type: match l.link_type {
                LinkType::DerivedFrom => "derivedFrom",
                LinkType::ThumbnailOf => "thumbnailOf",
                LinkType::PropertiesOf => "propertiesOf",
                LinkType::LogOf => "logOf",
            }
            .to_string(),
            created_at: fmt_time(l.created_at),
        }
    }

    pub fn into_domain(self) -> Result<FileLink> {
        Ok(FileLink {
            id: parse_id(&self.id)?,
            source_file_id: parse_id(&self.source_file_id)?,
            target_file_id: parse_id(&self.target_file_id)?,
            link_type: match self.link_type.as_str() {
                "derivedFrom" => LinkType::DerivedFrom,
                "thumbnailOf" => LinkType::ThumbnailOf,
                "propertiesOf" => LinkType::PropertiesOf,
                "logOf" => LinkType::LogOf,
                other => return Err(Error::Database(format!("unknown link type {other:?}"))),
            },
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::upload_sessions)]
pub struct UploadSessionRow {
    pub id: String,
    pub project_id: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub expected_size_bytes: Option<i64>,
    pub status: String,
    pub temp_storage_key: Option<String>,
    pub committed_file_id: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

impl UploadSessionRow {
    pub fn from_domain(s: &UploadSession) -> Self {
        Self {
            id: s.id.to_string(),
            project_id: s.project_id.to_string(),
            file_name: s.file_name.clone(),
            content_type: s.content_type.clone(),
            expected_size_bytes: s.expected_size_bytes,
            status: status_to_str(s.status).to_string(),
            temp_storage_key: s.temp_storage_key.clone(),
            committed_file_id: s.committed_file_id.map(|id| id.to_string()),
            created_at: fmt_time(s.created_at),
            expires_at: fmt_time(s.expires_at),
        }
    }

    pub fn into_domain(self) -> Result<UploadSession> {
        Ok(UploadSession {
            id: parse_id(&self.id)?,
            project_id: parse_id(&self.project_id)?,
            file_name: self.file_name,
            content_type: self.content_type,
            expected_size_bytes: self.expected_size_bytes,
            status: str_to_status(&self.status)?,
            temp_storage_key: self.temp_storage_key,
            committed_file_id: self.committed_file_id.map(|s| parse_id(&s)).transpose()?,
            created_at: parse_time(&self.created_at)?,
            expires_at: parse_time(&self.expires_at)?,
        })
    }
}

pub fn status_to_str(s: UploadSessionStatus) -> &'static str {
    match s {
        UploadSessionStatus::Reserved => "reserved",
        UploadSessionStatus::Uploading => "uploading",
        UploadSessionStatus::Committed => "committed",
        UploadSessionStatus::Expired => "expired",
        UploadSessionStatus::Failed => "failed",
    }
}

pub fn str_to_status(s: &str) -> Result<UploadSessionStatus> {
    match s {
        "reserved" => Ok(UploadSessionStatus::Reserved),
        "uploading" => Ok(UploadSessionStatus::Uploading),
        "committed" => Ok(UploadSessionStatus::Committed),
        "expired" => Ok(UploadSessionStatus::Expired),
        "failed" => Ok(UploadSessionStatus::Failed),
        other => Err(Error::Database(format!("unknown upload session status {other:?}"))),
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = super::schema::models)]
pub struct ModelRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ModelRow {
    pub fn from_domain(m: &Model) -> Self {
        Self {
            id: m.id.to_string(),
            project_id: m.project_id.to_string(),
            name: m.name.clone(),
            description: m.description.clone(),
            created_at: fmt_time(m.created_at),
            updated_at: fmt_time(m.updated_at),
        }
    }

    pub fn into_domain(self) -> Result<Model> {
        Ok(Model {
            id: parse_id(&self.id)?,
            project_id: parse_id(&self.project_id)?,
            name: self.name,
            description: self.description,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::model_versions)]
pub struct ModelVersionRow {
    pub id: String,
    pub model_id: String,
    pub version_number: i32,
    pub ifc_file_id: String,
    pub wex_bim_file_id: Option<String>,
    pub properties_file_id: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
}

impl ModelVersionRow {
    pub fn from_domain(v: &ModelVersion) -> Self {
        Self {
            id: v.id.to_string(),
            model_id: v.model_id.to_string(),
            version_number: v.version_number,
            ifc_file_id: v.ifc_file_id.to_string(),
            wex_bim_file_id: v.wex_bim_file_id.map(|id| id.to_string()),
            properties_file_id: v.properties_file_id.map(|id| id.to_string()),
            status: version_status_to_str(v.status).to_string(),
            error_message: v.error_message.clone(),
            created_at: fmt_time(v.created_at),
            processed_at: v.processed_at.map(fmt_time),
        }
    }

    pub fn into_domain(self) -> Result<ModelVersion> {
        Ok(ModelVersion {
            id: parse_id(&self.id)?,
            model_id: parse_id(&self.model_id)?,
            version_number: self.version_number,
            ifc_file_id: parse_id(&self.ifc_file_id)?,
            wex_bim_file_id: self.wex_bim_file_id.map(|s| parse_id(&s)).transpose()?,
            properties_file_id: self.properties_file_id.map(|s| parse_id(&s)).transpose()?,
            status: str_to_version_status(&self.status)?,
            error_message: self.error_message,
            created_at: parse_time(&self.created_at)?,
            processed_at: self.processed_at.map(|s| parse_time(&s)).transpose()?,
        })
    }
}

pub fn version_status_to_str(s: ModelVersionStatus) -> &'static str {
    match s {
        ModelVersionStatus::Pending => "pending",
        ModelVersionStatus::Processing => "processing",
        ModelVersionStatus::Ready => "ready",
        ModelVersionStatus::Failed => "failed",
    }
}

pub fn str_to_version_status(s: &str) -> Result<ModelVersionStatus> {
    match s {
        "pending" => Ok(ModelVersionStatus::Pending),
        "processing" => Ok(ModelVersionStatus::Processing),
        "ready" => Ok(ModelVersionStatus::Ready),
        "failed" => Ok(ModelVersionStatus::Failed),
        other => Err(Error::Database(format!("unknown model version status {other:?}"))),
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::oauth_apps)]
pub struct OAuthAppRow {
    pub id: String,
    pub workspace_id: String,
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub client_type: String,
    pub redirect_uris: String,
    pub allowed_scopes: String,
    pub is_enabled: bool,
    pub created_at: String,
}

impl OAuthAppRow {
    pub fn from_domain(a: &OAuthApp) -> Result<Self> {
        Ok(Self {
            id: a.id.to_string(),
            workspace_id: a.workspace_id.to_string(),
            client_id: a.client_id.clone(),
            client_secret_hash: a.client_secret_hash.clone(),
            client_type: match a.client_type {
                ClientType::Public => "public".to_string(),
                ClientType::Confidential => "confidential".to_string(),
            },
            redirect_uris: serde_json::to_string(&a.redirect_uris)
                .map_err(|e| Error::Database(e.to_string()))?,
            allowed_scopes: serde_json::to_string(&a.allowed_scopes)
                .map_err(|e| Error::Database(e.to_string()))?,
            is_enabled: a.is_enabled,
            created_at: fmt_time(a.created_at),
        })
    }

    pub fn into_domain(self) -> Result<OAuthApp> {
        Ok(OAuthApp {
            id: parse_id(&self.id)?,
            workspace_id: parse_id(&self.workspace_id)?,
            client_id: self.client_id,
            client_secret_hash: self.client_secret_hash,
            client_type: match self.client_type.as_str() {
                "public" => ClientType::Public,
                "confidential" => ClientType::Confidential,
                other => return Err(Error::Database(format!("unknown client type {other:?}"))),
            },
            redirect_uris: serde_json::from_str(&self.redirect_uris)
                .map_err(|e| Error::Database(e.to_string()))?,
            allowed_scopes: serde_json::from_str(&self.allowed_scopes)
                .map_err(|e| Error::Database(e.to_string()))?,
            is_enabled: self.is_enabled,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::authorization_codes)]
pub struct AuthorizationCodeRow {
    pub id: String,
    pub code_hash: String,
    pub oauth_app_id: String,
    pub user_id: String,
    pub workspace_id: String,
    pub scopes: String,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    pub is_used: bool,
    pub used_at: Option<String>,
}

impl AuthorizationCodeRow {
    pub fn from_domain(c: &AuthorizationCode) -> Result<Self> {
        Ok(Self {
            id: c.id.to_string(),
            code_hash: c.code_hash.clone(),
            oauth_app_id: c.oauth_app_id.to_string(),
            user_id: c.user_id.to_string(),
            workspace_id: c.workspace_id.to_string(),
            scopes: serde_json::to_string(&c.scopes).map_err(|e| Error::Database(e.to_string()))?,
            redirect_uri: c.redirect_uri.clone(),
            code_challenge: c.code_challenge.clone(),
            code_challenge_method: c.code_challenge_method.map(|m| match m {
                CodeChallengeMethod::S256 => "S256".to_string(),
                CodeChallengeMethod::Plain => "plain".to_string(),
            }),
            created_at: fmt_time(c.created_at),
            expires_at: fmt_time(c.expires_at),
            is_used: c.is_used,
            used_at: c.used_at.map(fmt_time),
        })
    }

    pub fn into_domain(self) -> Result<AuthorizationCode> {
        Ok(AuthorizationCode {
            id: parse_id(&self.id)?,
            code_hash: self.code_hash,
            oauth_app_id: parse_id(&self.oauth_app_id)?,
            user_id: parse_id(&self.user_id)?,
            workspace_id: parse_id(&self.workspace_id)?,
            scopes: serde_json::from_str(&self.scopes).map_err(|e| Error::Database(e.to_string()))?,
            redirect_uri: self.redirect_uri,
            code_challenge: self.code_challenge,
            code_challenge_method: self
                .code_challenge_method
                .map(|s| {
                    CodeChallengeMethod::parse(&s)
                        .ok_or_else(|| Error::Database(format!("unknown PKCE method {s:?}")))
                })
                .transpose()?,
            created_at: parse_time(&self.created_at)?,
            expires_at: parse_time(&self.expires_at)?,
            is_used: self.is_used,
            used_at: self.used_at.map(|s| parse_time(&s)).transpose()?,
        })
    }
}

/// Outbox row backing [`crate::processing::JobEnvelope`].
#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::jobs)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub payload: String,
    pub status: String,
    pub attempt: i32,
    pub enqueued_at: String,
    pub next_attempt_at: String,
}
