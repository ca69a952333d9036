//! In-memory [`Store`] used by service-level unit tests. Mirrors the guarded
//! transitions and transactional-outbox semantics of [`super::SqliteStore`]
//! without a database, the way [`crate::storage::MemoryStorageProvider`]
//! stands in for a real storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::*;
use crate::error::{Error, Result};

use super::{
    FileFilter, ModelVersionUpdate, NewAuthorizationCode, NewFile, NewJob, NewOAuthApp, Page,
    PersistedJob, Store,
};

#[derive(Debug, Clone)]
struct JobRecord {
    job: PersistedJob,
    status: &'static str,
}

#[derive(Default)]
struct Tables {
    workspaces: HashMap<Uuid, Workspace>,
    projects: HashMap<Uuid, Project>,
    users: HashMap<Uuid, User>,
    workspace_memberships: HashMap<(Uuid, Uuid), WorkspaceMembership>,
    project_memberships: HashMap<(Uuid, Uuid), ProjectMembership>,
    upload_sessions: HashMap<Uuid, UploadSession>,
    files: HashMap<Uuid, File>,
    file_links: HashMap<Uuid, FileLink>,
    models: HashMap<Uuid, Model>,
    model_versions: HashMap<Uuid, ModelVersion>,
    oauth_apps: HashMap<Uuid, OAuthApp>,
    authorization_codes: HashMap<Uuid, AuthorizationCode>,
    jobs: HashMap<Uuid, JobRecord>,
}

/// Test double backing `Services::test()`. Every operation takes the single
/// lock for its duration; fine for unit tests, not meant for production load.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T: Clone>(items: Vec<T>, page: i64, page_size: i64) -> Page<T> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, crate::constants::database::MAX_PAGE_SIZE);
    let total = items.len() as i64;
    let start = ((page - 1) * page_size) as usize;
    let page_items = items.into_iter().skip(start).take(page_size as usize).collect();
    Page {
        items: page_items,
        page,
        page_size,
        total,
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_workspace(
        &self,
        name: &str,
        description: Option<&str>,
        quota_bytes: Option<i64>,
        owner_user_id: Uuid,
    ) -> Result<Workspace> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let workspace = Workspace {
            id: new_id(),
            name: name.to_string(),
            description: description.map(str::to_string),
            quota_bytes,
            created_at: now,
            updated_at: now,
        };
        tables.workspaces.insert(workspace.id, workspace.clone());
        let membership = WorkspaceMembership {
            id: new_id(),
            workspace_id: workspace.id,
            user_id: owner_user_id,
            role: WorkspaceRole::Owner,
            created_at: now,
        };
        tables
            .workspace_memberships
            .insert((workspace.id, owner_user_id), membership);
        Ok(workspace)
    }

    async fn get_workspace(&self, id: Uuid) -> Result<Option<Workspace>> {
        Ok(self.tables.read().workspaces.get(&id).cloned())
    }

    async fn update_workspace(
        &self,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Workspace> {
        let mut tables = self.tables.write();
        let ws = tables
            .workspaces
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("workspace {id}")))?;
        if let Some(name) = name {
            ws.name = name.to_string();
        }
        if let Some(description) = description {
            ws.description = Some(description.to_string());
        }
        ws.updated_at = Utc::now();
        Ok(ws.clone())
    }

    async fn list_workspaces_for_user(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Workspace>> {
        let tables = self.tables.read();
        let mut items: Vec<Workspace> = tables
            .workspace_memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| tables.workspaces.get(&m.workspace_id).cloned())
            .collect();
        items.sort_by_key(|w| std::cmp::Reverse(w.created_at));
        Ok(paginate(items, page, page_size))
    }

    async fn workspace_role_for_user(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WorkspaceRole>> {
        Ok(self
            .tables
            .read()
            .workspace_memberships
            .get(&(workspace_id, user_id))
            .map(|m| m.role))
    }

    async fn create_workspace_membership(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<WorkspaceMembership> {
        let mut tables = self.tables.write();
        let membership = WorkspaceMembership {
            id: new_id(),
            workspace_id,
            user_id,
            role,
            created_at: Utc::now(),
        };
        tables
            .workspace_memberships
            .insert((workspace_id, user_id), membership.clone());
        Ok(membership)
    }

    async fn delete_workspace_membership(&self, workspace_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .workspace_memberships
            .remove(&(workspace_id, user_id))
            .is_some())
    }

    async fn workspace_usage(&self, workspace_id: Uuid) -> Result<i64> {
        let tables = self.tables.read();
        let project_ids: Vec<Uuid> = tables
            .projects
            .values()
            .filter(|p| p.workspace_id == workspace_id)
            .map(|p| p.id)
            .collect();
        let total = tables
            .files
            .values()
            .filter(|f| project_ids.contains(&f.project_id) && !f.is_deleted)
            .map(|f| f.size_bytes)
            .sum();
        Ok(total)
    }

    async fn create_project(
        &self,
        workspace_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let project = Project {
            id: new_id(),
            workspace_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        tables.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.tables.read().projects.get(&id).cloned())
    }

    async fn project_role_for_user(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ProjectRole>> {
        Ok(self
            .tables
            .read()
            .project_memberships
            .get(&(project_id, user_id))
            .map(|m| m.role))
    }

    async fn create_project_membership(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
    ) -> Result<ProjectMembership> {
        let mut tables = self.tables.write();
        let membership = ProjectMembership {
            id: new_id(),
            project_id,
            user_id,
            role,
            created_at: Utc::now(),
        };
        tables
            .project_memberships
            .insert((project_id, user_id), membership.clone());
        Ok(membership)
    }

    async fn get_or_create_user(
        &self,
        subject: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<User> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.users.values().find(|u| u.subject == subject) {
            return Ok(existing.clone());
        }
        let user = User {
            id: new_id(),
            subject: subject.to_string(),
            email: email.map(str::to_string),
            display_name: display_name.map(str::to_string),
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn create_upload_session(
        &self,
        project_id: Uuid,
        file_name: &str,
        content_type: Option<&str>,
        expected_size_bytes: Option<i64>,
        temp_storage_key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<UploadSession> {
        let mut tables = self.tables.write();
        let session = UploadSession {
            id: new_id(),
            project_id,
            file_name: file_name.to_string(),
            content_type: content_type.map(str::to_string),
            expected_size_bytes,
            status: UploadSessionStatus::Reserved,
            temp_storage_key: Some(temp_storage_key.to_string()),
            committed_file_id: None,
            created_at: Utc::now(),
            expires_at,
        };
        tables.upload_sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_upload_session(&self, id: Uuid) -> Result<Option<UploadSession>> {
        Ok(self.tables.read().upload_sessions.get(&id).cloned())
    }

    async fn mark_upload_session_uploading(&self, id: Uuid) -> Result<UploadSession> {
        let mut tables = self.tables.write();
        let session = tables
            .upload_sessions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("upload session {id}")))?;
        if !matches!(
            session.status,
            UploadSessionStatus::Reserved | UploadSessionStatus::Uploading
        ) {
            return Err(Error::Conflict(
                "upload session is not in a state that accepts content".to_string(),
            ));
        }
        session.status = UploadSessionStatus::Uploading;
        Ok(session.clone())
    }

    async fn mark_upload_session_failed(&self, id: Uuid) -> Result<UploadSession> {
        let mut tables = self.tables.write();
        let session = tables
            .upload_sessions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("upload session {id}")))?;
        session.status = UploadSessionStatus::Failed;
        Ok(session.clone())
    }

    async fn commit_upload_session(
        &self,
        session_id: Uuid,
        file: NewFile,
    ) -> Result<(UploadSession, File)> {
        let mut tables = self.tables.write();
        let session = tables
            .upload_sessions
            .get(&session_id)
            .ok_or_else(|| Error::NotFound(format!("upload session {session_id}")))?
            .clone();
        if session.status != UploadSessionStatus::Uploading {
            return Err(Error::Conflict(
                "upload session lost the commit race".to_string(),
            ));
        }
        let new_file = File {
            id: new_id(),
            project_id: file.project_id,
            name: file.name,
            content_type: file.content_type,
            size_bytes: file.size_bytes,
            checksum: file.checksum,
            kind: file.kind,
            category: file.category,
            storage_provider: file.storage_provider,
            storage_key: file.storage_key,
            is_deleted: false,
            bytes_reclaimed: false,
            created_at: Utc::now(),
            deleted_at: None,
        };
        tables.files.insert(new_file.id, new_file.clone());

        let session = tables.upload_sessions.get_mut(&session_id).unwrap();
        session.status = UploadSessionStatus::Committed;
        session.committed_file_id = Some(new_file.id);
        Ok((session.clone(), new_file))
    }

    async fn list_expirable_upload_sessions(&self, now: DateTime<Utc>) -> Result<Vec<UploadSession>> {
        Ok(self
            .tables
            .read()
            .upload_sessions
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    UploadSessionStatus::Reserved | UploadSessionStatus::Uploading
                ) && s.expires_at < now
            })
            .cloned()
            .collect())
    }

    async fn mark_upload_session_expired(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.upload_sessions.get_mut(&id) {
            Some(session)
                if matches!(
                    session.status,
                    UploadSessionStatus::Reserved | UploadSessionStatus::Uploading
                ) =>
            {
                session.status = UploadSessionStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<File>> {
        Ok(self.tables.read().files.get(&id).cloned())
    }

    async fn list_files(
        &self,
        project_id: Uuid,
        filter: FileFilter,
        page: i64,
        page_size: i64,
    ) -> Result<Page<File>> {
        let tables = self.tables.read();
        let mut items: Vec<File> = tables
            .files
            .values()
            .filter(|f| f.project_id == project_id)
            .filter(|f| filter.include_deleted || !f.is_deleted)
            .filter(|f| filter.kind.map(|k| k == f.kind).unwrap_or(true))
            .filter(|f| filter.category.map(|c| c == f.category).unwrap_or(true))
            .cloned()
            .collect();
        items.sort_by_key(|f| std::cmp::Reverse(f.created_at));
        Ok(paginate(items, page, page_size))
    }

    async fn insert_file(&self, file: NewFile) -> Result<File> {
        let mut tables = self.tables.write();
        let new_file = File {
            id: new_id(),
            project_id: file.project_id,
            name: file.name,
            content_type: file.content_type,
            size_bytes: file.size_bytes,
            checksum: file.checksum,
            kind: file.kind,
            category: file.category,
            storage_provider: file.storage_provider,
            storage_key: file.storage_key,
            is_deleted: false,
            bytes_reclaimed: false,
            created_at: Utc::now(),
            deleted_at: None,
        };
        tables.files.insert(new_file.id, new_file.clone());
        Ok(new_file)
    }

    async fn soft_delete_file(&self, id: Uuid) -> Result<File> {
        let mut tables = self.tables.write();
        let file = tables
            .files
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("file {id}")))?;
        file.is_deleted = true;
        file.deleted_at = Some(Utc::now());
        Ok(file.clone())
    }

    async fn create_file_link(
        &self,
        source_file_id: Uuid,
        target_file_id: Uuid,
        link_type: LinkType,
    ) -> Result<FileLink> {
        let mut tables = self.tables.write();
        let link = FileLink {
            id: new_id(),
            source_file_id,
            target_file_id,
            link_type,
            created_at: Utc::now(),
        };
        tables.file_links.insert(link.id, link.clone());
        Ok(link)
    }

    async fn list_links_from(&self, source_file_id: Uuid) -> Result<Vec<FileLink>> {
        Ok(self
            .tables
            .read()
            .file_links
            .values()
            .filter(|l| l.source_file_id == source_file_id)
            .cloned()
            .collect())
    }

    async fn list_links_to(&self, target_file_id: Uuid) -> Result<Vec<FileLink>> {
        Ok(self
            .tables
            .read()
            .file_links
            .values()
            .filter(|l| l.target_file_id == target_file_id)
            .cloned()
            .collect())
    }

    async fn list_unreclaimed_deleted_files(&self, limit: i64) -> Result<Vec<File>> {
        Ok(self
            .tables
            .read()
            .files
            .values()
            .filter(|f| f.is_deleted && !f.bytes_reclaimed)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_file_bytes_reclaimed(&self, id: Uuid) -> Result<()> {
        if let Some(file) = self.tables.write().files.get_mut(&id) {
            file.bytes_reclaimed = true;
        }
        Ok(())
    }

    async fn create_model(
        &self,
        project_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Model> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let model = Model {
            id: new_id(),
            project_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        tables.models.insert(model.id, model.clone());
        Ok(model)
    }

    async fn get_model(&self, id: Uuid) -> Result<Option<Model>> {
        Ok(self.tables.read().models.get(&id).cloned())
    }

    async fn list_models(&self, project_id: Uuid, page: i64, page_size: i64) -> Result<Page<Model>> {
        let tables = self.tables.read();
        let mut items: Vec<Model> = tables
            .models
            .values()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect();
        items.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        Ok(paginate(items, page, page_size))
    }

    async fn create_model_version_with_jobs(
        &self,
        model_id: Uuid,
        version_id: Uuid,
        ifc_file_id: Uuid,
        jobs: Vec<NewJob>,
    ) -> Result<(ModelVersion, Vec<PersistedJob>)> {
        let mut tables = self.tables.write();
        let version_number = tables
            .model_versions
            .values()
            .filter(|v| v.model_id == model_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();
        let version = ModelVersion {
            id: version_id,
            model_id,
            version_number,
            ifc_file_id,
            wex_bim_file_id: None,
            properties_file_id: None,
            status: ModelVersionStatus::Pending,
            error_message: None,
            created_at: now,
            processed_at: None,
        };
        tables.model_versions.insert(version.id, version.clone());

        let mut persisted = Vec::with_capacity(jobs.len());
        for job in jobs {
            let record = PersistedJob {
                id: new_id(),
                job_type: job.job_type,
                payload: job.payload,
                attempt: 0,
                enqueued_at: now,
            };
            tables.jobs.insert(
                record.id,
                JobRecord {
                    job: record.clone(),
                    status: "pending",
                },
            );
            persisted.push(record);
        }

        Ok((version, persisted))
    }

    async fn get_model_version(&self, id: Uuid) -> Result<Option<ModelVersion>> {
        Ok(self.tables.read().model_versions.get(&id).cloned())
    }

    async fn list_model_versions(
        &self,
        model_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<ModelVersion>> {
        let tables = self.tables.read();
        let mut items: Vec<ModelVersion> = tables
            .model_versions
            .values()
            .filter(|v| v.model_id == model_id)
            .cloned()
            .collect();
        items.sort_by_key(|v| std::cmp::Reverse(v.version_number));
        Ok(paginate(items, page, page_size))
    }

    async fn update_model_version_guarded(
        &self,
        id: Uuid,
        expected: &[ModelVersionStatus],
        mutate: ModelVersionUpdate,
    ) -> Result<ModelVersion> {
        let mut tables = self.tables.write();
        let version = tables
            .model_versions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("model version {id}")))?;
        if !expected.contains(&version.status) {
            return Err(Error::Conflict(format!(
                "model version {id} is not in an expected state for this transition"
            )));
        }
        if let Some(status) = mutate.status {
            version.status = status;
        }
        if mutate.wex_bim_file_id.is_some() {
            version.wex_bim_file_id = mutate.wex_bim_file_id;
        }
        if mutate.properties_file_id.is_some() {
            version.properties_file_id = mutate.properties_file_id;
        }
        if mutate.error_message.is_some() {
            version.error_message = mutate.error_message;
        }
        if mutate.processed_at.is_some() {
            version.processed_at = mutate.processed_at;
        }
        Ok(version.clone())
    }

    async fn list_pending_jobs(&self) -> Result<Vec<PersistedJob>> {
        Ok(self
            .tables
            .read()
            .jobs
            .values()
            .filter(|r| r.status == "pending")
            .map(|r| r.job.clone())
            .collect())
    }

    async fn reschedule_job(&self, id: Uuid, attempt: i32, _next_attempt_at: DateTime<Utc>) -> Result<()> {
        if let Some(record) = self.tables.write().jobs.get_mut(&id) {
            record.job.attempt = attempt;
            record.status = "pending";
        }
        Ok(())
    }

    async fn delete_job(&self, id: Uuid) -> Result<()> {
        self.tables.write().jobs.remove(&id);
        Ok(())
    }

    async fn create_oauth_app(&self, app: NewOAuthApp) -> Result<OAuthApp> {
        let mut tables = self.tables.write();
        let oauth_app = OAuthApp {
            id: new_id(),
            workspace_id: app.workspace_id,
            client_id: app.client_id,
            client_secret_hash: app.client_secret_hash,
            client_type: app.client_type,
            redirect_uris: app.redirect_uris,
            allowed_scopes: app.allowed_scopes,
            is_enabled: true,
            created_at: Utc::now(),
        };
        tables.oauth_apps.insert(oauth_app.id, oauth_app.clone());
        Ok(oauth_app)
    }

    async fn get_oauth_app_by_client_id(&self, client_id: &str) -> Result<Option<OAuthApp>> {
        Ok(self
            .tables
            .read()
            .oauth_apps
            .values()
            .find(|a| a.client_id == client_id)
            .cloned())
    }

    async fn list_oauth_apps(&self, workspace_id: Uuid) -> Result<Vec<OAuthApp>> {
        Ok(self
            .tables
            .read()
            .oauth_apps
            .values()
            .filter(|a| a.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn create_authorization_code(&self, code: NewAuthorizationCode) -> Result<AuthorizationCode> {
        let mut tables = self.tables.write();
        let auth_code = AuthorizationCode {
            id: new_id(),
            code_hash: code.code_hash,
            oauth_app_id: code.oauth_app_id,
            user_id: code.user_id,
            workspace_id: code.workspace_id,
            scopes: code.scopes,
            redirect_uri: code.redirect_uri,
            code_challenge: code.code_challenge,
            code_challenge_method: code.code_challenge_method,
            created_at: Utc::now(),
            expires_at: code.expires_at,
            is_used: false,
            used_at: None,
        };
        tables
            .authorization_codes
            .insert(auth_code.id, auth_code.clone());
        Ok(auth_code)
    }

    async fn get_authorization_code_by_hash(&self, code_hash: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self
            .tables
            .read()
            .authorization_codes
            .values()
            .find(|c| c.code_hash == code_hash)
            .cloned())
    }

    async fn consume_authorization_code(&self, id: Uuid) -> Result<AuthorizationCode> {
        let mut tables = self.tables.write();
        let code = tables
            .authorization_codes
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("authorization code {id}")))?;
        if code.is_used {
            return Err(Error::Conflict(
                "authorization code has already been used".to_string(),
            ));
        }
        code.is_used = true;
        code.used_at = Some(Utc::now());
        Ok(code.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_upload_session_requires_uploading_state() {
        let store = InMemoryStore::new();
        let user = store.get_or_create_user("sub|1", None, None).await.unwrap();
        let workspace = store
            .create_workspace("acme", None, None, user.id)
            .await
            .unwrap();
        let project = store
            .create_project(workspace.id, "tower", None)
            .await
            .unwrap();
        let session = store
            .create_upload_session(project.id, "model.ifc", None, Some(10), "uploads/k1", Utc::now())
            .await
            .unwrap();

        let new_file = NewFile {
            project_id: project.id,
            name: "model.ifc".into(),
            content_type: None,
            size_bytes: 10,
            checksum: None,
            kind: FileKind::Source,
            category: FileCategory::Ifc,
            storage_provider: "memory".into(),
            storage_key: "uploads/k1".into(),
        };
        let result = store.commit_upload_session(session.id, new_file.clone()).await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        store.mark_upload_session_uploading(session.id).await.unwrap();
        let (session, file) = store.commit_upload_session(session.id, new_file).await.unwrap();
        assert_eq!(session.status, UploadSessionStatus::Committed);
        assert_eq!(session.committed_file_id, Some(file.id));
    }

    #[tokio::test]
    async fn consume_authorization_code_is_single_use() {
        let store = InMemoryStore::new();
        let user = store.get_or_create_user("sub|1", None, None).await.unwrap();
        let workspace = store
            .create_workspace("acme", None, None, user.id)
            .await
            .unwrap();
        let app = store
            .create_oauth_app(NewOAuthApp {
                workspace_id: workspace.id,
                client_id: "client-1".into(),
                client_secret_hash: None,
                client_type: ClientType::Public,
                redirect_uris: vec!["https://example.test/cb".into()],
                allowed_scopes: vec!["files:read".into()],
            })
            .await
            .unwrap();
        let code = store
            .create_authorization_code(NewAuthorizationCode {
                code_hash: "hash".into(),
                oauth_app_id: app.id,
                user_id: user.id,
                workspace_id: workspace.id,
                scopes: vec!["files:read".into()],
                redirect_uri: "https://example.test/cb".into(),
                code_challenge: None,
                code_challenge_method: None,
                expires_at: Utc::now() + chrono::Duration::seconds(60),
            })
            .await
            .unwrap();

        let consumed = store.consume_authorization_code(code.id).await.unwrap();
        assert!(consumed.is_used);
        let replay = store.consume_authorization_code(code.id).await;
        assert!(matches!(replay, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn model_version_guarded_update_rejects_unexpected_state() {
        let store = InMemoryStore::new();
        let user = store.get_or_create_user("sub|1", None, None).await.unwrap();
        let workspace = store
            .create_workspace("acme", None, None, user.id)
            .await
            .unwrap();
        let project = store
            .create_project(workspace.id, "tower", None)
            .await
            .unwrap();
        let model = store
            .create_model(project.id, "tower-model", None)
            .await
            .unwrap();
        let ifc_file = store
            .insert_file(NewFile {
                project_id: project.id,
                name: "model.ifc".into(),
                content_type: None,
                size_bytes: 10,
                checksum: None,
                kind: FileKind::Source,
                category: FileCategory::Ifc,
                storage_provider: "memory".into(),
                storage_key: "files/k1".into(),
            })
            .await
            .unwrap();
        let (version, jobs) = store
            .create_model_version_with_jobs(
                model.id,
                crate::domain::new_id(),
                ifc_file.id,
                vec![NewJob {
                    job_type: "convertWexBim".into(),
                    payload: "{}".into(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(version.version_number, 1);

        let bad = store
            .update_model_version_guarded(
                version.id,
                &[ModelVersionStatus::Ready],
                ModelVersionUpdate {
                    status: Some(ModelVersionStatus::Processing),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(bad, Err(Error::Conflict(_))));

        let ok = store
            .update_model_version_guarded(
                version.id,
                &[ModelVersionStatus::Pending],
                ModelVersionUpdate {
                    status: Some(ModelVersionStatus::Processing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(ok.status, ModelVersionStatus::Processing);
    }
}
