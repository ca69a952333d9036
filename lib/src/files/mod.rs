//! File registry, upload state machine, lineage, and usage accounting
//! (spec.md §4.2).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::RbacService;
use crate::constants::upload::DEFAULT_RESERVE_TTL_SECS;
use crate::domain::{
    File, FileCategory, FileKind, FileLink, LinkType, ProjectRole, UploadSession,
};
use crate::error::{Error, NotFoundOnForbidden, Result};
use crate::persistence::{FileFilter, NewFile, Page, Store};
use crate::storage::{read_all, stream_from_bytes, build_key, ByteStream, StoragePool, StorageProvider};

#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn Store>,
    storage: Arc<dyn StorageProvider>,
    rbac: RbacService,
}

/// What [`FileService::stream_download`] hands back to the HTTP layer.
pub struct DownloadStream {
    pub content_type: String,
    pub size_bytes: i64,
    pub stream: ByteStream,
}

impl FileService {
    pub fn new(store: Arc<dyn Store>, storage: Arc<dyn StorageProvider>, rbac: RbacService) -> Self {
        Self { store, storage, rbac }
    }

    async fn project_workspace(&self, project_id: Uuid) -> Result<Uuid> {
        Ok(self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| Error::NotFound("project not found".to_string()))?
            .workspace_id)
    }

    pub async fn reserve_upload(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        file_name: &str,
        content_type: Option<&str>,
        expected_size_bytes: Option<i64>,
    ) -> Result<UploadSession> {
        if file_name.trim().is_empty() {
            return Err(Error::Validation("fileName must not be empty".to_string()));
        }
        let workspace_id = self.project_workspace(project_id).await?;
        self.rbac
            .require_project_role(user_id, project_id, workspace_id, ProjectRole::Editor)
            .await?;

        let temp_key = build_key(workspace_id, project_id, StoragePool::Uploads);
        let expires_at = Utc::now() + Duration::seconds(DEFAULT_RESERVE_TTL_SECS);
        self.store
            .create_upload_session(project_id, file_name, content_type, expected_size_bytes, &temp_key, expires_at)
            .await
    }

    /// Permitted from `Reserved` or `Uploading`; repeated calls overwrite the
    /// temp object. Rejects terminal or expired sessions.
    pub async fn upload_content(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        content_type: Option<&str>,
        data: ByteStream,
    ) -> Result<UploadSession> {
        let session = self
            .store
            .get_upload_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("upload session not found".to_string()))?;
        let workspace_id = self.project_workspace(session.project_id).await?;
        self.rbac
            .require_project_role(user_id, session.project_id, workspace_id, ProjectRole::Editor)
            .await?;

        if session.status.is_terminal() {
            return Err(Error::Conflict("upload session is already in a terminal state".to_string()));
        }
        if Utc::now() >= session.expires_at {
            return Err(Error::Conflict("upload session has expired".to_string()));
        }
        let temp_key = session
            .temp_storage_key
            .as_deref()
            .ok_or_else(|| Error::StorageInconsistency("upload session has no temp storage key".to_string()))?;

        let bytes = read_all(data).await?;
        if let Some(expected) = session.expected_size_bytes {
            if bytes.len() as i64 != expected {
                self.store.mark_upload_session_failed(session_id).await?;
                return Err(Error::Validation(
                    "uploaded size does not match expectedSizeBytes".to_string(),
                ));
            }
        }
        self.storage.put(temp_key, stream_from_bytes(bytes), content_type).await?;
        self.store.mark_upload_session_uploading(session_id).await
    }

    /// Permitted only from `Uploading`. Enforces the workspace quota gate
    /// before committing; a quota failure leaves the session `Uploading`
    /// with its bytes intact.
    pub async fn commit_upload(&self, user_id: Uuid, session_id: Uuid, checksum: Option<&str>) -> Result<File> {
        let session = self
            .store
            .get_upload_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("upload session not found".to_string()))?;
        let workspace_id = self.project_workspace(session.project_id).await?;
        self.rbac
            .require_project_role(user_id, session.project_id, workspace_id, ProjectRole::Editor)
            .await?;

        let temp_key = session
            .temp_storage_key
            .as_deref()
            .ok_or_else(|| Error::StorageInconsistency("upload session has no temp storage key".to_string()))?;
        let stream = self
            .storage
            .open_read(temp_key)
            .await?
            .ok_or_else(|| Error::StorageInconsistency("upload session bytes are missing".to_string()))?;
        let bytes = read_all(stream).await?;
        let size_bytes = bytes.len() as i64;

        if let Some(expected_checksum) = checksum {
            let actual = hex::encode(Sha256::digest(&bytes));
            if actual != expected_checksum {
                return Err(Error::Validation("checksum does not match uploaded bytes".to_string()));
            }
        }

        let workspace = self
            .store
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| Error::NotFound("workspace not found".to_string()))?;
        if let Some(quota) = workspace.quota_bytes {
            let usage = self.store.workspace_usage(workspace_id).await?;
            if usage + size_bytes > quota {
                return Err(Error::QuotaExceeded(format!(
                    "committing {size_bytes} bytes would exceed the workspace quota of {quota} bytes"
                )));
            }
        }

        let category =
            FileCategory::infer_from_extension(&session.file_name, session.content_type.as_deref());
        let file_key = build_key(workspace_id, session.project_id, StoragePool::Files);
        self.storage
            .put(&file_key, stream_from_bytes(bytes), session.content_type.as_deref())
            .await?;

        let new_file = NewFile {
            project_id: session.project_id,
            name: session.file_name.clone(),
            content_type: session.content_type.clone(),
            size_bytes,
            checksum: checksum.map(str::to_string),
            kind: FileKind::Source,
            category,
            storage_provider: self.storage.provider_id().to_string(),
            storage_key: file_key,
        };

        let (_, file) = self.store.commit_upload_session(session_id, new_file).await?;
        let _ = self.storage.delete(temp_key).await;
        Ok(file)
    }

    /// Sessions past `expiresAt` still in a non-terminal state. Called by
    /// the per-minute expiry sweeper (SPEC_FULL §3).
    pub async fn expire_stale_sessions(&self) -> Result<usize> {
        let now = Utc::now();
        let expirable = self.store.list_expirable_upload_sessions(now).await?;
        let mut expired = 0;
        for session in expirable {
            if self.store.mark_upload_session_expired(session.id).await? {
                if let Some(key) = &session.temp_storage_key {
                    let _ = self.storage.delete(key).await;
                }
                expired += 1;
            }
        }
        Ok(expired)
    }

    pub async fn list_files(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        filter: FileFilter,
        page: i64,
        page_size: i64,
    ) -> Result<Page<File>> {
        let workspace_id = self.project_workspace(project_id).await?;
        let minimum = if filter.include_deleted {
            ProjectRole::ProjectAdmin
        } else {
            ProjectRole::Viewer
        };
        self.rbac
            .require_project_role(user_id, project_id, workspace_id, minimum)
            .await
            .or_not_found()?;
        self.store.list_files(project_id, filter, page, page_size).await
    }

    pub async fn get_file(&self, user_id: Uuid, file_id: Uuid) -> Result<File> {
        let file = self
            .store
            .get_file(file_id)
            .await?
            .ok_or_else(|| Error::NotFound("file not found".to_string()))?;
        let workspace_id = self.project_workspace(file.project_id).await?;
        self.rbac
            .require_project_role(user_id, file.project_id, workspace_id, ProjectRole::Viewer)
            .await
            .or_not_found()?;
        Ok(file)
    }

    pub async fn stream_download(&self, user_id: Uuid, file_id: Uuid) -> Result<DownloadStream> {
        let file = self.get_file(user_id, file_id).await?;
        let stream = self
            .storage
            .open_read(&file.storage_key)
            .await?
            .ok_or_else(|| Error::StorageInconsistency("file row exists but its bytes are missing".to_string()))?;
        Ok(DownloadStream {
            content_type: file.content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            size_bytes: file.size_bytes,
            stream,
        })
    }

    /// Requires both files to exist, share a project, not already have an
    /// identical edge, and not close a cycle through `target` (spec.md §9).
    pub async fn create_file_link(
        &self,
        user_id: Uuid,
        source_file_id: Uuid,
        target_file_id: Uuid,
        link_type: LinkType,
    ) -> Result<FileLink> {
        let source = self
            .store
            .get_file(source_file_id)
            .await?
            .ok_or_else(|| Error::NotFound("source file not found".to_string()))?;
        let target = self
            .store
            .get_file(target_file_id)
            .await?
            .ok_or_else(|| Error::NotFound("target file not found".to_string()))?;
        if source.project_id != target.project_id {
            return Err(Error::Validation("linked files must share a project".to_string()));
        }
        let workspace_id = self.project_workspace(source.project_id).await?;
        self.rbac
            .require_project_role(user_id, source.project_id, workspace_id, ProjectRole::Editor)
            .await?;

        let existing = self.store.list_links_from(source_file_id).await?;
        if existing
            .iter()
            .any(|l| l.target_file_id == target_file_id && l.link_type == link_type)
        {
            return Err(Error::Conflict("this link already exists".to_string()));
        }
        if self.reaches(target_file_id, source_file_id).await? {
            return Err(Error::Validation(
                "this link would close a cycle in the file lineage graph".to_string(),
            ));
        }

        self.store.create_file_link(source_file_id, target_file_id, link_type).await
    }

    /// Breadth-first search over forward edges: can `from` reach `to`?
    async fn reaches(&self, from: Uuid, to: Uuid) -> Result<bool> {
        let mut visited = HashSet::new();
        let mut frontier = vec![from];
        while let Some(node) = frontier.pop() {
            if node == to {
                return Ok(true);
            }
            if !visited.insert(node) {
                continue;
            }
            for link in self.store.list_links_from(node).await? {
                frontier.push(link.target_file_id);
            }
        }
        Ok(false)
    }

    /// Blocked when any non-deleted link targets `file_id`, except artifacts
    /// of this same (now-deleted) file's own source chain.
    pub async fn soft_delete_file(&self, user_id: Uuid, file_id: Uuid) -> Result<File> {
        let file = self
            .store
            .get_file(file_id)
            .await?
            .ok_or_else(|| Error::NotFound("file not found".to_string()))?;
        let workspace_id = self.project_workspace(file.project_id).await?;
        self.rbac
            .require_project_role(user_id, file.project_id, workspace_id, ProjectRole::ProjectAdmin)
            .await?;

        let incoming = self.store.list_links_to(file_id).await?;
        let blocked = incoming.iter().any(|link| link.link_type != LinkType::DerivedFrom);
        if blocked {
            return Err(Error::Conflict(
                "cannot delete a file that other files are derived from".to_string(),
            ));
        }
        self.store.soft_delete_file(file_id).await
    }

    pub async fn workspace_usage(&self, user_id: Uuid, workspace_id: Uuid) -> Result<i64> {
        self.rbac
            .require_workspace_role(user_id, workspace_id, crate::domain::WorkspaceRole::Guest)
            .await
            .or_not_found()?;
        self.store.workspace_usage(workspace_id).await
    }

    /// Background sweep: deletes the stored bytes of soft-deleted files and
    /// marks them reclaimed, so quota usage reflects actual storage
    /// consumption rather than the full history of deletions. Called on a
    /// timer by the binary, never from an HTTP handler.
    pub async fn reclaim_deleted_files(&self, batch_size: i64) -> Result<usize> {
        let candidates = self.store.list_unreclaimed_deleted_files(batch_size).await?;
        let mut reclaimed = 0;
        for file in candidates {
            self.storage.delete(&file.storage_key).await?;
            self.store.mark_file_bytes_reclaimed(file.id).await?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkspaceRole;
    use crate::persistence::InMemoryStore;
    use crate::storage::MemoryStorageProvider;

    async fn setup() -> (FileService, Uuid, Uuid, Uuid) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
        let rbac = RbacService::new(store.clone());
        let service = FileService::new(store.clone(), storage, rbac);

        let user = store.get_or_create_user("editor", None, None).await.unwrap();
        let workspace = store.create_workspace("acme", None, None, user.id).await.unwrap();
        store
            .create_workspace_membership(workspace.id, user.id, WorkspaceRole::Member)
            .await
            .unwrap();
        let project = store.create_project(workspace.id, "tower", None).await.unwrap();
        store
            .create_project_membership(project.id, user.id, ProjectRole::Editor)
            .await
            .unwrap();

        (service, user.id, workspace.id, project.id)
    }

    #[tokio::test]
    async fn full_upload_commit_round_trip() {
        let (service, user_id, _workspace_id, project_id) = setup().await;
        let session = service
            .reserve_upload(user_id, project_id, "house.ifc", Some("application/octet-stream"), Some(5))
            .await
            .unwrap();

        service
            .upload_content(user_id, session.id, None, stream_from_bytes(b"hello".to_vec()))
            .await
            .unwrap();

        let file = service.commit_upload(user_id, session.id, None).await.unwrap();
        assert_eq!(file.size_bytes, 5);
        assert_eq!(file.category, FileCategory::Ifc);
    }

    #[tokio::test]
    async fn expected_size_mismatch_fails_the_session() {
        let (service, user_id, _workspace_id, project_id) = setup().await;
        let session = service
            .reserve_upload(user_id, project_id, "house.ifc", None, Some(10))
            .await
            .unwrap();

        let result = service
            .upload_content(user_id, session.id, None, stream_from_bytes(b"short".to_vec()))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn quota_exceeded_leaves_session_uploading() {
        let (service, user_id, workspace_id, project_id) = setup().await;
        // Re-wire with a tiny quota by creating a fresh workspace.
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
        let rbac = RbacService::new(store.clone());
        let service = FileService::new(store.clone(), storage, rbac);
        let user = store.get_or_create_user("editor2", None, None).await.unwrap();
        let workspace = store
            .create_workspace("tiny", None, Some(3), user.id)
            .await
            .unwrap();
        let project = store.create_project(workspace.id, "tower", None).await.unwrap();
        store
            .create_project_membership(project.id, user.id, ProjectRole::Editor)
            .await
            .unwrap();

        let session = service
            .reserve_upload(user.id, project.id, "house.ifc", None, None)
            .await
            .unwrap();
        service
            .upload_content(user.id, session.id, None, stream_from_bytes(b"hello".to_vec()))
            .await
            .unwrap();

        let result = service.commit_upload(user.id, session.id, None).await;
        assert!(matches!(result, Err(Error::QuotaExceeded(_))));

        let reloaded = store.get_upload_session(session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, crate::domain::UploadSessionStatus::Uploading);

        let _ = (user_id, workspace_id, project_id);
    }

    #[tokio::test]
    async fn file_link_cycle_is_rejected() {
        let (service, user_id, _workspace_id, project_id) = setup().await;
        let session_a = service
            .reserve_upload(user_id, project_id, "a.ifc", None, None)
            .await
            .unwrap();
        service
            .upload_content(user_id, session_a.id, None, stream_from_bytes(b"a".to_vec()))
            .await
            .unwrap();
        let file_a = service.commit_upload(user_id, session_a.id, None).await.unwrap();

        let session_b = service
            .reserve_upload(user_id, project_id, "b.wexbim", None, None)
            .await
            .unwrap();
        service
            .upload_content(user_id, session_b.id, None, stream_from_bytes(b"b".to_vec()))
            .await
            .unwrap();
        let file_b = service.commit_upload(user_id, session_b.id, None).await.unwrap();

        service
            .create_file_link(user_id, file_a.id, file_b.id, LinkType::DerivedFrom)
            .await
            .unwrap();

        let result = service
            .create_file_link(user_id, file_b.id, file_a.id, LinkType::DerivedFrom)
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
