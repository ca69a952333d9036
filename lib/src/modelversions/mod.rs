//! Model and model-version lifecycle (spec.md §4.3).

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::RbacService;
use crate::domain::{FileKind, Model, ModelVersion, ProjectRole};
use crate::error::{Error, NotFoundOnForbidden, Result};
use crate::persistence::{NewJob, Page, Store};
use crate::storage::{ByteStream, StorageProvider};

pub const CONVERT_WEXBIM_JOB: &str = "ConvertWexBim";
pub const EXTRACT_PROPERTIES_JOB: &str = "ExtractProperties";

#[derive(Clone)]
pub struct ModelService {
    store: Arc<dyn Store>,
    storage: Arc<dyn StorageProvider>,
    rbac: RbacService,
}

impl ModelService {
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

    pub async fn create_model(&self, user_id: Uuid, project_id: Uuid, name: &str, description: Option<&str>) -> Result<Model> {
        if name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }
        let workspace_id = self.project_workspace(project_id).await?;
        self.rbac
            .require_project_role(user_id, project_id, workspace_id, ProjectRole::Editor)
            .await?;
        self.store.create_model(project_id, name, description).await
    }

    /// Validates the ifc file is an existing, non-deleted `Source` file in
    /// the model's own project, then inserts the version and enqueues both
    /// processing jobs in one outbox transaction (spec.md §4.3 invariant:
    /// "readers must never observe a Pending version without at least one
    /// enqueued job").
    pub async fn create_model_version(&self, user_id: Uuid, model_id: Uuid, ifc_file_id: Uuid) -> Result<ModelVersion> {
        let model = self
            .store
            .get_model(model_id)
            .await?
            .ok_or_else(|| Error::NotFound("model not found".to_string()))?;
        let workspace_id = self.project_workspace(model.project_id).await?;
        self.rbac
            .require_project_role(user_id, model.project_id, workspace_id, ProjectRole::Editor)
            .await?;

        let ifc_file = self
            .store
            .get_file(ifc_file_id)
            .await?
            .ok_or_else(|| Error::Validation("ifcFileId does not reference an existing file".to_string()))?;
        if ifc_file.is_deleted {
            return Err(Error::Validation("ifcFileId references a deleted file".to_string()));
        }
        if ifc_file.kind != FileKind::Source {
            return Err(Error::Validation("ifcFileId must reference a Source file".to_string()));
        }
        if ifc_file.project_id != model.project_id {
            return Err(Error::Validation(
                "ifcFileId must belong to the same project as the model".to_string(),
            ));
        }

        let version_id = crate::domain::new_id();
        let jobs = vec![
            NewJob {
                job_type: CONVERT_WEXBIM_JOB.to_string(),
                payload: serde_json::json!({ "modelVersionId": version_id }).to_string(),
            },
            NewJob {
                job_type: EXTRACT_PROPERTIES_JOB.to_string(),
                payload: serde_json::json!({ "modelVersionId": version_id }).to_string(),
            },
        ];
        let (version, _persisted_jobs) = self
            .store
            .create_model_version_with_jobs(model_id, version_id, ifc_file_id, jobs)
            .await?;

        Ok(version)
    }

    pub async fn get_model(&self, user_id: Uuid, model_id: Uuid) -> Result<Model> {
        let model = self
            .store
            .get_model(model_id)
            .await?
            .ok_or_else(|| Error::NotFound("model not found".to_string()))?;
        let workspace_id = self.project_workspace(model.project_id).await?;
        self.rbac
            .require_project_role(user_id, model.project_id, workspace_id, ProjectRole::Viewer)
            .await
            .or_not_found()?;
        Ok(model)
    }

    pub async fn list_models(&self, user_id: Uuid, project_id: Uuid, page: i64, page_size: i64) -> Result<Page<Model>> {
        let workspace_id = self.project_workspace(project_id).await?;
        self.rbac
            .require_project_role(user_id, project_id, workspace_id, ProjectRole::Viewer)
            .await
            .or_not_found()?;
        self.store.list_models(project_id, page, page_size).await
    }

    async fn model_version_project(&self, version: &ModelVersion) -> Result<(Uuid, Uuid)> {
        let model = self
            .store
            .get_model(version.model_id)
            .await?
            .ok_or_else(|| Error::NotFound("model not found".to_string()))?;
        let workspace_id = self.project_workspace(model.project_id).await?;
        Ok((model.project_id, workspace_id))
    }

    pub async fn get_model_version(&self, user_id: Uuid, version_id: Uuid) -> Result<ModelVersion> {
        let version = self
            .store
            .get_model_version(version_id)
            .await?
            .ok_or_else(|| Error::NotFound("model version not found".to_string()))?;
        let (project_id, workspace_id) = self.model_version_project(&version).await?;
        self.rbac
            .require_project_role(user_id, project_id, workspace_id, ProjectRole::Viewer)
            .await
            .or_not_found()?;
        Ok(version)
    }

    pub async fn list_model_versions(&self, user_id: Uuid, model_id: Uuid, page: i64, page_size: i64) -> Result<Page<ModelVersion>> {
        let model = self
            .store
            .get_model(model_id)
            .await?
            .ok_or_else(|| Error::NotFound("model not found".to_string()))?;
        let workspace_id = self.project_workspace(model.project_id).await?;
        self.rbac
            .require_project_role(user_id, model.project_id, workspace_id, ProjectRole::Viewer)
            .await
            .or_not_found()?;
        self.store.list_model_versions(model_id, page, page_size).await
    }

    async fn stream_artifact(&self, artifact_file_id: Option<Uuid>) -> Result<(String, i64, ByteStream)> {
        let file_id = artifact_file_id
            .ok_or_else(|| Error::NotReady("the requested artifact has not been produced yet".to_string()))?;
        let file = self
            .store
            .get_file(file_id)
            .await?
            .ok_or_else(|| Error::StorageInconsistency("artifact file row is missing".to_string()))?;
        let stream = self
            .storage
            .open_read(&file.storage_key)
            .await?
            .ok_or_else(|| Error::StorageInconsistency("artifact bytes are missing".to_string()))?;
        Ok((
            file.content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            file.size_bytes,
            stream,
        ))
    }

    pub async fn stream_wexbim(&self, user_id: Uuid, version_id: Uuid) -> Result<(String, i64, ByteStream)> {
        let version = self.get_model_version(user_id, version_id).await?;
        self.stream_artifact(version.wex_bim_file_id).await
    }

    pub async fn stream_properties(&self, user_id: Uuid, version_id: Uuid) -> Result<(String, i64, ByteStream)> {
        let version = self.get_model_version(user_id, version_id).await?;
        self.stream_artifact(version.properties_file_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelVersionStatus, WorkspaceRole};
    use crate::persistence::{InMemoryStore, NewFile};
    use crate::domain::FileCategory;
    use crate::storage::MemoryStorageProvider;

    async fn setup() -> (ModelService, Arc<dyn Store>, Uuid, Uuid, Uuid) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
        let rbac = RbacService::new(store.clone());
        let service = ModelService::new(store.clone(), storage, rbac);

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

        (service, store, user.id, workspace.id, project.id)
    }

    #[tokio::test]
    async fn create_model_version_enqueues_both_jobs_atomically() {
        let (service, store, user_id, _workspace_id, project_id) = setup().await;
        let model = service.create_model(user_id, project_id, "house", None).await.unwrap();
        let ifc_file = store
            .insert_file(NewFile {
                project_id,
                name: "house.ifc".to_string(),
                content_type: None,
                size_bytes: 100,
                checksum: None,
                kind: FileKind::Source,
                category: FileCategory::Ifc,
                storage_provider: "memory".to_string(),
                storage_key: "k".to_string(),
            })
            .await
            .unwrap();

        let version = service
            .create_model_version(user_id, model.id, ifc_file.id)
            .await
            .unwrap();
        assert_eq!(version.version_number, 1);
        assert_eq!(version.status, ModelVersionStatus::Pending);

        let pending = store.list_pending_jobs().await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn rejects_ifc_file_from_another_project() {
        let (service, store, user_id, workspace_id, project_id) = setup().await;
        let other_project = store.create_project(workspace_id, "other", None).await.unwrap();
        let model = service.create_model(user_id, project_id, "house", None).await.unwrap();
        let ifc_file = store
            .insert_file(NewFile {
                project_id: other_project.id,
                name: "house.ifc".to_string(),
                content_type: None,
                size_bytes: 100,
                checksum: None,
                kind: FileKind::Source,
                category: FileCategory::Ifc,
                storage_provider: "memory".to_string(),
                storage_key: "k".to_string(),
            })
            .await
            .unwrap();

        let result = service.create_model_version(user_id, model.id, ifc_file.id).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn streaming_before_ready_is_not_ready() {
        let (service, store, user_id, _workspace_id, project_id) = setup().await;
        let model = service.create_model(user_id, project_id, "house", None).await.unwrap();
        let ifc_file = store
            .insert_file(NewFile {
                project_id,
                name: "house.ifc".to_string(),
                content_type: None,
                size_bytes: 100,
                checksum: None,
                kind: FileKind::Source,
                category: FileCategory::Ifc,
                storage_provider: "memory".to_string(),
                storage_key: "k".to_string(),
            })
            .await
            .unwrap();
        let version = service.create_model_version(user_id, model.id, ifc_file.id).await.unwrap();

        let result = service.stream_wexbim(user_id, version.id).await;
        assert!(matches!(result, Err(Error::NotReady(_))));
    }
}
