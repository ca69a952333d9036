//! Workspace/project lifecycle and membership management (spec.md §3/§4.4).
//!
//! `FileService` and `ModelService` own everything scoped to a single
//! project; this service owns the tenancy layer above them — workspaces,
//! projects, and who belongs to which at what role.

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::RbacService;
use crate::domain::{Project, Workspace, WorkspaceMembership, WorkspaceRole};
use crate::error::{Error, NotFoundOnForbidden, Result};
use crate::persistence::{Page, Store};

#[derive(Clone)]
pub struct WorkspaceService {
    store: Arc<dyn Store>,
    rbac: RbacService,
}

impl WorkspaceService {
    pub fn new(store: Arc<dyn Store>, rbac: RbacService) -> Self {
        Self { store, rbac }
    }

    pub async fn create_workspace(
        &self,
        owner_user_id: Uuid,
        name: &str,
        description: Option<&str>,
        quota_bytes: Option<i64>,
    ) -> Result<Workspace> {
        if name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }
        self.store.create_workspace(name, description, quota_bytes, owner_user_id).await
    }

    pub async fn get_workspace(&self, user_id: Uuid, id: Uuid) -> Result<Workspace> {
        self.rbac
            .require_workspace_role(user_id, id, WorkspaceRole::Guest)
            .await
            .or_not_found()?;
        self.store
            .get_workspace(id)
            .await?
            .ok_or_else(|| Error::NotFound("workspace not found".to_string()))
    }

    pub async fn update_workspace(
        &self,
        user_id: Uuid,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Workspace> {
        self.rbac.require_workspace_role(user_id, id, WorkspaceRole::Admin).await?;
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(Error::Validation("name must not be empty".to_string()));
            }
        }
        self.store.update_workspace(id, name, description).await
    }

    pub async fn list_workspaces(&self, user_id: Uuid, page: i64, page_size: i64) -> Result<Page<Workspace>> {
        self.store.list_workspaces_for_user(user_id, page, page_size).await
    }

    pub async fn create_project(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }
        self.rbac.require_workspace_role(user_id, workspace_id, WorkspaceRole::Member).await?;
        self.store.create_project(workspace_id, name, description).await
    }

    pub async fn get_project(&self, user_id: Uuid, project_id: Uuid) -> Result<Project> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| Error::NotFound("project not found".to_string()))?;
        self.rbac
            .require_workspace_role(user_id, project.workspace_id, WorkspaceRole::Guest)
            .await
            .or_not_found()?;
        Ok(project)
    }

    pub async fn add_member(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        target_user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<WorkspaceMembership> {
        self.rbac.require_workspace_role(user_id, workspace_id, WorkspaceRole::Admin).await?;
        self.store.create_workspace_membership(workspace_id, target_user_id, role).await
    }

    pub async fn remove_member(&self, user_id: Uuid, workspace_id: Uuid, target_user_id: Uuid) -> Result<bool> {
        self.rbac.require_workspace_role(user_id, workspace_id, WorkspaceRole::Admin).await?;
        self.store.delete_workspace_membership(workspace_id, target_user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;

    async fn setup() -> (WorkspaceService, Arc<dyn Store>, Uuid) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let rbac = RbacService::new(store.clone());
        let service = WorkspaceService::new(store.clone(), rbac);
        let owner = store.get_or_create_user("owner", None, None).await.unwrap();
        (service, store, owner.id)
    }

    #[tokio::test]
    async fn creator_becomes_owner_and_can_add_members() {
        let (service, store, owner_id) = setup().await;
        let workspace = service.create_workspace(owner_id, "acme", None, None).await.unwrap();
        let role = store.workspace_role_for_user(workspace.id, owner_id).await.unwrap();
        assert_eq!(role, Some(WorkspaceRole::Owner));

        let member = store.get_or_create_user("member", None, None).await.unwrap();
        service
            .add_member(owner_id, workspace.id, member.id, WorkspaceRole::Member)
            .await
            .unwrap();
        let role = store.workspace_role_for_user(workspace.id, member.id).await.unwrap();
        assert_eq!(role, Some(WorkspaceRole::Member));
    }

    #[tokio::test]
    async fn non_admin_cannot_add_members() {
        let (service, store, owner_id) = setup().await;
        let workspace = service.create_workspace(owner_id, "acme", None, None).await.unwrap();
        let guest = store.get_or_create_user("guest", None, None).await.unwrap();
        store
            .create_workspace_membership(workspace.id, guest.id, WorkspaceRole::Guest)
            .await
            .unwrap();

        let other = store.get_or_create_user("other", None, None).await.unwrap();
        let result = service.add_member(guest.id, workspace.id, other.id, WorkspaceRole::Member).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn project_creation_requires_at_least_member() {
        let (service, store, owner_id) = setup().await;
        let workspace = service.create_workspace(owner_id, "acme", None, None).await.unwrap();
        let guest = store.get_or_create_user("guest", None, None).await.unwrap();
        store
            .create_workspace_membership(workspace.id, guest.id, WorkspaceRole::Guest)
            .await
            .unwrap();

        let result = service.create_project(guest.id, workspace.id, "tower", None).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));

        let project = service.create_project(owner_id, workspace.id, "tower", None).await.unwrap();
        assert_eq!(project.workspace_id, workspace.id);
    }
}
