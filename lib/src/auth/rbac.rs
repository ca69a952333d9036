//! Membership-based RBAC over the workspace ⊃ project hierarchy (spec.md §4.4).

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{ProjectRole, WorkspaceRole};
use crate::error::Error;
use crate::persistence::Store;

#[derive(Clone)]
pub struct RbacService {
    store: Arc<dyn Store>,
}

impl RbacService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn workspace_role(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<WorkspaceRole>, Error> {
        self.store.workspace_role_for_user(workspace_id, user_id).await
    }

    /// `effectiveProjectRole` per spec.md §4.4: a direct `ProjectMembership`
    /// wins; otherwise the workspace role maps down (`Owner/Admin ->
    /// ProjectAdmin`, `Member -> Viewer`, `Guest/none -> no access`).
    pub async fn effective_project_role(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<ProjectRole>, Error> {
        if let Some(role) = self.store.project_role_for_user(project_id, user_id).await? {
            return Ok(Some(role));
        }
        let ws_role = self.store.workspace_role_for_user(workspace_id, user_id).await?;
        Ok(match ws_role {
            Some(WorkspaceRole::Owner) | Some(WorkspaceRole::Admin) => Some(ProjectRole::ProjectAdmin),
            Some(WorkspaceRole::Member) => Some(ProjectRole::Viewer),
            Some(WorkspaceRole::Guest) | None => None,
        })
    }

    pub async fn can_access_workspace(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        minimum: WorkspaceRole,
    ) -> Result<bool, Error> {
        Ok(self
            .workspace_role(user_id, workspace_id)
            .await?
            .is_some_and(|role| role >= minimum))
    }

    pub async fn can_access_project(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        workspace_id: Uuid,
        minimum: ProjectRole,
    ) -> Result<bool, Error> {
        Ok(self
            .effective_project_role(user_id, project_id, workspace_id)
            .await?
            .is_some_and(|role| role >= minimum))
    }

    /// Raises `Forbidden` (principal resolved, insufficient role) rather than
    /// `Unauthorized` — principal absence is handled upstream by the
    /// `Principal` extractor itself.
    pub async fn require_workspace_role(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        minimum: WorkspaceRole,
    ) -> Result<WorkspaceRole, Error> {
        match self.workspace_role(user_id, workspace_id).await? {
            Some(role) if role >= minimum => Ok(role),
            Some(_) => Err(Error::Forbidden("insufficient workspace role".to_string())),
            None => Err(Error::Forbidden("not a member of this workspace".to_string())),
        }
    }

    pub async fn require_project_role(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        workspace_id: Uuid,
        minimum: ProjectRole,
    ) -> Result<ProjectRole, Error> {
        match self
            .effective_project_role(user_id, project_id, workspace_id)
            .await?
        {
            Some(role) if role >= minimum => Ok(role),
            Some(_) => Err(Error::Forbidden("insufficient project role".to_string())),
            None => Err(Error::Forbidden("not a member of this project".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;

    #[tokio::test]
    async fn workspace_admin_implies_project_admin() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let rbac = RbacService::new(store.clone());

        let owner = store.get_or_create_user("owner", None, None).await.unwrap();
        let member = store.get_or_create_user("member", None, None).await.unwrap();
        let workspace = store
            .create_workspace("acme", None, None, owner.id)
            .await
            .unwrap();
        let project = store
            .create_project(workspace.id, "tower", None)
            .await
            .unwrap();
        store
            .create_workspace_membership(workspace.id, member.id, WorkspaceRole::Admin)
            .await
            .unwrap();

        let role = rbac
            .effective_project_role(member.id, project.id, workspace.id)
            .await
            .unwrap();
        assert_eq!(role, Some(ProjectRole::ProjectAdmin));
    }

    #[tokio::test]
    async fn guest_has_no_project_access() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let rbac = RbacService::new(store.clone());

        let owner = store.get_or_create_user("owner", None, None).await.unwrap();
        let guest = store.get_or_create_user("guest", None, None).await.unwrap();
        let workspace = store
            .create_workspace("acme", None, None, owner.id)
            .await
            .unwrap();
        let project = store
            .create_project(workspace.id, "tower", None)
            .await
            .unwrap();
        store
            .create_workspace_membership(workspace.id, guest.id, WorkspaceRole::Guest)
            .await
            .unwrap();

        let result = rbac
            .require_project_role(guest.id, project.id, workspace.id, ProjectRole::Viewer)
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }
}
