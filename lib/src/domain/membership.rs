use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workspace roles, ordered by power. Derived `Ord` gives us
/// `Guest < Member < Admin < Owner` for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkspaceRole {
    Guest,
    Member,
    Admin,
    Owner,
}

/// Project roles, ordered by power: `Viewer < Editor < ProjectAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProjectRole {
    Viewer,
    Editor,
    ProjectAdmin,
}

/// `{id, scopeId=workspaceId, userId, role}`. At most one row per
/// `(workspaceId, userId)`; enforced by a unique index in persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMembership {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: WorkspaceRole,
    pub created_at: DateTime<Utc>,
}

/// `{id, scopeId=projectId, userId, role}`. At most one row per
/// `(projectId, userId)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMembership {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: ProjectRole,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_roles_are_totally_ordered() {
        assert!(WorkspaceRole::Guest < WorkspaceRole::Member);
        assert!(WorkspaceRole::Member < WorkspaceRole::Admin);
        assert!(WorkspaceRole::Admin < WorkspaceRole::Owner);
    }

    #[test]
    fn project_roles_are_totally_ordered() {
        assert!(ProjectRole::Viewer < ProjectRole::Editor);
        assert!(ProjectRole::Editor < ProjectRole::ProjectAdmin);
    }
}
