use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `{id, projectId, name, description?}`. Contains ordered versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a `ModelVersion`'s background processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelVersionStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

/// `{id, modelId, versionNumber, ifcFileId, wexBimFileId?, propertiesFileId?,
/// status, errorMessage?, createdAt, processedAt?}`.
///
/// Invariants: `versionNumber` is unique per model and monotonically
/// increasing starting at 1. When `status = Ready`, both `wexBimFileId` and
/// `propertiesFileId` are non-null.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersion {
    pub id: Uuid,
    pub model_id: Uuid,
    pub version_number: i32,
    pub ifc_file_id: Uuid,
    pub wex_bim_file_id: Option<Uuid>,
    pub properties_file_id: Option<Uuid>,
    pub status: ModelVersionStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ModelVersion {
    /// `Ready` iff both artifacts are attached; invariant 2 of the testable
    /// properties list.
    pub fn is_consistent(&self) -> bool {
        if self.status == ModelVersionStatus::Ready {
            self.wex_bim_file_id.is_some() && self.properties_file_id.is_some()
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(status: ModelVersionStatus, wex: Option<Uuid>, props: Option<Uuid>) -> ModelVersion {
        ModelVersion {
            id: Uuid::now_v7(),
            model_id: Uuid::now_v7(),
            version_number: 1,
            ifc_file_id: Uuid::now_v7(),
            wex_bim_file_id: wex,
            properties_file_id: props,
            status,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn ready_without_both_artifacts_is_inconsistent() {
        assert!(!version(ModelVersionStatus::Ready, Some(Uuid::now_v7()), None).is_consistent());
        assert!(version(
            ModelVersionStatus::Ready,
            Some(Uuid::now_v7()),
            Some(Uuid::now_v7())
        )
        .is_consistent());
        assert!(version(ModelVersionStatus::Processing, None, None).is_consistent());
    }
}
