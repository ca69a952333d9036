use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upload state machine: `Reserved -> Uploading -> Committed` (terminal
/// success) with branches `Reserved|Uploading -> Expired|Failed` (terminal
/// failure). A session never transitions out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadSessionStatus {
    Reserved,
    Uploading,
    Committed,
    Expired,
    Failed,
}

impl UploadSessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadSessionStatus::Committed
                | UploadSessionStatus::Expired
                | UploadSessionStatus::Failed
        )
    }
}

/// `{id, projectId, fileName, contentType?, expectedSizeBytes?, status,
/// tempStorageKey?, committedFileId?, createdAt, expiresAt}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: Uuid,
    pub project_id: Uuid,
    pub file_name: String,
    pub content_type: Option<String>,
    pub expected_size_bytes: Option<i64>,
    pub status: UploadSessionStatus,
    pub temp_storage_key: Option<String>,
    pub committed_file_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_closed() {
        assert!(UploadSessionStatus::Committed.is_terminal());
        assert!(UploadSessionStatus::Expired.is_terminal());
        assert!(UploadSessionStatus::Failed.is_terminal());
        assert!(!UploadSessionStatus::Reserved.is_terminal());
        assert!(!UploadSessionStatus::Uploading.is_terminal());
    }
}
