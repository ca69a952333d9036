//! Storage key construction, shared by every caller that writes or reads
//! through a [`super::StorageProvider`].

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

/// The pool segment of a storage key, per §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePool {
    Uploads,
    Files,
    Artifacts,
}

impl StoragePool {
    fn as_str(self) -> &'static str {
        match self {
            StoragePool::Uploads => crate::constants::storage::POOL_UPLOADS,
            StoragePool::Files => crate::constants::storage::POOL_FILES,
            StoragePool::Artifacts => crate::constants::storage::POOL_ARTIFACTS,
        }
    }
}

/// Builds a key of the form `<workspaceId>/<projectId>/<pool>/<random>`.
pub fn build_key(workspace_id: Uuid, project_id: Uuid, pool: StoragePool) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!(
        "{workspace_id}/{project_id}/{}/{random}",
        pool.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_has_four_segments_and_correct_pool() {
        let ws = Uuid::now_v7();
        let proj = Uuid::now_v7();
        let key = build_key(ws, proj, StoragePool::Artifacts);
        let segments: Vec<&str> = key.split('/').collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], ws.to_string());
        assert_eq!(segments[1], proj.to_string());
        assert_eq!(segments[2], "artifacts");
        assert!(key.len() <= crate::constants::storage::MAX_KEY_BYTES);
    }
}
