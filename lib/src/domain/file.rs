use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a `File` row is an original upload or a processor-produced
/// derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileKind {
    Source,
    Artifact,
}

/// Coarse classification inferred at commit time from extension/content-type,
/// or assigned by a processing handler producing an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileCategory {
    Ifc,
    WexBim,
    Properties,
    Thumbnail,
    Log,
    Other,
}

impl FileCategory {
    /// Classifies a committed source file from its extension and content-type.
    /// Either signal alone is enough to recognize IFC; anything neither
    /// recognizes falls back to `Other`, consistent with the spec's note that
    /// category may be `Ifc` or `Other` "pending inference".
    pub fn infer_from_extension(file_name: &str, content_type: Option<&str>) -> Self {
        let ext_is_ifc = file_name
            .rsplit('.')
            .next()
            .map(|s| s.eq_ignore_ascii_case("ifc"))
            .unwrap_or(false);
        let content_type_is_ifc = content_type
            .map(|ct| {
                let ct = ct.to_ascii_lowercase();
                ct.contains("ifc") || ct == "application/x-step" || ct == "model/ifc"
            })
            .unwrap_or(false);
        if ext_is_ifc || content_type_is_ifc {
            FileCategory::Ifc
        } else {
            FileCategory::Other
        }
    }
}

/// `{id, projectId, name, contentType?, sizeBytes, checksum?, kind,
/// category, storageProvider, storageKey, isDeleted, createdAt, deletedAt?}`.
///
/// Invariant: `(storageProvider, storageKey)` uniquely resolves bytes. When
/// `isDeleted = true`, bytes may be deleted asynchronously but the row is
/// retained for lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub kind: FileKind,
    pub category: FileCategory,
    pub storage_provider: String,
    pub storage_key: String,
    pub is_deleted: bool,
    /// Set once the soft-delete reclamation sweep has removed the
    /// underlying storage object for a deleted file.
    pub bytes_reclaimed: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Directed edge type for `FileLink`. Edges form a DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkType {
    DerivedFrom,
    ThumbnailOf,
    PropertiesOf,
    LogOf,
}

/// `{id, sourceFileId, targetFileId, linkType}`. Cascade is restrictive:
/// deleting a linked file is blocked unless it is the deleted source's own
/// artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLink {
    pub id: Uuid,
    pub source_file_id: Uuid,
    pub target_file_id: Uuid,
    pub link_type: LinkType,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_ifc_category_case_insensitively() {
        assert_eq!(
            FileCategory::infer_from_extension("SampleHouse.IFC", None),
            FileCategory::Ifc
        );
        assert_eq!(
            FileCategory::infer_from_extension("notes.txt", Some("text/plain")),
            FileCategory::Other
        );
        assert_eq!(
            FileCategory::infer_from_extension("no-extension", None),
            FileCategory::Other
        );
    }

    #[test]
    fn infers_ifc_category_from_content_type_when_extension_is_missing() {
        assert_eq!(
            FileCategory::infer_from_extension("upload.bin", Some("application/x-step")),
            FileCategory::Ifc
        );
        assert_eq!(
            FileCategory::infer_from_extension("model.dat", Some("model/ifc; charset=utf-8")),
            FileCategory::Ifc
        );
    }
}
