//! The two core job handlers (spec.md §4.5).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{FileCategory, FileKind, LinkType, ModelVersion, ModelVersionStatus};
use crate::error::{Error, Result};
use crate::persistence::{ModelVersionUpdate, NewFile, Store};
use crate::storage::{build_key, read_all, stream_from_bytes, StoragePool, StorageProvider};

use super::ifc::{IfcPropertyReader, IfcToWexBimConverter, RawIfcElement};
use super::properties::{
    Element, PropertiesDocument, Property, PropertySet, PropertyValue, PROPERTIES_SCHEMA_VERSION,
};
use super::{JobEnvelope, JobHandler, Progress, ProgressNotifier};

pub const CONVERT_WEXBIM_JOB: &str = crate::modelversions::CONVERT_WEXBIM_JOB;
pub const EXTRACT_PROPERTIES_JOB: &str = crate::modelversions::EXTRACT_PROPERTIES_JOB;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobPayload {
    model_version_id: Uuid,
}

/// Resolves `(ifcFile, workspaceId, projectId)` for a model version; shared
/// by both handlers.
async fn version_context(
    store: &Arc<dyn Store>,
    version: &ModelVersion,
) -> Result<(crate::domain::File, Uuid, Uuid)> {
    let ifc_file = store
        .get_file(version.ifc_file_id)
        .await?
        .ok_or_else(|| Error::StorageInconsistency("ifc file row is missing".to_string()))?;
    let model = store
        .get_model(version.model_id)
        .await?
        .ok_or_else(|| Error::StorageInconsistency("model row is missing".to_string()))?;
    let project = store
        .get_project(model.project_id)
        .await?
        .ok_or_else(|| Error::StorageInconsistency("project row is missing".to_string()))?;
    Ok((ifc_file, project.workspace_id, project.id))
}

/// Marks the version `Failed` from whatever non-terminal state it was in. A
/// lost race against the sibling handler (already `Ready`/`Failed`) is
/// ignored; the error is still propagated to the worker for retry.
async fn mark_failed(store: &Arc<dyn Store>, version_id: Uuid, message: &str) {
    let _ = store
        .update_model_version_guarded(
            version_id,
            &[ModelVersionStatus::Pending, ModelVersionStatus::Processing],
            ModelVersionUpdate {
                status: Some(ModelVersionStatus::Failed),
                error_message: Some(message.to_string()),
                ..Default::default()
            },
        )
        .await;
}

/// After setting this handler's own artifact field, re-reads the version and
/// flips it to `Ready` iff the sibling artifact is also present. Whichever of
/// the two handlers commits its write last will observe both fields set,
/// so exactly one of them performs the transition (spec.md §9 guarded
/// read-modify-write).
async fn maybe_mark_ready(store: &Arc<dyn Store>, version_id: Uuid) -> Result<bool> {
    let refreshed = store
        .get_model_version(version_id)
        .await?
        .ok_or_else(|| Error::StorageInconsistency("model version row is missing".to_string()))?;
    if refreshed.wex_bim_file_id.is_some() && refreshed.properties_file_id.is_some() {
        let _ = store
            .update_model_version_guarded(
                version_id,
                &[ModelVersionStatus::Processing],
                ModelVersionUpdate {
                    status: Some(ModelVersionStatus::Ready),
                    processed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;
        return Ok(true);
    }
    Ok(false)
}

fn progress(
    job_id: Uuid,
    model_version_id: Uuid,
    stage: &str,
    percent_complete: u8,
    message: &str,
) -> Progress {
    Progress {
        job_id,
        model_version_id,
        stage: stage.to_string(),
        percent_complete,
        message: message.to_string(),
        is_complete: false,
        is_success: false,
        error_message: None,
    }
}

fn terminal_progress(job_id: Uuid, model_version_id: Uuid, stage: &str, error: Option<&str>) -> Progress {
    Progress {
        job_id,
        model_version_id,
        stage: stage.to_string(),
        percent_complete: 100,
        message: error.unwrap_or("done").to_string(),
        is_complete: true,
        is_success: error.is_none(),
        error_message: error.map(str::to_string),
    }
}

pub struct ConvertWexBimHandler {
    store: Arc<dyn Store>,
    storage: Arc<dyn StorageProvider>,
    converter: Arc<dyn IfcToWexBimConverter>,
    notifier: Arc<dyn ProgressNotifier>,
}

impl ConvertWexBimHandler {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn StorageProvider>,
        converter: Arc<dyn IfcToWexBimConverter>,
        notifier: Arc<dyn ProgressNotifier>,
    ) -> Self {
        Self {
            store,
            storage,
            converter,
            notifier,
        }
    }

    async fn run(&self, envelope: &JobEnvelope, version_id: Uuid, version: &ModelVersion) -> Result<()> {
        self.store
            .update_model_version_guarded(
                version_id,
                &[ModelVersionStatus::Pending, ModelVersionStatus::Processing],
                ModelVersionUpdate {
                    status: Some(ModelVersionStatus::Processing),
                    ..Default::default()
                },
            )
            .await?;

        self.notifier
            .notify(progress(envelope.job_id, version_id, "ConvertWexBim", 10, "reading source ifc"))
            .await;

        let (ifc_file, workspace_id, project_id) = version_context(&self.store, version).await?;
        let stream = self
            .storage
            .open_read(&ifc_file.storage_key)
            .await?
            .ok_or_else(|| Error::StorageInconsistency("ifc bytes are missing".to_string()))?;
        let bytes = read_all(stream).await?;

        self.notifier
            .notify(progress(envelope.job_id, version_id, "ConvertWexBim", 40, "converting to wexbim"))
            .await;
        let output = self.converter.convert(&bytes).await?;

        self.notifier
            .notify(progress(envelope.job_id, version_id, "ConvertWexBim", 70, "uploading artifact"))
            .await;
        let key = build_key(workspace_id, project_id, StoragePool::Artifacts);
        self.storage
            .put(&key, stream_from_bytes(output.clone()), Some("application/octet-stream"))
            .await?;

        let file = self
            .store
            .insert_file(NewFile {
                project_id,
                name: format!("{}.wexbim", ifc_file.name),
                content_type: Some("application/octet-stream".to_string()),
                size_bytes: output.len() as i64,
                checksum: None,
                kind: FileKind::Artifact,
                category: FileCategory::WexBim,
                storage_provider: self.storage.provider_id().to_string(),
                storage_key: key,
            })
            .await?;

        self.store
            .create_file_link(version.ifc_file_id, file.id, LinkType::DerivedFrom)
            .await?;

        self.store
            .update_model_version_guarded(
                version_id,
                &[ModelVersionStatus::Processing],
                ModelVersionUpdate {
                    wex_bim_file_id: Some(file.id),
                    ..Default::default()
                },
            )
            .await?;
        maybe_mark_ready(&self.store, version_id).await?;

        self.notifier
            .notify(terminal_progress(envelope.job_id, version_id, "ConvertWexBim", None))
            .await;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ConvertWexBimHandler {
    fn job_type(&self) -> &'static str {
        CONVERT_WEXBIM_JOB
    }

    async fn handle(&self, envelope: &JobEnvelope) -> Result<()> {
        let payload: JobPayload = serde_json::from_str(&envelope.payload)
            .map_err(|e| Error::Processing(format!("malformed job payload: {e}")))?;
        let version_id = payload.model_version_id;

        let version = self
            .store
            .get_model_version(version_id)
            .await?
            .ok_or_else(|| Error::Processing("model version no longer exists".to_string()))?;
        if version.wex_bim_file_id.is_some() {
            return Ok(());
        }

        let result = self.run(envelope, version_id, &version).await;
        if let Err(e) = &result {
            mark_failed(&self.store, version_id, &e.to_string()).await;
            self.notifier
                .notify(terminal_progress(
                    envelope.job_id,
                    version_id,
                    "ConvertWexBim",
                    Some(&e.to_string()),
                ))
                .await;
        }
        result
    }
}

pub struct ExtractPropertiesHandler {
    store: Arc<dyn Store>,
    storage: Arc<dyn StorageProvider>,
    reader: Arc<dyn IfcPropertyReader>,
    notifier: Arc<dyn ProgressNotifier>,
}

impl ExtractPropertiesHandler {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn StorageProvider>,
        reader: Arc<dyn IfcPropertyReader>,
        notifier: Arc<dyn ProgressNotifier>,
    ) -> Self {
        Self {
            store,
            storage,
            reader,
            notifier,
        }
    }

    async fn run(&self, envelope: &JobEnvelope, version_id: Uuid, version: &ModelVersion) -> Result<()> {
        self.store
            .update_model_version_guarded(
                version_id,
                &[ModelVersionStatus::Pending, ModelVersionStatus::Processing],
                ModelVersionUpdate {
                    status: Some(ModelVersionStatus::Processing),
                    ..Default::default()
                },
            )
            .await?;

        self.notifier
            .notify(progress(envelope.job_id, version_id, "ExtractProperties", 10, "reading source ifc"))
            .await;

        let (ifc_file, workspace_id, project_id) = version_context(&self.store, version).await?;
        let stream = self
            .storage
            .open_read(&ifc_file.storage_key)
            .await?
            .ok_or_else(|| Error::StorageInconsistency("ifc bytes are missing".to_string()))?;
        let bytes = read_all(stream).await?;

        self.notifier
            .notify(progress(envelope.job_id, version_id, "ExtractProperties", 40, "extracting elements"))
            .await;
        let raw_elements = self.reader.read_elements(&bytes).await?;
        let mut elements = Vec::with_capacity(raw_elements.len());
        for raw in &raw_elements {
            match build_element(raw) {
                Ok(element) => elements.push(element),
                Err(reason) => {
                    tracing::warn!(
                        version_id = %version_id,
                        entity_label = %raw.entity_label,
                        reason,
                        "skipping malformed IFC element during property extraction"
                    );
                }
            }
        }

        let document = PropertiesDocument {
            schema_version: PROPERTIES_SCHEMA_VERSION,
            extracted_at: Utc::now(),
            total_elements: elements.len(),
            elements,
        };
        let payload_bytes = serde_json::to_vec(&document)
            .map_err(|e| Error::Processing(format!("failed to serialize properties document: {e}")))?;

        self.notifier
            .notify(progress(envelope.job_id, version_id, "ExtractProperties", 70, "uploading artifact"))
            .await;
        let key = build_key(workspace_id, project_id, StoragePool::Artifacts);
        self.storage
            .put(&key, stream_from_bytes(payload_bytes.clone()), Some("application/json"))
            .await?;

        let file = self
            .store
            .insert_file(NewFile {
                project_id,
                name: format!("{}.properties.json", ifc_file.name),
                content_type: Some("application/json".to_string()),
                size_bytes: payload_bytes.len() as i64,
                checksum: None,
                kind: FileKind::Artifact,
                category: FileCategory::Properties,
                storage_provider: self.storage.provider_id().to_string(),
                storage_key: key,
            })
            .await?;

        self.store
            .create_file_link(version.ifc_file_id, file.id, LinkType::PropertiesOf)
            .await?;

        self.store
            .update_model_version_guarded(
                version_id,
                &[ModelVersionStatus::Processing],
                ModelVersionUpdate {
                    properties_file_id: Some(file.id),
                    ..Default::default()
                },
            )
            .await?;
        maybe_mark_ready(&self.store, version_id).await?;

        self.notifier
            .notify(terminal_progress(envelope.job_id, version_id, "ExtractProperties", None))
            .await;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ExtractPropertiesHandler {
    fn job_type(&self) -> &'static str {
        EXTRACT_PROPERTIES_JOB
    }

    async fn handle(&self, envelope: &JobEnvelope) -> Result<()> {
        let payload: JobPayload = serde_json::from_str(&envelope.payload)
            .map_err(|e| Error::Processing(format!("malformed job payload: {e}")))?;
        let version_id = payload.model_version_id;

        let version = self
            .store
            .get_model_version(version_id)
            .await?
            .ok_or_else(|| Error::Processing("model version no longer exists".to_string()))?;
        if version.properties_file_id.is_some() {
            return Ok(());
        }

        let result = self.run(envelope, version_id, &version).await;
        if let Err(e) = &result {
            mark_failed(&self.store, version_id, &e.to_string()).await;
            self.notifier
                .notify(terminal_progress(
                    envelope.job_id,
                    version_id,
                    "ExtractProperties",
                    Some(&e.to_string()),
                ))
                .await;
        }
        result
    }
}

/// Turns one raw entity into a document element. Fails (isolated by the
/// caller) when the entity label isn't the numeric STEP id the rest of the
/// pipeline assumes.
fn build_element(raw: &RawIfcElement) -> std::result::Result<Element, String> {
    if raw.entity_label.parse::<u64>().is_err() {
        return Err(format!("entity label '{}' is not numeric", raw.entity_label));
    }

    Ok(Element {
        entity_label: raw.entity_label.clone(),
        global_id: raw.global_id.clone(),
        name: raw.name.clone(),
        type_name: raw.type_name.clone(),
        description: None,
        object_type: None,
        type_object_name: None,
        type_object_type: None,
        property_sets: vec![PropertySet {
            name: "Pset_Default".to_string(),
            global_id: None,
            is_type_property: false,
            properties: vec![Property {
                name: "Reference".to_string(),
                value: PropertyValue::String {
                    value: raw.global_id.clone(),
                },
                unit: None,
            }],
        }],
        quantity_sets: vec![],
        type_property_sets: vec![],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RbacService;
    use crate::domain::{FileKind as DomainFileKind, ProjectRole, WorkspaceRole};
    use crate::files::FileService;
    use crate::modelversions::ModelService;
    use crate::persistence::InMemoryStore;
    use crate::processing::ifc::{StubIfcPropertyReader, StubWexBimConverter};
    use crate::processing::BroadcastProgressNotifier;
    use crate::storage::{stream_from_bytes, MemoryStorageProvider};

    const SAMPLE_IFC: &str = "ISO-10303-21;\n\
        #1=IFCWALL('2N1$dfeq1Ffv2n28B$bNpE',#2,'Wall-01',$,$,#5,#6,$);\n\
        #2=IFCOWNERHISTORY();\n\
        #3=IFCDOOR('0cFhGnRAT3mQzMF7_Kp9$j',#2,'Door-01',$,$,#7,#8,$);\n";

    async fn setup() -> (
        Arc<dyn Store>,
        Arc<dyn StorageProvider>,
        ModelService,
        FileService,
        Uuid,
        Uuid,
    ) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
        let rbac = RbacService::new(store.clone());
        let model_service = ModelService::new(store.clone(), storage.clone(), rbac.clone());
        let file_service = FileService::new(store.clone(), storage.clone(), rbac);

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

        (store, storage, model_service, file_service, user.id, project.id)
    }

    async fn seed_version(
        store: &Arc<dyn Store>,
        model_service: &ModelService,
        file_service: &FileService,
        user_id: Uuid,
        project_id: Uuid,
    ) -> (Uuid, JobEnvelope, JobEnvelope) {
        let model = model_service.create_model(user_id, project_id, "house", None).await.unwrap();
        let session = file_service
            .reserve_upload(user_id, project_id, "house.ifc", Some("text/plain"), None)
            .await
            .unwrap();
        file_service
            .upload_content(user_id, session.id, None, stream_from_bytes(SAMPLE_IFC.as_bytes().to_vec()))
            .await
            .unwrap();
        let ifc_file = file_service.commit_upload(user_id, session.id, None).await.unwrap();
        assert_eq!(ifc_file.kind, DomainFileKind::Source);

        let version = model_service
            .create_model_version(user_id, model.id, ifc_file.id)
            .await
            .unwrap();
        let pending = store.list_pending_jobs().await.unwrap();
        assert_eq!(pending.len(), 2);

        let wexbim_job = pending.iter().find(|j| j.job_type == CONVERT_WEXBIM_JOB).unwrap().clone();
        let props_job = pending.iter().find(|j| j.job_type == EXTRACT_PROPERTIES_JOB).unwrap().clone();
        (version.id, wexbim_job.into(), props_job.into())
    }

    #[tokio::test]
    async fn convert_wexbim_sets_artifact_and_leaves_processing_until_properties_done() {
        let (store, storage, model_service, file_service, user_id, project_id) = setup().await;
        let (version_id, wexbim_envelope, _props_envelope) =
            seed_version(&store, &model_service, &file_service, user_id, project_id).await;

        let notifier: Arc<dyn ProgressNotifier> = Arc::new(BroadcastProgressNotifier::new());
        let handler = ConvertWexBimHandler::new(
            store.clone(),
            storage.clone(),
            Arc::new(StubWexBimConverter),
            notifier,
        );
        handler.handle(&wexbim_envelope).await.unwrap();

        let version = store.get_model_version(version_id).await.unwrap().unwrap();
        assert!(version.wex_bim_file_id.is_some());
        assert_eq!(version.status, ModelVersionStatus::Processing);

        // Idempotent: running again with the artifact already set is a no-op.
        handler.handle(&wexbim_envelope).await.unwrap();
    }

    #[tokio::test]
    async fn both_handlers_together_bring_the_version_to_ready() {
        let (store, storage, model_service, file_service, user_id, project_id) = setup().await;
        let (version_id, wexbim_envelope, props_envelope) =
            seed_version(&store, &model_service, &file_service, user_id, project_id).await;

        let notifier: Arc<dyn ProgressNotifier> = Arc::new(BroadcastProgressNotifier::new());
        let wexbim_handler = ConvertWexBimHandler::new(
            store.clone(),
            storage.clone(),
            Arc::new(StubWexBimConverter),
            notifier.clone(),
        );
        let props_handler = ExtractPropertiesHandler::new(
            store.clone(),
            storage.clone(),
            Arc::new(StubIfcPropertyReader),
            notifier,
        );

        wexbim_handler.handle(&wexbim_envelope).await.unwrap();
        props_handler.handle(&props_envelope).await.unwrap();

        let version = store.get_model_version(version_id).await.unwrap().unwrap();
        assert_eq!(version.status, ModelVersionStatus::Ready);
        assert!(version.is_consistent());
        assert!(version.processed_at.is_some());
    }

    #[tokio::test]
    async fn extract_properties_isolates_a_malformed_element() {
        let (store, storage, model_service, file_service, user_id, project_id) = setup().await;
        let model = model_service.create_model(user_id, project_id, "house", None).await.unwrap();
        let session = file_service
            .reserve_upload(user_id, project_id, "house.ifc", Some("text/plain"), None)
            .await
            .unwrap();
        let ifc_with_bad_label = "ISO-10303-21;\n\
            #oops=IFCWALL('2N1$dfeq1Ffv2n28B$bNpE',#2,'Wall-01',$,$,#5,#6,$);\n\
            #3=IFCDOOR('0cFhGnRAT3mQzMF7_Kp9$j',#2,'Door-01',$,$,#7,#8,$);\n";
        file_service
            .upload_content(
                user_id,
                session.id,
                None,
                stream_from_bytes(ifc_with_bad_label.as_bytes().to_vec()),
            )
            .await
            .unwrap();
        let ifc_file = file_service.commit_upload(user_id, session.id, None).await.unwrap();
        let version = model_service
            .create_model_version(user_id, model.id, ifc_file.id)
            .await
            .unwrap();
        let pending = store.list_pending_jobs().await.unwrap();
        let props_job = pending
            .into_iter()
            .find(|j| j.job_type == EXTRACT_PROPERTIES_JOB)
            .unwrap();

        let notifier: Arc<dyn ProgressNotifier> = Arc::new(BroadcastProgressNotifier::new());
        let handler = ExtractPropertiesHandler::new(
            store.clone(),
            storage.clone(),
            Arc::new(StubIfcPropertyReader),
            notifier,
        );
        handler.handle(&props_job.into()).await.unwrap();

        let updated = store.get_model_version(version.id).await.unwrap().unwrap();
        let props_file_id = updated.properties_file_id.unwrap();
        let file = store.get_file(props_file_id).await.unwrap().unwrap();
        let bytes = read_all(storage.open_read(&file.storage_key).await.unwrap().unwrap())
            .await
            .unwrap();
        let document: PropertiesDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(document.total_elements, 1);
        assert_eq!(document.elements[0].type_name, "IFCDOOR");
    }
}
