//! Model, model-version, and artifact-streaming endpoints (spec.md §4.3/§6),
//! plus the SPEC_FULL §3 progress-polling fallback over `ProgressNotifier`.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::pagination::Pagination;
use crate::auth::Principal;
use crate::error::Result;
use crate::services::Services;

#[derive(Debug, Deserialize)]
pub struct CreateModelRequest {
    pub name: String,
    pub description: Option<String>,
}

pub async fn create_model(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(project_id): Path<Uuid>,
    Json(body): Json<CreateModelRequest>,
) -> Result<impl IntoResponse> {
    let model = services
        .models
        .create_model(user_id, project_id, &body.name, body.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(model)))
}

pub async fn list_models(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(project_id): Path<Uuid>,
    pagination: Pagination,
) -> Result<impl IntoResponse> {
    let page = services.models.list_models(user_id, project_id, pagination.page, pagination.page_size).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModelVersionRequest {
    pub ifc_file_id: Uuid,
}

pub async fn create_model_version(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(model_id): Path<Uuid>,
    Json(body): Json<CreateModelVersionRequest>,
) -> Result<impl IntoResponse> {
    let version = services.models.create_model_version(user_id, model_id, body.ifc_file_id).await?;
    Ok((StatusCode::CREATED, Json(version)))
}

pub async fn list_model_versions(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(model_id): Path<Uuid>,
    pagination: Pagination,
) -> Result<impl IntoResponse> {
    let page = services
        .models
        .list_model_versions(user_id, model_id, pagination.page, pagination.page_size)
        .await?;
    Ok(Json(page))
}

pub async fn get_model_version(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(version_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let version = services.models.get_model_version(user_id, version_id).await?;
    Ok(Json(version))
}

async fn stream_artifact_response(content_type: String, size_bytes: i64, stream: crate::storage::ByteStream) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, size_bytes)
        .body(Body::from_stream(stream))
        .unwrap()
}

pub async fn stream_wexbim(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(version_id): Path<Uuid>,
) -> Result<Response> {
    let (content_type, size_bytes, stream) = services.models.stream_wexbim(user_id, version_id).await?;
    Ok(stream_artifact_response(content_type, size_bytes, stream).await)
}

pub async fn stream_properties(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(version_id): Path<Uuid>,
) -> Result<Response> {
    let (content_type, size_bytes, stream) = services.models.stream_properties(user_id, version_id).await?;
    Ok(stream_artifact_response(content_type, size_bytes, stream).await)
}

/// Polling fallback for clients that cannot hold a push connection: drains
/// whatever progress events have accumulated on the broadcast channel since
/// the last poll and reports the latest one, or a synthesized snapshot
/// derived from the version's own status if nothing has been published yet.
pub async fn model_version_progress(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(version_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let version = services.models.get_model_version(user_id, version_id).await?;

    let mut receiver = services.progress.subscribe(version_id);
    let mut latest = None;
    while let Ok(progress) = receiver.try_recv() {
        latest = Some(progress);
    }

    let report = match latest {
        Some(progress) => serde_json::json!({
            "modelVersionId": progress.model_version_id,
            "jobId": progress.job_id,
            "stage": progress.stage,
            "percentComplete": progress.percent_complete,
            "message": progress.message,
            "isComplete": progress.is_complete,
        }),
        None => {
            let is_complete = matches!(
                version.status,
                crate::domain::ModelVersionStatus::Ready | crate::domain::ModelVersionStatus::Failed
            );
            serde_json::json!({
                "modelVersionId": version.id,
                "jobId": serde_json::Value::Null,
                "stage": format!("{:?}", version.status),
                "percentComplete": if version.status == crate::domain::ModelVersionStatus::Ready { 100u8 } else { 0u8 },
                "message": "no progress events observed yet",
                "isComplete": is_complete,
            })
        }
    };
    Ok(Json(report))
}
