//! File registry, upload-session, lineage, and streaming endpoints (spec.md
//! §4.2/§6).

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::pagination::Pagination;
use crate::auth::Principal;
use crate::domain::{FileCategory, FileKind, LinkType};
use crate::error::Result;
use crate::persistence::FileFilter;
use crate::services::Services;
use crate::storage::stream_from_bytes;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveUploadRequest {
    pub file_name: String,
    pub content_type: Option<String>,
    pub expected_size_bytes: Option<i64>,
}

pub async fn reserve_upload(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(project_id): Path<Uuid>,
    Json(body): Json<ReserveUploadRequest>,
) -> Result<impl IntoResponse> {
    let session = services
        .files
        .reserve_upload(
            user_id,
            project_id,
            &body.file_name,
            body.content_type.as_deref(),
            body.expected_size_bytes,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn upload_content(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path((_project_id, session_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let session = services
        .files
        .upload_content(user_id, session_id, content_type, stream_from_bytes(body.to_vec()))
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize, Default)]
pub struct CommitUploadRequest {
    pub checksum: Option<String>,
}

pub async fn commit_upload(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path((_project_id, session_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<CommitUploadRequest>,
) -> Result<impl IntoResponse> {
    let file = services.files.commit_upload(user_id, session_id, body.checksum.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilesListQuery {
    pub kind: Option<FileKind>,
    pub category: Option<FileCategory>,
    #[serde(default)]
    pub include_deleted: bool,
}

pub async fn list_files(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(project_id): Path<Uuid>,
    axum::extract::Query(query): axum::extract::Query<FilesListQuery>,
    pagination: Pagination,
) -> Result<impl IntoResponse> {
    let filter = FileFilter {
        kind: query.kind,
        category: query.category,
        include_deleted: query.include_deleted,
    };
    let page = services
        .files
        .list_files(user_id, project_id, filter, pagination.page, pagination.page_size)
        .await?;
    Ok(Json(page))
}

pub async fn get_file(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let file = services.files.get_file(user_id, file_id).await?;
    Ok(Json(file))
}

pub async fn stream_download(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(file_id): Path<Uuid>,
) -> Result<Response> {
    let download = services.files.stream_download(user_id, file_id).await?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.content_type)
        .header(header::CONTENT_LENGTH, download.size_bytes)
        .body(Body::from_stream(download.stream))
        .unwrap())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileLinkRequest {
    pub source_file_id: Uuid,
    pub target_file_id: Uuid,
    pub link_type: LinkType,
}

pub async fn create_file_link(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Json(body): Json<CreateFileLinkRequest>,
) -> Result<impl IntoResponse> {
    let link = services
        .files
        .create_file_link(user_id, body.source_file_id, body.target_file_id, body.link_type)
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn soft_delete_file(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let file = services.files.soft_delete_file(user_id, file_id).await?;
    Ok(Json(file))
}
