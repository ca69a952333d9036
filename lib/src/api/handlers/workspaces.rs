//! Workspace, project, and membership endpoints (spec.md §6 + SPEC_FULL §3
//! membership-management supplement).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::pagination::Pagination;
use crate::auth::Principal;
use crate::domain::WorkspaceRole;
use crate::error::{Error, Result};
use crate::services::Services;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub quota_bytes: Option<i64>,
}

pub async fn create_workspace(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Json(body): Json<CreateWorkspaceRequest>,
) -> Result<impl IntoResponse> {
    let workspace = services
        .workspaces
        .create_workspace(user_id, &body.name, body.description.as_deref(), body.quota_bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

pub async fn list_workspaces(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    pagination: Pagination,
) -> Result<impl IntoResponse> {
    let page = services
        .workspaces
        .list_workspaces(user_id, pagination.page, pagination.page_size)
        .await?;
    Ok(Json(page))
}

pub async fn get_workspace(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(workspace_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let workspace = services.workspaces.get_workspace(user_id, workspace_id).await?;
    Ok(Json(workspace))
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspaceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

pub async fn update_workspace(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(workspace_id): Path<Uuid>,
    Json(body): Json<UpdateWorkspaceRequest>,
) -> Result<impl IntoResponse> {
    let workspace = services
        .workspaces
        .update_workspace(user_id, workspace_id, body.name.as_deref(), body.description.as_deref())
        .await?;
    Ok(Json(workspace))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

pub async fn create_project(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(workspace_id): Path<Uuid>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse> {
    let project = services
        .workspaces
        .create_project(user_id, workspace_id, &body.name, body.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    pub role: WorkspaceRole,
}

pub async fn add_member(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(workspace_id): Path<Uuid>,
    Json(body): Json<AddMemberRequest>,
) -> Result<impl IntoResponse> {
    let membership = services
        .workspaces
        .add_member(user_id, workspace_id, body.user_id, body.role)
        .await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

pub async fn remove_member(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path((workspace_id, target_user_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let removed = services.workspaces.remove_member(user_id, workspace_id, target_user_id).await?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound("membership not found".to_string()))
    }
}

pub async fn workspace_usage(
    State(services): State<Services>,
    Principal { user_id, .. }: Principal,
    Path(workspace_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let bytes = services.files.workspace_usage(user_id, workspace_id).await?;
    Ok(Json(serde_json::json!({ "workspaceId": workspace_id, "usageBytes": bytes })))
}
