//! Route table for the Octopus HTTP surface (spec.md §6, SPEC_FULL §3).

use axum::routing::{delete, get, post};
use axum::Router;

use super::handlers::{files, health, models, oauth, workspaces};
use crate::services::Services;

pub fn routes(services: Services) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        // Workspaces, projects, membership, quota usage.
        .route("/api/v1/workspaces", post(workspaces::create_workspace).get(workspaces::list_workspaces))
        .route(
            "/api/v1/workspaces/{id}",
            get(workspaces::get_workspace).put(workspaces::update_workspace),
        )
        .route("/api/v1/workspaces/{id}/projects", post(workspaces::create_project))
        .route("/api/v1/workspaces/{id}/members", post(workspaces::add_member))
        .route(
            "/api/v1/workspaces/{id}/members/{user_id}",
            delete(workspaces::remove_member),
        )
        .route("/api/v1/usage/workspaces/{id}", get(workspaces::workspace_usage))
        // File registry, upload sessions, lineage.
        .route("/api/v1/projects/{id}/files/reserve", post(files::reserve_upload))
        .route(
            "/api/v1/projects/{id}/files/sessions/{session_id}/content",
            post(files::upload_content),
        )
        .route(
            "/api/v1/projects/{id}/files/sessions/{session_id}/commit",
            post(files::commit_upload),
        )
        .route("/api/v1/projects/{id}/files", get(files::list_files))
        .route("/api/v1/files/{id}", get(files::get_file).delete(files::soft_delete_file))
        .route("/api/v1/files/{id}/content", get(files::stream_download))
        .route("/api/v1/files/link", post(files::create_file_link))
        // Models and model versions.
        .route("/api/v1/projects/{id}/models", post(models::create_model).get(models::list_models))
        .route(
            "/api/v1/models/{id}/versions",
            post(models::create_model_version).get(models::list_model_versions),
        )
        .route("/api/v1/modelversions/{id}", get(models::get_model_version))
        .route("/api/v1/modelversions/{id}/wexbim", get(models::stream_wexbim))
        .route("/api/v1/modelversions/{id}/properties", get(models::stream_properties))
        .route("/api/v1/modelversions/{id}/progress", get(models::model_version_progress))
        // OAuth2 authorization server and app management.
        .route("/oauth/authorize", get(oauth::authorize))
        .route("/oauth/token", post(oauth::token))
        .route(
            "/api/v1/workspaces/{id}/oauth-apps",
            post(oauth::register_app).get(oauth::list_apps),
        )
        .with_state(services)
}
