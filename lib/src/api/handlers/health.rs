//! Health probe (SPEC_FULL §3), grounded in the teacher's `services::health`
//! module: reports whether the wired persistence and storage backends are
//! reachable, for use by orchestration liveness/readiness probes.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::services::Services;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    persistence: bool,
    storage: bool,
}

pub async fn health_check(State(services): State<Services>) -> impl IntoResponse {
    let persistence = services.store.get_user(Uuid::nil()).await.is_ok();
    let storage = services.storage.exists("__health_check__").await.is_ok();

    let status = if persistence && storage { "ok" } else { "degraded" };
    Json(HealthReport { status, persistence, storage })
}
