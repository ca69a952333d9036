//! # Octopus Backend Library
//!
//! Core library for the Octopus BIM backend appliance: file registry and upload
//! state machine, model/version lifecycle and background processing pipeline,
//! membership-based RBAC composed with an OAuth2 authorization server, and the
//! pluggable persistence/storage abstractions that back all of it.

pub mod api;
pub mod auth;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod files;
pub mod log;
pub mod modelversions;
pub mod persistence;
pub mod processing;
pub mod services;
pub mod storage;
pub mod workspaces;

pub use api::create_app;
pub use config::Config;
pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;

    use crate::services::Services;

    async fn create_test_app() -> axum::Router {
        let services = Services::test().await;
        create_app(services)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app().await;
        let server = TestServer::new(app).unwrap();

        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let json: serde_json::Value = response.json();
        assert_eq!(json["status"], "ok");
    }
}
