//! API module for the Octopus backend appliance.

pub mod handlers;
pub mod pagination;
pub mod routes;

use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::constants::server::MAX_BODY_BYTES;
use crate::log::create_http_trace_layer;
use crate::services::Services;

/// Creates the axum application with all routes and middleware.
pub fn create_app(services: Services) -> Router {
    let router = routes::routes(services);

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(false);

    router
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(create_http_trace_layer())
}
