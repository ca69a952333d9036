//! HTTP handlers, grouped by domain. `routes.rs` wires these onto paths.

pub mod files;
pub mod health;
pub mod models;
pub mod oauth;
pub mod workspaces;
