//! Domain entities and their invariant-carrying enums.
//!
//! Every entity carries an immutable 128-bit id (`Uuid` v7, time-ordered) and
//! a creation timestamp; mutable entities also carry an update timestamp.
//! These are plain data types — no persistence or RBAC logic lives here.

pub mod file;
pub mod membership;
pub mod model;
pub mod oauth;
pub mod project;
pub mod upload_session;
pub mod user;
pub mod workspace;

pub use file::*;
pub use membership::*;
pub use model::*;
pub use oauth::*;
pub use project::*;
pub use upload_session::*;
pub use user::*;
pub use workspace::*;

use uuid::Uuid;

/// Generates a new time-ordered entity id.
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}
