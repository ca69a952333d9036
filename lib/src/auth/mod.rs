//! Principal extraction/auto-provisioning, RBAC, scopes, and the OAuth2
//! authorization server (spec.md §4.4).

pub mod oauth;
pub mod rbac;
pub mod scopes;
pub mod secret;

pub use oauth::OAuth2Service;
pub use rbac::RbacService;
pub use scopes::ScopeSet;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use uuid::Uuid;

use crate::config::AuthMode;
use crate::error::Error;
use crate::services::Services;

/// The authenticated caller, resolved fresh on every request (spec.md §4.4:
/// "Principal -> user provisioning"). In `development` mode this is the
/// fixed identity from `auth.dev`, auto-provisioned as a `User` row on first
/// use; `oidc` mode is not implemented by this build.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl<S> FromRequestParts<S> for Principal
where
    Services: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let services = Services::from_ref(state);

        let (subject, email, display_name) = match services.config.auth.mode {
            AuthMode::Development => {
                let dev = &services.config.auth.dev;
                (dev.subject.clone(), dev.email.clone(), dev.display_name.clone())
            }
            AuthMode::Oidc => {
                return Err(Error::Unauthorized(
                    "oidc principal validation is not implemented in this build; use auth.mode = development"
                        .to_string(),
                ));
            }
        };

        let user = services
            .store
            .get_or_create_user(&subject, email.as_deref(), display_name.as_deref())
            .await?;

        Ok(Principal {
            user_id: user.id,
            subject: user.subject,
            email: user.email,
            display_name: user.display_name,
        })
    }
}
