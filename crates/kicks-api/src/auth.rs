//! # Caller Identity
//!
//! Authentication happens upstream. The identity gateway forwards the
//! verified caller as two headers:
//!
//! ```text
//! x-actor-role: buyer | seller | arbiter | payment_processor | scheduler
//! x-actor-id:   <user id>    (required for buyer, seller and arbiter)
//! ```
//!
//! Handlers take a [`CallerIdentity`] and pass its [`Actor`] to the engine,
//! which decides whether that actor may perform the action.

use axum::http::request::Parts;
use axum::http::HeaderMap;
use kicks_core::UserId;
use kicks_escrow::{Actor, ActorRole};

use crate::error::AppError;

/// Header carrying the caller's role.
pub const ROLE_HEADER: &str = "x-actor-role";
/// Header carrying the caller's user id.
pub const ID_HEADER: &str = "x-actor-id";

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub actor: Actor,
}

impl CallerIdentity {
    /// The caller's role.
    pub fn role(&self) -> ActorRole {
        self.actor.role()
    }

    /// Parse the identity headers.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let header = |name: &str| -> Result<Option<&str>, AppError> {
            headers
                .get(name)
                .map(|v| {
                    v.to_str()
                        .map(str::trim)
                        .map_err(|_| AppError::Unauthorized(format!("{name} is not valid ASCII")))
                })
                .transpose()
        };

        let role: ActorRole = header(ROLE_HEADER)?
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AppError::Unauthorized(format!("missing {ROLE_HEADER} header")))?
            .parse()
            .map_err(|e| AppError::Unauthorized(format!("{e}")))?;
        if role == ActorRole::System {
            return Err(AppError::Unauthorized(
                "the system role cannot be asserted by callers".to_string(),
            ));
        }

        let id = match header(ID_HEADER)?.filter(|id| !id.is_empty()) {
            Some(raw) => Some(
                UserId::new(raw).map_err(|e| AppError::Unauthorized(format!("{ID_HEADER}: {e}")))?,
            ),
            None => None,
        };

        let actor = Actor::from_role(role, id).map_err(|e| AppError::Unauthorized(e.to_string()))?;
        Ok(Self { actor })
    }
}

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

/// Check that the caller has the given role.
/// Returns 403 Forbidden otherwise.
pub fn require_role(caller: &CallerIdentity, role: ActorRole) -> Result<(), AppError> {
    if caller.role() == role {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role '{}' required, caller has '{}'",
            role.as_str(),
            caller.role().as_str()
        )))
    }
}
