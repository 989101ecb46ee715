use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;
use crate::settlement::models::Actor;

pub const ACTOR_ID: &str = "x-actor-id";
pub const ACTOR_NAME: &str = "x-actor-name";
pub const ACTOR_EMAIL: &str = "x-actor-email";
pub const ACTOR_ACCESS_LEVEL: &str = "x-actor-access-level";

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Audit context forwarded by the auth gateway. Only the id is required.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw_id = header_value(parts, ACTOR_ID)
            .ok_or_else(|| AppError::Validation(format!("{} header is required", ACTOR_ID)))?;
        let id = Uuid::parse_str(&raw_id)
            .map_err(|_| AppError::Validation(format!("{} must be a UUID", ACTOR_ID)))?;

        Ok(Actor {
            id,
            name: header_value(parts, ACTOR_NAME),
            email: header_value(parts, ACTOR_EMAIL),
            access_level: header_value(parts, ACTOR_ACCESS_LEVEL),
        })
    }
}
