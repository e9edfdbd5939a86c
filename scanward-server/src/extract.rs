use axum::{extract::FromRequestParts, http::request::Parts};
use scanward_model::{OrganizationId, Principal, UserId};
use uuid::Uuid;

use crate::errors::AppError;

pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const USER_HEADER: &str = "x-user-id";

/// Caller identity forwarded by the upstream auth layer.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Principal);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let organization_id = OrganizationId::from(header_uuid(parts, ORGANIZATION_HEADER)?);
        let user_id = UserId::from(header_uuid(parts, USER_HEADER)?);
        Ok(Caller(Principal {
            organization_id,
            user_id,
        }))
    }
}

fn header_uuid(parts: &Parts, name: &str) -> Result<Uuid, AppError> {
    let value = parts
        .headers
        .get(name)
        .ok_or_else(|| AppError::unauthorized(format!("missing {name} header")))?;
    value
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .ok_or_else(|| AppError::unauthorized(format!("malformed {name} header")))
}
