//! Verified caller identity.
//!
//! Credentials are checked by the gateway in front of this service, which forwards the
//! resulting identity as `x-actor-id` and `x-actor-role`. Handlers take an [`Actor`] argument to
//! require one.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Courier,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("user") {
            Some(Role::User)
        } else if raw.eq_ignore_ascii_case("courier") || raw.eq_ignore_ascii_case("driver") {
            Some(Role::Courier)
        } else if raw.eq_ignore_ascii_case("admin") {
            Some(Role::Admin)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Courier => "courier",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{} role required",
                role.as_str()
            )))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require_role(Role::Admin)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, ACTOR_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|err| AppError::Unauthorized(format!("invalid {ACTOR_ID_HEADER}: {err}")))?;
        let raw_role = header(parts, ACTOR_ROLE_HEADER)?;
        let role = Role::parse(raw_role).ok_or_else(|| {
            AppError::Unauthorized(format!("unknown actor role: {raw_role}"))
        })?;

        Ok(Actor { id, role })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))
}
