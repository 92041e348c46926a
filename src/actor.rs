use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Who is performing a request, as asserted by the upstream gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", content = "user_id", rename_all = "lowercase")]
pub enum Actor {
    User(Uuid),
    Admin(Uuid),
    /// Internal automation such as carrier callbacks
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::User(id) | Actor::Admin(id) => Some(*id),
            Actor::System => None,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Actor::Admin(_) | Actor::System)
    }

    pub fn is_user(&self, user_id: Uuid) -> bool {
        self.user_id() == Some(user_id)
    }

    /// The account the actor is acting as; privileged actors without an id fail
    pub fn require_user(&self) -> AppResult<Uuid> {
        self.user_id()
            .ok_or_else(|| AppError::Forbidden("a user identity is required".to_string()))
    }

    /// Own account, or any account for privileged actors
    pub fn ensure_can_access(&self, user_id: Uuid) -> AppResult<()> {
        if self.is_user(user_id) || self.is_privileged() {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("not allowed to act for user {}", user_id)))
        }
    }

    pub fn ensure_privileged(&self) -> AppResult<()> {
        if self.is_privileged() {
            Ok(())
        } else {
            Err(AppError::Forbidden("admin role required".to_string()))
        }
    }

    fn from_headers(user_id: Option<&str>, role: Option<&str>) -> AppResult<Self> {
        let user_id = user_id
            .map(|raw| {
                Uuid::parse_str(raw.trim())
                    .map_err(|_| AppError::Validation(format!("invalid {} header", USER_ID_HEADER)))
            })
            .transpose()?;

        match (role.map(|r| r.trim().to_ascii_lowercase()).as_deref(), user_id) {
            (Some("system"), _) => Ok(Actor::System),
            (Some("admin"), Some(id)) => Ok(Actor::Admin(id)),
            (None | Some("user"), Some(id)) => Ok(Actor::User(id)),
            (Some("admin") | None | Some("user"), None) => Err(AppError::Forbidden(format!(
                "missing {} header",
                USER_ID_HEADER
            ))),
            (Some(other), _) => Err(AppError::Validation(format!("unknown role '{}'", other))),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
        Actor::from_headers(header(USER_ID_HEADER), header(USER_ROLE_HEADER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_from_headers() {
        let id = Uuid::new_v4();
        let raw = id.to_string();

        assert_eq!(Actor::from_headers(Some(&raw), None).unwrap(), Actor::User(id));
        assert_eq!(Actor::from_headers(Some(&raw), Some("Admin")).unwrap(), Actor::Admin(id));
        assert_eq!(Actor::from_headers(None, Some("system")).unwrap(), Actor::System);

        assert!(matches!(Actor::from_headers(None, None), Err(AppError::Forbidden(_))));
        assert!(matches!(
            Actor::from_headers(Some("nope"), None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            Actor::from_headers(Some(&raw), Some("root")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_access_rules() {
        let (me, other) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(Actor::User(me).ensure_can_access(me).is_ok());
        assert!(Actor::User(me).ensure_can_access(other).is_err());
        assert!(Actor::Admin(me).ensure_can_access(other).is_ok());
        assert!(Actor::System.require_user().is_err());
    }
}
