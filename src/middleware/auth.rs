use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use sea_orm::EntityTrait;
use uuid::Uuid;

use crate::{
    entity::Users,
    error::{AppError, AppResult},
    models::Role,
    services::auth_service,
    state::AppState,
};

/// The authenticated caller, resolved against the `users` table on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

/// Everything a handler may need beyond authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Cart, checkout, own orders and favorites.
    Shop,
    /// Create, update and delete categories and products, set stock levels.
    ManageCatalog,
    /// Read, edit and delete any order, set order status.
    ManageOrders,
    /// List, read and delete users, create admins.
    ManageUsers,
}

impl Role {
    pub fn grants(self, permission: Permission) -> bool {
        match self {
            Role::Admin => true,
            Role::Customer => matches!(permission, Permission::Shop),
        }
    }
}

pub fn authorize(user: &AuthUser, permission: Permission) -> AppResult<()> {
    if user.role.grants(permission) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// Owners always pass; anyone else needs `permission`.
pub fn authorize_owner(user: &AuthUser, owner_id: Uuid, permission: Permission) -> AppResult<()> {
    if user.user_id == owner_id {
        return Ok(());
    }
    authorize(user, permission)
}

fn bearer_token(parts: &Parts) -> AppResult<&str> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header".into()))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization scheme".into()))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AppError::Unauthorized("Invalid Authorization scheme".into()));
    }
    Ok(token.trim())
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = bearer_token(parts)?;

        let user = match &state.identity {
            Some(identity) => {
                let external = identity.verify_token(token).await?;
                auth_service::find_or_provision_external_user(&state, &external).await?
            }
            None => {
                let claims = auth_service::decode_token(&state.config, token)?;
                let user_id = Uuid::parse_str(&claims.sub).map_err(|_| {
                    AppError::Unauthorized("Could not validate credentials".into())
                })?;
                Users::find_by_id(user_id)
                    .one(&state.orm)
                    .await?
                    .ok_or_else(|| AppError::Unauthorized("Could not validate credentials".into()))?
            }
        };

        if !user.is_active {
            return Err(AppError::Unauthorized("Inactive user".into()));
        }

        Ok(AuthUser {
            user_id: user.id,
            role: user.role,
        })
    }
}
