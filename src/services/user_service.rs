use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    config::AuthMode,
    dto::{
        auth::RegisterRequest,
        users::{UpdateUserRequest, UserList},
    },
    entity::{
        CartItems, Favorites, Orders, Users, cart_items, favorites, orders,
        users::{self, Column as UserCol},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, Permission, authorize},
    models::{Role, User},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::{auth_service, order_service},
    state::AppState,
};

async fn find_user(state: &AppState, id: Uuid) -> AppResult<users::Model> {
    Users::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("User"))
}

pub async fn me(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<User>> {
    let model = find_user(state, user.user_id).await?;
    Ok(ApiResponse::success("Current user", User::from(model), None))
}

pub async fn update_me(
    state: &AppState,
    user: &AuthUser,
    payload: UpdateUserRequest,
) -> AppResult<ApiResponse<User>> {
    payload.validate()?;
    let existing = find_user(state, user.user_id).await?;

    if payload.password.is_some() && state.config.auth_mode == AuthMode::External {
        return Err(AppError::BadRequest(
            "Passwords are managed by the identity provider".into(),
        ));
    }
    if let Some(email) = payload.email.as_deref() {
        let taken = Users::find()
            .filter(UserCol::Email.eq(email))
            .filter(UserCol::Id.ne(user.user_id))
            .one(&state.orm)
            .await?
            .is_some();
        if taken {
            return Err(AppError::Conflict("Email already registered".into()));
        }
    }

    let mut active: users::ActiveModel = existing.into();
    if let Some(email) = payload.email {
        active.email = Set(email);
    }
    if let Some(first_name) = payload.first_name {
        active.first_name = Set(first_name);
    }
    if let Some(last_name) = payload.last_name {
        active.last_name = Set(last_name);
    }
    if let Some(password) = payload.password.as_deref() {
        active.password_hash = Set(Some(auth_service::hash_password(password)?));
    }
    let model = active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "user_update",
        "users",
        serde_json::json!({ "user_id": user.user_id }),
    )
    .await;

    Ok(ApiResponse::success("User updated", User::from(model), Some(Meta::empty())))
}

pub async fn create_admin(
    state: &AppState,
    user: &AuthUser,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    authorize(user, Permission::ManageUsers)?;
    let admin = auth_service::create_account(state, payload, Role::Admin, Some(user.user_id)).await?;
    Ok(ApiResponse::success("Admin created", admin, Some(Meta::empty())))
}

pub async fn list_users(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<UserList>> {
    authorize(user, Permission::ManageUsers)?;
    let (skip, limit) = pagination.normalize();
    let finder = Users::find().order_by_asc(UserCol::Username);
    let total = finder.clone().count(&state.orm).await?;
    let items = finder
        .offset(skip)
        .limit(limit)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(User::from)
        .collect();

    Ok(ApiResponse::success(
        "Users",
        UserList { items },
        Some(Meta::new(skip, limit, total)),
    ))
}

pub async fn get_user(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<ApiResponse<User>> {
    authorize(user, Permission::ManageUsers)?;
    let model = find_user(state, id).await?;
    Ok(ApiResponse::success("User", User::from(model), None))
}

/// Remove a user with everything they own. Stock held by their orders is
/// returned; in external mode the provider account goes first.
pub async fn delete_user(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<ApiResponse<User>> {
    authorize(user, Permission::ManageUsers)?;
    let target = find_user(state, id).await?;

    if let Some(identity) = &state.identity {
        identity.delete_user(&target.username).await?;
    }

    let txn = state.orm.begin().await?;
    let owned_orders = Orders::find()
        .filter(orders::Column::UserId.eq(id))
        .all(&txn)
        .await?;
    for order in &owned_orders {
        order_service::delete_order_in(&txn, order).await?;
    }
    CartItems::delete_many()
        .filter(cart_items::Column::UserId.eq(id))
        .exec(&txn)
        .await?;
    Favorites::delete_many()
        .filter(favorites::Column::UserId.eq(id))
        .exec(&txn)
        .await?;
    Users::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    tracing::info!(user_id = %id, orders = owned_orders.len(), "user deleted");
    audit::record(
        &state.orm,
        Some(user.user_id),
        "user_delete",
        "users",
        serde_json::json!({ "user_id": id, "orders": owned_orders.len() }),
    )
    .await;

    Ok(ApiResponse::success("User deleted", User::from(target), Some(Meta::empty())))
}
