use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::favorites::FavoriteList,
    entity::{
        Favorites, Products,
        favorites::{self, Column as FavCol},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, Permission, authorize},
    models::Favorite,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::product_service::load_products,
    state::AppState,
};

async fn find_favorite(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<Option<favorites::Model>> {
    Ok(Favorites::find()
        .filter(FavCol::UserId.eq(user.user_id))
        .filter(FavCol::ProductId.eq(product_id))
        .one(&state.orm)
        .await?)
}

pub async fn list_favorites(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<FavoriteList>> {
    authorize(user, Permission::Shop)?;
    let (skip, limit) = pagination.normalize();
    let finder = Favorites::find()
        .filter(FavCol::UserId.eq(user.user_id))
        .order_by_desc(FavCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await?;

    let rows = finder.offset(skip).limit(limit).all(&state.orm).await?;
    let ids: Vec<Uuid> = rows.iter().map(|f| f.product_id).collect();
    let products = load_products(&state.orm, &ids).await?;
    let items = rows
        .into_iter()
        .map(|fav| {
            let product = products.get(&fav.product_id).cloned();
            Favorite::from_entity(fav, product)
        })
        .collect();

    Ok(ApiResponse::success(
        "Favorites",
        FavoriteList { items },
        Some(Meta::new(skip, limit, total)),
    ))
}

pub async fn add_favorite(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<Favorite>> {
    authorize(user, Permission::Shop)?;
    if Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("Product"));
    }
    if find_favorite(state, user, product_id).await?.is_some() {
        return Err(AppError::Conflict("Product is already a favorite".into()));
    }

    let favorite = favorites::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        product_id: Set(product_id),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "favorite_add",
        "favorites",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    let product = load_products(&state.orm, &[product_id])
        .await?
        .remove(&product_id);
    Ok(ApiResponse::success(
        "Added to favorites",
        Favorite::from_entity(favorite, product),
        Some(Meta::empty()),
    ))
}

pub async fn remove_favorite(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<Favorite>> {
    authorize(user, Permission::Shop)?;
    let favorite = find_favorite(state, user, product_id)
        .await?
        .ok_or(AppError::NotFound("Favorite"))?;
    let removed = Favorite::from_entity(favorite.clone(), None);
    favorite.delete(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "favorite_remove",
        "favorites",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Removed from favorites",
        removed,
        Some(Meta::empty()),
    ))
}
