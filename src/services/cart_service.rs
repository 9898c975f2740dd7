use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{AddToCartRequest, CartList, UpdateCartItemRequest},
    entity::{
        CartItems, Products,
        cart_items::{self, Column as CartCol},
        products,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, Permission, authorize},
    models::CartItem,
    response::{ApiResponse, Meta},
    services::product_service::load_products,
    state::AppState,
};

fn ensure_in_stock(product: &products::Model, wanted: i32) -> AppResult<()> {
    if wanted > product.quantity {
        return Err(AppError::InsufficientStock {
            product: product.name.clone(),
            available: product.quantity,
        });
    }
    Ok(())
}

async fn find_product(state: &AppState, id: Uuid) -> AppResult<products::Model> {
    Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Product"))
}

async fn find_own_line(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<cart_items::Model> {
    CartItems::find_by_id(id)
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Cart item"))
}

async fn with_product(state: &AppState, line: cart_items::Model) -> AppResult<CartItem> {
    let mut products = load_products(&state.orm, &[line.product_id]).await?;
    let product = products.remove(&line.product_id);
    Ok(CartItem::from_entity(line, product))
}

pub async fn list_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    authorize(user, Permission::Shop)?;
    let lines = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .order_by_asc(CartCol::CreatedAt)
        .all(&state.orm)
        .await?;

    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let products = load_products(&state.orm, &ids).await?;
    let items: Vec<CartItem> = lines
        .into_iter()
        .map(|line| {
            let product = products.get(&line.product_id).cloned();
            CartItem::from_entity(line, product)
        })
        .collect();

    let total = items.len() as u64;
    Ok(ApiResponse::success(
        "Cart",
        CartList { items },
        Some(Meta::total(total)),
    ))
}

/// Add to the caller's cart. An existing line for the product grows and keeps
/// the price it was first captured at.
pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    authorize(user, Permission::Shop)?;
    payload.validate()?;
    let product = find_product(state, payload.product_id).await?;

    let existing = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::ProductId.eq(product.id))
        .one(&state.orm)
        .await?;

    let line = match existing {
        Some(line) => {
            let quantity = line
                .quantity
                .checked_add(payload.quantity)
                .ok_or_else(|| AppError::InsufficientStock {
                    product: product.name.clone(),
                    available: product.quantity,
                })?;
            ensure_in_stock(&product, quantity)?;
            let mut active: cart_items::ActiveModel = line.into();
            active.quantity = Set(quantity);
            active.update(&state.orm).await?
        }
        None => {
            ensure_in_stock(&product, payload.quantity)?;
            cart_items::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user.user_id),
                product_id: Set(product.id),
                quantity: Set(payload.quantity),
                price: Set(product.price),
                created_at: Set(Utc::now().into()),
            }
            .insert(&state.orm)
            .await?
        }
    };

    audit::record(
        &state.orm,
        Some(user.user_id),
        "cart_add",
        "cart_items",
        serde_json::json!({ "product_id": product.id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success(
        "Added to cart",
        with_product(state, line).await?,
        Some(Meta::empty()),
    ))
}

pub async fn update_cart_item(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartItem>> {
    authorize(user, Permission::Shop)?;
    payload.validate()?;
    let line = find_own_line(state, user, id).await?;
    let product = find_product(state, line.product_id).await?;
    ensure_in_stock(&product, payload.quantity)?;

    let mut active: cart_items::ActiveModel = line.into();
    active.quantity = Set(payload.quantity);
    let line = active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "cart_update",
        "cart_items",
        serde_json::json!({ "cart_item_id": id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart item updated",
        with_product(state, line).await?,
        Some(Meta::empty()),
    ))
}

pub async fn remove_cart_item(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<CartItem>> {
    authorize(user, Permission::Shop)?;
    let line = find_own_line(state, user, id).await?;
    let removed = with_product(state, line.clone()).await?;
    line.delete(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "cart_item_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Removed from cart",
        removed,
        Some(Meta::empty()),
    ))
}
