use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::{Expr, Func},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::products::{CreateProductRequest, ProductList, SetQuantityRequest, UpdateProductRequest},
    entity::{
        CartItems, Categories, Favorites, OrderLineItems, Products, cart_items, categories,
        favorites, order_line_items,
        products::{self, Column as ProdCol},
    },
    error::{AppError, AppResult, FieldErrors},
    middleware::auth::{AuthUser, Permission, authorize},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSort},
    state::AppState,
};

fn search_condition(search: &str) -> Condition {
    let pattern = format!("%{}%", search.to_lowercase());
    Condition::any()
        .add(Expr::expr(Func::lower(Expr::col((Products, ProdCol::Name)))).like(pattern.clone()))
        .add(Expr::expr(Func::lower(Expr::col((Products, ProdCol::Description)))).like(pattern))
}

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (skip, limit) = query.pagination().normalize();

    let mut errors = FieldErrors::new();
    errors
        .require(
            query.min_price.is_none_or(|p| p >= 0),
            "min_price",
            "cannot be negative",
        )
        .require(
            query.max_price.is_none_or(|p| p >= 0),
            "max_price",
            "cannot be negative",
        );
    errors.finish()?;

    let mut condition = Condition::all();

    if let Some(category_id) = query.category_id {
        if Categories::find_by_id(category_id)
            .one(&state.orm)
            .await?
            .is_none()
        {
            return Err(AppError::BadRequest(format!(
                "Category {category_id} does not exist"
            )));
        }
        condition = condition.add(ProdCol::CategoryId.eq(category_id));
    }

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        condition = condition.add(search_condition(search));
    }
    if let Some(min_price) = query.min_price {
        condition = condition.add(ProdCol::Price.gte(min_price));
    }
    if let Some(max_price) = query.max_price {
        condition = condition.add(ProdCol::Price.lte(max_price));
    }

    let total = Products::find()
        .filter(condition.clone())
        .count(&state.orm)
        .await?;

    let finder = Products::find().filter(condition);
    let finder = match query.sort {
        Some(ProductSort::PriceAsc) => finder.order_by_asc(ProdCol::Price),
        Some(ProductSort::PriceDesc) => finder.order_by_desc(ProdCol::Price),
        Some(ProductSort::NameAsc) => finder.order_by_asc(ProdCol::Name),
        Some(ProductSort::NameDesc) => finder.order_by_desc(ProdCol::Name),
        None => finder.order_by_desc(ProdCol::CreatedAt),
    }
    .order_by_asc(ProdCol::Id);

    let items = finder
        .find_also_related(Categories)
        .offset(skip)
        .limit(limit)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|(product, category)| Product::from_entity(product, category))
        .collect();

    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(Meta::new(skip, limit, total)),
    ))
}

/// Products keyed by id, each with its category.
pub async fn load_products<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Product>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(Products::find()
        .filter(ProdCol::Id.is_in(ids.iter().copied()))
        .find_also_related(Categories)
        .all(conn)
        .await?
        .into_iter()
        .map(|(product, category)| (product.id, Product::from_entity(product, category)))
        .collect())
}

async fn find_product(state: &AppState, id: Uuid) -> AppResult<(products::Model, Option<categories::Model>)> {
    Products::find_by_id(id)
        .find_also_related(Categories)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Product"))
}

async fn existing_category(state: &AppState, id: Uuid) -> AppResult<categories::Model> {
    Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::BadRequest(format!("Category {id} does not exist")))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let (product, category) = find_product(state, id).await?;
    Ok(ApiResponse::success(
        "Product",
        Product::from_entity(product, category),
        None,
    ))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    authorize(user, Permission::ManageCatalog)?;
    payload.validate()?;
    let category = existing_category(state, payload.category_id).await?;

    let now = Utc::now();
    let product = products::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name.trim().to_string()),
        description: Set(payload.description),
        price: Set(payload.price),
        quantity: Set(payload.quantity),
        category_id: Set(category.id),
        image_url: Set(payload.image_url),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        Product::from_entity(product, Some(category)),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    authorize(user, Permission::ManageCatalog)?;
    payload.validate()?;
    let (existing, mut category) = find_product(state, id).await?;

    let mut active: products::ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(quantity) = payload.quantity {
        active.quantity = Set(quantity);
    }
    if let Some(category_id) = payload.category_id {
        let new_category = existing_category(state, category_id).await?;
        active.category_id = Set(new_category.id);
        category = Some(new_category);
    }
    if let Some(image_url) = payload.image_url {
        active.image_url = Set(Some(image_url));
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product updated",
        Product::from_entity(product, category),
        Some(Meta::empty()),
    ))
}

/// Absolute stock level, as opposed to the relative reserve/release of the ledger.
pub async fn set_quantity(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: SetQuantityRequest,
) -> AppResult<ApiResponse<Product>> {
    authorize(user, Permission::ManageCatalog)?;
    payload.validate()?;
    let (existing, category) = find_product(state, id).await?;
    let previous = existing.quantity;

    let mut active: products::ActiveModel = existing.into();
    active.quantity = Set(payload.quantity);
    active.updated_at = Set(Utc::now().into());
    let product = active.update(&state.orm).await?;

    tracing::info!(product_id = %id, previous, quantity = payload.quantity, "stock level set");
    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_set_quantity",
        "products",
        serde_json::json!({ "product_id": id, "previous": previous, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product quantity updated",
        Product::from_entity(product, category),
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    authorize(user, Permission::ManageCatalog)?;
    let (product, category) = find_product(state, id).await?;

    let ordered = OrderLineItems::find()
        .filter(order_line_items::Column::ProductId.eq(id))
        .count(&state.orm)
        .await?;
    if ordered > 0 {
        return Err(AppError::Conflict(format!(
            "Product '{}' is part of existing orders and cannot be deleted",
            product.name
        )));
    }

    let txn = state.orm.begin().await?;
    CartItems::delete_many()
        .filter(cart_items::Column::ProductId.eq(id))
        .exec(&txn)
        .await?;
    Favorites::delete_many()
        .filter(favorites::Column::ProductId.eq(id))
        .exec(&txn)
        .await?;
    Products::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product deleted",
        Product::from_entity(product, category),
        Some(Meta::empty()),
    ))
}
