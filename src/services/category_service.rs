use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
    entity::{
        Categories, Products,
        categories::{self, Column as CatCol},
        products::Column as ProdCol,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, Permission, authorize},
    models::Category,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

#[derive(Debug, FromQueryResult)]
struct ProductCountRow {
    category_id: Uuid,
    product_count: i64,
}

async fn product_counts(state: &AppState, ids: &[Uuid]) -> AppResult<HashMap<Uuid, u64>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = Products::find()
        .select_only()
        .column(ProdCol::CategoryId)
        .column_as(Expr::col(ProdCol::Id).count(), "product_count")
        .filter(ProdCol::CategoryId.is_in(ids.iter().copied()))
        .group_by(ProdCol::CategoryId)
        .into_model::<ProductCountRow>()
        .all(&state.orm)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.category_id, row.product_count.max(0) as u64))
        .collect())
}

async fn product_count(state: &AppState, id: Uuid) -> AppResult<u64> {
    Ok(Products::find()
        .filter(ProdCol::CategoryId.eq(id))
        .count(&state.orm)
        .await?)
}

async fn find_category(state: &AppState, id: Uuid) -> AppResult<categories::Model> {
    Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Category"))
}

async fn ensure_name_free(state: &AppState, name: &str, except: Option<Uuid>) -> AppResult<()> {
    let mut finder = Categories::find().filter(CatCol::Name.eq(name));
    if let Some(id) = except {
        finder = finder.filter(CatCol::Id.ne(id));
    }
    if finder.one(&state.orm).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Category with name '{name}' already exists"
        )));
    }
    Ok(())
}

pub async fn list_categories(
    state: &AppState,
    pagination: Pagination,
) -> AppResult<ApiResponse<CategoryList>> {
    let (skip, limit) = pagination.normalize();
    let finder = Categories::find().order_by_asc(CatCol::Name);
    let total = finder.clone().count(&state.orm).await?;

    let models = finder.offset(skip).limit(limit).all(&state.orm).await?;
    let ids: Vec<Uuid> = models.iter().map(|c| c.id).collect();
    let counts = product_counts(state, &ids).await?;

    let items = models
        .into_iter()
        .map(|model| {
            let count = counts.get(&model.id).copied().unwrap_or(0);
            Category::from_entity(model, count)
        })
        .collect();

    Ok(ApiResponse::success(
        "Categories",
        CategoryList { items },
        Some(Meta::new(skip, limit, total)),
    ))
}

pub async fn get_category(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Category>> {
    let model = find_category(state, id).await?;
    let count = product_count(state, id).await?;
    Ok(ApiResponse::success(
        "Category",
        Category::from_entity(model, count),
        None,
    ))
}

pub async fn create_category(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    authorize(user, Permission::ManageCatalog)?;
    payload.validate()?;
    let name = payload.name.trim().to_string();
    ensure_name_free(state, &name, None).await?;

    let category = categories::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        description: Set(payload.description),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "category_create",
        "categories",
        serde_json::json!({ "category_id": category.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category created",
        Category::from_entity(category, 0),
        Some(Meta::empty()),
    ))
}

pub async fn update_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    authorize(user, Permission::ManageCatalog)?;
    payload.validate()?;
    let existing = find_category(state, id).await?;

    let mut active: categories::ActiveModel = existing.into();
    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        ensure_name_free(state, &name, Some(id)).await?;
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    let category = active.update(&state.orm).await?;
    let count = product_count(state, id).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "category_update",
        "categories",
        serde_json::json!({ "category_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category updated",
        Category::from_entity(category, count),
        Some(Meta::empty()),
    ))
}

pub async fn delete_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Category>> {
    authorize(user, Permission::ManageCatalog)?;
    let category = find_category(state, id).await?;

    let count = product_count(state, id).await?;
    if count > 0 {
        return Err(AppError::BadRequest(format!(
            "Cannot delete category '{}' while {count} product(s) still belong to it",
            category.name
        )));
    }

    Categories::delete_by_id(id).exec(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "category_delete",
        "categories",
        serde_json::json!({ "category_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category deleted",
        Category::from_entity(category, 0),
        Some(Meta::empty()),
    ))
}
