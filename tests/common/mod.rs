#![allow(dead_code)]

use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use storefront_api::{
    config::AppConfig,
    db::create_orm_conn,
    entity::{Products, categories, products, users},
    middleware::auth::AuthUser,
    migration::Migrator,
    models::Role,
    services::auth_service::hash_password,
    state::AppState,
};
use uuid::Uuid;

pub const PASSWORD: &str = "password123";
pub const JWT_SECRET: &str = "integration-test-secret";

/// Fresh, migrated database. In-memory SQLite unless `TEST_DATABASE_URL` is set,
/// in which case the schema is dropped and recreated (run those with `--test-threads=1`).
pub async fn setup() -> anyhow::Result<AppState> {
    setup_with(|database_url| AppConfig::local(database_url, JWT_SECRET)).await
}

/// Same database as [`setup`], with the config built by `configure`.
pub async fn setup_with(configure: impl FnOnce(&str) -> AppConfig) -> anyhow::Result<AppState> {
    let database_url =
        std::env::var("TEST_DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let orm = create_orm_conn(&database_url).await?;
    Migrator::fresh(&orm).await?;
    let state = AppState::new(orm, configure(&database_url))?;
    Ok(state)
}

pub async fn create_user(state: &AppState, username: &str, role: Role) -> anyhow::Result<AuthUser> {
    let user = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(username.to_string()),
        email: Set(format!("{username}@example.com")),
        first_name: Set(username.to_string()),
        last_name: Set("Tester".to_string()),
        password_hash: Set(Some(hash_password(PASSWORD).map_err(|e| anyhow::anyhow!("{e}"))?)),
        external_id: Set(None),
        role: Set(role),
        is_active: Set(true),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(AuthUser {
        user_id: user.id,
        role: user.role,
    })
}

pub async fn create_category(state: &AppState, name: &str) -> anyhow::Result<Uuid> {
    let category = categories::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        description: Set(None),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(category.id)
}

pub async fn create_product(
    state: &AppState,
    category_id: Uuid,
    name: &str,
    price: i64,
    quantity: i32,
) -> anyhow::Result<Uuid> {
    let now = Utc::now();
    let product = products::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        description: Set(Some(format!("{name} description"))),
        price: Set(price),
        quantity: Set(quantity),
        category_id: Set(category_id),
        image_url: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(product.id)
}

pub async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {product_id} missing"))?;
    Ok(product.quantity)
}
