use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppResult, FieldErrors},
    models::Product,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    /// Minor currency units, must be positive.
    pub price: i64,
    pub quantity: i32,
    pub category_id: Uuid,
    pub image_url: Option<String>,
}

impl CreateProductRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = FieldErrors::new();
        errors
            .require(valid_name(&self.name), "name", "must be 1-255 characters")
            .require(self.price > 0, "price", "must be greater than 0")
            .require(self.quantity >= 0, "quantity", "cannot be negative");
        errors.finish()
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub quantity: Option<i32>,
    pub category_id: Option<Uuid>,
    pub image_url: Option<String>,
}

impl UpdateProductRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = FieldErrors::new();
        errors
            .require(
                self.name.as_deref().is_none_or(valid_name),
                "name",
                "must be 1-255 characters",
            )
            .require(
                self.price.is_none_or(|p| p > 0),
                "price",
                "must be greater than 0",
            )
            .require(
                self.quantity.is_none_or(|q| q >= 0),
                "quantity",
                "cannot be negative",
            );
        errors.finish()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetQuantityRequest {
    pub quantity: i32,
}

impl SetQuantityRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = FieldErrors::new();
        errors.require(self.quantity >= 0, "quantity", "cannot be negative");
        errors.finish()
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct ProductList {
    #[schema(value_type = Vec<Product>)]
    pub items: Vec<Product>,
}

fn valid_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed.chars().count() <= 255
}
