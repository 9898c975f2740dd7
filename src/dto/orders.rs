use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppResult, FieldErrors},
    models::{Order, OrderLineItem, OrderStatus},
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Replaces every line of a pending order.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderRequest {
    pub items: Vec<OrderItemInput>,
}

impl UpdateOrderRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = FieldErrors::new();
        errors
            .require(!self.items.is_empty(), "items", "must contain at least one item")
            .require(
                self.items.iter().all(|i| i.quantity > 0),
                "items.quantity",
                "must be greater than 0",
            );
        errors.finish()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderLineItem>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct OrderList {
    #[schema(value_type = Vec<Order>)]
    pub items: Vec<Order>,
}
