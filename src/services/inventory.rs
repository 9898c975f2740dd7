//! Stock ledger over `products.quantity`.
//!
//! Both operations run on whatever connection the caller passes, normally an
//! open [`sea_orm::DatabaseTransaction`], so a dropped transaction undoes them.

use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, prelude::DateTimeWithTimeZone,
    sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    entity::{Products, products::Column as ProdCol},
    error::{AppError, AppResult, FieldErrors},
};

fn ensure_positive(qty: i32) -> AppResult<()> {
    let mut errors = FieldErrors::new();
    errors.require(qty > 0, "quantity", "must be greater than 0");
    errors.finish()
}

/// Take `qty` units of `product_id` out of stock.
///
/// The stock check and the decrement are one conditional `UPDATE`, so
/// concurrent reservations cannot push the quantity below zero.
pub async fn reserve<C: ConnectionTrait>(conn: &C, product_id: Uuid, qty: i32) -> AppResult<()> {
    ensure_positive(qty)?;

    let now: DateTimeWithTimeZone = Utc::now().into();
    let result = Products::update_many()
        .col_expr(ProdCol::Quantity, Expr::col(ProdCol::Quantity).sub(qty))
        .col_expr(ProdCol::UpdatedAt, Expr::value(now))
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::Quantity.gte(qty))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let product = Products::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or(AppError::NotFound("Product"))?;
        return Err(AppError::InsufficientStock {
            product: product.name,
            available: product.quantity,
        });
    }

    tracing::debug!(%product_id, qty, "stock reserved");
    Ok(())
}

/// Put `qty` units back. A product that no longer exists is skipped; a
/// release that would take the stock level past `i32::MAX` is refused.
pub async fn release<C: ConnectionTrait>(conn: &C, product_id: Uuid, qty: i32) -> AppResult<()> {
    ensure_positive(qty)?;

    let now: DateTimeWithTimeZone = Utc::now().into();
    let result = Products::update_many()
        .col_expr(ProdCol::Quantity, Expr::col(ProdCol::Quantity).add(qty))
        .col_expr(ProdCol::UpdatedAt, Expr::value(now))
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::Quantity.lte(i32::MAX - qty))
        .exec(conn)
        .await?;

    if result.rows_affected > 0 {
        tracing::debug!(%product_id, qty, "stock released");
        return Ok(());
    }

    match Products::find_by_id(product_id).one(conn).await? {
        None => {
            tracing::warn!(%product_id, qty, "release skipped, product no longer exists");
            Ok(())
        }
        Some(product) => {
            tracing::warn!(%product_id, qty, quantity = product.quantity, "release would overflow stock level");
            Err(AppError::BadRequest(format!(
                "Returning {qty} unit(s) of '{}' would exceed the maximum stock level",
                product.name
            )))
        }
    }
}
