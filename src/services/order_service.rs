use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{
        OrderItemInput, OrderList, OrderWithItems, UpdateOrderRequest, UpdateOrderStatusRequest,
    },
    entity::{
        CartItems, OrderLineItems, Orders, Products,
        cart_items::Column as CartCol,
        order_line_items::{self, Column as LineCol},
        orders::{self, Column as OrderCol},
    },
    error::{AppError, AppResult, FieldError},
    middleware::auth::{AuthUser, Permission, authorize, authorize_owner},
    models::{Order, OrderLineItem, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, Pagination},
    services::{inventory, product_service::load_products},
    state::AppState,
};

async fn find_order<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<orders::Model> {
    Orders::find_by_id(id)
        .one(conn)
        .await?
        .ok_or(AppError::NotFound("Order"))
}

async fn order_lines<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<order_line_items::Model>> {
    Ok(OrderLineItems::find()
        .filter(LineCol::OrderId.eq(order_id))
        .order_by_asc(LineCol::Position)
        .all(conn)
        .await?)
}

async fn order_with_items<C: ConnectionTrait>(
    conn: &C,
    order: orders::Model,
) -> AppResult<OrderWithItems> {
    let lines = order_lines(conn, order.id).await?;
    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let products = load_products(conn, &ids).await?;
    let items = lines
        .into_iter()
        .map(|line| {
            let product = products.get(&line.product_id).cloned();
            OrderLineItem::from_entity(line, product)
        })
        .collect();
    Ok(OrderWithItems {
        order: Order::from(order),
        items,
    })
}

/// Convert the caller's cart into a pending order. All-or-nothing: a failed
/// reservation drops the transaction, leaving stock and cart untouched.
pub async fn checkout(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<OrderWithItems>> {
    authorize(user, Permission::Shop)?;
    let txn = state.orm.begin().await?;

    let lines = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .order_by_asc(CartCol::CreatedAt)
        .all(&txn)
        .await?;
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut total_amount: i64 = 0;
    for line in &lines {
        total_amount = total_amount
            .checked_add(line_amount(line.price, line.quantity)?)
            .ok_or_else(amount_overflow)?;
    }

    let now = Utc::now();
    let order = orders::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::Pending),
        total_amount: Set(total_amount),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    for (position, line) in lines.iter().enumerate() {
        inventory::reserve(&txn, line.product_id, line.quantity).await?;
        order_line_items::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.price),
            position: Set(position as i32),
        }
        .insert(&txn)
        .await?;
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    let detail = order_with_items(&txn, order).await?;
    txn.commit().await?;

    tracing::info!(
        order_id = %detail.order.id,
        user_id = %user.user_id,
        lines = detail.items.len(),
        total_amount,
        "checkout completed"
    );
    audit::record(
        &state.orm,
        Some(user.user_id),
        "checkout",
        "orders",
        serde_json::json!({ "order_id": detail.order.id, "total_amount": total_amount }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order created",
        detail,
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    authorize(user, Permission::ManageOrders)?;
    let mut condition = Condition::all();
    if let Some(customer_id) = query.customer_id {
        condition = condition.add(OrderCol::UserId.eq(customer_id));
    }
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }
    paginate_orders(state, condition, query.pagination()).await
}

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<OrderList>> {
    authorize(user, Permission::Shop)?;
    let condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    paginate_orders(state, condition, pagination).await
}

async fn paginate_orders(
    state: &AppState,
    condition: Condition,
    pagination: Pagination,
) -> AppResult<ApiResponse<OrderList>> {
    let (skip, limit) = pagination.normalize();
    let finder = Orders::find()
        .filter(condition)
        .order_by_desc(OrderCol::CreatedAt)
        .order_by_asc(OrderCol::Id);
    let total = finder.clone().count(&state.orm).await?;

    let items = finder
        .offset(skip)
        .limit(limit)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    Ok(ApiResponse::success(
        "Orders",
        OrderList { items },
        Some(Meta::new(skip, limit, total)),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_order(&state.orm, id).await?;
    authorize_owner(user, order.user_id, Permission::ManageOrders)?;
    Ok(ApiResponse::success(
        "Order",
        order_with_items(&state.orm, order).await?,
        None,
    ))
}

/// Merge repeated products so each gets a single line.
fn merge_items(items: &[OrderItemInput]) -> AppResult<Vec<OrderItemInput>> {
    let mut merged: Vec<OrderItemInput> = Vec::with_capacity(items.len());
    for item in items {
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(item.quantity).ok_or_else(|| {
                    AppError::Validation(vec![FieldError {
                        field: "items.quantity".into(),
                        message: "combined quantity for a product is too large".into(),
                    }])
                })?;
            }
            None => merged.push(item.clone()),
        }
    }
    Ok(merged)
}

/// `price * quantity`, or a 400 when it does not fit.
fn line_amount(price: i64, quantity: i32) -> AppResult<i64> {
    price
        .checked_mul(i64::from(quantity))
        .ok_or_else(amount_overflow)
}

fn amount_overflow() -> AppError {
    AppError::BadRequest("Order total exceeds the supported amount".into())
}

/// Replace every line of a pending order. Old lines are released before the
/// new ones are reserved; any failure leaves the order exactly as it was.
pub async fn update_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    payload.validate()?;
    let txn = state.orm.begin().await?;

    let order = find_order(&txn, id).await?;
    authorize_owner(user, order.user_id, Permission::ManageOrders)?;
    if order.status != OrderStatus::Pending {
        return Err(AppError::BadRequest(
            "Only pending orders can be edited".into(),
        ));
    }

    for line in order_lines(&txn, id).await? {
        inventory::release(&txn, line.product_id, line.quantity).await?;
    }
    OrderLineItems::delete_many()
        .filter(LineCol::OrderId.eq(id))
        .exec(&txn)
        .await?;

    let mut total_amount: i64 = 0;
    for (position, item) in merge_items(&payload.items)?.into_iter().enumerate() {
        let product = Products::find_by_id(item.product_id)
            .one(&txn)
            .await?
            .ok_or(AppError::NotFound("Product"))?;
        inventory::reserve(&txn, product.id, item.quantity).await?;
        order_line_items::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(id),
            product_id: Set(product.id),
            quantity: Set(item.quantity),
            price: Set(product.price),
            position: Set(position as i32),
        }
        .insert(&txn)
        .await?;
        total_amount = total_amount
            .checked_add(line_amount(product.price, item.quantity)?)
            .ok_or_else(amount_overflow)?;
    }

    let mut active: orders::ActiveModel = order.into();
    active.total_amount = Set(total_amount);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let detail = order_with_items(&txn, order).await?;
    txn.commit().await?;

    tracing::info!(order_id = %id, total_amount, "order lines replaced");
    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_update",
        "orders",
        serde_json::json!({ "order_id": id, "total_amount": total_amount }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        detail,
        Some(Meta::empty()),
    ))
}

/// Restore stock for every line, then remove the lines and the order.
pub async fn delete_order_in<C: ConnectionTrait>(conn: &C, order: &orders::Model) -> AppResult<()> {
    let lines = order_lines(conn, order.id).await?;
    for line in &lines {
        inventory::release(conn, line.product_id, line.quantity).await?;
    }
    OrderLineItems::delete_many()
        .filter(LineCol::OrderId.eq(order.id))
        .exec(conn)
        .await?;
    Orders::delete_by_id(order.id).exec(conn).await?;

    tracing::info!(order_id = %order.id, lines = lines.len(), "order deleted, stock restored");
    Ok(())
}

pub async fn delete_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    authorize(user, Permission::ManageOrders)?;
    let txn = state.orm.begin().await?;
    let order = find_order(&txn, id).await?;
    delete_order_in(&txn, &order).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_delete",
        "orders",
        serde_json::json!({ "order_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order deleted",
        Order::from(order),
        Some(Meta::empty()),
    ))
}

/// Any status may follow any other.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    authorize(user, Permission::ManageOrders)?;
    let order = find_order(&state.orm, id).await?;
    let previous = order.status;

    let mut active: orders::ActiveModel = order.into();
    active.status = Set(payload.status);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    tracing::info!(order_id = %id, from = ?previous, to = ?payload.status, "order status changed");
    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_status",
        "orders",
        serde_json::json!({ "order_id": id, "from": previous, "to": payload.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order status updated",
        order_with_items(&state.orm, order).await?,
        Some(Meta::empty()),
    ))
}
