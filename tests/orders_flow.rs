mod common;

use sea_orm::{EntityTrait, PaginatorTrait};
use storefront_api::{
    dto::{
        cart::AddToCartRequest,
        orders::{OrderItemInput, UpdateOrderRequest, UpdateOrderStatusRequest},
        products::{SetQuantityRequest, UpdateProductRequest},
    },
    entity::{CartItems, Orders},
    error::AppError,
    models::{OrderStatus, Role},
    routes::params::Pagination,
    services::{cart_service, inventory, order_service, product_service, user_service},
};

use common::{create_category, create_product, create_user, setup, stock_of};

fn add(product_id: uuid::Uuid, quantity: i32) -> AddToCartRequest {
    AddToCartRequest {
        product_id,
        quantity,
    }
}

#[tokio::test]
async fn cart_checkout_and_delete_round_trip() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let admin = create_user(&state, "root", Role::Admin).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 5).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 2)).await?;
    let cart = cart_service::list_cart(&state, &customer).await?.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].product_id, mug);
    assert_eq!(cart.items[0].quantity, 2);

    let detail = order_service::checkout(&state, &customer).await?.data.unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert_eq!(detail.order.total_amount, 2400);
    assert_eq!(detail.items.len(), 1);
    assert_eq!(detail.items[0].product_id, mug);
    assert_eq!(detail.items[0].quantity, 2);
    assert_eq!(stock_of(&state, mug).await?, 3);
    assert_eq!(CartItems::find().count(&state.orm).await?, 0);

    order_service::delete_order(&state, &admin, detail.order.id).await?;
    assert_eq!(stock_of(&state, mug).await?, 5);
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    Ok(())
}

#[tokio::test]
async fn re_adding_a_product_grows_the_existing_line() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 10).await?;

    let first = cart_service::add_to_cart(&state, &customer, add(mug, 2)).await?.data.unwrap();
    let second = cart_service::add_to_cart(&state, &customer, add(mug, 3)).await?.data.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.quantity, 5);
    assert_eq!(CartItems::find().count(&state.orm).await?, 1);

    // cumulative quantity is checked against stock
    let err = cart_service::add_to_cart(&state, &customer, add(mug, 6)).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { available: 10, .. }));
    Ok(())
}

#[tokio::test]
async fn checkout_on_empty_cart_creates_nothing() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;

    let err = order_service::checkout(&state, &customer).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    Ok(())
}

#[tokio::test]
async fn failed_checkout_leaves_stock_and_cart_untouched() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let admin = create_user(&state, "root", Role::Admin).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 5).await?;
    let pan = create_product(&state, category, "Cast Iron Pan", 4000, 1).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 2)).await?;
    cart_service::add_to_cart(&state, &customer, add(pan, 1)).await?;
    // stock drops after the pan entered the cart
    product_service::set_quantity(&state, &admin, pan, SetQuantityRequest { quantity: 0 }).await?;

    let err = order_service::checkout(&state, &customer).await.unwrap_err();
    match err {
        AppError::InsufficientStock { product, available } => {
            assert_eq!(product, "Cast Iron Pan");
            assert_eq!(available, 0);
        }
        other => panic!("expected insufficient stock, got {other:?}"),
    }

    assert_eq!(stock_of(&state, mug).await?, 5);
    assert_eq!(stock_of(&state, pan).await?, 0);
    assert_eq!(CartItems::find().count(&state.orm).await?, 2);
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    Ok(())
}

#[tokio::test]
async fn checkout_uses_the_price_captured_in_the_cart() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let admin = create_user(&state, "root", Role::Admin).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1000, 5).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 3)).await?;
    product_service::update_product(
        &state,
        &admin,
        mug,
        UpdateProductRequest {
            price: Some(2000),
            ..Default::default()
        },
    )
    .await?;

    let detail = order_service::checkout(&state, &customer).await?.data.unwrap();
    assert_eq!(detail.items[0].price, 1000);
    assert_eq!(detail.order.total_amount, 3000);
    Ok(())
}

#[tokio::test]
async fn failed_order_edit_changes_nothing() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 5).await?;
    let pan = create_product(&state, category, "Cast Iron Pan", 4000, 3).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 2)).await?;
    let order = order_service::checkout(&state, &customer).await?.data.unwrap();
    assert_eq!(stock_of(&state, mug).await?, 3);

    let edit = UpdateOrderRequest {
        items: vec![
            OrderItemInput {
                product_id: mug,
                quantity: 1,
            },
            OrderItemInput {
                product_id: pan,
                quantity: 10,
            },
        ],
    };
    let err = order_service::update_order(&state, &customer, order.order.id, edit)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { available: 3, .. }));

    assert_eq!(stock_of(&state, mug).await?, 3);
    assert_eq!(stock_of(&state, pan).await?, 3);
    let unchanged = order_service::get_order(&state, &customer, order.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(unchanged.items.len(), 1);
    assert_eq!(unchanged.items[0].product_id, mug);
    assert_eq!(unchanged.items[0].quantity, 2);
    assert_eq!(unchanged.order.total_amount, 2400);
    Ok(())
}

#[tokio::test]
async fn order_edit_replaces_lines_at_current_prices() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 5).await?;
    let pan = create_product(&state, category, "Cast Iron Pan", 4000, 3).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 2)).await?;
    let order = order_service::checkout(&state, &customer).await?.data.unwrap();

    let edit = UpdateOrderRequest {
        items: vec![
            OrderItemInput {
                product_id: pan,
                quantity: 2,
            },
            OrderItemInput {
                product_id: mug,
                quantity: 4,
            },
        ],
    };
    let updated = order_service::update_order(&state, &customer, order.order.id, edit)
        .await?
        .data
        .unwrap();

    assert_eq!(updated.items.len(), 2);
    assert_eq!(updated.items[0].product_id, pan);
    assert_eq!(updated.items[1].product_id, mug);
    assert_eq!(updated.order.total_amount, 2 * 4000 + 4 * 1200);
    assert_eq!(stock_of(&state, mug).await?, 1);
    assert_eq!(stock_of(&state, pan).await?, 1);
    Ok(())
}

#[tokio::test]
async fn only_pending_orders_can_be_edited() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let admin = create_user(&state, "root", Role::Admin).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 5).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 1)).await?;
    let order = order_service::checkout(&state, &customer).await?.data.unwrap();

    let shipped = order_service::update_order_status(
        &state,
        &admin,
        order.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Shipped,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(shipped.order.status, OrderStatus::Shipped);

    let edit = UpdateOrderRequest {
        items: vec![OrderItemInput {
            product_id: mug,
            quantity: 2,
        }],
    };
    let err = order_service::update_order(&state, &customer, order.order.id, edit)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(stock_of(&state, mug).await?, 4);
    Ok(())
}

#[tokio::test]
async fn orders_are_private_to_their_owner() -> anyhow::Result<()> {
    let state = setup().await?;
    let carol = create_user(&state, "carol", Role::Customer).await?;
    let dave = create_user(&state, "dave", Role::Customer).await?;
    let admin = create_user(&state, "root", Role::Admin).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 5).await?;

    cart_service::add_to_cart(&state, &carol, add(mug, 1)).await?;
    let order = order_service::checkout(&state, &carol).await?.data.unwrap();

    let err = order_service::get_order(&state, &dave, order.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    assert!(order_service::get_order(&state, &admin, order.order.id).await.is_ok());

    let err = order_service::update_order_status(
        &state,
        &carol,
        order.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Delivered,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let mine = order_service::list_my_orders(&state, &dave, Pagination::default())
        .await?
        .data
        .unwrap();
    assert!(mine.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn deleting_a_user_restores_stock_of_all_their_orders() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let admin = create_user(&state, "root", Role::Admin).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 10).await?;
    let pan = create_product(&state, category, "Cast Iron Pan", 4000, 4).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 3)).await?;
    order_service::checkout(&state, &customer).await?;
    cart_service::add_to_cart(&state, &customer, add(pan, 2)).await?;
    cart_service::add_to_cart(&state, &customer, add(mug, 1)).await?;
    order_service::checkout(&state, &customer).await?;
    cart_service::add_to_cart(&state, &customer, add(pan, 1)).await?;
    assert_eq!(stock_of(&state, mug).await?, 6);
    assert_eq!(stock_of(&state, pan).await?, 2);

    user_service::delete_user(&state, &admin, customer.user_id).await?;

    assert_eq!(stock_of(&state, mug).await?, 10);
    assert_eq!(stock_of(&state, pan).await?, 4);
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    assert_eq!(CartItems::find().count(&state.orm).await?, 0);
    Ok(())
}

#[tokio::test]
async fn admin_order_listing_filters_by_customer_and_status() -> anyhow::Result<()> {
    let state = setup().await?;
    let carol = create_user(&state, "carol", Role::Customer).await?;
    let dave = create_user(&state, "dave", Role::Customer).await?;
    let admin = create_user(&state, "root", Role::Admin).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 10).await?;

    for user in [&carol, &dave] {
        cart_service::add_to_cart(&state, user, add(mug, 1)).await?;
        order_service::checkout(&state, user).await?;
    }

    let all = order_service::list_orders(&state, &admin, Default::default()).await?;
    assert_eq!(all.meta.unwrap().total, Some(2));

    let query = storefront_api::routes::params::OrderListQuery {
        customer_id: Some(dave.user_id),
        status: Some(OrderStatus::Pending),
        ..Default::default()
    };
    let filtered = order_service::list_orders(&state, &admin, query).await?.data.unwrap();
    assert_eq!(filtered.items.len(), 1);
    assert_eq!(filtered.items[0].user_id, dave.user_id);

    let err = order_service::list_orders(&state, &carol, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    Ok(())
}

#[tokio::test]
async fn ledger_never_goes_negative() -> anyhow::Result<()> {
    let state = setup().await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 3).await?;

    inventory::reserve(&state.orm, mug, 2).await?;
    let err = inventory::reserve(&state.orm, mug, 2).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { available: 1, .. }));
    assert_eq!(stock_of(&state, mug).await?, 1);

    inventory::reserve(&state.orm, mug, 1).await?;
    assert_eq!(stock_of(&state, mug).await?, 0);
    inventory::release(&state.orm, mug, 4).await?;
    assert_eq!(stock_of(&state, mug).await?, 4);

    assert!(matches!(
        inventory::reserve(&state.orm, mug, 0).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        inventory::release(&state.orm, mug, -1).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        inventory::reserve(&state.orm, uuid::Uuid::new_v4(), 1).await,
        Err(AppError::NotFound("Product"))
    ));
    // releasing against a missing product is a no-op
    inventory::release(&state.orm, uuid::Uuid::new_v4(), 1).await?;

    let bulk = create_product(&state, category, "Bulk Spoons", 10, i32::MAX - 1).await?;
    assert!(matches!(
        inventory::release(&state.orm, bulk, 2).await,
        Err(AppError::BadRequest(_))
    ));
    assert_eq!(stock_of(&state, bulk).await?, i32::MAX - 1);
    inventory::release(&state.orm, bulk, 1).await?;
    assert_eq!(stock_of(&state, bulk).await?, i32::MAX);
    Ok(())
}

#[tokio::test]
async fn deleting_an_order_past_max_stock_keeps_the_order() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let admin = create_user(&state, "root", Role::Admin).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 5).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 2)).await?;
    let order = order_service::checkout(&state, &customer).await?.data.unwrap();
    product_service::set_quantity(
        &state,
        &admin,
        mug,
        SetQuantityRequest { quantity: i32::MAX },
    )
    .await?;

    let err = order_service::delete_order(&state, &admin, order.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(Orders::find().count(&state.orm).await?, 1);
    assert_eq!(stock_of(&state, mug).await?, i32::MAX);
    Ok(())
}

#[tokio::test]
async fn cart_quantity_overflow_is_insufficient_stock() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 10).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 5)).await?;
    let err = cart_service::add_to_cart(&state, &customer, add(mug, i32::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { available: 10, .. }));

    let cart = cart_service::list_cart(&state, &customer).await?.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 5);
    Ok(())
}

#[tokio::test]
async fn order_edit_with_overflowing_quantities_is_rejected() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1200, 5).await?;

    cart_service::add_to_cart(&state, &customer, add(mug, 2)).await?;
    let order = order_service::checkout(&state, &customer).await?.data.unwrap();

    let edit = UpdateOrderRequest {
        items: vec![
            OrderItemInput {
                product_id: mug,
                quantity: i32::MAX,
            },
            OrderItemInput {
                product_id: mug,
                quantity: 1,
            },
        ],
    };
    let err = order_service::update_order(&state, &customer, order.order.id, edit)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert_eq!(stock_of(&state, mug).await?, 3);
    let unchanged = order_service::get_order(&state, &customer, order.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(unchanged.items.len(), 1);
    assert_eq!(unchanged.items[0].quantity, 2);
    Ok(())
}

#[tokio::test]
async fn checkout_total_overflow_is_a_bad_request() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let category = create_category(&state, "Jewellery").await?;
    let crown = create_product(&state, category, "Crown", i64::MAX, 5).await?;

    cart_service::add_to_cart(&state, &customer, add(crown, 2)).await?;
    let err = order_service::checkout(&state, &customer).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    assert_eq!(stock_of(&state, crown).await?, 5);
    assert_eq!(CartItems::find().count(&state.orm).await?, 1);
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    Ok(())
}
