use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{RegisterRequest, TokenRequest, TokenResponse},
        cart::{AddToCartRequest, CartList, UpdateCartItemRequest},
        categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
        favorites::FavoriteList,
        orders::{
            OrderItemInput, OrderList, OrderWithItems, UpdateOrderRequest,
            UpdateOrderStatusRequest,
        },
        products::{CreateProductRequest, ProductList, SetQuantityRequest, UpdateProductRequest},
        users::{UpdateUserRequest, UserList},
    },
    error::{ErrorBody, ErrorDetail, FieldError},
    models::{
        CartItem, Category, CategorySummary, Favorite, Order, OrderLineItem, OrderStatus, Product,
        Role, User,
    },
    response::{ApiResponse, Meta},
    routes::{cart, categories, favorites, health, orders, params, products, users},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        users::register,
        users::token,
        users::me,
        users::update_me,
        users::create_admin,
        users::list_users,
        users::get_user,
        users::delete_user,
        favorites::list_favorites,
        favorites::add_favorite,
        favorites::remove_favorite,
        categories::list_categories,
        categories::get_category,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        products::set_quantity,
        cart::cart_list,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        orders::checkout,
        orders::list_orders,
        orders::list_my_orders,
        orders::get_order,
        orders::update_order,
        orders::delete_order,
        orders::update_order_status
    ),
    components(
        schemas(
            User,
            Role,
            Category,
            CategorySummary,
            Product,
            Favorite,
            CartItem,
            Order,
            OrderStatus,
            OrderLineItem,
            RegisterRequest,
            TokenRequest,
            TokenResponse,
            UpdateUserRequest,
            UserList,
            CreateCategoryRequest,
            UpdateCategoryRequest,
            CategoryList,
            CreateProductRequest,
            UpdateProductRequest,
            SetQuantityRequest,
            ProductList,
            AddToCartRequest,
            UpdateCartItemRequest,
            CartList,
            FavoriteList,
            OrderItemInput,
            UpdateOrderRequest,
            UpdateOrderStatusRequest,
            OrderWithItems,
            OrderList,
            params::Pagination,
            params::ProductSort,
            params::ProductQuery,
            params::OrderListQuery,
            FieldError,
            ErrorDetail,
            ErrorBody,
            Meta,
            ApiResponse<User>,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Users", description = "Registration, tokens, profiles and user administration"),
        (name = "Favorites", description = "Favorite products of the current user"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Products", description = "Product catalog and stock levels"),
        (name = "Cart", description = "Cart lines of the current user"),
        (name = "Orders", description = "Checkout and order management"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
