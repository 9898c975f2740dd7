mod common;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use storefront_api::{
    dto::auth::TokenRequest, models::Role, routes::create_app_router,
    services::auth_service, state::AppState,
};
use tower::ServiceExt;

use common::{PASSWORD, create_category, create_product, create_user, setup};

fn app(state: AppState) -> Router {
    create_app_router().with_state(state)
}

async fn send(app: &Router, request: Request<Body>) -> anyhow::Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn login(state: &AppState, username: &str) -> anyhow::Result<String> {
    let token = auth_service::issue_access_token(
        state,
        TokenRequest {
            username: username.into(),
            password: PASSWORD.into(),
        },
    )
    .await?;
    Ok(token.access_token)
}

#[tokio::test]
async fn health_and_unknown_routes() -> anyhow::Result<()> {
    let app = app(setup().await?);

    let (status, body) = send(&app, get("/health", None)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["database"], "ok");

    let (status, body) = send(&app, get("/api/nowhere", None)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "No route for /api/nowhere");
    Ok(())
}

#[tokio::test]
async fn register_then_login_then_read_profile() -> anyhow::Result<()> {
    let app = app(setup().await?);

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/users/register",
            None,
            json!({
                "username": "ada",
                "email": "ada@example.com",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "password": PASSWORD,
            }),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["username"], "ada");
    assert_eq!(body["data"]["role"], "customer");
    assert!(body["data"].get("password_hash").is_none());

    let form = Request::builder()
        .method(Method::POST)
        .uri("/api/users/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "grant_type=password&username=ada&password={PASSWORD}"
        )))?;
    let (status, body) = send(&app, form).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
    let token = body["access_token"].as_str().unwrap_or_default().to_string();
    assert!(!token.is_empty());

    let (status, body) = send(&app, get("/api/users/me", Some(&token))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "ada@example.com");
    Ok(())
}

#[tokio::test]
async fn missing_or_bad_tokens_are_unauthorized() -> anyhow::Result<()> {
    let app = app(setup().await?);

    let response = app.clone().oneshot(get("/api/users/me", None)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).map(|v| v.as_bytes()),
        Some(&b"Bearer"[..])
    );

    let (status, body) = send(&app, get("/api/users/me", Some("not-a-jwt"))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Could not validate credentials");
    Ok(())
}

#[tokio::test]
async fn customers_get_forbidden_on_admin_routes() -> anyhow::Result<()> {
    let state = setup().await?;
    create_user(&state, "carol", Role::Customer).await?;
    let token = login(&state, "carol").await?;
    let app = app(state);

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/categories",
            Some(&token),
            json!({ "name": "Garden" }),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, get("/api/users", Some(&token))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn malformed_and_invalid_bodies_are_bad_requests() -> anyhow::Result<()> {
    let app = app(setup().await?);

    let broken = Request::builder()
        .method(Method::POST)
        .uri("/api/users/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"username\": "))?;
    let (status, body) = send(&app, broken).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/users/register",
            None,
            json!({
                "username": "ada",
                "email": "not-an-email",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "password": PASSWORD,
            }),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"][0]["field"], "email");

    let (status, _) = send(&app, get("/api/products/not-a-uuid", None)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn checkout_over_http() -> anyhow::Result<()> {
    let state = setup().await?;
    create_user(&state, "carol", Role::Customer).await?;
    let category = create_category(&state, "Kitchen").await?;
    let mug = create_product(&state, category, "Ferris Mug", 1250, 4).await?;
    let token = login(&state, "carol").await?;
    let app = app(state);

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/orders/items",
            Some(&token),
            json!({ "product_id": mug, "quantity": 2 }),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["price"], 1250);

    let checkout = Request::builder()
        .method(Method::POST)
        .uri("/api/orders")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?;
    let (status, body) = send(&app, checkout).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["order"]["status"], "pending");
    assert_eq!(body["data"]["order"]["total_amount"], 2500);
    assert_eq!(body["data"]["items"][0]["quantity"], 2);

    let (status, body) = send(&app, get(&format!("/api/products/{mug}"), None)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["quantity"], 2);

    let (status, body) = send(&app, get("/api/orders/me", Some(&token))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 1);

    let empty = Request::builder()
        .method(Method::POST)
        .uri("/api/orders")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?;
    let (status, body) = send(&app, empty).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Cannot create order with an empty cart.");
    Ok(())
}
