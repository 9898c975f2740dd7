mod common;

use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use storefront_api::{
    dto::{
        auth::{RegisterRequest, TokenRequest},
        users::UpdateUserRequest,
    },
    entity::{Favorites, Users, users},
    error::AppError,
    models::Role,
    routes::params::Pagination,
    services::{auth_service, favorite_service, identity_provider::ExternalIdentity, user_service},
};

use common::{PASSWORD, create_category, create_product, create_user, setup};

fn registration(username: &str, email: &str) -> RegisterRequest {
    RegisterRequest {
        username: username.into(),
        email: email.into(),
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        password: PASSWORD.into(),
    }
}

#[tokio::test]
async fn registration_rejects_taken_username_and_email() -> anyhow::Result<()> {
    let state = setup().await?;

    let user = auth_service::register(&state, registration("ada", "ada@example.com"))
        .await?
        .data
        .unwrap();
    assert_eq!(user.role, Role::Customer);
    assert!(user.is_active);

    let err = auth_service::register(&state, registration("ada", "other@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = auth_service::register(&state, registration("ada2", "ada@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let mut weak = registration("bob", "bob@example.com");
    weak.password = "short".into();
    let err = auth_service::register(&state, weak).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert_eq!(Users::find().count(&state.orm).await?, 1);
    Ok(())
}

#[tokio::test]
async fn password_grant_issues_a_token_for_the_user() -> anyhow::Result<()> {
    let state = setup().await?;
    let user = auth_service::register(&state, registration("ada", "ada@example.com"))
        .await?
        .data
        .unwrap();

    let token = auth_service::issue_access_token(
        &state,
        TokenRequest {
            username: "ada".into(),
            password: PASSWORD.into(),
        },
    )
    .await?;
    assert_eq!(token.token_type, "bearer");
    let claims = auth_service::decode_token(&state.config, &token.access_token)?;
    assert_eq!(claims.sub, user.id.to_string());
    assert_eq!(claims.role, "customer");

    let err = auth_service::issue_access_token(
        &state,
        TokenRequest {
            username: "ada".into(),
            password: "wrong-password".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    let err = auth_service::issue_access_token(
        &state,
        TokenRequest {
            username: "nobody".into(),
            password: PASSWORD.into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
    Ok(())
}

#[tokio::test]
async fn profile_update_changes_only_given_fields() -> anyhow::Result<()> {
    let state = setup().await?;
    let ada = create_user(&state, "ada", Role::Customer).await?;
    create_user(&state, "bob", Role::Customer).await?;

    let updated = user_service::update_me(
        &state,
        &ada,
        UpdateUserRequest {
            first_name: Some("Augusta".into()),
            password: Some("new-password-1".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(updated.first_name, "Augusta");
    assert_eq!(updated.last_name, "Tester");
    assert_eq!(updated.email, "ada@example.com");

    auth_service::issue_access_token(
        &state,
        TokenRequest {
            username: "ada".into(),
            password: "new-password-1".into(),
        },
    )
    .await?;

    let err = user_service::update_me(
        &state,
        &ada,
        UpdateUserRequest {
            email: Some("bob@example.com".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    Ok(())
}

#[tokio::test]
async fn only_admins_manage_users() -> anyhow::Result<()> {
    let state = setup().await?;
    let admin = create_user(&state, "root", Role::Admin).await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;

    let err = user_service::list_users(&state, &customer, Pagination::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    let err = user_service::create_admin(&state, &customer, registration("mallory", "m@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let second = user_service::create_admin(&state, &admin, registration("ops", "ops@example.com"))
        .await?
        .data
        .unwrap();
    assert_eq!(second.role, Role::Admin);

    let listed = user_service::list_users(&state, &admin, Pagination::default()).await?;
    assert_eq!(listed.meta.as_ref().and_then(|m| m.total), Some(3));
    let usernames: Vec<String> = listed
        .data
        .unwrap()
        .items
        .into_iter()
        .map(|u| u.username)
        .collect();
    assert_eq!(usernames, ["carol", "ops", "root"]);

    let fetched = user_service::get_user(&state, &admin, customer.user_id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.username, "carol");
    assert!(matches!(
        user_service::get_user(&state, &admin, uuid::Uuid::new_v4()).await,
        Err(AppError::NotFound("User"))
    ));
    Ok(())
}

#[tokio::test]
async fn favorites_are_unique_per_product() -> anyhow::Result<()> {
    let state = setup().await?;
    let customer = create_user(&state, "carol", Role::Customer).await?;
    let category = create_category(&state, "Books").await?;
    let book = create_product(&state, category, "The Rust Book", 3900, 4).await?;

    let favorite = favorite_service::add_favorite(&state, &customer, book)
        .await?
        .data
        .unwrap();
    assert_eq!(favorite.product_id, book);
    assert_eq!(
        favorite.product.as_ref().map(|p| p.name.as_str()),
        Some("The Rust Book")
    );

    let err = favorite_service::add_favorite(&state, &customer, book)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = favorite_service::add_favorite(&state, &customer, uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound("Product")));

    let listed = favorite_service::list_favorites(&state, &customer, Pagination::default())
        .await?
        .data
        .unwrap();
    assert_eq!(listed.items.len(), 1);

    favorite_service::remove_favorite(&state, &customer, book).await?;
    assert_eq!(Favorites::find().count(&state.orm).await?, 0);
    let err = favorite_service::remove_favorite(&state, &customer, book)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound("Favorite")));
    Ok(())
}

fn provider_identity(subject: &str, username: &str, email: &str) -> ExternalIdentity {
    ExternalIdentity {
        subject: Some(subject.into()),
        username: username.into(),
        email: email.into(),
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        role: Role::Customer,
    }
}

#[tokio::test]
async fn provider_identity_is_matched_by_subject_before_username() -> anyhow::Result<()> {
    let state = setup().await?;
    let first = auth_service::find_or_provision_external_user(
        &state,
        &provider_identity("sub-1", "ada", "ada@example.com"),
    )
    .await?;
    assert_eq!(first.external_id.as_deref(), Some("sub-1"));
    assert!(first.password_hash.is_none());

    // renamed at the provider, same subject
    let renamed = auth_service::find_or_provision_external_user(
        &state,
        &provider_identity("sub-1", "ada.l", "ada@example.com"),
    )
    .await?;
    assert_eq!(renamed.id, first.id);
    assert_eq!(Users::find().count(&state.orm).await?, 1);

    // a local row linked after the fact is found through its subject too
    let bob = create_user(&state, "bob", Role::Customer).await?;
    let row = Users::find_by_id(bob.user_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("bob missing"))?;
    let mut active: users::ActiveModel = row.into();
    active.external_id = Set(Some("sub-2".into()));
    active.update(&state.orm).await?;

    let linked = auth_service::find_or_provision_external_user(
        &state,
        &provider_identity("sub-2", "robert", "robert@example.com"),
    )
    .await?;
    assert_eq!(linked.id, bob.user_id);
    assert_eq!(Users::find().count(&state.orm).await?, 2);
    Ok(())
}

#[tokio::test]
async fn provider_email_owned_by_another_user_is_a_clear_conflict() -> anyhow::Result<()> {
    let state = setup().await?;
    create_user(&state, "carol", Role::Customer).await?;

    let err = auth_service::find_or_provision_external_user(
        &state,
        &provider_identity("sub-9", "caroline", "carol@example.com"),
    )
    .await
    .unwrap_err();
    match err {
        AppError::Conflict(message) => {
            assert_eq!(message, "Email 'carol@example.com' is already registered to another account")
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(Users::find().count(&state.orm).await?, 1);
    Ok(())
}
