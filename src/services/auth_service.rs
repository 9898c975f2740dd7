use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use password_hash::rand_core::OsRng;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, SqlErr};
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::{
    audit,
    config::{AppConfig, AuthMode},
    dto::auth::{Claims, RegisterRequest, TokenRequest, TokenResponse},
    entity::{
        Users,
        users::{self, Column as UserCol},
    },
    error::{AppError, AppResult},
    models::{Role, User},
    response::ApiResponse,
    services::identity_provider::{ExternalIdentity, NewIdentity},
    state::AppState,
};

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            tracing::warn!(error = %err, "stored password hash is malformed");
            false
        }
    }
}

pub fn issue_token(config: &AppConfig, user: &users::Model) -> AppResult<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::minutes(config.access_token_ttl_minutes))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role.as_str().to_string(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.expose_secret().as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

pub fn decode_token(config: &AppConfig, token: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.expose_secret().as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|err| {
        tracing::debug!(error = %err, "rejected access token");
        AppError::Unauthorized("Could not validate credentials".into())
    })
}

pub async fn register(state: &AppState, payload: RegisterRequest) -> AppResult<ApiResponse<User>> {
    let user = create_account(state, payload, Role::Customer, None).await?;
    Ok(ApiResponse::success("User registered", user, None))
}

/// Create a local user row, and in external mode the provider account first.
pub async fn create_account(
    state: &AppState,
    payload: RegisterRequest,
    role: Role,
    actor: Option<Uuid>,
) -> AppResult<User> {
    payload.validate()?;

    if Users::find()
        .filter(UserCol::Username.eq(payload.username.as_str()))
        .one(&state.orm)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("Username already registered".into()));
    }
    if Users::find()
        .filter(UserCol::Email.eq(payload.email.as_str()))
        .one(&state.orm)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let (password_hash, external_id) = match (&state.identity, state.config.auth_mode) {
        (Some(identity), AuthMode::External) => {
            if identity.find_user_id(&payload.username).await?.is_some() {
                return Err(AppError::Conflict(
                    "Username already exists at the identity provider".into(),
                ));
            }
            let new_identity = NewIdentity {
                username: &payload.username,
                email: &payload.email,
                first_name: &payload.first_name,
                last_name: &payload.last_name,
                password: &payload.password,
            };
            let external_id = identity.create_user(&new_identity, role).await?;
            (None, Some(external_id))
        }
        _ => (Some(hash_password(&payload.password)?), None),
    };

    let inserted = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(payload.username.clone()),
        email: Set(payload.email),
        first_name: Set(payload.first_name),
        last_name: Set(payload.last_name),
        password_hash: Set(password_hash),
        external_id: Set(external_id.clone()),
        role: Set(role),
        is_active: Set(true),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await;

    let user = match inserted {
        Ok(user) => user,
        Err(err) => {
            // undo the provider account so a retry is not blocked by it
            if let (Some(identity), Some(_)) = (&state.identity, external_id) {
                if let Err(cleanup) = identity.delete_user(&payload.username).await {
                    tracing::warn!(error = %cleanup, "could not remove orphaned provider account");
                }
            }
            return Err(err.into());
        }
    };

    let action = match role {
        Role::Admin => "admin_create",
        Role::Customer => "user_register",
    };
    audit::record(
        &state.orm,
        actor.or(Some(user.id)),
        action,
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;
    tracing::info!(user_id = %user.id, role = role.as_str(), "account created");

    Ok(user.into())
}

/// OAuth2 password grant, local mode only.
pub async fn issue_access_token(state: &AppState, form: TokenRequest) -> AppResult<TokenResponse> {
    if state.config.auth_mode == AuthMode::External {
        return Err(AppError::BadRequest(
            "Tokens are issued by the identity provider".into(),
        ));
    }

    let invalid = || AppError::Unauthorized("Incorrect username or password".into());
    let user = Users::find()
        .filter(UserCol::Username.eq(form.username.as_str()))
        .one(&state.orm)
        .await?
        .ok_or_else(invalid)?;
    let hash = user.password_hash.as_deref().ok_or_else(invalid)?;
    if !verify_password(&form.password, hash) {
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::Unauthorized("Inactive user".into()));
    }

    let access_token = issue_token(&state.config, &user)?;
    audit::record(
        &state.orm,
        Some(user.id),
        "user_login",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    })
}

/// Map a verified provider identity onto its local row, creating the row on first sight.
///
/// The provider subject is matched before the username, so an account renamed
/// at the provider keeps its local row.
pub async fn find_or_provision_external_user(
    state: &AppState,
    identity: &ExternalIdentity,
) -> AppResult<users::Model> {
    if let Some(user) = find_known_identity(state, identity).await? {
        return Ok(user);
    }

    let inserted = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(identity.username.clone()),
        email: Set(identity.email.clone()),
        first_name: Set(identity.first_name.clone()),
        last_name: Set(identity.last_name.clone()),
        password_hash: Set(None),
        external_id: Set(identity.subject.clone()),
        role: Set(identity.role),
        is_active: Set(true),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await;

    match inserted {
        Ok(user) => {
            tracing::info!(user_id = %user.id, username = %user.username, "provisioned user from identity provider");
            Ok(user)
        }
        // a concurrent request provisioned the same identity first
        Err(err) => match find_known_identity(state, identity).await? {
            Some(user) => Ok(user),
            None if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                tracing::warn!(
                    username = %identity.username,
                    email = %identity.email,
                    "identity provider email belongs to another local account"
                );
                Err(AppError::Conflict(format!(
                    "Email '{}' is already registered to another account",
                    identity.email
                )))
            }
            None => Err(err.into()),
        },
    }
}

async fn find_known_identity(
    state: &AppState,
    identity: &ExternalIdentity,
) -> AppResult<Option<users::Model>> {
    if let Some(subject) = &identity.subject {
        let linked = Users::find()
            .filter(UserCol::ExternalId.eq(subject.as_str()))
            .one(&state.orm)
            .await?;
        if linked.is_some() {
            return Ok(linked);
        }
    }
    find_by_username(state, &identity.username).await
}

async fn find_by_username(state: &AppState, username: &str) -> AppResult<Option<users::Model>> {
    Ok(Users::find()
        .filter(UserCol::Username.eq(username))
        .one(&state.orm)
        .await?)
}
