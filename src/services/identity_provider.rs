//! Client for an OpenID Connect identity provider exposing a Keycloak-style
//! admin REST API.
//!
//! Used only when `AUTH_MODE=external`: account creation, role assignment and
//! deletion are forwarded to the provider, and bearer tokens are verified
//! against the realm's published signing keys. There is no retry; any failed
//! call surfaces to the caller as [`IdentityProviderError`].

use std::{sync::Arc, time::Duration};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::{
    config::IdentityProviderConfig,
    error::{AppError, AppResult},
    models::Role,
};

#[derive(Debug, Error)]
pub enum IdentityProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("created user response carried no Location header")]
    MissingLocation,

    #[error("realm role `{0}` not found")]
    RoleNotFound(String),
}

/// Identity asserted by a verified provider token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Provider-side user id (`sub`).
    pub subject: Option<String>,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

/// Account data forwarded to the provider on registration.
#[derive(Debug)]
pub struct NewIdentity<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password: &'a str,
}

#[derive(Clone)]
pub struct IdentityProviderClient {
    inner: Arc<IdentityProviderClientInner>,
}

struct IdentityProviderClientInner {
    client: reqwest::Client,
    config: IdentityProviderConfig,
}

#[derive(Deserialize)]
struct AdminTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct RemoteUser {
    id: String,
}

#[derive(Deserialize, Serialize)]
struct RealmRole {
    id: String,
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserBody<'a> {
    username: &'a str,
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    enabled: bool,
    email_verified: bool,
    credentials: [Credential<'a>; 1],
}

#[derive(Serialize)]
struct Credential<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
    temporary: bool,
}

#[derive(Debug, Deserialize)]
struct ProviderClaims {
    sub: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    #[serde(default)]
    realm_access: RealmAccess,
}

#[derive(Debug, Default, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

impl IdentityProviderClient {
    pub fn new(config: IdentityProviderConfig) -> Result<Self, IdentityProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            inner: Arc::new(IdentityProviderClientInner { client, config }),
        })
    }

    fn realm_url(&self, path: &str) -> String {
        let config = &self.inner.config;
        format!("{}/realms/{}{}", config.base_url, config.realm, path)
    }

    fn admin_url(&self, path: &str) -> String {
        let config = &self.inner.config;
        format!("{}/admin/realms/{}{}", config.base_url, config.realm, path)
    }

    /// Short-lived admin token from the master realm; fetched per operation.
    async fn admin_token(&self) -> Result<String, IdentityProviderError> {
        let config = &self.inner.config;
        let url = format!(
            "{}/realms/master/protocol/openid-connect/token",
            config.base_url
        );
        let response = self
            .inner
            .client
            .post(url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", config.admin_client_id.as_str()),
                ("username", config.admin_username.as_str()),
                ("password", config.admin_password.expose_secret()),
            ])
            .send()
            .await?;
        let token: AdminTokenResponse = ensure_success(response).await?.json().await?;
        Ok(token.access_token)
    }

    #[instrument(skip(self))]
    pub async fn find_user_id(&self, username: &str) -> Result<Option<String>, IdentityProviderError> {
        let token = self.admin_token().await?;
        self.find_user_id_with(&token, username).await
    }

    async fn find_user_id_with(
        &self,
        token: &str,
        username: &str,
    ) -> Result<Option<String>, IdentityProviderError> {
        let response = self
            .inner
            .client
            .get(self.admin_url("/users"))
            .bearer_auth(token)
            .query(&[("username", username), ("exact", "true")])
            .send()
            .await?;
        let users: Vec<RemoteUser> = ensure_success(response).await?.json().await?;
        Ok(users.into_iter().next().map(|u| u.id))
    }

    /// Create the account and map it to the realm role matching `role`.
    /// Returns the provider's user id.
    #[instrument(skip(self, identity), fields(username = %identity.username, role = %role.as_str()))]
    pub async fn create_user(
        &self,
        identity: &NewIdentity<'_>,
        role: Role,
    ) -> Result<String, IdentityProviderError> {
        let token = self.admin_token().await?;
        let body = CreateUserBody {
            username: identity.username,
            email: identity.email,
            first_name: identity.first_name,
            last_name: identity.last_name,
            enabled: true,
            email_verified: true,
            credentials: [Credential {
                kind: "password",
                value: identity.password,
                temporary: false,
            }],
        };
        let response = self
            .inner
            .client
            .post(self.admin_url("/users"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let user_id = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(user_id_from_location)
            .ok_or(IdentityProviderError::MissingLocation)?;

        let response = self
            .inner
            .client
            .get(self.admin_url("/roles"))
            .bearer_auth(&token)
            .send()
            .await?;
        let roles: Vec<RealmRole> = ensure_success(response).await?.json().await?;
        let realm_role = roles
            .into_iter()
            .find(|r| r.name == role.as_str())
            .ok_or_else(|| IdentityProviderError::RoleNotFound(role.as_str().to_string()))?;

        let response = self
            .inner
            .client
            .post(self.admin_url(&format!("/users/{user_id}/role-mappings/realm")))
            .bearer_auth(&token)
            .json(&[realm_role])
            .send()
            .await?;
        ensure_success(response).await?;

        tracing::info!(external_id = %user_id, "identity provider account created");
        Ok(user_id)
    }

    /// Remove the account. An account already missing upstream counts as deleted.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, username: &str) -> Result<(), IdentityProviderError> {
        let token = self.admin_token().await?;
        let Some(user_id) = self.find_user_id_with(&token, username).await? else {
            tracing::warn!(username, "account not present at identity provider");
            return Ok(());
        };
        let response = self
            .inner
            .client
            .delete(self.admin_url(&format!("/users/{user_id}")))
            .bearer_auth(&token)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Verify an RS256 bearer token against the realm's JWKS.
    pub async fn verify_token(&self, token: &str) -> AppResult<ExternalIdentity> {
        let header = decode_header(token)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::Unauthorized("Token missing 'kid' header".into()))?;

        let response = self
            .inner
            .client
            .get(self.realm_url("/protocol/openid-connect/certs"))
            .send()
            .await
            .map_err(IdentityProviderError::from)?;
        let jwks: JwkSet = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(IdentityProviderError::from)?;

        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| AppError::Unauthorized("Matching key not found in JWKS".into()))?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| AppError::Unauthorized(format!("Invalid signing key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.inner.config.audience.as_str()]);
        let claims = decode::<ProviderClaims>(token, &key, &validation)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {e}")))?
            .claims;

        identity_from_claims(claims)
    }
}

async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, IdentityProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(IdentityProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

/// `Location: https://idp/admin/realms/shop/users/<id>` -> `<id>`
fn user_id_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Admin wins when a token carries both realm roles.
fn role_from_realm_roles(roles: &[String]) -> Option<Role> {
    if roles.iter().any(|r| r == Role::Admin.as_str()) {
        Some(Role::Admin)
    } else if roles.iter().any(|r| r == Role::Customer.as_str()) {
        Some(Role::Customer)
    } else {
        None
    }
}

fn identity_from_claims(claims: ProviderClaims) -> AppResult<ExternalIdentity> {
    let missing = || AppError::Unauthorized("Token missing required claims".into());
    let username = claims.preferred_username.ok_or_else(missing)?;
    let email = claims.email.ok_or_else(missing)?;
    let role = role_from_realm_roles(&claims.realm_access.roles).ok_or_else(missing)?;
    Ok(ExternalIdentity {
        subject: claims.sub,
        username,
        email,
        first_name: claims.given_name.unwrap_or_default(),
        last_name: claims.family_name.unwrap_or_default(),
        role,
    })
}
