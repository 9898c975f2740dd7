use std::env;

use anyhow::{Context, bail};
use secrecy::SecretString;

/// Where credentials live and who signs access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Argon2 password hashes in `users`, HS256 tokens signed with `JWT_SECRET`.
    Local,
    /// Accounts and tokens are owned by an OpenID Connect identity provider.
    External,
}

#[derive(Debug, Clone)]
pub struct IdentityProviderConfig {
    pub base_url: String,
    pub realm: String,
    pub audience: String,
    pub admin_username: String,
    pub admin_password: SecretString,
    pub admin_client_id: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub auth_mode: AuthMode,
    pub jwt_secret: SecretString,
    pub access_token_ttl_minutes: i64,
    pub identity_provider: Option<IdentityProviderConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let access_token_ttl_minutes = env::var("ACCESS_TOKEN_EXPIRE_MINUTES")
            .ok()
            .and_then(|m| m.parse::<i64>().ok())
            .filter(|m| *m > 0)
            .unwrap_or(30);

        let auth_mode = match env::var("AUTH_MODE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "local" => AuthMode::Local,
            "external" => AuthMode::External,
            other => bail!("AUTH_MODE must be `local` or `external`, got `{other}`"),
        };

        let jwt_secret = match (auth_mode, env::var("JWT_SECRET")) {
            (_, Ok(secret)) => SecretString::from(secret),
            (AuthMode::Local, Err(_)) => bail!("JWT_SECRET is not set"),
            (AuthMode::External, Err(_)) => SecretString::from(String::new()),
        };

        let identity_provider = match auth_mode {
            AuthMode::Local => None,
            AuthMode::External => Some(IdentityProviderConfig {
                base_url: env::var("IDP_URL")
                    .context("IDP_URL is not set")?
                    .trim_end_matches('/')
                    .to_string(),
                realm: env::var("IDP_REALM").context("IDP_REALM is not set")?,
                audience: env::var("IDP_AUDIENCE").unwrap_or_else(|_| "account".to_string()),
                admin_username: env::var("IDP_ADMIN_USERNAME")
                    .context("IDP_ADMIN_USERNAME is not set")?,
                admin_password: SecretString::from(
                    env::var("IDP_ADMIN_PASSWORD").context("IDP_ADMIN_PASSWORD is not set")?,
                ),
                admin_client_id: env::var("IDP_ADMIN_CLIENT_ID")
                    .unwrap_or_else(|_| "admin-cli".to_string()),
            }),
        };

        Ok(Self {
            port,
            database_url,
            host,
            auth_mode,
            jwt_secret,
            access_token_ttl_minutes,
            identity_provider,
        })
    }

    /// Local-auth configuration with defaults, used by tests and tooling.
    pub fn local(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            auth_mode: AuthMode::Local,
            jwt_secret: SecretString::from(jwt_secret.into()),
            access_token_ttl_minutes: 30,
            identity_provider: None,
        }
    }
}
