use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::{AppConfig, AuthMode},
    services::identity_provider::{IdentityProviderClient, IdentityProviderError},
};

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub config: Arc<AppConfig>,
    /// Present only in external auth mode.
    pub identity: Option<IdentityProviderClient>,
}

impl AppState {
    pub fn new(orm: DatabaseConnection, config: AppConfig) -> Result<Self, IdentityProviderError> {
        let identity = match (config.auth_mode, config.identity_provider.clone()) {
            (AuthMode::External, Some(idp)) => Some(IdentityProviderClient::new(idp)?),
            _ => None,
        };
        Ok(Self {
            orm,
            config: Arc::new(config),
            identity,
        })
    }
}
