use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dto::users::{is_valid_email, is_valid_username},
    error::{AppResult, FieldErrors},
};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Body for customer registration and admin creation.
#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = FieldErrors::new();
        errors
            .require(
                is_valid_username(&self.username),
                "username",
                "must be 3-150 characters of letters, digits, '.', '_' or '-'",
            )
            .require(is_valid_email(&self.email), "email", "must be a valid email address")
            .require(
                !self.first_name.trim().is_empty(),
                "first_name",
                "must not be empty",
            )
            .require(
                !self.last_name.trim().is_empty(),
                "last_name",
                "must not be empty",
            )
            .require(
                self.password.chars().count() >= MIN_PASSWORD_LEN,
                "password",
                "must be at least 8 characters",
            );
        errors.finish()
    }
}

/// OAuth2 password-grant form. Extra form fields (`grant_type`, `scope`) are ignored.
#[derive(Deserialize, Debug, ToSchema)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}
