use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dto::auth::MIN_PASSWORD_LEN,
    error::{AppResult, FieldErrors},
    models::User,
};

/// Partial profile update; absent fields are left untouched.
#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = FieldErrors::new();
        errors
            .require(
                self.email.as_deref().is_none_or(is_valid_email),
                "email",
                "must be a valid email address",
            )
            .require(
                self.first_name.as_deref().is_none_or(|n| !n.trim().is_empty()),
                "first_name",
                "must not be empty",
            )
            .require(
                self.last_name.as_deref().is_none_or(|n| !n.trim().is_empty()),
                "last_name",
                "must not be empty",
            )
            .require(
                self.password
                    .as_deref()
                    .is_none_or(|p| p.chars().count() >= MIN_PASSWORD_LEN),
                "password",
                "must be at least 8 characters",
            );
        errors.finish()
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct UserList {
    #[schema(value_type = Vec<User>)]
    pub items: Vec<User>,
}

pub fn is_valid_username(username: &str) -> bool {
    let len = username.chars().count();
    (3..=150).contains(&len)
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Shape check only: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}
