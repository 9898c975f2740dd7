use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct Meta {
    pub total: Option<u64>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl Meta {
    pub fn new(skip: u64, limit: u64, total: u64) -> Self {
        Self {
            total: Some(total),
            skip: Some(skip),
            limit: Some(limit),
        }
    }

    /// Unpaginated collection.
    pub fn total(total: u64) -> Self {
        Self {
            total: Some(total),
            skip: None,
            limit: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            total: None,
            skip: None,
            limit: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: Option<T>,
    pub meta: Option<Meta>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T, meta: Option<Meta>) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            meta,
        }
    }
}
