//! Management API errors and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use datastore::{DataStoreError, MacAddr};
use serde_json::json;
use templating::TemplateError;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<DataStoreError> for ApiError {
    fn from(e: DataStoreError) -> Self {
        match e {
            DataStoreError::Validation(e) => Self::BadRequest(e.to_string()),
            DataStoreError::NotFound(what) => Self::NotFound(format!("not found: {}", what)),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<TemplateError> for ApiError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::DataStore(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Parse a hardware address from a path segment.
pub fn parse_mac(text: &str) -> Result<MacAddr, ApiError> {
    text.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid hardware address {:?}: {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastore::ValidationError;

    #[test]
    fn test_status_mapping() {
        let validation: ApiError = DataStoreError::Validation(ValidationError::EmptyKey).into();
        assert_eq!(validation.status_code(), StatusCode::BAD_REQUEST);

        let missing: ApiError = DataStoreError::NotFound("machine".to_string()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let workspace: ApiError = DataStoreError::Workspace("gone".to_string()).into();
        assert_eq!(workspace.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(parse_mac("zz").unwrap_err().status_code(), StatusCode::BAD_REQUEST);
        assert!(parse_mac("52:54:00:00:00:01").is_ok());
    }
}
