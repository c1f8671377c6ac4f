//! Request-level errors and their JSON envelope.

use crate::generation::GenerationError;
use crate::models::ThreadStatus;
use crate::store::StoreError;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Thread is {0} and no longer accepts replies")]
    ThreadClosed(ThreadStatus),

    #[error("Too many tries. Try again in {0}")]
    CoolingDown(String),

    #[error(transparent)]
    Upstream(#[from] GenerationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::ThreadClosed(_) => StatusCode::CONFLICT,
            ApiError::CoolingDown(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) | ApiError::Store(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            ApiError::Store(e) => ErrorBody {
                error: "Internal error".to_string(),
                detail: Some(e.to_string()),
            },
            ApiError::Internal(e) => ErrorBody {
                error: "Internal error".to_string(),
                detail: Some(format!("{e:#}")),
            },
            other => ErrorBody {
                error: other.to_string(),
                detail: None,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(format!("Invalid path: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {self}");
        } else {
            warn!("Request rejected ({status}): {self}");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::validation("Missing tone").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("Thread not found").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            ApiError::ThreadClosed(ThreadStatus::Locked).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::CoolingDown("09:59".to_string()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_upstream_message_is_surfaced() {
        let err = ApiError::from(GenerationError::Upstream {
            status: 500,
            message: "boom".to_string(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = err.body();
        assert!(body.error.contains("boom"));
        assert_eq!(body.detail, None);
    }

    #[test]
    fn test_internal_errors_are_generic_with_detail() {
        let err = ApiError::from(StoreError::Backend("connection refused".to_string()));
        let body = err.body();
        assert_eq!(body.error, "Internal error");
        assert!(body.detail.unwrap().contains("connection refused"));
    }

    #[test]
    fn test_error_body_omits_empty_detail() {
        let json = serde_json::to_string(&ApiError::validation("Missing tone").body()).unwrap();
        assert_eq!(json, r#"{"error":"Missing tone"}"#);
    }
}
