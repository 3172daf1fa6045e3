use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use voluntra_domain::error::DomainError;
use voluntra_domain::moderation::CallableError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("sign-in required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    FailedPrecondition(String),
    #[error("the document changed concurrently; retry the request")]
    Conflict,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::FailedPrecondition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "invalid-argument",
            ApiError::Unauthorized => "unauthenticated",
            ApiError::Forbidden(_) => "permission-denied",
            ApiError::NotFound(_) => "not-found",
            ApiError::FailedPrecondition(_) => "failed-precondition",
            ApiError::Conflict => "conflict",
            ApiError::Internal => "internal",
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            DomainError::PermissionDenied(message) => ApiError::Forbidden(message),
            DomainError::InvalidArgument(message) => ApiError::Validation(message),
            DomainError::InvalidState(message) => ApiError::FailedPrecondition(message),
            DomainError::Conflict => ApiError::Conflict,
            DomainError::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                ApiError::Internal
            }
        }
    }
}

impl From<CallableError> for ApiError {
    fn from(err: CallableError) -> Self {
        match err {
            CallableError::Unauthenticated(_) => ApiError::Unauthorized,
            CallableError::NotFound(message) => ApiError::NotFound(message),
            CallableError::PermissionDenied(message) => ApiError::Forbidden(message),
            CallableError::InvalidArgument(message) => ApiError::Validation(message),
            CallableError::Internal(message) => {
                tracing::error!(error = %message, "callable failed");
                ApiError::Internal
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = self.to_string();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
