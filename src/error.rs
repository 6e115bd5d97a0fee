//! Error kinds shared by the extraction, import and storage paths, and their
//! HTTP rendering.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or rejected bearer token, or an unusable Gmail grant.
    #[error("{0}")]
    Authentication(String),

    /// A mail, generation or OAuth endpoint answered with a non-success status
    /// or could not be reached.
    #[error("{0}")]
    ExternalService(String),

    /// The model answered with something that is not a valid transaction list.
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("{0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Storage(String),

    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    pub fn with_status(self, status: StatusCode) -> ApiError {
        ApiError {
            status,
            error: self,
        }
    }

    fn default_status(&self) -> StatusCode {
        match self {
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalService(_)
            | AppError::MalformedResponse(_)
            | AppError::Configuration(_)
            | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => {
                AppError::ExternalService(format!("Request failed with status_code={}", status))
            }
            None => AppError::ExternalService(format!("Request failed: {}", err)),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// An [`AppError`] bound to the status code the endpoint answers with.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: AppError,
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        let status = error.default_status();
        ApiError { status, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed with status={}: {}", self.status, &self.error);
        } else {
            tracing::info!("Request rejected with status={}: {}", self.status, &self.error);
        }

        (
            self.status,
            Json(serde_json::json!({ "error": self.error.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_statuses() {
        let api: ApiError = AppError::Authentication("Unauthorized".into()).into();
        assert_eq!(api.status, StatusCode::UNAUTHORIZED);

        let api: ApiError = AppError::BadRequest("No emails provided".into()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError = AppError::Storage("boom".into()).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn explicit_status_overrides_default() {
        let api = AppError::Storage("boom".into()).with_status(StatusCode::BAD_REQUEST);
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.error.to_string(), "Database error: boom");
    }
}
