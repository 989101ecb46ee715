use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use validator::ValidationErrors;

use crate::settlement::models::BundleStatus;

/// Top-level error type for the settlement service
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bundle is {current}, cannot {action}")]
    InvalidState {
        current: BundleStatus,
        action: String,
    },

    #[error("Transaction timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_state(current: BundleStatus, action: impl Into<String>) -> Self {
        AppError::InvalidState {
            current,
            action: action.into(),
        }
    }

    /// Maps constraint violations raised inside a transaction to domain errors.
    /// 23505 = unique_violation, 23514 = check_violation.
    pub fn from_constraint(error: sqlx::Error, conflict_message: impl Into<String>) -> Self {
        if let sqlx::Error::Database(ref db_err) = error {
            match db_err.code().as_deref() {
                Some("23505") => return AppError::Conflict(conflict_message.into()),
                Some("23514") => {
                    return AppError::Validation(format!(
                        "Constraint {} rejected the write",
                        db_err.constraint().unwrap_or("unknown")
                    ))
                }
                _ => {}
            }
        }
        AppError::Database(error)
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                message,
                None,
            ),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, "NOT_FOUND", message, None),
            AppError::Conflict(message) => (StatusCode::CONFLICT, "CONFLICT", message, None),
            AppError::InvalidState { current, action } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_STATE",
                format!("Bundle is {}, cannot {}", current, action),
                Some(serde_json::json!({ "status": current })),
            ),
            AppError::Timeout(operation) => (
                StatusCode::GATEWAY_TIMEOUT,
                "TRANSACTION_TIMEOUT",
                format!("{} timed out and was rolled back", operation),
                None,
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    None,
                )
            }
            AppError::Config(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect();
        fields.sort();

        AppError::Validation(fields.join("; "))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_per_kind() {
        let cases = vec![
            (AppError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                AppError::invalid_state(BundleStatus::Paid, "edit adjustments"),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AppError::Timeout("create bundle".into()), StatusCode::GATEWAY_TIMEOUT),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_invalid_state_message() {
        let err = AppError::invalid_state(BundleStatus::Canceled, "issue an invoice");
        assert_eq!(err.to_string(), "Bundle is canceled, cannot issue an invoice");
    }
}
