//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::mutator::{MutationError, PlanError};
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    /// Storage fault or exhausted conflict retries; safe to retry
    #[error("Operation temporarily unavailable")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => DomainError::AccountNotFound(id.to_string()).into(),
            other => AppError::Unavailable(other.to_string()),
        }
    }
}

impl From<MutationError> for AppError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::Domain(e) => AppError::Domain(e),
            MutationError::Plan(e) => AppError::Internal(e.to_string()),
            MutationError::Unavailable(e) => AppError::Unavailable(e.to_string()),
        }
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::InvalidAmount(_)
        | DomainError::InsufficientFunds { .. }
        | DomainError::SelfTransferNotAllowed
        | DomainError::ChallengeMismatch
        | DomainError::UnsupportedCurrency(_) => StatusCode::BAD_REQUEST,

        DomainError::AuthorizationRequired => StatusCode::FORBIDDEN,

        DomainError::AccountNotFound(_)
        | DomainError::BillNotFound(_)
        | DomainError::LoanNotFound(_)
        | DomainError::ChallengeNotFound => StatusCode::NOT_FOUND,

        DomainError::AlreadyPaid(_) | DomainError::InvalidTransition { .. } => StatusCode::CONFLICT,

        DomainError::ChallengeExpired => StatusCode::GONE,

        DomainError::CreditScoreTooLow { .. } | DomainError::NegativeBalance(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // 401 Unauthorized
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),

            // 403 Forbidden
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),

            // Domain errors - business rule outcomes
            AppError::Domain(domain_err) => {
                let details = match domain_err {
                    DomainError::InsufficientFunds { account_id, .. } => Some(account_id.to_string()),
                    DomainError::AccountNotFound(id) => Some(id.clone()),
                    DomainError::BillNotFound(id)
                    | DomainError::AlreadyPaid(id)
                    | DomainError::LoanNotFound(id) => Some(id.to_string()),
                    _ => None,
                };
                if domain_err.is_conflict() {
                    tracing::warn!(error_code = domain_err.code(), "Record state conflict: {}", domain_err);
                } else {
                    tracing::info!(error_code = domain_err.code(), "Request rejected: {}", domain_err);
                }
                (domain_status(domain_err), domain_err.code(), details)
            }

            // 503 Service Unavailable
            AppError::Unavailable(msg) => {
                tracing::error!("Ledger unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "operation_unavailable", None)
            }

            // 500 Internal Server Error
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LoanStatus;
    use uuid::Uuid;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_domain_status_mapping() {
        assert_eq!(status_of(DomainError::AlreadyPaid(Uuid::nil()).into()), StatusCode::CONFLICT);
        assert_eq!(
            status_of(
                DomainError::InvalidTransition {
                    from: LoanStatus::Pending,
                    to: LoanStatus::Paid
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(DomainError::ChallengeExpired.into()), StatusCode::GONE);
        assert_eq!(status_of(DomainError::AuthorizationRequired.into()), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(DomainError::CreditScoreTooLow { score: 400, minimum: 450 }.into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_store_fault_is_unavailable() {
        let err: AppError = StoreError::Conflict.into();
        assert_eq!(status_of(err), StatusCode::SERVICE_UNAVAILABLE);
    }
}
