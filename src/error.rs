/// Unified error types for the rewards ledger
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for ledger and API operations
#[derive(Error, Debug)]
pub enum RewardsError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Missing or invalid credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Actor's role is too low for the operation
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Malformed, missing or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown account, transaction, promotion or event
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate membership or an already-consumed promotion
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Spend, transfer, redemption or processing exceeds the available points
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    /// Event disbursement exceeds the remaining pool, or guest capacity is full
    #[error("Insufficient budget: {0}")]
    InsufficientBudget(String),

    /// Operation is illegal in the current lifecycle state
    #[error("Invalid state: {0}")]
    State(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Storage conflict that survived every retry
    #[error("Transient storage conflict after {attempts} attempts")]
    Transient { attempts: u32 },

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl RewardsError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            RewardsError::Database(_) | RewardsError::Internal(_) | RewardsError::Io(_) => {
                "InternalServerError"
            }
            RewardsError::Authentication(_) => "AuthenticationRequired",
            RewardsError::Authorization(_) => "Forbidden",
            RewardsError::Validation(_) => "InvalidRequest",
            RewardsError::NotFound(_) => "NotFound",
            RewardsError::Conflict(_) => "Conflict",
            RewardsError::InsufficientBalance { .. } => "InsufficientBalance",
            RewardsError::InsufficientBudget(_) => "InsufficientBudget",
            RewardsError::State(_) => "InvalidState",
            RewardsError::RateLimitExceeded { .. } => "RateLimitExceeded",
            RewardsError::Transient { .. } => "TransientFailure",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RewardsError::Authentication(_) => StatusCode::UNAUTHORIZED,
            RewardsError::Authorization(_) => StatusCode::FORBIDDEN,
            RewardsError::Validation(_)
            | RewardsError::InsufficientBalance { .. }
            | RewardsError::InsufficientBudget(_) => StatusCode::BAD_REQUEST,
            RewardsError::NotFound(_) => StatusCode::NOT_FOUND,
            RewardsError::Conflict(_) | RewardsError::State(_) => StatusCode::CONFLICT,
            RewardsError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            RewardsError::Transient { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RewardsError::Database(_) | RewardsError::Internal(_) | RewardsError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convert RewardsError to HTTP response
impl IntoResponse for RewardsError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            RewardsError::Database(ref e) => {
                tracing::error!("database error: {}", e);
                "Internal server error".to_string() // Don't leak details
            }
            RewardsError::Internal(_) | RewardsError::Io(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.code().to_string(),
                message,
            }),
        )
            .into_response();

        if let RewardsError::RateLimitExceeded { retry_after } = self {
            if let Ok(value) = retry_after.as_secs().to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

/// Result type alias for ledger operations
pub type RewardsResult<T> = Result<T, RewardsError>;
