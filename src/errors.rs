use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every JSON endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Out of stock: product 550e8400-e29b-41d4-a716-446655440000 has 1 available, 2 requested",
    "code": "out_of_stock",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable error kind
    #[schema(example = "out_of_stock")]
    pub code: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Coupon not found: {0}")]
    CouponNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Out of stock: {0}")]
    OutOfStock(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Coupon expired: {0}")]
    CouponExpired(String),

    #[error("Coupon usage limit reached: {0}")]
    UsageLimitReached(String),

    #[error("Minimum purchase not met: {0}")]
    MinimumNotMet(String),

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Gateway signature mismatch")]
    SignatureMismatch,

    #[error("Invalid gateway amount: {0}")]
    GatewayAmountInvalid(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::InternalError(format!("serialization failed: {err}"))
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_)
            | Self::OutOfStock(_)
            | Self::InvalidState(_)
            | Self::CouponExpired(_)
            | Self::UsageLimitReached(_)
            | Self::MinimumNotMet(_)
            | Self::SignatureMismatch
            | Self::GatewayAmountInvalid(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::ProductNotFound(_) | Self::CouponNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::NotEligible(_) => StatusCode::FORBIDDEN,
            Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, surfaced as `code` in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::ValidationError(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::ProductNotFound(_) => "product_not_found",
            Self::CouponNotFound(_) => "coupon_not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::OutOfStock(_) => "out_of_stock",
            Self::InvalidState(_) => "invalid_state",
            Self::CouponExpired(_) => "coupon_expired",
            Self::UsageLimitReached(_) => "usage_limit_reached",
            Self::MinimumNotMet(_) => "minimum_not_met",
            Self::NotEligible(_) => "not_eligible",
            Self::SignatureMismatch => "signature_mismatch",
            Self::GatewayAmountInvalid(_) => "gateway_amount_invalid",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::SignatureMismatch => "Payment verification failed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed with internal error");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.kind().to_string(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
