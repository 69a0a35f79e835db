use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error body returned to HTTP callers: a stable machine-readable code
/// plus an optional human-readable detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("No buyer profile for the authenticated user")]
    BuyerProfileRequired,

    #[error("A shipping address is required")]
    AddressRequired,

    #[error("The cart is empty")]
    EmptyCart,

    #[error("Cart references packs that are not available for sale")]
    InvalidPacksInCart,

    #[error("Cart references products that are not available for sale")]
    InvalidProductsInCart,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No active price for {kind} {item_id}")]
    NoPrice { kind: &'static str, item_id: i64 },

    #[error("Insufficient stock for product {product_id}: available {available}, required {required}")]
    InsufficientStock {
        product_id: i64,
        available: i64,
        required: i64,
    },

    #[error("Stock could not be reserved for the order")]
    OutOfStock,

    #[error("A school affiliation is required to use this discount code")]
    SchoolRequiredForDiscount,

    #[error("This discount code is not valid for the buyer's school")]
    DiscountNotAllowedForSchool,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Payment gateway error: {0}")]
    PaymentGatewayError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Stable code surfaced in the response body, independent of the
    /// human-readable message.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::BuyerProfileRequired => "BUYER_PROFILE_REQUIRED",
            Self::AddressRequired => "ADDRESS_REQUIRED",
            Self::EmptyCart => "EMPTY_CART",
            Self::InvalidPacksInCart => "INVALID_PACKS_IN_CART",
            Self::InvalidProductsInCart => "INVALID_PRODUCTS_IN_CART",
            Self::NotFound(_) => "NOT_FOUND",
            Self::NoPrice { .. } => "NO_PRICE",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::OutOfStock => "OUT_OF_STOCK",
            Self::SchoolRequiredForDiscount => "SCHOOL_REQUIRED_FOR_DISCOUNT",
            Self::DiscountNotAllowedForSchool => "DISCOUNT_NOT_ALLOWED_FOR_SCHOOL",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::PaymentGatewayError(_) => "PAYMENT_GATEWAY_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Single source of truth for the error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthRequired => StatusCode::UNAUTHORIZED,
            Self::BuyerProfileRequired
            | Self::AddressRequired
            | Self::EmptyCart
            | Self::InvalidPacksInCart
            | Self::InvalidProductsInCart
            | Self::SchoolRequiredForDiscount
            | Self::DiscountNotAllowedForSchool
            | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::NoPrice { .. } => StatusCode::NOT_FOUND,
            Self::InsufficientStock { .. } | Self::OutOfStock => StatusCode::CONFLICT,
            Self::PaymentGatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for HTTP responses. Internal failures return a
    /// generic detail to avoid leaking implementation specifics.
    pub fn response_detail(&self) -> Option<String> {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.error_code().to_string(),
            detail: self.response_detail(),
        };
        (status, Json(body)).into_response()
    }
}
