use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::{
        cart::RawCartItem,
        checkout::{CheckoutInput, CheckoutOutcome, ShippingInput},
        discounts::AppliedDiscount,
    },
    AppState,
};
use axum::{
    extract::{Json, State},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(create_checkout))
}

/// Creates an order (or a pricing preview) from the submitted cart.
async fn create_checkout(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CheckoutPayload>,
) -> Result<Response, ServiceError> {
    payload.validate()?;

    let outcome = state
        .services
        .checkout
        .place_order(user.user_id, payload.into_input())
        .await?;

    Ok(match outcome {
        CheckoutOutcome::Preview(preview) => Json(PreviewResponse {
            ok: true,
            preview: true,
            normalized_code: preview.normalized_code,
            applied: preview.applied,
            message: preview.message,
            subtotal: preview.subtotal,
            discount_amount: preview.discount_total,
            total: preview.total,
        })
        .into_response(),
        CheckoutOutcome::Placed(placed) => Json(CheckoutResponse {
            ok: true,
            order_id: placed.order_id.to_string(),
            order_number: placed.order_number,
            payment_redirect_url: placed.payment_redirect_url,
            sandbox_redirect_url: placed.sandbox_redirect_url,
            subtotal: placed.subtotal,
            discount_amount: placed.discount_total,
            total: placed.total,
            applied_discount: placed.applied_discount.map(AppliedDiscountResponse::from),
            message: placed.discount_message,
        })
        .into_response(),
    })
}

// Request/response DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutPayload {
    pub items: Vec<RawCartItem>,
    #[serde(default)]
    pub shipping: ShippingPayload,
    #[validate(length(max = 64))]
    pub discount_code: Option<String>,
    #[serde(default)]
    pub preview_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShippingPayload {
    pub address: Option<String>,
    pub reference: Option<String>,
    pub district: Option<String>,
    pub notes: Option<String>,
}

impl CheckoutPayload {
    fn into_input(self) -> CheckoutInput {
        CheckoutInput {
            items: self.items,
            shipping: ShippingInput {
                address: self.shipping.address,
                reference: self.shipping.reference,
                district: self.shipping.district,
                notes: self.shipping.notes,
            },
            discount_code: self.discount_code,
            preview_only: self.preview_only,
        }
    }
}

#[derive(Debug, Serialize)]
struct PreviewResponse {
    ok: bool,
    preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    normalized_code: Option<String>,
    applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    subtotal: Decimal,
    discount_amount: Decimal,
    total: Decimal,
}

#[derive(Debug, Serialize)]
struct CheckoutResponse {
    ok: bool,
    order_id: String,
    order_number: String,
    payment_redirect_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sandbox_redirect_url: Option<String>,
    subtotal: Decimal,
    discount_amount: Decimal,
    total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied_discount: Option<AppliedDiscountResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct AppliedDiscountResponse {
    code: String,
    amount: Decimal,
}

impl From<AppliedDiscount> for AppliedDiscountResponse {
    fn from(applied: AppliedDiscount) -> Self {
        Self {
            code: applied.code,
            amount: applied.amount,
        }
    }
}
