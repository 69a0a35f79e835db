//! Payment gateway adapter. The pipeline talks to the gateway through
//! the `PaymentGateway` trait; production wires the HTTP implementation,
//! tests substitute a mock.

use crate::{config::PaymentConfig, errors::ServiceError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// One sellable line in the payment session. Always the discounted unit
/// price, never the list price.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentItem {
    pub title: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub currency_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackUrls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Metadata binding the session back to our records.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentMetadata {
    pub order_id: Uuid,
    pub payment_intent_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSessionRequest {
    pub items: Vec<PaymentItem>,
    pub external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_url: Option<String>,
    pub back_urls: BackUrls,
    pub metadata: PaymentMetadata,
}

/// Redirectable payment session returned by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSession {
    pub id: String,
    pub redirect_url: String,
    pub sandbox_redirect_url: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a redirectable payment session. Any failure, including a
    /// slow call hitting the client timeout, is a hard failure the
    /// pipeline compensates for.
    async fn create_payment_session(
        &self,
        request: PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError>;
}

/// Checkout-preference wire format of the hosted-checkout provider.
#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
    #[serde(default)]
    sandbox_init_point: Option<String>,
}

pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: PaymentConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: PaymentConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(external_reference = %request.external_reference))]
    async fn create_payment_session(
        &self,
        request: PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let url = format!(
            "{}/checkout/preferences",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentGatewayError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::PaymentGatewayError(format!(
                "gateway returned {}: {}",
                status, body
            )));
        }

        let preference: PreferenceResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentGatewayError(format!("invalid response: {}", e)))?;

        info!(preference_id = %preference.id, "Payment session created");
        Ok(PaymentSession {
            id: preference.id,
            redirect_url: preference.init_point,
            sandbox_redirect_url: preference.sandbox_init_point,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn session_request_serializes_wire_fields() {
        let request = PaymentSessionRequest {
            items: vec![PaymentItem {
                title: "Notebook".into(),
                quantity: 2,
                unit_price: dec!(45.00),
                currency_id: "PEN".into(),
            }],
            external_reference: "order-123".into(),
            notification_url: None,
            back_urls: BackUrls {
                success: Some("https://store.example/thanks".into()),
                failure: None,
            },
            metadata: PaymentMetadata {
                order_id: Uuid::new_v4(),
                payment_intent_id: Uuid::new_v4(),
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["items"][0]["unit_price"], "45.00");
        assert_eq!(json["external_reference"], "order-123");
        assert!(json.get("notification_url").is_none());
        assert!(json["back_urls"].get("failure").is_none());
    }

    #[test]
    fn preference_response_parses_optional_sandbox_url() {
        let parsed: PreferenceResponse = serde_json::from_str(
            r#"{"id":"pref-1","init_point":"https://pay.example/p/1"}"#,
        )
        .unwrap();
        assert_eq!(parsed.id, "pref-1");
        assert!(parsed.sandbox_init_point.is_none());
    }
}
