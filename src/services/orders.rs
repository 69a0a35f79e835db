//! Order store: header, line, and payment-intent persistence plus the
//! delete used by compensation.

use crate::{
    entities::{
        order::{self, FulfillmentStatus, OrderStatus},
        order_item,
        payment_intent::{self, PaymentIntentStatus},
        Order, OrderItem, PaymentIntent,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::CheckoutLine,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Everything needed to persist an order header.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub buyer_id: Uuid,
    pub shipping_address: String,
    pub shipping_reference: Option<String>,
    pub shipping_district: Option<String>,
    pub shipping_notes: Option<String>,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub discount_code: Option<String>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Inserts the order header in `PaymentPending`.
    #[instrument(skip(self, new))]
    pub async fn insert_order(&self, new: NewOrder) -> Result<order::Model, ServiceError> {
        let order_id = Uuid::new_v4();
        let order_number = format!("SK-{}", &order_id.simple().to_string()[..8].to_uppercase());

        let model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            buyer_id: Set(new.buyer_id),
            shipping_address: Set(new.shipping_address),
            shipping_reference: Set(new.shipping_reference),
            shipping_district: Set(new.shipping_district),
            shipping_notes: Set(new.shipping_notes),
            currency: Set(new.currency),
            subtotal: Set(new.subtotal),
            discount_total: Set(new.discount_total),
            total: Set(new.total),
            discount_code: Set(new.discount_code),
            status: Set(OrderStatus::PaymentPending),
            fulfillment_status: Set(FulfillmentStatus::Unfulfilled),
            created_at: Set(Utc::now()),
        };

        let inserted = model.insert(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;
        info!(order_id = %order_id, "Order header created");
        Ok(inserted)
    }

    /// Persists the stock-bearing lines (direct products and pack
    /// components). Header lines are deliberately not written here: the
    /// stock engine must never see a line without a base product.
    #[instrument(skip(self, lines))]
    pub async fn insert_reservable_lines(
        &self,
        order_id: Uuid,
        lines: &[CheckoutLine],
    ) -> Result<(), ServiceError> {
        for line in lines.iter().filter(|l| l.is_reservable()) {
            self.insert_line(order_id, line).await?;
        }
        Ok(())
    }

    /// Persists the pack header lines (null base product, price > 0).
    /// Deferred until after reservation succeeds.
    #[instrument(skip(self, lines))]
    pub async fn insert_header_lines(
        &self,
        order_id: Uuid,
        lines: &[CheckoutLine],
    ) -> Result<(), ServiceError> {
        for line in lines.iter().filter(|l| !l.is_reservable()) {
            self.insert_line(order_id, line).await?;
        }
        Ok(())
    }

    async fn insert_line(&self, order_id: Uuid, line: &CheckoutLine) -> Result<(), ServiceError> {
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            kind: Set(line.kind),
            base_product_id: Set(line.base_product_id),
            pack_id: Set(line.pack_id),
            title: Set(line.title.clone()),
            sale_code: Set(line.sale_code.clone()),
            quantity: Set(line.quantity),
            unit_list_price: Set(line.unit_list_price),
            unit_price: Set(line.unit_price),
            line_total: Set(line.line_total),
        }
        .insert(&*self.db)
        .await?;
        Ok(())
    }

    /// Creates the payment intent row referencing the order.
    #[instrument(skip(self))]
    pub async fn create_payment_intent(
        &self,
        order_id: Uuid,
        provider: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<payment_intent::Model, ServiceError> {
        let model = payment_intent::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            provider: Set(provider.to_string()),
            status: Set(PaymentIntentStatus::Created),
            amount: Set(amount),
            currency: Set(currency.to_string()),
            external_preference_id: Set(None),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Stores the gateway's session id on the payment intent.
    #[instrument(skip(self))]
    pub async fn set_external_preference(
        &self,
        payment_intent_id: Uuid,
        preference_id: &str,
    ) -> Result<(), ServiceError> {
        let intent = PaymentIntent::find_by_id(payment_intent_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment intent {} not found", payment_intent_id))
            })?;

        let mut active: payment_intent::ActiveModel = intent.into();
        active.external_preference_id = Set(Some(preference_id.to_string()));
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Removes the order and its children. Compensation only; an order
    /// that produced a payable session is never deleted.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        OrderItem::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&*self.db)
            .await?;
        PaymentIntent::delete_many()
            .filter(payment_intent::Column::OrderId.eq(order_id))
            .exec(&*self.db)
            .await?;
        Order::delete_many()
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;
        info!(order_id = %order_id, "Order deleted during compensation");
        Ok(())
    }
}
