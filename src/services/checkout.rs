//! Checkout pipeline: normalize, resolve, pre-check, price, discount,
//! then reserve/persist/charge as a saga with explicit compensation.
//!
//! Each persistence step from the order insert onward is its own local
//! commit. There is no cross-step transaction spanning the database and
//! the payment gateway; a failure after the order row exists triggers
//! best-effort compensation in reverse order (release stock, delete the
//! order) that re-surfaces the original error.

use crate::{
    config::PaymentConfig,
    entities::{buyer, school, Buyer, School},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::{self, CartLineKind, CartLineRequest, RawCartItem},
        catalog::{CatalogService, CatalogSnapshot},
        discounts::{self, AppliedDiscount, BuyerContext, DiscountService},
        inventory::{InventoryService, StockRequirements},
        orders::{NewOrder, OrderService},
        payments::{
            BackUrls, PaymentGateway, PaymentItem, PaymentMetadata, PaymentSession,
            PaymentSessionRequest,
        },
        pricing::{round2, CheckoutLine, PricingService},
    },
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

/// Shipping details from the request; any missing field falls back to
/// the buyer profile.
#[derive(Debug, Clone, Default)]
pub struct ShippingInput {
    pub address: Option<String>,
    pub reference: Option<String>,
    pub district: Option<String>,
    pub notes: Option<String>,
}

/// Checkout request as the service consumes it.
#[derive(Debug, Clone)]
pub struct CheckoutInput {
    pub items: Vec<RawCartItem>,
    pub shipping: ShippingInput,
    pub discount_code: Option<String>,
    pub preview_only: bool,
}

/// Pricing summary returned by preview mode. No side effects occurred.
#[derive(Debug, Clone)]
pub struct PreviewSummary {
    pub normalized_code: Option<String>,
    pub applied: bool,
    pub message: Option<String>,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
}

/// A placed order with its payable session.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub order_number: String,
    pub payment_redirect_url: String,
    pub sandbox_redirect_url: Option<String>,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub applied_discount: Option<AppliedDiscount>,
    pub discount_message: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    Preview(PreviewSummary),
    Placed(Box<PlacedOrder>),
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    catalog: CatalogService,
    pricing: PricingService,
    discounts: DiscountService,
    inventory: InventoryService,
    orders: OrderService,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    currency: String,
    payment: PaymentConfig,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        currency: String,
        payment: PaymentConfig,
    ) -> Self {
        Self {
            catalog: CatalogService::new(db.clone()),
            pricing: PricingService::new(db.clone()),
            discounts: DiscountService::new(db.clone(), event_sender.clone()),
            inventory: InventoryService::new(db.clone(), event_sender.clone()),
            orders: OrderService::new(db.clone(), event_sender.clone()),
            db,
            gateway,
            event_sender,
            currency,
            payment,
        }
    }

    /// Runs the checkout pipeline for an authenticated user.
    #[instrument(skip(self, input))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        input: CheckoutInput,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let (buyer, school) = self.resolve_buyer(user_id).await?;
        let shipping_address = input
            .shipping
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .or_else(|| buyer.address.clone())
            .ok_or(ServiceError::AddressRequired)?;

        self.event_sender
            .send_or_log(Event::CheckoutStarted { buyer_id: buyer.id })
            .await;

        let lines = cart::normalize(&input.items)?;
        let snapshot = self.catalog.resolve(&lines).await?;

        let requirements = aggregate_stock_requirements(&lines, &snapshot);
        self.inventory.check_available(&requirements).await?;

        let priced = self
            .pricing
            .price_cart(&snapshot, &lines, &self.currency)
            .await?;
        let subtotal = priced.subtotal;

        let normalized_code = input
            .discount_code
            .as_deref()
            .map(discounts::normalize_code)
            .filter(|c| !c.is_empty());

        let (lines, discount_total, applied, discount_message) = match &normalized_code {
            Some(code) => {
                let context = BuyerContext {
                    buyer_id: buyer.id,
                    school_id: buyer.school_id,
                    school_code: school.as_ref().map(|s| s.code.clone()),
                };
                let outcome = self
                    .discounts
                    .apply(code, &context, &self.currency, priced.lines, subtotal)
                    .await?;
                (
                    outcome.lines,
                    outcome.discount_total,
                    outcome.applied,
                    outcome.message,
                )
            }
            None => (priced.lines, Decimal::ZERO, None, None),
        };

        let total = round2(subtotal - discount_total).max(Decimal::ZERO);

        if input.preview_only {
            return Ok(CheckoutOutcome::Preview(PreviewSummary {
                normalized_code,
                applied: applied.is_some(),
                message: discount_message,
                subtotal,
                discount_total,
                total,
            }));
        }

        let order = self
            .orders
            .insert_order(NewOrder {
                buyer_id: buyer.id,
                shipping_address,
                shipping_reference: input
                    .shipping
                    .reference
                    .clone()
                    .or_else(|| buyer.address_reference.clone()),
                shipping_district: input
                    .shipping
                    .district
                    .clone()
                    .or_else(|| buyer.district.clone()),
                shipping_notes: input.shipping.notes.clone(),
                currency: self.currency.clone(),
                subtotal,
                discount_total,
                total,
                discount_code: applied.as_ref().map(|a| a.code.clone()),
            })
            .await?;

        // Compensation boundary: everything below must undo the order on
        // failure without masking the failure itself.
        match self
            .finalize(&order, &lines, &requirements, &buyer, applied.clone())
            .await
        {
            Ok(session) => Ok(CheckoutOutcome::Placed(Box::new(PlacedOrder {
                order_id: order.id,
                order_number: order.order_number,
                payment_redirect_url: session.redirect_url,
                sandbox_redirect_url: session.sandbox_redirect_url,
                subtotal,
                discount_total,
                total,
                applied_discount: applied,
                discount_message,
            }))),
            Err(err) => {
                self.compensate(order.id, &err).await;
                Err(err)
            }
        }
    }

    /// Steps from line persistence through the gateway call, in the
    /// order the saga requires: stock is reserved before the payment
    /// session is requested, and the session exists before the caller
    /// sees a response.
    async fn finalize(
        &self,
        order: &crate::entities::order::Model,
        lines: &[CheckoutLine],
        requirements: &StockRequirements,
        buyer: &buyer::Model,
        applied: Option<AppliedDiscount>,
    ) -> Result<PaymentSession, ServiceError> {
        self.orders.insert_reservable_lines(order.id, lines).await?;
        self.inventory
            .reserve_for_order(order.id, requirements)
            .await?;

        self.orders.insert_header_lines(order.id, lines).await?;
        let intent = self
            .orders
            .create_payment_intent(order.id, &self.payment.provider, order.total, &self.currency)
            .await?;

        let session = self
            .gateway
            .create_payment_session(self.session_request(order, &intent, lines))
            .await?;
        self.orders
            .set_external_preference(intent.id, &session.id)
            .await?;

        self.event_sender
            .send_or_log(Event::PaymentSessionCreated {
                order_id: order.id,
                payment_intent_id: intent.id,
                preference_id: session.id.clone(),
            })
            .await;

        // Usage bookkeeping must never undo an otherwise-successful
        // checkout.
        if let Some(applied) = applied {
            if let Err(err) = self
                .discounts
                .record_redemption(applied.id, order.id, buyer.id, applied.amount)
                .await
            {
                discounts::log_redemption_failure(&applied.code, &err);
            }
        }

        Ok(session)
    }

    fn session_request(
        &self,
        order: &crate::entities::order::Model,
        intent: &crate::entities::payment_intent::Model,
        lines: &[CheckoutLine],
    ) -> PaymentSessionRequest {
        let items = lines
            .iter()
            .filter(|l| l.is_revenue())
            .map(|l| PaymentItem {
                title: l.title.clone(),
                quantity: l.quantity,
                unit_price: l.unit_price,
                currency_id: self.currency.clone(),
            })
            .collect();

        PaymentSessionRequest {
            items,
            external_reference: order.id.to_string(),
            notification_url: self.payment.notification_url.clone(),
            back_urls: BackUrls {
                success: self.payment.success_url.clone(),
                failure: self.payment.failure_url.clone(),
            },
            metadata: PaymentMetadata {
                order_id: order.id,
                payment_intent_id: intent.id,
            },
        }
    }

    /// Best-effort undo of everything `finalize` may have committed, in
    /// reverse order. A failed compensation step is logged and left to
    /// out-of-band reconciliation; it never replaces the original error.
    async fn compensate(&self, order_id: Uuid, cause: &ServiceError) {
        warn!(
            order_id = %order_id,
            cause = %cause.error_code(),
            "Checkout failed after order creation; compensating"
        );

        if let Err(release_err) = self
            .inventory
            .release_for_order(order_id, cause.error_code())
            .await
        {
            error!(
                order_id = %order_id,
                error = %release_err,
                "Failed to release stock during compensation"
            );
        }
        if let Err(delete_err) = self.orders.delete_order(order_id).await {
            error!(
                order_id = %order_id,
                error = %delete_err,
                "Failed to delete order during compensation"
            );
        }

        self.event_sender
            .send_or_log(Event::OrderCompensated {
                order_id,
                reason: cause.error_code().to_string(),
            })
            .await;
    }

    async fn resolve_buyer(
        &self,
        user_id: Uuid,
    ) -> Result<(buyer::Model, Option<school::Model>), ServiceError> {
        let buyer = Buyer::find()
            .filter(buyer::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::BuyerProfileRequired)?;

        let school = match buyer.school_id {
            Some(school_id) => School::find_by_id(school_id).one(&*self.db).await?,
            None => None,
        };

        Ok((buyer, school))
    }
}

/// Expands the cart into required quantity per base product.
///
/// Product lines contribute their own quantity; pack lines contribute
/// `line quantity x component quantity` per component. Contributions for
/// the same product sum across lines. The map is request-local, built
/// once and never shared.
pub fn aggregate_stock_requirements(
    lines: &[CartLineRequest],
    snapshot: &CatalogSnapshot,
) -> StockRequirements {
    let mut requirements = StockRequirements::new();

    for line in lines {
        match line.kind {
            CartLineKind::Product => {
                *requirements.entry(line.ref_id).or_insert(0) += line.quantity;
            }
            CartLineKind::Pack => {
                if let Some(resolved) = snapshot.packs.get(&line.ref_id) {
                    for component in &resolved.components {
                        *requirements.entry(component.product_id).or_insert(0) +=
                            line.quantity * component.quantity;
                    }
                }
            }
        }
    }

    requirements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{pack, pack_component};
    use crate::services::catalog::ResolvedPack;

    fn pack_snapshot() -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::default();
        snapshot.packs.insert(10, ResolvedPack {
            pack: pack::Model {
                id: 10,
                title: "Kit".to_string(),
                sale_code: None,
                visible: true,
            },
            components: vec![
                pack_component::Model {
                    id: 1,
                    pack_id: 10,
                    product_id: 1,
                    quantity: 1,
                },
                pack_component::Model {
                    id: 2,
                    pack_id: 10,
                    product_id: 2,
                    quantity: 2,
                },
            ],
        });
        snapshot
    }

    #[test]
    fn pack_expansion_scales_by_cart_quantity() {
        let lines = vec![CartLineRequest {
            kind: CartLineKind::Pack,
            ref_id: 10,
            quantity: 3,
        }];
        let requirements = aggregate_stock_requirements(&lines, &pack_snapshot());
        assert_eq!(requirements.get(&1), Some(&3));
        assert_eq!(requirements.get(&2), Some(&6));
    }

    #[test]
    fn direct_and_pack_contributions_sum() {
        let lines = vec![
            CartLineRequest {
                kind: CartLineKind::Pack,
                ref_id: 10,
                quantity: 1,
            },
            CartLineRequest {
                kind: CartLineKind::Product,
                ref_id: 2,
                quantity: 5,
            },
        ];
        let requirements = aggregate_stock_requirements(&lines, &pack_snapshot());
        assert_eq!(requirements.get(&1), Some(&1));
        // 2 from the pack plus 5 direct.
        assert_eq!(requirements.get(&2), Some(&7));
    }

    #[test]
    fn repeated_product_lines_sum() {
        let snapshot = CatalogSnapshot::default();
        let lines = vec![
            CartLineRequest {
                kind: CartLineKind::Product,
                ref_id: 4,
                quantity: 2,
            },
            CartLineRequest {
                kind: CartLineKind::Product,
                ref_id: 4,
                quantity: 3,
            },
        ];
        let requirements = aggregate_stock_requirements(&lines, &snapshot);
        assert_eq!(requirements.get(&4), Some(&5));
    }
}
