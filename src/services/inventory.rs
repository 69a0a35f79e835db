//! Stock store: availability reads, the authoritative atomic reservation,
//! and the best-effort release used by compensation.

use crate::{
    entities::{
        stock_level,
        stock_reservation::{self, ReservationStatus},
        StockLevel, StockReservation,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Required quantity per base product for one checkout request. BTreeMap
/// so reservations always walk products in id order; concurrent
/// checkouts touching overlapping products cannot deadlock on row locks.
pub type StockRequirements = BTreeMap<i64, i64>;

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Current availability per product. Products without a stock row
    /// report zero.
    #[instrument(skip(self))]
    pub async fn get_available(
        &self,
        product_ids: &[i64],
    ) -> Result<HashMap<i64, i64>, ServiceError> {
        let rows = StockLevel::find()
            .filter(stock_level::Column::ProductId.is_in(product_ids.iter().copied()))
            .all(&*self.db)
            .await?;

        let mut available: HashMap<i64, i64> =
            product_ids.iter().map(|id| (*id, 0)).collect();
        for row in rows {
            available.insert(row.product_id, row.available());
        }
        Ok(available)
    }

    /// Advisory availability pre-check, read-only. Fails fast with the
    /// first shortfall before any pricing or persistence work; the
    /// authoritative check is `reserve_for_order`.
    #[instrument(skip(self, requirements))]
    pub async fn check_available(
        &self,
        requirements: &StockRequirements,
    ) -> Result<(), ServiceError> {
        let ids: Vec<i64> = requirements.keys().copied().collect();
        let available = self.get_available(&ids).await?;

        for (product_id, required) in requirements {
            let has = available.get(product_id).copied().unwrap_or(0);
            if has < *required {
                return Err(ServiceError::InsufficientStock {
                    product_id: *product_id,
                    available: has,
                    required: *required,
                });
            }
        }
        Ok(())
    }

    /// Atomically reserves the full requirement set for an order.
    ///
    /// Each product is reserved with a single conditional UPDATE carrying
    /// an availability floor, so two concurrent reservations can never
    /// both succeed beyond available quantity; the surrounding
    /// transaction rolls everything back when any product falls short.
    #[instrument(skip(self, requirements))]
    pub async fn reserve_for_order(
        &self,
        order_id: Uuid,
        requirements: &StockRequirements,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        for (product_id, quantity) in requirements {
            let result = StockLevel::update_many()
                .col_expr(
                    stock_level::Column::Reserved,
                    Expr::col(stock_level::Column::Reserved).add(*quantity),
                )
                .filter(stock_level::Column::ProductId.eq(*product_id))
                .filter(
                    Expr::expr(
                        Expr::col(stock_level::Column::OnHand)
                            .sub(Expr::col(stock_level::Column::Reserved)),
                    )
                    .gte(*quantity),
                )
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                txn.rollback().await?;
                warn!(
                    order_id = %order_id,
                    product_id = %product_id,
                    required = %quantity,
                    "Reservation rejected; stock floor reached"
                );
                return Err(ServiceError::OutOfStock);
            }

            stock_reservation::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(*product_id),
                quantity: Set(*quantity),
                status: Set(ReservationStatus::Reserved),
                reason: Set(None),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::StockReserved {
                order_id,
                products: requirements.len(),
            })
            .await;

        info!(order_id = %order_id, products = requirements.len(), "Stock reserved");
        Ok(())
    }

    /// Releases everything still reserved under an order. Idempotent per
    /// ledger row; returns how many rows were released.
    #[instrument(skip(self))]
    pub async fn release_for_order(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<u64, ServiceError> {
        let reservations = StockReservation::find()
            .filter(stock_reservation::Column::OrderId.eq(order_id))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Reserved))
            .all(&*self.db)
            .await?;

        if reservations.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin().await?;
        let mut released = 0u64;

        for reservation in reservations {
            StockLevel::update_many()
                .col_expr(
                    stock_level::Column::Reserved,
                    Expr::col(stock_level::Column::Reserved).sub(reservation.quantity),
                )
                .filter(stock_level::Column::ProductId.eq(reservation.product_id))
                .exec(&txn)
                .await?;

            let mut ledger: stock_reservation::ActiveModel = reservation.into();
            ledger.status = Set(ReservationStatus::Released);
            ledger.reason = Set(Some(reason.to_string()));
            ledger.updated_at = Set(Some(Utc::now()));
            ledger.update(&txn).await?;

            released += 1;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::StockReleased {
                order_id,
                reason: reason.to_string(),
            })
            .await;

        info!(order_id = %order_id, released = released, reason = %reason, "Stock released");
        Ok(released)
    }
}
