//! Pricing engine: resolves unit list prices from the active price list
//! and turns cart lines into priced checkout lines.
//!
//! Money discipline: every amount is rounded to 2 decimals immediately
//! after each arithmetic step, never deferred, so per-line rounding can
//! not drift across the cart.

use crate::{
    entities::{
        order_item::LineKind,
        price_entry::{self, PriceScope},
        PriceEntry,
    },
    errors::ServiceError,
    services::{
        cart::{CartLineKind, CartLineRequest},
        catalog::CatalogSnapshot,
    },
};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Rounds a money amount to 2 decimal places, away from zero on ties.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// One checkout line, discriminated by kind.
///
/// `Product` lines carry revenue and stock. `PackHeader` lines carry the
/// pack's revenue and no stock. `PackComponent` lines carry stock and
/// zero revenue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLine {
    pub kind: LineKind,
    pub base_product_id: Option<i64>,
    pub pack_id: Option<i64>,
    pub title: String,
    pub sale_code: Option<String>,
    pub quantity: i64,
    pub unit_list_price: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl CheckoutLine {
    /// Lines that contribute to the order subtotal.
    pub fn is_revenue(&self) -> bool {
        matches!(self.kind, LineKind::Product | LineKind::PackHeader)
    }

    /// Lines the stock engine may see: always keyed to a real product.
    pub fn is_reservable(&self) -> bool {
        matches!(self.kind, LineKind::Product | LineKind::PackComponent)
    }
}

/// Priced cart: all lines (revenue and stock-only) plus the subtotal over
/// the revenue lines.
#[derive(Debug, Clone)]
pub struct PricedCart {
    pub lines: Vec<CheckoutLine>,
    pub subtotal: Decimal,
}

/// Unit list prices keyed by catalog scope and item id.
pub type PriceIndex = HashMap<(PriceScope, i64), Decimal>;

#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Prices the whole cart against the active price list.
    #[instrument(skip(self, snapshot, lines))]
    pub async fn price_cart(
        &self,
        snapshot: &CatalogSnapshot,
        lines: &[CartLineRequest],
        currency: &str,
    ) -> Result<PricedCart, ServiceError> {
        let index = self.load_price_index(snapshot, currency).await?;
        price_lines(snapshot, lines, &index)
    }

    async fn load_price_index(
        &self,
        snapshot: &CatalogSnapshot,
        currency: &str,
    ) -> Result<PriceIndex, ServiceError> {
        let product_ids: Vec<i64> = snapshot.products.keys().copied().collect();
        let pack_ids: Vec<i64> = snapshot.packs.keys().copied().collect();

        let rows = PriceEntry::find()
            .filter(price_entry::Column::Active.eq(true))
            .filter(price_entry::Column::Currency.eq(currency))
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(price_entry::Column::Scope.eq(PriceScope::Product))
                            .add(price_entry::Column::ItemId.is_in(product_ids)),
                    )
                    .add(
                        Condition::all()
                            .add(price_entry::Column::Scope.eq(PriceScope::Pack))
                            .add(price_entry::Column::ItemId.is_in(pack_ids)),
                    ),
            )
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ((row.scope, row.item_id), row.unit_price))
            .collect())
    }
}

/// Pure pricing over an already-loaded snapshot and price index.
///
/// A product line becomes one revenue line. A pack line becomes one
/// header line at the pack's own unit price (packs are priced as a unit,
/// never by summing components) plus one zero-priced component line per
/// component, scaled by the cart quantity.
pub fn price_lines(
    snapshot: &CatalogSnapshot,
    lines: &[CartLineRequest],
    prices: &PriceIndex,
) -> Result<PricedCart, ServiceError> {
    let mut out = Vec::new();

    for line in lines {
        match line.kind {
            CartLineKind::Product => {
                let product = snapshot.products.get(&line.ref_id).ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", line.ref_id))
                })?;
                let unit = *prices
                    .get(&(PriceScope::Product, product.id))
                    .ok_or(ServiceError::NoPrice {
                        kind: "product",
                        item_id: product.id,
                    })?;
                let unit = round2(unit);
                out.push(CheckoutLine {
                    kind: LineKind::Product,
                    base_product_id: Some(product.id),
                    pack_id: None,
                    title: product.title.clone(),
                    sale_code: product.sale_code.clone(),
                    quantity: line.quantity,
                    unit_list_price: unit,
                    unit_price: unit,
                    line_total: round2(unit * Decimal::from(line.quantity)),
                });
            }
            CartLineKind::Pack => {
                let resolved = snapshot.packs.get(&line.ref_id).ok_or_else(|| {
                    ServiceError::NotFound(format!("Pack {} not found", line.ref_id))
                })?;
                let unit = *prices
                    .get(&(PriceScope::Pack, resolved.pack.id))
                    .ok_or(ServiceError::NoPrice {
                        kind: "pack",
                        item_id: resolved.pack.id,
                    })?;
                let unit = round2(unit);
                out.push(CheckoutLine {
                    kind: LineKind::PackHeader,
                    base_product_id: None,
                    pack_id: Some(resolved.pack.id),
                    title: resolved.pack.title.clone(),
                    sale_code: resolved.pack.sale_code.clone(),
                    quantity: line.quantity,
                    unit_list_price: unit,
                    unit_price: unit,
                    line_total: round2(unit * Decimal::from(line.quantity)),
                });

                for component in &resolved.components {
                    let product = snapshot
                        .products
                        .get(&component.product_id)
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Product {} not found",
                                component.product_id
                            ))
                        })?;
                    out.push(CheckoutLine {
                        kind: LineKind::PackComponent,
                        base_product_id: Some(product.id),
                        pack_id: Some(resolved.pack.id),
                        title: product.title.clone(),
                        sale_code: product.sale_code.clone(),
                        quantity: line.quantity * component.quantity,
                        unit_list_price: Decimal::ZERO,
                        unit_price: Decimal::ZERO,
                        line_total: Decimal::ZERO,
                    });
                }
            }
        }
    }

    let subtotal = round2(
        out.iter()
            .filter(|l| l.is_revenue())
            .map(|l| l.line_total)
            .sum(),
    );

    Ok(PricedCart {
        lines: out,
        subtotal,
    })
}
