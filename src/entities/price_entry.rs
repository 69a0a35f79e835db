use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Active price-list entry for a product or a pack.
///
/// Packs are priced as a unit here, never by summing their components.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "price_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub scope: PriceScope,
    pub item_id: i64,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    pub currency: String,
    pub active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Which catalog table a price entry points at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
pub enum PriceScope {
    #[sea_orm(string_value = "product")]
    Product,
    #[sea_orm(string_value = "pack")]
    Pack,
}
