use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order line.
///
/// Three kinds share the table. `Product` lines carry a base product and
/// real prices. `PackComponent` lines carry a base product with prices
/// forced to zero; they exist only so stock accounting can attribute
/// consumption. `PackHeader` lines carry the pack's sale price and a null
/// base product, and are inserted only after reservation succeeds so the
/// stock engine never sees them.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub kind: LineKind,
    #[sea_orm(nullable)]
    pub base_product_id: Option<i64>,
    #[sea_orm(nullable)]
    pub pack_id: Option<i64>,
    pub title: String,
    #[sea_orm(nullable)]
    pub sale_code: Option<String>,
    pub quantity: i64,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_list_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub line_total: Decimal,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Discriminated line kind. Replaces nullable-field branching so a
/// zero-priced component line can never be treated as revenue, nor a
/// header line as stock-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum LineKind {
    #[sea_orm(string_value = "product")]
    Product,
    #[sea_orm(string_value = "pack_header")]
    PackHeader,
    #[sea_orm(string_value = "pack_component")]
    PackComponent,
}
