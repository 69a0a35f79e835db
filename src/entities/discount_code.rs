use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Discount code rule. At most one rule is applied per order.
///
/// `uses_count` is monotonically non-decreasing; the increment after a
/// successful checkout is best-effort and not serialized against
/// `max_uses`, so a code can be over-redeemed by a small margin under
/// heavy concurrency.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discount_codes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    #[sea_orm(unique)]
    pub code: String,
    pub kind: DiscountKind,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub value: Decimal,
    pub active: bool,
    #[sea_orm(nullable)]
    pub starts_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub ends_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable, column_type = "Decimal(Some((16, 4)))")]
    pub min_subtotal: Option<Decimal>,
    #[sea_orm(nullable)]
    pub max_uses: Option<i64>,
    pub uses_count: i64,
    pub scope: DiscountScope,
    #[sea_orm(nullable)]
    pub product_id: Option<i64>,
    #[sea_orm(nullable)]
    pub school_id: Option<i64>,
    pub currency: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::discount_redemption::Entity")]
    Redemptions,
}

impl Related<super::discount_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
pub enum DiscountKind {
    #[sea_orm(string_value = "percent")]
    Percent,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum DiscountScope {
    #[sea_orm(string_value = "all")]
    All,
    #[sea_orm(string_value = "product")]
    Product,
    #[sea_orm(string_value = "price_list")]
    PriceList,
    #[sea_orm(string_value = "school_product")]
    SchoolProduct,
}
