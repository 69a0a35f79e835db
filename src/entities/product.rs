use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog product entity. Read-only from the checkout pipeline's point of
/// view; administration of the catalog happens elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub title: String,
    #[sea_orm(nullable)]
    pub sale_code: Option<String>,
    pub visible: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::pack_component::Entity")]
    PackComponents,
    #[sea_orm(has_one = "super::stock_level::Entity")]
    StockLevel,
}

impl Related<super::pack_component::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PackComponents.def()
    }
}

impl Related<super::stock_level::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockLevel.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
