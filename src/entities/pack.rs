use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Fixed-composition supply pack sold as a single catalog unit.
///
/// A sellable pack always has at least one component row; resolution fails
/// for component-less packs before any pricing happens.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "packs")]
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
    Components,
}

impl Related<super::pack_component::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Components.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
