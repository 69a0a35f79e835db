use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Institutional account buyers can be affiliated with.
///
/// `code` is the short uppercase slug school-scoped discount codes carry
/// as a prefix (`LINC-BACK10` for a school whose code is `LINC`).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schools")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub name: String,
    pub code: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::buyer::Entity")]
    Buyers,
}

impl Related<super::buyer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Buyers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
