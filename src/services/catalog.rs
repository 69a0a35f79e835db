//! Catalog resolution for a normalized cart: loads every referenced pack
//! with its components plus the union of directly-requested and
//! component products, and enforces visibility.

use crate::{
    entities::{pack, pack_component, product, Pack, Product},
    errors::ServiceError,
    services::cart::{CartLineKind, CartLineRequest},
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::instrument;

/// A pack together with its component rows. Guaranteed non-empty.
#[derive(Debug, Clone)]
pub struct ResolvedPack {
    pub pack: pack::Model,
    pub components: Vec<pack_component::Model>,
}

/// Read-only snapshot of every catalog entry a cart touches.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub products: HashMap<i64, product::Model>,
    pub packs: HashMap<i64, ResolvedPack>,
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves every id the cart references, directly or through pack
    /// expansion.
    ///
    /// Guards against selling unpublished or incomplete catalog entries
    /// regardless of how a client constructed the request: an id that
    /// does not resolve or a pack with zero components is `NOT_FOUND`;
    /// a resolved entry that is not visible fails with the matching
    /// `INVALID_*_IN_CART` error.
    #[instrument(skip(self, lines))]
    pub async fn resolve(
        &self,
        lines: &[CartLineRequest],
    ) -> Result<CatalogSnapshot, ServiceError> {
        let pack_ids: BTreeSet<i64> = lines
            .iter()
            .filter(|l| l.kind == CartLineKind::Pack)
            .map(|l| l.ref_id)
            .collect();
        let direct_product_ids: BTreeSet<i64> = lines
            .iter()
            .filter(|l| l.kind == CartLineKind::Product)
            .map(|l| l.ref_id)
            .collect();

        let mut packs = HashMap::new();
        if !pack_ids.is_empty() {
            let rows = Pack::find()
                .filter(pack::Column::Id.is_in(pack_ids.iter().copied()))
                .find_with_related(pack_component::Entity)
                .all(&*self.db)
                .await?;

            for (pack_model, components) in rows {
                if !pack_model.visible {
                    return Err(ServiceError::InvalidPacksInCart);
                }
                if components.is_empty() {
                    return Err(ServiceError::NotFound(format!(
                        "Pack {} has no components",
                        pack_model.id
                    )));
                }
                packs.insert(pack_model.id, ResolvedPack {
                    pack: pack_model,
                    components,
                });
            }

            if let Some(missing) = pack_ids.iter().find(|id| !packs.contains_key(id)) {
                return Err(ServiceError::NotFound(format!("Pack {} not found", missing)));
            }
        }

        let mut product_ids = direct_product_ids.clone();
        for resolved in packs.values() {
            for component in &resolved.components {
                product_ids.insert(component.product_id);
            }
        }

        let mut products = HashMap::new();
        if !product_ids.is_empty() {
            let rows = Product::find()
                .filter(product::Column::Id.is_in(product_ids.iter().copied()))
                .all(&*self.db)
                .await?;

            for model in rows {
                if !model.visible {
                    return Err(ServiceError::InvalidProductsInCart);
                }
                products.insert(model.id, model);
            }

            if let Some(missing) = product_ids.iter().find(|id| !products.contains_key(id)) {
                return Err(ServiceError::NotFound(format!(
                    "Product {} not found",
                    missing
                )));
            }
        }

        Ok(CatalogSnapshot { products, packs })
    }
}
