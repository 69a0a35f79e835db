//! Cart normalization: raw storefront line items into typed cart line
//! requests. Side-effect free.

use crate::errors::ServiceError;
use serde::Deserialize;

/// Raw cart entry as submitted by the storefront. Ids may arrive as JSON
/// numbers or numeric strings; older clients omit `type` and are
/// disambiguated by which id field is present.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCartItem {
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    #[serde(default, alias = "productId")]
    pub product_id: Option<serde_json::Value>,
    #[serde(default, alias = "packId")]
    pub pack_id: Option<serde_json::Value>,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartLineKind {
    Product,
    Pack,
}

/// Typed, request-scoped cart line. Quantity is always >= 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLineRequest {
    pub kind: CartLineKind,
    pub ref_id: i64,
    pub quantity: i64,
}

/// Parses raw items into an ordered list of cart line requests.
///
/// Entries without a resolvable numeric id are dropped; a missing
/// quantity defaults to 1 and anything below 1 is floored to 1. An empty
/// result is `EMPTY_CART`.
pub fn normalize(items: &[RawCartItem]) -> Result<Vec<CartLineRequest>, ServiceError> {
    let mut lines = Vec::with_capacity(items.len());

    for item in items {
        let quantity = item.quantity.unwrap_or(1).max(1);

        let kind = match item.item_type.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("pack") || t.eq_ignore_ascii_case("bundle") => {
                Some(CartLineKind::Pack)
            }
            Some(t) if t.eq_ignore_ascii_case("product") => Some(CartLineKind::Product),
            _ => {
                if item.pack_id.is_some() {
                    Some(CartLineKind::Pack)
                } else if item.product_id.is_some() {
                    Some(CartLineKind::Product)
                } else {
                    None
                }
            }
        };

        let ref_id = match kind {
            Some(CartLineKind::Pack) => item.pack_id.as_ref().and_then(coerce_id),
            Some(CartLineKind::Product) => item.product_id.as_ref().and_then(coerce_id),
            None => None,
        };

        if let (Some(kind), Some(ref_id)) = (kind, ref_id) {
            lines.push(CartLineRequest {
                kind,
                ref_id,
                quantity,
            });
        }
    }

    if lines.is_empty() {
        return Err(ServiceError::EmptyCart);
    }
    Ok(lines)
}

fn coerce_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().filter(|id| *id > 0),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok().filter(|id| *id > 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawCartItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn products_and_packs_are_typed() {
        let items = vec![
            raw(json!({"type": "PRODUCT", "product_id": 3, "quantity": 2})),
            raw(json!({"type": "PACK", "pack_id": 9})),
        ];
        let lines = normalize(&items).unwrap();
        assert_eq!(
            lines,
            vec![
                CartLineRequest {
                    kind: CartLineKind::Product,
                    ref_id: 3,
                    quantity: 2
                },
                CartLineRequest {
                    kind: CartLineKind::Pack,
                    ref_id: 9,
                    quantity: 1
                },
            ]
        );
    }

    #[test]
    fn kind_is_inferred_from_id_field() {
        let items = vec![
            raw(json!({"pack_id": "12", "quantity": 3})),
            raw(json!({"product_id": "7"})),
        ];
        let lines = normalize(&items).unwrap();
        assert_eq!(lines[0].kind, CartLineKind::Pack);
        assert_eq!(lines[0].ref_id, 12);
        assert_eq!(lines[1].kind, CartLineKind::Product);
    }

    #[test]
    fn quantity_is_floored_at_one() {
        let items = vec![raw(json!({"product_id": 1, "quantity": 0}))];
        assert_eq!(normalize(&items).unwrap()[0].quantity, 1);

        let items = vec![raw(json!({"product_id": 1, "quantity": -4}))];
        assert_eq!(normalize(&items).unwrap()[0].quantity, 1);
    }

    #[test]
    fn unresolvable_entries_are_dropped() {
        let items = vec![
            raw(json!({"product_id": "not-a-number"})),
            raw(json!({"quantity": 2})),
            raw(json!({"product_id": 5})),
        ];
        let lines = normalize(&items).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].ref_id, 5);
    }

    #[test]
    fn empty_result_is_empty_cart() {
        assert_matches!(normalize(&[]), Err(ServiceError::EmptyCart));

        let items = vec![raw(json!({"product_id": "x"}))];
        assert_matches!(normalize(&items), Err(ServiceError::EmptyCart));
    }

    #[test]
    fn camel_case_aliases_are_accepted() {
        let items = vec![raw(json!({"packId": 4, "quantity": 2}))];
        let lines = normalize(&items).unwrap();
        assert_eq!(lines[0].kind, CartLineKind::Pack);
        assert_eq!(lines[0].ref_id, 4);
    }
}
