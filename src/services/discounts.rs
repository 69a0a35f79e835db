//! Discount engine: validates one discount code against the priced cart
//! and redistributes the reduction across the lines it is eligible for.
//!
//! Validation failures degrade to "no discount applied" with a message
//! surfaced to the caller; only the two school-scope violations abort
//! the checkout.

use crate::{
    entities::{
        discount_code::{self, DiscountKind, DiscountScope},
        discount_redemption, DiscountCode,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{round2, CheckoutLine},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// School affiliation of the buyer, as far as discounts care.
#[derive(Debug, Clone, Default)]
pub struct BuyerContext {
    pub buyer_id: Uuid,
    pub school_id: Option<i64>,
    pub school_code: Option<String>,
}

/// Summary of the rule that was applied, for the response payload and
/// redemption bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDiscount {
    pub id: i64,
    pub code: String,
    pub kind: DiscountKind,
    pub amount: Decimal,
}

/// Result of running the discount step. When `applied` is `None` the
/// lines pass through unchanged and `message` explains why.
#[derive(Debug, Clone)]
pub struct DiscountOutcome {
    pub lines: Vec<CheckoutLine>,
    pub discount_total: Decimal,
    pub applied: Option<AppliedDiscount>,
    pub message: Option<String>,
}

impl DiscountOutcome {
    fn unapplied(lines: Vec<CheckoutLine>, message: impl Into<String>) -> Self {
        Self {
            lines,
            discount_total: Decimal::ZERO,
            applied: None,
            message: Some(message.into()),
        }
    }
}

/// Uppercases and trims a raw code as typed by the buyer.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[derive(Clone)]
pub struct DiscountService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl DiscountService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Looks the code up and evaluates it against the priced cart.
    #[instrument(skip(self, buyer, lines))]
    pub async fn apply(
        &self,
        normalized_code: &str,
        buyer: &BuyerContext,
        currency: &str,
        lines: Vec<CheckoutLine>,
        subtotal: Decimal,
    ) -> Result<DiscountOutcome, ServiceError> {
        let rule = DiscountCode::find()
            .filter(discount_code::Column::Code.eq(normalized_code))
            .one(&*self.db)
            .await?;

        match rule {
            None => Ok(DiscountOutcome::unapplied(
                lines,
                "Discount code not found",
            )),
            Some(rule) => evaluate(&rule, buyer, currency, lines, subtotal, Utc::now()),
        }
    }

    /// Best-effort bookkeeping after a successful checkout: bumps the
    /// usage counter and records the redemption. Failures are logged by
    /// the caller and never roll back the checkout. The increment is not
    /// serialized against `max_uses`; over-redemption by a small margin
    /// under contention is an accepted race.
    pub async fn record_redemption(
        &self,
        discount_id: i64,
        order_id: Uuid,
        buyer_id: Uuid,
        amount: Decimal,
    ) -> Result<(), ServiceError> {
        DiscountCode::update_many()
            .col_expr(
                discount_code::Column::UsesCount,
                Expr::col(discount_code::Column::UsesCount).add(1),
            )
            .filter(discount_code::Column::Id.eq(discount_id))
            .exec(&*self.db)
            .await?;

        discount_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            discount_id: Set(discount_id),
            order_id: Set(order_id),
            buyer_id: Set(buyer_id),
            amount: Set(amount),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender
            .send_or_log(Event::DiscountRedeemed {
                discount_id,
                order_id,
                amount,
            })
            .await;

        Ok(())
    }
}

/// Pure evaluation of one rule against the priced cart.
///
/// First failing condition wins. Soft failures return an unapplied
/// outcome with a message; the school-scope violations are hard errors.
pub fn evaluate(
    rule: &discount_code::Model,
    buyer: &BuyerContext,
    currency: &str,
    lines: Vec<CheckoutLine>,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<DiscountOutcome, ServiceError> {
    if !rule.active {
        return Ok(DiscountOutcome::unapplied(
            lines,
            "Discount code is not active",
        ));
    }
    if let Some(starts_at) = rule.starts_at {
        if now < starts_at {
            return Ok(DiscountOutcome::unapplied(
                lines,
                "Discount code is not valid yet",
            ));
        }
    }
    if let Some(ends_at) = rule.ends_at {
        if now > ends_at {
            return Ok(DiscountOutcome::unapplied(
                lines,
                "Discount code has expired",
            ));
        }
    }
    if let Some(max_uses) = rule.max_uses {
        if rule.uses_count >= max_uses {
            return Ok(DiscountOutcome::unapplied(
                lines,
                "Discount code has reached its usage limit",
            ));
        }
    }
    if let Some(min_subtotal) = rule.min_subtotal {
        if subtotal < min_subtotal {
            return Ok(DiscountOutcome::unapplied(
                lines,
                format!("Order subtotal is below the minimum of {}", min_subtotal),
            ));
        }
    }
    if !rule.currency.eq_ignore_ascii_case(currency) {
        return Ok(DiscountOutcome::unapplied(
            lines,
            "Discount code is not valid for this currency",
        ));
    }

    let eligible = eligible_indices(rule, buyer, &lines)?;
    if eligible.is_empty() {
        return Ok(DiscountOutcome::unapplied(
            lines,
            "Discount code does not apply to any item in the cart",
        ));
    }

    let mut lines = lines;
    match rule.kind {
        DiscountKind::Percent => apply_percent(&mut lines, &eligible, rule.value),
        DiscountKind::Fixed => apply_fixed(&mut lines, &eligible, rule.value),
    }

    let new_subtotal = round2(
        lines
            .iter()
            .filter(|l| l.is_revenue())
            .map(|l| l.line_total)
            .sum(),
    );
    let discount_total = round2(subtotal - new_subtotal);

    Ok(DiscountOutcome {
        lines,
        discount_total,
        applied: Some(AppliedDiscount {
            id: rule.id,
            code: rule.code.clone(),
            kind: rule.kind,
            amount: discount_total,
        }),
        message: None,
    })
}

/// Indices of the revenue lines the rule may reduce.
///
/// Component lines are never eligible: they carry no revenue, only stock
/// attribution.
fn eligible_indices(
    rule: &discount_code::Model,
    buyer: &BuyerContext,
    lines: &[CheckoutLine],
) -> Result<Vec<usize>, ServiceError> {
    let revenue = |line: &CheckoutLine| line.is_revenue();

    match rule.scope {
        DiscountScope::All | DiscountScope::PriceList => Ok(lines
            .iter()
            .enumerate()
            .filter(|(_, l)| revenue(l))
            .map(|(i, _)| i)
            .collect()),
        DiscountScope::Product => Ok(lines
            .iter()
            .enumerate()
            .filter(|(_, l)| revenue(l) && l.base_product_id == rule.product_id)
            .map(|(i, _)| i)
            .collect()),
        DiscountScope::SchoolProduct => {
            let buyer_school = buyer
                .school_id
                .ok_or(ServiceError::SchoolRequiredForDiscount)?;
            if let Some(rule_school) = rule.school_id {
                if rule_school != buyer_school {
                    return Err(ServiceError::DiscountNotAllowedForSchool);
                }
            }
            // Compatibility constraint: school-scoped codes embed the
            // school slug as a dash-separated prefix.
            if let (Some(school_code), Some(prefix)) =
                (buyer.school_code.as_deref(), rule.code.split('-').next())
            {
                if rule.code.contains('-') && !prefix.eq_ignore_ascii_case(school_code) {
                    return Err(ServiceError::DiscountNotAllowedForSchool);
                }
            }
            Ok(lines
                .iter()
                .enumerate()
                .filter(|(_, l)| revenue(l) && l.base_product_id == rule.product_id)
                .map(|(i, _)| i)
                .collect())
        }
    }
}

/// Percent reduction per eligible line, value clamped to [0, 100].
fn apply_percent(lines: &mut [CheckoutLine], eligible: &[usize], value: Decimal) {
    let percent = value.clamp(Decimal::ZERO, Decimal::from(100));
    let factor = Decimal::ONE - percent / Decimal::from(100);

    for &i in eligible {
        let line = &mut lines[i];
        line.unit_price = round2(line.unit_list_price * factor);
        line.line_total = round2(line.unit_price * Decimal::from(line.quantity));
    }
}

/// Distributes a fixed total amount across eligible lines in order.
///
/// `remaining` decreases by the reduction each line actually realizes
/// after per-unit rounding, so compounding rounding error can never
/// over-discount the cart. Stops when the amount is exhausted.
fn apply_fixed(lines: &mut [CheckoutLine], eligible: &[usize], value: Decimal) {
    let mut remaining = round2(value.max(Decimal::ZERO));

    for &i in eligible {
        if remaining <= Decimal::ZERO {
            break;
        }
        let line = &mut lines[i];
        let quantity = Decimal::from(line.quantity);
        let max_absorbable = round2(line.unit_list_price * quantity);
        if max_absorbable <= Decimal::ZERO {
            continue;
        }

        let take = remaining.min(max_absorbable);
        let per_unit = round2(take / quantity);
        let new_unit = round2((line.unit_list_price - per_unit).max(Decimal::ZERO));
        let realized = round2((line.unit_list_price - new_unit) * quantity);

        line.unit_price = new_unit;
        line.line_total = round2(new_unit * quantity);
        remaining = round2(remaining - realized);
    }
}

/// Logs a bookkeeping failure without propagating it.
pub fn log_redemption_failure(code: &str, err: &ServiceError) {
    warn!(
        code = %code,
        error = %err,
        "Discount usage bookkeeping failed; continuing checkout"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order_item::LineKind;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn product_line(product_id: i64, unit: Decimal, quantity: i64) -> CheckoutLine {
        CheckoutLine {
            kind: LineKind::Product,
            base_product_id: Some(product_id),
            pack_id: None,
            title: format!("Product {}", product_id),
            sale_code: None,
            quantity,
            unit_list_price: unit,
            unit_price: unit,
            line_total: round2(unit * Decimal::from(quantity)),
        }
    }

    fn component_line(product_id: i64, quantity: i64) -> CheckoutLine {
        CheckoutLine {
            kind: LineKind::PackComponent,
            base_product_id: Some(product_id),
            pack_id: Some(99),
            title: format!("Component {}", product_id),
            sale_code: None,
            quantity,
            unit_list_price: Decimal::ZERO,
            unit_price: Decimal::ZERO,
            line_total: Decimal::ZERO,
        }
    }

    fn subtotal_of(lines: &[CheckoutLine]) -> Decimal {
        round2(
            lines
                .iter()
                .filter(|l| l.is_revenue())
                .map(|l| l.line_total)
                .sum(),
        )
    }

    fn rule(kind: DiscountKind, value: Decimal, scope: DiscountScope) -> discount_code::Model {
        discount_code::Model {
            id: 1,
            code: "SAVE".to_string(),
            kind,
            value,
            active: true,
            starts_at: None,
            ends_at: None,
            min_subtotal: None,
            max_uses: None,
            uses_count: 0,
            scope,
            product_id: None,
            school_id: None,
            currency: "PEN".to_string(),
        }
    }

    fn buyer() -> BuyerContext {
        BuyerContext {
            buyer_id: Uuid::new_v4(),
            school_id: None,
            school_code: None,
        }
    }

    #[test]
    fn percent_discount_over_all_lines() {
        let lines = vec![product_line(1, dec!(50.00), 2)];
        let subtotal = subtotal_of(&lines);
        let rule = rule(DiscountKind::Percent, dec!(10), DiscountScope::All);

        let outcome = evaluate(&rule, &buyer(), "PEN", lines, subtotal, Utc::now()).unwrap();
        assert_eq!(outcome.discount_total, dec!(10.00));
        assert_eq!(outcome.lines[0].unit_price, dec!(45.00));
        assert_eq!(outcome.applied.as_ref().unwrap().amount, dec!(10.00));
        assert!(outcome.message.is_none());
    }

    #[test]
    fn percent_is_clamped_to_hundred() {
        let lines = vec![product_line(1, dec!(20.00), 1)];
        let subtotal = subtotal_of(&lines);
        let rule = rule(DiscountKind::Percent, dec!(250), DiscountScope::All);

        let outcome = evaluate(&rule, &buyer(), "PEN", lines, subtotal, Utc::now()).unwrap();
        assert_eq!(outcome.lines[0].unit_price, Decimal::ZERO);
        assert_eq!(outcome.discount_total, dec!(20.00));
    }

    #[test]
    fn fixed_discount_is_a_total_not_per_line() {
        let lines = vec![
            product_line(1, dec!(30.00), 1),
            product_line(2, dec!(30.00), 1),
        ];
        let subtotal = subtotal_of(&lines);
        let rule = rule(DiscountKind::Fixed, dec!(40.00), DiscountScope::All);

        let outcome = evaluate(&rule, &buyer(), "PEN", lines, subtotal, Utc::now()).unwrap();
        // First line absorbs 30.00, second the remaining 10.00.
        assert_eq!(outcome.lines[0].unit_price, Decimal::ZERO);
        assert_eq!(outcome.lines[1].unit_price, dec!(20.00));
        assert_eq!(outcome.discount_total, dec!(40.00));
    }

    #[test]
    fn fixed_discount_never_exceeds_eligible_subtotal() {
        let lines = vec![product_line(1, dec!(30.00), 1)];
        let subtotal = subtotal_of(&lines);
        let rule = rule(DiscountKind::Fixed, dec!(50.00), DiscountScope::All);

        let outcome = evaluate(&rule, &buyer(), "PEN", lines, subtotal, Utc::now()).unwrap();
        assert_eq!(outcome.discount_total, dec!(30.00));
        assert_eq!(subtotal - outcome.discount_total, Decimal::ZERO);
    }

    #[test]
    fn fixed_discount_tracks_realized_reduction_across_rounding() {
        // 3 units at 9.99: a 10.00 discount is 3.33 per unit, realizing
        // 9.99; the remaining 0.01 moves to the next line instead of
        // being lost or double-counted.
        let lines = vec![
            product_line(1, dec!(9.99), 3),
            product_line(2, dec!(5.00), 1),
        ];
        let subtotal = subtotal_of(&lines);
        let rule = rule(DiscountKind::Fixed, dec!(10.00), DiscountScope::All);

        let outcome = evaluate(&rule, &buyer(), "PEN", lines, subtotal, Utc::now()).unwrap();
        assert_eq!(outcome.lines[0].unit_price, dec!(6.66));
        assert_eq!(outcome.lines[1].unit_price, dec!(4.99));
        assert_eq!(outcome.discount_total, dec!(10.00));
    }

    #[test]
    fn discount_amount_never_negative_and_unit_never_above_list() {
        let lines = vec![product_line(1, dec!(12.34), 5)];
        let subtotal = subtotal_of(&lines);
        for value in [dec!(0), dec!(33), dec!(100)] {
            let rule = rule(DiscountKind::Percent, value, DiscountScope::All);
            let outcome =
                evaluate(&rule, &buyer(), "PEN", lines.clone(), subtotal, Utc::now()).unwrap();
            for line in &outcome.lines {
                assert!(line.unit_price >= Decimal::ZERO);
                assert!(line.unit_price <= line.unit_list_price);
            }
            assert!(outcome.discount_total >= Decimal::ZERO);
            assert!(outcome.discount_total <= subtotal);
        }
    }

    #[test]
    fn product_scope_only_touches_matching_lines() {
        let lines = vec![
            product_line(1, dec!(10.00), 1),
            product_line(2, dec!(10.00), 1),
        ];
        let subtotal = subtotal_of(&lines);
        let mut rule = rule(DiscountKind::Percent, dec!(50), DiscountScope::Product);
        rule.product_id = Some(2);

        let outcome = evaluate(&rule, &buyer(), "PEN", lines, subtotal, Utc::now()).unwrap();
        assert_eq!(outcome.lines[0].unit_price, dec!(10.00));
        assert_eq!(outcome.lines[1].unit_price, dec!(5.00));
        assert_eq!(outcome.discount_total, dec!(5.00));
    }

    #[test]
    fn component_lines_are_never_eligible() {
        let lines = vec![component_line(1, 4), product_line(2, dec!(10.00), 1)];
        let subtotal = subtotal_of(&lines);
        let mut rule = rule(DiscountKind::Percent, dec!(50), DiscountScope::Product);
        rule.product_id = Some(1);

        let outcome = evaluate(&rule, &buyer(), "PEN", lines, subtotal, Utc::now()).unwrap();
        assert!(outcome.applied.is_none());
        assert!(outcome.message.is_some());
        assert_eq!(outcome.discount_total, Decimal::ZERO);
    }

    #[test]
    fn inactive_and_windowed_codes_degrade_with_message() {
        let lines = vec![product_line(1, dec!(10.00), 1)];
        let subtotal = subtotal_of(&lines);

        let mut inactive = rule(DiscountKind::Percent, dec!(10), DiscountScope::All);
        inactive.active = false;
        let outcome =
            evaluate(&inactive, &buyer(), "PEN", lines.clone(), subtotal, Utc::now()).unwrap();
        assert!(outcome.applied.is_none());
        assert_eq!(outcome.message.as_deref(), Some("Discount code is not active"));

        let mut expired = rule(DiscountKind::Percent, dec!(10), DiscountScope::All);
        expired.ends_at = Some(Utc::now() - chrono::Duration::days(1));
        let outcome =
            evaluate(&expired, &buyer(), "PEN", lines.clone(), subtotal, Utc::now()).unwrap();
        assert_eq!(outcome.message.as_deref(), Some("Discount code has expired"));

        let mut capped = rule(DiscountKind::Percent, dec!(10), DiscountScope::All);
        capped.max_uses = Some(5);
        capped.uses_count = 5;
        let outcome = evaluate(&capped, &buyer(), "PEN", lines, subtotal, Utc::now()).unwrap();
        assert_eq!(
            outcome.message.as_deref(),
            Some("Discount code has reached its usage limit")
        );
    }

    #[test]
    fn min_subtotal_and_currency_checks_degrade() {
        let lines = vec![product_line(1, dec!(10.00), 1)];
        let subtotal = subtotal_of(&lines);

        let mut min = rule(DiscountKind::Percent, dec!(10), DiscountScope::All);
        min.min_subtotal = Some(dec!(50.00));
        let outcome = evaluate(&min, &buyer(), "PEN", lines.clone(), subtotal, Utc::now()).unwrap();
        assert!(outcome.applied.is_none());

        let usd = rule(DiscountKind::Percent, dec!(10), DiscountScope::All);
        let outcome = evaluate(&usd, &buyer(), "USD", lines, subtotal, Utc::now()).unwrap();
        assert_eq!(
            outcome.message.as_deref(),
            Some("Discount code is not valid for this currency")
        );
    }

    #[test]
    fn school_scope_without_affiliation_is_a_hard_failure() {
        let lines = vec![product_line(1, dec!(10.00), 1)];
        let subtotal = subtotal_of(&lines);
        let mut school_rule = rule(DiscountKind::Percent, dec!(10), DiscountScope::SchoolProduct);
        school_rule.product_id = Some(1);
        school_rule.school_id = Some(44);

        assert_matches!(
            evaluate(&school_rule, &buyer(), "PEN", lines, subtotal, Utc::now()),
            Err(ServiceError::SchoolRequiredForDiscount)
        );
    }

    #[test]
    fn school_prefix_mismatch_is_a_hard_failure() {
        let lines = vec![product_line(1, dec!(10.00), 1)];
        let subtotal = subtotal_of(&lines);
        let mut school_rule = rule(DiscountKind::Percent, dec!(10), DiscountScope::SchoolProduct);
        school_rule.code = "LINC-BACK10".to_string();
        school_rule.product_id = Some(1);
        school_rule.school_id = Some(44);

        let wrong_school = BuyerContext {
            buyer_id: Uuid::new_v4(),
            school_id: Some(44),
            school_code: Some("NORTH".to_string()),
        };
        assert_matches!(
            evaluate(
                &school_rule,
                &wrong_school,
                "PEN",
                lines.clone(),
                subtotal,
                Utc::now()
            ),
            Err(ServiceError::DiscountNotAllowedForSchool)
        );

        let right_school = BuyerContext {
            buyer_id: Uuid::new_v4(),
            school_id: Some(44),
            school_code: Some("LINC".to_string()),
        };
        let outcome = evaluate(
            &school_rule,
            &right_school,
            "PEN",
            lines,
            subtotal,
            Utc::now(),
        )
        .unwrap();
        assert!(outcome.applied.is_some());
    }

    #[test]
    fn other_school_rule_is_rejected_even_with_matching_prefix() {
        let lines = vec![product_line(1, dec!(10.00), 1)];
        let subtotal = subtotal_of(&lines);
        let mut school_rule = rule(DiscountKind::Percent, dec!(10), DiscountScope::SchoolProduct);
        school_rule.code = "LINC-BACK10".to_string();
        school_rule.product_id = Some(1);
        school_rule.school_id = Some(44);

        let other = BuyerContext {
            buyer_id: Uuid::new_v4(),
            school_id: Some(45),
            school_code: Some("LINC".to_string()),
        };
        assert_matches!(
            evaluate(&school_rule, &other, "PEN", lines, subtotal, Utc::now()),
            Err(ServiceError::DiscountNotAllowedForSchool)
        );
    }

    #[test]
    fn code_normalization() {
        assert_eq!(normalize_code("  back10 "), "BACK10");
        assert_eq!(normalize_code("LINC-back10"), "LINC-BACK10");
    }
}
