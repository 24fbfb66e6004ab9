//! Pure price arithmetic. Everything here is in minor units and free of I/O,
//! so the checkout engine and the finaliser compute identical totals.

use rust_decimal::{
    prelude::{FromPrimitive, ToPrimitive},
    Decimal, RoundingStrategy,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    entities::{discount_code, DiscountType},
    services::payments::DisplayLine,
};

/// A cart line after the catalog replaced client values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedItem {
    pub product_id: i64,
    pub title: String,
    pub unit_price: i64,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
}

impl VerifiedItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }

    pub fn display_name(&self) -> String {
        match &self.variation {
            Some(variation) => format!("{} ({})", self.title, variation),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscountKind {
    /// Percentage points
    Percentage(f64),
    /// Currency units
    Fixed(f64),
    FreeDelivery,
}

impl DiscountKind {
    pub fn from_model(model: &discount_code::Model) -> Self {
        match model.discount_type {
            DiscountType::Percentage => Self::Percentage(model.value),
            DiscountType::Fixed => Self::Fixed(model.value),
            DiscountType::FreeDelivery => Self::FreeDelivery,
        }
    }
}

/// A discount code that passed every check, with its computed amount.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDiscount {
    pub id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
    pub amount: i64,
}

impl AppliedDiscount {
    pub fn free_delivery(&self) -> bool {
        matches!(self.kind, DiscountKind::FreeDelivery)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingRates {
    /// Discounted subtotal at which shipping becomes free
    pub free_threshold: i64,
    pub standard: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: i64,
    pub discount: i64,
    pub shipping: i64,
    pub gift_card: i64,
    pub total: i64,
}

impl Totals {
    pub fn new(subtotal: i64, discount: i64, shipping: i64, gift_card: i64) -> Self {
        Self {
            subtotal,
            discount,
            shipping,
            gift_card,
            total: subtotal - discount - gift_card + shipping,
        }
    }

    pub fn discounted_subtotal(&self) -> i64 {
        self.subtotal - self.discount
    }

    /// What a gift card could cover at most.
    pub fn payable_before_gift_card(&self) -> i64 {
        self.discounted_subtotal() + self.shipping
    }
}

/// Rounds half away from zero to whole minor units.
fn round_minor(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Currency units to minor units.
pub fn to_minor(amount: f64) -> i64 {
    Decimal::from_f64(amount)
        .map(|d| round_minor(d * Decimal::ONE_HUNDRED))
        .unwrap_or(0)
}

/// Minor units to currency units, for response bodies.
pub fn to_major(amount: i64) -> f64 {
    (Decimal::from(amount) / Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0)
}

pub fn subtotal(items: &[VerifiedItem]) -> i64 {
    items.iter().map(VerifiedItem::line_total).sum()
}

/// Monetary discount, capped at the subtotal.
pub fn discount_amount(kind: DiscountKind, subtotal: i64) -> i64 {
    let raw = match kind {
        DiscountKind::Percentage(points) => Decimal::from_f64(points)
            .map(|p| round_minor(Decimal::from(subtotal) * p / Decimal::ONE_HUNDRED))
            .unwrap_or(0),
        DiscountKind::Fixed(value) => to_minor(value),
        DiscountKind::FreeDelivery => 0,
    };
    raw.clamp(0, subtotal.max(0))
}

pub fn shipping_cost(subtotal: i64, discount: i64, free_delivery: bool, rates: ShippingRates) -> i64 {
    if free_delivery || subtotal - discount >= rates.free_threshold {
        0
    } else {
        rates.standard
    }
}

/// `min(requested or balance, balance, payable)`, never negative.
pub fn gift_card_deduction(requested: Option<i64>, balance: i64, payable: i64) -> i64 {
    requested
        .unwrap_or(balance)
        .min(balance)
        .min(payable)
        .max(0)
}

/// Processor-facing lines and shipping whose sum equals `totals.total`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redistribution {
    pub lines: Vec<DisplayLine>,
    pub shipping: i64,
}

impl Redistribution {
    pub fn sum(&self) -> i64 {
        self.lines
            .iter()
            .map(|l| l.unit_amount * i64::from(l.quantity))
            .sum::<i64>()
            + self.shipping
    }
}

/// `round(value * num / den)` half away from zero, for non-negative inputs.
fn scale(value: i64, num: i64, den: i64) -> i64 {
    if den <= 0 {
        return value;
    }
    let scaled = (2 * i128::from(value) * i128::from(num) + i128::from(den)) / (2 * i128::from(den));
    i64::try_from(scaled).unwrap_or(value)
}

/// Spreads discount and gift card over the lines so the processor shows the
/// amount we intend to charge. Shipping absorbs the gift card's share of it;
/// the lines absorb the rest. A line whose scaled total does not divide by its
/// quantity is shown as two lines one minor unit apart.
pub fn redistribute(items: &[VerifiedItem], totals: &Totals) -> Redistribution {
    let display = |item: &VerifiedItem, unit_amount: i64, quantity: i32| DisplayLine {
        product_id: item.product_id,
        name: item.display_name(),
        unit_amount,
        quantity,
        variation: item.variation.clone(),
    };

    if totals.discount == 0 && totals.gift_card == 0 {
        return Redistribution {
            lines: items
                .iter()
                .map(|item| display(item, item.unit_price, item.quantity))
                .collect(),
            shipping: totals.shipping,
        };
    }

    let payable = totals.payable_before_gift_card();
    let shipping = totals.shipping - scale(totals.shipping, totals.gift_card, payable);
    let target = (totals.total - shipping).max(0);

    let mut line_totals: Vec<i64> = items
        .iter()
        .map(|item| scale(item.line_total(), target, totals.subtotal))
        .collect();

    // largest lines absorb rounding residue first
    let mut residual = target - line_totals.iter().sum::<i64>();
    let mut order: Vec<usize> = (0..line_totals.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(line_totals[i]));
    for i in order {
        if residual == 0 {
            break;
        }
        let adjustment = residual.max(-line_totals[i]);
        line_totals[i] += adjustment;
        residual -= adjustment;
    }

    let mut lines = Vec::with_capacity(items.len());
    for (item, line_total) in items.iter().zip(line_totals) {
        let quantity = i64::from(item.quantity.max(1));
        let unit = line_total / quantity;
        // remainder is below quantity, so it fits in i32
        let extra = (line_total % quantity) as i32;
        let base = item.quantity.max(1) - extra;
        lines.push(display(item, unit, base));
        if extra > 0 {
            lines.push(display(item, unit + 1, extra));
        }
    }

    Redistribution { lines, shipping }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RATES: ShippingRates = ShippingRates {
        free_threshold: 2000,
        standard: 349,
    };

    fn item(id: i64, price: i64, quantity: i32) -> VerifiedItem {
        VerifiedItem {
            product_id: id,
            title: format!("Product {}", id),
            unit_price: price,
            quantity,
            variation: None,
        }
    }

    #[test]
    fn discount_kinds() {
        assert_eq!(discount_amount(DiscountKind::Percentage(10.0), 5000), 500);
        assert_eq!(discount_amount(DiscountKind::Percentage(12.5), 1999), 250);
        assert_eq!(discount_amount(DiscountKind::Fixed(5.0), 5000), 500);
        assert_eq!(discount_amount(DiscountKind::Fixed(80.0), 5000), 5000);
        assert_eq!(discount_amount(DiscountKind::FreeDelivery, 5000), 0);
    }

    #[test]
    fn shipping_threshold_uses_discounted_subtotal() {
        assert_eq!(shipping_cost(3198, 0, false, RATES), 0);
        assert_eq!(shipping_cost(2100, 200, false, RATES), 349);
        assert_eq!(shipping_cost(2000, 0, false, RATES), 0);
        assert_eq!(shipping_cost(500, 0, true, RATES), 0);
    }

    #[test]
    fn gift_card_never_exceeds_payable_or_balance() {
        assert_eq!(gift_card_deduction(None, 2000, 4500), 2000);
        assert_eq!(gift_card_deduction(Some(1000), 2000, 4500), 1000);
        assert_eq!(gift_card_deduction(None, 3000, 1800), 1800);
        assert_eq!(gift_card_deduction(Some(-5), 3000, 1800), 0);
    }

    #[test]
    fn plain_cart_is_displayed_unchanged() {
        let items = vec![item(1, 1599, 2)];
        let totals = Totals::new(3198, 0, 0, 0);
        let shown = redistribute(&items, &totals);
        assert_eq!(shown.lines[0].unit_amount, 1599);
        assert_eq!(shown.lines[0].quantity, 2);
        assert_eq!(shown.shipping, 0);
        assert_eq!(shown.sum(), 3198);
    }

    #[test]
    fn discount_and_gift_card_halve_the_lines() {
        // 50.00 cart, 10% off, 20.00 gift card
        let items = vec![item(1, 2500, 2)];
        let totals = Totals::new(5000, 500, 0, 2000);
        assert_eq!(totals.total, 2500);

        let shown = redistribute(&items, &totals);
        assert_eq!(shown.lines[0].unit_amount, 1250);
        assert_eq!(shown.sum(), 2500);
    }

    #[test]
    fn uneven_lines_are_split_by_unit_price() {
        let items = vec![item(1, 333, 3)];
        let totals = Totals::new(999, 100, 349, 0);
        let shown = redistribute(&items, &totals);
        assert_eq!(shown.sum(), totals.total);
        assert_eq!(shown.shipping, 349);
        assert_eq!(shown.lines.len(), 2);
        assert_eq!((shown.lines[0].unit_amount, shown.lines[0].quantity), (299, 1));
        assert_eq!((shown.lines[1].unit_amount, shown.lines[1].quantity), (300, 2));
    }

    #[test]
    fn money_conversions() {
        assert_eq!(to_minor(15.99), 1599);
        assert_eq!(to_minor(0.005), 1);
        assert_eq!(to_major(1599), 15.99);
    }

    proptest! {
        #[test]
        fn redistribution_always_sums_to_total(
            prices in proptest::collection::vec((1i64..=1_000_000, 1i32..=99), 1..6),
            percent in 0u32..=100,
            gift in 0i64..=200_000,
            with_shipping in any::<bool>(),
        ) {
            let items: Vec<_> = prices
                .iter()
                .enumerate()
                .map(|(i, (price, qty))| item(i as i64 + 1, *price, *qty))
                .collect();
            let sub = subtotal(&items);
            let discount = discount_amount(DiscountKind::Percentage(f64::from(percent)), sub);
            let shipping = if with_shipping { 349 } else { 0 };
            let gift = gift_card_deduction(Some(gift), gift, sub - discount + shipping);
            let totals = Totals::new(sub, discount, shipping, gift);

            prop_assert!(discount <= sub);
            prop_assert!(totals.total >= 0);

            let shown = redistribute(&items, &totals);
            prop_assert!(shown.lines.iter().all(|l| l.unit_amount >= 0));
            prop_assert!(shown.shipping >= 0 && shown.shipping <= shipping);
            prop_assert_eq!(shown.sum(), totals.total);
        }
    }
}
