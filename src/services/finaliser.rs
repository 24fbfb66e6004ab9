//! Turns a captured payment into exactly one `paid` order.
//!
//! Deliveries may repeat and race each other; `payment_id` is the idempotency
//! key. Once the order row exists every later step is best effort, because
//! the customer's money has already moved.

use sea_orm::{ActiveEnum, DatabaseConnection};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::{
    entities::{gift_card, order},
    errors::{classify_db_error, DbErrorClass, ServiceError},
    middleware_helpers::client::ClientInfo,
    services::{
        audit::{AnomalyKind, AuditService},
        checkout::{
            load_products,
            metadata::CheckoutMetadata,
            price_items,
            pricing::{shipping_cost, subtotal, ShippingRates, Totals},
        },
        discounts::DiscountService,
        gift_cards::GiftCardService,
        orders::{InsertOutcome, NewOrder, OrderService},
        payments::{CardProcessor, PaymentConfirmation, WalletProcessor},
        stock::StockService,
    },
};

/// Captured minus expected beyond this many minor units flags the order.
pub const AMOUNT_TOLERANCE: i64 = 2;
const GIFT_CARD_CAS_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub enum FinaliseOutcome {
    Created(order::Model),
    Duplicate(order::Model),
}

impl FinaliseOutcome {
    pub fn order(&self) -> &order::Model {
        match self {
            Self::Created(order) | Self::Duplicate(order) => order,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Recomputes totals from catalog prices and the amounts the checkout
/// engine stashed in metadata.
pub fn canonical_totals(
    items_subtotal: i64,
    metadata: &CheckoutMetadata,
    rates: ShippingRates,
) -> Totals {
    let discount = metadata.discount_amount.clamp(0, items_subtotal.max(0));
    let shipping = shipping_cost(items_subtotal, discount, metadata.free_delivery, rates);
    let gift_card = metadata
        .gift_card_amount
        .clamp(0, (items_subtotal - discount + shipping).max(0));
    Totals::new(items_subtotal, discount, shipping, gift_card)
}

/// `[REVIEW]` note when the captured amount is off by more than the tolerance.
pub fn review_note(captured: Option<i64>, expected: i64, currency: &str) -> Option<String> {
    let captured = captured?;
    ((captured - expected).abs() > AMOUNT_TOLERANCE).then(|| {
        format!(
            "[REVIEW] Captured {} {} but expected {} {}",
            captured,
            currency.to_uppercase(),
            expected,
            currency.to_uppercase()
        )
    })
}

#[derive(Clone)]
pub struct PaymentFinaliser {
    db: Arc<DatabaseConnection>,
    orders: OrderService,
    discounts: DiscountService,
    gift_cards: GiftCardService,
    stock: StockService,
    audit: AuditService,
    card: Arc<dyn CardProcessor>,
    wallet: Arc<dyn WalletProcessor>,
    currency: String,
    rates: ShippingRates,
}

impl PaymentFinaliser {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: OrderService,
        discounts: DiscountService,
        gift_cards: GiftCardService,
        stock: StockService,
        audit: AuditService,
        card: Arc<dyn CardProcessor>,
        wallet: Arc<dyn WalletProcessor>,
        currency: impl Into<String>,
        rates: ShippingRates,
    ) -> Self {
        Self {
            db,
            orders,
            discounts,
            gift_cards,
            stock,
            audit,
            card,
            wallet,
            currency: currency.into(),
            rates,
        }
    }

    /// Captures an approved wallet order and finalises it.
    #[instrument(skip(self))]
    pub async fn capture_wallet(&self, wallet_order_id: &str) -> Result<FinaliseOutcome, ServiceError> {
        let capture = self.wallet.capture_wallet_order(wallet_order_id).await?;
        if !capture.is_completed() {
            warn!(status = %capture.status, "wallet capture not completed");
            return Err(ServiceError::BadRequest("Payment was not completed".into()));
        }
        self.finalise(PaymentConfirmation::from_wallet_capture(capture))
            .await
    }

    /// Fills gaps in a push payload from the processor's own record.
    async fn complete(&self, mut confirmation: PaymentConfirmation) -> Result<PaymentConfirmation, ServiceError> {
        if !confirmation.needs_session_lookup() {
            return Ok(confirmation);
        }
        let Some(session_id) = confirmation.session_id.clone() else {
            return Ok(confirmation);
        };

        let details = self.card.retrieve_card_session(&session_id).await?;
        let fetched = PaymentConfirmation::from_card_session(details);
        confirmation.metadata = confirmation.metadata.or(fetched.metadata);
        confirmation.customer_email = confirmation.customer_email.or(fetched.customer_email);
        confirmation.customer_name = confirmation.customer_name.or(fetched.customer_name);
        confirmation.customer_phone = confirmation.customer_phone.or(fetched.customer_phone);
        confirmation.shipping_address = confirmation.shipping_address.or(fetched.shipping_address);
        confirmation.amount_captured = confirmation.amount_captured.or(fetched.amount_captured);
        Ok(confirmation)
    }

    /// The card the checkout applied. A card that cannot be found still
    /// leaves the paid total discounted, so that case is flagged.
    async fn resolve_gift_card(
        &self,
        metadata: &CheckoutMetadata,
        payment_id: &str,
    ) -> Option<gift_card::Model> {
        let found = match (metadata.gift_card_id, metadata.gift_card_code.as_deref()) {
            (Some(id), _) => self.gift_cards.find_by_id(id).await,
            (None, Some(code)) => self.gift_cards.find_by_code(code).await,
            (None, None) => return None,
        };
        let reason = match found {
            Ok(Some(card)) => return Some(card),
            Ok(None) => "not_found",
            Err(e) => {
                error!(severity = "CRITICAL", error = %e, "gift card lookup failed during finalisation");
                "lookup_failed"
            }
        };

        warn!(
            target: "security",
            payment_id,
            gift_card_id = ?metadata.gift_card_id,
            amount = metadata.gift_card_amount,
            reason,
            "paid checkout references a gift card that could not be resolved"
        );
        self.audit
            .log_anomaly(
                AnomalyKind::UnresolvedGiftCard,
                json!({
                    "paymentId": payment_id,
                    "giftCardId": metadata.gift_card_id,
                    "amount": metadata.gift_card_amount,
                    "reason": reason,
                }),
                &ClientInfo::default(),
            )
            .await;
        None
    }

    #[instrument(skip(self, confirmation), fields(payment_id = %confirmation.payment_id, method = %confirmation.method.to_value()))]
    pub async fn finalise(&self, confirmation: PaymentConfirmation) -> Result<FinaliseOutcome, ServiceError> {
        if let Some(existing) = self.orders.find_by_payment_id(&confirmation.payment_id).await? {
            metrics::counter!("storefront.webhooks.duplicates", 1);
            info!(order_number = %existing.order_number, "payment already finalised");
            return Ok(FinaliseOutcome::Duplicate(existing));
        }

        let confirmation = self.complete(confirmation).await?;
        let metadata = confirmation.metadata.clone().ok_or_else(|| {
            error!(severity = "CRITICAL", payment_id = %confirmation.payment_id, "payment carries no checkout metadata");
            ServiceError::BadRequest("Payment metadata is missing".into())
        })?;
        let email = confirmation
            .customer_email
            .clone()
            .or_else(|| metadata.customer_email.clone())
            .ok_or_else(|| {
                error!(severity = "CRITICAL", payment_id = %confirmation.payment_id, "payment has no customer email");
                ServiceError::BadRequest("Customer email is missing".into())
            })?;
        let address = confirmation.shipping_address.clone().ok_or_else(|| {
            error!(severity = "CRITICAL", payment_id = %confirmation.payment_id, "payment has no shipping address");
            ServiceError::BadRequest("Shipping address is missing".into())
        })?;

        let products = load_products(&self.db, &metadata.items).await?;
        let items = price_items(&metadata.items, &products).map_err(|missing| {
            error!(severity = "CRITICAL", payment_id = %confirmation.payment_id, product_id = missing, "paid product no longer exists");
            ServiceError::BadRequest(format!("Product {} no longer exists", missing))
        })?;

        let totals = canonical_totals(subtotal(&items), &metadata, self.rates);
        let currency = confirmation
            .currency
            .clone()
            .unwrap_or_else(|| self.currency.clone());
        let notes = review_note(confirmation.amount_captured, totals.total, &currency);
        if notes.is_some() {
            warn!(
                captured = ?confirmation.amount_captured,
                expected = totals.total,
                "captured amount differs from recomputed total"
            );
            self.audit
                .log_anomaly(
                    AnomalyKind::AmountMismatch,
                    json!({
                        "paymentId": confirmation.payment_id,
                        "captured": confirmation.amount_captured,
                        "expected": totals.total,
                    }),
                    &ClientInfo::default(),
                )
                .await;
        }

        let card = self.resolve_gift_card(&metadata, &confirmation.payment_id).await;
        let new_order = NewOrder {
            customer_email: email.clone(),
            customer_name: confirmation
                .customer_name
                .clone()
                .unwrap_or_else(|| email.clone()),
            customer_phone: confirmation.customer_phone.clone(),
            shipping_address: address,
            items: items.clone(),
            totals,
            discount_code: metadata.discount_code.clone(),
            gift_card_code: card
                .as_ref()
                .map(|c| c.code.clone())
                .or_else(|| metadata.gift_card_code.clone()),
            currency,
            payment_method: confirmation.method,
            payment_id: confirmation.payment_id.clone(),
            notes,
        };

        let order = match self.orders.insert_with_retry(&new_order).await {
            Ok(InsertOutcome::Created(order)) => order,
            Ok(InsertOutcome::Duplicate(existing)) => {
                metrics::counter!("storefront.webhooks.duplicates", 1);
                return Ok(FinaliseOutcome::Duplicate(existing));
            }
            Err(ServiceError::DatabaseError(e)) => {
                let class = classify_db_error(&e);
                error!(severity = "CRITICAL", error = %e, ?class, payment_id = %new_order.payment_id, "order insert failed after payment");
                return Err(match class {
                    DbErrorClass::Permanent => ServiceError::PermanentDatabaseError(e.to_string()),
                    DbErrorClass::Transient => ServiceError::DatabaseError(e),
                });
            }
            Err(e) => {
                error!(severity = "CRITICAL", error = %e, payment_id = %new_order.payment_id, "order could not be prepared");
                return Err(e);
            }
        };

        self.stock.decrement_all(&items).await;

        if let Some(card) = card {
            if totals.gift_card > 0 {
                self.deduct_gift_card(card, totals.gift_card, &order).await;
            }
        }

        self.record_discount(&metadata, &email, &order).await;

        metrics::counter!("storefront.orders.created", 1, "method" => confirmation.method.to_value());
        info!(order_number = %order.order_number, total = order.total, "order finalised");
        Ok(FinaliseOutcome::Created(order))
    }

    async fn deduct_gift_card(&self, mut card: gift_card::Model, amount: i64, order: &order::Model) {
        for attempt in 1..=GIFT_CARD_CAS_ATTEMPTS {
            let deduction = amount.min(card.current_balance);
            if deduction < amount {
                error!(
                    severity = "CRITICAL",
                    gift_card_id = %card.id,
                    order_number = %order.order_number,
                    requested = amount,
                    available = card.current_balance,
                    "gift card balance short of paid deduction"
                );
            }
            if deduction <= 0 {
                return;
            }

            match self.gift_cards.deduct(&card, deduction).await {
                Ok(balance_after) => {
                    if let Err(e) = self
                        .gift_cards
                        .record_redemption(card.id, deduction, balance_after, order.id)
                        .await
                    {
                        warn!(error = %e, gift_card_id = %card.id, "gift card ledger write failed");
                    }
                    return;
                }
                Err(ServiceError::Conflict(_)) if attempt < GIFT_CARD_CAS_ATTEMPTS => {
                    warn!(gift_card_id = %card.id, "gift card balance moved; re-reading");
                    match self.gift_cards.find_by_id(card.id).await {
                        Ok(Some(fresh)) => card = fresh,
                        _ => break,
                    }
                }
                Err(e) => {
                    error!(severity = "CRITICAL", error = %e, gift_card_id = %card.id, order_number = %order.order_number, "gift card deduction failed after payment");
                    return;
                }
            }
        }
        error!(severity = "CRITICAL", gift_card_id = %card.id, order_number = %order.order_number, "gift card deduction abandoned");
    }

    async fn record_discount(&self, metadata: &CheckoutMetadata, email: &str, order: &order::Model) {
        let id = match (metadata.discount_id, metadata.discount_code.as_deref()) {
            (Some(id), _) => Some(id),
            (None, Some(code)) => match self.discounts.find_active(code).await {
                Ok(found) => found.map(|d| d.id),
                Err(e) => {
                    warn!(error = %e, "discount lookup failed during finalisation");
                    None
                }
            },
            (None, None) => None,
        };
        let Some(id) = id else {
            if metadata.discount_code.is_some() {
                warn!(order_number = %order.order_number, "discount on paid order no longer resolves");
            }
            return;
        };
        if let Err(e) = self.discounts.record_usage(id, email, Some(order.id)).await {
            warn!(error = %e, order_number = %order.order_number, "discount usage write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATES: ShippingRates = ShippingRates {
        free_threshold: 2000,
        standard: 349,
    };

    #[test]
    fn totals_follow_metadata_amounts() {
        let metadata = CheckoutMetadata {
            discount_amount: 500,
            gift_card_amount: 2000,
            ..Default::default()
        };
        let totals = canonical_totals(5000, &metadata, RATES);
        assert_eq!(totals.total, 2500);
        assert_eq!(totals.shipping, 0);
    }

    #[test]
    fn inflated_metadata_is_clamped() {
        let metadata = CheckoutMetadata {
            discount_amount: 99_999,
            gift_card_amount: 99_999,
            ..Default::default()
        };
        let totals = canonical_totals(1000, &metadata, RATES);
        assert_eq!(totals.discount, 1000);
        assert_eq!(totals.gift_card, 349);
        assert_eq!(totals.total, 0);
    }

    #[test]
    fn review_note_only_beyond_tolerance() {
        assert!(review_note(Some(3200), 3198, "gbp").is_none());
        assert!(review_note(None, 3198, "gbp").is_none());
        let note = review_note(Some(3000), 3198, "gbp").unwrap();
        assert!(note.starts_with("[REVIEW]"));
        assert!(note.contains("3198"));
    }
}
