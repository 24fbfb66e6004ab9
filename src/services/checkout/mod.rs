//! Checkout engine: server-side cart verification, discount and gift card
//! tender, and the hand-off to a payment processor or the gift-card-only
//! settlement path.

pub mod metadata;
pub mod pricing;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{error, info, instrument, warn};

use crate::{
    entities::{
        gift_card,
        product::{self, Entity as ProductEntity},
        PaymentMethod,
    },
    errors::ServiceError,
    middleware_helpers::client::ClientInfo,
    services::{
        audit::{AnomalyKind, AuditService},
        discounts::DiscountService,
        gift_cards::GiftCardService,
        orders::{InsertOutcome, NewOrder, OrderService},
        payments::{
            CardProcessor, CardSessionRequest, WalletOrderRequest, WalletProcessor,
        },
        stock::StockService,
    },
    validation::{
        contains_xss, validate_email, validate_name, validate_order_items, validate_phone,
        validate_shipping_address, CartItem,
    },
};
use metadata::CheckoutMetadata;
use pricing::{
    gift_card_deduction, redistribute, shipping_cost, subtotal, to_major, to_minor,
    AppliedDiscount, ShippingRates, Totals, VerifiedItem,
};

/// Body shared by every checkout entry point.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Value,
    #[serde(default, alias = "customerEmail", alias = "email")]
    pub customer_email: Option<String>,
    #[serde(default, alias = "discountCode")]
    pub discount_code: Option<String>,
    #[serde(default, alias = "giftCardCode")]
    pub gift_card_code: Option<String>,
    /// Currency units
    #[serde(default, alias = "giftCardAmount")]
    pub gift_card_amount: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GiftCardCheckoutRequest {
    #[serde(flatten)]
    pub checkout: CheckoutRequest,
    #[serde(default, alias = "customerName")]
    pub customer_name: Option<String>,
    #[serde(default, alias = "customerPhone")]
    pub customer_phone: Option<String>,
    #[serde(default, alias = "shippingAddress")]
    pub shipping_address: Value,
}

/// A fully priced cart.
#[derive(Debug, Clone)]
pub struct Quote {
    pub items: Vec<VerifiedItem>,
    pub discount: Option<AppliedDiscount>,
    pub gift_card: Option<gift_card::Model>,
    pub totals: Totals,
}

impl Quote {
    pub fn metadata(&self, customer_email: Option<&str>) -> CheckoutMetadata {
        CheckoutMetadata {
            items: self
                .items
                .iter()
                .map(|item| CartItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    variation: item.variation.clone(),
                })
                .collect(),
            discount_id: self.discount.as_ref().map(|d| d.id),
            discount_code: self.discount.as_ref().map(|d| d.code.clone()),
            discount_amount: self.totals.discount,
            free_delivery: self.discount.as_ref().map_or(false, AppliedDiscount::free_delivery),
            gift_card_id: self.gift_card.as_ref().map(|g| g.id),
            gift_card_code: self.gift_card.as_ref().map(|g| g.code.clone()),
            gift_card_amount: self.totals.gift_card,
            customer_email: customer_email.map(|e| e.trim().to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardCheckout {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletCheckout {
    #[serde(rename = "orderID")]
    pub order_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GiftCardCheckout {
    pub success: bool,
    pub order_number: String,
    pub total: f64,
    pub gift_card_used: f64,
    pub gift_card_remaining: f64,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub rates: ShippingRates,
    pub base_url: String,
    pub shipping_countries: Vec<String>,
}

/// Prices cart lines from catalog rows. `Err` carries the first product id
/// that is missing.
pub fn price_items(
    cart: &[CartItem],
    products: &HashMap<i64, product::Model>,
) -> Result<Vec<VerifiedItem>, i64> {
    cart.iter()
        .map(|item| {
            let product = products.get(&item.product_id).ok_or(item.product_id)?;
            Ok(VerifiedItem {
                product_id: product.id,
                title: product.title.clone(),
                unit_price: product.price,
                quantity: item.quantity,
                variation: item.variation.clone(),
            })
        })
        .collect()
}

pub async fn load_products(
    db: &DatabaseConnection,
    cart: &[CartItem],
) -> Result<HashMap<i64, product::Model>, ServiceError> {
    let ids: BTreeSet<i64> = cart.iter().map(|item| item.product_id).collect();
    let products = ProductEntity::find()
        .filter(product::Column::Id.is_in(ids))
        .all(db)
        .await?;
    Ok(products.into_iter().map(|p| (p.id, p)).collect())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    discounts: DiscountService,
    gift_cards: GiftCardService,
    orders: OrderService,
    stock: StockService,
    audit: AuditService,
    card: Arc<dyn CardProcessor>,
    wallet: Arc<dyn WalletProcessor>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        discounts: DiscountService,
        gift_cards: GiftCardService,
        orders: OrderService,
        stock: StockService,
        audit: AuditService,
        card: Arc<dyn CardProcessor>,
        wallet: Arc<dyn WalletProcessor>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            discounts,
            gift_cards,
            orders,
            stock,
            audit,
            card,
            wallet,
            settings,
        }
    }

    /// Replaces client prices and titles with catalog values; rejects
    /// inactive products and lines the stock cannot cover.
    #[instrument(skip(self, cart), fields(lines = cart.len()))]
    pub async fn verify_cart(&self, cart: &[CartItem]) -> Result<Vec<VerifiedItem>, ServiceError> {
        let products = load_products(&self.db, cart).await?;

        let mut requested: HashMap<i64, i32> = HashMap::new();
        for item in cart {
            *requested.entry(item.product_id).or_default() += item.quantity;
        }
        for item in cart {
            match products.get(&item.product_id) {
                Some(p) if p.is_active => {
                    if p.stock < requested[&item.product_id] {
                        return Err(ServiceError::BadRequest(format!(
                            "Insufficient stock for {}",
                            p.title
                        )));
                    }
                }
                _ => {
                    return Err(ServiceError::BadRequest(
                        "Product no longer available".into(),
                    ))
                }
            }
        }

        price_items(cart, &products)
            .map_err(|_| ServiceError::BadRequest("Product no longer available".into()))
    }

    /// Verifies the cart and layers discount, shipping and gift card.
    pub async fn quote(
        &self,
        request: &CheckoutRequest,
        now: DateTime<Utc>,
    ) -> Result<Quote, ServiceError> {
        let cart = validate_order_items(&request.items)?;
        let email = non_empty(&request.customer_email);
        if let Some(email) = email {
            validate_email(email)?;
        }

        let items = self.verify_cart(&cart).await?;
        let sub = subtotal(&items);

        let discount = match non_empty(&request.discount_code) {
            Some(code) => Some(self.discounts.apply(code, email, sub, now).await?),
            None => None,
        };
        let discount_amount = discount.as_ref().map_or(0, |d| d.amount);
        let free_delivery = discount.as_ref().map_or(false, AppliedDiscount::free_delivery);
        let shipping = shipping_cost(sub, discount_amount, free_delivery, self.settings.rates);

        let gift_card = match non_empty(&request.gift_card_code) {
            Some(code) => Some(self.gift_cards.evaluate(code, now).await?),
            None => None,
        };
        let gift_card_amount = gift_card.as_ref().map_or(0, |card| {
            gift_card_deduction(
                request.gift_card_amount.map(to_minor),
                card.current_balance,
                sub - discount_amount + shipping,
            )
        });

        Ok(Quote {
            items,
            discount,
            gift_card,
            totals: Totals::new(sub, discount_amount, shipping, gift_card_amount),
        })
    }

    fn require_processor_total(quote: &Quote) -> Result<(), ServiceError> {
        if quote.totals.total <= 0 {
            return Err(ServiceError::BadRequest(
                "Your gift card covers this order; please use gift card checkout".into(),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, request))]
    pub async fn start_card_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CardCheckout, ServiceError> {
        let quote = self.quote(request, Utc::now()).await?;
        Self::require_processor_total(&quote)?;

        let shown = redistribute(&quote.items, &quote.totals);
        let email = non_empty(&request.customer_email).map(|e| e.to_lowercase());
        let session = self
            .card
            .create_card_session(&CardSessionRequest {
                currency: self.settings.currency.clone(),
                lines: shown.lines,
                shipping: shown.shipping,
                customer_email: email.clone(),
                metadata: quote.metadata(email.as_deref()),
                success_url: format!(
                    "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
                    self.settings.base_url
                ),
                cancel_url: format!("{}/cart", self.settings.base_url),
                shipping_countries: self.settings.shipping_countries.clone(),
            })
            .await?;

        info!(session_id = %session.id, total = quote.totals.total, "card session created");
        Ok(CardCheckout {
            session_id: session.id,
            url: session.url,
        })
    }

    #[instrument(skip(self, request))]
    pub async fn start_wallet_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<WalletCheckout, ServiceError> {
        let quote = self.quote(request, Utc::now()).await?;
        Self::require_processor_total(&quote)?;

        let shown = redistribute(&quote.items, &quote.totals);
        let email = non_empty(&request.customer_email);
        let custom_id = quote.metadata(email).to_compact()?;
        let order = self
            .wallet
            .create_wallet_order(&WalletOrderRequest {
                currency: self.settings.currency.clone(),
                lines: shown.lines,
                shipping: shown.shipping,
                custom_id,
                return_url: format!("{}/checkout/success", self.settings.base_url),
                cancel_url: format!("{}/cart", self.settings.base_url),
            })
            .await?;

        info!(wallet_order_id = %order.id, total = quote.totals.total, "wallet order created");
        Ok(WalletCheckout {
            order_id: order.id,
            url: order.approve_url,
        })
    }

    /// Settles an order paid entirely by gift card.
    #[instrument(skip(self, request, client))]
    pub async fn gift_card_only(
        &self,
        request: &GiftCardCheckoutRequest,
        client: &ClientInfo,
    ) -> Result<GiftCardCheckout, ServiceError> {
        let email = non_empty(&request.checkout.customer_email)
            .ok_or_else(|| ServiceError::ValidationError("Email is required".into()))?;
        let name = request.customer_name.as_deref().unwrap_or_default();

        let suspicious = contains_xss(name)
            || request
                .shipping_address
                .as_object()
                .map_or(false, |a| a.values().filter_map(Value::as_str).any(contains_xss));
        if suspicious {
            self.audit
                .log_anomaly(
                    AnomalyKind::XssRejected,
                    json!({ "endpoint": "gift-card-only-checkout" }),
                    client,
                )
                .await;
        }

        validate_email(email)?;
        validate_name(name)?;
        if let Some(phone) = non_empty(&request.customer_phone) {
            validate_phone(phone)?;
        }
        let address = validate_shipping_address(&request.shipping_address)?;

        if non_empty(&request.checkout.gift_card_code).is_none() {
            return Err(ServiceError::ValidationError(
                "Gift card code is required".into(),
            ));
        }
        let quote = self.quote(&request.checkout, Utc::now()).await?;
        let card = quote
            .gift_card
            .clone()
            .ok_or_else(|| ServiceError::BadRequest("Invalid gift card code".into()))?;
        if quote.totals.total > 0 {
            return Err(ServiceError::BadRequest(
                "Insufficient gift card balance".into(),
            ));
        }

        let deduction = quote.totals.gift_card;
        let remaining = match self.gift_cards.deduct(&card, deduction).await {
            Ok(remaining) => remaining,
            Err(e @ ServiceError::Conflict(_)) => {
                self.audit
                    .log_anomaly(
                        AnomalyKind::CasConflict,
                        json!({ "giftCardId": card.id, "observedBalance": card.current_balance }),
                        client,
                    )
                    .await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let new_order = NewOrder {
            customer_email: email.to_string(),
            customer_name: name.trim().to_string(),
            customer_phone: non_empty(&request.customer_phone).map(str::to_string),
            shipping_address: address,
            items: quote.items.clone(),
            totals: quote.totals,
            discount_code: quote.discount.as_ref().map(|d| d.code.clone()),
            gift_card_code: Some(card.code.clone()),
            currency: self.settings.currency.clone(),
            payment_method: PaymentMethod::GiftCard,
            payment_id: format!("GC-{}-{}", card.id, Utc::now().timestamp_millis()),
            notes: None,
        };

        let order = match self.orders.insert_with_retry(&new_order).await {
            Ok(InsertOutcome::Created(order)) | Ok(InsertOutcome::Duplicate(order)) => order,
            Err(e) => {
                error!(error = %e, gift_card_id = %card.id, "gift card order insert failed; compensating");
                if let Err(restore_err) = self
                    .gift_cards
                    .restore(card.id, remaining, card.current_balance)
                    .await
                {
                    error!(severity = "CRITICAL", error = %restore_err, gift_card_id = %card.id, "gift card compensation failed");
                }
                return Err(ServiceError::InternalError(
                    "Failed to create order".into(),
                ));
            }
        };

        if let Err(e) = self
            .gift_cards
            .record_redemption(card.id, deduction, remaining, order.id)
            .await
        {
            warn!(error = %e, order_number = %order.order_number, "gift card ledger write failed");
        }
        if let Some(discount) = &quote.discount {
            if let Err(e) = self
                .discounts
                .record_usage(discount.id, email, Some(order.id))
                .await
            {
                warn!(error = %e, order_number = %order.order_number, "discount usage write failed");
            }
        }
        self.stock.decrement_all(&quote.items).await;

        metrics::counter!("storefront.orders.created", 1, "method" => "gift_card");
        info!(order_number = %order.order_number, "gift card order completed");
        Ok(GiftCardCheckout {
            success: true,
            order_number: order.order_number,
            total: to_major(quote.totals.total),
            gift_card_used: to_major(deduction),
            gift_card_remaining: to_major(remaining),
        })
    }
}
