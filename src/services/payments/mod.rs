//! Narrow adapters over the card and wallet processors.
//!
//! The rest of the crate only sees these traits, so tests substitute fakes
//! and the HTTP clients in [`stripe`] and [`paypal`] stay thin.

pub mod paypal;
pub mod stripe;

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr};

use crate::{
    entities::PaymentMethod, errors::ServiceError, services::checkout::metadata::{item_sku, CheckoutMetadata},
    validation::{CartItem, ShippingAddress},
};

pub use paypal::PayPalClient;
pub use stripe::{verify_stripe_signature, StripeClient};

/// A line as the processor displays it. Amounts are minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayLine {
    pub product_id: i64,
    pub name: String,
    pub unit_amount: i64,
    pub quantity: i32,
    pub variation: Option<String>,
}

impl DisplayLine {
    pub fn sku(&self) -> String {
        item_sku(&CartItem {
            product_id: self.product_id,
            quantity: self.quantity,
            variation: self.variation.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CardSessionRequest {
    pub currency: String,
    pub lines: Vec<DisplayLine>,
    pub shipping: i64,
    pub customer_email: Option<String>,
    pub metadata: CheckoutMetadata,
    pub success_url: String,
    pub cancel_url: String,
    pub shipping_countries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardSession {
    pub id: String,
    pub url: Option<String>,
}

/// A completed card session as fetched from, or pushed by, the processor.
#[derive(Debug, Clone, Default)]
pub struct CardSessionDetails {
    pub id: String,
    pub payment_intent: Option<String>,
    pub payment_status: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub metadata: HashMap<String, String>,
}

impl CardSessionDetails {
    /// Payment intent when present; the session id otherwise.
    pub fn payment_id(&self) -> String {
        self.payment_intent.clone().unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Clone)]
pub enum CardWebhookEvent {
    CheckoutCompleted(CardSessionDetails),
    AsyncPaymentSucceeded(CardSessionDetails),
    Other { event_type: String },
}

#[derive(Debug, Clone)]
pub struct WalletOrderRequest {
    pub currency: String,
    pub lines: Vec<DisplayLine>,
    pub shipping: i64,
    pub custom_id: String,
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletOrder {
    pub id: String,
    pub approve_url: Option<String>,
}

/// Result of capturing an approved wallet order.
#[derive(Debug, Clone, Default)]
pub struct WalletCapture {
    pub order_id: String,
    pub capture_id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub payer_email: Option<String>,
    pub payer_name: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub custom_id: Option<String>,
    /// Cart lines recovered from item SKUs
    pub items: Vec<CartItem>,
}

impl WalletCapture {
    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case("COMPLETED")
    }
}

#[async_trait]
pub trait CardProcessor: Send + Sync {
    async fn create_card_session(
        &self,
        request: &CardSessionRequest,
    ) -> Result<CardSession, ServiceError>;

    async fn retrieve_card_session(&self, session_id: &str)
        -> Result<CardSessionDetails, ServiceError>;

    /// Checks the signature header and parses the event.
    fn verify_card_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<CardWebhookEvent, ServiceError>;
}

#[async_trait]
pub trait WalletProcessor: Send + Sync {
    async fn create_wallet_order(
        &self,
        request: &WalletOrderRequest,
    ) -> Result<WalletOrder, ServiceError>;

    async fn capture_wallet_order(&self, order_id: &str) -> Result<WalletCapture, ServiceError>;

    async fn wallet_access_token(&self) -> Result<String, ServiceError>;
}

/// A captured payment from either processor, normalised for the finaliser.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub payment_id: String,
    pub method: PaymentMethod,
    pub amount_captured: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub metadata: Option<CheckoutMetadata>,
    /// Card session to fetch when the push payload is incomplete
    pub session_id: Option<String>,
}

impl PaymentConfirmation {
    pub fn from_card_session(details: CardSessionDetails) -> Self {
        let metadata = CheckoutMetadata::from_map(&details.metadata);
        Self {
            payment_id: details.payment_id(),
            method: PaymentMethod::Card,
            amount_captured: details.amount_total,
            currency: details.currency,
            customer_email: details.customer_email,
            customer_name: details.customer_name,
            customer_phone: details.customer_phone,
            shipping_address: details.shipping_address,
            metadata,
            session_id: Some(details.id),
        }
    }

    pub fn from_wallet_capture(capture: WalletCapture) -> Self {
        let metadata = capture
            .custom_id
            .as_deref()
            .and_then(|custom| CheckoutMetadata::from_compact(custom, &capture.items));
        Self {
            payment_id: capture.capture_id,
            method: PaymentMethod::Wallet,
            amount_captured: Some(capture.amount),
            currency: Some(capture.currency),
            customer_email: capture.payer_email,
            customer_name: capture.payer_name,
            customer_phone: None,
            shipping_address: capture.shipping_address,
            metadata,
            session_id: None,
        }
    }

    pub fn needs_session_lookup(&self) -> bool {
        self.metadata.is_none() || self.customer_email.is_none() || self.shipping_address.is_none()
    }
}

/// Minor units as a two-decimal string, e.g. `1599` → `"15.99"`.
pub fn format_minor(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Currency-unit decimal string to minor units, rounding half away from zero.
pub fn parse_major(value: &str) -> Option<i64> {
    let decimal = Decimal::from_str(value.trim()).ok()?;
    (decimal * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
