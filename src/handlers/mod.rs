pub mod admin_auth;
pub mod admin_mfa;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod webhooks;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::{
    auth::{
        mfa::Totp, password::PasswordHasher, AdminGateway, RateLimiter, TokenService,
    },
    config::AppConfig,
    crypto::FieldCipher,
    middleware_helpers::IpAllowlist,
    services::{
        admin_auth::AdminAuthService,
        audit::AuditService,
        checkout::{pricing::ShippingRates, CheckoutService, CheckoutSettings},
        discounts::DiscountService,
        finaliser::PaymentFinaliser,
        gift_cards::GiftCardService,
        orders::OrderService,
        payments::{CardProcessor, PayPalClient, StripeClient, WalletProcessor},
        stock::StockService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: CheckoutService,
    pub finaliser: PaymentFinaliser,
    pub orders: OrderService,
    pub admin_auth: AdminAuthService,
    pub audit: AuditService,
    pub card: Arc<dyn CardProcessor>,
    pub gateway: AdminGateway,
    pub allowlist: IpAllowlist,
}

impl AppServices {
    /// Wires the live processor adapters from configuration.
    pub fn from_config(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        let card: Arc<dyn CardProcessor> = Arc::new(StripeClient::from_config(config));
        let wallet: Arc<dyn WalletProcessor> = Arc::new(PayPalClient::from_config(config));
        let login_limiter = RateLimiter::database(db.clone());
        Self::new(db, config, card, wallet, login_limiter)
    }

    /// Builds the container around the given processors and login limiter.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        card: Arc<dyn CardProcessor>,
        wallet: Arc<dyn WalletProcessor>,
        login_limiter: RateLimiter,
    ) -> Self {
        let cipher = FieldCipher::new(config.encryption_key.as_deref());
        if !cipher.is_enabled() {
            tracing::warn!(target: "security", "no encryption key configured; personal fields are stored in clear");
        }
        let audit = AuditService::new(db.clone());
        let discounts = DiscountService::new(db.clone());
        let gift_cards = GiftCardService::new(db.clone(), config.currency.clone());
        let orders = OrderService::new(db.clone(), cipher.clone());
        let stock = StockService::new(db.clone());
        let rates = ShippingRates {
            free_threshold: config.free_shipping_threshold,
            standard: config.standard_shipping,
        };

        let checkout = CheckoutService::new(
            db.clone(),
            discounts.clone(),
            gift_cards.clone(),
            orders.clone(),
            stock.clone(),
            audit.clone(),
            card.clone(),
            wallet.clone(),
            CheckoutSettings {
                currency: config.currency.clone(),
                rates,
                base_url: config.public_base_url(),
                shipping_countries: config.shipping_countries(),
            },
        );

        let finaliser = PaymentFinaliser::new(
            db.clone(),
            orders.clone(),
            discounts,
            gift_cards,
            stock,
            audit.clone(),
            card.clone(),
            wallet,
            config.currency.clone(),
            rates,
        );

        let admin_auth = AdminAuthService::new(
            db.clone(),
            TokenService::new(&config.jwt_secret),
            PasswordHasher::new(config.password_hash_cost, config.legacy_password_secret()),
            login_limiter,
            RateLimiter::in_memory(),
            Totp::default(),
            cipher,
            audit.clone(),
        );

        Self {
            gateway: AdminGateway::new(admin_auth.clone(), audit.clone()),
            allowlist: IpAllowlist::new(config.admin_allowed_ips(), audit.clone()),
            checkout,
            finaliser,
            orders,
            admin_auth,
            audit,
            card,
        }
    }
}
