#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    auth::{cookies, mfa::Totp, RateLimiter},
    config::AppConfig,
    db::{self, DbConfig},
    entities::{discount_code, product, DiscountType},
    errors::ServiceError,
    handlers::AppServices,
    services::{
        admin_auth::NewAdmin,
        gift_cards::{GiftCardService, IssueGiftCard},
        payments::{
            stripe::{parse_event, sign_payload, verify_stripe_signature},
            CardProcessor, CardSession, CardSessionDetails, CardSessionRequest, CardWebhookEvent,
            WalletCapture, WalletOrder, WalletOrderRequest, WalletProcessor,
        },
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-signing-key-with-plenty-of-entropy-4821";
pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";
pub const ADMIN_PASSWORD: &str = "correct horse battery staple";

/// Card processor double: records sessions and verifies webhooks with the
/// real signature scheme against [`WEBHOOK_SECRET`].
#[derive(Default)]
pub struct FakeCard {
    pub created: Mutex<Vec<CardSessionRequest>>,
    pub sessions: Mutex<HashMap<String, CardSessionDetails>>,
}

#[async_trait]
impl CardProcessor for FakeCard {
    async fn create_card_session(
        &self,
        request: &CardSessionRequest,
    ) -> Result<CardSession, ServiceError> {
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        let id = format!("cs_test_{}", created.len());
        Ok(CardSession {
            url: Some(format!("https://checkout.test/{}", id)),
            id,
        })
    }

    async fn retrieve_card_session(
        &self,
        session_id: &str,
    ) -> Result<CardSessionDetails, ServiceError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServiceError::ExternalServiceError("unknown session".into()))
    }

    fn verify_card_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<CardWebhookEvent, ServiceError> {
        verify_stripe_signature(payload, signature, WEBHOOK_SECRET, 300, Utc::now().timestamp())
            .map_err(|_| ServiceError::BadRequest("Webhook signature verification failed".into()))?;
        parse_event(payload)
    }
}

impl FakeCard {
    pub fn last_request(&self) -> Option<CardSessionRequest> {
        self.created.lock().unwrap().last().cloned()
    }
}

/// Wallet double: captures answer with whatever the test registered.
#[derive(Default)]
pub struct FakeWallet {
    pub created: Mutex<Vec<WalletOrderRequest>>,
    pub captures: Mutex<HashMap<String, WalletCapture>>,
}

#[async_trait]
impl WalletProcessor for FakeWallet {
    async fn create_wallet_order(
        &self,
        request: &WalletOrderRequest,
    ) -> Result<WalletOrder, ServiceError> {
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        let id = format!("WALLET-{}", created.len());
        Ok(WalletOrder {
            approve_url: Some(format!("https://wallet.test/approve/{}", id)),
            id,
        })
    }

    async fn capture_wallet_order(&self, order_id: &str) -> Result<WalletCapture, ServiceError> {
        self.captures
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| ServiceError::ExternalServiceError("unknown wallet order".into()))
    }

    async fn wallet_access_token(&self) -> Result<String, ServiceError> {
        Ok("test-access-token".into())
    }
}

/// Cookie values lifted from a session response.
#[derive(Debug, Clone, Default)]
pub struct SessionCookies {
    pub access: String,
    pub refresh: String,
    pub csrf: String,
}

impl SessionCookies {
    pub fn from_response(response: &Response) -> Self {
        let mut found = Self::default();
        for value in response.headers().get_all(header::SET_COOKIE) {
            let raw = value.to_str().unwrap();
            let (pair, _) = raw.split_once(';').unwrap_or((raw, ""));
            let (name, value) = pair.split_once('=').unwrap();
            match name {
                cookies::ACCESS_COOKIE => found.access = value.to_string(),
                cookies::REFRESH_COOKIE => found.refresh = value.to_string(),
                cookies::CSRF_COOKIE => found.csrf = value.to_string(),
                _ => {}
            }
        }
        found
    }

    pub fn header(&self) -> String {
        format!(
            "{}={}; {}={}; {}={}",
            cookies::ACCESS_COOKIE,
            self.access,
            cookies::REFRESH_COOKIE,
            self.refresh,
            cookies::CSRF_COOKIE,
            self.csrf
        )
    }
}

/// Application harness over a private in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub card: Arc<FakeCard>,
    pub wallet: Arc<FakeWallet>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customise: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.password_hash_cost = 4;
        cfg.encryption_key = Some("integration-field-key".into());
        customise(&mut cfg);

        // One connection keeps every query on the same in-memory database.
        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..DbConfig::default()
        })
        .await
        .expect("in-memory database");
        db::run_migrations(&pool).await.expect("migrations apply");

        let db = Arc::new(pool);
        let card = Arc::new(FakeCard::default());
        let wallet = Arc::new(FakeWallet::default());
        let services = AppServices::new(
            db.clone(),
            &cfg,
            card.clone(),
            wallet.clone(),
            RateLimiter::in_memory(),
        );
        let state = AppState::new(db, cfg, services);

        Self {
            router: storefront_api::build_router(state.clone()),
            state,
            card,
            wallet,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, String)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    pub async fn request_bearer(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        access: &str,
    ) -> Response {
        self.request_with_headers(
            method,
            uri,
            body,
            &[("authorization", format!("Bearer {}", access))],
        )
        .await
    }

    /// Posts a signed card event to the webhook endpoint.
    pub async fn deliver_webhook(&self, event: &Value) -> Response {
        let payload = event.to_string();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = format!(
            "t={},v1={}",
            timestamp,
            sign_payload(WEBHOOK_SECRET, &timestamp, payload.as_bytes())
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks")
            .header(header::CONTENT_TYPE, "application/json")
            .header("stripe-signature", signature)
            .body(Body::from(payload))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn seed_product(&self, id: i64, title: &str, price: i64, stock: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(id),
            title: Set(title.to_string()),
            slug: Set(format!("product-{}", id)),
            price: Set(price),
            currency: Set("gbp".into()),
            stock: Set(stock),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_discount(
        &self,
        code: &str,
        kind: DiscountType,
        value: f64,
        max_uses: Option<i32>,
    ) -> discount_code::Model {
        let now = Utc::now();
        discount_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_uppercase()),
            discount_type: Set(kind),
            value: Set(value),
            is_active: Set(true),
            starts_at: Set(None),
            expires_at: Set(None),
            max_uses: Set(max_uses),
            max_uses_per_customer: Set(None),
            min_order_amount: Set(None),
            use_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed discount")
    }

    /// Issues and activates a card holding `balance` minor units.
    pub async fn seed_gift_card(&self, balance: i64) -> storefront_api::entities::gift_card::Model {
        let service = GiftCardService::new(self.state.db.clone(), "gbp");
        let card = service
            .issue(IssueGiftCard {
                amount: balance,
                purchaser_email: None,
                recipient_email: None,
                recipient_name: None,
                expires_at: None,
            })
            .await
            .expect("issue gift card");
        service.activate(card.id).await.expect("activate gift card")
    }

    pub async fn seed_admin(&self, email: &str, role: &str) -> storefront_api::entities::admin_user::Model {
        self.state
            .services
            .admin_auth
            .create_admin(NewAdmin {
                email: email.to_string(),
                name: "Shop Admin".into(),
                role: role.to_string(),
                password: ADMIN_PASSWORD.into(),
            })
            .await
            .expect("seed admin")
    }

    /// Drives login plus MFA enrolment and returns the issued cookies and
    /// the TOTP secret.
    pub async fn enrolled_admin(&self, email: &str, role: &str) -> (SessionCookies, String) {
        self.seed_admin(email, role).await;
        let login = self
            .request(
                Method::POST,
                "/api/admin-auth",
                Some(json!({ "email": email, "password": ADMIN_PASSWORD })),
            )
            .await;
        let login = response_json(login).await;
        let setup_token = login["setupToken"].as_str().expect("setup token").to_string();

        let setup = self
            .request(
                Method::POST,
                "/api/admin-mfa/setup",
                Some(json!({ "setupToken": setup_token })),
            )
            .await;
        let secret = response_json(setup).await["secret"]
            .as_str()
            .expect("secret")
            .to_string();

        let verified = self
            .request(
                Method::POST,
                "/api/admin-mfa/verify",
                Some(json!({ "setupToken": setup_token, "code": totp_now(&secret) })),
            )
            .await;
        assert_eq!(verified.status(), 200);
        (SessionCookies::from_response(&verified), secret)
    }
}

pub fn totp_now(secret: &str) -> String {
    Totp::default()
        .code_at(secret, Utc::now().timestamp() as u64)
        .expect("totp code")
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn cart_line(id: i64, quantity: i32, price: f64) -> Value {
    json!({ "id": id, "quantity": quantity, "price": price, "title": "client title" })
}

pub fn address() -> Value {
    json!({
        "line1": "1 High Street",
        "city": "York",
        "postcode": "YO1 7HH",
        "country": "GB"
    })
}

/// A completed checkout session event carrying `metadata`.
pub fn completed_event(session_id: &str, intent: &str, amount: i64, metadata: &HashMap<String, String>) -> Value {
    json!({
        "id": format!("evt_{}", session_id),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "payment_intent": intent,
            "payment_status": "paid",
            "amount_total": amount,
            "currency": "gbp",
            "customer_details": {
                "email": "buyer@example.com",
                "name": "Ada Buyer",
                "address": {
                    "line1": "1 High Street",
                    "city": "York",
                    "postal_code": "YO1 7HH",
                    "country": "GB"
                }
            },
            "metadata": metadata,
        }}
    })
}
