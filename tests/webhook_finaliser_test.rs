//! Payment confirmation: signed card webhooks and wallet captures turning
//! into exactly one order each.

mod common;

use std::collections::HashMap;

use axum::http::Method;
use common::{cart_line, completed_event, response_json, TestApp};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use storefront_api::{
    entities::{
        audit_log, discount_code, discount_usage, gift_card, gift_card_transaction, order, product,
        DiscountType, GiftCardStatus, GiftCardTransactionType, PaymentMethod,
    },
    services::payments::{CardSessionDetails, WalletCapture},
    validation::{CartItem, ShippingAddress},
};

/// Starts a card checkout and returns the metadata the session carried.
async fn checkout_metadata(app: &TestApp, body: serde_json::Value) -> HashMap<String, String> {
    let response = app
        .request(Method::POST, "/api/stripe-checkout", Some(body))
        .await;
    assert_eq!(response.status(), 200);
    app.card.last_request().unwrap().metadata.to_map()
}

#[tokio::test]
async fn completed_session_creates_one_order() {
    let app = TestApp::new().await;
    app.seed_product(1, "Linen Apron", 1250, 5).await;
    let metadata = checkout_metadata(
        &app,
        json!({ "items": [cart_line(1, 2, 12.5)], "customerEmail": "buyer@example.com" }),
    )
    .await;

    let event = completed_event("cs_test_1", "pi_100", 2500, &metadata);
    let first = app.deliver_webhook(&event).await;
    assert_eq!(first.status(), 200);
    let first = response_json(first).await;
    assert_eq!(first["duplicate"], false);
    let order_number = first["orderNumber"].as_str().unwrap().to_string();

    let again = response_json(app.deliver_webhook(&event).await).await;
    assert_eq!(again["duplicate"], true);
    assert_eq!(again["orderNumber"], order_number.as_str());

    let db = &*app.state.db;
    let orders = order::Entity::find().all(db).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_id.as_deref(), Some("pi_100"));
    assert_eq!(orders[0].payment_method, PaymentMethod::Card);
    assert_eq!(orders[0].total, 2500);
    assert!(orders[0].notes.is_none());

    // stock moves once despite the redelivery
    let stock = product::Entity::find_by_id(1).one(db).await.unwrap().unwrap();
    assert_eq!(stock.stock, 3);

    let lookup = app
        .request(
            Method::GET,
            &format!("/api/orders?order_number={}", order_number),
            None,
        )
        .await;
    assert_eq!(lookup.status(), 200);
    let lookup = response_json(lookup).await;
    assert_eq!(lookup["status"], "paid");
    assert_eq!(lookup["total"], 25.0);
    assert_eq!(lookup["items"][0]["title"], "Linen Apron");
    assert!(lookup.get("customer_email").is_none());
    assert!(lookup.get("shipping_address").is_none());
}

#[tokio::test]
async fn discount_and_partial_gift_card_are_settled() {
    let app = TestApp::new().await;
    app.seed_product(1, "Linen Apron", 1250, 5).await;
    let discount = app
        .seed_discount("SAVE10", DiscountType::Percentage, 10.0, Some(5))
        .await;
    let card = app.seed_gift_card(1_000).await;

    let metadata = checkout_metadata(
        &app,
        json!({
            "items": [cart_line(1, 2, 12.5)],
            "customerEmail": "buyer@example.com",
            "discountCode": "SAVE10",
            "giftCardCode": card.code
        }),
    )
    .await;
    // 25.00 - 2.50 discount - 10.00 gift card
    let event = completed_event("cs_test_1", "pi_200", 1250, &metadata);
    let response = app.deliver_webhook(&event).await;
    assert_eq!(response.status(), 200);

    let db = &*app.state.db;
    let stored_card = gift_card::Entity::find_by_id(card.id)
        .one(db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_card.current_balance, 0);
    assert_eq!(stored_card.status, GiftCardStatus::Depleted);

    let ledger = gift_card_transaction::Entity::find()
        .filter(gift_card_transaction::Column::GiftCardId.eq(card.id))
        .filter(gift_card_transaction::Column::TransactionType.eq(GiftCardTransactionType::Redemption))
        .all(db)
        .await
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, -1_000);

    let stored_discount = discount_code::Entity::find_by_id(discount.id)
        .one(db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_discount.use_count, 1);
    let usages = discount_usage::Entity::find()
        .filter(discount_usage::Column::DiscountId.eq(discount.id))
        .count(db)
        .await
        .unwrap();
    assert_eq!(usages, 1);

    let orders = order::Entity::find().all(db).await.unwrap();
    assert_eq!(orders[0].discount_amount, 250);
    assert_eq!(orders[0].gift_card_amount, 1_000);
    assert_eq!(orders[0].total, 1_250);
}

#[tokio::test]
async fn unknown_gift_cards_are_recorded_as_anomalies() {
    let app = TestApp::new().await;
    app.seed_product(1, "Linen Apron", 1250, 5).await;
    let mut metadata = checkout_metadata(
        &app,
        json!({ "items": [cart_line(1, 2, 12.5)], "customerEmail": "buyer@example.com" }),
    )
    .await;
    let missing = uuid::Uuid::new_v4();
    metadata.insert("gift_card_id".into(), missing.to_string());
    metadata.insert("gift_card_amount".into(), "500".into());

    let event = completed_event("cs_test_gc", "pi_gc", 2000, &metadata);
    let response = app.deliver_webhook(&event).await;
    assert_eq!(response.status(), 200);

    let anomalies = audit_log::Entity::find()
        .filter(audit_log::Column::Action.eq("SECURITY_ANOMALY"))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].details["kind"], "unresolved_gift_card");
    assert_eq!(anomalies[0].details["giftCardId"], missing.to_string());
    assert_eq!(anomalies[0].details["paymentId"], "pi_gc");
}

#[tokio::test]
async fn mismatched_capture_is_flagged_for_review() {
    let app = TestApp::new().await;
    app.seed_product(1, "Linen Apron", 1250, 5).await;
    let metadata = checkout_metadata(&app, json!({ "items": [cart_line(1, 2, 12.5)] })).await;

    let event = completed_event("cs_test_1", "pi_300", 1_000, &metadata);
    let response = app.deliver_webhook(&event).await;
    assert_eq!(response.status(), 200);

    let orders = order::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);
    // the canonical total stands; the capture is noted
    assert_eq!(orders[0].total, 2_500);
    let notes = orders[0].notes.as_deref().unwrap();
    assert!(notes.starts_with("[REVIEW]"), "{}", notes);
}

#[tokio::test]
async fn unpaid_sessions_wait_for_the_async_event() {
    let app = TestApp::new().await;
    app.seed_product(1, "Linen Apron", 1250, 5).await;
    let metadata = checkout_metadata(&app, json!({ "items": [cart_line(1, 1, 12.5)] })).await;

    let mut event = completed_event("cs_test_1", "pi_400", 1_599, &metadata);
    event["data"]["object"]["payment_status"] = json!("unpaid");
    let body = response_json(app.deliver_webhook(&event).await).await;
    assert_eq!(body["pending"], true);
    assert!(order::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap()
        .is_empty());

    event["type"] = json!("checkout.session.async_payment_succeeded");
    event["data"]["object"]["payment_status"] = json!("paid");
    let body = response_json(app.deliver_webhook(&event).await).await;
    assert_eq!(body["duplicate"], false);
}

#[tokio::test]
async fn unrelated_events_are_acknowledged() {
    let app = TestApp::new().await;
    let event = json!({ "id": "evt_1", "type": "customer.created", "data": { "object": {} } });
    let response = app.deliver_webhook(&event).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await["ignored"], true);
}

#[tokio::test]
async fn bad_signatures_and_content_types_are_rejected() {
    let app = TestApp::new().await;

    let forged = app
        .request_with_headers(
            Method::POST,
            "/api/webhooks",
            Some(json!({ "type": "checkout.session.completed" })),
            &[("stripe-signature", "t=1,v1=deadbeef".to_string())],
        )
        .await;
    assert_eq!(forged.status(), 400);

    let unsigned = app
        .request(
            Method::POST,
            "/api/webhooks",
            Some(json!({ "type": "checkout.session.completed" })),
        )
        .await;
    assert_eq!(unsigned.status(), 400);

    let form = app
        .request_with_headers(
            Method::POST,
            "/api/webhooks",
            None,
            &[
                ("content-type", "application/x-www-form-urlencoded".to_string()),
                ("stripe-signature", "t=1,v1=00".to_string()),
            ],
        )
        .await;
    assert_eq!(form.status(), 400);
}

#[tokio::test]
async fn sessions_without_metadata_are_not_retried() {
    let app = TestApp::new().await;
    // the processor has nothing more to offer on lookup either
    app.card.sessions.lock().unwrap().insert(
        "cs_test_9".into(),
        CardSessionDetails {
            id: "cs_test_9".into(),
            ..Default::default()
        },
    );
    let event = completed_event("cs_test_9", "pi_900", 1_000, &HashMap::new());

    let response = app.deliver_webhook(&event).await;
    assert_eq!(response.status(), 400);
    assert!(order::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn processor_lookup_failures_are_redelivered() {
    let app = TestApp::new().await;
    // no metadata, and the processor does not know the session either
    let event = completed_event("cs_test_missing", "pi_901", 1_000, &HashMap::new());

    let response = app.deliver_webhook(&event).await;
    assert_eq!(response.status(), 500);
    assert_eq!(order::Entity::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn signed_but_malformed_payloads_are_not_retried() {
    let app = TestApp::new().await;
    let event = json!({
        "id": "evt_bad",
        "type": "checkout.session.completed",
        "data": { "object": "not a session" }
    });
    let response = app.deliver_webhook(&event).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn wallet_capture_finalises_once() {
    let app = TestApp::new().await;
    app.seed_product(3, "Oak Board", 1800, 4).await;
    app.seed_discount("FIVER", DiscountType::Fixed, 5.0, None).await;

    let response = app
        .request(
            Method::POST,
            "/api/paypal-checkout",
            Some(json!({ "items": [cart_line(3, 1, 18.0)], "discountCode": "FIVER" })),
        )
        .await;
    assert_eq!(response.status(), 200);
    let custom_id = app.wallet.created.lock().unwrap()[0].custom_id.clone();

    // 18.00 - 5.00 + 3.49 delivery
    app.wallet.captures.lock().unwrap().insert(
        "WALLET-1".into(),
        WalletCapture {
            order_id: "WALLET-1".into(),
            capture_id: "CAPTURE-1".into(),
            status: "COMPLETED".into(),
            amount: 1_649,
            currency: "GBP".into(),
            payer_email: Some("payer@example.com".into()),
            payer_name: Some("Pat Payer".into()),
            shipping_address: Some(ShippingAddress {
                line1: "2 Low Road".into(),
                line2: None,
                city: "Leeds".into(),
                county: None,
                postcode: "LS1 1AA".into(),
                country: "GB".into(),
            }),
            custom_id: Some(custom_id),
            items: vec![CartItem {
                product_id: 3,
                quantity: 1,
                variation: None,
            }],
        },
    );

    let first = app
        .request(
            Method::POST,
            "/api/paypal-capture",
            Some(json!({ "orderID": "WALLET-1" })),
        )
        .await;
    assert_eq!(first.status(), 200);
    let first = response_json(first).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["duplicate"], false);

    let second = response_json(
        app.request(
            Method::POST,
            "/api/paypal-capture",
            Some(json!({ "orderID": "WALLET-1" })),
        )
        .await,
    )
    .await;
    assert_eq!(second["duplicate"], true);

    let orders = order::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_method, PaymentMethod::Wallet);
    assert_eq!(orders[0].discount_amount, 500);
    assert_eq!(orders[0].total, 1_649);
    assert!(orders[0].notes.is_none());
}

#[tokio::test]
async fn incomplete_wallet_capture_is_refused() {
    let app = TestApp::new().await;
    app.wallet.captures.lock().unwrap().insert(
        "WALLET-7".into(),
        WalletCapture {
            order_id: "WALLET-7".into(),
            status: "PENDING".into(),
            ..Default::default()
        },
    );

    let response = app
        .request(
            Method::POST,
            "/api/paypal-capture",
            Some(json!({ "orderID": "WALLET-7" })),
        )
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["message"], "Payment was not completed");
}
