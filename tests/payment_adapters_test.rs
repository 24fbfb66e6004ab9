//! HTTP adapters for the card and wallet processors, against a mock server.

use serde_json::json;
use storefront_api::services::{
    checkout::metadata::CheckoutMetadata,
    payments::{
        CardProcessor, CardSessionRequest, DisplayLine, PayPalClient, StripeClient,
        WalletOrderRequest, WalletProcessor,
    },
};
use wiremock::{
    matchers::{body_string_contains, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn apron() -> DisplayLine {
    DisplayLine {
        product_id: 1,
        name: "Linen Apron".into(),
        unit_amount: 1250,
        quantity: 2,
        variation: None,
    }
}

#[tokio::test]
async fn card_session_is_created_with_form_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(header_exists("authorization"))
        .and(body_string_contains("unit_amount%5D=1250"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_live_1",
            "url": "https://pay.example/cs_live_1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = StripeClient::new(server.uri(), Some("sk_test_x".into()), None, 300);
    let session = client
        .create_card_session(&CardSessionRequest {
            currency: "gbp".into(),
            lines: vec![apron()],
            shipping: 0,
            customer_email: Some("buyer@example.com".into()),
            metadata: CheckoutMetadata::default(),
            success_url: "https://shop.example/success".into(),
            cancel_url: "https://shop.example/cart".into(),
            shipping_countries: vec!["GB".into()],
        })
        .await
        .unwrap();

    assert_eq!(session.id, "cs_live_1");
    assert_eq!(session.url.as_deref(), Some("https://pay.example/cs_live_1"));
}

#[tokio::test]
async fn card_session_is_retrieved_with_expanded_intent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_live_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_live_2",
            "payment_intent": { "id": "pi_live_2" },
            "payment_status": "paid",
            "amount_total": 2500,
            "currency": "gbp",
            "customer_details": {
                "email": "buyer@example.com",
                "name": "Ada Buyer",
                "address": {
                    "line1": "1 High Street", "city": "York",
                    "postal_code": "YO1 1AA", "country": "GB"
                }
            },
            "metadata": { "items": "[]" }
        })))
        .mount(&server)
        .await;

    let client = StripeClient::new(server.uri(), Some("sk_test_x".into()), None, 300);
    let details = client.retrieve_card_session("cs_live_2").await.unwrap();

    assert_eq!(details.payment_id(), "pi_live_2");
    assert_eq!(details.amount_total, Some(2500));
    assert_eq!(details.shipping_address.unwrap().city, "York");
}

#[tokio::test]
async fn processor_errors_surface_as_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(
            ResponseTemplate::new(402)
                .set_body_json(json!({ "error": { "message": "Your card was declined" } })),
        )
        .mount(&server)
        .await;

    let client = StripeClient::new(server.uri(), Some("sk_test_x".into()), None, 300);
    let err = client
        .create_card_session(&CardSessionRequest {
            currency: "gbp".into(),
            lines: vec![apron()],
            shipping: 349,
            customer_email: None,
            metadata: CheckoutMetadata::default(),
            success_url: "https://shop.example/success".into(),
            cancel_url: "https://shop.example/cart".into(),
            shipping_countries: vec![],
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn unconfigured_card_client_refuses_to_call_out() {
    let server = MockServer::start().await;
    let client = StripeClient::new(server.uri(), None, None, 300);
    assert!(client.retrieve_card_session("cs_live_3").await.is_err());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn wallet_order_is_created_and_captured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "ORDER-5",
            "links": [{ "rel": "approve", "href": "https://wallet.example/approve/ORDER-5" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/ORDER-5/capture"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "ORDER-5",
            "status": "COMPLETED",
            "payer": { "email_address": "payer@example.com" },
            "purchase_units": [{
                "payments": { "captures": [{
                    "id": "CAP-5", "status": "COMPLETED", "custom_id": "fd=1",
                    "amount": { "value": "25.00", "currency_code": "GBP" }
                }]}
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/checkout/orders/ORDER-5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "purchase_units": [{
                "items": [{ "sku": "1", "quantity": "2" }],
                "shipping": { "address": {
                    "address_line_1": "1 High Street", "admin_area_2": "York",
                    "postal_code": "YO1 1AA", "country_code": "GB"
                }}
            }]
        })))
        .mount(&server)
        .await;

    let client = PayPalClient::new(server.uri(), Some("id".into()), Some("secret".into()));
    let order = client
        .create_wallet_order(&WalletOrderRequest {
            currency: "gbp".into(),
            lines: vec![apron()],
            shipping: 0,
            custom_id: "fd=1".into(),
            return_url: "https://shop.example/success".into(),
            cancel_url: "https://shop.example/cart".into(),
        })
        .await
        .unwrap();
    assert_eq!(order.id, "ORDER-5");
    assert_eq!(
        order.approve_url.as_deref(),
        Some("https://wallet.example/approve/ORDER-5")
    );

    let capture = client.capture_wallet_order("ORDER-5").await.unwrap();
    assert!(capture.is_completed());
    assert_eq!(capture.capture_id, "CAP-5");
    assert_eq!(capture.amount, 2500);
    assert_eq!(capture.items.len(), 1);
    assert_eq!(capture.items[0].quantity, 2);
    assert_eq!(capture.shipping_address.unwrap().postcode, "YO1 1AA");
    assert_eq!(capture.custom_id.as_deref(), Some("fd=1"));
}
