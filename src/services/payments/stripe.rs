use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;
use tracing::{instrument, warn};

use super::{CardProcessor, CardSession, CardSessionDetails, CardSessionRequest, CardWebhookEvent};
use crate::{
    config::AppConfig, crypto::constant_time_eq, errors::ServiceError,
    validation::ShippingAddress,
};

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp is outside the tolerance window")]
    Stale,
    #[error("signature does not match")]
    Mismatch,
}

/// Checks a `t=<ts>,v1=<hex>[,v1=<hex>]` header against the raw body.
pub fn verify_stripe_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now - ts).unsigned_abs() > tolerance_secs {
        return Err(SignatureError::Stale);
    }

    let expected = sign_payload(secret, timestamp, payload);
    if signatures
        .iter()
        .any(|sig| constant_time_eq(expected.as_bytes(), sig.as_bytes()))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Hex HMAC-SHA256 of `"<timestamp>.<payload>"`.
pub fn sign_payload(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Card processor over the Checkout Sessions REST API.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: Option<String>,
    webhook_secret: Option<String>,
    tolerance_secs: u64,
}

impl StripeClient {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: Option<String>,
        webhook_secret: Option<String>,
        tolerance_secs: u64,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key,
            webhook_secret,
            tolerance_secs,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.stripe_api_base.clone(),
            config.stripe_secret_key.clone(),
            config.stripe_webhook_secret.clone(),
            config.stripe_webhook_tolerance_secs,
        )
    }

    fn secret_key(&self) -> Result<&str, ServiceError> {
        self.secret_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServiceError::ExternalServiceError("card processor is not configured".into()))
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, ServiceError> {
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            warn!(status = %status, error = message, "card processor request failed");
            return Err(ServiceError::ExternalServiceError(format!(
                "card processor returned {}",
                status
            )));
        }
        Ok(body)
    }
}

/// Form fields for a hosted checkout session.
pub fn session_form(request: &CardSessionRequest) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("phone_number_collection[enabled]".into(), "true".into()),
    ];
    if let Some(email) = &request.customer_email {
        form.push(("customer_email".into(), email.clone()));
    }

    for (i, line) in request.lines.iter().enumerate() {
        let prefix = format!("line_items[{}]", i);
        form.push((format!("{}[quantity]", prefix), line.quantity.to_string()));
        form.push((format!("{}[price_data][currency]", prefix), request.currency.clone()));
        form.push((format!("{}[price_data][unit_amount]", prefix), line.unit_amount.to_string()));
        form.push((format!("{}[price_data][product_data][name]", prefix), line.name.clone()));
        form.push((
            format!("{}[price_data][product_data][metadata][product_id]", prefix),
            line.product_id.to_string(),
        ));
    }

    if request.shipping > 0 {
        let rate = "shipping_options[0][shipping_rate_data]";
        form.push((format!("{}[type]", rate), "fixed_amount".into()));
        form.push((format!("{}[display_name]", rate), "Standard delivery".into()));
        form.push((format!("{}[fixed_amount][amount]", rate), request.shipping.to_string()));
        form.push((format!("{}[fixed_amount][currency]", rate), request.currency.clone()));
    }

    for (i, country) in request.shipping_countries.iter().enumerate() {
        form.push((
            format!("shipping_address_collection[allowed_countries][{}]", i),
            country.clone(),
        ));
    }

    let mut metadata: Vec<_> = request.metadata.to_map().into_iter().collect();
    metadata.sort();
    for (key, value) in metadata {
        form.push((format!("metadata[{}]", key), value));
    }
    form
}

/// Reads a checkout session object, from the API or from an event payload.
pub fn parse_session(object: &Value) -> Option<CardSessionDetails> {
    let id = object["id"].as_str()?.to_string();
    let payment_intent = match &object["payment_intent"] {
        Value::String(s) => Some(s.clone()),
        Value::Object(pi) => pi.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    let customer = &object["customer_details"];
    let text = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);

    let shipping = [
        &object["shipping_details"],
        &object["collected_information"]["shipping_details"],
        customer,
    ]
    .into_iter()
    .find(|candidate| candidate["address"]["line1"].is_string())
    .map(|candidate| &candidate["address"]);
    let shipping_address = shipping.map(|address| ShippingAddress {
        line1: text(&address["line1"]).unwrap_or_default(),
        line2: text(&address["line2"]),
        city: text(&address["city"]).unwrap_or_default(),
        county: text(&address["state"]),
        postcode: text(&address["postal_code"]).unwrap_or_default(),
        country: text(&address["country"]).unwrap_or_default(),
    });

    let metadata: HashMap<String, String> = object["metadata"]
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(CardSessionDetails {
        id,
        payment_intent,
        payment_status: text(&object["payment_status"]),
        amount_total: object["amount_total"].as_i64(),
        currency: text(&object["currency"]),
        customer_email: text(&customer["email"]).or_else(|| text(&object["customer_email"])),
        customer_name: text(&customer["name"])
            .or_else(|| text(&object["shipping_details"]["name"])),
        customer_phone: text(&customer["phone"]),
        shipping_address,
        metadata,
    })
}

/// Turns a verified event body into a [`CardWebhookEvent`].
pub fn parse_event(payload: &[u8]) -> Result<CardWebhookEvent, ServiceError> {
    let event: Value = serde_json::from_slice(payload)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid webhook payload: {}", e)))?;
    let event_type = event["type"].as_str().unwrap_or_default().to_string();
    let object = &event["data"]["object"];

    match event_type.as_str() {
        EVENT_CHECKOUT_COMPLETED | EVENT_ASYNC_PAYMENT_SUCCEEDED => {
            let session = parse_session(object)
                .ok_or_else(|| ServiceError::BadRequest("Webhook session is malformed".into()))?;
            if event_type == EVENT_CHECKOUT_COMPLETED {
                Ok(CardWebhookEvent::CheckoutCompleted(session))
            } else {
                Ok(CardWebhookEvent::AsyncPaymentSucceeded(session))
            }
        }
        _ => Ok(CardWebhookEvent::Other { event_type }),
    }
}

#[async_trait]
impl CardProcessor for StripeClient {
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    async fn create_card_session(
        &self,
        request: &CardSessionRequest,
    ) -> Result<CardSession, ServiceError> {
        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(self.secret_key()?, Some(""))
            .form(&session_form(request))
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let id = body["id"]
            .as_str()
            .ok_or_else(|| ServiceError::ExternalServiceError("session id missing".into()))?;
        Ok(CardSession {
            id: id.to_string(),
            url: body["url"].as_str().map(str::to_string),
        })
    }

    #[instrument(skip(self))]
    async fn retrieve_card_session(
        &self,
        session_id: &str,
    ) -> Result<CardSessionDetails, ServiceError> {
        let response = self
            .http
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id))
            .basic_auth(self.secret_key()?, Some(""))
            .query(&[("expand[]", "payment_intent")])
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        parse_session(&body)
            .ok_or_else(|| ServiceError::ExternalServiceError("session payload is malformed".into()))
    }

    fn verify_card_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<CardWebhookEvent, ServiceError> {
        let secret = self.webhook_secret.as_deref().filter(|s| !s.is_empty()).ok_or_else(|| {
            tracing::error!("webhook secret is not configured; rejecting event");
            ServiceError::BadRequest("Webhook signature verification failed".into())
        })?;

        verify_stripe_signature(
            payload,
            signature,
            secret,
            self.tolerance_secs,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e| {
            warn!(target: "security", error = %e, "webhook signature rejected");
            ServiceError::BadRequest("Webhook signature verification failed".into())
        })?;

        parse_event(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let sig = sign_payload(SECRET, "1700000000", body);
        let header = format!("t=1700000000,v1={}", sig);
        assert_eq!(
            verify_stripe_signature(body, &header, SECRET, 300, 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn tampered_body_stale_timestamp_and_garbage_are_rejected() {
        let body = br#"{"amount":100}"#;
        let sig = sign_payload(SECRET, "1700000000", body);
        let header = format!("t=1700000000,v1={}", sig);

        assert_eq!(
            verify_stripe_signature(br#"{"amount":1}"#, &header, SECRET, 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_stripe_signature(body, &header, SECRET, 300, 1_700_000_301),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verify_stripe_signature(body, "v1=abc", SECRET, 300, 1_700_000_000),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_stripe_signature(body, &header, "other", 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn session_parsing_reads_customer_and_address() {
        let session = parse_session(&json!({
            "id": "cs_test_1",
            "payment_intent": "pi_1",
            "amount_total": 3198,
            "currency": "gbp",
            "customer_details": {
                "email": "shopper@example.com",
                "name": "Sam Shopper",
                "phone": "+447700900123",
                "address": {"line1": "1 High St", "city": "Leeds", "postal_code": "LS1 1AA", "country": "GB"}
            },
            "metadata": {"items": "[{\"id\":1,\"q\":2}]"}
        }))
        .unwrap();

        assert_eq!(session.payment_id(), "pi_1");
        assert_eq!(session.amount_total, Some(3198));
        let address = session.shipping_address.unwrap();
        assert_eq!(address.city, "Leeds");
        assert_eq!(address.postcode, "LS1 1AA");
        assert_eq!(session.metadata.len(), 1);
    }

    #[test]
    fn unknown_events_are_passed_through() {
        let event = parse_event(br#"{"type":"charge.refunded","data":{"object":{}}}"#).unwrap();
        assert!(matches!(event, CardWebhookEvent::Other { event_type } if event_type == "charge.refunded"));
        assert!(parse_event(b"not json").is_err());
    }
}
