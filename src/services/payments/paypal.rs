use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{instrument, warn};

use super::{
    format_minor, parse_major, WalletCapture, WalletOrder, WalletOrderRequest, WalletProcessor,
};
use crate::{
    config::AppConfig,
    errors::ServiceError,
    services::checkout::metadata::parse_item_sku,
    validation::ShippingAddress,
};

/// Wallet processor over the Orders v2 REST API.
#[derive(Clone)]
pub struct PayPalClient {
    http: reqwest::Client,
    api_base: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl PayPalClient {
    pub fn new(
        api_base: impl Into<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.paypal_api_base(),
            config.paypal_client_id.clone(),
            config.paypal_client_secret.clone(),
        )
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, ServiceError> {
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            warn!(
                status = %status,
                name = body["name"].as_str().unwrap_or("unknown"),
                "wallet processor request failed"
            );
            return Err(ServiceError::ExternalServiceError(format!(
                "wallet processor returned {}",
                status
            )));
        }
        Ok(body)
    }

    async fn fetch_order(&self, token: &str, order_id: &str) -> Result<Value, ServiceError> {
        let response = self
            .http
            .get(format!("{}/v2/checkout/orders/{}", self.api_base, order_id))
            .bearer_auth(token)
            .send()
            .await?;
        Self::read_json(response).await
    }
}

/// Orders v2 request body. Item totals are computed from the lines so the
/// processor's breakdown check always balances.
pub fn order_body(request: &WalletOrderRequest) -> Value {
    let currency = request.currency.to_uppercase();
    let item_total: i64 = request
        .lines
        .iter()
        .map(|l| l.unit_amount * i64::from(l.quantity))
        .sum();
    let items: Vec<Value> = request
        .lines
        .iter()
        .map(|line| {
            json!({
                "name": line.name,
                "sku": line.sku(),
                "quantity": line.quantity.to_string(),
                "unit_amount": {"currency_code": currency, "value": format_minor(line.unit_amount)},
            })
        })
        .collect();

    json!({
        "intent": "CAPTURE",
        "purchase_units": [{
            "custom_id": request.custom_id,
            "amount": {
                "currency_code": currency,
                "value": format_minor(item_total + request.shipping),
                "breakdown": {
                    "item_total": {"currency_code": currency, "value": format_minor(item_total)},
                    "shipping": {"currency_code": currency, "value": format_minor(request.shipping)},
                },
            },
            "items": items,
        }],
        "application_context": {
            "return_url": request.return_url,
            "cancel_url": request.cancel_url,
            "shipping_preference": "GET_FROM_FILE",
            "user_action": "PAY_NOW",
        },
    })
}

/// Combines the capture response with the order it captured. The capture
/// response omits item lines, so those come from `order`.
pub fn parse_capture(capture: &Value, order: &Value) -> Option<WalletCapture> {
    let unit = &capture["purchase_units"][0];
    let payment = &unit["payments"]["captures"][0];
    let text = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);

    let capture_id = text(&payment["id"])?;
    let amount = payment["amount"]["value"].as_str().and_then(parse_major)?;

    let order_unit = &order["purchase_units"][0];
    let items = order_unit["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let quantity = item["quantity"].as_str()?.parse::<i32>().ok()?;
                    parse_item_sku(item["sku"].as_str()?, quantity)
                })
                .collect()
        })
        .unwrap_or_default();

    let shipping = if unit["shipping"]["address"].is_object() {
        &unit["shipping"]
    } else {
        &order_unit["shipping"]
    };
    let address = &shipping["address"];
    let shipping_address = text(&address["address_line_1"]).map(|line1| ShippingAddress {
        line1,
        line2: text(&address["address_line_2"]),
        city: text(&address["admin_area_2"]).unwrap_or_default(),
        county: text(&address["admin_area_1"]),
        postcode: text(&address["postal_code"]).unwrap_or_default(),
        country: text(&address["country_code"]).unwrap_or_default(),
    });

    let payer = &capture["payer"];
    let payer_name = text(&shipping["name"]["full_name"]).or_else(|| {
        let given = payer["name"]["given_name"].as_str().unwrap_or_default();
        let surname = payer["name"]["surname"].as_str().unwrap_or_default();
        let full = format!("{} {}", given, surname).trim().to_string();
        (!full.is_empty()).then_some(full)
    });

    Some(WalletCapture {
        order_id: text(&capture["id"]).unwrap_or_default(),
        capture_id,
        status: text(&payment["status"])
            .or_else(|| text(&capture["status"]))
            .unwrap_or_default(),
        amount,
        currency: payment["amount"]["currency_code"]
            .as_str()
            .unwrap_or_default()
            .to_lowercase(),
        payer_email: text(&payer["email_address"]),
        payer_name,
        shipping_address,
        custom_id: text(&payment["custom_id"]).or_else(|| text(&order_unit["custom_id"])),
        items,
    })
}

#[async_trait]
impl WalletProcessor for PayPalClient {
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    async fn create_wallet_order(
        &self,
        request: &WalletOrderRequest,
    ) -> Result<WalletOrder, ServiceError> {
        let token = self.wallet_access_token().await?;
        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(token)
            .json(&order_body(request))
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let id = body["id"]
            .as_str()
            .ok_or_else(|| ServiceError::ExternalServiceError("wallet order id missing".into()))?;
        let approve_url = body["links"].as_array().and_then(|links| {
            links
                .iter()
                .find(|l| matches!(l["rel"].as_str(), Some("approve" | "payer-action")))
                .and_then(|l| l["href"].as_str())
                .map(str::to_string)
        });
        Ok(WalletOrder {
            id: id.to_string(),
            approve_url,
        })
    }

    #[instrument(skip(self))]
    async fn capture_wallet_order(&self, order_id: &str) -> Result<WalletCapture, ServiceError> {
        let token = self.wallet_access_token().await?;
        let response = self
            .http
            .post(format!("{}/v2/checkout/orders/{}/capture", self.api_base, order_id))
            .bearer_auth(&token)
            .json(&json!({}))
            .send()
            .await?;
        let capture = Self::read_json(response).await?;
        let order = self.fetch_order(&token, order_id).await?;

        parse_capture(&capture, &order)
            .ok_or_else(|| ServiceError::ExternalServiceError("capture payload is malformed".into()))
    }

    async fn wallet_access_token(&self) -> Result<String, ServiceError> {
        let (Some(id), Some(secret)) = (self.client_id.as_deref(), self.client_secret.as_deref())
        else {
            return Err(ServiceError::ExternalServiceError(
                "wallet processor is not configured".into(),
            ));
        };

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(id, Some(secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::ExternalServiceError("access token missing".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payments::DisplayLine;

    #[test]
    fn order_body_breakdown_balances() {
        let body = order_body(&WalletOrderRequest {
            currency: "gbp".into(),
            lines: vec![DisplayLine {
                product_id: 4,
                name: "Tea towel".into(),
                unit_amount: 799,
                quantity: 2,
                variation: Some("Blue".into()),
            }],
            shipping: 349,
            custom_id: "fd=1".into(),
            return_url: "https://shop.example/success".into(),
            cancel_url: "https://shop.example/cart".into(),
        });

        let unit = &body["purchase_units"][0];
        assert_eq!(unit["amount"]["value"], "19.47");
        assert_eq!(unit["amount"]["currency_code"], "GBP");
        assert_eq!(unit["amount"]["breakdown"]["item_total"]["value"], "15.98");
        assert_eq!(unit["items"][0]["sku"], "4|Blue");
        assert_eq!(unit["items"][0]["quantity"], "2");
    }

    #[test]
    fn capture_is_read_with_items_from_order() {
        let capture = json!({
            "id": "ORDER-1",
            "status": "COMPLETED",
            "payer": {"email_address": "buyer@example.com", "name": {"given_name": "Ada", "surname": "Byron"}},
            "purchase_units": [{
                "shipping": {"address": {
                    "address_line_1": "2 Mill Lane", "admin_area_2": "York",
                    "postal_code": "YO1 7HH", "country_code": "GB"
                }},
                "payments": {"captures": [{
                    "id": "CAP-9", "status": "COMPLETED", "custom_id": "dc=SAVE5;da=500",
                    "amount": {"value": "27.47", "currency_code": "GBP"}
                }]}
            }]
        });
        let order = json!({
            "purchase_units": [{"items": [
                {"sku": "4|Blue", "quantity": "2"},
                {"sku": "11", "quantity": "1"}
            ]}]
        });

        let parsed = parse_capture(&capture, &order).unwrap();
        assert!(parsed.is_completed());
        assert_eq!(parsed.capture_id, "CAP-9");
        assert_eq!(parsed.amount, 2747);
        assert_eq!(parsed.currency, "gbp");
        assert_eq!(parsed.payer_name.as_deref(), Some("Ada Byron"));
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].variation.as_deref(), Some("Blue"));
        assert_eq!(parsed.custom_id.as_deref(), Some("dc=SAVE5;da=500"));
        assert_eq!(parsed.shipping_address.unwrap().city, "York");
    }
}
