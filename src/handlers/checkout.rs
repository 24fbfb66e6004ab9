use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use super::common::JsonBody;
use crate::{
    errors::ServiceError,
    middleware_helpers::ClientInfo,
    services::checkout::{
        CardCheckout, CheckoutRequest, GiftCardCheckout, GiftCardCheckoutRequest, WalletCheckout,
    },
    AppState,
};

/// POST /api/stripe-checkout
#[instrument(skip_all)]
pub async fn card_checkout(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CheckoutRequest>,
) -> Result<Json<CardCheckout>, ServiceError> {
    let session = state.services.checkout.start_card_checkout(&request).await?;
    Ok(Json(session))
}

/// POST /api/paypal-checkout
#[instrument(skip_all)]
pub async fn wallet_checkout(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CheckoutRequest>,
) -> Result<Json<WalletCheckout>, ServiceError> {
    let order = state.services.checkout.start_wallet_checkout(&request).await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct WalletCaptureRequest {
    #[serde(rename = "orderID", alias = "orderId", alias = "order_id")]
    pub order_id: String,
}

/// POST /api/paypal-capture
#[instrument(skip_all)]
pub async fn wallet_capture(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<WalletCaptureRequest>,
) -> Result<Json<Value>, ServiceError> {
    let order_id = request.order_id.trim();
    if order_id.is_empty() {
        return Err(ServiceError::ValidationError("orderID is required".into()));
    }
    let outcome = state.services.finaliser.capture_wallet(order_id).await?;
    Ok(Json(json!({
        "success": true,
        "orderNumber": outcome.order().order_number,
        "duplicate": outcome.is_duplicate(),
    })))
}

/// POST /api/gift-card-only-checkout
#[instrument(skip_all, fields(ip = %client.ip_or_unknown()))]
pub async fn gift_card_checkout(
    State(state): State<AppState>,
    client: ClientInfo,
    JsonBody(request): JsonBody<GiftCardCheckoutRequest>,
) -> Result<Json<GiftCardCheckout>, ServiceError> {
    let result = state
        .services
        .checkout
        .gift_card_only(&request, &client)
        .await?;
    Ok(Json(result))
}
