use axum::{
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::{
    errors::ServiceError,
    services::payments::{CardSessionDetails, CardWebhookEvent, PaymentConfirmation},
    AppState,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Processor lookups that fail mid-finalisation are retried by redelivery,
/// so they surface as 500 here rather than the 502 checkout uses.
fn redeliverable(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::ExternalServiceError(msg) => ServiceError::InternalError(msg),
        other => other,
    }
}

async fn finalise_session(state: &AppState, details: CardSessionDetails) -> Result<Value, ServiceError> {
    if details.payment_status.as_deref() == Some("unpaid") {
        info!(session_id = %details.id, "session completed without payment; awaiting async result");
        return Ok(json!({ "received": true, "pending": true }));
    }
    let outcome = state
        .services
        .finaliser
        .finalise(PaymentConfirmation::from_card_session(details))
        .await
        .map_err(redeliverable)?;
    Ok(json!({
        "received": true,
        "orderNumber": outcome.order().order_number,
        "duplicate": outcome.is_duplicate(),
    }))
}

/// POST /api/webhooks
///
/// 200 once handled or deliberately ignored; 400 for anything a retry
/// cannot fix; 500 asks the processor to redeliver.
#[instrument(skip_all)]
pub async fn card_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    if !is_json(&headers) {
        return Err(ServiceError::BadRequest(
            "Content-Type must be application/json".into(),
        ));
    }
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!(target: "security", "webhook delivered without a signature");
            ServiceError::BadRequest("Missing signature".into())
        })?;

    let event = state.services.card.verify_card_webhook(&body, signature)?;
    let response = match event {
        CardWebhookEvent::CheckoutCompleted(details)
        | CardWebhookEvent::AsyncPaymentSucceeded(details) => {
            finalise_session(&state, details).await?
        }
        CardWebhookEvent::Other { event_type } => {
            info!(%event_type, "ignoring webhook event");
            json!({ "received": true, "ignored": true })
        }
    };
    Ok(Json(response))
}
