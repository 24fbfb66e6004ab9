use axum::{
    extract::{Path, Query, State},
    Json,
};
use sea_orm::ActiveEnum;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use super::common::JsonBody;
use crate::{
    auth::AdminSession,
    entities::OrderStatus,
    errors::ServiceError,
    middleware_helpers::ClientInfo,
    services::{
        audit::{AuditAction, AuditEntry},
        orders::{status_change_details, AdminOrderView, PublicOrder},
    },
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct OrderLookupQuery {
    #[serde(default, alias = "orderNumber")]
    pub order_number: Option<String>,
}

/// GET /api/orders?order_number=FS-YYYYMMDD-NNNN
#[instrument(skip_all)]
pub async fn public_lookup(
    State(state): State<AppState>,
    Query(query): Query<OrderLookupQuery>,
) -> Result<Json<PublicOrder>, ServiceError> {
    let number = query
        .order_number
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ServiceError::ValidationError("order_number is required".into()))?;
    Ok(Json(state.services.orders.public_lookup(number).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// PATCH /api/admin-orders/{id}/status
#[instrument(skip_all, fields(order_id = %id, user_id = %session.user.id))]
pub async fn update_status(
    State(state): State<AppState>,
    session: AdminSession,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    JsonBody(update): JsonBody<StatusUpdate>,
) -> Result<Json<AdminOrderView>, ServiceError> {
    let next = OrderStatus::try_from_value(&update.status.trim().to_lowercase())
        .map_err(|_| ServiceError::ValidationError(format!("Unknown status '{}'", update.status)))?;

    let (from, order) = state.services.orders.transition_status(id, next).await?;
    state
        .services
        .audit
        .record(
            AuditEntry::new(AuditAction::OrderStatusChanged)
                .user(session.user.id, &session.user.email)
                .resource("order", order.id)
                .details(status_change_details(&order, from))
                .client(&client),
        )
        .await;
    Ok(Json(state.services.orders.admin_view(&order)?))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u64>,
}

/// GET /api/admin-audit?limit=
#[instrument(skip_all)]
pub async fn audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, ServiceError> {
    let entries = state.services.audit.recent(query.limit).await?;
    Ok(Json(json!({ "entries": entries })))
}
