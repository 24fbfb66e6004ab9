use axum::{
    extract::State,
    http::{HeaderMap, Method},
    response::Response,
    Json,
};
use serde_json::{json, Value};
use tracing::instrument;

use super::common::{session_response, success_response, user_json, with_cookies, JsonBody};
use crate::{
    auth::cookies,
    errors::ServiceError,
    middleware_helpers::ClientInfo,
    services::admin_auth::{LoginRequest, LoginResponse},
    AppState,
};

/// POST /api/admin-auth
#[instrument(skip_all, fields(ip = %client.ip_or_unknown()))]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<Json<LoginResponse>, ServiceError> {
    let response = state.services.admin_auth.login(&request, &client).await?;
    Ok(Json(response))
}

/// GET /api/admin-auth
///
/// Reports whether the caller's cookies or bearer token still hold a valid
/// session. Expired access tokens answer 401 with `TOKEN_EXPIRED` so the
/// page can refresh.
#[instrument(skip_all)]
pub async fn verify(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    client: ClientInfo,
) -> Result<Json<Value>, ServiceError> {
    let session = state
        .services
        .gateway
        .admit(&method, "/api/admin-auth", &headers, &client)
        .await?;
    Ok(Json(json!({ "valid": true, "user": user_json(&session.user) })))
}

/// DELETE /api/admin-auth
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    client: ClientInfo,
) -> Result<Response, ServiceError> {
    let jar = cookies::parse_cookies(&headers);
    state
        .services
        .admin_auth
        .logout(jar.get(cookies::REFRESH_COOKIE).map(String::as_str), &client)
        .await;
    Ok(with_cookies(
        success_response(json!({ "success": true })),
        cookies::clear_cookies(state.config.secure_cookies())?,
    ))
}

/// POST /api/admin-refresh
#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    client: ClientInfo,
) -> Result<Response, ServiceError> {
    let jar = cookies::parse_cookies(&headers);
    let token = jar
        .get(cookies::REFRESH_COOKIE)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("No refresh token".into()))?;

    let session = state.services.admin_auth.refresh(token, &client).await?;
    session_response(&session, state.config.secure_cookies(), json!({}))
}
