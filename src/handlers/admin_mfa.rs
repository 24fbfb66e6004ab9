use axum::{extract::State, response::Response, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use super::common::{session_response, JsonBody};
use crate::{
    auth::AdminSession,
    errors::ServiceError,
    middleware_helpers::ClientInfo,
    services::admin_auth::{MfaSetup, MfaStatus},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaRequest {
    #[serde(default, alias = "setup_token")]
    pub setup_token: Option<String>,
    #[serde(default, alias = "pre_mfa_token")]
    pub pre_mfa_token: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ServiceError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::ValidationError(format!("{} is required", name)))
}

/// POST /api/admin-mfa/setup
#[instrument(skip_all)]
pub async fn setup(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<MfaRequest>,
) -> Result<Json<MfaSetup>, ServiceError> {
    let token = required(&request.setup_token, "setupToken")?;
    Ok(Json(state.services.admin_auth.setup(token).await?))
}

/// POST /api/admin-mfa/verify
#[instrument(skip_all)]
pub async fn verify(
    State(state): State<AppState>,
    client: ClientInfo,
    JsonBody(request): JsonBody<MfaRequest>,
) -> Result<Response, ServiceError> {
    let token = required(&request.setup_token, "setupToken")?;
    let code = required(&request.code, "code")?;
    let enrolled = state
        .services
        .admin_auth
        .verify_setup(token, code, &client)
        .await?;
    session_response(
        &enrolled.session,
        state.config.secure_cookies(),
        json!({ "backupCodes": enrolled.backup_codes }),
    )
}

/// POST /api/admin-mfa/validate
#[instrument(skip_all)]
pub async fn validate(
    State(state): State<AppState>,
    client: ClientInfo,
    JsonBody(request): JsonBody<MfaRequest>,
) -> Result<Response, ServiceError> {
    let token = required(&request.pre_mfa_token, "preMfaToken")?;
    let code = required(&request.code, "code")?;
    let session = state
        .services
        .admin_auth
        .validate(token, code, &client)
        .await?;
    session_response(&session, state.config.secure_cookies(), json!({}))
}

/// POST /api/admin-mfa/backup
#[instrument(skip_all)]
pub async fn backup(
    State(state): State<AppState>,
    client: ClientInfo,
    JsonBody(request): JsonBody<MfaRequest>,
) -> Result<Response, ServiceError> {
    let token = required(&request.pre_mfa_token, "preMfaToken")?;
    let code = required(&request.code, "code")?;
    let login = state
        .services
        .admin_auth
        .redeem_backup(token, code, &client)
        .await?;
    let mut extra = json!({ "backupCodesRemaining": login.remaining });
    if let Some(warning) = login.warning {
        extra["warning"] = json!(warning);
    }
    session_response(&login.session, state.config.secure_cookies(), extra)
}

/// POST /api/admin-mfa/regenerate
#[instrument(skip_all, fields(user_id = %session.user.id))]
pub async fn regenerate(
    State(state): State<AppState>,
    session: AdminSession,
    client: ClientInfo,
    JsonBody(request): JsonBody<MfaRequest>,
) -> Result<Json<Value>, ServiceError> {
    let code = required(&request.code, "code")?;
    let codes = state
        .services
        .admin_auth
        .regenerate_backup_codes(session.user.id, code, &client)
        .await?;
    Ok(Json(json!({ "success": true, "backupCodes": codes })))
}

/// GET /api/admin-mfa/status
pub async fn status(
    State(state): State<AppState>,
    session: AdminSession,
) -> Result<Json<MfaStatus>, ServiceError> {
    Ok(Json(
        state.services.admin_auth.mfa_status(session.user.id).await?,
    ))
}
