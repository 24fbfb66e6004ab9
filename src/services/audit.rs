use crate::{
    entities::audit_log::{self, Entity as AuditLogEntity},
    errors::ServiceError,
    middleware_helpers::client::ClientInfo,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, QuerySelect, Set};
use serde_json::{json, Value};
use std::{fmt, sync::Arc};
use tracing::{instrument, warn};
use uuid::Uuid;

pub const MAX_AUDIT_PAGE: u64 = 200;
const DEFAULT_AUDIT_PAGE: u64 = 50;

/// Audit action codes written to `audit_logs.action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    LoginSuccess,
    LoginFailed,
    MfaEnabled,
    MfaVerified,
    MfaFailed,
    BackupCodeUsed,
    BackupCodesRegenerated,
    TokenRefreshed,
    Logout,
    OrderStatusChanged,
    GiftCardIssued,
    GiftCardActivated,
    SecurityAnomaly,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::MfaEnabled => "MFA_ENABLED",
            Self::MfaVerified => "MFA_VERIFIED",
            Self::MfaFailed => "MFA_FAILED",
            Self::BackupCodeUsed => "BACKUP_CODE_USED",
            Self::BackupCodesRegenerated => "BACKUP_CODES_REGENERATED",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::Logout => "LOGOUT",
            Self::OrderStatusChanged => "ORDER_STATUS_CHANGED",
            Self::GiftCardIssued => "GIFT_CARD_ISSUED",
            Self::GiftCardActivated => "GIFT_CARD_ACTIVATED",
            Self::SecurityAnomaly => "SECURITY_ANOMALY",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security-relevant events that are not plain authentication outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    RefreshTokenReplay,
    AccountLocked,
    XssRejected,
    AmountMismatch,
    CasConflict,
    BlockedIp,
    CsrfMismatch,
    UnresolvedGiftCard,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RefreshTokenReplay => "refresh_token_replay",
            Self::AccountLocked => "account_locked",
            Self::XssRejected => "xss_rejected",
            Self::AmountMismatch => "amount_mismatch",
            Self::CasConflict => "cas_conflict",
            Self::BlockedIp => "blocked_ip",
            Self::CsrfMismatch => "csrf_mismatch",
            Self::UnresolvedGiftCard => "unresolved_gift_card",
        }
    }
}

/// One audit row before it is written.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub details: Value,
    pub client: ClientInfo,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            user_id: None,
            user_email: None,
            resource_type: None,
            resource_id: None,
            details: json!({}),
            client: ClientInfo::default(),
        }
    }

    pub fn user(mut self, user_id: Uuid, email: impl Into<String>) -> Self {
        self.user_id = Some(user_id);
        self.user_email = Some(email.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    pub fn resource(mut self, resource_type: &str, resource_id: impl ToString) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn client(mut self, client: &ClientInfo) -> Self {
        self.client = client.clone();
        self
    }
}

/// Append-only audit trail. Writes never fail the calling request.
#[derive(Clone)]
pub struct AuditService {
    db: Arc<DatabaseConnection>,
}

impl AuditService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, entry), fields(action = %entry.action))]
    pub async fn record(&self, entry: AuditEntry) {
        let row = audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            action: Set(entry.action.as_str().to_string()),
            user_id: Set(entry.user_id),
            user_email: Set(entry.user_email),
            resource_type: Set(entry.resource_type),
            resource_id: Set(entry.resource_id),
            details: Set(entry.details),
            ip_address: Set(entry.client.ip),
            user_agent: Set(entry.client.user_agent),
            created_at: Set(Utc::now()),
        };

        if let Err(e) = row.insert(&*self.db).await {
            warn!(error = %e, "failed to write audit log entry");
        }
    }

    /// Logs to the `security` target and records a `SECURITY_ANOMALY` row.
    pub async fn log_anomaly(&self, kind: AnomalyKind, details: Value, client: &ClientInfo) {
        warn!(
            target: "security",
            anomaly = kind.as_str(),
            ip = client.ip.as_deref().unwrap_or("unknown"),
            details = %details,
            "security anomaly"
        );

        let mut payload = json!({ "kind": kind.as_str() });
        if let (Some(map), Value::Object(extra)) = (payload.as_object_mut(), details) {
            map.extend(extra);
        }
        self.record(
            AuditEntry::new(AuditAction::SecurityAnomaly)
                .details(payload)
                .client(client),
        )
        .await;
    }

    /// Newest entries first.
    #[instrument(skip(self))]
    pub async fn recent(&self, limit: Option<u64>) -> Result<Vec<audit_log::Model>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_AUDIT_PAGE).clamp(1, MAX_AUDIT_PAGE);
        let rows = AuditLogEntity::find()
            .order_by_desc(audit_log::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }
}
