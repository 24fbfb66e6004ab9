/*!
 * # Administrator Authentication
 *
 * Password login with rolling bcrypt upgrade, mandatory TOTP second factor,
 * salted backup codes, and refresh-token rotation with single-use `jti`s.
 *
 * Every call returns either a challenge (second factor still owed) or an
 * [`AuthenticatedSession`] whose tokens the HTTP layer turns into cookies.
 */

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        mfa::{generate_backup_codes, redeem_backup_code, Totp},
        password::{PasswordHasher, PasswordMatch},
        permissions::is_known_role,
        rate_limit::{RateLimiter, MFA_MAX_ATTEMPTS},
        tokens::{
            SessionTokens, SessionUser, TokenService, SETUP_CONTINUATION_TTL_SECS,
            SETUP_TOKEN_TTL_SECS,
        },
    },
    crypto::FieldCipher,
    entities::{
        admin_refresh_token::{self, Entity as RefreshTokenEntity},
        admin_user::{self, Entity as AdminUserEntity},
    },
    errors::{is_unique_violation, ServiceError},
    middleware_helpers::client::ClientInfo,
    services::audit::{AnomalyKind, AuditAction, AuditEntry, AuditService},
    validation::validate_email,
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_CODE: &str = "Invalid verification code";
const LOW_BACKUP_CODES: usize = 3;
const MIN_PASSWORD_LEN: usize = 12;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MfaChallenge {
    pub requires_mfa: bool,
    pub pre_mfa_token: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetupChallenge {
    pub requires_mfa_setup: bool,
    pub setup_token: String,
    /// Enrolment was started earlier and not confirmed
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub resume: bool,
}

/// A correct password never yields a session on its own.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LoginResponse {
    Mfa(MfaChallenge),
    Setup(SetupChallenge),
}

#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub user: SessionUser,
    pub tokens: SessionTokens,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaSetup {
    pub secret: String,
    pub otpauth_url: String,
    pub qr_code_url: String,
}

#[derive(Debug, Clone)]
pub struct MfaEnrolled {
    pub session: AuthenticatedSession,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackupLogin {
    pub session: AuthenticatedSession,
    pub remaining: usize,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MfaStatus {
    pub mfa_enabled: bool,
    pub backup_codes_remaining: usize,
}

#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub email: String,
    pub name: String,
    pub role: String,
    pub password: String,
}

pub fn mfa_limiter_key(user_id: Uuid) -> String {
    format!("mfa:{}", user_id)
}

fn low_backup_warning(remaining: usize) -> Option<String> {
    (remaining < LOW_BACKUP_CODES).then(|| {
        format!(
            "Only {} backup codes remaining. Consider regenerating them.",
            remaining
        )
    })
}

#[derive(Clone)]
pub struct AdminAuthService {
    db: Arc<DatabaseConnection>,
    tokens: TokenService,
    passwords: PasswordHasher,
    login_limiter: RateLimiter,
    mfa_limiter: RateLimiter,
    totp: Totp,
    cipher: FieldCipher,
    audit: AuditService,
}

impl AdminAuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        tokens: TokenService,
        passwords: PasswordHasher,
        login_limiter: RateLimiter,
        mfa_limiter: RateLimiter,
        totp: Totp,
        cipher: FieldCipher,
        audit: AuditService,
    ) -> Self {
        Self {
            db,
            tokens,
            passwords,
            login_limiter,
            mfa_limiter,
            totp,
            cipher,
            audit,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<admin_user::Model>, ServiceError> {
        Ok(AdminUserEntity::find()
            .filter(admin_user::Column::Email.eq(email))
            .one(&*self.db)
            .await?)
    }

    /// Active administrator or 401.
    pub async fn load_active(&self, id: Uuid) -> Result<admin_user::Model, ServiceError> {
        AdminUserEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| ServiceError::Unauthorized("Account not found or disabled".into()))
    }

    fn mfa_secret(&self, user: &admin_user::Model) -> Result<Option<String>, ServiceError> {
        user.mfa_secret
            .as_deref()
            .map(|stored| self.cipher.decrypt(stored))
            .transpose()
    }

    async fn login_failed(&self, email: &str, reason: &str, client: &ClientInfo) -> ServiceError {
        let ip = client.ip_or_unknown();
        self.login_limiter.record_login_failure(email, ip).await;
        if !self.login_limiter.check_login(email, ip).await.allowed {
            self.audit
                .log_anomaly(AnomalyKind::AccountLocked, json!({ "email": email }), client)
                .await;
        }
        self.audit
            .record(
                AuditEntry::new(AuditAction::LoginFailed)
                    .email(email)
                    .details(json!({ "reason": reason }))
                    .client(client),
            )
            .await;
        ServiceError::Unauthorized(INVALID_CREDENTIALS.into())
    }

    #[instrument(skip(self, request, client), fields(ip = %client.ip_or_unknown()))]
    pub async fn login(
        &self,
        request: &LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginResponse, ServiceError> {
        let email = request.email.trim().to_lowercase();
        if email.is_empty() || request.password.is_empty() {
            return Err(ServiceError::BadRequest(
                "Email and password are required".into(),
            ));
        }

        self.login_limiter
            .check_login(&email, client.ip_or_unknown())
            .await
            .into_result()?;

        let user = match self.find_by_email(&email).await? {
            Some(user) if user.is_active => user,
            other => {
                self.passwords.verify_absent(&request.password).await;
                let reason = if other.is_some() { "inactive" } else { "unknown_user" };
                return Err(self.login_failed(&email, reason, client).await);
            }
        };

        match self.passwords.verify(&request.password, &user.password_hash).await? {
            PasswordMatch::Mismatch => {
                return Err(self.login_failed(&email, "bad_password", client).await)
            }
            PasswordMatch::Legacy => self.upgrade_password(&user, &request.password).await,
            PasswordMatch::Modern => {}
        }

        self.login_limiter.clear_login(&email).await;

        if user.mfa_enabled {
            return Ok(LoginResponse::Mfa(MfaChallenge {
                requires_mfa: true,
                pre_mfa_token: self.tokens.issue_pre_mfa(user.id, &user.email)?,
            }));
        }

        let resume = user.mfa_secret.is_some();
        let ttl = if resume {
            SETUP_CONTINUATION_TTL_SECS
        } else {
            SETUP_TOKEN_TTL_SECS
        };
        info!(user_id = %user.id, resume, "second factor enrolment required");
        Ok(LoginResponse::Setup(SetupChallenge {
            requires_mfa_setup: true,
            setup_token: self.tokens.issue_setup(user.id, &user.email, ttl)?,
            resume,
        }))
    }

    /// Replaces a legacy digest with bcrypt. Failures only log.
    async fn upgrade_password(&self, user: &admin_user::Model, password: &str) {
        let hash = match self.passwords.hash(password).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "legacy password re-hash failed");
                return;
            }
        };
        let result = AdminUserEntity::update_many()
            .col_expr(admin_user::Column::PasswordHash, Expr::value(hash))
            .col_expr(admin_user::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(admin_user::Column::Id.eq(user.id))
            .exec(&*self.db)
            .await;
        match result {
            Ok(_) => info!(user_id = %user.id, "legacy password hash upgraded"),
            Err(e) => warn!(user_id = %user.id, error = %e, "legacy password upgrade not saved"),
        }
    }

    /// Generates and stores a TOTP secret for an account still enrolling.
    #[instrument(skip_all)]
    pub async fn setup(&self, setup_token: &str) -> Result<MfaSetup, ServiceError> {
        let claims = self.tokens.verify_setup(setup_token)?;
        let user = self.load_active(claims.user_id).await?;
        if user.mfa_enabled {
            return Err(ServiceError::BadRequest("MFA is already enabled".into()));
        }

        let enrollment = self.totp.enroll(&user.email);
        AdminUserEntity::update_many()
            .col_expr(
                admin_user::Column::MfaSecret,
                Expr::value(Some(self.cipher.encrypt(&enrollment.secret)?)),
            )
            .col_expr(admin_user::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(admin_user::Column::Id.eq(user.id))
            .exec(&*self.db)
            .await?;

        info!(user_id = %user.id, "TOTP secret generated");
        Ok(MfaSetup {
            secret: enrollment.secret,
            otpauth_url: enrollment.otpauth_url,
            qr_code_url: enrollment.qr_code_url,
        })
    }

    /// Confirms enrolment with a first code, hands out backup codes and
    /// signs the administrator in.
    #[instrument(skip_all)]
    pub async fn verify_setup(
        &self,
        setup_token: &str,
        code: &str,
        client: &ClientInfo,
    ) -> Result<MfaEnrolled, ServiceError> {
        let claims = self.tokens.verify_setup(setup_token)?;
        let user = self.load_active(claims.user_id).await?;
        if user.mfa_enabled {
            return Err(ServiceError::BadRequest("MFA is already enabled".into()));
        }
        let secret = self
            .mfa_secret(&user)?
            .ok_or_else(|| ServiceError::BadRequest("MFA setup has not been started".into()))?;

        self.check_mfa_limiter(user.id).await?;
        if self.totp.verify(&secret, code).is_err() {
            self.record_mfa_failure(&user, "enrolment", client).await;
            return Err(ServiceError::BadRequest(INVALID_CODE.into()));
        }
        self.mfa_limiter.clear(&mfa_limiter_key(user.id)).await;

        let backup = generate_backup_codes();
        let now = Utc::now();
        AdminUserEntity::update_many()
            .col_expr(admin_user::Column::MfaEnabled, Expr::value(true))
            .col_expr(
                admin_user::Column::MfaBackupCodes,
                Expr::value(json!(backup.hashes)),
            )
            .col_expr(admin_user::Column::MfaBackupSalt, Expr::value(Some(backup.salt)))
            .col_expr(admin_user::Column::LastLogin, Expr::value(Some(now)))
            .col_expr(admin_user::Column::UpdatedAt, Expr::value(now))
            .filter(admin_user::Column::Id.eq(user.id))
            .exec(&*self.db)
            .await?;

        let session = self.start_session(&user).await?;
        self.audit
            .record(AuditEntry::new(AuditAction::MfaEnabled).user(user.id, &user.email).client(client))
            .await;
        self.audit
            .record(
                AuditEntry::new(AuditAction::LoginSuccess)
                    .user(user.id, &user.email)
                    .details(json!({ "method": "mfa_enrolment" }))
                    .client(client),
            )
            .await;

        Ok(MfaEnrolled {
            session,
            backup_codes: backup.codes,
        })
    }

    /// 429 once the user has used up their second-factor attempts.
    async fn check_mfa_limiter(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.mfa_limiter
            .check(&mfa_limiter_key(user_id), MFA_MAX_ATTEMPTS)
            .await
            .into_result()?;
        Ok(())
    }

    /// Resolves a pre-MFA token to an enrolled user, under the MFA limiter.
    async fn second_factor_user(&self, pre_mfa_token: &str) -> Result<admin_user::Model, ServiceError> {
        let claims = self.tokens.verify_pre_mfa(pre_mfa_token)?;
        self.check_mfa_limiter(claims.user_id).await?;
        let user = self.load_active(claims.user_id).await?;
        if !user.mfa_enabled {
            return Err(ServiceError::Unauthorized("MFA is not enabled".into()));
        }
        Ok(user)
    }

    async fn record_mfa_failure(&self, user: &admin_user::Model, method: &str, client: &ClientInfo) {
        self.mfa_limiter
            .record_failure(&mfa_limiter_key(user.id), MFA_MAX_ATTEMPTS)
            .await;
        self.audit
            .record(
                AuditEntry::new(AuditAction::MfaFailed)
                    .user(user.id, &user.email)
                    .details(json!({ "method": method }))
                    .client(client),
            )
            .await;
    }

    /// Completes a login with a TOTP code.
    #[instrument(skip_all)]
    pub async fn validate(
        &self,
        pre_mfa_token: &str,
        code: &str,
        client: &ClientInfo,
    ) -> Result<AuthenticatedSession, ServiceError> {
        let user = self.second_factor_user(pre_mfa_token).await?;
        let secret = self
            .mfa_secret(&user)?
            .ok_or_else(|| ServiceError::Unauthorized("MFA is not enabled".into()))?;

        if self.totp.verify(&secret, code).is_err() {
            self.record_mfa_failure(&user, "totp", client).await;
            return Err(ServiceError::BadRequest(INVALID_CODE.into()));
        }
        self.mfa_limiter.clear(&mfa_limiter_key(user.id)).await;

        let session = self.start_session(&user).await?;
        self.touch_last_login(user.id).await?;
        self.audit
            .record(
                AuditEntry::new(AuditAction::LoginSuccess)
                    .user(user.id, &user.email)
                    .details(json!({ "method": "totp" }))
                    .client(client),
            )
            .await;
        self.audit
            .record(AuditEntry::new(AuditAction::MfaVerified).user(user.id, &user.email).client(client))
            .await;
        Ok(session)
    }

    /// Completes a login with a single-use backup code.
    #[instrument(skip_all)]
    pub async fn redeem_backup(
        &self,
        pre_mfa_token: &str,
        code: &str,
        client: &ClientInfo,
    ) -> Result<BackupLogin, ServiceError> {
        let user = self.second_factor_user(pre_mfa_token).await?;
        let stored = user.backup_code_hashes();
        let remaining = match user.mfa_backup_salt.as_deref() {
            Some(salt) => redeem_backup_code(code, salt, &stored).ok(),
            None => None,
        };
        let Some(remaining) = remaining else {
            self.record_mfa_failure(&user, "backup_code", client).await;
            return Err(ServiceError::BadRequest("Invalid backup code".into()));
        };

        // Predicated on the row version that was read so a code redeems once.
        let now = Utc::now();
        let result = AdminUserEntity::update_many()
            .col_expr(admin_user::Column::MfaBackupCodes, Expr::value(json!(remaining)))
            .col_expr(admin_user::Column::LastLogin, Expr::value(Some(now)))
            .col_expr(admin_user::Column::UpdatedAt, Expr::value(now))
            .filter(admin_user::Column::Id.eq(user.id))
            .filter(admin_user::Column::UpdatedAt.eq(user.updated_at))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Backup codes changed, please retry".into(),
            ));
        }
        self.mfa_limiter.clear(&mfa_limiter_key(user.id)).await;

        let session = self.start_session(&user).await?;
        self.audit
            .record(
                AuditEntry::new(AuditAction::BackupCodeUsed)
                    .user(user.id, &user.email)
                    .details(json!({ "remaining": remaining.len() }))
                    .client(client),
            )
            .await;
        self.audit
            .record(
                AuditEntry::new(AuditAction::LoginSuccess)
                    .user(user.id, &user.email)
                    .details(json!({ "method": "backup_code" }))
                    .client(client),
            )
            .await;

        Ok(BackupLogin {
            session,
            remaining: remaining.len(),
            warning: low_backup_warning(remaining.len()),
        })
    }

    /// Replaces backup codes and salt together after a fresh TOTP check.
    #[instrument(skip(self, code, client))]
    pub async fn regenerate_backup_codes(
        &self,
        user_id: Uuid,
        code: &str,
        client: &ClientInfo,
    ) -> Result<Vec<String>, ServiceError> {
        let user = self.load_active(user_id).await?;
        let secret = match (user.mfa_enabled, self.mfa_secret(&user)?) {
            (true, Some(secret)) => secret,
            _ => return Err(ServiceError::BadRequest("MFA is not enabled".into())),
        };
        self.check_mfa_limiter(user.id).await?;
        if self.totp.verify(&secret, code).is_err() {
            self.record_mfa_failure(&user, "regenerate", client).await;
            return Err(ServiceError::BadRequest(INVALID_CODE.into()));
        }
        self.mfa_limiter.clear(&mfa_limiter_key(user.id)).await;

        let backup = generate_backup_codes();
        AdminUserEntity::update_many()
            .col_expr(
                admin_user::Column::MfaBackupCodes,
                Expr::value(json!(backup.hashes)),
            )
            .col_expr(admin_user::Column::MfaBackupSalt, Expr::value(Some(backup.salt)))
            .col_expr(admin_user::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(admin_user::Column::Id.eq(user.id))
            .exec(&*self.db)
            .await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::BackupCodesRegenerated)
                    .user(user.id, &user.email)
                    .client(client),
            )
            .await;
        Ok(backup.codes)
    }

    pub async fn mfa_status(&self, user_id: Uuid) -> Result<MfaStatus, ServiceError> {
        let user = self.load_active(user_id).await?;
        Ok(MfaStatus {
            mfa_enabled: user.mfa_enabled,
            backup_codes_remaining: user.backup_code_hashes().len(),
        })
    }

    /// Rotates a refresh token. Each `jti` is accepted once; a second
    /// presentation is logged as a replay.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<AuthenticatedSession, ServiceError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;

        let result = RefreshTokenEntity::update_many()
            .col_expr(admin_refresh_token::Column::Revoked, Expr::value(true))
            .filter(admin_refresh_token::Column::Jti.eq(claims.jti.as_str()))
            .filter(admin_refresh_token::Column::UserId.eq(claims.user_id))
            .filter(admin_refresh_token::Column::Revoked.eq(false))
            .filter(admin_refresh_token::Column::ExpiresAt.gt(Utc::now()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let known = RefreshTokenEntity::find_by_id(claims.jti.clone())
                .one(&*self.db)
                .await?;
            if known.map(|row| row.revoked).unwrap_or(false) {
                self.audit
                    .log_anomaly(
                        AnomalyKind::RefreshTokenReplay,
                        json!({ "userId": claims.user_id, "jti": claims.jti }),
                        client,
                    )
                    .await;
            }
            return Err(ServiceError::Unauthorized("Invalid refresh token".into()));
        }

        let user = self.load_active(claims.user_id).await?;
        let session = self.start_session(&user).await?;
        self.audit
            .record(AuditEntry::new(AuditAction::TokenRefreshed).user(user.id, &user.email).client(client))
            .await;
        Ok(session)
    }

    /// Revokes the presented refresh token, if any. Always succeeds so the
    /// caller can clear cookies.
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: Option<&str>, client: &ClientInfo) {
        let Some(claims) = refresh_token.and_then(|t| self.tokens.verify_refresh(t).ok()) else {
            return;
        };
        if let Err(e) = RefreshTokenEntity::update_many()
            .col_expr(admin_refresh_token::Column::Revoked, Expr::value(true))
            .filter(admin_refresh_token::Column::Jti.eq(claims.jti.as_str()))
            .exec(&*self.db)
            .await
        {
            warn!(error = %e, "refresh token revocation failed on logout");
        }
        self.audit
            .record(AuditEntry::new(AuditAction::Logout).user(claims.user_id, &claims.email).client(client))
            .await;
    }

    async fn start_session(&self, user: &admin_user::Model) -> Result<AuthenticatedSession, ServiceError> {
        let session_user = SessionUser::from(user);
        let tokens = self.tokens.issue_session(&session_user)?;
        admin_refresh_token::ActiveModel {
            jti: Set(tokens.jti.clone()),
            user_id: Set(user.id),
            expires_at: Set(tokens.refresh_expires_at),
            revoked: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;
        info!(user_id = %user.id, "administrator session issued");
        Ok(AuthenticatedSession {
            user: session_user,
            tokens,
        })
    }

    async fn touch_last_login(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let now = Utc::now();
        AdminUserEntity::update_many()
            .col_expr(admin_user::Column::LastLogin, Expr::value(Some(now)))
            .col_expr(admin_user::Column::UpdatedAt, Expr::value(now))
            .filter(admin_user::Column::Id.eq(user_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Drops refresh rows that can no longer be presented.
    pub async fn purge_expired_refresh_tokens(&self) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - ChronoDuration::days(1);
        let result = RefreshTokenEntity::delete_many()
            .filter(admin_refresh_token::Column::ExpiresAt.lt(cutoff))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Provisions an administrator. MFA enrolment happens on first login.
    #[instrument(skip(self, request), fields(email = %request.email, role = %request.role))]
    pub async fn create_admin(&self, request: NewAdmin) -> Result<admin_user::Model, ServiceError> {
        let email = request.email.trim().to_lowercase();
        validate_email(&email)?;
        if !is_known_role(&request.role) {
            return Err(ServiceError::ValidationError(format!(
                "Unknown role '{}'",
                request.role
            )));
        }
        if request.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::ValidationError(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let now = Utc::now();
        let row = admin_user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email),
            name: Set(request.name.trim().to_string()),
            role: Set(request.role),
            password_hash: Set(self.passwords.hash(&request.password).await?),
            mfa_secret: Set(None),
            mfa_enabled: Set(false),
            mfa_backup_codes: Set(json!([])),
            mfa_backup_salt: Set(None),
            is_active: Set(true),
            last_login: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        match row.insert(&*self.db).await {
            Ok(user) => {
                info!(user_id = %user.id, "administrator created");
                Ok(user)
            }
            Err(e) if is_unique_violation(&e) => Err(ServiceError::Conflict(
                "An administrator with this email already exists".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
