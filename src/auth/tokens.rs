use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{crypto::random_hex, entities::admin_user, errors::ServiceError};

pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;
pub const PRE_MFA_TOKEN_TTL_SECS: i64 = 5 * 60;
pub const SETUP_TOKEN_TTL_SECS: i64 = 10 * 60;
/// Enrolment that was started but never confirmed
pub const SETUP_CONTINUATION_TTL_SECS: i64 = 30 * 60;

const ACCESS_TYPE: &str = "access";
const REFRESH_TYPE: &str = "refresh";
const JTI_BYTES: usize = 16;
const CSRF_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Authentication required")]
    Missing,

    #[error("Invalid token")]
    Invalid,

    #[error("Token expired")]
    Expired,

    #[error("Invalid CSRF token")]
    CsrfMismatch,
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ServiceError::TokenExpired,
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub mfa_verified: bool,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshClaims {
    pub user_id: Uuid,
    pub email: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreMfaClaims {
    pub user_id: Uuid,
    pub email: String,
    pub pre_mfa: bool,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupClaims {
    pub user_id: Uuid,
    pub email: String,
    pub mfa_setup: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Public view of an administrator carried in tokens and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
}

impl From<&admin_user::Model> for SessionUser {
    fn from(user: &admin_user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
        }
    }
}

/// Everything a fresh login or refresh hands back to the browser.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access: String,
    pub refresh: String,
    pub csrf: String,
    pub jti: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// HS256 signer and verifier for every administrator token kind.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issues the access, refresh and CSRF trio for a verified administrator.
    pub fn issue_session(&self, user: &SessionUser) -> Result<SessionTokens, ServiceError> {
        let now = Utc::now();
        let iat = now.timestamp();
        let refresh_expires_at = now + ChronoDuration::seconds(REFRESH_TOKEN_TTL_SECS);
        let jti = random_hex(JTI_BYTES);

        let access = self.sign(&AccessClaims {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            token_type: ACCESS_TYPE.to_string(),
            mfa_verified: true,
            iat,
            exp: iat + ACCESS_TOKEN_TTL_SECS,
        })?;

        let refresh = self.sign(&RefreshClaims {
            user_id: user.id,
            email: user.email.clone(),
            token_type: REFRESH_TYPE.to_string(),
            jti: jti.clone(),
            iat,
            exp: refresh_expires_at.timestamp(),
        })?;

        Ok(SessionTokens {
            access,
            refresh,
            csrf: random_hex(CSRF_BYTES),
            jti,
            refresh_expires_at,
        })
    }

    pub fn issue_pre_mfa(&self, user_id: Uuid, email: &str) -> Result<String, ServiceError> {
        let iat = Utc::now().timestamp();
        self.sign(&PreMfaClaims {
            user_id,
            email: email.to_string(),
            pre_mfa: true,
            iat,
            exp: iat + PRE_MFA_TOKEN_TTL_SECS,
        })
    }

    pub fn issue_setup(
        &self,
        user_id: Uuid,
        email: &str,
        ttl_secs: i64,
    ) -> Result<String, ServiceError> {
        let iat = Utc::now().timestamp();
        self.sign(&SetupClaims {
            user_id,
            email: email.to_string(),
            mfa_setup: true,
            iat,
            exp: iat + ttl_secs,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.decode(token)?;
        if claims.token_type != ACCESS_TYPE || !claims.mfa_verified {
            return Err(TokenError::Invalid);
        }
        not_expired(claims.exp)?;
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.decode(token)?;
        if claims.token_type != REFRESH_TYPE || claims.jti.is_empty() {
            return Err(TokenError::Invalid);
        }
        not_expired(claims.exp)?;
        Ok(claims)
    }

    pub fn verify_pre_mfa(&self, token: &str) -> Result<PreMfaClaims, TokenError> {
        let claims: PreMfaClaims = self.decode(token)?;
        if !claims.pre_mfa {
            return Err(TokenError::Invalid);
        }
        not_expired(claims.exp)?;
        Ok(claims)
    }

    pub fn verify_setup(&self, token: &str) -> Result<SetupClaims, TokenError> {
        let claims: SetupClaims = self.decode(token)?;
        if !claims.mfa_setup {
            return Err(TokenError::Invalid);
        }
        not_expired(claims.exp)?;
        Ok(claims)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, ServiceError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| ServiceError::InternalError(format!("token signing failed: {}", e)))
    }

    /// Signature and shape only. Callers check the token kind before
    /// [`not_expired`] so a wrong-kind token reads as invalid, not expired.
    fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Missing);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;

        decode::<T>(token.trim(), &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Invalid)
    }
}

fn not_expired(exp: i64) -> Result<(), TokenError> {
    if exp < Utc::now().timestamp() {
        Err(TokenError::Expired)
    } else {
        Ok(())
    }
}
