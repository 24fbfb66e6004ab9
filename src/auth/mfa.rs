/*!
 * # Second Factor
 *
 * Time-based one-time passwords (RFC 6238, HMAC-SHA1, 6 digits, 30 second
 * step) and salted single-use backup codes for administrator accounts.
 */

use chrono::Utc;
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;
use thiserror::Error;
use url::form_urlencoded;

use crate::crypto::{constant_time_eq, sha256_hex};

const SECRET_BYTES: usize = 20;
const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_BYTES: usize = 4;
const BACKUP_SALT_BYTES: usize = 16;
const QR_ENDPOINT: &str = "https://api.qrserver.com/v1/create-qr-code/";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MfaError {
    #[error("Invalid TOTP code")]
    InvalidTotpCode,

    #[error("Invalid TOTP secret")]
    InvalidSecret,

    #[error("Invalid backup code")]
    InvalidBackupCode,
}

#[derive(Debug, Clone)]
pub struct TotpConfig {
    pub issuer: String,
    pub digits: u32,
    pub period: u64,
    /// Allowable steps either side of the current one
    pub window: i64,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            issuer: "Storefront Admin".to_string(),
            digits: 6,
            period: 30,
            window: 1,
        }
    }
}

/// Freshly generated enrolment material shown to the administrator once.
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    pub secret: String,
    pub otpauth_url: String,
    pub qr_code_url: String,
}

/// Plaintext backup codes plus what gets persisted.
#[derive(Debug, Clone)]
pub struct BackupCodeSet {
    pub codes: Vec<String>,
    pub salt: String,
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Totp {
    config: TotpConfig,
}

impl Totp {
    pub fn new(config: TotpConfig) -> Self {
        Self { config }
    }

    /// Generates a 160-bit base32 secret with its provisioning URI.
    pub fn enroll(&self, account_name: &str) -> TotpEnrollment {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let secret = BASE32_NOPAD.encode(&bytes);
        let otpauth_url = self.provisioning_uri(&secret, account_name);
        let qr_code_url = format!(
            "{}?{}",
            QR_ENDPOINT,
            form_urlencoded::Serializer::new(String::new())
                .append_pair("size", "200x200")
                .append_pair("data", &otpauth_url)
                .finish()
        );
        TotpEnrollment {
            secret,
            otpauth_url,
            qr_code_url,
        }
    }

    pub fn provisioning_uri(&self, secret: &str, account_name: &str) -> String {
        let label: String =
            form_urlencoded::byte_serialize(format!("{}:{}", self.config.issuer, account_name).as_bytes())
                .collect();
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("secret", secret)
            .append_pair("issuer", &self.config.issuer)
            .append_pair("algorithm", "SHA1")
            .append_pair("digits", &self.config.digits.to_string())
            .append_pair("period", &self.config.period.to_string())
            .finish();
        format!("otpauth://totp/{}?{}", label, query)
    }

    pub fn verify(&self, secret: &str, code: &str) -> Result<(), MfaError> {
        self.verify_at(secret, code, Utc::now().timestamp().max(0) as u64)
    }

    pub fn verify_at(&self, secret: &str, code: &str, unix_time: u64) -> Result<(), MfaError> {
        let code = code.trim();
        if code.len() != self.config.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MfaError::InvalidTotpCode);
        }
        let key = decode_secret(secret)?;
        let step = (unix_time / self.config.period) as i64;

        for offset in -self.config.window..=self.config.window {
            let counter = step + offset;
            if counter < 0 {
                continue;
            }
            let expected = format!(
                "{:0width$}",
                self.code_for_counter(&key, counter as u64)?,
                width = self.config.digits as usize
            );
            if constant_time_eq(expected.as_bytes(), code.as_bytes()) {
                return Ok(());
            }
        }
        Err(MfaError::InvalidTotpCode)
    }

    /// The code for the step containing `unix_time`.
    pub fn code_at(&self, secret: &str, unix_time: u64) -> Result<String, MfaError> {
        let key = decode_secret(secret)?;
        let code = self.code_for_counter(&key, unix_time / self.config.period)?;
        Ok(format!("{:0width$}", code, width = self.config.digits as usize))
    }

    fn code_for_counter(&self, key: &[u8], counter: u64) -> Result<u32, MfaError> {
        let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(|_| MfaError::InvalidSecret)?;
        mac.update(&counter.to_be_bytes());
        let result = mac.finalize().into_bytes();

        // Dynamic truncation
        let offset = (result[19] & 0xf) as usize;
        let code = ((result[offset] & 0x7f) as u32) << 24
            | (result[offset + 1] as u32) << 16
            | (result[offset + 2] as u32) << 8
            | (result[offset + 3] as u32);

        Ok(code % 10u32.pow(self.config.digits))
    }
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, MfaError> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| MfaError::InvalidSecret)
}

/// Ten 8-character uppercase hex codes with a fresh 16-byte salt.
pub fn generate_backup_codes() -> BackupCodeSet {
    let mut salt_bytes = [0u8; BACKUP_SALT_BYTES];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);

    let codes: Vec<String> = (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let mut bytes = [0u8; BACKUP_CODE_BYTES];
            OsRng.fill_bytes(&mut bytes);
            hex::encode_upper(bytes)
        })
        .collect();
    let hashes = codes.iter().map(|c| hash_backup_code(c, &salt)).collect();

    BackupCodeSet {
        codes,
        salt,
        hashes,
    }
}

pub fn hash_backup_code(code: &str, salt: &str) -> String {
    let normalized = code.trim().to_ascii_uppercase();
    sha256_hex(&[normalized.as_bytes(), salt.as_bytes()])
}

/// Returns the remaining hashes with the matching entry removed.
pub fn redeem_backup_code(
    code: &str,
    salt: &str,
    stored: &[String],
) -> Result<Vec<String>, MfaError> {
    let candidate = hash_backup_code(code, salt);
    let position = stored
        .iter()
        .position(|h| constant_time_eq(h.as_bytes(), candidate.as_bytes()))
        .ok_or(MfaError::InvalidBackupCode)?;

    let mut remaining = stored.to_vec();
    remaining.remove(position);
    Ok(remaining)
}
