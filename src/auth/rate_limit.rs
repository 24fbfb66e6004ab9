/*!
 * # Rate Limiting for Authentication
 *
 * Keyed attempt counters with a lockout window. Counters live in the
 * `rate_limits` table so every instance shares them; when the store is slow
 * or failing the limiter degrades to a per-process map.
 */

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveValue::Set,
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{entities::rate_limit, errors::ServiceError};

pub const LOCKOUT_SECS: i64 = 15 * 60;
pub const LOGIN_EMAIL_MAX_ATTEMPTS: u32 = 5;
pub const LOGIN_IP_MAX_ATTEMPTS: u32 = 50;
pub const MFA_MAX_ATTEMPTS: u32 = 5;
const STORE_TIMEOUT: Duration = Duration::from_secs(5);
/// Lost compare-and-swap rounds before a failure is counted in memory instead.
const MAX_CAS_ROUNDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub retry_after_seconds: u64,
    pub attempts: u32,
}

impl RateLimitStatus {
    fn open(attempts: u32) -> Self {
        Self {
            allowed: true,
            retry_after_seconds: 0,
            attempts,
        }
    }

    /// The stricter of two statuses.
    pub fn most_restrictive(self, other: Self) -> Self {
        match (self.allowed, other.allowed) {
            (true, false) => other,
            (false, true) => self,
            _ if other.retry_after_seconds > self.retry_after_seconds => other,
            _ => self,
        }
    }

    pub fn into_result(self) -> Result<(), RateLimitError> {
        if self.allowed {
            Ok(())
        } else {
            Err(RateLimitError::Locked {
                retry_after: self.retry_after_seconds,
            })
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Too many attempts. Please try again in {retry_after} seconds.")]
    Locked { retry_after: u64 },
}

impl From<RateLimitError> for ServiceError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Locked { retry_after } => ServiceError::RateLimited { retry_after },
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryEntry {
    attempts: u32,
    locked_until: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RateLimitBackend {
    Database(Arc<DatabaseConnection>),
    InMemory,
}

/// Attempt counter keyed by strings such as `email:foo@bar` or `ip:1.2.3.4`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    backend: RateLimitBackend,
    fallback: Arc<DashMap<String, MemoryEntry>>,
}

fn remaining_secs(locked_until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (locked_until - now).num_milliseconds().max(0) as u64;
    ((millis + 999) / 1000).max(1)
}

/// A counter whose lock has elapsed, or that has seen no failure for a whole
/// lockout window, starts over.
fn is_stale(locked_until: Option<DateTime<Utc>>, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match locked_until {
        Some(until) => until <= now,
        None => updated_at + ChronoDuration::seconds(LOCKOUT_SECS) <= now,
    }
}

fn status_from(
    attempts: u32,
    locked_until: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> RateLimitStatus {
    if is_stale(locked_until, updated_at, now) {
        return RateLimitStatus::open(0);
    }
    match locked_until {
        Some(until) => RateLimitStatus {
            allowed: false,
            retry_after_seconds: remaining_secs(until, now),
            attempts,
        },
        // Counted under a lower cap than this caller's.
        None if attempts >= max_attempts => RateLimitStatus {
            allowed: false,
            retry_after_seconds: LOCKOUT_SECS as u64,
            attempts,
        },
        None => RateLimitStatus::open(attempts),
    }
}

/// Applies one failure to a counter, returning the new count and lock.
fn next_failure(
    attempts: u32,
    locked_until: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> (u32, Option<DateTime<Utc>>) {
    if is_stale(locked_until, updated_at, now) {
        return next_failure(0, None, now, max_attempts, now);
    }
    let attempts = attempts.saturating_add(1);
    if let Some(until) = locked_until {
        return (attempts, Some(until));
    }
    let lock = (attempts >= max_attempts).then(|| now + ChronoDuration::seconds(LOCKOUT_SECS));
    (attempts, lock)
}

impl RateLimiter {
    pub fn new(backend: RateLimitBackend) -> Self {
        Self {
            backend,
            fallback: Arc::new(DashMap::new()),
        }
    }

    pub fn database(db: Arc<DatabaseConnection>) -> Self {
        Self::new(RateLimitBackend::Database(db))
    }

    pub fn in_memory() -> Self {
        Self::new(RateLimitBackend::InMemory)
    }

    pub async fn check(&self, key: &str, max_attempts: u32) -> RateLimitStatus {
        let now = Utc::now();
        if let RateLimitBackend::Database(db) = &self.backend {
            match guarded(rate_limit::Entity::find_by_id(key.to_string()).one(db.as_ref())).await {
                Ok(Some(row)) => {
                    return status_from(
                        row.attempts.max(0) as u32,
                        row.locked_until,
                        row.updated_at,
                        max_attempts,
                        now,
                    )
                }
                Ok(None) => return RateLimitStatus::open(0),
                Err(e) => warn!(key, error = %e, "rate limit store unavailable, using in-memory counter"),
            }
        }
        self.check_memory(key, max_attempts, now)
    }

    /// Records a failed attempt and returns the new count.
    pub async fn record_failure(&self, key: &str, max_attempts: u32) -> u32 {
        let now = Utc::now();
        if let RateLimitBackend::Database(db) = &self.backend {
            match self.record_failure_db(db, key, max_attempts, now).await {
                Ok(attempts) => return attempts,
                Err(e) => warn!(key, error = %e, "rate limit store unavailable, using in-memory counter"),
            }
        }
        self.record_failure_memory(key, max_attempts, now)
    }

    pub async fn clear(&self, key: &str) {
        self.fallback.remove(key);
        if let RateLimitBackend::Database(db) = &self.backend {
            if let Err(e) =
                guarded(rate_limit::Entity::delete_by_id(key.to_string()).exec(db.as_ref())).await
            {
                warn!(key, error = %e, "failed to clear rate limit record");
            }
        }
    }

    /// Email and IP counters checked together; the stricter one wins.
    pub async fn check_login(&self, email: &str, ip: &str) -> RateLimitStatus {
        let email_key = email_key(email);
        let ip_key = ip_key(ip);
        let (by_email, by_ip) = tokio::join!(
            self.check(&email_key, LOGIN_EMAIL_MAX_ATTEMPTS),
            self.check(&ip_key, LOGIN_IP_MAX_ATTEMPTS)
        );
        by_email.most_restrictive(by_ip)
    }

    pub async fn record_login_failure(&self, email: &str, ip: &str) {
        let email_key = email_key(email);
        let ip_key = ip_key(ip);
        let (email_attempts, _) = tokio::join!(
            self.record_failure(&email_key, LOGIN_EMAIL_MAX_ATTEMPTS),
            self.record_failure(&ip_key, LOGIN_IP_MAX_ATTEMPTS)
        );
        counter!("storefront.auth.login_failures", 1);
        if email_attempts == LOGIN_EMAIL_MAX_ATTEMPTS {
            warn!(target: "security", key = %email_key, "account locked after repeated login failures");
        }
    }

    /// Success clears only the email counter; the IP counter drains by time.
    pub async fn clear_login(&self, email: &str) {
        self.clear(&email_key(email)).await;
    }

    /// Compare-and-swap on the stored count so concurrent failures all land.
    async fn record_failure_db(
        &self,
        db: &DatabaseConnection,
        key: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, DbErr> {
        for _ in 0..MAX_CAS_ROUNDS {
            let existing = guarded(rate_limit::Entity::find_by_id(key.to_string()).one(db)).await?;
            let Some(row) = existing else {
                let (attempts, locked_until) = next_failure(0, None, now, max_attempts, now);
                let record = rate_limit::ActiveModel {
                    key: Set(key.to_string()),
                    attempts: Set(attempts as i32),
                    locked_until: Set(locked_until),
                    updated_at: Set(now),
                };
                let inserted = guarded(
                    rate_limit::Entity::insert(record)
                        .on_conflict(
                            OnConflict::column(rate_limit::Column::Key)
                                .do_nothing()
                                .to_owned(),
                        )
                        .exec_without_returning(db),
                )
                .await?;
                if inserted == 1 {
                    debug!(key, attempts, "recorded failed attempt");
                    return Ok(attempts);
                }
                continue;
            };

            let (attempts, locked_until) = next_failure(
                row.attempts.max(0) as u32,
                row.locked_until,
                row.updated_at,
                max_attempts,
                now,
            );
            let updated = guarded(
                rate_limit::Entity::update_many()
                    .col_expr(rate_limit::Column::Attempts, Expr::value(attempts as i32))
                    .col_expr(rate_limit::Column::LockedUntil, Expr::value(locked_until))
                    .col_expr(rate_limit::Column::UpdatedAt, Expr::value(now))
                    .filter(rate_limit::Column::Key.eq(key))
                    .filter(rate_limit::Column::Attempts.eq(row.attempts))
                    .exec(db),
            )
            .await?;
            if updated.rows_affected == 1 {
                debug!(key, attempts, "recorded failed attempt");
                return Ok(attempts);
            }
        }
        Err(DbErr::Custom("rate limit counter is contended".into()))
    }

    /// Drops fallback counters that no longer hold anything back.
    fn prune_memory(&self, now: DateTime<Utc>) {
        self.fallback
            .retain(|_, entry| !is_stale(entry.locked_until, entry.updated_at, now));
    }

    fn check_memory(&self, key: &str, max_attempts: u32, now: DateTime<Utc>) -> RateLimitStatus {
        self.prune_memory(now);
        self.fallback
            .get(key)
            .map(|entry| {
                status_from(entry.attempts, entry.locked_until, entry.updated_at, max_attempts, now)
            })
            .unwrap_or_else(|| RateLimitStatus::open(0))
    }

    fn record_failure_memory(&self, key: &str, max_attempts: u32, now: DateTime<Utc>) -> u32 {
        let mut entry = self.fallback.entry(key.to_string()).or_default();
        let (attempts, locked_until) = next_failure(
            entry.attempts,
            entry.locked_until,
            entry.updated_at,
            max_attempts,
            now,
        );
        entry.attempts = attempts;
        entry.locked_until = locked_until;
        entry.updated_at = now;
        attempts
    }
}

/// Bounds a store call to the limiter's timeout.
async fn guarded<T, F>(fut: F) -> Result<T, DbErr>
where
    F: std::future::Future<Output = Result<T, DbErr>>,
{
    tokio::time::timeout(STORE_TIMEOUT, fut)
        .await
        .unwrap_or_else(|_| Err(DbErr::Custom("rate limit store timed out".into())))
}

pub fn email_key(email: &str) -> String {
    format!("email:{}", email.trim().to_lowercase())
}

pub fn ip_key(ip: &str) -> String {
    format!("ip:{}", ip.trim())
}
