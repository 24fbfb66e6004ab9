use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        gift_card::{self, Entity as GiftCardEntity},
        gift_card_transaction, GiftCardStatus, GiftCardTransactionType,
    },
    errors::{is_unique_violation, ServiceError},
};

/// Code alphabet without `0 O 1 I L`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_GROUPS: usize = 3;
const CODE_GROUP_LEN: usize = 4;
const MAX_CODE_ATTEMPTS: usize = 10;
/// Largest multiple of the alphabet size below 256
const REJECTION_LIMIT: u8 = (256 / CODE_ALPHABET.len() * CODE_ALPHABET.len()) as u8;

/// `GC-XXXX-XXXX-XXXX` by rejection sampling OS randomness.
pub fn generate_code() -> String {
    let mut chars = Vec::with_capacity(CODE_GROUPS * CODE_GROUP_LEN);
    let mut buf = [0u8; 32];
    while chars.len() < CODE_GROUPS * CODE_GROUP_LEN {
        OsRng.fill_bytes(&mut buf);
        for b in buf {
            if b < REJECTION_LIMIT && chars.len() < CODE_GROUPS * CODE_GROUP_LEN {
                chars.push(CODE_ALPHABET[usize::from(b) % CODE_ALPHABET.len()] as char);
            }
        }
    }
    let groups: Vec<String> = chars
        .chunks(CODE_GROUP_LEN)
        .map(|group| group.iter().collect())
        .collect();
    format!("GC-{}", groups.join("-"))
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone)]
pub struct IssueGiftCard {
    /// Minor units
    pub amount: i64,
    pub purchaser_email: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Stored-value cards. Balances only move by compare-and-swap on the
/// observed `current_balance`.
#[derive(Clone)]
pub struct GiftCardService {
    db: Arc<DatabaseConnection>,
    currency: String,
}

impl GiftCardService {
    pub fn new(db: Arc<DatabaseConnection>, currency: impl Into<String>) -> Self {
        Self {
            db,
            currency: currency.into(),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<gift_card::Model>, ServiceError> {
        Ok(GiftCardEntity::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<gift_card::Model>, ServiceError> {
        Ok(GiftCardEntity::find()
            .filter(gift_card::Column::Code.eq(normalize_code(code)))
            .one(&*self.db)
            .await?)
    }

    /// Creates a `pending` card under a fresh code.
    #[instrument(skip(self, request), fields(amount = request.amount))]
    pub async fn issue(&self, request: IssueGiftCard) -> Result<gift_card::Model, ServiceError> {
        if request.amount <= 0 {
            return Err(ServiceError::ValidationError(
                "Gift card amount must be positive".into(),
            ));
        }

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let now = Utc::now();
            let card = gift_card::ActiveModel {
                id: Set(Uuid::new_v4()),
                code: Set(generate_code()),
                currency: Set(self.currency.clone()),
                initial_balance: Set(request.amount),
                current_balance: Set(request.amount),
                status: Set(GiftCardStatus::Pending),
                purchaser_email: Set(request.purchaser_email.clone()),
                recipient_email: Set(request.recipient_email.clone()),
                recipient_name: Set(request.recipient_name.clone()),
                expires_at: Set(request.expires_at),
                activated_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            };

            match card.insert(&*self.db).await {
                Ok(card) => {
                    info!(gift_card_id = %card.id, "gift card issued");
                    return Ok(card);
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(attempt, "gift card code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::InternalError(
            "could not allocate a unique gift card code".into(),
        ))
    }

    /// `pending → active`, with an `activation` ledger row.
    #[instrument(skip(self))]
    pub async fn activate(&self, id: Uuid) -> Result<gift_card::Model, ServiceError> {
        let now = Utc::now();
        let result = GiftCardEntity::update_many()
            .col_expr(
                gift_card::Column::Status,
                Expr::value(GiftCardStatus::Active.to_value()),
            )
            .col_expr(gift_card::Column::ActivatedAt, Expr::value(Some(now)))
            .col_expr(gift_card::Column::UpdatedAt, Expr::value(now))
            .filter(gift_card::Column::Id.eq(id))
            .filter(gift_card::Column::Status.eq(GiftCardStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Gift card is not awaiting activation".into(),
            ));
        }

        let card = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Gift card not found".into()))?;
        self.append_ledger(
            card.id,
            GiftCardTransactionType::Activation,
            card.current_balance,
            card.current_balance,
            None,
        )
        .await?;

        info!(gift_card_id = %card.id, "gift card activated");
        Ok(card)
    }

    /// Returns the card when it can pay; expires it in place when its date
    /// has passed.
    #[instrument(skip(self, code))]
    pub async fn evaluate(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<gift_card::Model, ServiceError> {
        let card = self
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::BadRequest("Invalid gift card code".into()))?;

        if card.status == GiftCardStatus::Expired {
            return Err(ServiceError::BadRequest("Gift card has expired".into()));
        }
        if card.status == GiftCardStatus::Active && card.is_expired_at(now) {
            GiftCardEntity::update_many()
                .col_expr(
                    gift_card::Column::Status,
                    Expr::value(GiftCardStatus::Expired.to_value()),
                )
                .col_expr(gift_card::Column::UpdatedAt, Expr::value(now))
                .filter(gift_card::Column::Id.eq(card.id))
                .filter(gift_card::Column::Status.eq(GiftCardStatus::Active))
                .exec(&*self.db)
                .await?;
            info!(gift_card_id = %card.id, "gift card marked expired");
            return Err(ServiceError::BadRequest("Gift card has expired".into()));
        }
        if card.status != GiftCardStatus::Active {
            return Err(ServiceError::BadRequest("Gift card is not active".into()));
        }
        if card.current_balance <= 0 {
            return Err(ServiceError::BadRequest(
                "Insufficient gift card balance".into(),
            ));
        }
        Ok(card)
    }

    /// CAS from the observed balance. Returns the new balance; a lost race
    /// is a 409.
    #[instrument(skip(self, observed), fields(gift_card_id = %observed.id))]
    pub async fn deduct(&self, observed: &gift_card::Model, amount: i64) -> Result<i64, ServiceError> {
        if amount <= 0 || amount > observed.current_balance {
            return Err(ServiceError::BadRequest(
                "Insufficient gift card balance".into(),
            ));
        }
        let new_balance = observed.current_balance - amount;

        let result = GiftCardEntity::update_many()
            .col_expr(gift_card::Column::CurrentBalance, Expr::value(new_balance))
            .col_expr(
                gift_card::Column::Status,
                Expr::value(GiftCardStatus::for_balance(new_balance).to_value()),
            )
            .col_expr(gift_card::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(gift_card::Column::Id.eq(observed.id))
            .filter(gift_card::Column::CurrentBalance.eq(observed.current_balance))
            .filter(gift_card::Column::Status.eq(GiftCardStatus::Active))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            metrics::counter!("storefront.gift_card.cas_conflicts", 1);
            return Err(ServiceError::Conflict(
                "Gift card balance changed, please retry".into(),
            ));
        }
        Ok(new_balance)
    }

    /// Puts back a balance taken by [`deduct`](Self::deduct) when the order
    /// it paid for could not be written.
    #[instrument(skip(self))]
    pub async fn restore(&self, id: Uuid, deducted_to: i64, original: i64) -> Result<(), ServiceError> {
        let result = GiftCardEntity::update_many()
            .col_expr(gift_card::Column::CurrentBalance, Expr::value(original))
            .col_expr(
                gift_card::Column::Status,
                Expr::value(GiftCardStatus::Active.to_value()),
            )
            .col_expr(gift_card::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(gift_card::Column::Id.eq(id))
            .filter(gift_card::Column::CurrentBalance.eq(deducted_to))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            error!(
                severity = "CRITICAL",
                gift_card_id = %id,
                expected_balance = deducted_to,
                original_balance = original,
                "gift card compensation found an unexpected balance"
            );
            return Err(ServiceError::InternalError(
                "gift card compensation failed".into(),
            ));
        }
        warn!(gift_card_id = %id, original_balance = original, "gift card balance restored");
        Ok(())
    }

    pub async fn record_redemption(
        &self,
        id: Uuid,
        amount: i64,
        balance_after: i64,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.append_ledger(
            id,
            GiftCardTransactionType::Redemption,
            -amount.abs(),
            balance_after,
            Some(order_id),
        )
        .await
    }

    async fn append_ledger(
        &self,
        gift_card_id: Uuid,
        transaction_type: GiftCardTransactionType,
        amount: i64,
        balance_after: i64,
        order_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        gift_card_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            gift_card_id: Set(gift_card_id),
            transaction_type: Set(transaction_type),
            amount: Set(amount),
            balance_after: Set(balance_after),
            order_id: Set(order_id),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use regex::Regex;

    static CODE_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^GC-[A-HJKMNP-Z2-9]{4}-[A-HJKMNP-Z2-9]{4}-[A-HJKMNP-Z2-9]{4}$").unwrap());

    #[test]
    fn alphabet_excludes_confusable_characters() {
        assert_eq!(CODE_ALPHABET.len(), 31);
        for c in b"0O1IL" {
            assert!(!CODE_ALPHABET.contains(c));
        }
        assert_eq!(REJECTION_LIMIT, 248);
    }

    #[test]
    fn generated_codes_have_the_published_shape() {
        for _ in 0..200 {
            let code = generate_code();
            assert!(CODE_RE.is_match(&code), "unexpected code {}", code);
        }
    }

    #[test]
    fn lookups_are_case_insensitive() {
        assert_eq!(normalize_code(" gc-abcd-efgh-jkmn "), "GC-ABCD-EFGH-JKMN");
    }
}
