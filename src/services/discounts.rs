use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        discount_code::{self, Entity as DiscountCodeEntity},
        discount_usage::{self, Entity as DiscountUsageEntity},
    },
    errors::ServiceError,
    services::checkout::pricing::{discount_amount, to_minor, AppliedDiscount, DiscountKind},
};

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn check_window(discount: &discount_code::Model, now: DateTime<Utc>) -> Result<(), ServiceError> {
    if discount.starts_at.map_or(false, |starts| now < starts) {
        return Err(ServiceError::BadRequest(
            "Discount code is not yet active".into(),
        ));
    }
    if discount.expires_at.map_or(false, |expires| now >= expires) {
        return Err(ServiceError::BadRequest("Discount code has expired".into()));
    }
    Ok(())
}

fn check_global_limit(discount: &discount_code::Model) -> Result<(), ServiceError> {
    match discount.max_uses {
        Some(max) if discount.use_count >= max => Err(ServiceError::BadRequest(
            "Discount code usage limit reached".into(),
        )),
        _ => Ok(()),
    }
}

fn check_minimum(discount: &discount_code::Model, subtotal: i64) -> Result<(), ServiceError> {
    match discount.min_order_amount {
        Some(min) if subtotal < to_minor(min) => Err(ServiceError::BadRequest(format!(
            "Minimum order of £{:.2} required for this discount",
            min
        ))),
        _ => Ok(()),
    }
}

/// Promotional code lookup, eligibility and usage accounting.
#[derive(Clone)]
pub struct DiscountService {
    db: Arc<DatabaseConnection>,
}

impl DiscountService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_active(&self, code: &str) -> Result<Option<discount_code::Model>, ServiceError> {
        Ok(DiscountCodeEntity::find()
            .filter(discount_code::Column::Code.eq(normalize_code(code)))
            .filter(discount_code::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<discount_code::Model>, ServiceError> {
        Ok(DiscountCodeEntity::find_by_id(id).one(&*self.db).await?)
    }

    /// Validates `code` for this customer and cart and computes the amount.
    #[instrument(skip(self, customer_email))]
    pub async fn apply(
        &self,
        code: &str,
        customer_email: Option<&str>,
        subtotal: i64,
        now: DateTime<Utc>,
    ) -> Result<AppliedDiscount, ServiceError> {
        let discount = self
            .find_active(code)
            .await?
            .ok_or_else(|| ServiceError::BadRequest("Invalid discount code".into()))?;

        check_window(&discount, now)?;
        check_global_limit(&discount)?;

        if let (Some(cap), Some(email)) = (discount.max_uses_per_customer, customer_email) {
            let used = DiscountUsageEntity::find()
                .filter(discount_usage::Column::DiscountId.eq(discount.id))
                .filter(discount_usage::Column::CustomerEmail.eq(email.trim().to_lowercase()))
                .count(&*self.db)
                .await?;
            if used >= u64::try_from(cap.max(0)).unwrap_or(0) {
                return Err(ServiceError::BadRequest(
                    "You have already used this discount code".into(),
                ));
            }
        }

        check_minimum(&discount, subtotal)?;

        let kind = DiscountKind::from_model(&discount);
        Ok(AppliedDiscount {
            id: discount.id,
            code: discount.code,
            kind,
            amount: discount_amount(kind, subtotal),
        })
    }

    /// Bumps `use_count` unless the code is exhausted, then appends the
    /// customer's usage row. Returns false when the limit had been reached.
    #[instrument(skip(self, customer_email))]
    pub async fn record_usage(
        &self,
        discount_id: Uuid,
        customer_email: &str,
        order_id: Option<Uuid>,
    ) -> Result<bool, ServiceError> {
        let result = DiscountCodeEntity::update_many()
            .col_expr(
                discount_code::Column::UseCount,
                Expr::col(discount_code::Column::UseCount).add(1),
            )
            .col_expr(discount_code::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(discount_code::Column::Id.eq(discount_id))
            .filter(
                Condition::any()
                    .add(discount_code::Column::MaxUses.is_null())
                    .add(
                        Expr::col(discount_code::Column::UseCount)
                            .lt(Expr::col(discount_code::Column::MaxUses)),
                    ),
            )
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(%discount_id, "discount usage not recorded: limit reached or code missing");
            return Ok(false);
        }

        discount_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            discount_id: Set(discount_id),
            customer_email: Set(customer_email.trim().to_lowercase()),
            order_id: Set(order_id),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!(%discount_id, "discount usage recorded");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::DiscountType;
    use chrono::Duration;

    fn code(now: DateTime<Utc>) -> discount_code::Model {
        discount_code::Model {
            id: Uuid::new_v4(),
            code: "SPRING10".into(),
            discount_type: DiscountType::Percentage,
            value: 10.0,
            is_active: true,
            starts_at: None,
            expires_at: None,
            max_uses: None,
            max_uses_per_customer: None,
            min_order_amount: None,
            use_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(result: Result<(), ServiceError>) -> String {
        result.unwrap_err().response_message()
    }

    #[test]
    fn window_is_half_open() {
        let now = Utc::now();
        let mut discount = code(now);
        discount.starts_at = Some(now + Duration::hours(1));
        assert_eq!(message(check_window(&discount, now)), "Discount code is not yet active");

        discount.starts_at = Some(now);
        discount.expires_at = Some(now);
        assert_eq!(message(check_window(&discount, now)), "Discount code has expired");

        discount.expires_at = Some(now + Duration::seconds(1));
        assert!(check_window(&discount, now).is_ok());
    }

    #[test]
    fn usage_limit_and_minimum() {
        let now = Utc::now();
        let mut discount = code(now);
        discount.max_uses = Some(3);
        discount.use_count = 3;
        assert_eq!(
            message(check_global_limit(&discount)),
            "Discount code usage limit reached"
        );

        discount.min_order_amount = Some(25.0);
        assert_eq!(
            message(check_minimum(&discount, 2499)),
            "Minimum order of £25.00 required for this discount"
        );
        assert!(check_minimum(&discount, 2500).is_ok());
    }

    #[test]
    fn codes_are_normalised() {
        assert_eq!(normalize_code("  spring10 "), "SPRING10");
    }
}
