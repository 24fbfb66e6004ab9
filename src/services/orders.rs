use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    crypto::FieldCipher,
    entities::{
        order::{self, Entity as OrderEntity},
        OrderStatus, PaymentMethod,
    },
    errors::{is_unique_violation, ServiceError},
    services::checkout::pricing::{to_major, Totals, VerifiedItem},
    validation::{validate_order_number, ShippingAddress},
};

pub const MAX_ORDER_NUMBER_ATTEMPTS: usize = 3;

/// `FS-YYYYMMDD-NNNN`, UTC date and an OS-random suffix.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    format!("FS-{}-{:04}", now.format("%Y%m%d"), OsRng.next_u32() % 10_000)
}

/// Everything needed to write a `paid` order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub shipping_address: ShippingAddress,
    pub items: Vec<VerifiedItem>,
    pub totals: Totals,
    pub discount_code: Option<String>,
    pub gift_card_code: Option<String>,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_id: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(order::Model),
    /// Another delivery already wrote this payment
    Duplicate(order::Model),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemSnapshot {
    pub id: i64,
    pub title: String,
    /// Minor units
    pub price: i64,
    pub quantity: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
}

/// What an anonymous shopper may see about an order.
#[derive(Debug, Clone, Serialize)]
pub struct PublicOrder {
    pub order_number: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub items: Vec<PublicOrderItem>,
    pub subtotal: f64,
    pub shipping: f64,
    pub discount_amount: f64,
    pub gift_card_amount: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicOrderItem {
    pub title: String,
    pub price: f64,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
}

/// Administrator view with contact details decrypted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderView {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub total: f64,
    pub payment_method: PaymentMethod,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    cipher: FieldCipher,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, cipher: FieldCipher) -> Self {
        Self { db, cipher }
    }

    pub async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<order::Model>, DbErr> {
        OrderEntity::find()
            .filter(order::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await
    }

    /// Writes the order, regenerating the number on collision. A unique
    /// violation on `payment_id` resolves to the existing row.
    #[instrument(skip(self, new_order), fields(payment_id = %new_order.payment_id))]
    pub async fn insert_with_retry(&self, new_order: &NewOrder) -> Result<InsertOutcome, ServiceError> {
        let items: Vec<OrderItemSnapshot> = new_order
            .items
            .iter()
            .map(|item| OrderItemSnapshot {
                id: item.product_id,
                title: item.title.clone(),
                price: item.unit_price,
                quantity: item.quantity,
                variation: item.variation.clone(),
            })
            .collect();
        let items = serde_json::to_value(items)?;
        let address = self
            .cipher
            .encrypt(&serde_json::to_string(&new_order.shipping_address)?)?;
        let phone = self.cipher.encrypt_opt(new_order.customer_phone.as_deref())?;

        let mut last_error = None;
        for attempt in 1..=MAX_ORDER_NUMBER_ATTEMPTS {
            let now = Utc::now();
            let row = order::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_number: Set(generate_order_number(now)),
                customer_email: Set(new_order.customer_email.trim().to_lowercase()),
                customer_name: Set(new_order.customer_name.clone()),
                customer_phone: Set(phone.clone()),
                shipping_address: Set(address.clone()),
                items: Set(items.clone()),
                subtotal: Set(new_order.totals.subtotal),
                shipping: Set(new_order.totals.shipping),
                total: Set(new_order.totals.total),
                discount_code: Set(new_order.discount_code.clone()),
                discount_amount: Set(new_order.totals.discount),
                gift_card_code: Set(new_order.gift_card_code.clone()),
                gift_card_amount: Set(new_order.totals.gift_card),
                currency: Set(new_order.currency.clone()),
                status: Set(OrderStatus::Paid),
                payment_method: Set(new_order.payment_method),
                payment_id: Set(Some(new_order.payment_id.clone())),
                notes: Set(new_order.notes.clone()),
                created_at: Set(now),
                updated_at: Set(now),
            };

            match row.insert(&*self.db).await {
                Ok(created) => {
                    info!(order_number = %created.order_number, "order created");
                    return Ok(InsertOutcome::Created(created));
                }
                Err(e) if is_unique_violation(&e) => {
                    if let Some(existing) = self.find_by_payment_id(&new_order.payment_id).await? {
                        info!(order_number = %existing.order_number, "payment already recorded");
                        return Ok(InsertOutcome::Duplicate(existing));
                    }
                    warn!(attempt, "order number collision, regenerating");
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error
            .map(ServiceError::from)
            .unwrap_or_else(|| ServiceError::InternalError("order insert failed".into())))
    }

    /// Non-sensitive projection for the order-status page.
    #[instrument(skip(self))]
    pub async fn public_lookup(&self, order_number: &str) -> Result<PublicOrder, ServiceError> {
        let order_number = order_number.trim().to_uppercase();
        validate_order_number(&order_number)?;

        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;

        let items: Vec<OrderItemSnapshot> =
            serde_json::from_value(order.items.clone()).unwrap_or_default();
        Ok(PublicOrder {
            order_number: order.order_number,
            status: order.status,
            created_at: order.created_at,
            items: items
                .into_iter()
                .map(|item| PublicOrderItem {
                    title: item.title,
                    price: to_major(item.price),
                    quantity: item.quantity,
                    variation: item.variation,
                })
                .collect(),
            subtotal: to_major(order.subtotal),
            shipping: to_major(order.shipping),
            discount_amount: to_major(order.discount_amount),
            gift_card_amount: to_major(order.gift_card_amount),
            total: to_major(order.total),
        })
    }

    /// Moves an order one step along its lifecycle, predicated on the status
    /// that was read.
    #[instrument(skip(self))]
    pub async fn transition_status(
        &self,
        id: Uuid,
        next: OrderStatus,
    ) -> Result<(OrderStatus, order::Model), ServiceError> {
        let current = OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;

        if !current.status.can_transition_to(next) {
            return Err(ServiceError::BadRequest(format!(
                "Cannot change order status from {} to {}",
                current.status.to_value(),
                next.to_value()
            )));
        }

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(next.to_value()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::Status.eq(current.status))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Order status was changed by another request".into(),
            ));
        }

        let updated = OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;
        info!(order_number = %updated.order_number, from = ?current.status, to = ?next, "order status changed");
        Ok((current.status, updated))
    }

    pub fn admin_view(&self, order: &order::Model) -> Result<AdminOrderView, ServiceError> {
        let address = self.cipher.decrypt(&order.shipping_address)?;
        let phone = order
            .customer_phone
            .as_deref()
            .map(|p| self.cipher.decrypt(p))
            .transpose()?;
        Ok(AdminOrderView {
            id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
            customer_email: order.customer_email.clone(),
            customer_name: order.customer_name.clone(),
            customer_phone: phone,
            shipping_address: serde_json::from_str(&address).ok(),
            total: to_major(order.total),
            payment_method: order.payment_method,
            updated_at: order.updated_at,
        })
    }
}

/// Audit payload for a status change.
pub fn status_change_details(order: &order::Model, from: OrderStatus) -> serde_json::Value {
    json!({
        "orderNumber": order.order_number,
        "from": from.to_value(),
        "to": order.status.to_value(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_numbers_match_the_public_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        for _ in 0..100 {
            let number = generate_order_number(now);
            assert!(number.starts_with("FS-20240309-"));
            assert!(validate_order_number(&number).is_ok(), "{}", number);
        }
    }
}
