use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
    /// Encrypted at rest when an encryption key is configured
    pub customer_phone: Option<String>,
    /// JSON address, encrypted at rest when an encryption key is configured
    #[sea_orm(column_type = "Text")]
    pub shipping_address: String,
    /// Snapshot of `[{id, title, price, quantity, variation?}]` at purchase time
    #[sea_orm(column_type = "Json")]
    pub items: Json,
    pub subtotal: i64,
    pub shipping: i64,
    pub total: i64,
    pub discount_code: Option<String>,
    pub discount_amount: i64,
    pub gift_card_code: Option<String>,
    pub gift_card_amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    /// Processor payment reference; unique when present
    #[sea_orm(unique)]
    pub payment_id: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Orders move forward along pending → paid → shipped → delivered one step
    /// at a time; any non-terminal order may be cancelled.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        match (self, next) {
            (from, Self::Cancelled) => !from.is_terminal(),
            (Self::Pending, Self::Paid)
            | (Self::Paid, Self::Shipped)
            | (Self::Shipped, Self::Delivered) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "wallet")]
    Wallet,
    #[sea_orm(string_value = "gift_card")]
    GiftCard,
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn forward_transitions_only() {
        assert!(Pending.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Delivered.can_transition_to(Shipped));
    }

    #[test]
    fn cancellation_from_non_terminal_states() {
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }
}
