pub mod admin_refresh_token;
pub mod admin_user;
pub mod audit_log;
pub mod discount_code;
pub mod discount_usage;
pub mod gift_card;
pub mod gift_card_transaction;
pub mod order;
pub mod product;
pub mod rate_limit;

pub use discount_code::DiscountType;
pub use gift_card::GiftCardStatus;
pub use gift_card_transaction::GiftCardTransactionType;
pub use order::{OrderStatus, PaymentMethod};
