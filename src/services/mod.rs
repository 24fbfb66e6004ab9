// Storefront checkout and settlement
pub mod checkout;
pub mod finaliser;
pub mod payments;
pub mod stock;

// Orders and tender
pub mod discounts;
pub mod gift_cards;
pub mod orders;

// Administrator surface
pub mod admin_auth;
pub mod audit;
