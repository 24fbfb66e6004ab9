use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{errors::ServiceError, validation::CartItem};

/// Longest `custom_id` the wallet processor accepts.
pub const MAX_COMPACT_LEN: usize = 127;

/// Separator between product id and variation in wallet item SKUs.
const SKU_SEPARATOR: char = '|';

/// Everything the finaliser needs to rebuild a checkout once payment lands.
///
/// The card processor carries it as a flat string map; the wallet processor
/// only has a short `custom_id`, so the lines travel as item SKUs and the
/// rest is packed into [`CheckoutMetadata::to_compact`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub items: Vec<CartItem>,
    pub discount_id: Option<Uuid>,
    pub discount_code: Option<String>,
    /// Minor units
    pub discount_amount: i64,
    pub free_delivery: bool,
    pub gift_card_id: Option<Uuid>,
    pub gift_card_code: Option<String>,
    /// Minor units
    pub gift_card_amount: i64,
    pub customer_email: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct PackedItem {
    id: i64,
    q: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<String>,
}

impl CheckoutMetadata {
    pub fn to_map(&self) -> HashMap<String, String> {
        let packed: Vec<PackedItem> = self
            .items
            .iter()
            .map(|item| PackedItem {
                id: item.product_id,
                q: item.quantity,
                v: item.variation.clone(),
            })
            .collect();

        let mut map = HashMap::new();
        map.insert(
            "items".to_string(),
            serde_json::to_string(&packed).unwrap_or_else(|_| "[]".to_string()),
        );
        if let Some(id) = self.discount_id {
            map.insert("discount_id".into(), id.to_string());
        }
        if let Some(code) = &self.discount_code {
            map.insert("discount_code".into(), code.clone());
            map.insert("discount_amount".into(), self.discount_amount.to_string());
        }
        if self.free_delivery {
            map.insert("free_delivery".into(), "true".into());
        }
        if let Some(id) = self.gift_card_id {
            map.insert("gift_card_id".into(), id.to_string());
            map.insert("gift_card_amount".into(), self.gift_card_amount.to_string());
        }
        if let Some(code) = &self.gift_card_code {
            map.insert("gift_card_code".into(), code.clone());
        }
        if let Some(email) = &self.customer_email {
            map.insert("customer_email".into(), email.clone());
        }
        map
    }

    /// `None` when the map carries no readable item list.
    pub fn from_map(map: &HashMap<String, String>) -> Option<Self> {
        let packed: Vec<PackedItem> = serde_json::from_str(map.get("items")?).ok()?;
        if packed.is_empty() {
            return None;
        }
        let text = |key: &str| {
            map.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let amount = |key: &str| {
            map.get(key)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(0)
                .max(0)
        };

        Some(Self {
            items: packed
                .into_iter()
                .map(|p| CartItem {
                    product_id: p.id,
                    quantity: p.q,
                    variation: p.v,
                })
                .collect(),
            discount_id: text("discount_id").and_then(|v| Uuid::parse_str(&v).ok()),
            discount_code: text("discount_code"),
            discount_amount: amount("discount_amount"),
            free_delivery: map.get("free_delivery").map_or(false, |v| v == "true"),
            gift_card_id: text("gift_card_id").and_then(|v| Uuid::parse_str(&v).ok()),
            gift_card_code: text("gift_card_code"),
            gift_card_amount: amount("gift_card_amount"),
            customer_email: text("customer_email"),
        })
    }

    /// `gc=<uuid>;ga=<minor>;fd=1;da=<minor>;dc=<code>`, omitting empty parts.
    /// Discount and gift card ids are resolved again from code and id on the
    /// way back in. Refuses rather than cut anything that does not fit.
    pub fn to_compact(&self) -> Result<String, ServiceError> {
        let mut parts = Vec::new();
        if let Some(id) = self.gift_card_id {
            parts.push(format!("gc={}", id));
            parts.push(format!("ga={}", self.gift_card_amount));
        }
        if self.free_delivery {
            parts.push("fd=1".to_string());
        }
        if let Some(code) = &self.discount_code {
            if code.contains(';') {
                return Err(ServiceError::BadRequest("Invalid discount code".into()));
            }
            parts.push(format!("da={}", self.discount_amount));
            parts.push(format!("dc={}", code));
        }
        let compact = parts.join(";");
        if compact.len() > MAX_COMPACT_LEN {
            return Err(ServiceError::BadRequest(
                "Discount code is too long for wallet checkout".into(),
            ));
        }
        Ok(compact)
    }

    pub fn from_compact(compact: &str, items: &[CartItem]) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        let mut metadata = Self {
            items: items.to_vec(),
            ..Self::default()
        };
        for part in compact.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "dc" if !value.is_empty() => metadata.discount_code = Some(value.to_string()),
                "da" => metadata.discount_amount = value.parse::<i64>().unwrap_or(0).max(0),
                "gc" => metadata.gift_card_id = Uuid::parse_str(value).ok(),
                "ga" => metadata.gift_card_amount = value.parse::<i64>().unwrap_or(0).max(0),
                "fd" => metadata.free_delivery = value == "1",
                _ => {}
            }
        }
        Some(metadata)
    }
}

/// Wallet item SKU: the product id, plus the variation when there is one.
pub fn item_sku(item: &CartItem) -> String {
    match &item.variation {
        Some(variation) => format!("{}{}{}", item.product_id, SKU_SEPARATOR, variation),
        None => item.product_id.to_string(),
    }
}

pub fn parse_item_sku(sku: &str, quantity: i32) -> Option<CartItem> {
    let (id, variation) = match sku.split_once(SKU_SEPARATOR) {
        Some((id, variation)) => (id, Some(variation.to_string())),
        None => (sku, None),
    };
    let product_id = id.trim().parse::<i64>().ok().filter(|id| *id > 0)?;
    Some(CartItem {
        product_id,
        quantity,
        variation: variation.filter(|v| !v.is_empty()),
    })
}
