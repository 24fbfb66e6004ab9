//! Input validation kernel.
//!
//! Every function here is total: it never panics and never touches I/O. Untyped
//! JSON coming from the browser enters through `validate_order_items` and
//! `validate_shipping_address`, which hand back typed values on success.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_CART_ITEMS: usize = 50;
pub const MAX_ITEM_QUANTITY: i64 = 99;
pub const MIN_ITEM_PRICE: f64 = 0.01;
pub const MAX_ITEM_PRICE: f64 = 10_000.0;
const MAX_VARIATION_LENGTH: usize = 100;

/// A rejected input, carrying the message shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type ValidationResult<T = ()> = Result<T, ValidationError>;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?\d{10,14}$").expect("phone regex is valid"));

static ORDER_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^FS-\d{8}-\d{4}$").expect("order number regex is valid"));

static XSS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"</?\s*[a-z!?][^>]*>",
        r"<\s*(script|iframe|object|embed|svg|img|link|meta|style)\b",
        r"(^|[^a-z0-9])(javascript|vbscript)\s*:",
        r"(^|[^a-z0-9])data\s*:\s*[a-z]+/[a-z0-9.+-]+",
        r"\bon[a-z]+\s*=",
        r"expression\s*\(",
        r"&#",
        r"%3c|%3e",
        r"\x00",
        r"<!\[cdata\[",
        r"style\s*=[^>]*(expression|javascript|behavior)",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("xss pattern is valid")
    })
    .collect()
});

/// Returns true when the input carries any known script-injection marker.
pub fn contains_xss(input: &str) -> bool {
    XSS_PATTERNS.iter().any(|re| re.is_match(input))
}

pub fn validate_email(email: &str) -> ValidationResult {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::new("Email is required"));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::new("Email address is too long"));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(ValidationError::new("Invalid email address"));
    }
    Ok(())
}

/// Phone numbers are optional; an empty value is accepted.
pub fn validate_phone(phone: &str) -> ValidationResult {
    let stripped: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.'))
        .collect();
    if stripped.is_empty() {
        return Ok(());
    }
    if !PHONE_RE.is_match(&stripped) {
        return Err(ValidationError::new("Invalid phone number"));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> ValidationResult {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::new("Name is required"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::new("Name is too long"));
    }
    if contains_xss(name) {
        return Err(ValidationError::new("Name contains invalid characters"));
    }
    Ok(())
}

pub fn validate_order_number(order_number: &str) -> ValidationResult {
    if ORDER_NUMBER_RE.is_match(order_number) {
        Ok(())
    } else {
        Err(ValidationError::new("Invalid order number format"))
    }
}

/// A cart line as submitted by the browser. Client prices are checked for
/// plausibility and then dropped; the catalog is the only price authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: i64,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
}

pub fn validate_order_items(items: &Value) -> ValidationResult<Vec<CartItem>> {
    let list = items
        .as_array()
        .ok_or_else(|| ValidationError::new("Items must be a list"))?;
    if list.is_empty() {
        return Err(ValidationError::new("Cart is empty"));
    }
    if list.len() > MAX_CART_ITEMS {
        return Err(ValidationError::new(format!(
            "Too many items in cart (maximum {})",
            MAX_CART_ITEMS
        )));
    }

    list.iter()
        .enumerate()
        .map(|(index, item)| validate_cart_item(index + 1, item))
        .collect()
}

fn validate_cart_item(position: usize, item: &Value) -> ValidationResult<CartItem> {
    let object = item
        .as_object()
        .ok_or_else(|| ValidationError::new(format!("Item {} is malformed", position)))?;

    let product_id = match object.get("id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
    .ok_or_else(|| ValidationError::new(format!("Item {} has an invalid product id", position)))?;

    let quantity = object
        .get("quantity")
        .and_then(Value::as_i64)
        .filter(|q| (1..=MAX_ITEM_QUANTITY).contains(q))
        .ok_or_else(|| {
            ValidationError::new(format!(
                "Item {} quantity must be between 1 and {}",
                position, MAX_ITEM_QUANTITY
            ))
        })?;

    let price = match object.get("price") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match price {
        Some(p) if p.is_finite() && (MIN_ITEM_PRICE..=MAX_ITEM_PRICE).contains(&p) => {}
        _ => {
            return Err(ValidationError::new(format!(
                "Item {} has an invalid price",
                position
            )))
        }
    }

    let variation = match object.get("variation") {
        None | Some(Value::Null) => None,
        Some(Value::String(v)) if v.trim().is_empty() => None,
        Some(Value::String(v)) => {
            if v.chars().count() > MAX_VARIATION_LENGTH || contains_xss(v) {
                return Err(ValidationError::new(format!(
                    "Item {} has an invalid variation",
                    position
                )));
            }
            Some(v.trim().to_string())
        }
        Some(_) => {
            return Err(ValidationError::new(format!(
                "Item {} has an invalid variation",
                position
            )))
        }
    };

    Ok(CartItem {
        product_id,
        // bounded to 1..=99 above
        quantity: quantity as i32,
        variation,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
    pub postcode: String,
    pub country: String,
}

/// (field, required, max length)
const ADDRESS_FIELDS: [(&str, bool, usize); 6] = [
    ("line1", true, 200),
    ("line2", false, 200),
    ("city", true, 100),
    ("county", false, 100),
    ("postcode", true, 20),
    ("country", true, 100),
];

pub fn validate_shipping_address(address: &Value) -> ValidationResult<ShippingAddress> {
    let object = address
        .as_object()
        .ok_or_else(|| ValidationError::new("Shipping address is required"))?;

    let mut values: [Option<String>; 6] = Default::default();
    for (slot, (field, required, max_len)) in values.iter_mut().zip(ADDRESS_FIELDS) {
        let value = match object.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(_) => {
                return Err(ValidationError::new(format!(
                    "Shipping address {} is invalid",
                    field
                )))
            }
        };

        match &value {
            None if required => {
                return Err(ValidationError::new(format!(
                    "Shipping address {} is required",
                    field
                )))
            }
            Some(v) if v.chars().count() > max_len => {
                return Err(ValidationError::new(format!(
                    "Shipping address {} is too long",
                    field
                )))
            }
            Some(v) if contains_xss(v) => {
                return Err(ValidationError::new(format!(
                    "Shipping address {} contains invalid characters",
                    field
                )))
            }
            _ => {}
        }
        *slot = value;
    }

    let [line1, line2, city, county, postcode, country] = values;
    Ok(ShippingAddress {
        line1: line1.unwrap_or_default(),
        line2,
        city: city.unwrap_or_default(),
        county,
        postcode: postcode.unwrap_or_default(),
        country: country.unwrap_or_default(),
    })
}

/// Canonical five-character HTML escape.
pub fn encode_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Trims, drops control characters other than newline and tab, and truncates
/// to `max_len` characters.
pub fn sanitize(input: &str, max_len: usize) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(max_len)
        .collect()
}
