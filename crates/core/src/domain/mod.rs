pub mod customer;
pub mod inventory;
pub mod order;
pub mod product;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Entity kinds a session can remember an id for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Customer,
    Order,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Product, EntityKind::Customer, EntityKind::Order];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Customer => "customer",
            Self::Order => "order",
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Product => "prod",
            Self::Customer => "cust",
            Self::Order => "order",
        }
    }

    pub fn format_id(&self, sequence: i64) -> String {
        format!("{}_{:06}", self.id_prefix(), sequence)
    }

    /// Infers the kind from an id such as `cust_000004`.
    pub fn of_id(id: &str) -> Option<Self> {
        let (prefix, digits) = id.split_once('_')?;
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        Self::ALL.into_iter().find(|kind| kind.id_prefix() == prefix)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "product" | "products" => Ok(Self::Product),
            "customer" | "customers" => Ok(Self::Customer),
            "order" | "orders" => Ok(Self::Order),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown entity kind `{other}` (expected product|customer|order)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EntityKind;

    #[test]
    fn ids_are_zero_padded_per_kind() {
        assert_eq!(EntityKind::Product.format_id(1), "prod_000001");
        assert_eq!(EntityKind::Customer.format_id(42), "cust_000042");
        assert_eq!(EntityKind::Order.format_id(1234567), "order_1234567");
    }

    #[test]
    fn kind_is_inferred_from_id_prefix() {
        assert_eq!(EntityKind::of_id("order_000003"), Some(EntityKind::Order));
        assert_eq!(EntityKind::of_id("cust_12"), Some(EntityKind::Customer));
        assert_eq!(EntityKind::of_id("prod_"), None);
        assert_eq!(EntityKind::of_id("WID-001"), None);
    }
}
