use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::product::{Product, ProductId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub product_id: ProductId,
    pub sku: String,
    pub stock_quantity: i64,
    pub low_stock: bool,
}

impl InventoryLevel {
    pub fn of(product: &Product, low_stock_threshold: i64) -> Self {
        Self {
            product_id: product.id.clone(),
            sku: product.sku.clone(),
            stock_quantity: product.stock_quantity,
            low_stock: product.stock_quantity <= low_stock_threshold,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockOperation {
    Set,
    Add,
    Subtract,
}

impl StockOperation {
    /// Applies the operation to `current`. Subtraction never drops below zero.
    pub fn apply(&self, current: i64, quantity: i64) -> i64 {
        match self {
            Self::Set => quantity,
            Self::Add => current.saturating_add(quantity),
            Self::Subtract => current.saturating_sub(quantity).max(0),
        }
    }
}

impl FromStr for StockOperation {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "set" => Ok(Self::Set),
            "add" => Ok(Self::Add),
            "subtract" => Ok(Self::Subtract),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown stock operation `{other}` (expected set|add|subtract)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StockOperation;

    #[test]
    fn subtract_is_floored_at_zero() {
        assert_eq!(StockOperation::Subtract.apply(3, 5), 0);
        assert_eq!(StockOperation::Subtract.apply(8, 5), 3);
    }

    #[test]
    fn set_and_add_behave_as_named() {
        assert_eq!(StockOperation::Set.apply(3, 10), 10);
        assert_eq!(StockOperation::Add.apply(3, 10), 13);
        assert!("drop".parse::<StockOperation>().is_err());
    }
}
