use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::product::ProductId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Confirmed)
                | (OrderStatus::Confirmed, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Confirmed, OrderStatus::Cancelled)
        ) || *self == next
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown order status `{other}` (expected pending|confirmed|shipped|delivered|cancelled)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }
        Err(DomainError::InvalidOrderTransition { from: self.status, to: next })
    }
}

/// One requested line of a new order; `product` is either a product id or a SKU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderLineRequest {
    pub product: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLineRequest>,
    pub currency: String,
}

pub fn line_total(unit_price: Decimal, quantity: u32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{line_total, Order, OrderId, OrderStatus};
    use crate::domain::customer::CustomerId;
    use crate::errors::DomainError;

    fn order(status: OrderStatus) -> Order {
        Order {
            id: OrderId("order_000001".to_string()),
            customer_id: CustomerId("cust_000001".to_string()),
            items: Vec::new(),
            total_amount: Decimal::ZERO,
            currency: "USD".to_string(),
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn follows_fulfilment_lifecycle() {
        let mut order = order(OrderStatus::Pending);
        order.transition_to(OrderStatus::Confirmed).expect("pending -> confirmed");
        order.transition_to(OrderStatus::Shipped).expect("confirmed -> shipped");
        order.transition_to(OrderStatus::Delivered).expect("shipped -> delivered");
        assert_eq!(order.status, OrderStatus::Delivered);
    }

    #[test]
    fn shipped_orders_cannot_be_cancelled() {
        let mut order = order(OrderStatus::Shipped);
        let error = order.transition_to(OrderStatus::Cancelled).expect_err("shipped -> cancelled");
        assert!(matches!(error, DomainError::InvalidOrderTransition { .. }));
    }

    #[test]
    fn parses_both_cancel_spellings() {
        assert_eq!("canceled".parse::<OrderStatus>().ok(), Some(OrderStatus::Cancelled));
        assert_eq!(" Shipped ".parse::<OrderStatus>().ok(), Some(OrderStatus::Shipped));
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn line_total_multiplies_unit_price() {
        assert_eq!(line_total(Decimal::new(999, 2), 2), Decimal::new(1998, 2));
    }
}
