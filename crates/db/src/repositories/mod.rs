use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use shopdesk_core::domain::EntityKind;
use shopdesk_core::domain::customer::{Customer, CustomerId, NewCustomer};
use shopdesk_core::domain::inventory::StockOperation;
use shopdesk_core::domain::order::{NewOrder, Order, OrderId, OrderStatus};
use shopdesk_core::domain::product::{NewProduct, Product, ProductId, ProductQuery, ProductUpdate};
use shopdesk_core::errors::ToolError;

pub mod customer;
pub mod memory;
pub mod order;
pub mod product;

pub use customer::SqlCustomerRepository;
pub use memory::InMemoryShop;
pub use order::SqlOrderRepository;
pub use product::SqlProductRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Rejected(String),
}

impl From<RepositoryError> for ToolError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(message) => ToolError::NotFound(message),
            RepositoryError::Conflict(message) | RepositoryError::Rejected(message) => {
                ToolError::Validation(message)
            }
            RepositoryError::Decode(message) => ToolError::Internal(message),
            RepositoryError::Database(error) => classify_database_error(error),
        }
    }
}

fn classify_database_error(error: sqlx::Error) -> ToolError {
    match &error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ToolError::Transient(error.to_string())
        }
        sqlx::Error::Database(database) => {
            if database.is_unique_violation() {
                return ToolError::Validation(
                    "a record with the same unique key already exists".to_string(),
                );
            }
            if database.is_foreign_key_violation() || database.is_check_violation() {
                return ToolError::Validation(database.message().to_string());
            }
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
            let busy = database
                .code()
                .and_then(|code| code.parse::<i64>().ok())
                .is_some_and(|code| matches!(code & 0xff, 5 | 6));
            if busy {
                ToolError::Transient(database.message().to_string())
            } else {
                ToolError::Internal(database.message().to_string())
            }
        }
        _ => ToolError::Internal(error.to_string()),
    }
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

/// Allocates the next id for `kind` inside the caller's transaction.
pub(crate) async fn next_id(
    conn: &mut sqlx::SqliteConnection,
    kind: EntityKind,
) -> Result<String, RepositoryError> {
    let value: i64 = sqlx::query_scalar(
        "INSERT INTO entity_sequence (kind, next_value) VALUES (?, 1)
         ON CONFLICT(kind) DO UPDATE SET next_value = next_value + 1
         RETURNING next_value",
    )
    .bind(kind.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(kind.format_id(value))
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid decimal `{raw}`: {error}")))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {error}")))
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError>;
    /// Looks a product up by id first, then by SKU.
    async fn resolve(&self, identifier: &str) -> Result<Option<Product>, RepositoryError>;
    async fn search(&self, query: &ProductQuery) -> Result<Vec<Product>, RepositoryError>;
    async fn low_stock(&self, threshold: i64) -> Result<Vec<Product>, RepositoryError>;
    async fn create(&self, product: NewProduct) -> Result<Product, RepositoryError>;
    async fn update(
        &self,
        id: &ProductId,
        update: &ProductUpdate,
    ) -> Result<Product, RepositoryError>;
    async fn adjust_stock(
        &self,
        id: &ProductId,
        operation: StockOperation,
        quantity: i64,
    ) -> Result<Product, RepositoryError>;
    async fn count(&self) -> Result<i64, RepositoryError>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, RepositoryError>;
    async fn search(&self, query: Option<&str>) -> Result<Vec<Customer>, RepositoryError>;
    async fn create(&self, customer: NewCustomer) -> Result<Customer, RepositoryError>;
    async fn count(&self) -> Result<i64, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn search(
        &self,
        customer_id: Option<&CustomerId>,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, RepositoryError>;
    /// Prices the order and decrements stock atomically.
    async fn place(&self, order: NewOrder) -> Result<Order, RepositoryError>;
    /// Cancelling returns the order's items to stock.
    async fn update_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> Result<Order, RepositoryError>;
}
