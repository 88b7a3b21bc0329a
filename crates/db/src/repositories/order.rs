use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;

use shopdesk_core::domain::customer::CustomerId;
use shopdesk_core::domain::order::{line_total, NewOrder, Order, OrderId, OrderItem, OrderStatus};
use shopdesk_core::domain::product::ProductId;
use shopdesk_core::domain::EntityKind;

use super::{
    decode_err, next_id, parse_decimal, parse_timestamp, OrderRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<OrderItem, RepositoryError> {
    let product_id: String = row.try_get("product_id").map_err(decode_err)?;
    let sku: String = row.try_get("sku").map_err(decode_err)?;
    let quantity: i64 = row.try_get("quantity").map_err(decode_err)?;
    let unit_price: String = row.try_get("unit_price").map_err(decode_err)?;
    let total_price: String = row.try_get("total_price").map_err(decode_err)?;

    Ok(OrderItem {
        product_id: ProductId(product_id),
        sku,
        quantity: u32::try_from(quantity).map_err(decode_err)?,
        unit_price: parse_decimal(&unit_price)?,
        total_price: parse_decimal(&total_price)?,
    })
}

fn row_to_order(
    row: &sqlx::sqlite::SqliteRow,
    items: Vec<OrderItem>,
) -> Result<Order, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let customer_id: String = row.try_get("customer_id").map_err(decode_err)?;
    let total_amount: String = row.try_get("total_amount").map_err(decode_err)?;
    let currency: String = row.try_get("currency").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(Order {
        id: OrderId(id),
        customer_id: CustomerId(customer_id),
        items,
        total_amount: parse_decimal(&total_amount)?,
        currency,
        status: status.parse().map_err(decode_err)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

async fn load_items(
    conn: &mut sqlx::SqliteConnection,
    order_id: &str,
) -> Result<Vec<OrderItem>, RepositoryError> {
    let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
        "SELECT product_id, sku, quantity, unit_price, total_price
         FROM order_item WHERE order_id = ? ORDER BY line_number",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_item).collect::<Result<Vec<_>, _>>()
}

async fn load_order(
    conn: &mut sqlx::SqliteConnection,
    id: &OrderId,
) -> Result<Option<Order>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, customer_id, total_amount, currency, status, created_at, updated_at
         FROM customer_order WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(ref r) => {
            let items = load_items(conn, &id.0).await?;
            Ok(Some(row_to_order(r, items)?))
        }
        None => Ok(None),
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_order(&mut conn, id).await
    }

    async fn search(
        &self,
        customer_id: Option<&CustomerId>,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, customer_id, total_amount, currency, status, created_at, updated_at
             FROM customer_order
             WHERE (?1 IS NULL OR customer_id = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY id",
        )
        .bind(customer_id.map(|id| id.0.as_str()))
        .bind(status.map(|status| status.as_str()))
        .fetch_all(&mut *conn)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id").map_err(decode_err)?;
            let items = load_items(&mut conn, &id).await?;
            orders.push(row_to_order(row, items)?);
        }
        Ok(orders)
    }

    async fn place(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        if order.lines.is_empty() {
            return Err(RepositoryError::Rejected("an order needs at least one item".to_string()));
        }
        let mut tx = self.pool.begin().await?;

        let customer_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM customer WHERE id = ?)")
                .bind(&order.customer_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if customer_exists == 0 {
            return Err(RepositoryError::NotFound(format!(
                "no customer with id `{}`",
                order.customer_id
            )));
        }

        let mut items = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            if line.quantity == 0 {
                return Err(RepositoryError::Rejected(format!(
                    "quantity for `{}` must be at least 1",
                    line.product
                )));
            }

            let row = sqlx::query(
                "SELECT id, sku, price, is_active FROM product
                 WHERE id = ?1 OR sku = ?1
                 ORDER BY (id = ?1) DESC
                 LIMIT 1",
            )
            .bind(line.product.trim())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("no product with id or sku `{}`", line.product))
            })?;

            let product_id: String = row.try_get("id").map_err(decode_err)?;
            let sku: String = row.try_get("sku").map_err(decode_err)?;
            let price: String = row.try_get("price").map_err(decode_err)?;
            let is_active: bool = row.try_get("is_active").map_err(decode_err)?;
            if !is_active {
                return Err(RepositoryError::Rejected(format!(
                    "product `{sku}` is no longer sold"
                )));
            }

            let reserved = sqlx::query(
                "UPDATE product
                 SET stock_quantity = stock_quantity - ?1, updated_at = ?2
                 WHERE id = ?3 AND stock_quantity >= ?1",
            )
            .bind(i64::from(line.quantity))
            .bind(Utc::now().to_rfc3339())
            .bind(&product_id)
            .execute(&mut *tx)
            .await?;
            if reserved.rows_affected() == 0 {
                let available: i64 =
                    sqlx::query_scalar("SELECT stock_quantity FROM product WHERE id = ?")
                        .bind(&product_id)
                        .fetch_one(&mut *tx)
                        .await?;
                return Err(RepositoryError::Rejected(format!(
                    "insufficient stock for `{sku}`: requested {}, available {available}",
                    line.quantity
                )));
            }

            let unit_price = parse_decimal(&price)?;
            items.push(OrderItem {
                product_id: ProductId(product_id),
                sku,
                quantity: line.quantity,
                unit_price,
                total_price: line_total(unit_price, line.quantity),
            });
        }

        let id = next_id(&mut tx, EntityKind::Order).await?;
        let now = Utc::now();
        let total_amount: Decimal = items.iter().map(|item| item.total_price).sum();
        let placed = Order {
            id: OrderId(id),
            customer_id: order.customer_id,
            items,
            total_amount,
            currency: order.currency,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO customer_order (id, customer_id, total_amount, currency, status,
                                         created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&placed.id.0)
        .bind(&placed.customer_id.0)
        .bind(placed.total_amount.to_string())
        .bind(&placed.currency)
        .bind(placed.status.as_str())
        .bind(placed.created_at.to_rfc3339())
        .bind(placed.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (index, item) in placed.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_item (order_id, line_number, product_id, sku, quantity,
                                         unit_price, total_price)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&placed.id.0)
            .bind(index as i64 + 1)
            .bind(&item.product_id.0)
            .bind(&item.sku)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.to_string())
            .bind(item.total_price.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(placed)
    }

    async fn update_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut order = load_order(&mut tx, id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("no order with id `{id}`")))?;
        let previous = order.status;
        order.transition_to(status).map_err(|error| RepositoryError::Rejected(error.to_string()))?;
        order.updated_at = Utc::now();

        if status == OrderStatus::Cancelled && previous != OrderStatus::Cancelled {
            for item in &order.items {
                sqlx::query(
                    "UPDATE product SET stock_quantity = stock_quantity + ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(i64::from(item.quantity))
                .bind(order.updated_at.to_rfc3339())
                .bind(&item.product_id.0)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("UPDATE customer_order SET status = ?, updated_at = ? WHERE id = ?")
            .bind(order.status.as_str())
            .bind(order.updated_at.to_rfc3339())
            .bind(&order.id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(order)
    }
}
