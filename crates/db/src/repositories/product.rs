use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;

use shopdesk_core::domain::inventory::StockOperation;
use shopdesk_core::domain::product::{NewProduct, Product, ProductId, ProductQuery, ProductUpdate};
use shopdesk_core::domain::EntityKind;

use super::{
    decode_err, next_id, parse_decimal, parse_timestamp, ProductRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let sku: String = row.try_get("sku").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let description: String = row.try_get("description").map_err(decode_err)?;
    let price: String = row.try_get("price").map_err(decode_err)?;
    let currency: String = row.try_get("currency").map_err(decode_err)?;
    let category: String = row.try_get("category").map_err(decode_err)?;
    let stock_quantity: i64 = row.try_get("stock_quantity").map_err(decode_err)?;
    let is_active: bool = row.try_get("is_active").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(Product {
        id: ProductId(id),
        sku,
        name,
        description,
        price: parse_decimal(&price)?,
        currency,
        category,
        stock_quantity,
        is_active,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

async fn fetch_product(
    conn: &mut sqlx::SqliteConnection,
    id: &ProductId,
) -> Result<Product, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, sku, name, description, price, currency, category, stock_quantity,
                is_active, created_at, updated_at
         FROM product WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(ref r) => row_to_product(r),
        None => Err(RepositoryError::NotFound(format!("no product with id `{id}`"))),
    }
}

async fn write_product(
    conn: &mut sqlx::SqliteConnection,
    product: &Product,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE product SET name = ?, description = ?, price = ?, category = ?,
                            stock_quantity = ?, is_active = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&product.name)
    .bind(&product.description)
    .bind(product.price.to_string())
    .bind(&product.category)
    .bind(product.stock_quantity)
    .bind(product.is_active)
    .bind(product.updated_at.to_rfc3339())
    .bind(&product.id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) fn check_new_product(product: &NewProduct) -> Result<(), RepositoryError> {
    if product.name.trim().is_empty() {
        return Err(RepositoryError::Rejected("product name cannot be empty".to_string()));
    }
    if product.sku.trim().is_empty() {
        return Err(RepositoryError::Rejected("product sku cannot be empty".to_string()));
    }
    if product.price < Decimal::ZERO {
        return Err(RepositoryError::Rejected("product price cannot be negative".to_string()));
    }
    if product.stock_quantity < 0 {
        return Err(RepositoryError::Rejected("stock quantity cannot be negative".to_string()));
    }
    Ok(())
}

pub(crate) fn check_update(update: &ProductUpdate) -> Result<(), RepositoryError> {
    if update.is_empty() {
        return Err(RepositoryError::Rejected(
            "no updatable fields given (name, description, price, category, is_active)"
                .to_string(),
        ));
    }
    if update.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        return Err(RepositoryError::Rejected("product name cannot be empty".to_string()));
    }
    if update.price.is_some_and(|price| price < Decimal::ZERO) {
        return Err(RepositoryError::Rejected("product price cannot be negative".to_string()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, sku, name, description, price, currency, category, stock_quantity,
                    is_active, created_at, updated_at
             FROM product WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, sku, name, description, price, currency, category, stock_quantity,
                    is_active, created_at, updated_at
             FROM product WHERE sku = ?",
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn resolve(&self, identifier: &str) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, sku, name, description, price, currency, category, stock_quantity,
                    is_active, created_at, updated_at
             FROM product WHERE id = ?1 OR sku = ?1
             ORDER BY (id = ?1) DESC
             LIMIT 1",
        )
        .bind(identifier.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn search(&self, query: &ProductQuery) -> Result<Vec<Product>, RepositoryError> {
        let pattern = query
            .text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| format!("%{}%", text.to_ascii_lowercase()));

        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, sku, name, description, price, currency, category, stock_quantity,
                    is_active, created_at, updated_at
             FROM product
             WHERE is_active = 1
               AND (?1 IS NULL OR lower(name) LIKE ?1 OR lower(description) LIKE ?1
                    OR lower(sku) LIKE ?1)
               AND (?2 IS NULL OR lower(category) = lower(?2))
               AND (?3 = 0 OR stock_quantity > 0)
             ORDER BY id",
        )
        .bind(pattern)
        .bind(query.category.as_deref())
        .bind(query.in_stock_only)
        .fetch_all(&self.pool)
        .await?;

        // Prices are stored as exact decimal text, so range filtering happens here.
        let products = rows.iter().map(row_to_product).collect::<Result<Vec<_>, _>>()?;
        Ok(products.into_iter().filter(|product| query.matches(product)).collect())
    }

    async fn low_stock(&self, threshold: i64) -> Result<Vec<Product>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, sku, name, description, price, currency, category, stock_quantity,
                    is_active, created_at, updated_at
             FROM product
             WHERE is_active = 1 AND stock_quantity <= ?
             ORDER BY stock_quantity ASC, id ASC",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_product).collect::<Result<Vec<_>, _>>()
    }

    async fn create(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        check_new_product(&product)?;
        let mut tx = self.pool.begin().await?;

        let taken: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM product WHERE sku = ?)")
            .bind(&product.sku)
            .fetch_one(&mut *tx)
            .await?;
        if taken == 1 {
            return Err(RepositoryError::Conflict(format!(
                "a product with sku `{}` already exists",
                product.sku
            )));
        }

        let id = next_id(&mut tx, EntityKind::Product).await?;
        let now = Utc::now();
        let created = Product {
            id: ProductId(id),
            sku: product.sku,
            name: product.name,
            description: product.description,
            price: product.price,
            currency: product.currency,
            category: product.category,
            stock_quantity: product.stock_quantity,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO product (id, sku, name, description, price, currency, category,
                                  stock_quantity, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&created.id.0)
        .bind(&created.sku)
        .bind(&created.name)
        .bind(&created.description)
        .bind(created.price.to_string())
        .bind(&created.currency)
        .bind(&created.category)
        .bind(created.stock_quantity)
        .bind(created.is_active)
        .bind(created.created_at.to_rfc3339())
        .bind(created.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn update(
        &self,
        id: &ProductId,
        update: &ProductUpdate,
    ) -> Result<Product, RepositoryError> {
        check_update(update)?;
        let mut tx = self.pool.begin().await?;

        let mut product = fetch_product(&mut tx, id).await?;
        update.apply_to(&mut product);
        product.updated_at = Utc::now();
        write_product(&mut tx, &product).await?;

        tx.commit().await?;
        Ok(product)
    }

    async fn adjust_stock(
        &self,
        id: &ProductId,
        operation: StockOperation,
        quantity: i64,
    ) -> Result<Product, RepositoryError> {
        if quantity < 0 {
            return Err(RepositoryError::Rejected("stock quantity cannot be negative".to_string()));
        }
        let mut tx = self.pool.begin().await?;

        let mut product = fetch_product(&mut tx, id).await?;
        product.stock_quantity = operation.apply(product.stock_quantity, quantity);
        product.updated_at = Utc::now();
        write_product(&mut tx, &product).await?;

        tx.commit().await?;
        Ok(product)
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM product").fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use shopdesk_core::domain::inventory::StockOperation;
    use shopdesk_core::domain::product::{NewProduct, ProductQuery, ProductUpdate};

    use super::SqlProductRepository;
    use crate::repositories::{ProductRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlProductRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlProductRepository::new(pool)
    }

    fn widget(sku: &str, price_cents: i64, stock: i64) -> NewProduct {
        NewProduct {
            sku: sku.to_string(),
            name: format!("Widget {sku}"),
            description: "A reliable widget".to_string(),
            price: Decimal::new(price_cents, 2),
            currency: "USD".to_string(),
            category: "Tools".to_string(),
            stock_quantity: stock,
        }
    }

    #[tokio::test]
    async fn create_allocates_sequential_ids() {
        let repo = repo().await;
        let first = repo.create(widget("WID-001", 999, 10)).await.expect("first");
        let second = repo.create(widget("WID-002", 1999, 0)).await.expect("second");

        assert_eq!(first.id.0, "prod_000001");
        assert_eq!(second.id.0, "prod_000002");
        assert_eq!(repo.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn duplicate_sku_is_a_conflict() {
        let repo = repo().await;
        repo.create(widget("WID-001", 999, 10)).await.expect("first");
        let error = repo.create(widget("WID-001", 500, 1)).await.expect_err("duplicate");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn resolve_accepts_id_or_sku() {
        let repo = repo().await;
        let created = repo.create(widget("WID-001", 999, 10)).await.expect("create");

        let by_sku = repo.resolve("WID-001").await.expect("resolve sku");
        let by_id = repo.resolve(&created.id.0).await.expect("resolve id");
        assert_eq!(by_sku.as_ref().map(|p| &p.id), Some(&created.id));
        assert_eq!(by_id.map(|p| p.sku), Some("WID-001".to_string()));
        assert_eq!(repo.resolve("NOPE-1").await.expect("resolve missing"), None);
    }

    #[tokio::test]
    async fn search_filters_price_range_exactly() {
        let repo = repo().await;
        repo.create(widget("WID-001", 999, 10)).await.expect("cheap");
        repo.create(widget("WID-002", 1000, 10)).await.expect("boundary");
        repo.create(widget("WID-003", 1001, 0)).await.expect("pricey");

        let query = ProductQuery {
            max_price: Some(Decimal::new(1000, 2)),
            ..ProductQuery::default()
        };
        let skus: Vec<String> =
            repo.search(&query).await.expect("search").into_iter().map(|p| p.sku).collect();
        assert_eq!(skus, vec!["WID-001".to_string(), "WID-002".to_string()]);

        let in_stock = ProductQuery { in_stock_only: true, ..ProductQuery::default() };
        assert_eq!(repo.search(&in_stock).await.expect("in stock").len(), 2);

        let text = ProductQuery { text: Some("wid-003".to_string()), ..ProductQuery::default() };
        assert_eq!(repo.search(&text).await.expect("text").len(), 1);
    }

    #[tokio::test]
    async fn stock_operations_and_low_stock_listing() {
        let repo = repo().await;
        let product = repo.create(widget("WID-001", 999, 12)).await.expect("create");

        let reduced = repo
            .adjust_stock(&product.id, StockOperation::Subtract, 5)
            .await
            .expect("subtract");
        assert_eq!(reduced.stock_quantity, 7);

        let floored = repo
            .adjust_stock(&product.id, StockOperation::Subtract, 50)
            .await
            .expect("floored subtract");
        assert_eq!(floored.stock_quantity, 0);

        let low = repo.low_stock(10).await.expect("low stock");
        assert_eq!(low.len(), 1);

        repo.adjust_stock(&product.id, StockOperation::Add, 11).await.expect("add");
        assert!(repo.low_stock(10).await.expect("low stock").is_empty());
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let repo = repo().await;
        let product = repo.create(widget("WID-001", 999, 12)).await.expect("create");

        let updated = repo
            .update(
                &product.id,
                &ProductUpdate { price: Some(Decimal::new(1499, 2)), ..ProductUpdate::default() },
            )
            .await
            .expect("update");
        assert_eq!(updated.price, Decimal::new(1499, 2));
        assert_eq!(updated.name, product.name);

        let empty = repo.update(&product.id, &ProductUpdate::default()).await;
        assert!(matches!(empty, Err(RepositoryError::Rejected(_))));
    }

    #[tokio::test]
    async fn missing_product_is_not_found() {
        let repo = repo().await;
        let missing = shopdesk_core::domain::product::ProductId("prod_000404".to_string());
        let error =
            repo.adjust_stock(&missing, StockOperation::Set, 1).await.expect_err("missing");
        assert!(matches!(error, RepositoryError::NotFound(_)));
    }
}
