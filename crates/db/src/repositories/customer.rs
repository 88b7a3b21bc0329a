use chrono::Utc;
use sqlx::Row;

use shopdesk_core::domain::customer::{Customer, CustomerId, NewCustomer};
use shopdesk_core::domain::EntityKind;

use super::{decode_err, next_id, parse_timestamp, CustomerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_customer(row: &sqlx::sqlite::SqliteRow) -> Result<Customer, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let email: String = row.try_get("email").map_err(decode_err)?;
    let first_name: String = row.try_get("first_name").map_err(decode_err)?;
    let last_name: String = row.try_get("last_name").map_err(decode_err)?;
    let phone: Option<String> = row.try_get("phone").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(Customer {
        id: CustomerId(id),
        email,
        first_name,
        last_name,
        phone,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub(crate) fn check_new_customer(customer: &NewCustomer) -> Result<(), RepositoryError> {
    let email = customer.email.trim();
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(RepositoryError::Rejected(format!("`{email}` is not a valid email address")));
    }
    if customer.first_name.trim().is_empty() || customer.last_name.trim().is_empty() {
        return Err(RepositoryError::Rejected(
            "customer first and last name are required".to_string(),
        ));
    }
    Ok(())
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, email, first_name, last_name, phone, created_at
             FROM customer WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_customer).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, email, first_name, last_name, phone, created_at
             FROM customer WHERE lower(email) = lower(?)",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_customer).transpose()
    }

    async fn search(&self, query: Option<&str>) -> Result<Vec<Customer>, RepositoryError> {
        let pattern = query
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| format!("%{}%", text.to_ascii_lowercase()));

        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, email, first_name, last_name, phone, created_at
             FROM customer
             WHERE ?1 IS NULL
                OR lower(email) LIKE ?1
                OR lower(first_name || ' ' || last_name) LIKE ?1
             ORDER BY id",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_customer).collect::<Result<Vec<_>, _>>()
    }

    async fn create(&self, customer: NewCustomer) -> Result<Customer, RepositoryError> {
        check_new_customer(&customer)?;
        let mut tx = self.pool.begin().await?;

        let taken: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM customer WHERE lower(email) = lower(?))",
        )
        .bind(customer.email.trim())
        .fetch_one(&mut *tx)
        .await?;
        if taken == 1 {
            return Err(RepositoryError::Conflict(format!(
                "a customer with email `{}` already exists",
                customer.email.trim()
            )));
        }

        let id = next_id(&mut tx, EntityKind::Customer).await?;
        let created = Customer {
            id: CustomerId(id),
            email: customer.email.trim().to_string(),
            first_name: customer.first_name.trim().to_string(),
            last_name: customer.last_name.trim().to_string(),
            phone: customer.phone,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO customer (id, email, first_name, last_name, phone, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&created.id.0)
        .bind(&created.email)
        .bind(&created.first_name)
        .bind(&created.last_name)
        .bind(&created.phone)
        .bind(created.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM customer").fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use shopdesk_core::domain::customer::NewCustomer;

    use super::SqlCustomerRepository;
    use crate::repositories::{CustomerRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlCustomerRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlCustomerRepository::new(pool)
    }

    fn jane() -> NewCustomer {
        NewCustomer {
            email: "jane.doe@example.com".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            phone: None,
        }
    }

    #[tokio::test]
    async fn create_then_find_by_email_case_insensitively() {
        let repo = repo().await;
        let created = repo.create(jane()).await.expect("create");
        assert_eq!(created.id.0, "cust_000001");

        let found = repo.find_by_email("JANE.DOE@example.com").await.expect("find");
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let repo = repo().await;
        repo.create(jane()).await.expect("create");
        let error = repo.create(jane()).await.expect_err("duplicate");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn search_matches_full_name() {
        let repo = repo().await;
        repo.create(jane()).await.expect("create");
        assert_eq!(repo.search(Some("jane doe")).await.expect("search").len(), 1);
        assert_eq!(repo.search(Some("john")).await.expect("search").len(), 0);
        assert_eq!(repo.search(None).await.expect("search all").len(), 1);
    }

    #[tokio::test]
    async fn malformed_email_is_rejected() {
        let repo = repo().await;
        let error = repo
            .create(NewCustomer { email: "jane".to_string(), ..jane() })
            .await
            .expect_err("bad email");
        assert!(matches!(error, RepositoryError::Rejected(_)));
    }
}
