use std::sync::Arc;

use shopdesk_agent::AgentRuntime;
use shopdesk_core::config::{AppConfig, ConfigError};
use shopdesk_core::tools::{RegistryError, ToolRegistry};
use shopdesk_db::{connect_with_settings, migrations, DbPool, EntityStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("tool registry is invalid: {0}")]
    Registry(#[from] RegistryError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let threshold = config.inventory.low_stock_threshold;
    let registry = Arc::new(ToolRegistry::shop(threshold)?);
    let store = Arc::new(EntityStore::sql(db_pool.clone(), registry.clone(), threshold));
    let runtime = Arc::new(AgentRuntime::new(registry, store, &config));
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        tools = runtime.registry().len(),
        "agent runtime initialized"
    );

    Ok(Application { config, db_pool, runtime })
}

#[cfg(test)]
mod tests {
    use shopdesk_core::config::AppConfig;

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(database_url: &str) -> Result<Application, BootstrapError> {
        let mut config = AppConfig::default();
        config.database.url = database_url.to_string();
        bootstrap_with_config(config).await
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_serves_a_turn() {
        let app = bootstrap("sqlite::memory:").await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('product', 'customer', 'customer_order', 'order_item')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected shop tables after bootstrap");
        assert_eq!(table_count, 4);

        let reply = app.runtime.handle_message("sess_boot", "list products").await.expect("reply");
        assert_eq!(reply.text(), "No products found.");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_unreachable_database() {
        let result = bootstrap("sqlite:///nonexistent-dir/for/shopdesk.db?mode=ro").await;

        assert!(matches!(result, Err(BootstrapError::DatabaseConnect(_))));
    }
}
