pub mod ask;
pub mod chat;
pub mod config;
pub mod migrate;
pub mod seed;
pub mod start;

use std::sync::Arc;

use serde::Serialize;
use shopdesk_agent::AgentRuntime;
use shopdesk_core::config::{AppConfig, LoadOptions};
use shopdesk_core::tools::ToolRegistry;
use shopdesk_db::{connect_with_settings, migrations, DbPool, EntityStore};
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

/// `(error_class, message, exit_code)` of a failed step.
pub(crate) type Failure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Prefixes free-form lines ahead of the JSON outcome, which stays the last line.
    pub fn with_preamble(mut self, lines: &[String]) -> Self {
        if !lines.is_empty() {
            self.output = format!("{}\n{}", lines.join("\n"), self.output);
        }
        self
    }

    fn from_failure(command: &str, (error_class, message, exit_code): Failure) -> Self {
        Self::failure(command, error_class, message, exit_code)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Loads configuration and a current-thread runtime, the preamble every command shares.
pub(crate) fn prepare(command: &str) -> Result<(AppConfig, Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })?;

    Ok((config, runtime))
}

pub(crate) async fn connect_and_migrate(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

/// Agent runtime over the configured database, as the server builds it.
pub(crate) async fn agent_runtime(config: &AppConfig) -> Result<(DbPool, AgentRuntime), Failure> {
    let pool = connect_and_migrate(config).await?;
    let threshold = config.inventory.low_stock_threshold;
    let registry = Arc::new(
        ToolRegistry::shop(threshold).map_err(|error| ("runtime_init", error.to_string(), 3u8))?,
    );
    let store = Arc::new(EntityStore::sql(pool.clone(), registry.clone(), threshold));
    Ok((pool, AgentRuntime::new(registry, store, config)))
}
