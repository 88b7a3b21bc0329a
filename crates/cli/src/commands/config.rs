use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use shopdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let fields = vec![
        field("database.url", config.database.url.clone(), &["SHOPDESK_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SHOPDESK_DATABASE_MAX_CONNECTIONS"],
        ),
        field("database.timeout_secs", config.database.timeout_secs.to_string(), &["SHOPDESK_DATABASE_TIMEOUT_SECS"]),
        field("server.bind_address", config.server.bind_address.clone(), &["SHOPDESK_SERVER_BIND_ADDRESS"]),
        field("server.port", config.server.port.to_string(), &["SHOPDESK_SERVER_PORT"]),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["SHOPDESK_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field("planner.max_plan_steps", config.planner.max_plan_steps.to_string(), &["SHOPDESK_PLANNER_MAX_PLAN_STEPS"]),
        field(
            "planner.max_bulk_quantity",
            config.planner.max_bulk_quantity.to_string(),
            &["SHOPDESK_PLANNER_MAX_BULK_QUANTITY"],
        ),
        field(
            "planner.confirmation_ttl_secs",
            config.planner.confirmation_ttl_secs.to_string(),
            &["SHOPDESK_PLANNER_CONFIRMATION_TTL_SECS"],
        ),
        field("planner.min_confidence", config.planner.min_confidence.to_string(), &["SHOPDESK_PLANNER_MIN_CONFIDENCE"]),
        field("executor.max_retries", config.executor.max_retries.to_string(), &["SHOPDESK_EXECUTOR_MAX_RETRIES"]),
        field(
            "executor.retry_base_delay_ms",
            config.executor.retry_base_delay_ms.to_string(),
            &["SHOPDESK_EXECUTOR_RETRY_BASE_DELAY_MS"],
        ),
        field(
            "executor.retry_max_delay_ms",
            config.executor.retry_max_delay_ms.to_string(),
            &["SHOPDESK_EXECUTOR_RETRY_MAX_DELAY_MS"],
        ),
        field(
            "executor.max_parallel_steps",
            config.executor.max_parallel_steps.to_string(),
            &["SHOPDESK_EXECUTOR_MAX_PARALLEL_STEPS"],
        ),
        field(
            "session.history_capacity",
            config.session.history_capacity.to_string(),
            &["SHOPDESK_SESSION_HISTORY_CAPACITY"],
        ),
        field(
            "session.remembered_plans",
            config.session.remembered_plans.to_string(),
            &["SHOPDESK_SESSION_REMEMBERED_PLANS"],
        ),
        field(
            "inventory.low_stock_threshold",
            config.inventory.low_stock_threshold.to_string(),
            &["SHOPDESK_INVENTORY_LOW_STOCK_THRESHOLD"],
        ),
        field("logging.level", config.logging.level.clone(), &["SHOPDESK_LOGGING_LEVEL", "SHOPDESK_LOG_LEVEL"]),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["SHOPDESK_LOGGING_FORMAT", "SHOPDESK_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| render_line(field.key, &field.value, source(field.key, field.env_keys))));

    CommandResult::success("config", lines.join("\n"))
}

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    Field { key, value, env_keys }
}

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("shopdesk.toml"), PathBuf::from("config/shopdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn file_keys_are_attributed_to_the_file() {
        let doc: Value = "[planner]\nmax_plan_steps = 12\n".parse().expect("toml");

        assert!(contains_path(&doc, "planner.max_plan_steps"));
        assert!(!contains_path(&doc, "planner.min_confidence"));
        assert_eq!(
            field_source(
                "planner.max_plan_steps",
                &["SHOPDESK_TEST_UNSET_KEY"],
                Some(&doc),
                Some(Path::new("shopdesk.toml"))
            ),
            "file (shopdesk.toml)"
        );
        assert_eq!(
            field_source("planner.min_confidence", &["SHOPDESK_TEST_UNSET_KEY"], Some(&doc), None),
            "default"
        );
    }
}
