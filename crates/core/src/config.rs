use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub session: SessionConfig,
    pub inventory: InventoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PlannerConfig {
    pub max_plan_steps: usize,
    pub max_bulk_quantity: u32,
    pub confirmation_ttl_secs: u64,
    pub min_confidence: u8,
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_parallel_steps: usize,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub history_capacity: usize,
    pub remembered_plans: usize,
}

#[derive(Clone, Debug)]
pub struct InventoryConfig {
    pub low_stock_threshold: i64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub max_plan_steps: Option<usize>,
    pub max_parallel_steps: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://shopdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            planner: PlannerConfig {
                max_plan_steps: 20,
                max_bulk_quantity: 10,
                confirmation_ttl_secs: 300,
                min_confidence: 60,
            },
            executor: ExecutorConfig {
                max_retries: 2,
                retry_base_delay_ms: 100,
                retry_max_delay_ms: 2_000,
                max_parallel_steps: 4,
            },
            session: SessionConfig { history_capacity: 20, remembered_plans: 8 },
            inventory: InventoryConfig { low_stock_threshold: 10 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("shopdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(planner) = patch.planner {
            if let Some(max_plan_steps) = planner.max_plan_steps {
                self.planner.max_plan_steps = max_plan_steps;
            }
            if let Some(max_bulk_quantity) = planner.max_bulk_quantity {
                self.planner.max_bulk_quantity = max_bulk_quantity;
            }
            if let Some(confirmation_ttl_secs) = planner.confirmation_ttl_secs {
                self.planner.confirmation_ttl_secs = confirmation_ttl_secs;
            }
            if let Some(min_confidence) = planner.min_confidence {
                self.planner.min_confidence = min_confidence;
            }
        }

        if let Some(executor) = patch.executor {
            if let Some(max_retries) = executor.max_retries {
                self.executor.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = executor.retry_base_delay_ms {
                self.executor.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_max_delay_ms) = executor.retry_max_delay_ms {
                self.executor.retry_max_delay_ms = retry_max_delay_ms;
            }
            if let Some(max_parallel_steps) = executor.max_parallel_steps {
                self.executor.max_parallel_steps = max_parallel_steps;
            }
        }

        if let Some(session) = patch.session {
            if let Some(history_capacity) = session.history_capacity {
                self.session.history_capacity = history_capacity;
            }
            if let Some(remembered_plans) = session.remembered_plans {
                self.session.remembered_plans = remembered_plans;
            }
        }

        if let Some(inventory) = patch.inventory {
            if let Some(low_stock_threshold) = inventory.low_stock_threshold {
                self.inventory.low_stock_threshold = low_stock_threshold;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SHOPDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SHOPDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("SHOPDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SHOPDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("SHOPDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SHOPDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SHOPDESK_SERVER_PORT") {
            self.server.port = parse_env("SHOPDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SHOPDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("SHOPDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SHOPDESK_PLANNER_MAX_PLAN_STEPS") {
            self.planner.max_plan_steps = parse_env("SHOPDESK_PLANNER_MAX_PLAN_STEPS", &value)?;
        }
        if let Some(value) = read_env("SHOPDESK_PLANNER_MAX_BULK_QUANTITY") {
            self.planner.max_bulk_quantity =
                parse_env("SHOPDESK_PLANNER_MAX_BULK_QUANTITY", &value)?;
        }
        if let Some(value) = read_env("SHOPDESK_PLANNER_CONFIRMATION_TTL_SECS") {
            self.planner.confirmation_ttl_secs =
                parse_env("SHOPDESK_PLANNER_CONFIRMATION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("SHOPDESK_PLANNER_MIN_CONFIDENCE") {
            self.planner.min_confidence = parse_env("SHOPDESK_PLANNER_MIN_CONFIDENCE", &value)?;
        }

        if let Some(value) = read_env("SHOPDESK_EXECUTOR_MAX_RETRIES") {
            self.executor.max_retries = parse_env("SHOPDESK_EXECUTOR_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("SHOPDESK_EXECUTOR_RETRY_BASE_DELAY_MS") {
            self.executor.retry_base_delay_ms =
                parse_env("SHOPDESK_EXECUTOR_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SHOPDESK_EXECUTOR_RETRY_MAX_DELAY_MS") {
            self.executor.retry_max_delay_ms =
                parse_env("SHOPDESK_EXECUTOR_RETRY_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SHOPDESK_EXECUTOR_MAX_PARALLEL_STEPS") {
            self.executor.max_parallel_steps =
                parse_env("SHOPDESK_EXECUTOR_MAX_PARALLEL_STEPS", &value)?;
        }

        if let Some(value) = read_env("SHOPDESK_SESSION_HISTORY_CAPACITY") {
            self.session.history_capacity =
                parse_env("SHOPDESK_SESSION_HISTORY_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("SHOPDESK_SESSION_REMEMBERED_PLANS") {
            self.session.remembered_plans =
                parse_env("SHOPDESK_SESSION_REMEMBERED_PLANS", &value)?;
        }

        if let Some(value) = read_env("SHOPDESK_INVENTORY_LOW_STOCK_THRESHOLD") {
            self.inventory.low_stock_threshold =
                parse_env("SHOPDESK_INVENTORY_LOW_STOCK_THRESHOLD", &value)?;
        }

        let log_level =
            read_env("SHOPDESK_LOGGING_LEVEL").or_else(|| read_env("SHOPDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SHOPDESK_LOGGING_FORMAT").or_else(|| read_env("SHOPDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(max_plan_steps) = overrides.max_plan_steps {
            self.planner.max_plan_steps = max_plan_steps;
        }
        if let Some(max_parallel_steps) = overrides.max_parallel_steps {
            self.executor.max_parallel_steps = max_parallel_steps;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_planner(&self.planner)?;
        validate_executor(&self.executor)?;
        validate_session(&self.session)?;
        validate_inventory(&self.inventory)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("shopdesk.toml"), PathBuf::from("config/shopdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_planner(planner: &PlannerConfig) -> Result<(), ConfigError> {
    if planner.max_plan_steps == 0 || planner.max_plan_steps > 100 {
        return Err(ConfigError::Validation(
            "planner.max_plan_steps must be in range 1..=100".to_string(),
        ));
    }

    if planner.max_bulk_quantity == 0 {
        return Err(ConfigError::Validation(
            "planner.max_bulk_quantity must be greater than zero".to_string(),
        ));
    }

    if planner.max_bulk_quantity as usize > planner.max_plan_steps {
        return Err(ConfigError::Validation(format!(
            "planner.max_bulk_quantity ({}) cannot exceed planner.max_plan_steps ({})",
            planner.max_bulk_quantity, planner.max_plan_steps
        )));
    }

    if planner.confirmation_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "planner.confirmation_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if planner.min_confidence > 100 {
        return Err(ConfigError::Validation(
            "planner.min_confidence must be in range 0..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_executor(executor: &ExecutorConfig) -> Result<(), ConfigError> {
    if executor.max_retries > 10 {
        return Err(ConfigError::Validation(
            "executor.max_retries must be in range 0..=10".to_string(),
        ));
    }

    if executor.retry_base_delay_ms > executor.retry_max_delay_ms {
        return Err(ConfigError::Validation(
            "executor.retry_base_delay_ms cannot exceed executor.retry_max_delay_ms".to_string(),
        ));
    }

    if executor.max_parallel_steps == 0 {
        return Err(ConfigError::Validation(
            "executor.max_parallel_steps must be greater than zero (1 runs steps sequentially)"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.history_capacity == 0 {
        return Err(ConfigError::Validation(
            "session.history_capacity must be greater than zero".to_string(),
        ));
    }

    if session.remembered_plans == 0 {
        return Err(ConfigError::Validation(
            "session.remembered_plans must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_inventory(inventory: &InventoryConfig) -> Result<(), ConfigError> {
    if inventory.low_stock_threshold < 0 {
        return Err(ConfigError::Validation(
            "inventory.low_stock_threshold cannot be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    planner: Option<PlannerPatch>,
    executor: Option<ExecutorPatch>,
    session: Option<SessionPatch>,
    inventory: Option<InventoryPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlannerPatch {
    max_plan_steps: Option<usize>,
    max_bulk_quantity: Option<u32>,
    confirmation_ttl_secs: Option<u64>,
    min_confidence: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutorPatch {
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    max_parallel_steps: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    history_capacity: Option<usize>,
    remembered_plans: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryPatch {
    low_stock_threshold: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_and_conservative() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| format!("defaults should validate: {err}"))?;
        ensure(config.planner.max_plan_steps == 20, "default plan size bound should be 20")?;
        ensure(
            config.planner.confirmation_ttl_secs == 300,
            "default confirmation expiry should be five minutes",
        )?;
        ensure(config.executor.max_retries == 2, "default retry bound should be 2")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "default format is compact")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_SHOPDESK_DB_PATH", "from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("shopdesk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_SHOPDESK_DB_PATH}"

[planner]
max_plan_steps = 12
max_bulk_quantity = 6
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-env.db",
                "database url should be interpolated from environment",
            )?;
            ensure(config.planner.max_plan_steps == 12, "planner bound should come from file")?;
            ensure(config.planner.max_bulk_quantity == 6, "bulk bound should come from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_SHOPDESK_DB_PATH"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SHOPDESK_LOG_LEVEL", "warn");
        env::set_var("SHOPDESK_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["SHOPDESK_LOG_LEVEL", "SHOPDESK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SHOPDESK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("SHOPDESK_EXECUTOR_MAX_RETRIES", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("shopdesk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[executor]
max_retries = 1
max_parallel_steps = 2

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.executor.max_retries == 4, "env retries should win over file")?;
            ensure(
                config.executor.max_parallel_steps == 2,
                "file parallelism should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["SHOPDESK_DATABASE_URL", "SHOPDESK_EXECUTOR_MAX_RETRIES"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SHOPDESK_EXECUTOR_MAX_PARALLEL_STEPS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("executor.max_parallel_steps")
            );
            ensure(has_message, "validation failure should mention executor.max_parallel_steps")
        })();

        clear_vars(&["SHOPDESK_EXECUTOR_MAX_PARALLEL_STEPS"]);
        result
    }

    #[test]
    fn malformed_env_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SHOPDESK_PLANNER_MAX_PLAN_STEPS", "many");

        let result = (|| -> Result<(), String> {
            match AppConfig::load(LoadOptions::default()) {
                Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                    key == "SHOPDESK_PLANNER_MAX_PLAN_STEPS",
                    "error should name the offending variable",
                ),
                Err(other) => Err(format!("unexpected error: {other}")),
                Ok(_) => Err("expected malformed override to fail".to_string()),
            }
        })();

        clear_vars(&["SHOPDESK_PLANNER_MAX_PLAN_STEPS"]);
        result
    }

    #[test]
    fn bulk_bound_cannot_exceed_plan_bound() {
        let mut config = AppConfig::default();
        config.planner.max_plan_steps = 5;
        config.planner.max_bulk_quantity = 6;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(ref message)) if message.contains("max_bulk_quantity")
        ));
    }
}
