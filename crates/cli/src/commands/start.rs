use shopdesk_core::tools::ToolRegistry;
use shopdesk_db::connect_with_settings;

use crate::commands::{prepare, CommandResult, Failure};

/// Preflight: configuration, database reachability, and the tool catalogue.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("start") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let registry = match ToolRegistry::shop(config.inventory.low_stock_threshold) {
        Ok(registry) => registry,
        Err(error) => return CommandResult::failure("start", "runtime_init", error.to_string(), 3),
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        pool.close().await;
        Ok::<(), Failure>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "start",
            format!(
                "preflight passed: database reachable, {} tools registered, listening on {}:{} when served",
                registry.len(),
                config.server.bind_address,
                config.server.port
            ),
        ),
        Err(failure) => CommandResult::from_failure("start", failure),
    }
}
