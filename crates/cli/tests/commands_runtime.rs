use std::env;
use std::io::Cursor;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use shopdesk_cli::commands::{ask, chat, config, migrate, seed, start};

#[test]
fn start_returns_success_with_valid_env() {
    with_env(&[("SHOPDESK_DATABASE_URL", "sqlite::memory:")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("tools registered"));
    });
}

#[test]
fn start_returns_config_failure_for_invalid_bounds() {
    with_env(&[("SHOPDESK_PLANNER_MAX_PLAN_STEPS", "0")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn start_reports_unreachable_database() {
    with_env(&[("SHOPDESK_DATABASE_URL", "sqlite:///nonexistent-dir/for/shopdesk.db?mode=ro")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 4);
        assert_eq!(parse_payload(&result.output)["error_class"], "db_connectivity");
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("SHOPDESK_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SHOPDESK_DATABASE_URL", &url)], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_message = parse_payload(&first.output)["message"].as_str().unwrap_or_default().to_string();
        assert!(first_message.contains("11 product(s) and 5 customer(s) created"), "{first_message}");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_message = parse_payload(&second.output)["message"].as_str().unwrap_or_default().to_string();
        assert!(
            second_message.contains("0 product(s) and 0 customer(s) created, 11 product(s) and 5 customer(s) already present"),
            "{second_message}"
        );
    });
}

#[test]
fn config_attributes_env_overrides() {
    with_env(&[("SHOPDESK_DATABASE_URL", "sqlite::memory:"), ("SHOPDESK_LOG_LEVEL", "debug")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("- database.url = sqlite::memory: (source: env (SHOPDESK_DATABASE_URL))"));
        assert!(message.contains("- logging.level = debug (source: env (SHOPDESK_LOG_LEVEL))"));
        assert!(message.contains("- planner.max_plan_steps = 20 (source: default)"));
    });
}

#[test]
fn ask_answers_a_read_with_reply_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SHOPDESK_DATABASE_URL", &url)], || {
        assert_eq!(seed::run().exit_code, 0);

        let result = ask::run("list products", false);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let reply = parse_payload(first_line(&result.output));
        assert_eq!(reply["messages"][0]["type"], "tool_result");
        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "ask");
        assert!(payload["message"].as_str().unwrap_or_default().starts_with("Found 11 product(s)"));
    });
}

#[test]
fn ask_leaves_plans_unexecuted_without_yes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SHOPDESK_DATABASE_URL", &url)], || {
        let result = ask::run("create customer Ada Lovelace ada@example.com", false);
        assert_eq!(result.exit_code, 0);

        let reply = parse_payload(first_line(&result.output));
        assert_eq!(reply["messages"][0]["type"], "plan_preview");
        let payload = parse_payload(last_line(&result.output));
        assert!(payload["message"].as_str().unwrap_or_default().contains("rerun with --yes"));

        let lookup = ask::run("find customer ada@example.com", false);
        assert_eq!(lookup.exit_code, 0);
        let reply = parse_payload(first_line(&lookup.output));
        assert_eq!(reply["messages"][0]["type"], "clarification");
        assert_eq!(reply["messages"][0]["error_code"], "not_found");
    });
}

#[test]
fn ask_with_yes_executes_the_compound_plan() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SHOPDESK_DATABASE_URL", &url)], || {
        assert_eq!(seed::run().exit_code, 0);

        let result = ask::run("create a customer Jane Doe and order 2 units of WID-001 for her", true);
        assert_eq!(result.exit_code, 0, "{}", result.output);
        let payload = parse_payload(last_line(&result.output));
        assert!(payload["message"].as_str().unwrap_or_default().starts_with("Done: all 2 step(s) succeeded."));

        let failing = ask::run("create a customer Ann Lee and order 2 units of NOPE-404 for her", true);
        assert_eq!(failing.exit_code, 5);
        let payload = parse_payload(last_line(&failing.output));
        assert_eq!(payload["error_class"], "plan_incomplete");
    });
}

#[test]
fn chat_runs_one_turn_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SHOPDESK_DATABASE_URL", &url)], || {
        assert_eq!(seed::run().exit_code, 0);

        let input = Cursor::new("list products\n\nget product WID-001\nexit\nlist customers\n");
        let mut output = Vec::new();
        let result = chat::run_with(input, &mut output, Some("sess_term".to_string()));
        assert_eq!(result.exit_code, 0);

        let transcript = String::from_utf8(output).expect("utf8 transcript");
        assert!(transcript.starts_with("session sess_term"));
        assert!(transcript.contains("Found 11 product(s)"));
        assert!(transcript.contains("Blue Widget [WID-001]"));
        assert!(!transcript.contains("customer(s)"));
        let payload = parse_payload(&result.output);
        assert_eq!(payload["message"], "session sess_term ended after 2 turn(s)");
    });
}

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("shopdesk.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn first_line(output: &str) -> &str {
    output.lines().next().unwrap_or_default()
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "SHOPDESK_DATABASE_URL",
        "SHOPDESK_DATABASE_MAX_CONNECTIONS",
        "SHOPDESK_DATABASE_TIMEOUT_SECS",
        "SHOPDESK_SERVER_BIND_ADDRESS",
        "SHOPDESK_SERVER_PORT",
        "SHOPDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SHOPDESK_PLANNER_MAX_PLAN_STEPS",
        "SHOPDESK_PLANNER_MAX_BULK_QUANTITY",
        "SHOPDESK_PLANNER_CONFIRMATION_TTL_SECS",
        "SHOPDESK_PLANNER_MIN_CONFIDENCE",
        "SHOPDESK_EXECUTOR_MAX_RETRIES",
        "SHOPDESK_EXECUTOR_RETRY_BASE_DELAY_MS",
        "SHOPDESK_EXECUTOR_RETRY_MAX_DELAY_MS",
        "SHOPDESK_EXECUTOR_MAX_PARALLEL_STEPS",
        "SHOPDESK_SESSION_HISTORY_CAPACITY",
        "SHOPDESK_SESSION_REMEMBERED_PLANS",
        "SHOPDESK_INVENTORY_LOW_STOCK_THRESHOLD",
        "SHOPDESK_LOGGING_LEVEL",
        "SHOPDESK_LOGGING_FORMAT",
        "SHOPDESK_LOG_LEVEL",
        "SHOPDESK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
