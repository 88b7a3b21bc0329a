use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Duration, Utc};
use tracing::{info, warn};

use shopdesk_core::config::AppConfig;
use shopdesk_core::errors::{ApplicationError, ErrorKind, TurnError};
use shopdesk_core::plan::{Plan, PlanStatus};
use shopdesk_core::tools::{ToolInvoker, ToolRegistry};

use crate::executor::{CancelHandle, StepExecutor};
use crate::intent::{Intent, IntentRecognizer};
use crate::planner::PlanBuilder;
use crate::reply::{Reply, ReplyMessage};
use crate::session::{SessionContext, SessionStore};

const HELP: &str = "I can look up and change products, customers, orders, and stock. Examples:
  list products | show customers | low stock 5
  get product WID-001 | find customer jane.smith@example.com
  create customer Jane Doe jane@example.com
  create product \"Desk Lamp\" 24.50 LMP-001
  order 2 WID-001 for cust_000001 | mark order order_000001 as shipped
  create a customer Jane Doe and order 2 units of WID-001 for her
  restock low stock products by 15 | set up a demo store with 5 products
Plans with more than one step, or that change data, wait for `yes` or `no`.";

const AFFIRMATIVE: &[&str] = &["yes", "y", "ok", "okay", "confirm", "proceed", "go ahead", "yes please", "do it"];
const NEGATIVE: &[&str] = &["no", "n", "cancel", "abort", "stop", "discard", "never mind"];

/// Turn orchestration: recognition, the confirmation gate, and execution for every session.
pub struct AgentRuntime {
    registry: Arc<ToolRegistry>,
    recognizer: IntentRecognizer,
    planner: PlanBuilder,
    executor: StepExecutor,
    sessions: SessionStore,
    executing: ExecutingPlans,
    confirmation_ttl_secs: u64,
}

type ExecutingPlans = Mutex<HashMap<String, CancelHandle>>;

fn lock(plans: &ExecutingPlans) -> MutexGuard<'_, HashMap<String, CancelHandle>> {
    plans.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registers a session's cancel handle for as long as its plan executes, including when the
/// turn is dropped mid-step.
struct Executing<'a> {
    plans: &'a ExecutingPlans,
    session_id: String,
    handle: CancelHandle,
}

impl<'a> Executing<'a> {
    fn register(plans: &'a ExecutingPlans, session_id: &str) -> Self {
        let handle = CancelHandle::default();
        lock(plans).insert(session_id.to_string(), handle.clone());
        Self { plans, session_id: session_id.to_string(), handle }
    }
}

impl Drop for Executing<'_> {
    fn drop(&mut self) {
        let mut plans = lock(self.plans);
        if plans.get(&self.session_id).is_some_and(|current| current.same_as(&self.handle)) {
            plans.remove(&self.session_id);
        }
    }
}

impl AgentRuntime {
    pub fn new(registry: Arc<ToolRegistry>, invoker: Arc<dyn ToolInvoker>, config: &AppConfig) -> Self {
        Self {
            recognizer: IntentRecognizer::new(config.planner.min_confidence),
            planner: PlanBuilder::new(registry.clone(), config.planner.clone()),
            executor: StepExecutor::from_config(invoker, registry.clone(), &config.executor),
            sessions: SessionStore::new(config.session.clone()),
            executing: Mutex::new(HashMap::new()),
            confirmation_ttl_secs: config.planner.confirmation_ttl_secs,
            registry,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn open_session(&self, requested: Option<&str>) -> String {
        self.sessions.open(requested).await.0
    }

    /// Destroys the session. A plan still executing for it stops after its in-flight steps.
    pub async fn close_session(&self, session_id: &str) -> bool {
        self.cancel(session_id).await;
        self.sessions.close(session_id).await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    /// Requests cancellation of the plan currently executing for the session, if any.
    pub async fn cancel(&self, session_id: &str) -> bool {
        match lock(&self.executing).get(session_id) {
            Some(handle) => {
                handle.cancel();
                info!(event_name = "agent.plan.cancel_requested", session_id = %session_id);
                true
            }
            None => false,
        }
    }

    /// Handles one user utterance. The session is created on first use.
    pub async fn handle_message(&self, session_id: &str, text: &str) -> Result<Reply, ApplicationError> {
        let (session_id, session) = self.sessions.open(Some(session_id)).await;
        let mut context = session.lock().await;
        let mut messages = self.expire(&mut context);

        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("help") || trimmed == "?" {
            messages.push(ReplyMessage::text(HELP));
        } else if let Some((approve, plan_id)) = parse_confirmation(trimmed) {
            messages.extend(self.confirm(&mut context, plan_id.as_deref(), approve).await?);
        } else {
            messages.extend(self.respond(&mut context, trimmed).await?);
        }

        let reply = Reply::new(session_id, messages);
        context.record_exchange(text, reply.text());
        Ok(reply)
    }

    /// Explicit approval or rejection of a specific plan.
    pub async fn handle_confirmation(
        &self,
        session_id: &str,
        plan_id: &str,
        approve: bool,
    ) -> Result<Reply, ApplicationError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| ApplicationError::UnknownSession(session_id.to_string()))?;
        let mut context = session.lock().await;
        let mut messages = self.expire(&mut context);
        messages.extend(self.confirm(&mut context, Some(plan_id), approve).await?);

        let reply = Reply::new(session_id, messages);
        let input = format!("{} {plan_id}", if approve { "yes" } else { "no" });
        context.record_exchange(input, reply.text());
        Ok(reply)
    }

    fn expire(&self, context: &mut SessionContext) -> Vec<ReplyMessage> {
        let ttl = Duration::seconds(i64::try_from(self.confirmation_ttl_secs).unwrap_or(i64::MAX));
        match context.expire_pending(Utc::now(), ttl) {
            Some(expired) => {
                info!(event_name = "agent.plan.expired", session_id = %context.id(), plan_id = %expired.id);
                vec![ReplyMessage::text(format!(
                    "Plan {} expired before it was confirmed and has been discarded.",
                    expired.id
                ))]
            }
            None => Vec::new(),
        }
    }

    async fn respond(
        &self,
        context: &mut SessionContext,
        text: &str,
    ) -> Result<Vec<ReplyMessage>, ApplicationError> {
        let intent = match self.recognizer.recognize(text, context) {
            Ok(intent) => intent,
            Err(error) => return Ok(vec![self.turn_failed(context, &error)]),
        };

        match intent {
            Intent::Unrecognized { hint } => Ok(vec![ReplyMessage::Clarification {
                error_code: ErrorKind::Unrecognized.code().to_string(),
                text: hint,
            }]),
            Intent::DirectCall { tool, arguments } => {
                let Some(spec) = self.registry.get(&tool) else {
                    let error = TurnError::PlanningFailed(format!("unknown tool `{tool}`"));
                    return Ok(vec![self.turn_failed(context, &error)]);
                };
                if spec.is_mutating() {
                    return match self.planner.single_call(text, &tool, &arguments) {
                        Ok(plan) => self.gate(context, plan).await,
                        Err(error) => Ok(vec![self.turn_failed(context, &error)]),
                    };
                }
                match self.executor.run_direct(&tool, &arguments, context).await {
                    Ok(data) => Ok(vec![ReplyMessage::tool_result(spec, data)]),
                    Err(error) => {
                        warn!(
                            event_name = "agent.tool.failed",
                            session_id = %context.id(),
                            tool = %tool,
                            error_code = error.kind().code(),
                            "{}",
                            error.message()
                        );
                        Ok(vec![ReplyMessage::tool_failure(&tool, &error)])
                    }
                }
            }
            Intent::PlanRequest(goal) => match self.planner.build(&goal, context) {
                Ok(plan) => self.gate(context, plan).await,
                Err(error) => Ok(vec![self.turn_failed(context, &error)]),
            },
        }
    }

    /// Runs plans that need no confirmation; parks the rest as the session's pending plan.
    async fn gate(&self, context: &mut SessionContext, plan: Plan) -> Result<Vec<ReplyMessage>, ApplicationError> {
        if !plan.needs_confirmation() {
            return self.run(context, plan).await;
        }

        let mut messages = Vec::new();
        let preview = ReplyMessage::preview(&plan, self.confirmation_ttl_secs);
        info!(
            event_name = "agent.plan.awaiting_confirmation",
            session_id = %context.id(),
            plan_id = %plan.id,
            steps = plan.steps.len(),
        );
        if let Some(superseded) = context.set_pending_plan(plan, Utc::now()) {
            info!(event_name = "agent.plan.superseded", session_id = %context.id(), plan_id = %superseded.id);
            messages.push(ReplyMessage::text(format!(
                "Discarded plan {} that was still waiting for confirmation.",
                superseded.id
            )));
        }
        messages.push(preview);
        Ok(messages)
    }

    async fn confirm(
        &self,
        context: &mut SessionContext,
        plan_id: Option<&str>,
        approve: bool,
    ) -> Result<Vec<ReplyMessage>, ApplicationError> {
        let matches_pending = context
            .pending_plan()
            .is_some_and(|pending| plan_id.map_or(true, |requested| pending.id.0 == requested));

        if matches_pending {
            let Some(mut plan) = context.clear_pending_plan() else {
                return Ok(vec![ReplyMessage::text("There is nothing awaiting confirmation.")]);
            };
            if !approve {
                plan.transition_to(PlanStatus::Aborted)?;
                context.record_finished(plan.id.clone(), PlanStatus::Aborted);
                info!(event_name = "agent.plan.declined", session_id = %context.id(), plan_id = %plan.id);
                return Ok(vec![ReplyMessage::text(format!("Discarded plan {}. Nothing was changed.", plan.id))]);
            }
            plan.confirm()?;
            return self.run(context, plan).await;
        }

        let notice = match plan_id {
            Some(requested) => match context.finished_status(requested) {
                Some(status) => format!(
                    "Plan {requested} has already finished ({}); nothing was run again.",
                    status.as_str()
                ),
                None => format!("Plan {requested} is no longer active, so that reply was ignored."),
            },
            None => "There is nothing awaiting confirmation.".to_string(),
        };
        Ok(vec![ReplyMessage::text(notice)])
    }

    async fn run(&self, context: &mut SessionContext, mut plan: Plan) -> Result<Vec<ReplyMessage>, ApplicationError> {
        let executing = Executing::register(&self.executing, context.id());
        let outcome = self.executor.execute(&mut plan, context, &executing.handle).await;
        drop(executing);

        let status = outcome?;
        context.record_finished(plan.id.clone(), status);
        Ok(vec![ReplyMessage::outcome(&plan)])
    }

    fn turn_failed(&self, context: &SessionContext, error: &TurnError) -> ReplyMessage {
        info!(
            event_name = "agent.turn.failed",
            session_id = %context.id(),
            error_code = error.kind().code(),
            "{error}"
        );
        ReplyMessage::clarification(error)
    }
}

/// Reads `yes`, `no plan_…`, `go ahead`, and similar replies. Anything else is a new request.
pub fn parse_confirmation(text: &str) -> Option<(bool, Option<String>)> {
    let mut plan_id = None;
    let mut words = Vec::new();
    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|ch: char| matches!(ch, '.' | ',' | '!' | '?'));
        if word.starts_with("plan_") {
            plan_id = Some(word.to_string());
        } else if !word.is_empty() {
            words.push(word.to_ascii_lowercase());
        }
    }
    let phrase = words.join(" ");
    if AFFIRMATIVE.contains(&phrase.as_str()) {
        return Some((true, plan_id));
    }
    if NEGATIVE.contains(&phrase.as_str()) {
        return Some((false, plan_id));
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use shopdesk_core::config::AppConfig;
    use shopdesk_core::errors::{ApplicationError, ToolError};
    use shopdesk_core::tools::ToolRegistry;

    use super::{parse_confirmation, AgentRuntime};
    use crate::reply::ReplyMessage;
    use crate::testing::ScriptedInvoker;

    fn runtime(invoker: Arc<ScriptedInvoker>) -> AgentRuntime {
        let mut config = AppConfig::default();
        config.executor.retry_base_delay_ms = 0;
        config.executor.retry_max_delay_ms = 0;
        let registry = Arc::new(ToolRegistry::shop(config.inventory.low_stock_threshold).expect("registry"));
        AgentRuntime::new(registry, invoker, &config)
    }

    fn preview_id(messages: &[ReplyMessage]) -> String {
        messages
            .iter()
            .find_map(|message| match message {
                ReplyMessage::PlanPreview { plan_id, .. } => Some(plan_id.clone()),
                _ => None,
            })
            .expect("a plan preview")
    }

    #[test]
    fn confirmation_phrases() {
        assert_eq!(parse_confirmation("yes"), Some((true, None)));
        assert_eq!(parse_confirmation("Go ahead!"), Some((true, None)));
        assert_eq!(parse_confirmation("no plan_abc"), Some((false, Some("plan_abc".to_string()))));
        assert_eq!(parse_confirmation("cancel order order_000001"), None);
    }

    #[tokio::test]
    async fn read_only_request_runs_without_a_plan() {
        let invoker = Arc::new(ScriptedInvoker::default());
        invoker.script("search_products", vec![Ok(json!([{"id": "prod_000001", "name": "Laptop Pro 15"}]))]).await;
        let runtime = runtime(invoker.clone());

        let reply = runtime.handle_message("sess_a", "list products").await.expect("reply");

        let calls = invoker.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "search_products");
        assert!(calls[0].1.is_empty());
        assert!(matches!(reply.messages.as_slice(), [ReplyMessage::ToolResult { .. }]));
    }

    #[tokio::test]
    async fn compound_goal_waits_for_confirmation_then_runs_in_order() {
        let invoker = Arc::new(ScriptedInvoker::default());
        invoker.script("create_customer", vec![Ok(json!({"id": "cust_000006"}))]).await;
        invoker.script("create_order", vec![Ok(json!({"id": "order_000001", "status": "pending"}))]).await;
        let runtime = runtime(invoker.clone());

        let preview = runtime
            .handle_message("sess_a", "create a customer Jane Doe and order 2 units of product SKU WID-001 for her")
            .await
            .expect("preview");
        assert!(invoker.calls().await.is_empty());
        let plan_id = preview_id(&preview.messages);

        let result = runtime.handle_message("sess_a", "yes").await.expect("result");
        let calls = invoker.calls().await;
        assert_eq!(calls.iter().map(|(tool, _)| tool.as_str()).collect::<Vec<_>>(), vec!["create_customer", "create_order"]);
        assert_eq!(calls[1].1["customer_id"], json!("cust_000006"));
        assert_eq!(calls[1].1["items"], json!([{"sku": "WID-001", "quantity": 2}]));
        let ReplyMessage::PlanResult { plan_id: finished, status, .. } = &result.messages[0] else {
            panic!("expected a plan result, got {:?}", result.messages);
        };
        assert_eq!(finished, &plan_id);
        assert_eq!(status.as_str(), "completed");

        // Re-confirming a finished plan runs nothing.
        let again = runtime.handle_confirmation("sess_a", &plan_id, true).await.expect("again");
        assert_eq!(invoker.calls().await.len(), 2);
        assert!(again.text().contains("already finished"));
    }

    #[tokio::test]
    async fn partial_failure_is_reported_as_partial() {
        let invoker = Arc::new(ScriptedInvoker::default());
        invoker.script("create_customer", vec![Ok(json!({"id": "cust_000006"}))]).await;
        invoker.script("create_order", vec![Err(ToolError::NotFound("no product matching `BAD-999`".to_string()))]).await;
        let runtime = runtime(invoker.clone());

        runtime
            .handle_message("sess_a", "create a customer Jane Doe and order 2 units of BAD-999 for her")
            .await
            .expect("preview");
        let result = runtime.handle_message("sess_a", "yes").await.expect("result");

        let text = result.text();
        assert!(text.starts_with("Partially done: 1 of 2 step(s) succeeded."), "{text}");
        assert!(text.contains("1. [succeeded]"));
        assert!(text.contains("BAD-999"));
    }

    #[tokio::test]
    async fn ambiguous_pronoun_makes_no_tool_call() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let runtime = runtime(invoker.clone());

        let reply = runtime.handle_message("sess_a", "set its stock to 5").await.expect("reply");

        assert!(invoker.calls().await.is_empty());
        assert!(matches!(
            reply.messages.as_slice(),
            [ReplyMessage::Clarification { error_code, .. }] if error_code == "ambiguous_reference"
        ));
    }

    #[tokio::test]
    async fn newer_plan_supersedes_and_stale_confirmation_is_ignored() {
        let invoker = Arc::new(ScriptedInvoker::default());
        invoker.script("create_customer", vec![Ok(json!({"id": "cust_000007"}))]).await;
        let runtime = runtime(invoker.clone());

        let first = runtime.handle_message("sess_a", "create 2 products").await.expect("first");
        let first_id = preview_id(&first.messages);
        let second = runtime
            .handle_message("sess_a", "create customer Ada Lovelace ada@example.com")
            .await
            .expect("second");
        assert!(second.text().contains(&format!("Discarded plan {first_id}")));
        let second_id = preview_id(&second.messages);

        let stale = runtime.handle_confirmation("sess_a", &first_id, true).await.expect("stale");
        assert!(stale.text().contains("no longer active"));
        assert!(invoker.calls().await.is_empty());

        runtime.handle_confirmation("sess_a", &second_id, true).await.expect("run");
        let calls = invoker.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "create_customer");
    }

    #[tokio::test]
    async fn declined_plan_is_discarded() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let runtime = runtime(invoker.clone());

        runtime.handle_message("sess_a", "create 2 products").await.expect("preview");
        let declined = runtime.handle_message("sess_a", "no").await.expect("declined");
        assert!(declined.text().starts_with("Discarded plan"));

        let nothing = runtime.handle_message("sess_a", "yes").await.expect("nothing");
        assert_eq!(nothing.text(), "There is nothing awaiting confirmation.");
        assert!(invoker.calls().await.is_empty());
    }

    #[tokio::test]
    async fn direct_call_result_feeds_later_pronouns() {
        let invoker = Arc::new(ScriptedInvoker::default());
        invoker
            .script("get_product", vec![Ok(json!({"id": "prod_000011", "sku": "WID-001", "name": "Blue Widget"}))])
            .await;
        invoker.script("update_stock", vec![Ok(json!({"product_id": "prod_000011", "stock_quantity": 5}))]).await;
        let runtime = runtime(invoker.clone());

        runtime.handle_message("sess_a", "get product WID-001").await.expect("lookup");
        let preview = runtime.handle_message("sess_a", "set its stock to 5").await.expect("preview");
        let plan_id = preview_id(&preview.messages);
        runtime.handle_confirmation("sess_a", &plan_id, true).await.expect("run");

        let calls = invoker.calls().await;
        assert_eq!(calls[1].0, "update_stock");
        assert_eq!(calls[1].1["product_id"], json!("prod_000011"));
        assert_eq!(calls[1].1["quantity"], json!(5));
    }

    #[tokio::test]
    async fn dropped_turn_releases_its_cancel_handle() {
        let invoker = Arc::new(ScriptedInvoker::delayed(Duration::from_millis(300)));
        invoker.script("create_customer", vec![Ok(json!({"id": "cust_000006"}))]).await;
        let runtime = runtime(invoker.clone());
        runtime
            .handle_message("sess_a", "create a customer Jane Doe and order 2 units of product SKU WID-001 for her")
            .await
            .expect("preview");

        let turn = tokio::time::timeout(Duration::from_millis(50), runtime.handle_message("sess_a", "yes")).await;

        assert!(turn.is_err(), "the turn should still be waiting on the slow call");
        assert_eq!(invoker.calls().await.len(), 1);
        assert!(!runtime.cancel("sess_a").await);
        assert!(runtime.close_session("sess_a").await);
    }

    #[tokio::test]
    async fn restock_adds_stock_to_every_listed_product() {
        let invoker = Arc::new(ScriptedInvoker::default());
        invoker
            .script(
                "get_low_stock_products",
                vec![Ok(json!([
                    {"id": "prod_000003", "name": "Running Shoes", "stock_quantity": 2},
                    {"id": "prod_000008", "name": "Yoga Mat", "stock_quantity": 4}
                ]))],
            )
            .await;
        invoker
            .script(
                "update_stock",
                vec![
                    Ok(json!({"product_id": "prod_000003", "stock_quantity": 17})),
                    Ok(json!({"product_id": "prod_000008", "stock_quantity": 19})),
                ],
            )
            .await;
        let runtime = runtime(invoker.clone());

        let preview = runtime.handle_message("sess_a", "restock low stock products by 15").await.expect("preview");
        assert!(invoker.calls().await.is_empty());
        let plan_id = preview_id(&preview.messages);
        let result = runtime.handle_confirmation("sess_a", &plan_id, true).await.expect("run");

        let calls = invoker.calls().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].1["product_id"], json!("prod_000003"));
        assert_eq!(calls[2].1["product_id"], json!("prod_000008"));
        assert!(calls[1..].iter().all(|(_, arguments)| arguments["quantity"] == json!(15)
            && arguments["operation"] == json!("add")));
        let ReplyMessage::PlanResult { status, steps, .. } = &result.messages[0] else {
            panic!("expected a plan result, got {:?}", result.messages);
        };
        assert_eq!(status.as_str(), "completed");
        assert_eq!(steps[1].result.as_ref().and_then(|value| value.as_array()).map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn demo_store_creates_rows_then_orders_between_them() {
        let invoker = Arc::new(ScriptedInvoker::default());
        invoker.script("search_products", vec![Ok(json!([]))]).await;
        invoker.script("search_customers", vec![Ok(json!([]))]).await;
        invoker
            .script(
                "create_product",
                (1..=2).map(|n| Ok(json!({"id": format!("prod_00002{n}"), "name": "Demo"}))).collect(),
            )
            .await;
        invoker
            .script("create_customer", vec![Ok(json!({"id": "cust_000031", "first_name": "Emma", "last_name": "Johnson"}))])
            .await;
        invoker.script("create_order", vec![Ok(json!({"id": "order_000041", "status": "pending"}))]).await;
        let runtime = runtime(invoker.clone());

        let preview = runtime
            .handle_message("sess_a", "set up a demo store with 2 products, 1 customer and 1 order")
            .await
            .expect("preview");
        let ReplyMessage::PlanPreview { plan_id, steps, .. } = &preview.messages[0] else {
            panic!("expected a preview, got {:?}", preview.messages);
        };
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[5].depends_on, vec![3, 5]);

        let result = runtime.handle_confirmation("sess_a", plan_id, true).await.expect("run");
        assert!(result.text().starts_with("Done: all 6 step(s) succeeded."), "{}", result.text());
        let calls = invoker.calls().await;
        let order = calls.iter().find(|(tool, _)| tool == "create_order").expect("an order call");
        assert_eq!(order.1["customer_id"], json!("cust_000031"));
        assert_eq!(order.1["items"][0]["quantity"], json!(1));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let invoker = Arc::new(ScriptedInvoker::default());
        invoker.script("get_product", vec![Ok(json!({"id": "prod_000011", "sku": "WID-001"}))]).await;
        let runtime = runtime(invoker.clone());

        runtime.handle_message("sess_a", "get product WID-001").await.expect("lookup");
        let other = runtime.handle_message("sess_b", "set its stock to 5").await.expect("reply");

        assert!(other.text().contains("don't know which product"));
        assert_eq!(runtime.session_count().await, 2);
        assert!(runtime.close_session("sess_b").await);
        assert!(matches!(
            runtime.handle_confirmation("sess_b", "plan_x", true).await,
            Err(ApplicationError::UnknownSession(_))
        ));
    }
}
