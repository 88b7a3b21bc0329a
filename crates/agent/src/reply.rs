use serde::Serialize;
use serde_json::Value;

use shopdesk_core::errors::{ErrorKind, ToolError, TurnError};
use shopdesk_core::plan::{Plan, PlanStatus, StepStatus};
use shopdesk_core::tools::{ResultShape, ToolSpec};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reply {
    pub session_id: String,
    pub messages: Vec<ReplyMessage>,
}

impl Reply {
    pub fn new(session_id: impl Into<String>, messages: Vec<ReplyMessage>) -> Self {
        Self { session_id: session_id.into(), messages }
    }

    /// Plain-text rendering, as kept in session history.
    pub fn text(&self) -> String {
        self.messages.iter().map(ReplyMessage::render).collect::<Vec<_>>().join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyMessage {
    Text {
        text: String,
    },
    Clarification {
        error_code: String,
        text: String,
    },
    PlanPreview {
        plan_id: String,
        goal: String,
        steps: Vec<PreviewStep>,
        expires_in_secs: u64,
    },
    PlanResult {
        plan_id: String,
        status: PlanStatus,
        summary: String,
        steps: Vec<StepOutcome>,
    },
    ToolResult {
        tool: String,
        summary: String,
        data: Value,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreviewStep {
    pub step: u32,
    pub tool: String,
    pub description: String,
    pub depends_on: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: u32,
    pub tool: String,
    pub description: String,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ReplyMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn clarification(error: &TurnError) -> Self {
        Self::Clarification { error_code: error.kind().code().to_string(), text: error.to_string() }
    }

    pub fn tool_failure(tool: &str, error: &ToolError) -> Self {
        Self::Clarification {
            error_code: error.kind().code().to_string(),
            text: format!("`{tool}` failed: {}", error.message()),
        }
    }

    pub fn preview(plan: &Plan, expires_in_secs: u64) -> Self {
        let steps = plan
            .steps
            .iter()
            .map(|step| PreviewStep {
                step: step.id,
                tool: step.tool.clone(),
                description: step.description.clone(),
                depends_on: step.dependencies().into_iter().collect(),
            })
            .collect();
        Self::PlanPreview { plan_id: plan.id.0.clone(), goal: plan.goal.clone(), steps, expires_in_secs }
    }

    pub fn outcome(plan: &Plan) -> Self {
        let steps = plan
            .steps
            .iter()
            .map(|step| StepOutcome {
                step: step.id,
                tool: step.tool.clone(),
                description: step.description.clone(),
                status: step.status,
                attempts: step.attempts,
                result: step.result.clone(),
                error_code: step.error.as_ref().map(|failure| failure.kind),
                error: step.error.as_ref().map(|failure| failure.message.clone()),
                skip_reason: step.skip_reason.clone(),
            })
            .collect();
        Self::PlanResult {
            plan_id: plan.id.0.clone(),
            status: plan.status,
            summary: plan_summary(plan),
            steps,
        }
    }

    pub fn tool_result(spec: &ToolSpec, data: Value) -> Self {
        Self::ToolResult { tool: spec.name.clone(), summary: summarize(spec, &data), data }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Text { text } | Self::Clarification { text, .. } => text.clone(),
            Self::PlanPreview { plan_id, steps, .. } => {
                let mut lines = vec![format!("Plan {plan_id} needs your confirmation:")];
                lines.extend(steps.iter().map(|step| format!("  {}. {}", step.step, step.description)));
                lines.push("Reply `yes` to run it or `no` to discard it.".to_string());
                lines.join("\n")
            }
            Self::PlanResult { summary, steps, .. } => {
                let mut lines = vec![summary.clone()];
                lines.extend(steps.iter().map(|step| match (&step.error_code, &step.error, &step.skip_reason) {
                    (Some(code), Some(error), _) => format!(
                        "  {}. [{}: {}] {}: {error}",
                        step.step,
                        step.status.as_str(),
                        code.code(),
                        step.description
                    ),
                    (_, _, Some(reason)) => {
                        format!("  {}. [{}] {}: {reason}", step.step, step.status.as_str(), step.description)
                    }
                    _ => format!("  {}. [{}] {}", step.step, step.status.as_str(), step.description),
                }));
                lines.join("\n")
            }
            Self::ToolResult { summary, .. } => summary.clone(),
        }
    }
}

fn plan_summary(plan: &Plan) -> String {
    let total = plan.steps.len();
    let succeeded = plan.count(StepStatus::Succeeded);
    let first_failure = plan
        .steps
        .iter()
        .find(|step| step.status == StepStatus::Failed)
        .and_then(|step| step.error.as_ref().map(|failure| (step.id, failure)));
    let reason = match first_failure {
        Some((id, failure)) => format!(" Step {id} failed ({}): {}.", failure.kind.code(), failure.message),
        None => match plan.steps.iter().find_map(|step| step.skip_reason.as_deref().map(|reason| (step.id, reason))) {
            Some((id, reason)) => format!(" Step {id} and the steps after it were skipped: {reason}."),
            None => String::new(),
        },
    };

    match plan.status {
        PlanStatus::Completed => format!("Done: all {total} step(s) succeeded."),
        PlanStatus::PartiallyFailed => format!("Partially done: {succeeded} of {total} step(s) succeeded.{reason}"),
        PlanStatus::Aborted => format!("Nothing was changed: no step succeeded.{reason}"),
        PlanStatus::AwaitingConfirmation | PlanStatus::Executing => {
            format!("Plan is {}.", plan.status.as_str())
        }
    }
}

/// One-line text for a tool result.
pub fn summarize(spec: &ToolSpec, data: &Value) -> String {
    let noun = spec.entity.map(|kind| kind.as_str()).unwrap_or("result");
    if spec.result.shape == ResultShape::List {
        let items = data.as_array().map(Vec::as_slice).unwrap_or_default();
        if items.is_empty() {
            return format!("No {noun}s found.");
        }
        let shown: Vec<String> = items.iter().take(5).map(label).collect();
        let more = if items.len() > shown.len() {
            format!(" and {} more", items.len() - shown.len())
        } else {
            String::new()
        };
        return format!("Found {} {noun}(s): {}{more}.", items.len(), shown.join("; "));
    }

    let verb = match spec.name.split('_').next() {
        Some("create") => "Created",
        Some("update") => "Updated",
        _ => "Found",
    };
    format!("{verb} {noun} {}.", label(data))
}

fn label(value: &Value) -> String {
    let field = |name: &str| value.get(name).and_then(Value::as_str);
    let id = field("id").or_else(|| field("product_id")).unwrap_or("?");
    if let Some(name) = field("name") {
        let sku = field("sku").map(|sku| format!(" [{sku}]")).unwrap_or_default();
        let stock = value
            .get("stock_quantity")
            .and_then(Value::as_i64)
            .map(|stock| format!(", {stock} in stock"))
            .unwrap_or_default();
        return format!("{id} {name}{sku}{stock}");
    }
    if let (Some(first), Some(last)) = (field("first_name"), field("last_name")) {
        let email = field("email").map(|email| format!(" <{email}>")).unwrap_or_default();
        return format!("{id} {first} {last}{email}");
    }
    if let Some(status) = field("status") {
        let total = field("total_amount").map(|total| format!(", total {total}")).unwrap_or_default();
        return format!("{id} ({status}{total})");
    }
    if let Some(stock) = value.get("stock_quantity").and_then(Value::as_i64) {
        let sku = field("sku").map(|sku| format!(" [{sku}]")).unwrap_or_default();
        return format!("{id}{sku}, {stock} in stock");
    }
    id.to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use shopdesk_core::errors::ErrorKind;
    use shopdesk_core::plan::{Plan, PlanId, PlanStatus, PlanStep};
    use shopdesk_core::tools::ToolRegistry;

    use super::{summarize, ReplyMessage};

    #[test]
    fn messages_are_tagged_by_type() {
        let value = serde_json::to_value(ReplyMessage::text("hi")).expect("serialize");
        assert_eq!(value, json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn partial_result_names_the_failed_step() {
        let mut first = PlanStep::new(1, "create_customer", "Create customer Jane Doe", BTreeMap::new());
        first.succeed(json!({"id": "cust_000006"}));
        let mut second = PlanStep::new(2, "create_order", "Place order", BTreeMap::new());
        second.fail(ErrorKind::NotFound, "no product matching `NOPE-1`");
        let plan = Plan {
            id: PlanId("plan_test".to_string()),
            goal: "goal".to_string(),
            steps: vec![first, second],
            status: PlanStatus::PartiallyFailed,
        };

        let message = ReplyMessage::outcome(&plan);
        let rendered = message.render();
        assert!(rendered.starts_with("Partially done: 1 of 2 step(s) succeeded. Step 2 failed (not_found)"));
        assert!(rendered.contains("1. [succeeded] Create customer Jane Doe"));
        assert!(rendered.contains("2. [failed: not_found] Place order: no product matching `NOPE-1`"));

        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["type"], "plan_result");
        assert_eq!(value["status"], "partially_failed");
        assert_eq!(value["steps"][1]["error_code"], "not_found");
    }

    #[test]
    fn cancelled_steps_render_the_reason_without_an_error_code() {
        let mut first = PlanStep::new(1, "create_customer", "Create customer Jane Doe", BTreeMap::new());
        first.succeed(json!({"id": "cust_000006"}));
        let mut second = PlanStep::new(2, "create_order", "Place order", BTreeMap::new());
        second.skip("cancelled");
        let plan = Plan {
            id: PlanId("plan_test".to_string()),
            goal: "goal".to_string(),
            steps: vec![first, second],
            status: PlanStatus::PartiallyFailed,
        };

        let message = ReplyMessage::outcome(&plan);
        let rendered = message.render();
        assert!(rendered.starts_with("Partially done: 1 of 2 step(s) succeeded. Step 2 and the steps after it were skipped: cancelled."));
        assert!(rendered.contains("2. [skipped] Place order: cancelled"));
        assert!(!rendered.contains("unresolved_binding"));

        let value = serde_json::to_value(&message).expect("serialize");
        assert!(value["steps"][1].get("error_code").is_none());
        assert_eq!(value["steps"][1]["skip_reason"], "cancelled");
    }

    #[test]
    fn tool_results_are_summarized() {
        let registry = ToolRegistry::shop(10).expect("registry");
        let search = registry.get("search_products").expect("spec");
        assert_eq!(summarize(search, &json!([])), "No products found.");
        let found = summarize(
            search,
            &json!([{"id": "prod_000011", "name": "Blue Widget", "sku": "WID-001", "stock_quantity": 50}]),
        );
        assert_eq!(found, "Found 1 product(s): prod_000011 Blue Widget [WID-001], 50 in stock.");

        let create = registry.get("create_customer").expect("spec");
        let created = summarize(
            create,
            &json!({"id": "cust_000006", "first_name": "Jane", "last_name": "Doe", "email": "jane@example.com"}),
        );
        assert_eq!(created, "Created customer cust_000006 Jane Doe <jane@example.com>.");
    }
}
