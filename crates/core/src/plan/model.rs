use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{ErrorKind, PlanError};
use crate::plan::states::{PlanStatus, StepStatus};
use crate::tools::{ResultShape, ToolRegistry};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub String);

impl PlanId {
    pub fn generate() -> Self {
        Self(format!("plan_{}", Uuid::new_v4().simple()))
    }

    /// Short uppercase tag used when generating SKUs for the plan.
    pub fn tag(&self) -> String {
        let raw = self.0.strip_prefix("plan_").unwrap_or(&self.0);
        raw.chars().filter(char::is_ascii_alphanumeric).take(6).collect::<String>().to_ascii_uppercase()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A step argument: either known up front or taken from an earlier step's result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    Literal(Value),
    Reference { step: u32, field: String },
    /// A field of each element of a list result. The step runs once per element.
    Each { step: u32, field: String },
    List(Vec<Binding>),
    Record(BTreeMap<String, Binding>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub step: u32,
    pub field: String,
}

impl fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} produced no `{}` value", self.step, self.field)
    }
}

impl Binding {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(step: u32, field: &str) -> Self {
        Self::Reference { step, field: field.to_string() }
    }

    /// Single-object references, as `(step, field)`.
    pub fn references(&self) -> Vec<(u32, &str)> {
        let mut found = Vec::new();
        self.collect_references(false, &mut found);
        found
    }

    /// Fan-out references over list results.
    pub fn each_references(&self) -> Vec<(u32, &str)> {
        let mut found = Vec::new();
        self.collect_references(true, &mut found);
        found
    }

    fn collect_references<'a>(&'a self, each: bool, found: &mut Vec<(u32, &'a str)>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference { step, field } if !each => found.push((*step, field.as_str())),
            Self::Each { step, field } if each => found.push((*step, field.as_str())),
            Self::Reference { .. } | Self::Each { .. } => {}
            Self::List(items) => items.iter().for_each(|item| item.collect_references(each, found)),
            Self::Record(fields) => {
                fields.values().for_each(|value| value.collect_references(each, found))
            }
        }
    }

    /// Substitutes references with values from `results`, keyed by step id.
    pub fn resolve(&self, results: &BTreeMap<u32, Value>) -> Result<Value, UnresolvedReference> {
        self.resolve_with(results, None)
    }

    /// Like [`Binding::resolve`], with `item` as the current element for [`Binding::Each`].
    pub fn resolve_with(
        &self,
        results: &BTreeMap<u32, Value>,
        item: Option<&Value>,
    ) -> Result<Value, UnresolvedReference> {
        let field_of = |value: Option<&Value>, step: u32, field: &str| {
            value
                .and_then(|value| value.get(field))
                .filter(|value| !value.is_null())
                .cloned()
                .ok_or_else(|| UnresolvedReference { step, field: field.to_string() })
        };
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Reference { step, field } => field_of(results.get(step), *step, field),
            Self::Each { step, field } => field_of(item, *step, field),
            Self::List(items) => items
                .iter()
                .map(|item_binding| item_binding.resolve_with(results, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Record(fields) => {
                let mut resolved = serde_json::Map::new();
                for (key, value) in fields {
                    resolved.insert(key.clone(), value.resolve_with(results, item)?);
                }
                Ok(Value::Object(resolved))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Literal(Value::String(text)) => text.clone(),
            Self::Literal(value) => value.to_string(),
            Self::Reference { step, field } => format!("<{field} from step {step}>"),
            Self::Each { step, field } => format!("<each {field} from step {step}>"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(Binding::describe).collect();
                format!("[{}]", parts.join(", "))
            }
            Self::Record(fields) => {
                let parts: Vec<String> =
                    fields.iter().map(|(key, value)| format!("{key}: {}", value.describe())).collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: u32,
    pub tool: String,
    pub description: String,
    pub bindings: BTreeMap<String, Binding>,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    /// Why a skipped step never ran. Skips carry no error kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub attempts: u32,
}

impl PlanStep {
    pub fn new(
        id: u32,
        tool: &str,
        description: impl Into<String>,
        bindings: BTreeMap<String, Binding>,
    ) -> Self {
        Self {
            id,
            tool: tool.to_string(),
            description: description.into(),
            bindings,
            status: StepStatus::Pending,
            result: None,
            error: None,
            skip_reason: None,
            attempts: 0,
        }
    }

    pub fn dependencies(&self) -> BTreeSet<u32> {
        self.bindings
            .values()
            .flat_map(|binding| {
                let mut targets = binding.references();
                targets.extend(binding.each_references());
                targets.into_iter().map(|(step, _)| step)
            })
            .collect()
    }

    /// The list-producing step this step repeats over, if any.
    pub fn fan_out_source(&self) -> Option<u32> {
        self.bindings.values().flat_map(Binding::each_references).map(|(step, _)| step).next()
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(StepFailure { kind, message: message.into() });
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.error = None;
        self.skip_reason = Some(reason.into());
    }

    pub fn succeed(&mut self, result: Value) {
        self.status = StepStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
}

impl Plan {
    /// Validates tool names, parameters, and references, then applies the confirmation gate.
    pub fn build(
        id: PlanId,
        goal: impl Into<String>,
        steps: Vec<PlanStep>,
        registry: &ToolRegistry,
        max_steps: usize,
    ) -> Result<Self, PlanError> {
        if steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if steps.len() > max_steps {
            return Err(PlanError::TooManySteps { count: steps.len(), max: max_steps });
        }

        for (index, step) in steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.id != expected {
                return Err(PlanError::StepOutOfSequence { step: step.id, expected });
            }

            let spec = registry
                .get(&step.tool)
                .ok_or_else(|| PlanError::UnknownTool { step: step.id, tool: step.tool.clone() })?;

            for param in step.bindings.keys() {
                if spec.param(param).is_none() {
                    return Err(PlanError::UnknownParameter {
                        step: step.id,
                        tool: step.tool.clone(),
                        param: param.clone(),
                    });
                }
            }
            for param in spec.params.iter().filter(|param| param.required) {
                if !step.bindings.contains_key(&param.name) {
                    return Err(PlanError::MissingParameter {
                        step: step.id,
                        tool: step.tool.clone(),
                        param: param.name.clone(),
                    });
                }
            }

            let mut fan_out_sources = BTreeSet::new();
            for binding in step.bindings.values() {
                let single = binding.references().into_iter().map(|reference| (reference, false));
                let each = binding.each_references().into_iter().map(|reference| (reference, true));
                for ((target, field), repeats) in single.chain(each) {
                    if target == 0 || target >= step.id {
                        return Err(PlanError::ForwardReference { step: step.id, target });
                    }
                    let target_step = &steps[target as usize - 1];
                    let target_tool = &target_step.tool;
                    let target_spec = registry.get(target_tool).ok_or_else(|| {
                        PlanError::UnknownTool { step: target, tool: target_tool.clone() }
                    })?;
                    // A repeated step yields a list of results, whatever its tool returns.
                    let lists = target_spec.result.shape == ResultShape::List
                        || target_step.fan_out_source().is_some();
                    match (repeats, lists) {
                        (false, true) => {
                            return Err(PlanError::ListReference {
                                step: step.id,
                                target,
                                tool: target_tool.clone(),
                            })
                        }
                        (true, false) => {
                            return Err(PlanError::EachOverSingle {
                                step: step.id,
                                target,
                                tool: target_tool.clone(),
                            })
                        }
                        _ => {}
                    }
                    if repeats {
                        fan_out_sources.insert(target);
                    }
                    if !target_spec.result.has_field(field) {
                        return Err(PlanError::UnknownField {
                            step: step.id,
                            target,
                            tool: target_tool.clone(),
                            field: field.to_string(),
                        });
                    }
                }
            }
            if fan_out_sources.len() > 1 {
                return Err(PlanError::MixedFanOut { step: step.id });
            }
        }

        let first_mutates = registry.get(&steps[0].tool).is_some_and(|spec| spec.is_mutating());
        let status = if steps.len() > 1 || first_mutates {
            PlanStatus::AwaitingConfirmation
        } else {
            PlanStatus::Executing
        };

        Ok(Self { id, goal: goal.into(), steps, status })
    }

    pub fn needs_confirmation(&self) -> bool {
        self.status == PlanStatus::AwaitingConfirmation
    }

    pub fn transition_to(&mut self, next: PlanStatus) -> Result<(), PlanError> {
        if self.status.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }
        Err(PlanError::InvalidTransition { from: self.status, to: next })
    }

    pub fn confirm(&mut self) -> Result<(), PlanError> {
        self.transition_to(PlanStatus::Executing)
    }

    pub fn step(&self, id: u32) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn step_mut(&mut self, id: u32) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|step| step.id == id)
    }

    /// Every step that depends on `id` directly or through another step.
    pub fn dependents_of(&self, id: u32) -> BTreeSet<u32> {
        let mut dependents = BTreeSet::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for step in &self.steps {
                if step.dependencies().contains(&current) && dependents.insert(step.id) {
                    frontier.push(step.id);
                }
            }
        }
        dependents
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|step| step.status == status).count()
    }

    /// Overall outcome implied by the step statuses.
    pub fn outcome(&self) -> PlanStatus {
        let succeeded = self.count(StepStatus::Succeeded);
        if succeeded == self.steps.len() {
            PlanStatus::Completed
        } else if succeeded > 0 {
            PlanStatus::PartiallyFailed
        } else {
            PlanStatus::Aborted
        }
    }

    pub fn settle(&mut self) -> Result<PlanStatus, PlanError> {
        let outcome = self.outcome();
        self.transition_to(outcome)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{Binding, Plan, PlanId, PlanStep};
    use crate::errors::{ErrorKind, PlanError};
    use crate::plan::states::{PlanStatus, StepStatus};
    use crate::tools::ToolRegistry;

    fn registry() -> ToolRegistry {
        ToolRegistry::shop(10).expect("catalogue registers")
    }

    fn bindings(pairs: Vec<(&str, Binding)>) -> BTreeMap<String, Binding> {
        pairs.into_iter().map(|(key, value)| (key.to_string(), value)).collect()
    }

    fn customer_then_order() -> Vec<PlanStep> {
        vec![
            PlanStep::new(
                1,
                "create_customer",
                "Create customer Jane Doe",
                bindings(vec![
                    ("first_name", Binding::literal("Jane")),
                    ("last_name", Binding::literal("Doe")),
                    ("email", Binding::literal("jane.doe@customers.invalid")),
                ]),
            ),
            PlanStep::new(
                2,
                "create_order",
                "Order 2 x WID-001",
                bindings(vec![
                    ("customer_id", Binding::reference(1, "id")),
                    ("items", Binding::literal(json!([{"sku": "WID-001", "quantity": 2}]))),
                ]),
            ),
        ]
    }

    #[test]
    fn multi_step_plan_awaits_confirmation() {
        let plan = Plan::build(PlanId::generate(), "goal", customer_then_order(), &registry(), 20)
            .expect("plan builds");
        assert_eq!(plan.status, PlanStatus::AwaitingConfirmation);
        assert_eq!(plan.steps[1].dependencies().into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn single_read_step_bypasses_the_gate() {
        let steps = vec![PlanStep::new(1, "search_products", "List products", BTreeMap::new())];
        let plan = Plan::build(PlanId::generate(), "list products", steps, &registry(), 20)
            .expect("plan builds");
        assert_eq!(plan.status, PlanStatus::Executing);
    }

    #[test]
    fn single_mutating_step_is_gated() {
        let steps = vec![PlanStep::new(
            1,
            "update_stock",
            "Set stock",
            bindings(vec![
                ("product_id", Binding::literal("prod_000001")),
                ("quantity", Binding::literal(5)),
            ]),
        )];
        let plan =
            Plan::build(PlanId::generate(), "set stock", steps, &registry(), 20).expect("plan builds");
        assert!(plan.needs_confirmation());
    }

    #[test]
    fn forward_and_self_references_are_rejected() {
        let mut steps = customer_then_order();
        steps[0].bindings.insert("phone".to_string(), Binding::reference(2, "id"));
        let error = Plan::build(PlanId::generate(), "goal", steps, &registry(), 20)
            .expect_err("forward reference");
        assert_eq!(error, PlanError::ForwardReference { step: 1, target: 2 });
    }

    #[test]
    fn references_must_name_result_fields() {
        let mut steps = customer_then_order();
        steps[1].bindings.insert("customer_id".to_string(), Binding::reference(1, "customer_number"));
        let error =
            Plan::build(PlanId::generate(), "goal", steps, &registry(), 20).expect_err("unknown field");
        assert!(matches!(error, PlanError::UnknownField { ref field, .. } if field == "customer_number"));
    }

    #[test]
    fn list_results_cannot_be_referenced() {
        let steps = vec![
            PlanStep::new(1, "search_customers", "Find customers", BTreeMap::new()),
            PlanStep::new(
                2,
                "get_customer",
                "Fetch",
                bindings(vec![("identifier", Binding::reference(1, "id"))]),
            ),
        ];
        let error =
            Plan::build(PlanId::generate(), "goal", steps, &registry(), 20).expect_err("list ref");
        assert!(matches!(error, PlanError::ListReference { target: 1, .. }));
    }

    #[test]
    fn each_binding_repeats_over_a_list_result() {
        let steps = vec![
            PlanStep::new(1, "get_low_stock_products", "Find low stock", BTreeMap::new()),
            PlanStep::new(
                2,
                "update_stock",
                "Restock",
                bindings(vec![
                    ("product_id", Binding::Each { step: 1, field: "id".to_string() }),
                    ("quantity", Binding::literal(20)),
                    ("operation", Binding::literal("add")),
                ]),
            ),
        ];
        let plan = Plan::build(PlanId::generate(), "restock", steps, &registry(), 20).expect("plan builds");
        assert_eq!(plan.steps[1].fan_out_source(), Some(1));
        assert_eq!(plan.steps[1].dependencies().into_iter().collect::<Vec<_>>(), vec![1]);

        let results: BTreeMap<u32, serde_json::Value> = BTreeMap::new();
        let each = &plan.steps[1].bindings["product_id"];
        assert_eq!(each.resolve_with(&results, Some(&json!({"id": "prod_000003"}))), Ok(json!("prod_000003")));
        assert!(each.resolve(&results).is_err());
    }

    #[test]
    fn each_binding_needs_a_list_source() {
        let mut steps = customer_then_order();
        steps[1].bindings.insert("customer_id".to_string(), Binding::Each { step: 1, field: "id".to_string() });
        let error = Plan::build(PlanId::generate(), "goal", steps, &registry(), 20).expect_err("single source");
        assert!(matches!(error, PlanError::EachOverSingle { target: 1, .. }));
    }

    #[test]
    fn repeated_step_results_cannot_be_referenced_singly() {
        let steps = vec![
            PlanStep::new(1, "get_low_stock_products", "Find low stock", BTreeMap::new()),
            PlanStep::new(
                2,
                "update_stock",
                "Restock",
                bindings(vec![
                    ("product_id", Binding::Each { step: 1, field: "id".to_string() }),
                    ("quantity", Binding::literal(20)),
                ]),
            ),
            PlanStep::new(
                3,
                "get_product",
                "Show it",
                bindings(vec![("identifier", Binding::reference(2, "product_id"))]),
            ),
        ];
        let error = Plan::build(PlanId::generate(), "goal", steps, &registry(), 20).expect_err("list ref");
        assert!(matches!(error, PlanError::ListReference { step: 3, target: 2, .. }));
    }

    #[test]
    fn skipped_steps_carry_a_reason_but_no_error_kind() {
        let mut step = PlanStep::new(1, "search_products", "List products", BTreeMap::new());
        step.skip("cancelled");
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(step.error, None);
        assert_eq!(step.skip_reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn oversized_plans_are_rejected() {
        let error = Plan::build(PlanId::generate(), "goal", customer_then_order(), &registry(), 1)
            .expect_err("too many steps");
        assert_eq!(error, PlanError::TooManySteps { count: 2, max: 1 });
    }

    #[test]
    fn missing_required_parameter_is_rejected_at_build_time() {
        let mut steps = customer_then_order();
        steps[0].bindings.remove("email");
        let error =
            Plan::build(PlanId::generate(), "goal", steps, &registry(), 20).expect_err("missing email");
        assert!(matches!(error, PlanError::MissingParameter { ref param, .. } if param == "email"));
    }

    #[test]
    fn nested_references_resolve_inside_records() {
        let binding = Binding::List(vec![Binding::Record(
            [
                ("product_id".to_string(), Binding::reference(1, "id")),
                ("quantity".to_string(), Binding::literal(3)),
            ]
            .into_iter()
            .collect(),
        )]);
        let results: BTreeMap<u32, serde_json::Value> =
            [(1, json!({"id": "prod_000007"}))].into_iter().collect();
        assert_eq!(
            binding.resolve(&results),
            Ok(json!([{"product_id": "prod_000007", "quantity": 3}]))
        );
        assert!(Binding::reference(2, "id").resolve(&results).is_err());
    }

    #[test]
    fn outcome_reflects_partial_success() {
        let mut plan = Plan::build(PlanId::generate(), "goal", customer_then_order(), &registry(), 20)
            .expect("plan builds");
        plan.confirm().expect("confirm");
        plan.steps[0].succeed(json!({"id": "cust_000001"}));
        plan.steps[1].fail(ErrorKind::NotFound, "no product with sku WID-404");
        assert_eq!(plan.settle(), Ok(PlanStatus::PartiallyFailed));
        assert_eq!(plan.count(StepStatus::Failed), 1);
    }

    #[test]
    fn transitive_dependents_are_found() {
        let mut steps = customer_then_order();
        steps.push(PlanStep::new(
            3,
            "update_order_status",
            "Confirm it",
            bindings(vec![
                ("order_id", Binding::reference(2, "id")),
                ("status", Binding::literal("confirmed")),
            ]),
        ));
        let plan =
            Plan::build(PlanId::generate(), "goal", steps, &registry(), 20).expect("plan builds");
        assert_eq!(plan.dependents_of(1).into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn plan_tag_is_short_and_uppercase() {
        let tag = PlanId("plan_ab12cd34ef".to_string()).tag();
        assert_eq!(tag, "AB12CD");
    }
}
