use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use shopdesk_core::config::PlannerConfig;
use shopdesk_core::domain::EntityKind;
use shopdesk_core::errors::TurnError;
use shopdesk_core::plan::{Binding, Plan, PlanId, PlanStep};
use shopdesk_core::tools::{Arguments, ToolRegistry};

use crate::intent::GoalRequest;
use crate::operation::{BindingSource, Operation, Subject};
use crate::session::SessionContext;

/// Where an operation's unnamed entity comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Source {
    Operation(usize),
    Remembered(String),
}

pub struct PlanBuilder {
    registry: Arc<ToolRegistry>,
    settings: PlannerConfig,
}

impl PlanBuilder {
    pub fn new(registry: Arc<ToolRegistry>, settings: PlannerConfig) -> Self {
        Self { registry, settings }
    }

    /// Decomposes a goal into ordered steps. Pure: the context is only read.
    pub fn build(&self, request: &GoalRequest, context: &SessionContext) -> Result<Plan, TurnError> {
        let operations = self.expand_lookups(&request.operations)?;
        let links = link(&operations, context)?;

        let plan_id = PlanId::generate();
        let mut source = PlanBindings {
            links: &links,
            produced: BTreeMap::new(),
            current: 0,
            next_step: 1,
            sku_tag: plan_id.tag(),
            sku_counter: 0,
        };
        let mut steps = Vec::new();

        for (index, operation) in operations.iter().enumerate() {
            source.current = index;
            source.next_step = steps.len() as u32 + 1;
            for call in operation.calls(&mut source)? {
                let id = steps.len() as u32 + 1;
                steps.push(PlanStep::new(id, call.tool, call.description, call.bindings));
                source.produced.insert(index, (id, self.id_field(call.tool)));
            }
        }

        if steps.len() > self.settings.max_plan_steps {
            return Err(TurnError::PlanningFailed(format!(
                "That would take {} steps; plans are limited to {}. Split the request into smaller ones.",
                steps.len(),
                self.settings.max_plan_steps
            )));
        }

        let plan = Plan::build(plan_id, request.goal.clone(), steps, &self.registry, self.settings.max_plan_steps)
            .map_err(|error| TurnError::PlanningFailed(format!("I could not build a valid plan: {error}")))?;
        debug!(
            event_name = "agent.plan.built",
            plan_id = %plan.id,
            steps = plan.steps.len(),
            status = plan.status.as_str(),
        );
        Ok(plan)
    }

    /// Wraps one already-resolved call into a plan so the confirmation gate applies.
    pub fn single_call(&self, goal: &str, tool: &str, arguments: &Arguments) -> Result<Plan, TurnError> {
        let bindings: BTreeMap<String, Binding> = arguments
            .iter()
            .map(|(name, value)| (name.clone(), Binding::Literal(value.clone())))
            .collect();
        let description = describe_call(tool, arguments);
        let steps = vec![PlanStep::new(1, tool, description, bindings)];
        Plan::build(PlanId::generate(), goal, steps, &self.registry, self.settings.max_plan_steps)
            .map_err(|error| TurnError::PlanningFailed(format!("I could not build a valid plan: {error}")))
    }

    /// Bounds bulk quantities and puts a customer lookup in front of operations that name a
    /// customer only by email.
    fn expand_lookups(&self, operations: &[Operation]) -> Result<Vec<Operation>, TurnError> {
        let mut expanded = Vec::with_capacity(operations.len());
        for operation in operations {
            match operation {
                Operation::CreateProducts { count, .. } if *count > self.settings.max_bulk_quantity => {
                    return Err(TurnError::PlanningFailed(format!(
                        "I can create at most {} products at once, not {count}.",
                        self.settings.max_bulk_quantity
                    )));
                }
                Operation::SetUpDemoStore { products, customers, orders } => {
                    let limit = self.settings.max_bulk_quantity;
                    for (count, noun) in [(products, "products"), (customers, "customers"), (orders, "orders")] {
                        if *count > limit {
                            return Err(TurnError::PlanningFailed(format!(
                                "A demo store can have at most {limit} {noun}, not {count}."
                            )));
                        }
                    }
                    expanded.push(operation.clone());
                }
                Operation::CreateOrder { customer: Subject::Key(email), lines } => {
                    expanded.push(Operation::LookupCustomer(Subject::Key(email.clone())));
                    expanded.push(Operation::CreateOrder { customer: Subject::Contextual, lines: lines.clone() });
                }
                Operation::ListOrders { customer: Some(Subject::Key(email)), status } => {
                    expanded.push(Operation::LookupCustomer(Subject::Key(email.clone())));
                    expanded.push(Operation::ListOrders { customer: Some(Subject::Contextual), status: *status });
                }
                other => expanded.push(other.clone()),
            }
        }
        Ok(expanded)
    }

    fn id_field(&self, tool: &str) -> Option<String> {
        self.registry.get(tool).and_then(|spec| spec.result.id_field.clone())
    }
}

/// Picks a source for every unnamed entity: the nearest earlier operation producing that kind,
/// else the session's remembered id. Steps keep the order they were mentioned in.
fn link(
    operations: &[Operation],
    context: &SessionContext,
) -> Result<BTreeMap<(usize, EntityKind), Source>, TurnError> {
    let mut links = BTreeMap::new();
    for (index, operation) in operations.iter().enumerate() {
        for kind in operation.contextual_kinds() {
            let earlier = operations[..index].iter().rposition(|candidate| candidate.produces() == Some(kind));
            let source = match earlier {
                Some(producer) => Source::Operation(producer),
                None => context
                    .remembered(kind)
                    .map(|id| Source::Remembered(id.to_string()))
                    .ok_or(TurnError::AmbiguousReference { kind })?,
            };
            links.insert((index, kind), source);
        }
    }
    Ok(links)
}

struct PlanBindings<'a> {
    links: &'a BTreeMap<(usize, EntityKind), Source>,
    /// Last step emitted per operation, with the field holding its entity id.
    produced: BTreeMap<usize, (u32, Option<String>)>,
    current: usize,
    next_step: u32,
    sku_tag: String,
    sku_counter: u32,
}

impl BindingSource for PlanBindings<'_> {
    fn contextual(&mut self, kind: EntityKind) -> Result<Binding, TurnError> {
        match self.links.get(&(self.current, kind)) {
            Some(Source::Remembered(id)) => Ok(Binding::literal(id.clone())),
            Some(Source::Operation(producer)) => match self.produced.get(producer) {
                Some((step, Some(field))) => Ok(Binding::reference(*step, field)),
                _ => Err(TurnError::PlanningFailed(format!(
                    "the {kind} this request refers to is not produced by any earlier step"
                ))),
            },
            None => Err(TurnError::AmbiguousReference { kind }),
        }
    }

    fn generated_sku(&mut self) -> Option<String> {
        self.sku_counter += 1;
        Some(format!("GEN-{}-{:03}", self.sku_tag, self.sku_counter))
    }

    fn first_step(&self) -> Option<u32> {
        Some(self.next_step)
    }

    fn plan_tag(&self) -> Option<String> {
        Some(self.sku_tag.clone())
    }
}

fn describe_call(tool: &str, arguments: &Arguments) -> String {
    let args: Vec<String> = arguments
        .iter()
        .map(|(name, value)| match value {
            Value::String(text) => format!("{name}: {text}"),
            other => format!("{name}: {other}"),
        })
        .collect();
    format!("{tool}({})", args.join(", "))
}
