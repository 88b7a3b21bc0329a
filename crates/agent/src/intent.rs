//! Ordered, typed intent matchers.
//!
//! Each matcher either declines or returns an [`Intent`] with a confidence on a
//! 0-100 scale. The recognizer tries them by priority and takes the first match
//! that clears the configured minimum.

use std::collections::BTreeMap;

use tracing::debug;

use shopdesk_core::domain::inventory::StockOperation;
use shopdesk_core::domain::EntityKind;
use shopdesk_core::errors::TurnError;
use shopdesk_core::plan::Binding;
use shopdesk_core::tools::Arguments;

use crate::grammar::{self, Token};
use crate::operation::{BindingSource, Operation, OrderLine, ProductFilter, Subject};
use crate::session::SessionContext;

pub const UNRECOGNIZED_HINT: &str = "I didn't catch that. Try `list products`, `create customer Jane Doe jane@example.com`, `low stock`, or `help`.";

#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    DirectCall { tool: String, arguments: Arguments },
    PlanRequest(GoalRequest),
    Unrecognized { hint: String },
}

/// A goal needing the plan builder, with the operations already read from it.
#[derive(Clone, Debug, PartialEq)]
pub struct GoalRequest {
    pub goal: String,
    pub operations: Vec<Operation>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Match {
    pub intent: Intent,
    pub confidence: u8,
}

pub struct Utterance {
    pub text: String,
    pub tokens: Vec<Token>,
}

impl Utterance {
    pub fn new(text: &str) -> Self {
        let text = text.trim().to_string();
        let tokens = grammar::tokenize(&text);
        Self { text, tokens }
    }
}

pub trait IntentMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` declines. An error ends the turn with that error.
    fn try_match(
        &self,
        utterance: &Utterance,
        context: &SessionContext,
    ) -> Result<Option<Match>, TurnError>;
}

pub struct IntentRecognizer {
    matchers: Vec<Box<dyn IntentMatcher>>,
    min_confidence: u8,
}

impl IntentRecognizer {
    pub fn new(min_confidence: u8) -> Self {
        Self::with_matchers(
            vec![
                Box::new(CommandSyntaxMatcher),
                Box::new(KeywordMatcher),
                Box::new(CompoundGoalMatcher),
            ],
            min_confidence,
        )
    }

    pub fn with_matchers(matchers: Vec<Box<dyn IntentMatcher>>, min_confidence: u8) -> Self {
        Self { matchers, min_confidence }
    }

    /// Pure with respect to `context`: reads remembered ids, never writes.
    pub fn recognize(&self, text: &str, context: &SessionContext) -> Result<Intent, TurnError> {
        let utterance = Utterance::new(text);
        if utterance.tokens.is_empty() {
            return Ok(Intent::Unrecognized { hint: UNRECOGNIZED_HINT.to_string() });
        }

        for matcher in &self.matchers {
            let Some(found) = matcher.try_match(&utterance, context)? else {
                continue;
            };
            if found.confidence < self.min_confidence {
                debug!(
                    event_name = "agent.intent.below_threshold",
                    matcher = matcher.name(),
                    confidence = found.confidence,
                    min_confidence = self.min_confidence,
                );
                continue;
            }
            debug!(
                event_name = "agent.intent.matched",
                matcher = matcher.name(),
                confidence = found.confidence,
            );
            return Ok(found.intent);
        }

        Ok(Intent::Unrecognized { hint: UNRECOGNIZED_HINT.to_string() })
    }
}

/// Literal command forms such as `list products` or `mark order order_000001 as shipped`.
pub struct CommandSyntaxMatcher;

impl IntentMatcher for CommandSyntaxMatcher {
    fn name(&self) -> &'static str {
        "command_syntax"
    }

    fn try_match(
        &self,
        utterance: &Utterance,
        context: &SessionContext,
    ) -> Result<Option<Match>, TurnError> {
        let Some(operation) = parse_command(&utterance.tokens) else {
            return Ok(None);
        };
        let intent = intent_for(operation, &utterance.text, context)?;
        Ok(Some(Match { intent, confidence: 100 }))
    }
}

fn parse_command(tokens: &[Token]) -> Option<Operation> {
    let head: Vec<&str> = tokens.iter().take(2).map(|token| token.lower.as_str()).collect();
    let arg = |index: usize| tokens.get(index);

    let operation = match (head.as_slice(), tokens.len()) {
        (["list" | "show", "products"], 2) => Operation::ListProducts(ProductFilter::default()),
        (["list" | "show", "customers"], 2) => Operation::ListCustomers { query: None },
        (["list" | "show", "orders"], 2) => Operation::ListOrders { customer: None, status: None },
        (["low", "stock"], 2) => Operation::LowStock { threshold: None },
        (["low", "stock"], 3) => Operation::LowStock { threshold: Some(arg(2)?.integer()?) },
        (["get", "product"], 3) => Operation::LookupProduct(product_key(arg(2)?)),
        (["get", "customer"], 3) => {
            let token = arg(2)?;
            match token.entity_id() {
                Some(EntityKind::Customer) => Operation::LookupCustomer(Subject::Id(token.lower.clone())),
                _ => Operation::LookupCustomer(Subject::Key(token.email()?)),
            }
        }
        (["get", "order"], 3) => {
            let token = arg(2)?;
            (token.entity_id()? == EntityKind::Order).then_some(())?;
            Operation::LookupOrder(Subject::Id(token.lower.clone()))
        }
        (["search", "products"], count) if count > 2 => Operation::ListProducts(ProductFilter {
            query: Some(grammar::join(&tokens[2..])),
            ..ProductFilter::default()
        }),
        (["create", "product"], 5..=7) => {
            let name = arg(2).filter(|token| token.quoted)?.text.clone();
            let price = arg(3)?.amount()?;
            let sku = arg(4)?.sku()?;
            let mut category = None;
            let mut stock = None;
            for token in &tokens[5..] {
                match token.integer() {
                    Some(quantity) if stock.is_none() => stock = Some(quantity),
                    None if category.is_none() => category = Some(token.text.clone()),
                    _ => return None,
                }
            }
            Operation::CreateProduct { name: Some(name), price: Some(price), sku: Some(sku), category, stock }
        }
        (["create", "customer"], 5) => Operation::CreateCustomer {
            first_name: Some(arg(2)?.text.clone()),
            last_name: Some(arg(3)?.text.clone()),
            email: Some(arg(4)?.email()?),
            phone: None,
        },
        (["update" | "set", "stock"], 4) => Operation::UpdateStock {
            product: product_key(arg(2)?),
            quantity: arg(3)?.integer()?,
            operation: StockOperation::Set,
        },
        (["order", _], 5) => {
            let quantity = u32::try_from(arg(1)?.integer()?).ok()?;
            let product = Subject::Key(arg(2)?.sku()?);
            arg(3).filter(|token| token.is("for"))?;
            let customer = arg(4)?;
            (customer.entity_id()? == EntityKind::Customer).then_some(())?;
            Operation::CreateOrder {
                customer: Subject::Id(customer.lower.clone()),
                lines: vec![OrderLine { product, quantity }],
            }
        }
        (["mark", "order"], 5) => {
            let order = arg(2)?;
            (order.entity_id()? == EntityKind::Order).then_some(())?;
            arg(3).filter(|token| token.is("as"))?;
            Operation::UpdateOrderStatus {
                order: Subject::Id(order.lower.clone()),
                status: arg(4)?.order_status()?,
            }
        }
        _ => return None,
    };
    Some(operation)
}

fn product_key(token: &Token) -> Subject {
    match token.entity_id() {
        Some(EntityKind::Product) => Subject::Id(token.lower.clone()),
        _ => Subject::Key(token.sku().unwrap_or_else(|| token.text.clone())),
    }
}

/// Single-operation requests read from the keyword vocabulary.
pub struct KeywordMatcher;

impl IntentMatcher for KeywordMatcher {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn try_match(
        &self,
        utterance: &Utterance,
        context: &SessionContext,
    ) -> Result<Option<Match>, TurnError> {
        let parsed = grammar::parse_goal(&utterance.tokens);
        let [operation] = parsed.operations.as_slice() else {
            return Ok(None);
        };
        if matches!(operation, Operation::CreateProducts { .. }) {
            return Ok(None);
        }
        // Unexplained words lower confidence rather than being ignored.
        let confidence = if parsed.leftovers.is_empty() { parsed.strength } else { 40 };
        let intent = intent_for(operation.clone(), &utterance.text, context)?;
        Ok(Some(Match { intent, confidence }))
    }
}

/// Multi-operation goals and bulk requests, handed to the plan builder.
pub struct CompoundGoalMatcher;

impl IntentMatcher for CompoundGoalMatcher {
    fn name(&self) -> &'static str {
        "compound_goal"
    }

    fn try_match(
        &self,
        utterance: &Utterance,
        _context: &SessionContext,
    ) -> Result<Option<Match>, TurnError> {
        let parsed = grammar::parse_goal(&utterance.tokens);
        let bulk = parsed.operations.iter().any(|operation| matches!(operation, Operation::CreateProducts { .. }));
        if parsed.operations.len() < 2 && !bulk {
            return Ok(None);
        }
        if let Some(leftover) = parsed.leftovers.first() {
            return Err(TurnError::PlanningFailed(format!(
                "I understood part of that, but not \"{leftover}\". Rephrase that part or send it separately."
            )));
        }
        let intent = Intent::PlanRequest(GoalRequest {
            goal: utterance.text.clone(),
            operations: parsed.operations,
        });
        Ok(Some(Match { intent, confidence: 70 }))
    }
}

/// Turns one operation into a direct call when it can run as-is, or a goal otherwise.
fn intent_for(operation: Operation, text: &str, context: &SessionContext) -> Result<Intent, TurnError> {
    if operation.needs_plan() {
        return Ok(Intent::PlanRequest(GoalRequest { goal: text.to_string(), operations: vec![operation] }));
    }

    let mut source = RememberedIds { context };
    let mut calls = operation.calls(&mut source)?;
    let call = match (calls.pop(), calls.is_empty()) {
        (Some(call), true) => call,
        _ => {
            return Ok(Intent::PlanRequest(GoalRequest {
                goal: text.to_string(),
                operations: vec![operation],
            }))
        }
    };

    Ok(Intent::DirectCall { tool: call.tool.to_string(), arguments: literal_arguments(&call.bindings)? })
}

fn literal_arguments(bindings: &BTreeMap<String, Binding>) -> Result<Arguments, TurnError> {
    let resolved = BTreeMap::new();
    bindings
        .iter()
        .map(|(name, binding)| {
            binding.resolve(&resolved).map(|value| (name.clone(), value)).map_err(|missing| {
                TurnError::PlanningFailed(format!("argument `{name}` depends on {missing}"))
            })
        })
        .collect()
}

/// Resolves pronouns against the session's most recent ids.
struct RememberedIds<'a> {
    context: &'a SessionContext,
}

impl BindingSource for RememberedIds<'_> {
    fn contextual(&mut self, kind: EntityKind) -> Result<Binding, TurnError> {
        self.context
            .remembered(kind)
            .map(|id| Binding::literal(id.to_string()))
            .ok_or(TurnError::AmbiguousReference { kind })
    }

    fn generated_sku(&mut self) -> Option<String> {
        None
    }

    fn first_step(&self) -> Option<u32> {
        None
    }

    fn plan_tag(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use shopdesk_core::config::SessionConfig;
    use shopdesk_core::domain::EntityKind;
    use shopdesk_core::errors::TurnError;
    use shopdesk_core::tools::Arguments;

    use super::{Intent, IntentRecognizer};
    use crate::operation::{Operation, Subject};
    use crate::session::SessionContext;

    fn context() -> SessionContext {
        SessionContext::new("sess_test", &SessionConfig { history_capacity: 4, remembered_plans: 4 })
    }

    fn direct(tool: &str, arguments: serde_json::Value) -> Intent {
        let arguments: Arguments = match arguments {
            serde_json::Value::Object(map) => map,
            _ => Arguments::new(),
        };
        Intent::DirectCall { tool: tool.to_string(), arguments }
    }

    #[test]
    fn command_syntax_maps_to_exact_calls() {
        let recognizer = IntentRecognizer::new(60);
        let context = context();
        let cases = vec![
            ("list products", direct("search_products", json!({}))),
            ("show customers", direct("search_customers", json!({}))),
            ("low stock 3", direct("get_low_stock_products", json!({"threshold": 3}))),
            (
                "get product WID-001",
                direct("get_product", json!({"identifier": "WID-001", "search_by": "sku"})),
            ),
            ("get order order_000002", direct("get_order", json!({"order_id": "order_000002"}))),
            (
                "update stock WID-001 12",
                direct("update_stock", json!({"product_id": "WID-001", "quantity": 12})),
            ),
            (
                "order 2 WID-001 for cust_000001",
                direct(
                    "create_order",
                    json!({"customer_id": "cust_000001", "items": [{"sku": "WID-001", "quantity": 2}]}),
                ),
            ),
            (
                "mark order order_000001 as shipped",
                direct("update_order_status", json!({"order_id": "order_000001", "status": "shipped"})),
            ),
            (
                "create product \"Desk Lamp\" 24.50 LMP-001 Home 7",
                direct(
                    "create_product",
                    json!({"name": "Desk Lamp", "price": "24.50", "sku": "LMP-001", "category": "Home", "stock_quantity": 7}),
                ),
            ),
        ];

        for (text, expected) in cases {
            assert_eq!(recognizer.recognize(text, &context).expect(text), expected, "{text}");
        }
    }

    #[test]
    fn pronoun_resolves_to_remembered_id() {
        let recognizer = IntentRecognizer::new(60);
        let mut context = context();
        context.remember_entity(EntityKind::Product, "prod_000003");

        let intent = recognizer.recognize("update its stock to 10", &context).expect("intent");
        assert_eq!(intent, direct("update_stock", json!({"product_id": "prod_000003", "quantity": 10})));
    }

    #[test]
    fn pronoun_without_memory_is_ambiguous() {
        let recognizer = IntentRecognizer::new(60);
        let error = recognizer.recognize("set its stock to 5", &context()).expect_err("ambiguous");
        assert_eq!(error, TurnError::AmbiguousReference { kind: EntityKind::Product });
    }

    #[test]
    fn compound_goal_becomes_plan_request() {
        let recognizer = IntentRecognizer::new(60);
        let intent = recognizer
            .recognize("create a customer Jane Doe and order 2 units of product SKU WID-001 for her", &context())
            .expect("intent");

        let Intent::PlanRequest(goal) = intent else {
            panic!("expected a plan request, got {intent:?}");
        };
        assert_eq!(goal.operations.len(), 2);
        assert!(matches!(goal.operations[0], Operation::CreateCustomer { .. }));
        assert!(matches!(
            &goal.operations[1],
            Operation::CreateOrder { customer: Subject::Contextual, .. }
        ));
    }

    #[test]
    fn bulk_creation_is_planned() {
        let recognizer = IntentRecognizer::new(60);
        let intent = recognizer.recognize("create 5 products", &context()).expect("intent");
        assert!(matches!(intent, Intent::PlanRequest(_)));
    }

    #[test]
    fn small_talk_is_unrecognized() {
        let recognizer = IntentRecognizer::new(60);
        for text in ["", "good morning", "what a lovely day"] {
            let intent = recognizer.recognize(text, &context()).expect(text);
            assert!(matches!(intent, Intent::Unrecognized { .. }), "{text}: {intent:?}");
        }
    }
}
