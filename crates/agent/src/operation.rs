use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use shopdesk_core::domain::customer::CUSTOMER_TEMPLATES;
use shopdesk_core::domain::inventory::StockOperation;
use shopdesk_core::domain::order::OrderStatus;
use shopdesk_core::domain::product::{ProductTemplate, PRODUCT_TEMPLATES};
use shopdesk_core::domain::EntityKind;
use shopdesk_core::errors::TurnError;
use shopdesk_core::plan::Binding;

/// How an utterance names an entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    /// A generated id such as `cust_000004`.
    Id(String),
    /// A natural key: SKU for products, email for customers.
    Key(String),
    /// A pronoun, or nothing at all; filled from earlier steps or the session.
    Contextual,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderLine {
    pub product: Subject,
    pub quantity: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProductFilter {
    pub query: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub in_stock_only: bool,
}

/// One atomic entity operation read from a clause.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    CreateCustomer {
        first_name: Option<String>,
        last_name: Option<String>,
        email: Option<String>,
        phone: Option<String>,
    },
    CreateProduct {
        name: Option<String>,
        price: Option<Decimal>,
        sku: Option<String>,
        category: Option<String>,
        stock: Option<i64>,
    },
    CreateProducts {
        count: u32,
        category: Option<String>,
    },
    CreateOrder {
        customer: Subject,
        lines: Vec<OrderLine>,
    },
    UpdateStock {
        product: Subject,
        quantity: i64,
        operation: StockOperation,
    },
    UpdateProduct {
        product: Subject,
        price: Option<Decimal>,
        active: Option<bool>,
    },
    UpdateOrderStatus {
        order: Subject,
        status: OrderStatus,
    },
    LookupProduct(Subject),
    LookupCustomer(Subject),
    LookupOrder(Subject),
    ListProducts(ProductFilter),
    ListCustomers {
        query: Option<String>,
    },
    ListOrders {
        customer: Option<Subject>,
        status: Option<OrderStatus>,
    },
    LowStock {
        threshold: Option<i64>,
    },
    /// Sample products, customers, and orders placed between them.
    SetUpDemoStore {
        products: u32,
        customers: u32,
        orders: u32,
    },
    /// Adds `quantity` to every product the low-stock lookup returns.
    RestockLowStock {
        threshold: Option<i64>,
        quantity: i64,
    },
}

pub const DEMO_PRODUCTS: u32 = 5;
pub const DEMO_CUSTOMERS: u32 = 3;
pub const DEMO_ORDERS: u32 = 2;
pub const DEFAULT_RESTOCK_QUANTITY: i64 = 20;

/// Opening stock of demo products; enough for every demo order.
const DEMO_STOCK: i64 = 25;

/// A tool invocation with its argument bindings, ready to become a plan step.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub tool: &'static str,
    pub description: String,
    pub bindings: BTreeMap<String, Binding>,
}

/// Supplies what an operation cannot know from its own clause.
pub trait BindingSource {
    /// Value for an entity the text only alludes to (`her`, `that order`).
    fn contextual(&mut self, kind: EntityKind) -> Result<Binding, TurnError>;
    fn generated_sku(&mut self) -> Option<String>;
    /// Step id the operation's first call will get, when it becomes part of a plan.
    fn first_step(&self) -> Option<u32>;
    /// Short tag unique to the plan, used to keep generated emails apart.
    fn plan_tag(&self) -> Option<String>;
}

impl Operation {
    /// Entity kind whose id a successful call yields.
    pub fn produces(&self) -> Option<EntityKind> {
        match self {
            Self::CreateCustomer { .. } | Self::LookupCustomer(_) => Some(EntityKind::Customer),
            Self::CreateProduct { .. }
            | Self::CreateProducts { .. }
            | Self::UpdateStock { .. }
            | Self::UpdateProduct { .. }
            | Self::LookupProduct(_) => Some(EntityKind::Product),
            Self::CreateOrder { .. } | Self::UpdateOrderStatus { .. } | Self::LookupOrder(_) => {
                Some(EntityKind::Order)
            }
            Self::ListProducts(_)
            | Self::ListCustomers { .. }
            | Self::ListOrders { .. }
            | Self::LowStock { .. }
            | Self::SetUpDemoStore { .. }
            | Self::RestockLowStock { .. } => None,
        }
    }

    /// Kinds this operation refers to without naming them.
    pub fn contextual_kinds(&self) -> Vec<EntityKind> {
        let contextual = |subject: &Subject| *subject == Subject::Contextual;
        let mut kinds = Vec::new();
        match self {
            Self::CreateOrder { customer, lines } => {
                if contextual(customer) {
                    kinds.push(EntityKind::Customer);
                }
                if lines.iter().any(|line| contextual(&line.product)) {
                    kinds.push(EntityKind::Product);
                }
            }
            Self::UpdateStock { product, .. }
            | Self::UpdateProduct { product, .. }
            | Self::LookupProduct(product)
                if contextual(product) =>
            {
                kinds.push(EntityKind::Product)
            }
            Self::UpdateOrderStatus { order, .. } | Self::LookupOrder(order) if contextual(order) => {
                kinds.push(EntityKind::Order)
            }
            Self::LookupCustomer(customer) if contextual(customer) => kinds.push(EntityKind::Customer),
            Self::ListOrders { customer: Some(customer), .. } if contextual(customer) => {
                kinds.push(EntityKind::Customer)
            }
            _ => {}
        }
        kinds
    }

    /// Operations that cannot run as a single direct call.
    pub fn needs_plan(&self) -> bool {
        match self {
            Self::CreateProducts { .. } | Self::SetUpDemoStore { .. } | Self::RestockLowStock { .. } => true,
            Self::CreateProduct { sku, .. } => sku.is_none(),
            Self::CreateOrder { customer, .. } => matches!(customer, Subject::Key(_)),
            Self::ListOrders { customer, .. } => matches!(customer, Some(Subject::Key(_))),
            _ => false,
        }
    }

    pub fn calls(&self, source: &mut dyn BindingSource) -> Result<Vec<ToolCall>, TurnError> {
        let call = match self {
            Self::CreateCustomer { first_name, last_name, email, phone } => {
                let (Some(first), Some(last)) = (first_name, last_name) else {
                    return Err(TurnError::PlanningFailed(
                        "A new customer needs a first and last name, for example `create customer Jane Doe jane@example.com`."
                            .to_string(),
                    ));
                };
                let email = email.clone().unwrap_or_else(|| placeholder_email(first, last));
                let mut bindings = args([
                    ("email", literal(&email)),
                    ("first_name", literal(first)),
                    ("last_name", literal(last)),
                ]);
                if let Some(phone) = phone {
                    bindings.insert("phone".to_string(), literal(phone));
                }
                ToolCall {
                    tool: "create_customer",
                    description: format!("Create customer {first} {last} <{email}>"),
                    bindings,
                }
            }
            Self::CreateProduct { name, price, sku, category, stock } => {
                let Some(name) = name else {
                    return Err(TurnError::PlanningFailed(
                        "A new product needs a name. Quote it, for example `create product \"Desk Lamp\" 24.50 LMP-001`."
                            .to_string(),
                    ));
                };
                let Some(price) = price else {
                    return Err(TurnError::PlanningFailed(format!(
                        "I need a price for product `{name}`, for example `... at $24.50`."
                    )));
                };
                let sku = match sku {
                    Some(sku) => sku.clone(),
                    None => source.generated_sku().ok_or_else(|| {
                        TurnError::PlanningFailed(format!("Product `{name}` needs a SKU."))
                    })?,
                };
                let mut bindings = args([
                    ("name", literal(name)),
                    ("price", Binding::literal(price.to_string())),
                    ("sku", literal(&sku)),
                ]);
                if let Some(category) = category {
                    bindings.insert("category".to_string(), literal(category));
                }
                if let Some(stock) = stock {
                    bindings.insert("stock_quantity".to_string(), Binding::literal(*stock));
                }
                ToolCall {
                    tool: "create_product",
                    description: format!("Create product {name} ({sku}) at {price}"),
                    bindings,
                }
            }
            Self::CreateProducts { count, category } => {
                return bulk_products(*count, category.as_deref(), None, source);
            }
            Self::SetUpDemoStore { products, customers, orders } => {
                return demo_store(*products, *customers, *orders, source);
            }
            Self::RestockLowStock { threshold, quantity } => {
                return restock_low_stock(*threshold, *quantity, source);
            }
            Self::CreateOrder { customer, lines } => {
                let customer_id = match customer {
                    Subject::Id(id) => literal(id),
                    Subject::Key(email) => {
                        return Err(TurnError::PlanningFailed(format!(
                            "Look up customer {email} first so the order can use their id."
                        )))
                    }
                    Subject::Contextual => source.contextual(EntityKind::Customer)?,
                };
                let mut items = Vec::with_capacity(lines.len());
                let mut summary = Vec::with_capacity(lines.len());
                for line in lines {
                    let (field, product) = match &line.product {
                        Subject::Id(id) => ("product_id", literal(id)),
                        Subject::Key(sku) => ("sku", literal(sku)),
                        Subject::Contextual => ("product_id", source.contextual(EntityKind::Product)?),
                    };
                    summary.push(format!("{} x {}", line.quantity, product.describe()));
                    items.push(Binding::Record(
                        [
                            (field.to_string(), product),
                            ("quantity".to_string(), Binding::literal(line.quantity)),
                        ]
                        .into_iter()
                        .collect(),
                    ));
                }
                ToolCall {
                    tool: "create_order",
                    description: format!(
                        "Place order for customer {}: {}",
                        customer_id.describe(),
                        summary.join(", ")
                    ),
                    bindings: args([("customer_id", customer_id), ("items", collapse(items))]),
                }
            }
            Self::UpdateStock { product, quantity, operation } => {
                if *quantity < 0 {
                    return Err(TurnError::PlanningFailed(
                        "Stock quantities cannot be negative.".to_string(),
                    ));
                }
                let product = subject_binding(product, EntityKind::Product, source)?;
                let description = match operation {
                    StockOperation::Set => {
                        format!("Set stock of {} to {quantity}", product.describe())
                    }
                    StockOperation::Add => format!("Add {quantity} to stock of {}", product.describe()),
                    StockOperation::Subtract => {
                        format!("Remove {quantity} from stock of {}", product.describe())
                    }
                };
                let mut bindings =
                    args([("product_id", product), ("quantity", Binding::literal(*quantity))]);
                if *operation != StockOperation::Set {
                    let name = match operation {
                        StockOperation::Add => "add",
                        _ => "subtract",
                    };
                    bindings.insert("operation".to_string(), Binding::literal(name));
                }
                ToolCall { tool: "update_stock", description, bindings }
            }
            Self::UpdateProduct { product, price, active } => {
                let product = subject_binding(product, EntityKind::Product, source)?;
                let mut updates = Map::new();
                let mut changes = Vec::new();
                if let Some(price) = price {
                    updates.insert("price".to_string(), Value::String(price.to_string()));
                    changes.push(format!("price {price}"));
                }
                if let Some(active) = active {
                    updates.insert("is_active".to_string(), Value::Bool(*active));
                    changes.push(if *active { "reactivate" } else { "deactivate" }.to_string());
                }
                ToolCall {
                    tool: "update_product",
                    description: format!("Update product {}: {}", product.describe(), changes.join(", ")),
                    bindings: args([("product_id", product), ("updates", Binding::Literal(Value::Object(updates)))]),
                }
            }
            Self::UpdateOrderStatus { order, status } => {
                let order = subject_binding(order, EntityKind::Order, source)?;
                ToolCall {
                    tool: "update_order_status",
                    description: format!("Mark order {} as {}", order.describe(), status.as_str()),
                    bindings: args([("order_id", order), ("status", Binding::literal(status.as_str()))]),
                }
            }
            Self::LookupProduct(product) => {
                let mut bindings = BTreeMap::new();
                if let Subject::Key(_) = product {
                    bindings.insert("search_by".to_string(), Binding::literal("sku"));
                }
                let identifier = subject_binding(product, EntityKind::Product, source)?;
                let description = format!("Look up product {}", identifier.describe());
                bindings.insert("identifier".to_string(), identifier);
                ToolCall { tool: "get_product", description, bindings }
            }
            Self::LookupCustomer(customer) => {
                let mut bindings = BTreeMap::new();
                if let Subject::Key(_) = customer {
                    bindings.insert("search_by".to_string(), Binding::literal("email"));
                }
                let identifier = subject_binding(customer, EntityKind::Customer, source)?;
                let description = format!("Look up customer {}", identifier.describe());
                bindings.insert("identifier".to_string(), identifier);
                ToolCall { tool: "get_customer", description, bindings }
            }
            Self::LookupOrder(order) => {
                let order = subject_binding(order, EntityKind::Order, source)?;
                ToolCall {
                    tool: "get_order",
                    description: format!("Look up order {}", order.describe()),
                    bindings: args([("order_id", order)]),
                }
            }
            Self::ListProducts(filter) => {
                let mut bindings = BTreeMap::new();
                let mut criteria = Vec::new();
                if let Some(query) = &filter.query {
                    bindings.insert("query".to_string(), literal(query));
                    criteria.push(format!("matching \"{query}\""));
                }
                if let Some(category) = &filter.category {
                    bindings.insert("category".to_string(), literal(category));
                    criteria.push(format!("in {category}"));
                }
                if let Some(min) = filter.min_price {
                    bindings.insert("min_price".to_string(), Binding::literal(min.to_string()));
                    criteria.push(format!("from {min}"));
                }
                if let Some(max) = filter.max_price {
                    bindings.insert("max_price".to_string(), Binding::literal(max.to_string()));
                    criteria.push(format!("up to {max}"));
                }
                if filter.in_stock_only {
                    bindings.insert("in_stock_only".to_string(), Binding::literal(true));
                    criteria.push("in stock".to_string());
                }
                let description = if criteria.is_empty() {
                    "List products".to_string()
                } else {
                    format!("List products {}", criteria.join(", "))
                };
                ToolCall { tool: "search_products", description, bindings }
            }
            Self::ListCustomers { query } => {
                let mut bindings = BTreeMap::new();
                if let Some(query) = query {
                    bindings.insert("query".to_string(), literal(query));
                }
                let description = match query {
                    Some(query) => format!("Search customers matching \"{query}\""),
                    None => "List customers".to_string(),
                };
                ToolCall { tool: "search_customers", description, bindings }
            }
            Self::ListOrders { customer, status } => {
                let mut bindings = BTreeMap::new();
                let mut description = "List orders".to_string();
                if let Some(customer) = customer {
                    let binding = subject_binding(customer, EntityKind::Customer, source)?;
                    description.push_str(&format!(" for customer {}", binding.describe()));
                    bindings.insert("customer_id".to_string(), binding);
                }
                if let Some(status) = status {
                    description.push_str(&format!(" in status {}", status.as_str()));
                    bindings.insert("status".to_string(), Binding::literal(status.as_str()));
                }
                ToolCall { tool: "search_orders", description, bindings }
            }
            Self::LowStock { threshold } => {
                let mut bindings = BTreeMap::new();
                let description = match threshold {
                    Some(threshold) => {
                        bindings.insert("threshold".to_string(), Binding::literal(*threshold));
                        format!("List products with stock at or below {threshold}")
                    }
                    None => "List products that are low on stock".to_string(),
                };
                ToolCall { tool: "get_low_stock_products", description, bindings }
            }
        };
        Ok(vec![call])
    }
}

fn bulk_products(
    count: u32,
    category: Option<&str>,
    stock: Option<i64>,
    source: &mut dyn BindingSource,
) -> Result<Vec<ToolCall>, TurnError> {
    if count == 0 {
        return Err(TurnError::PlanningFailed("Create how many products? Zero is not enough.".to_string()));
    }
    let matching: Vec<&ProductTemplate> = PRODUCT_TEMPLATES
        .iter()
        .filter(|template| category.map_or(true, |wanted| template.category.eq_ignore_ascii_case(wanted)))
        .collect();
    let pool: Vec<&ProductTemplate> =
        if matching.is_empty() { PRODUCT_TEMPLATES.iter().collect() } else { matching };

    (0..count as usize)
        .map(|index| {
            let template = pool[index % pool.len()];
            let sku = source.generated_sku().ok_or_else(|| {
                TurnError::PlanningFailed("Bulk product creation needs generated SKUs.".to_string())
            })?;
            let category = category.map(str::to_string).unwrap_or_else(|| template.category.to_string());
            let price = template.price();
            let mut bindings = args([
                ("name", literal(template.name)),
                ("description", literal(template.description)),
                ("price", Binding::literal(price.to_string())),
                ("sku", literal(&sku)),
                ("category", literal(&category)),
            ]);
            if let Some(stock) = stock {
                bindings.insert("stock_quantity".to_string(), Binding::literal(stock));
            }
            Ok(ToolCall {
                tool: "create_product",
                description: format!("Create product {} ({sku}) at {price}", template.name),
                bindings,
            })
        })
        .collect()
}

/// Checks what exists, then creates products, customers, and orders tying them together.
fn demo_store(
    products: u32,
    customers: u32,
    orders: u32,
    source: &mut dyn BindingSource,
) -> Result<Vec<ToolCall>, TurnError> {
    if products == 0 && customers == 0 {
        return Err(TurnError::PlanningFailed(
            "A demo store needs at least one product or customer.".to_string(),
        ));
    }
    if orders > 0 && (products == 0 || customers == 0) {
        return Err(TurnError::PlanningFailed(
            "Demo orders need at least one product and one customer.".to_string(),
        ));
    }
    let (Some(first), Some(tag)) = (source.first_step(), source.plan_tag()) else {
        return Err(TurnError::PlanningFailed("A demo store can only be set up as a plan.".to_string()));
    };

    let mut calls = vec![
        ToolCall {
            tool: "search_products",
            description: "Check which products already exist".to_string(),
            bindings: BTreeMap::new(),
        },
        ToolCall {
            tool: "search_customers",
            description: "Check which customers already exist".to_string(),
            bindings: BTreeMap::new(),
        },
    ];

    let product_start = first + calls.len() as u32;
    if products > 0 {
        calls.extend(bulk_products(products, None, Some(DEMO_STOCK), source)?);
    }

    let customer_start = first + calls.len() as u32;
    let tag = tag.to_ascii_lowercase();
    for index in 0..customers as usize {
        let template = &CUSTOMER_TEMPLATES[index % CUSTOMER_TEMPLATES.len()];
        let email = format!(
            "{}.{}.{tag}{}@customers.invalid",
            slug(template.first_name),
            slug(template.last_name),
            index + 1
        );
        calls.push(ToolCall {
            tool: "create_customer",
            description: format!("Create customer {} {} <{email}>", template.first_name, template.last_name),
            bindings: args([
                ("email", literal(&email)),
                ("first_name", literal(template.first_name)),
                ("last_name", literal(template.last_name)),
            ]),
        });
    }

    for index in 0..orders {
        let customer = customer_start + index % customers;
        let product = product_start + index % products;
        let quantity = index % 3 + 1;
        let item = Binding::Record(
            [
                ("product_id".to_string(), Binding::reference(product, "id")),
                ("quantity".to_string(), Binding::literal(quantity)),
            ]
            .into_iter()
            .collect(),
        );
        calls.push(ToolCall {
            tool: "create_order",
            description: format!(
                "Place demo order: {quantity} x the product from step {product} for the customer from step {customer}"
            ),
            bindings: args([
                ("customer_id", Binding::reference(customer, "id")),
                ("items", Binding::List(vec![item])),
            ]),
        });
    }
    Ok(calls)
}

/// Looks up low-stock products, then adds stock to each one the lookup returns.
fn restock_low_stock(
    threshold: Option<i64>,
    quantity: i64,
    source: &mut dyn BindingSource,
) -> Result<Vec<ToolCall>, TurnError> {
    if quantity <= 0 {
        return Err(TurnError::PlanningFailed("Restock by how much? The amount must be positive.".to_string()));
    }
    let Some(lookup_step) = source.first_step() else {
        return Err(TurnError::PlanningFailed("Restocking can only run as a plan.".to_string()));
    };

    let mut lookup = BTreeMap::new();
    let description = match threshold {
        Some(threshold) => {
            lookup.insert("threshold".to_string(), Binding::literal(threshold));
            format!("List products with stock at or below {threshold}")
        }
        None => "List products that are low on stock".to_string(),
    };
    Ok(vec![
        ToolCall { tool: "get_low_stock_products", description, bindings: lookup },
        ToolCall {
            tool: "update_stock",
            description: format!("Add {quantity} to the stock of every product found by step {lookup_step}"),
            bindings: args([
                ("product_id", Binding::Each { step: lookup_step, field: "id".to_string() }),
                ("quantity", Binding::literal(quantity)),
                ("operation", Binding::literal("add")),
            ]),
        },
    ])
}

fn subject_binding(
    subject: &Subject,
    kind: EntityKind,
    source: &mut dyn BindingSource,
) -> Result<Binding, TurnError> {
    match subject {
        Subject::Id(value) | Subject::Key(value) => Ok(literal(value)),
        Subject::Contextual => source.contextual(kind),
    }
}

/// Folds a list of bindings into one literal when none of them refers to another step.
fn collapse(items: Vec<Binding>) -> Binding {
    let no_references = items.iter().all(|item| item.references().is_empty());
    if !no_references {
        return Binding::List(items);
    }
    let empty = BTreeMap::new();
    let values: Vec<Value> = items.iter().filter_map(|item| item.resolve(&empty).ok()).collect();
    Binding::Literal(Value::Array(values))
}

pub fn placeholder_email(first: &str, last: &str) -> String {
    format!("{}.{}@customers.invalid", slug(first), slug(last))
}

fn slug(name: &str) -> String {
    name.chars().filter(char::is_ascii_alphanumeric).collect::<String>().to_ascii_lowercase()
}

fn literal(value: &str) -> Binding {
    Binding::literal(value.to_string())
}

fn args<const N: usize>(pairs: [(&str, Binding); N]) -> BTreeMap<String, Binding> {
    pairs.into_iter().map(|(name, binding)| (name.to_string(), binding)).collect()
}
