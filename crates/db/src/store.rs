use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use shopdesk_core::domain::customer::{CustomerId, NewCustomer};
use shopdesk_core::domain::inventory::{InventoryLevel, StockOperation};
use shopdesk_core::domain::order::{NewOrder, OrderId, OrderLineRequest, OrderStatus};
use shopdesk_core::domain::product::{NewProduct, Product, ProductId, ProductQuery, ProductUpdate};
use shopdesk_core::errors::ToolError;
use shopdesk_core::tools::{Arguments, ToolInvoker, ToolRegistry, ToolSpec};

use crate::repositories::{
    CustomerRepository, InMemoryShop, OrderRepository, ProductRepository, SqlCustomerRepository,
    SqlOrderRepository, SqlProductRepository,
};
use crate::DbPool;

/// Dispatches registry tool calls onto the entity repositories.
#[derive(Clone)]
pub struct EntityStore {
    registry: Arc<ToolRegistry>,
    products: Arc<dyn ProductRepository>,
    customers: Arc<dyn CustomerRepository>,
    orders: Arc<dyn OrderRepository>,
    low_stock_threshold: i64,
}

impl EntityStore {
    pub fn new(
        registry: Arc<ToolRegistry>,
        products: Arc<dyn ProductRepository>,
        customers: Arc<dyn CustomerRepository>,
        orders: Arc<dyn OrderRepository>,
        low_stock_threshold: i64,
    ) -> Self {
        Self { registry, products, customers, orders, low_stock_threshold }
    }

    pub fn sql(pool: DbPool, registry: Arc<ToolRegistry>, low_stock_threshold: i64) -> Self {
        Self::new(
            registry,
            Arc::new(SqlProductRepository::new(pool.clone())),
            Arc::new(SqlCustomerRepository::new(pool.clone())),
            Arc::new(SqlOrderRepository::new(pool)),
            low_stock_threshold,
        )
    }

    pub fn in_memory(registry: Arc<ToolRegistry>, low_stock_threshold: i64) -> Self {
        let shop = Arc::new(InMemoryShop::default());
        Self::new(registry, shop.clone(), shop.clone(), shop, low_stock_threshold)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn products(&self) -> Arc<dyn ProductRepository> {
        self.products.clone()
    }

    pub fn customers(&self) -> Arc<dyn CustomerRepository> {
        self.customers.clone()
    }

    async fn dispatch(&self, spec: &ToolSpec, args: ArgReader<'_>) -> Result<Value, ToolError> {
        match spec.name.as_str() {
            "search_products" => {
                let query = ProductQuery {
                    text: args.opt_str("query")?,
                    category: args.opt_str("category")?,
                    min_price: args.opt_decimal("min_price")?,
                    max_price: args.opt_decimal("max_price")?,
                    in_stock_only: args.bool("in_stock_only")?,
                };
                to_value(&self.products.search(&query).await?)
            }
            "get_product" => {
                let identifier = args.str("identifier")?;
                let product = match args.str("search_by")?.as_str() {
                    "id" => self.products.find_by_id(&ProductId(identifier.clone())).await?,
                    "sku" => self.products.find_by_sku(&identifier).await?,
                    other => {
                        return Err(ToolError::Validation(format!(
                            "`search_by` must be `id` or `sku`, got `{other}`"
                        )))
                    }
                };
                let product = product.ok_or_else(|| {
                    ToolError::NotFound(format!("no product matching `{identifier}`"))
                })?;
                to_value(&product)
            }
            "create_product" => {
                let product = NewProduct {
                    sku: args.str("sku")?,
                    name: args.str("name")?,
                    description: args.str("description")?,
                    price: args.decimal("price")?,
                    currency: args.str("currency")?,
                    category: args.str("category")?,
                    stock_quantity: args.int("stock_quantity")?,
                };
                to_value(&self.products.create(product).await?)
            }
            "update_product" => {
                let product = self.locate_product(&args.str("product_id")?).await?;
                let update = parse_updates(args.value("updates"))?;
                to_value(&self.products.update(&product.id, &update).await?)
            }
            "update_stock" => {
                let product = self.locate_product(&args.str("product_id")?).await?;
                let operation = StockOperation::from_str(&args.str("operation")?)
                    .map_err(|error| ToolError::Validation(error.to_string()))?;
                let updated = self
                    .products
                    .adjust_stock(&product.id, operation, args.int("quantity")?)
                    .await?;
                to_value(&InventoryLevel::of(&updated, self.low_stock_threshold))
            }
            "get_low_stock_products" => {
                to_value(&self.products.low_stock(args.int("threshold")?).await?)
            }
            "search_customers" => {
                let query = args.opt_str("query")?;
                to_value(&self.customers.search(query.as_deref()).await?)
            }
            "get_customer" => {
                let identifier = args.str("identifier")?;
                let customer = match args.str("search_by")?.as_str() {
                    "id" => self.customers.find_by_id(&CustomerId(identifier.clone())).await?,
                    "email" => self.customers.find_by_email(&identifier).await?,
                    other => {
                        return Err(ToolError::Validation(format!(
                            "`search_by` must be `id` or `email`, got `{other}`"
                        )))
                    }
                };
                let customer = customer.ok_or_else(|| {
                    ToolError::NotFound(format!("no customer matching `{identifier}`"))
                })?;
                to_value(&customer)
            }
            "create_customer" => {
                let customer = NewCustomer {
                    email: args.str("email")?,
                    first_name: args.str("first_name")?,
                    last_name: args.str("last_name")?,
                    phone: args.opt_str("phone")?,
                };
                to_value(&self.customers.create(customer).await?)
            }
            "search_orders" => {
                let customer_id = args.opt_str("customer_id")?.map(CustomerId);
                let status = args.opt_str("status")?.map(|raw| parse_status(&raw)).transpose()?;
                to_value(&self.orders.search(customer_id.as_ref(), status).await?)
            }
            "get_order" => {
                let id = OrderId(args.str("order_id")?);
                let order = self
                    .orders
                    .find_by_id(&id)
                    .await?
                    .ok_or_else(|| ToolError::NotFound(format!("no order with id `{id}`")))?;
                to_value(&order)
            }
            "create_order" => {
                let order = NewOrder {
                    customer_id: CustomerId(args.str("customer_id")?),
                    lines: parse_order_lines(args.value("items"))?,
                    currency: args.str("currency")?,
                };
                to_value(&self.orders.place(order).await?)
            }
            "update_order_status" => {
                let id = OrderId(args.str("order_id")?);
                let status = parse_status(&args.str("status")?)?;
                to_value(&self.orders.update_status(&id, status).await?)
            }
            other => Err(ToolError::Internal(format!("tool `{other}` is registered but has no handler"))),
        }
    }

    async fn locate_product(&self, identifier: &str) -> Result<Product, ToolError> {
        self.products
            .resolve(identifier)
            .await?
            .ok_or_else(|| ToolError::NotFound(format!("no product with id or sku `{identifier}`")))
    }
}

#[async_trait]
impl ToolInvoker for EntityStore {
    async fn invoke(&self, tool: &str, arguments: &Arguments) -> Result<Value, ToolError> {
        let spec = self.registry.validate_call(tool, arguments)?;
        let result = self.dispatch(spec, ArgReader { spec, arguments }).await;

        match &result {
            Ok(_) => debug!(event_name = "db.tool.invoked", tool, "tool call succeeded"),
            Err(error) => warn!(
                event_name = "db.tool.failed",
                tool,
                error_kind = error.kind().code(),
                error = %error,
                "tool call failed"
            ),
        }
        result
    }
}

/// Reads validated arguments, falling back to the parameter default.
struct ArgReader<'a> {
    spec: &'a ToolSpec,
    arguments: &'a Arguments,
}

impl ArgReader<'_> {
    fn value(&self, name: &str) -> Option<&Value> {
        self.arguments
            .get(name)
            .filter(|value| !value.is_null())
            .or_else(|| self.spec.param(name).and_then(|param| param.default.as_ref()))
    }

    fn missing(&self, name: &str) -> ToolError {
        ToolError::Validation(format!("`{}` requires parameter `{name}`", self.spec.name))
    }

    fn opt_str(&self, name: &str) -> Result<Option<String>, ToolError> {
        Ok(self
            .value(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string))
    }

    fn str(&self, name: &str) -> Result<String, ToolError> {
        match self.value(name) {
            Some(Value::String(text)) => Ok(text.trim().to_string()),
            _ => Err(self.missing(name)),
        }
    }

    fn int(&self, name: &str) -> Result<i64, ToolError> {
        self.value(name).and_then(Value::as_i64).ok_or_else(|| self.missing(name))
    }

    fn bool(&self, name: &str) -> Result<bool, ToolError> {
        Ok(self.value(name).and_then(Value::as_bool).unwrap_or(false))
    }

    fn opt_decimal(&self, name: &str) -> Result<Option<Decimal>, ToolError> {
        self.value(name).map(|value| decimal_of(name, value)).transpose()
    }

    fn decimal(&self, name: &str) -> Result<Decimal, ToolError> {
        self.opt_decimal(name)?.ok_or_else(|| self.missing(name))
    }
}

fn decimal_of(name: &str, value: &Value) -> Result<Decimal, ToolError> {
    let raw = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        other => {
            return Err(ToolError::Validation(format!("`{name}` must be a number, got {other}")))
        }
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| ToolError::Validation(format!("`{name}` must be a number, got `{raw}`")))
}

fn parse_status(raw: &str) -> Result<OrderStatus, ToolError> {
    OrderStatus::from_str(raw).map_err(|error| ToolError::Validation(error.to_string()))
}

fn parse_updates(value: Option<&Value>) -> Result<ProductUpdate, ToolError> {
    let Some(Value::Object(fields)) = value else {
        return Err(ToolError::Validation("`updates` must be an object".to_string()));
    };

    let mut update = ProductUpdate::default();
    for (field, value) in fields {
        let text = || {
            value.as_str().map(str::to_string).ok_or_else(|| {
                ToolError::Validation(format!("update field `{field}` must be a string"))
            })
        };
        match field.as_str() {
            "name" => update.name = Some(text()?),
            "description" => update.description = Some(text()?),
            "category" => update.category = Some(text()?),
            "price" => update.price = Some(decimal_of("price", value)?),
            "is_active" => {
                update.is_active = Some(value.as_bool().ok_or_else(|| {
                    ToolError::Validation("update field `is_active` must be a boolean".to_string())
                })?)
            }
            other => {
                return Err(ToolError::Validation(format!(
                    "`{other}` cannot be changed with update_product"
                )))
            }
        }
    }

    if update.is_empty() {
        return Err(ToolError::Validation("`updates` names no fields to change".to_string()));
    }
    Ok(update)
}

fn parse_order_lines(value: Option<&Value>) -> Result<Vec<OrderLineRequest>, ToolError> {
    let Some(Value::Array(items)) = value else {
        return Err(ToolError::Validation("`items` must be an array".to_string()));
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let product = item
                .get("product_id")
                .or_else(|| item.get("sku"))
                .and_then(Value::as_str)
                .filter(|text| !text.trim().is_empty())
                .ok_or_else(|| {
                    ToolError::Validation(format!("item {} needs a `product_id` or `sku`", index + 1))
                })?;
            let quantity = item
                .get("quantity")
                .and_then(Value::as_u64)
                .and_then(|quantity| u32::try_from(quantity).ok())
                .ok_or_else(|| {
                    ToolError::Validation(format!(
                        "item {} needs a positive integer `quantity`",
                        index + 1
                    ))
                })?;
            Ok(OrderLineRequest { product: product.trim().to_string(), quantity })
        })
        .collect()
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|error| ToolError::Internal(format!("failed to encode tool result: {error}")))
}
