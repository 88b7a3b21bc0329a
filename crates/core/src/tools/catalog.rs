use serde_json::json;

use crate::domain::EntityKind;
use crate::tools::{ParamSpec, ParamType, ResultSchema, ToolEffect, ToolSpec};

pub const PRODUCT_FIELDS: &[&str] = &[
    "id",
    "sku",
    "name",
    "description",
    "price",
    "currency",
    "category",
    "stock_quantity",
    "is_active",
    "created_at",
    "updated_at",
];

pub const CUSTOMER_FIELDS: &[&str] =
    &["id", "email", "first_name", "last_name", "phone", "created_at"];

pub const ORDER_FIELDS: &[&str] = &[
    "id",
    "customer_id",
    "items",
    "total_amount",
    "currency",
    "status",
    "created_at",
    "updated_at",
];

pub const INVENTORY_FIELDS: &[&str] = &["product_id", "sku", "stock_quantity", "low_stock"];

fn tool(
    name: &str,
    description: &str,
    params: Vec<ParamSpec>,
    result: ResultSchema,
    entity: EntityKind,
    effect: ToolEffect,
) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        params,
        result,
        entity: Some(entity),
        effect,
    }
}

pub fn shop_catalog(low_stock_threshold: i64) -> Vec<ToolSpec> {
    use EntityKind::{Customer, Order, Product};
    use ParamType::{Array, Boolean, Integer, Number, Object, String};
    use ToolEffect::{Mutate, Read};

    vec![
        tool(
            "search_products",
            "Search the catalogue by text, category, price range, and availability.",
            vec![
                ParamSpec::optional("query", String, "Text matched against name, description, and SKU"),
                ParamSpec::optional("category", String, "Exact category, case-insensitive"),
                ParamSpec::optional("min_price", Number, "Lowest price to include"),
                ParamSpec::optional("max_price", Number, "Highest price to include"),
                ParamSpec::with_default("in_stock_only", Boolean, json!(false), "Skip products with no stock"),
            ],
            ResultSchema::list(PRODUCT_FIELDS),
            Product,
            Read,
        ),
        tool(
            "get_product",
            "Fetch a single product by id or SKU.",
            vec![
                ParamSpec::required("identifier", String, "Product id or SKU"),
                ParamSpec::with_default("search_by", String, json!("id"), "Either `id` or `sku`"),
            ],
            ResultSchema::single(PRODUCT_FIELDS, "id"),
            Product,
            Read,
        ),
        tool(
            "create_product",
            "Add a product to the catalogue.",
            vec![
                ParamSpec::required("name", String, "Display name"),
                ParamSpec::required("price", Number, "Unit price"),
                ParamSpec::required("sku", String, "Unique stock keeping unit"),
                ParamSpec::with_default("description", String, json!(""), "Free-form description"),
                ParamSpec::with_default("currency", String, json!("USD"), "ISO currency code"),
                ParamSpec::with_default("category", String, json!("general"), "Catalogue category"),
                ParamSpec::with_default("stock_quantity", Integer, json!(0), "Initial stock"),
            ],
            ResultSchema::single(PRODUCT_FIELDS, "id"),
            Product,
            Mutate,
        ),
        tool(
            "update_product",
            "Change name, description, price, category, or active flag of a product.",
            vec![
                ParamSpec::required("product_id", String, "Product id or SKU"),
                ParamSpec::required("updates", Object, "Fields to change"),
            ],
            ResultSchema::single(PRODUCT_FIELDS, "id"),
            Product,
            Mutate,
        ),
        tool(
            "update_stock",
            "Set, add to, or subtract from a product's stock level.",
            vec![
                ParamSpec::required("product_id", String, "Product id or SKU"),
                ParamSpec::required("quantity", Integer, "Quantity to apply"),
                ParamSpec::with_default("operation", String, json!("set"), "One of set, add, subtract"),
            ],
            ResultSchema::single(INVENTORY_FIELDS, "product_id"),
            Product,
            Mutate,
        ),
        tool(
            "get_low_stock_products",
            "List active products at or below a stock threshold.",
            vec![ParamSpec::with_default(
                "threshold",
                Integer,
                json!(low_stock_threshold),
                "Stock level at or below which a product counts as low",
            )],
            ResultSchema::list(PRODUCT_FIELDS),
            Product,
            Read,
        ),
        tool(
            "search_customers",
            "Search customers by name or email.",
            vec![ParamSpec::optional("query", String, "Text matched against name and email")],
            ResultSchema::list(CUSTOMER_FIELDS),
            Customer,
            Read,
        ),
        tool(
            "get_customer",
            "Fetch a single customer by id or email.",
            vec![
                ParamSpec::required("identifier", String, "Customer id or email"),
                ParamSpec::with_default("search_by", String, json!("id"), "Either `id` or `email`"),
            ],
            ResultSchema::single(CUSTOMER_FIELDS, "id"),
            Customer,
            Read,
        ),
        tool(
            "create_customer",
            "Register a new customer.",
            vec![
                ParamSpec::required("email", String, "Unique email address"),
                ParamSpec::required("first_name", String, "Given name"),
                ParamSpec::required("last_name", String, "Family name"),
                ParamSpec::optional("phone", String, "Contact phone number"),
            ],
            ResultSchema::single(CUSTOMER_FIELDS, "id"),
            Customer,
            Mutate,
        ),
        tool(
            "search_orders",
            "List orders, optionally for one customer or in one status.",
            vec![
                ParamSpec::optional("customer_id", String, "Owning customer id"),
                ParamSpec::optional("status", String, "Order status"),
            ],
            ResultSchema::list(ORDER_FIELDS),
            Order,
            Read,
        ),
        tool(
            "get_order",
            "Fetch a single order with its items.",
            vec![ParamSpec::required("order_id", String, "Order id")],
            ResultSchema::single(ORDER_FIELDS, "id"),
            Order,
            Read,
        ),
        tool(
            "create_order",
            "Place an order; checks stock and decrements it.",
            vec![
                ParamSpec::required("customer_id", String, "Ordering customer id"),
                ParamSpec::required("items", Array, "Items as {product_id|sku, quantity}"),
                ParamSpec::with_default("currency", String, json!("USD"), "ISO currency code"),
            ],
            ResultSchema::single(ORDER_FIELDS, "id"),
            Order,
            Mutate,
        ),
        tool(
            "update_order_status",
            "Move an order through its fulfilment lifecycle.",
            vec![
                ParamSpec::required("order_id", String, "Order id"),
                ParamSpec::required("status", String, "pending, confirmed, shipped, delivered, or cancelled"),
            ],
            ResultSchema::single(ORDER_FIELDS, "id"),
            Order,
            Mutate,
        ),
    ]
}
