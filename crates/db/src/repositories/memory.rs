use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use shopdesk_core::domain::customer::{Customer, CustomerId, NewCustomer};
use shopdesk_core::domain::inventory::StockOperation;
use shopdesk_core::domain::order::{line_total, NewOrder, Order, OrderId, OrderItem, OrderStatus};
use shopdesk_core::domain::product::{NewProduct, Product, ProductId, ProductQuery, ProductUpdate};
use shopdesk_core::domain::EntityKind;

use super::customer::check_new_customer;
use super::product::{check_new_product, check_update};
use super::{CustomerRepository, OrderRepository, ProductRepository, RepositoryError};

#[derive(Default)]
struct MemoryState {
    sequences: HashMap<EntityKind, i64>,
    products: BTreeMap<String, Product>,
    customers: BTreeMap<String, Customer>,
    orders: BTreeMap<String, Order>,
}

impl MemoryState {
    fn next_id(&mut self, kind: EntityKind) -> String {
        let value = self.sequences.entry(kind).or_insert(0);
        *value += 1;
        kind.format_id(*value)
    }

    fn resolve_product(&self, identifier: &str) -> Option<&Product> {
        let identifier = identifier.trim();
        self.products
            .get(identifier)
            .or_else(|| self.products.values().find(|product| product.sku == identifier))
    }
}

/// Single-lock in-memory backing for all three repositories; used by tests and `--memory` runs.
#[derive(Default)]
pub struct InMemoryShop {
    state: RwLock<MemoryState>,
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryShop {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.products.get(&id.0).cloned())
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.products.values().find(|product| product.sku == sku).cloned())
    }

    async fn resolve(&self, identifier: &str) -> Result<Option<Product>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.resolve_product(identifier).cloned())
    }

    async fn search(&self, query: &ProductQuery) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .filter(|product| product.is_active && query.matches(product))
            .cloned()
            .collect())
    }

    async fn low_stock(&self, threshold: i64) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state.read().await;
        let mut low: Vec<Product> = state
            .products
            .values()
            .filter(|product| product.is_active && product.stock_quantity <= threshold)
            .cloned()
            .collect();
        low.sort_by(|a, b| a.stock_quantity.cmp(&b.stock_quantity).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(low)
    }

    async fn create(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        check_new_product(&product)?;
        let mut state = self.state.write().await;
        if state.products.values().any(|existing| existing.sku == product.sku) {
            return Err(RepositoryError::Conflict(format!(
                "a product with sku `{}` already exists",
                product.sku
            )));
        }

        let now = Utc::now();
        let created = Product {
            id: ProductId(state.next_id(EntityKind::Product)),
            sku: product.sku,
            name: product.name,
            description: product.description,
            price: product.price,
            currency: product.currency,
            category: product.category,
            stock_quantity: product.stock_quantity,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(created.id.0.clone(), created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        id: &ProductId,
        update: &ProductUpdate,
    ) -> Result<Product, RepositoryError> {
        check_update(update)?;
        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("no product with id `{id}`")))?;
        update.apply_to(product);
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn adjust_stock(
        &self,
        id: &ProductId,
        operation: StockOperation,
        quantity: i64,
    ) -> Result<Product, RepositoryError> {
        if quantity < 0 {
            return Err(RepositoryError::Rejected("stock quantity cannot be negative".to_string()));
        }
        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("no product with id `{id}`")))?;
        product.stock_quantity = operation.apply(product.stock_quantity, quantity);
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        Ok(self.state.read().await.products.len() as i64)
    }
}

#[async_trait::async_trait]
impl CustomerRepository for InMemoryShop {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.customers.get(&id.0).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, RepositoryError> {
        let state = self.state.read().await;
        let email = email.trim();
        Ok(state.customers.values().find(|customer| customer.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn search(&self, query: Option<&str>) -> Result<Vec<Customer>, RepositoryError> {
        let state = self.state.read().await;
        let query = query.unwrap_or_default();
        Ok(state.customers.values().filter(|customer| customer.matches(query)).cloned().collect())
    }

    async fn create(&self, customer: NewCustomer) -> Result<Customer, RepositoryError> {
        check_new_customer(&customer)?;
        let mut state = self.state.write().await;
        let email = customer.email.trim().to_string();
        if state.customers.values().any(|existing| existing.email.eq_ignore_ascii_case(&email)) {
            return Err(RepositoryError::Conflict(format!(
                "a customer with email `{email}` already exists"
            )));
        }

        let created = Customer {
            id: CustomerId(state.next_id(EntityKind::Customer)),
            email,
            first_name: customer.first_name.trim().to_string(),
            last_name: customer.last_name.trim().to_string(),
            phone: customer.phone,
            created_at: Utc::now(),
        };
        state.customers.insert(created.id.0.clone(), created.clone());
        Ok(created)
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        Ok(self.state.read().await.customers.len() as i64)
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryShop {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id.0).cloned())
    }

    async fn search(
        &self,
        customer_id: Option<&CustomerId>,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|order| customer_id.map_or(true, |id| &order.customer_id == id))
            .filter(|order| status.map_or(true, |status| order.status == status))
            .cloned()
            .collect())
    }

    async fn place(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        if order.lines.is_empty() {
            return Err(RepositoryError::Rejected("an order needs at least one item".to_string()));
        }
        let mut state = self.state.write().await;
        if !state.customers.contains_key(&order.customer_id.0) {
            return Err(RepositoryError::NotFound(format!(
                "no customer with id `{}`",
                order.customer_id
            )));
        }

        // Validate every line against a running reservation before touching stock.
        let mut reserved: HashMap<String, i64> = HashMap::new();
        let mut items = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            if line.quantity == 0 {
                return Err(RepositoryError::Rejected(format!(
                    "quantity for `{}` must be at least 1",
                    line.product
                )));
            }
            let product = state.resolve_product(&line.product).ok_or_else(|| {
                RepositoryError::NotFound(format!("no product with id or sku `{}`", line.product))
            })?;
            if !product.is_active {
                return Err(RepositoryError::Rejected(format!(
                    "product `{}` is no longer sold",
                    product.sku
                )));
            }
            let already = reserved.get(&product.id.0).copied().unwrap_or(0);
            let available = product.stock_quantity - already;
            let requested = i64::from(line.quantity);
            if requested > available {
                return Err(RepositoryError::Rejected(format!(
                    "insufficient stock for `{}`: requested {requested}, available {available}",
                    product.sku
                )));
            }
            reserved.insert(product.id.0.clone(), already + requested);
            items.push(OrderItem {
                product_id: product.id.clone(),
                sku: product.sku.clone(),
                quantity: line.quantity,
                unit_price: product.price,
                total_price: line_total(product.price, line.quantity),
            });
        }

        let now = Utc::now();
        for (product_id, quantity) in reserved {
            if let Some(product) = state.products.get_mut(&product_id) {
                product.stock_quantity -= quantity;
                product.updated_at = now;
            }
        }

        let total_amount: Decimal = items.iter().map(|item| item.total_price).sum();
        let placed = Order {
            id: OrderId(state.next_id(EntityKind::Order)),
            customer_id: order.customer_id,
            items,
            total_amount,
            currency: order.currency,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(placed.id.0.clone(), placed.clone());
        Ok(placed)
    }

    async fn update_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> Result<Order, RepositoryError> {
        let mut state = self.state.write().await;
        let mut order = state
            .orders
            .get(&id.0)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("no order with id `{id}`")))?;
        let previous = order.status;
        order.transition_to(status).map_err(|error| RepositoryError::Rejected(error.to_string()))?;
        order.updated_at = Utc::now();

        if status == OrderStatus::Cancelled && previous != OrderStatus::Cancelled {
            for item in &order.items {
                if let Some(product) = state.products.get_mut(&item.product_id.0) {
                    product.stock_quantity += i64::from(item.quantity);
                    product.updated_at = order.updated_at;
                }
            }
        }

        state.orders.insert(order.id.0.clone(), order.clone());
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use shopdesk_core::domain::customer::NewCustomer;
    use shopdesk_core::domain::order::{NewOrder, OrderLineRequest, OrderStatus};
    use shopdesk_core::domain::product::NewProduct;

    use crate::repositories::{
        CustomerRepository, InMemoryShop, OrderRepository, ProductRepository, RepositoryError,
    };

    async fn stocked_shop() -> InMemoryShop {
        let shop = InMemoryShop::default();
        ProductRepository::create(
            &shop,
            NewProduct {
                sku: "WID-001".to_string(),
                name: "Blue Widget".to_string(),
                description: String::new(),
                price: Decimal::new(999, 2),
                currency: "USD".to_string(),
                category: "Tools".to_string(),
                stock_quantity: 5,
            },
        )
        .await
        .expect("product");
        CustomerRepository::create(
            &shop,
            NewCustomer {
                email: "jane.doe@example.com".to_string(),
                first_name: "Jane".to_string(),
                last_name: "Doe".to_string(),
                phone: None,
            },
        )
        .await
        .expect("customer");
        shop
    }

    #[tokio::test]
    async fn in_memory_order_reserves_stock_across_duplicate_lines() {
        let shop = stocked_shop().await;
        let order = NewOrder {
            customer_id: shopdesk_core::CustomerId("cust_000001".to_string()),
            lines: vec![
                OrderLineRequest { product: "WID-001".to_string(), quantity: 3 },
                OrderLineRequest { product: "prod_000001".to_string(), quantity: 3 },
            ],
            currency: "USD".to_string(),
        };

        let error = shop.place(order).await.expect_err("over-reserved");
        assert!(matches!(error, RepositoryError::Rejected(_)));
        let product = shop.find_by_sku("WID-001").await.expect("find").expect("exists");
        assert_eq!(product.stock_quantity, 5);
    }

    #[tokio::test]
    async fn in_memory_shop_matches_sql_id_scheme() {
        let shop = stocked_shop().await;
        let order = shop
            .place(NewOrder {
                customer_id: shopdesk_core::CustomerId("cust_000001".to_string()),
                lines: vec![OrderLineRequest { product: "WID-001".to_string(), quantity: 2 }],
                currency: "USD".to_string(),
            })
            .await
            .expect("place");
        assert_eq!(order.id.0, "order_000001");
        assert_eq!(order.total_amount, Decimal::new(1998, 2));

        let shipped =
            shop.update_status(&order.id, OrderStatus::Confirmed).await.expect("confirm");
        assert_eq!(shipped.status, OrderStatus::Confirmed);
        assert_eq!(ProductRepository::count(&shop).await.expect("count"), 1);
    }
}
