use rust_decimal::Decimal;

use shopdesk_core::domain::customer::NewCustomer;
use shopdesk_core::domain::product::{NewProduct, PRODUCT_TEMPLATES};

use crate::repositories::{CustomerRepository, ProductRepository, RepositoryError};

const TEMPLATE_SKUS: &[&str] = &[
    "PROD-001", "PROD-002", "PROD-003", "PROD-004", "PROD-005", "PROD-006", "PROD-007",
    "PROD-008", "PROD-009", "PROD-010",
];

const WIDGET_SKU: &str = "WID-001";

struct SeedCustomer {
    email: &'static str,
    first_name: &'static str,
    last_name: &'static str,
    phone: &'static str,
}

const SEED_CUSTOMERS: &[SeedCustomer] = &[
    SeedCustomer {
        email: "john.doe@example.com",
        first_name: "John",
        last_name: "Doe",
        phone: "+1-555-1001",
    },
    SeedCustomer {
        email: "jane.smith@example.com",
        first_name: "Jane",
        last_name: "Smith",
        phone: "+1-555-1002",
    },
    SeedCustomer {
        email: "bob.wilson@example.com",
        first_name: "Bob",
        last_name: "Wilson",
        phone: "+1-555-1003",
    },
    SeedCustomer {
        email: "alice.brown@example.com",
        first_name: "Alice",
        last_name: "Brown",
        phone: "+1-555-1004",
    },
    SeedCustomer {
        email: "charlie.davis@example.com",
        first_name: "Charlie",
        last_name: "Davis",
        phone: "+1-555-1005",
    },
];

/// Demo catalogue: one product per template, the Blue Widget, and five customers.
///
/// Loading is idempotent; rows that already exist (matched by SKU or email) are left alone.
pub struct DemoCatalog;

impl DemoCatalog {
    pub async fn load(
        products: &dyn ProductRepository,
        customers: &dyn CustomerRepository,
    ) -> Result<SeedResult, RepositoryError> {
        let mut result = SeedResult::default();

        for product in Self::products() {
            if products.find_by_sku(&product.sku).await?.is_some() {
                result.products_existing += 1;
                continue;
            }
            products.create(product).await?;
            result.products_created += 1;
        }

        for seed in SEED_CUSTOMERS {
            if customers.find_by_email(seed.email).await?.is_some() {
                result.customers_existing += 1;
                continue;
            }
            customers
                .create(NewCustomer {
                    email: seed.email.to_string(),
                    first_name: seed.first_name.to_string(),
                    last_name: seed.last_name.to_string(),
                    phone: Some(seed.phone.to_string()),
                })
                .await?;
            result.customers_created += 1;
        }

        Ok(result)
    }

    pub async fn verify(
        products: &dyn ProductRepository,
        customers: &dyn CustomerRepository,
    ) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for sku in TEMPLATE_SKUS.iter().copied().chain(std::iter::once(WIDGET_SKU)) {
            checks.push((sku, products.find_by_sku(sku).await?.is_some()));
        }
        for seed in SEED_CUSTOMERS {
            checks.push((seed.email, customers.find_by_email(seed.email).await?.is_some()));
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    fn products() -> Vec<NewProduct> {
        let mut seeded: Vec<NewProduct> = PRODUCT_TEMPLATES
            .iter()
            .zip(TEMPLATE_SKUS)
            .enumerate()
            .map(|(index, (template, sku))| NewProduct {
                sku: (*sku).to_string(),
                name: template.name.to_string(),
                description: template.description.to_string(),
                price: template.price(),
                currency: "USD".to_string(),
                category: template.category.to_string(),
                stock_quantity: 20 + index as i64 * 3,
            })
            .collect();

        seeded.push(NewProduct {
            sku: WIDGET_SKU.to_string(),
            name: "Blue Widget".to_string(),
            description: "A sturdy blue widget".to_string(),
            price: Decimal::new(999, 2),
            currency: "USD".to_string(),
            category: "Tools".to_string(),
            stock_quantity: 50,
        });
        seeded
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedResult {
    pub products_created: usize,
    pub products_existing: usize,
    pub customers_created: usize,
    pub customers_existing: usize,
}

impl SeedResult {
    pub fn created(&self) -> usize {
        self.products_created + self.customers_created
    }
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
