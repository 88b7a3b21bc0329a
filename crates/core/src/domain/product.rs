use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub currency: String,
    pub category: String,
    pub stock_quantity: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub currency: String,
    pub category: String,
    pub stock_quantity: i64,
}

/// Partial update applied by `update_product`. `None` leaves the column untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

impl ProductUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.category.is_none()
            && self.is_active.is_none()
    }

    pub fn apply_to(&self, product: &mut Product) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(category) = &self.category {
            product.category = category.clone();
        }
        if let Some(is_active) = self.is_active {
            product.is_active = is_active;
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductQuery {
    pub text: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub in_stock_only: bool,
}

impl ProductQuery {
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(text) = self.text.as_deref().filter(|text| !text.trim().is_empty()) {
            let needle = text.to_ascii_lowercase();
            let in_name = product.name.to_ascii_lowercase().contains(&needle);
            let in_description = product.description.to_ascii_lowercase().contains(&needle);
            let in_sku = product.sku.to_ascii_lowercase().contains(&needle);
            if !(in_name || in_description || in_sku) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if !product.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if self.min_price.is_some_and(|min| product.price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| product.price > max) {
            return false;
        }
        !(self.in_stock_only && product.stock_quantity <= 0)
    }
}

/// Catalogue archetypes used for demo data and generated bulk products.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProductTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub price_cents: i64,
}

impl ProductTemplate {
    pub fn price(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }
}

pub const PRODUCT_TEMPLATES: &[ProductTemplate] = &[
    ProductTemplate {
        name: "Laptop Pro 15",
        description: "15-inch laptop with 16GB RAM",
        category: "Electronics",
        price_cents: 129_999,
    },
    ProductTemplate {
        name: "Wireless Mouse",
        description: "Ergonomic wireless mouse",
        category: "Electronics",
        price_cents: 4_999,
    },
    ProductTemplate {
        name: "Running Shoes",
        description: "Lightweight running shoes",
        category: "Sports",
        price_cents: 12_999,
    },
    ProductTemplate {
        name: "Coffee Maker",
        description: "12-cup programmable coffee maker",
        category: "Home",
        price_cents: 8_999,
    },
    ProductTemplate {
        name: "Python Book",
        description: "Practical programming guide",
        category: "Books",
        price_cents: 3_999,
    },
    ProductTemplate {
        name: "Desk Chair",
        description: "Adjustable office chair",
        category: "Furniture",
        price_cents: 19_999,
    },
    ProductTemplate {
        name: "Bluetooth Speaker",
        description: "Portable waterproof speaker",
        category: "Electronics",
        price_cents: 7_999,
    },
    ProductTemplate {
        name: "Yoga Mat",
        description: "Non-slip exercise mat",
        category: "Sports",
        price_cents: 2_999,
    },
    ProductTemplate {
        name: "Kitchen Knife",
        description: "8-inch chef's knife",
        category: "Home",
        price_cents: 5_999,
    },
    ProductTemplate {
        name: "Notebook",
        description: "A5 dotted notebook",
        category: "Office",
        price_cents: 1_299,
    },
];
