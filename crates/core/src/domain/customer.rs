use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub String);

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sample names used when seeding demo customers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CustomerTemplate {
    pub first_name: &'static str,
    pub last_name: &'static str,
}

pub const CUSTOMER_TEMPLATES: [CustomerTemplate; 6] = [
    CustomerTemplate { first_name: "Emma", last_name: "Johnson" },
    CustomerTemplate { first_name: "Liam", last_name: "Smith" },
    CustomerTemplate { first_name: "Olivia", last_name: "Brown" },
    CustomerTemplate { first_name: "Noah", last_name: "Davis" },
    CustomerTemplate { first_name: "Ava", last_name: "Wilson" },
    CustomerTemplate { first_name: "Lucas", last_name: "Garcia" },
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.email.to_ascii_lowercase().contains(&needle)
            || self.full_name().to_ascii_lowercase().contains(&needle)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCustomer {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}
