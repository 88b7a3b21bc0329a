use std::collections::BTreeMap;

use thiserror::Error;

use crate::errors::ToolError;
use crate::tools::catalog::shop_catalog;
use crate::tools::{Arguments, ToolSpec};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool `{0}` is registered twice")]
    DuplicateTool(String),
}

/// Read-only after start-up; shared across sessions behind an `Arc`.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shop(low_stock_threshold: i64) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for spec in shop_catalog(low_stock_threshold) {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if self.tools.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateTool(spec.name));
        }
        self.tools.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn validate_call(&self, tool: &str, arguments: &Arguments) -> Result<&ToolSpec, ToolError> {
        let spec = self
            .get(tool)
            .ok_or_else(|| ToolError::Validation(format!("unknown tool `{tool}`")))?;
        spec.validate_arguments(arguments)?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{RegistryError, ToolRegistry};
    use crate::domain::EntityKind;
    use crate::errors::ToolError;
    use crate::tools::{Arguments, ResultShape, ToolEffect};

    #[test]
    fn shop_registry_exposes_the_full_catalogue() {
        let registry = ToolRegistry::shop(10).expect("catalogue registers");
        let names: Vec<&str> = registry.specs().map(|spec| spec.name.as_str()).collect();
        assert_eq!(registry.len(), 13);
        for expected in [
            "search_products",
            "get_product",
            "create_product",
            "update_product",
            "update_stock",
            "get_low_stock_products",
            "search_customers",
            "get_customer",
            "create_customer",
            "search_orders",
            "get_order",
            "create_order",
            "update_order_status",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn catalogue_declares_effects_and_shapes() {
        let registry = ToolRegistry::shop(10).expect("catalogue registers");
        let create_customer = registry.get("create_customer").expect("create_customer");
        assert_eq!(create_customer.effect, ToolEffect::Mutate);
        assert_eq!(create_customer.entity, Some(EntityKind::Customer));
        assert!(create_customer.result.has_field("id"));

        let search = registry.get("search_products").expect("search_products");
        assert_eq!(search.effect, ToolEffect::Read);
        assert_eq!(search.result.shape, ResultShape::List);
    }

    #[test]
    fn low_stock_default_follows_configured_threshold() {
        let registry = ToolRegistry::shop(3).expect("catalogue registers");
        let threshold = registry
            .get("get_low_stock_products")
            .and_then(|spec| spec.param("threshold"))
            .and_then(|param| param.default.clone());
        assert_eq!(threshold, Some(json!(3)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::shop(10).expect("catalogue registers");
        let duplicate = registry.get("get_order").cloned().expect("get_order");
        assert_eq!(
            registry.register(duplicate),
            Err(RegistryError::DuplicateTool("get_order".to_string()))
        );
    }

    #[test]
    fn unknown_tool_is_a_validation_error() {
        let registry = ToolRegistry::shop(10).expect("catalogue registers");
        let result = registry.validate_call("delete_everything", &Arguments::new());
        assert!(matches!(result, Err(ToolError::Validation(_))));
    }
}
