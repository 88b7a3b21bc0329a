pub mod catalog;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::EntityKind;
use crate::errors::ToolError;

pub use registry::{RegistryError, ToolRegistry};

pub type Arguments = Map<String, Value>;

/// The tool invocation seam consumed by the step executor.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool: &str, arguments: &Arguments) -> Result<Value, ToolError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            // Decimal amounts travel as strings once they have been through a tool result.
            Self::Number => {
                value.is_number()
                    || value.as_str().is_some_and(|raw| raw.trim().parse::<f64>().is_ok())
            }
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, ty: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: true,
            default: None,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, ty: ParamType, description: &str) -> Self {
        Self { required: false, ..Self::required(name, ty, description) }
    }

    pub fn with_default(name: &str, ty: ParamType, default: Value, description: &str) -> Self {
        Self { default: Some(default), ..Self::optional(name, ty, description) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    Single,
    List,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResultSchema {
    pub shape: ResultShape,
    pub fields: Vec<String>,
    /// Field carrying the id of the entity the result describes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_field: Option<String>,
}

impl ResultSchema {
    pub fn single(fields: &[&str], id_field: &str) -> Self {
        Self {
            shape: ResultShape::Single,
            fields: fields.iter().map(|field| field.to_string()).collect(),
            id_field: Some(id_field.to_string()),
        }
    }

    pub fn list(fields: &[&str]) -> Self {
        Self {
            shape: ResultShape::List,
            fields: fields.iter().map(|field| field.to_string()).collect(),
            id_field: None,
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|known| known == field)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    Read,
    Mutate,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub result: ResultSchema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityKind>,
    pub effect: ToolEffect,
}

impl ToolSpec {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|param| param.name == name)
    }

    pub fn is_mutating(&self) -> bool {
        self.effect == ToolEffect::Mutate
    }

    /// Checks presence and JSON type only. Defaults are left for the tool to apply.
    pub fn validate_arguments(&self, arguments: &Arguments) -> Result<(), ToolError> {
        for (name, value) in arguments {
            let Some(param) = self.param(name) else {
                return Err(ToolError::Validation(format!(
                    "`{}` has no parameter named `{name}`",
                    self.name
                )));
            };
            if value.is_null() && !param.required {
                continue;
            }
            if !param.ty.accepts(value) {
                return Err(ToolError::Validation(format!(
                    "`{}.{name}` expects {}, got {value}",
                    self.name,
                    param.ty.as_str()
                )));
            }
        }

        for param in self.params.iter().filter(|param| param.required) {
            let present = arguments.get(&param.name).is_some_and(|value| !value.is_null());
            if !present {
                return Err(ToolError::Validation(format!(
                    "`{}` requires parameter `{}`",
                    self.name, param.name
                )));
            }
        }

        Ok(())
    }
}
