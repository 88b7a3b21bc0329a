pub mod config;
pub mod domain;
pub mod errors;
pub mod plan;
pub mod tools;

pub use domain::customer::{Customer, CustomerId, NewCustomer};
pub use domain::inventory::{InventoryLevel, StockOperation};
pub use domain::order::{NewOrder, Order, OrderId, OrderItem, OrderLineRequest, OrderStatus};
pub use domain::product::{
    NewProduct, Product, ProductId, ProductQuery, ProductTemplate, ProductUpdate, PRODUCT_TEMPLATES,
};
pub use domain::EntityKind;
pub use errors::{
    ApplicationError, DomainError, ErrorKind, InterfaceError, PlanError, ToolError, TurnError,
};
pub use plan::{Binding, Plan, PlanId, PlanStatus, PlanStep, StepFailure, StepStatus};
pub use tools::{Arguments, ToolInvoker, ToolRegistry, ToolSpec};
