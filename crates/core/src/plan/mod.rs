pub mod model;
pub mod states;

pub use model::{Binding, Plan, PlanId, PlanStep, StepFailure, UnresolvedReference};
pub use states::{PlanStatus, StepStatus};
