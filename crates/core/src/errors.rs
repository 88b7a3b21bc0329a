use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::order::OrderStatus;
use crate::domain::EntityKind;
use crate::plan::states::PlanStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid order transition from {from} to {to}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Stable classification shared by turn, plan, and step failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unrecognized,
    AmbiguousReference,
    PlanningFailed,
    UnresolvedBinding,
    ValidationError,
    Transient,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unrecognized => "unrecognized",
            Self::AmbiguousReference => "ambiguous_reference",
            Self::PlanningFailed => "planning_failed",
            Self::UnresolvedBinding => "unresolved_binding",
            Self::ValidationError => "validation_error",
            Self::Transient => "transient",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

/// Typed failures of the tool invocation interface.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("transient backend failure: {0}")]
    Transient(String),
    #[error("internal tool failure: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(message)
            | Self::Validation(message)
            | Self::Transient(message)
            | Self::Internal(message) => message,
        }
    }
}

/// Intent and plan level failures. Terminal for the turn and shown to the user as-is.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("{hint}")]
    Unrecognized { hint: String },
    #[error("I don't know which {kind} you mean. Mention its id first, or look it up before referring to it.")]
    AmbiguousReference { kind: EntityKind },
    #[error("{0}")]
    PlanningFailed(String),
}

impl TurnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unrecognized { .. } => ErrorKind::Unrecognized,
            Self::AmbiguousReference { .. } => ErrorKind::AmbiguousReference,
            Self::PlanningFailed(_) => ErrorKind::PlanningFailed,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,
    #[error("plan has {count} steps, the limit is {max}")]
    TooManySteps { count: usize, max: usize },
    #[error("step {step} uses unknown tool `{tool}`")]
    UnknownTool { step: u32, tool: String },
    #[error("step {step} has id out of sequence (expected {expected})")]
    StepOutOfSequence { step: u32, expected: u32 },
    #[error("step {step} references step {target}, which does not come before it")]
    ForwardReference { step: u32, target: u32 },
    #[error("step {step} references field `{field}` which step {target} (`{tool}`) does not return")]
    UnknownField { step: u32, target: u32, tool: String, field: String },
    #[error("step {step} references step {target}, whose tool `{tool}` returns a list")]
    ListReference { step: u32, target: u32, tool: String },
    #[error("step {step} repeats over step {target}, whose tool `{tool}` returns a single object")]
    EachOverSingle { step: u32, target: u32, tool: String },
    #[error("step {step} repeats over more than one earlier step")]
    MixedFanOut { step: u32 },
    #[error("step {step} binds unknown parameter `{param}` of `{tool}`")]
    UnknownParameter { step: u32, tool: String, param: String },
    #[error("step {step} is missing required parameter `{param}` of `{tool}`")]
    MissingParameter { step: u32, tool: String, param: String },
    #[error("invalid plan transition from {from:?} to {to:?}")]
    InvalidTransition { from: PlanStatus, to: PlanStatus },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("unknown session `{0}`")]
    UnknownSession(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Plan(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::UnknownSession(session_id) => Self::BadRequest {
                message: format!("unknown session `{session_id}`"),
                correlation_id: unassigned(),
            },
            ApplicationError::Tool(error) => match error {
                ToolError::NotFound(message) | ToolError::Validation(message) => {
                    Self::BadRequest { message, correlation_id: unassigned() }
                }
                ToolError::Transient(message) => {
                    Self::ServiceUnavailable { message, correlation_id: unassigned() }
                }
                ToolError::Internal(message) => {
                    Self::Internal { message, correlation_id: unassigned() }
                }
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}
