//! Conversational layer of shopdesk.
//!
//! An utterance goes through the [`intent`] matchers, multi-step goals through the
//! [`planner`], and confirmed plans through the [`executor`] against a
//! [`ToolInvoker`](shopdesk_core::tools::ToolInvoker). [`runtime::AgentRuntime`] ties the
//! pieces together per session and owns the confirmation protocol.

pub mod executor;
pub mod grammar;
pub mod intent;
pub mod operation;
pub mod planner;
pub mod reply;
pub mod runtime;
pub mod session;

#[cfg(test)]
mod testing;

pub use executor::{CancelHandle, RetryPolicy, StepExecutor};
pub use intent::{GoalRequest, Intent, IntentMatcher, IntentRecognizer};
pub use planner::PlanBuilder;
pub use reply::{Reply, ReplyMessage};
pub use runtime::AgentRuntime;
pub use session::{SessionContext, SessionStore};
