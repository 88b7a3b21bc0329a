use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    AwaitingConfirmation,
    Executing,
    Completed,
    PartiallyFailed,
    Aborted,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Aborted => "aborted",
        }
    }

    /// A declined or superseded plan goes straight from AwaitingConfirmation to Aborted.
    pub fn can_transition_to(&self, next: PlanStatus) -> bool {
        matches!(
            (self, next),
            (PlanStatus::AwaitingConfirmation, PlanStatus::Executing)
                | (PlanStatus::AwaitingConfirmation, PlanStatus::Aborted)
                | (PlanStatus::Executing, PlanStatus::Completed)
                | (PlanStatus::Executing, PlanStatus::PartiallyFailed)
                | (PlanStatus::Executing, PlanStatus::Aborted)
        )
    }
}
