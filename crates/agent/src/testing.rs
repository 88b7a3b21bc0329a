use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use shopdesk_core::errors::ToolError;
use shopdesk_core::tools::{Arguments, ToolInvoker};

/// Fake invoker answering from per-tool scripts and recording every call.
#[derive(Default)]
pub struct ScriptedInvoker {
    state: Mutex<ScriptedState>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct ScriptedState {
    scripts: HashMap<String, VecDeque<Result<Value, ToolError>>>,
    calls: Vec<(String, Arguments)>,
}

impl ScriptedInvoker {
    /// Every call takes `delay` before answering, like a slow backend.
    pub fn delayed(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub async fn script(&self, tool: &str, results: Vec<Result<Value, ToolError>>) {
        let mut state = self.state.lock().await;
        state.scripts.entry(tool.to_owned()).or_default().extend(results);
    }

    pub async fn calls(&self) -> Vec<(String, Arguments)> {
        self.state.lock().await.calls.clone()
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(&self, tool: &str, arguments: &Arguments) -> Result<Value, ToolError> {
        let outcome = {
            let mut state = self.state.lock().await;
            state.calls.push((tool.to_owned(), arguments.clone()));
            state
                .scripts
                .get_mut(tool)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(ToolError::Internal(format!("no scripted result for `{tool}`"))))
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
