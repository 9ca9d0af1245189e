pub mod process;
pub mod registry;
pub mod schema;

use async_trait::async_trait;
use homeagent_core::{ComplexityTier, DeclaredTool};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use process::ProcessProvider;
pub use registry::{Constructor, HandlerRef, HandlerRegistry, ModuleContext};

/// Truncate a string to at most `max_chars` bytes, respecting UTF-8 char boundaries.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }
    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Result of one capability invocation: `{status, result?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the backing system could not be reached at all.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unreachable: bool,
}

impl ToolOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            status: OutcomeStatus::Success,
            result: Some(result),
            error: None,
            unreachable: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            result: None,
            error: Some(message.into()),
            unreachable: false,
        }
    }

    /// Network or timeout failure talking to the backing system.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            unreachable: true,
            ..Self::error(message)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Content of the tool-result message fed back to the model.
    pub fn to_message_content(&self) -> String {
        match self.status {
            OutcomeStatus::Success => match &self.result {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => "{}".to_string(),
            },
            OutcomeStatus::Error => serde_json::json!({
                "error": self.error.as_deref().unwrap_or("unknown error"),
            })
            .to_string(),
        }
    }
}

/// The boundary to a module's backing implementation.
///
/// Implementations must never panic or hang forever on network trouble:
/// report it as [`ToolOutcome::unreachable`] instead.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Tools this instance exposes. Called once per load.
    fn tools(&self) -> Vec<DeclaredTool>;

    /// Replaces the manifest description when set.
    fn description(&self) -> Option<String> {
        None
    }

    /// Replaces the manifest complexity tier when set.
    fn complexity(&self) -> Option<ComplexityTier> {
        None
    }

    /// Replaces the manifest LLM-provider override when set.
    fn provider(&self) -> Option<String> {
        None
    }

    async fn execute(&self, tool: &str, args: Map<String, Value>) -> ToolOutcome;

    /// Called when the module is unloaded or replaced.
    async fn shutdown(&self) {}
}
