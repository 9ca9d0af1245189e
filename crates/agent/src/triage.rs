use std::sync::Arc;

use homeagent_core::types::{ChatMessage, LLMResponse};
use homeagent_core::{AgentRequest, ComplexityTier, Result, ToolDefinition};
use homeagent_modules::ModuleEntry;
use homeagent_providers::LlmGateway;
use serde_json::json;
use tracing::{debug, info, warn};

pub const SELECT_MODULE: &str = "select_module";
pub const RESET_CONVERSATION: &str = "reset_conversation";
const TRIAGE_MODULE: &str = "triage";

/// What a request needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Triage {
    /// A greeting: clear the channel and skip module execution.
    Reset,
    Modules(Vec<String>),
}

/// Picks the modules a request needs with one cheap-tier model call.
pub struct TriageRouter {
    gateway: Arc<LlmGateway>,
}

impl TriageRouter {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    pub async fn route(
        &self,
        request: &AgentRequest,
        history: &[ChatMessage],
        available: &[Arc<ModuleEntry>],
    ) -> Result<Triage> {
        if available.is_empty() {
            debug!(user = %request.user, "No modules available, skipping triage");
            return Ok(Triage::Modules(Vec::new()));
        }

        let names: Vec<&str> = available.iter().map(|m| m.id.as_str()).collect();
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(&triage_prompt(request, available)));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(&request.text));

        let response = self
            .gateway
            .complete(&messages, &triage_tools(&names), ComplexityTier::Cheap, None)
            .await?;
        let triage = interpret(&response, &names);
        info!(user = %request.user, channel = %request.channel, triage = ?triage, "Triage complete");
        Ok(triage)
    }
}

fn triage_prompt(request: &AgentRequest, available: &[Arc<ModuleEntry>]) -> String {
    let mut prompt = String::from(
        "Decide which modules are needed to answer the user's last message. \
         Call select_module once for every module that is needed. \
         If the message is only a greeting, call reset_conversation instead. \
         If no module is needed, answer without calling any function.\n\nModules:\n",
    );
    for module in available {
        prompt.push_str(&format!("- {}: {}\n", module.id, module.description));
    }
    if let Some(loc) = &request.location {
        prompt.push_str(&format!("\nThe user is at {:.5},{:.5}.\n", loc.lat, loc.lon));
    }
    prompt
}

fn triage_tools(names: &[&str]) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            TRIAGE_MODULE,
            SELECT_MODULE,
            "Select a module whose tools are needed for this request. May be called several times.",
            json!({
                "type": "object",
                "properties": {
                    "module": {
                        "type": "string",
                        "enum": names,
                        "description": "Name of the module"
                    }
                },
                "required": ["module"],
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            TRIAGE_MODULE,
            RESET_CONVERSATION,
            "Start a fresh conversation. Only for greetings.",
            json!({"type": "object", "properties": {}, "additionalProperties": false}),
        ),
    ]
}

/// Reset wins over any selection. Names outside `allowed` are dropped.
fn interpret(response: &LLMResponse, allowed: &[&str]) -> Triage {
    if response.tool_calls.iter().any(|c| c.name == RESET_CONVERSATION) {
        return Triage::Reset;
    }
    let mut selected: Vec<String> = Vec::new();
    for call in &response.tool_calls {
        if call.name != SELECT_MODULE {
            warn!(function = %call.name, "Triage called an unknown function");
            continue;
        }
        let module = match call.parse_arguments() {
            Ok(args) => args.get("module").and_then(|v| v.as_str()).map(str::to_string),
            Err(e) => {
                warn!(error = %e, "Discarding unparsable triage selection");
                continue;
            }
        };
        match module {
            Some(name) if allowed.contains(&name.as_str()) => {
                if !selected.contains(&name) {
                    selected.push(name);
                }
            }
            Some(name) => warn!(module = %name, "Triage selected a module outside the available set"),
            None => warn!("Triage selection without a module name"),
        }
    }
    Triage::Modules(selected)
}
