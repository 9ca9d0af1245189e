use std::sync::Arc;

use homeagent_core::types::{ChatMessage, FinishReason, ToolCallRequest};
use homeagent_core::{AgentRequest, ComplexityTier, Error, Result};
use homeagent_modules::CapabilityCatalog;
use homeagent_providers::LlmGateway;
use homeagent_storage::ConversationHistoryStore;
use homeagent_tools::{safe_truncate, ToolOutcome};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::context::ContextBuilder;

/// Tool results longer than this are cut before going back to the model.
const MAX_TOOL_RESULT_CHARS: usize = 16_000;

/// How one execution session ended.
#[derive(Debug)]
pub struct SessionOutcome {
    pub result: Result<String>,
    pub iterations: u32,
    pub tier: ComplexityTier,
    pub provider: Option<String>,
}

/// Runs the bounded call-model / run-tools loop for one request.
pub struct ToolExecutionEngine {
    gateway: Arc<LlmGateway>,
    history: Arc<ConversationHistoryStore>,
    context: ContextBuilder,
    max_iterations: u32,
}

/// Working state of one request. Persisted writes go through here so the
/// user message always lands before anything produced for it.
struct ExecutionSession<'a> {
    history: &'a ConversationHistoryStore,
    key: String,
    user_message: Option<ChatMessage>,
    messages: Vec<ChatMessage>,
    iterations: u32,
}

impl ExecutionSession<'_> {
    fn persist(&mut self, batch: Vec<ChatMessage>) -> Result<()> {
        let mut all = Vec::with_capacity(batch.len() + 1);
        if let Some(user) = self.user_message.take() {
            all.push(user);
        }
        all.extend(batch);
        self.history.append_all(&self.key, all)
    }
}

impl ToolExecutionEngine {
    pub fn new(
        gateway: Arc<LlmGateway>,
        history: Arc<ConversationHistoryStore>,
        context: ContextBuilder,
        max_iterations: u32,
    ) -> Self {
        Self {
            gateway,
            history,
            context,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Produce the final answer for `request` using `catalog`. `selected`
    /// are the modules triage asked for; when they exist but expose no
    /// tools the model answers from general knowledge.
    pub async fn run(
        &self,
        request: &AgentRequest,
        selected: &[String],
        catalog: &CapabilityCatalog,
    ) -> SessionOutcome {
        let tier = request.tier.max(catalog.max_tier());
        let provider = catalog.agreed_provider().map(str::to_string);
        // Core tools are always in the catalog; only the selected modules count here.
        let capability_missing = !selected.is_empty()
            && !catalog.tools().iter().any(|t| selected.contains(&t.module));
        if capability_missing {
            info!(modules = ?selected, "Selected modules expose no tools, answering without them");
        }

        let key = request.history_key();
        let user_message = ChatMessage::user(&request.text);
        let mut session = ExecutionSession {
            history: self.history.as_ref(),
            key: key.clone(),
            user_message: Some(user_message.clone()),
            messages: Vec::new(),
            iterations: 0,
        };

        let result = match self.history.get(&key) {
            Ok(persisted) => {
                session.messages = self.context.ephemeral(request, capability_missing);
                session.messages.extend(persisted);
                session.messages.push(user_message);
                self.iterate(&mut session, request, catalog, tier, provider.as_deref())
                    .await
            }
            Err(e) => Err(e),
        };

        SessionOutcome {
            result,
            iterations: session.iterations,
            tier,
            provider,
        }
    }

    async fn iterate(
        &self,
        session: &mut ExecutionSession<'_>,
        request: &AgentRequest,
        catalog: &CapabilityCatalog,
        tier: ComplexityTier,
        provider: Option<&str>,
    ) -> Result<String> {
        info!(
            user = %request.user,
            channel = %request.channel,
            tools = catalog.tools().len(),
            tier = u8::from(tier),
            provider = provider.unwrap_or("default"),
            "Starting execution"
        );

        while session.iterations < self.max_iterations {
            check_cancelled(request)?;
            session.iterations += 1;
            debug!(iteration = session.iterations, "LLM call iteration");

            let response = self
                .gateway
                .complete(&session.messages, catalog.tools(), tier, provider)
                .await?;

            info!(
                iteration = session.iterations,
                content_len = response.content.as_ref().map(|c| c.len()).unwrap_or(0),
                tool_calls_count = response.tool_calls.len(),
                finish_reason = %response.finish_reason,
                "LLM response received"
            );

            match response.finish() {
                Some(FinishReason::Stop) => {
                    let answer = response.content.unwrap_or_default();
                    let mut batch = Vec::new();
                    if !answer.is_empty() {
                        batch.push(ChatMessage::assistant(&answer));
                    }
                    session.persist(batch)?;
                    return Ok(answer);
                }
                Some(FinishReason::ToolCalls) => {
                    let assistant = ChatMessage::assistant_tool_calls(
                        response.content.as_deref(),
                        response.tool_calls.clone(),
                    );
                    let mut batch = vec![assistant];
                    for call in &response.tool_calls {
                        check_cancelled(request)?;
                        let content = self.dispatch(catalog, call).await?;
                        batch.push(ChatMessage::tool_result(&call.id, &call.name, &content));
                    }
                    // Results are committed only once the whole batch ran, so
                    // history never holds tool calls without their results.
                    session.messages.extend(batch.iter().cloned());
                    session.persist(batch)?;
                }
                None => {
                    return Err(Error::Schedule(format!(
                        "unexpected finish reason '{}'",
                        response.finish_reason
                    )));
                }
            }
        }

        warn!(max_iterations = self.max_iterations, "Reached max iterations");
        Err(Error::Schedule(format!(
            "no final answer after {} iterations",
            self.max_iterations
        )))
    }

    /// Run one tool call. Argument problems and unknown tools become tool
    /// results the model can react to; an unreachable provider ends the
    /// session.
    async fn dispatch(&self, catalog: &CapabilityCatalog, call: &ToolCallRequest) -> Result<String> {
        let Some(target) = catalog.dispatch(&call.name) else {
            warn!(tool = %call.name, "Model called a tool outside the catalog");
            return Ok(json!({ "error": format!("Unknown tool: {}", call.name) }).to_string());
        };

        let args = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.name, module = %target.module, error = %e, "Bad tool arguments");
                return Ok(ToolOutcome::error(e.to_string()).to_message_content());
            }
        };

        debug!(tool = %call.name, module = %target.module, "Dispatching tool call");
        let outcome = target.handler.execute(&call.name, args).await;
        if outcome.unreachable {
            return Err(Error::Connection(format!(
                "module '{}' is unreachable: {}",
                target.module,
                outcome.error.as_deref().unwrap_or("no response")
            )));
        }
        if !outcome.is_success() {
            info!(tool = %call.name, module = %target.module, error = ?outcome.error, "Tool returned an error");
        }

        let content = outcome.to_message_content();
        Ok(safe_truncate(&content, MAX_TOOL_RESULT_CHARS).to_string())
    }
}

fn check_cancelled(request: &AgentRequest) -> Result<()> {
    if request.is_cancelled() {
        info!(user = %request.user, channel = %request.channel, "Request cancelled");
        return Err(Error::Cancelled(format!(
            "request from {} on {} was cancelled",
            request.user, request.channel
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use homeagent_core::config::AgentDefaults;
    use homeagent_core::types::{LLMResponse, Role};
    use homeagent_providers::{Provider, ProviderEntry, ShapingProfile};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Scripted {
        responses: Mutex<VecDeque<LLMResponse>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl Provider for Scripted {
        async fn chat(&self, messages: &[ChatMessage], _tools: &[Value]) -> Result<LLMResponse> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Provider("script exhausted".into()))
        }
    }

    fn engine(responses: Vec<LLMResponse>) -> (ToolExecutionEngine, Arc<Scripted>, Arc<ConversationHistoryStore>) {
        let provider = Arc::new(Scripted {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
        });
        let mut gateway = LlmGateway::new("main", 2, Duration::from_millis(1));
        gateway.register("main", ProviderEntry::single(provider.clone(), ShapingProfile::default()));
        let history = Arc::new(ConversationHistoryStore::in_memory());
        let engine = ToolExecutionEngine::new(
            Arc::new(gateway),
            history.clone(),
            ContextBuilder::new(&AgentDefaults::default()),
            4,
        );
        (engine, provider, history)
    }

    fn stop(text: &str) -> LLMResponse {
        LLMResponse {
            content: Some(text.to_string()),
            finish_reason: "stop".to_string(),
            ..LLMResponse::default()
        }
    }

    fn call(name: &str, arguments: &str) -> LLMResponse {
        LLMResponse {
            tool_calls: vec![ToolCallRequest {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
            finish_reason: "tool_calls".to_string(),
            ..LLMResponse::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fed_back() {
        let (engine, provider, history) = engine(vec![call("ghost", "{}"), stop("Sorry.")]);
        let request = AgentRequest::new("alice", "web", "do the thing");
        let outcome = engine.run(&request, &[], &CapabilityCatalog::default()).await;

        assert_eq!(outcome.result.unwrap(), "Sorry.");
        assert_eq!(outcome.iterations, 2);

        let seen = provider.seen.lock().unwrap();
        let last = seen[1].last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.text().contains("Unknown tool: ghost"));

        let persisted = history.get("alice:web").unwrap();
        let roles: Vec<Role> = persisted.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(persisted[0].text(), "do the thing");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_call() {
        let (engine, provider, history) = engine(vec![stop("never")]);
        let token = CancellationToken::new();
        token.cancel();
        let request = AgentRequest::new("alice", "web", "hi").with_cancel(token);
        let outcome = engine.run(&request, &[], &CapabilityCatalog::default()).await;

        assert!(matches!(outcome.result, Err(Error::Cancelled(_))));
        assert_eq!(outcome.iterations, 0);
        assert!(provider.seen.lock().unwrap().is_empty());
        assert!(history.get("alice:web").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_capability_switches_persona() {
        let (engine, provider, history) = engine(vec![stop("I can't reach the calendar right now.")]);
        let request = AgentRequest::new("alice", "web", "what's on today?");
        let outcome = engine
            .run(&request, &["calendar".to_string()], &CapabilityCatalog::default())
            .await;

        assert!(outcome.result.is_ok());
        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0][0].text(), AgentDefaults::default().unavailable_persona);
        assert_eq!(history.get("alice:web").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_provider_error_is_terminal() {
        let (engine, _, history) = engine(vec![]);
        let request = AgentRequest::new("alice", "web", "hi");
        let outcome = engine.run(&request, &[], &CapabilityCatalog::default()).await;
        assert!(matches!(outcome.result, Err(Error::Provider(_))));
        assert_eq!(outcome.iterations, 1);
        assert!(history.get("alice:web").unwrap().is_empty());
    }
}
