#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use homeagent_agent::AgentKernel;
use homeagent_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use homeagent_core::{Config, DeclaredTool, Error, Result};
use homeagent_modules::{ModuleRegistry, ToggleStore};
use homeagent_providers::{LlmGateway, Provider, ProviderEntry, ShapingProfile};
use homeagent_storage::ConversationHistoryStore;
use homeagent_tools::{CapabilityProvider, HandlerRegistry, ModuleContext, ToolOutcome};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

/// Replays queued results; once empty it keeps returning `fallback`.
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Result<LLMResponse>>>,
    fallback: Option<LLMResponse>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    pub seen_tools: Mutex<Vec<Vec<Value>>>,
}

impl ScriptedProvider {
    pub fn new(queue: Vec<Result<LLMResponse>>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(queue.into()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
            seen_tools: Mutex::new(Vec::new()),
        })
    }

    pub fn repeating(queue: Vec<Result<LLMResponse>>, fallback: LLMResponse) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(queue.into()),
            fallback: Some(fallback),
            seen: Mutex::new(Vec::new()),
            seen_tools: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn messages(&self, call: usize) -> Vec<ChatMessage> {
        self.seen.lock().unwrap()[call].clone()
    }

    pub fn tool_names(&self, call: usize) -> Vec<String> {
        self.seen_tools.lock().unwrap()[call]
            .iter()
            .filter_map(|t| t["function"]["name"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.seen_tools.lock().unwrap().push(tools.to_vec());
        let next = self.queue.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(Error::Provider("script exhausted".into())),
        }
    }
}

/// A capability provider that lists fixed calendar events and counts calls.
pub struct Calendar {
    tools: Vec<DeclaredTool>,
    pub calls: Arc<AtomicUsize>,
    unreachable: bool,
}

#[async_trait]
impl CapabilityProvider for Calendar {
    fn tools(&self) -> Vec<DeclaredTool> {
        self.tools.clone()
    }

    async fn execute(&self, tool: &str, args: Map<String, Value>) -> ToolOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return ToolOutcome::unreachable("connection refused");
        }
        match tool {
            "list_events" => ToolOutcome::success(json!({
                "day": args.get("day").cloned().unwrap_or(json!("today")),
                "events": [{"time": "15:00", "title": "Dentist"}]
            })),
            other => ToolOutcome::error(format!("no such tool {}", other)),
        }
    }
}

pub fn stop(text: &str) -> LLMResponse {
    LLMResponse {
        content: Some(text.to_string()),
        finish_reason: "stop".to_string(),
        ..LLMResponse::default()
    }
}

pub fn tool_calls(calls: Vec<ToolCallRequest>) -> LLMResponse {
    LLMResponse {
        tool_calls: calls,
        finish_reason: "tool_calls".to_string(),
        ..LLMResponse::default()
    }
}

/// Triage response choosing `modules`; none means a plain answer.
pub fn select(modules: &[&str]) -> LLMResponse {
    if modules.is_empty() {
        return stop("");
    }
    tool_calls(
        modules
            .iter()
            .enumerate()
            .map(|(i, m)| ToolCallRequest::new(&format!("sel_{}", i), "select_module", json!({ "module": m })))
            .collect(),
    )
}

pub fn write_module(root: &Path, id: &str, body: &str) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("manifest.yaml"), body).unwrap();
}

pub const CALENDAR_MANIFEST: &str = "id: calendar
handler: builtin:calendar
description: The user's calendar
tools:
  - name: list_events
    description: List events for a day
    parameters:
      type: object
      properties:
        day:
          type: string
";

pub struct Harness {
    pub dir: TempDir,
    pub kernel: AgentKernel,
    pub registry: Arc<ModuleRegistry>,
    pub history: Arc<ConversationHistoryStore>,
    pub main: Arc<ScriptedProvider>,
    pub extra: Vec<(String, Arc<ScriptedProvider>)>,
    pub calendar_calls: Arc<AtomicUsize>,
}

pub struct HarnessBuilder {
    dir: TempDir,
    config: Config,
    main: Arc<ScriptedProvider>,
    extra: Vec<(String, Arc<ScriptedProvider>)>,
    unreachable: bool,
}

impl HarnessBuilder {
    pub fn new(main: Arc<ScriptedProvider>) -> Self {
        let mut config = Config::default();
        config.agent.default_provider = "main".to_string();
        config.agent.persona = "You are Home.".to_string();
        config.agent.greeting = "Hi there!".to_string();
        config.agent.timezone = Some("UTC".to_string());
        Self {
            dir: TempDir::new().unwrap(),
            config,
            main,
            extra: Vec::new(),
            unreachable: false,
        }
    }

    pub fn module(self, id: &str, manifest: &str) -> Self {
        write_module(&self.dir.path().join("modules"), id, manifest);
        self
    }

    pub fn provider(mut self, name: &str, provider: Arc<ScriptedProvider>) -> Self {
        self.extra.push((name.to_string(), provider));
        self
    }

    pub fn max_iterations(mut self, n: u32) -> Self {
        self.config.agent.max_iterations = n;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub async fn build(self) -> Harness {
        let calendar_calls = Arc::new(AtomicUsize::new(0));
        let mut handlers = HandlerRegistry::new();
        let calls = calendar_calls.clone();
        let unreachable = self.unreachable;
        handlers.register("calendar", move |ctx: &ModuleContext| {
            Ok(Arc::new(Calendar {
                tools: ctx.manifest.tools.clone(),
                calls: calls.clone(),
                unreachable,
            }) as Arc<dyn CapabilityProvider>)
        });

        let registry = Arc::new(ModuleRegistry::new(
            self.dir.path().join("modules"),
            self.config.modules.clone(),
            handlers,
            ToggleStore::in_memory(),
        ));
        registry.load_all().await.unwrap();

        let mut gateway = LlmGateway::new("main", 2, Duration::from_millis(5));
        gateway.register("main", ProviderEntry::single(self.main.clone(), ShapingProfile::default()));
        for (name, provider) in &self.extra {
            gateway.register(name, ProviderEntry::single(provider.clone(), ShapingProfile::default()));
        }

        let history = Arc::new(ConversationHistoryStore::in_memory());
        let kernel = AgentKernel::new(&self.config, registry.clone(), Arc::new(gateway), history.clone());
        Harness {
            dir: self.dir,
            kernel,
            registry,
            history,
            main: self.main,
            extra: self.extra,
            calendar_calls,
        }
    }
}
