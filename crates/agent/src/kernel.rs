use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use homeagent_core::types::ChatMessage;
use homeagent_core::{AgentReply, AgentRequest, Config};
use homeagent_modules::{ModuleEvent, ModuleRegistry, ModuleView, Scope};
use homeagent_providers::LlmGateway;
use homeagent_storage::ConversationHistoryStore;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::context::ContextBuilder;
use crate::engine::ToolExecutionEngine;
use crate::triage::{Triage, TriageRouter};

/// Copy of a channel's history handed to analytics right before a reset
/// clears it.
#[derive(Debug, Clone, Serialize)]
pub struct ArchivedConversation {
    pub user: String,
    pub channel: String,
    pub messages: Vec<ChatMessage>,
    pub archived_at: DateTime<Utc>,
}

/// Per-user module views, invalidated by registry events.
struct ViewCache {
    events: broadcast::Receiver<ModuleEvent>,
    views: HashMap<String, ModuleView>,
}

impl ViewCache {
    fn refresh(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => match &event.scope {
                    Scope::Shared => self.views.clear(),
                    Scope::User(user) => {
                        self.views.remove(user);
                    }
                },
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Module events lagged, dropping all cached views");
                    self.views.clear();
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
    }
}

/// Request entry point: triage, catalog assembly, execution, reset.
pub struct AgentKernel {
    registry: Arc<ModuleRegistry>,
    history: Arc<ConversationHistoryStore>,
    triage: TriageRouter,
    engine: ToolExecutionEngine,
    greeting: String,
    archive: Option<mpsc::Sender<ArchivedConversation>>,
    cache: Mutex<ViewCache>,
}

impl AgentKernel {
    pub fn new(
        config: &Config,
        registry: Arc<ModuleRegistry>,
        gateway: Arc<LlmGateway>,
        history: Arc<ConversationHistoryStore>,
    ) -> Self {
        let cache = ViewCache {
            events: registry.subscribe(),
            views: HashMap::new(),
        };
        Self {
            triage: TriageRouter::new(gateway.clone()),
            engine: ToolExecutionEngine::new(
                gateway,
                history.clone(),
                ContextBuilder::new(&config.agent),
                config.agent.max_iterations,
            ),
            greeting: config.agent.greeting.clone(),
            archive: None,
            cache: Mutex::new(cache),
            registry,
            history,
        }
    }

    /// Send each channel's history here before a reset clears it.
    pub fn with_archive(mut self, tx: mpsc::Sender<ArchivedConversation>) -> Self {
        self.archive = Some(tx);
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &Arc<ConversationHistoryStore> {
        &self.history
    }

    /// Handle one turn. Every failure is reported in the reply.
    pub async fn handle(&self, request: AgentRequest) -> AgentReply {
        info!(user = %request.user, channel = %request.channel, "Handling request");

        if let Err(e) = self.registry.ensure_user(&request.user).await {
            warn!(user = %request.user, error = %e, "Could not prepare personal modules");
            return AgentReply::failure(&e, Vec::new(), 0);
        }
        let view = self.view_for(&request.user);

        let key = request.history_key();
        let history = match self.history.get(&key) {
            Ok(history) => history,
            Err(e) => return AgentReply::failure(&e, Vec::new(), 0),
        };

        let available = view.available();
        let selected = match self.triage.route(&request, &history, &available).await {
            Ok(Triage::Reset) => return self.reset(&request, history).await,
            Ok(Triage::Modules(selected)) => selected,
            Err(e) => {
                warn!(user = %request.user, kind = e.kind(), error = %e, "Triage failed");
                return AgentReply::failure(&e, Vec::new(), 0);
            }
        };

        let catalog = match view.catalog(&selected) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(modules = ?selected, error = %e, "Catalog assembly failed");
                return AgentReply::failure(&e, selected, 0);
            }
        };

        let outcome = self.engine.run(&request, &selected, &catalog).await;
        match outcome.result {
            Ok(answer) => {
                info!(
                    user = %request.user,
                    iterations = outcome.iterations,
                    modules = ?selected,
                    "Request answered"
                );
                AgentReply::ok(answer, selected, outcome.iterations)
            }
            Err(e) => {
                warn!(
                    user = %request.user,
                    iterations = outcome.iterations,
                    kind = e.kind(),
                    error = %e,
                    "Request failed"
                );
                AgentReply::failure(&e, selected, outcome.iterations)
            }
        }
    }

    async fn reset(&self, request: &AgentRequest, history: Vec<ChatMessage>) -> AgentReply {
        let key = request.history_key();
        if let Some(tx) = &self.archive {
            if !history.is_empty() {
                let archived = ArchivedConversation {
                    user: request.user.clone(),
                    channel: request.channel.clone(),
                    messages: history,
                    archived_at: Utc::now(),
                };
                if tx.send(archived).await.is_err() {
                    warn!(key = %key, "Archive receiver closed, history not archived");
                }
            }
        }
        match self.history.clear(&key) {
            Ok(cleared) => {
                info!(key = %key, cleared, "Conversation reset");
                AgentReply::reset(self.greeting.clone())
            }
            Err(e) => AgentReply::failure(&e, Vec::new(), 0),
        }
    }

    fn view_for(&self, user: &str) -> ModuleView {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.refresh();
        cache
            .views
            .entry(user.to_string())
            .or_insert_with(|| self.registry.scope(user))
            .clone()
    }
}
