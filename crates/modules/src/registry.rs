use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use homeagent_core::config::ModulesConfig;
use homeagent_core::{
    ComplexityTier, Error, ModuleKind, ModuleStatus, Result, ToolDefinition,
};
use homeagent_tools::{schema, CapabilityProvider, HandlerRegistry, ModuleContext};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::catalog::CapabilityCatalog;
use crate::manifest::{self, DiscoveredModule, SourceDescriptor};
use crate::toggles::ToggleStore;

/// Which instance of a module: the shared one, or a user's personal one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum Scope {
    Shared,
    User(String),
}

impl Scope {
    /// The scope a module of `kind` lives in for `user`.
    pub fn for_kind(kind: ModuleKind, user: Option<&str>) -> Result<Scope> {
        match (kind, user) {
            (ModuleKind::Personal, Some(user)) => Ok(Scope::User(user.to_string())),
            (ModuleKind::Personal, None) => Err(Error::Config(
                "personal modules need a user".to_string(),
            )),
            _ => Ok(Scope::Shared),
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            Scope::Shared => None,
            Scope::User(u) => Some(u),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Shared => f.write_str("shared"),
            Scope::User(u) => write!(f, "user:{}", u),
        }
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> String {
        scope.to_string()
    }
}

type SlotKey = (Scope, String);

/// Immutable state of one module instance. Every transition publishes a
/// fresh entry, so tools and dispatch never change in place.
#[derive(Clone)]
pub struct ModuleEntry {
    pub id: String,
    pub scope: Scope,
    pub kind: ModuleKind,
    pub status: ModuleStatus,
    pub enabled: bool,
    pub description: String,
    pub complexity: ComplexityTier,
    pub provider_override: Option<String>,
    pub tools: Arc<Vec<ToolDefinition>>,
    pub handler: Option<Arc<dyn CapabilityProvider>>,
    pub source: SourceDescriptor,
    pub last_error: Option<String>,
    pub failure_count: u32,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("status", &self.status)
            .field("enabled", &self.enabled)
            .field("tools", &self.tools.len())
            .field("failure_count", &self.failure_count)
            .finish()
    }
}

impl ModuleEntry {
    fn discovered(desc: &DiscoveredModule, scope: Scope, enabled: bool) -> Self {
        Self {
            id: desc.manifest.id.clone(),
            scope,
            kind: desc.manifest.kind,
            status: ModuleStatus::Discovered,
            enabled,
            description: desc.manifest.description.clone(),
            complexity: desc.manifest.complexity,
            provider_override: desc.manifest.provider.clone(),
            tools: Arc::new(Vec::new()),
            handler: None,
            source: desc.source.clone(),
            last_error: None,
            failure_count: 0,
            loaded_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ModuleStatus::Loaded && self.enabled
    }
}

#[derive(Debug, Clone)]
pub struct ModuleEvent {
    pub scope: Scope,
    pub module: String,
    pub status: ModuleStatus,
}

/// Point-in-time copy of every module instance.
#[derive(Debug, Default, Clone)]
pub struct RegistrySnapshot {
    entries: HashMap<SlotKey, Arc<ModuleEntry>>,
}

impl RegistrySnapshot {
    pub fn get(&self, scope: &Scope, id: &str) -> Option<&Arc<ModuleEntry>> {
        self.entries.get(&(scope.clone(), id.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<ModuleEntry>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One user's view of a snapshot: shared modules plus their own
/// personal instances.
#[derive(Debug, Clone)]
pub struct ModuleView {
    user: String,
    snapshot: Arc<RegistrySnapshot>,
}

impl ModuleView {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ModuleEntry>> {
        self.snapshot
            .get(&Scope::Shared, id)
            .or_else(|| self.snapshot.get(&Scope::User(self.user.clone()), id))
    }

    fn visible(&self) -> impl Iterator<Item = &Arc<ModuleEntry>> {
        self.snapshot.entries().filter(move |e| match &e.scope {
            Scope::Shared => true,
            Scope::User(u) => u == &self.user,
        })
    }

    /// Loaded, enabled global and personal modules, by id.
    pub fn available(&self) -> Vec<Arc<ModuleEntry>> {
        let mut out: Vec<Arc<ModuleEntry>> = self
            .visible()
            .filter(|e| e.is_active() && e.kind != ModuleKind::Core)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Loaded, enabled core modules, by id.
    pub fn core(&self) -> Vec<Arc<ModuleEntry>> {
        let mut out: Vec<Arc<ModuleEntry>> = self
            .visible()
            .filter(|e| e.is_active() && e.kind == ModuleKind::Core)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Core modules plus the `selected` ones, resolved against this view.
    /// Names that are not available are skipped.
    pub fn catalog(&self, selected: &[String]) -> Result<CapabilityCatalog> {
        let available = self.available();
        let mut entries = self.core();
        for name in selected {
            match available.iter().find(|e| &e.id == name) {
                Some(entry) if !entries.iter().any(|e| e.id == entry.id) => entries.push(entry.clone()),
                Some(_) => {}
                None => warn!(module = %name, user = %self.user, "Selected module is not available"),
            }
        }
        CapabilityCatalog::assemble(&entries)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub name: String,
    pub scope: Scope,
    pub kind: ModuleKind,
    pub status: ModuleStatus,
    pub description: String,
    pub complexity: ComplexityTier,
    pub tool_count: usize,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub modules: Vec<ModuleReport>,
    pub loaded: usize,
    pub disabled: usize,
    pub error: usize,
}

pub struct ModuleRegistry {
    directory: PathBuf,
    settings: ModulesConfig,
    handler_timeout: Duration,
    handlers: HandlerRegistry,
    toggles: ToggleStore,
    descriptors: RwLock<HashMap<String, Arc<DiscoveredModule>>>,
    users: RwLock<BTreeSet<String>>,
    current: RwLock<Arc<RegistrySnapshot>>,
    slot_locks: StdMutex<HashMap<SlotKey, Arc<Mutex<()>>>>,
    events: broadcast::Sender<ModuleEvent>,
}

impl ModuleRegistry {
    pub fn new(
        directory: PathBuf,
        settings: ModulesConfig,
        handlers: HandlerRegistry,
        toggles: ToggleStore,
    ) -> Self {
        let users = settings.users.keys().cloned().collect();
        let (events, _) = broadcast::channel(256);
        Self {
            directory,
            handler_timeout: Duration::from_secs(settings.handler_timeout_secs),
            settings,
            handlers,
            toggles,
            descriptors: RwLock::new(HashMap::new()),
            users: RwLock::new(users),
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            slot_locks: StdMutex::new(HashMap::new()),
            events,
        }
    }

    pub fn directory(&self) -> &PathBuf {
        &self.directory
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// The modules `user` can see right now.
    pub fn scope(&self, user: &str) -> ModuleView {
        ModuleView {
            user: user.to_string(),
            snapshot: self.snapshot(),
        }
    }

    pub fn descriptor(&self, id: &str) -> Option<Arc<DiscoveredModule>> {
        self.descriptors
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    /// Id of the module whose source lives in directory `dir_name`.
    pub fn module_for_dir(&self, dir_name: &str) -> Option<String> {
        self.descriptors
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .find(|d| manifest::dir_name(&d.dir) == dir_name)
            .map(|d| d.manifest.id.clone())
    }

    /// Scan the module directory and register descriptors for modules not
    /// seen before. Returns the new ids; nothing is instantiated.
    pub fn discover(&self) -> Result<Vec<String>> {
        let found = manifest::discover(&self.directory)?;
        let mut new_ids = Vec::new();
        {
            let mut descriptors = self.descriptors.write().unwrap_or_else(|p| p.into_inner());
            for module in found {
                match descriptors.get(&module.manifest.id) {
                    Some(existing) if existing.dir != module.dir => {
                        warn!(
                            module = %module.manifest.id,
                            kept = %existing.dir.display(),
                            ignored = %module.dir.display(),
                            "Duplicate module id"
                        );
                    }
                    Some(_) => {}
                    None => {
                        new_ids.push(module.manifest.id.clone());
                        descriptors.insert(module.manifest.id.clone(), Arc::new(module));
                    }
                }
            }
        }
        for id in &new_ids {
            if let Some(desc) = self.descriptor(id) {
                for scope in self.scopes_for(desc.manifest.kind) {
                    self.ensure_slot(&desc, scope);
                }
            }
        }
        if !new_ids.is_empty() {
            info!(count = new_ids.len(), modules = ?new_ids, "Discovered modules");
        }
        Ok(new_ids)
    }

    /// Discover, then load every enabled instance and mark the rest disabled.
    pub async fn load_all(&self) -> Result<StatusReport> {
        self.discover()?;
        let mut keys: Vec<SlotKey> = self.snapshot().entries.keys().cloned().collect();
        keys.sort();
        for (scope, id) in keys {
            self.apply_toggle(&scope, &id).await?;
        }
        Ok(self.status(None))
    }

    /// Make sure `user` has their own instance of every personal module.
    pub async fn ensure_user(&self, user: &str) -> Result<()> {
        let inserted = self
            .users
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(user.to_string());
        if !inserted {
            return Ok(());
        }
        let personal: Vec<Arc<DiscoveredModule>> = self
            .descriptors
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|d| d.manifest.kind == ModuleKind::Personal)
            .cloned()
            .collect();
        let scope = Scope::User(user.to_string());
        for desc in personal {
            self.ensure_slot(&desc, scope.clone());
            self.apply_toggle(&scope, &desc.manifest.id).await?;
        }
        debug!(user, "Personal modules instantiated");
        Ok(())
    }

    /// Instantiate a module. Failures end in `error` status and are never
    /// returned; `Err` means the module or scope is unknown.
    pub async fn load(&self, scope: &Scope, id: &str) -> Result<ModuleStatus> {
        let key = (scope.clone(), id.to_string());
        let lock = self.slot_lock(&key);
        let _guard = lock.lock().await;
        self.load_locked(&key).await
    }

    /// Remove a module's tools from the dispatch surface. Idempotent.
    pub async fn unload(&self, scope: &Scope, id: &str) -> Result<ModuleStatus> {
        let key = (scope.clone(), id.to_string());
        let lock = self.slot_lock(&key);
        let _guard = lock.lock().await;
        self.unload_locked(&key).await
    }

    pub async fn set_enabled(&self, scope: &Scope, id: &str, enabled: bool) -> Result<ModuleStatus> {
        let key = (scope.clone(), id.to_string());
        if self.entry(&key).is_none() {
            return Err(Error::NotFound(format!("module '{}' in scope {}", id, scope)));
        }
        self.toggles.set(&scope.to_string(), id, enabled)?;
        info!(module = id, scope = %scope, enabled, "Module toggled");

        let lock = self.slot_lock(&key);
        let _guard = lock.lock().await;
        if enabled {
            self.load_locked(&key).await
        } else {
            self.unload_locked(&key).await
        }
    }

    /// Re-read the manifest and run unload + load for every instance of
    /// `id`, each under its own slot lock. A failed load leaves the
    /// instance in `error`.
    pub async fn hot_reload(&self, id: &str) -> Result<Vec<(Scope, ModuleStatus)>> {
        let old = self
            .descriptor(id)
            .ok_or_else(|| Error::NotFound(format!("module '{}'", id)))?;

        let fresh = match manifest::read_module(&old.dir) {
            Ok(Some(module)) if module.manifest.id == id => Ok(Arc::new(module)),
            Ok(Some(module)) => Err(format!("manifest now declares id '{}'", module.manifest.id)),
            Ok(None) => Err("manifest removed".to_string()),
            Err(e) => Err(e.to_string()),
        };

        let desc = match fresh {
            Ok(desc) => desc,
            Err(reason) => {
                warn!(module = id, reason = %reason, "Hot reload failed to read manifest");
                let mut results = Vec::new();
                for key in self.slots_of(id) {
                    let lock = self.slot_lock(&key);
                    let _guard = lock.lock().await;
                    self.unload_locked(&key).await?;
                    let status = self.fail_locked(&key, &Error::Load(reason.clone()));
                    results.push((key.0, status));
                }
                return Ok(results);
            }
        };

        if desc.source == old.source {
            debug!(module = id, "Manifest unchanged, reloading handler");
        }
        self.descriptors
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.to_string(), desc.clone());

        let wanted: Vec<Scope> = self.scopes_for(desc.manifest.kind);
        for key in self.slots_of(id) {
            if !wanted.contains(&key.0) {
                let lock = self.slot_lock(&key);
                let _guard = lock.lock().await;
                self.unload_locked(&key).await?;
                self.remove_slot(&key);
            }
        }

        let mut results = Vec::new();
        for scope in wanted {
            self.ensure_slot(&desc, scope.clone());
            let key = (scope.clone(), id.to_string());
            let lock = self.slot_lock(&key);
            let _guard = lock.lock().await;
            self.unload_locked(&key).await?;
            let status = if self.toggles.is_enabled(&scope.to_string(), id) {
                self.load_locked(&key).await?
            } else {
                ModuleStatus::Disabled
            };
            results.push((scope, status));
        }
        info!(module = id, instances = results.len(), "Module hot-reloaded");
        Ok(results)
    }

    /// React to a settled change inside module directory `dir_name`: reload
    /// the module living there, or pick up a newly added one.
    pub async fn handle_change(&self, dir_name: &str) -> Result<()> {
        if let Some(id) = self.module_for_dir(dir_name) {
            self.hot_reload(&id).await?;
            return Ok(());
        }
        for id in self.discover()? {
            for key in self.slots_of(&id) {
                self.apply_toggle(&key.0, &key.1).await?;
            }
        }
        Ok(())
    }

    /// Status for one module id (all its instances) or for everything.
    pub fn status(&self, id: Option<&str>) -> StatusReport {
        let snapshot = self.snapshot();
        let mut modules: Vec<ModuleReport> = snapshot
            .entries()
            .filter(|e| id.map(|id| e.id == id).unwrap_or(true))
            .map(|e| ModuleReport {
                name: e.id.clone(),
                scope: e.scope.clone(),
                kind: e.kind,
                status: e.status,
                description: e.description.clone(),
                complexity: e.complexity,
                tool_count: e.tools.len(),
                enabled: e.enabled,
                last_error: e.last_error.clone(),
                failure_count: e.failure_count,
                loaded_at: e.loaded_at,
            })
            .collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.scope.cmp(&b.scope)));

        let count = |s: ModuleStatus| modules.iter().filter(|m| m.status == s).count();
        StatusReport {
            loaded: count(ModuleStatus::Loaded),
            disabled: count(ModuleStatus::Disabled),
            error: count(ModuleStatus::Error),
            modules,
        }
    }

    async fn apply_toggle(&self, scope: &Scope, id: &str) -> Result<ModuleStatus> {
        let enabled = self.toggles.is_enabled(&scope.to_string(), id);
        let key = (scope.clone(), id.to_string());
        let lock = self.slot_lock(&key);
        let _guard = lock.lock().await;
        if enabled {
            self.load_locked(&key).await
        } else {
            self.unload_locked(&key).await
        }
    }

    async fn load_locked(&self, key: &SlotKey) -> Result<ModuleStatus> {
        let (scope, id) = key;
        let current = self
            .entry(key)
            .ok_or_else(|| Error::NotFound(format!("module '{}' in scope {}", id, scope)))?;
        if !current.status.can_begin_load() {
            debug!(module = %id, scope = %scope, status = %current.status, "Load skipped");
            return Ok(current.status);
        }
        let desc = self
            .descriptor(id)
            .ok_or_else(|| Error::NotFound(format!("module '{}'", id)))?;

        let mut entry = ModuleEntry::discovered(&desc, scope.clone(), self.is_enabled(key));
        entry.failure_count = current.failure_count;
        entry.status = ModuleStatus::Loading;
        self.publish(entry.clone());

        match self.instantiate(&desc, scope).await {
            Ok(parts) => {
                entry.status = ModuleStatus::Loaded;
                entry.tools = Arc::new(parts.tools);
                entry.handler = Some(parts.handler);
                if let Some(description) = parts.description {
                    entry.description = description;
                }
                if let Some(complexity) = parts.complexity {
                    entry.complexity = complexity;
                }
                if parts.provider.is_some() {
                    entry.provider_override = parts.provider;
                }
                entry.loaded_at = Some(Utc::now());
                info!(
                    module = %id,
                    scope = %scope,
                    tools = entry.tools.len(),
                    complexity = u8::from(entry.complexity),
                    "Module loaded"
                );
                self.publish(entry);
                Ok(ModuleStatus::Loaded)
            }
            Err(e) => {
                entry.status = ModuleStatus::Error;
                entry.last_error = Some(e.to_string());
                entry.failure_count += 1;
                warn!(module = %id, scope = %scope, kind = e.kind(), error = %e, "Module failed to load");
                self.publish(entry);
                Ok(ModuleStatus::Error)
            }
        }
    }

    async fn unload_locked(&self, key: &SlotKey) -> Result<ModuleStatus> {
        let current = self
            .entry(key)
            .ok_or_else(|| Error::NotFound(format!("module '{}' in scope {}", key.1, key.0)))?;
        if current.status == ModuleStatus::Disabled && current.handler.is_none() {
            return Ok(ModuleStatus::Disabled);
        }
        if let Some(handler) = &current.handler {
            handler.shutdown().await;
        }
        let mut entry = (*current).clone();
        entry.status = ModuleStatus::Disabled;
        entry.enabled = self.is_enabled(key);
        entry.tools = Arc::new(Vec::new());
        entry.handler = None;
        entry.loaded_at = None;
        debug!(module = %key.1, scope = %key.0, "Module unloaded");
        self.publish(entry);
        Ok(ModuleStatus::Disabled)
    }

    fn fail_locked(&self, key: &SlotKey, err: &Error) -> ModuleStatus {
        if let Some(current) = self.entry(key) {
            let mut entry = (*current).clone();
            entry.status = ModuleStatus::Error;
            entry.last_error = Some(err.to_string());
            entry.failure_count += 1;
            self.publish(entry);
        }
        ModuleStatus::Error
    }

    async fn instantiate(&self, desc: &DiscoveredModule, scope: &Scope) -> Result<LoadedParts> {
        let id = &desc.manifest.id;
        let supplied = self.settings.settings_for(scope.user(), id);
        let config = desc.manifest.resolve_config(&supplied)?;
        let ctx = ModuleContext {
            manifest: desc.manifest.clone(),
            user: scope.user().map(str::to_string),
            config,
            module_dir: desc.dir.clone(),
            timeout: self.handler_timeout,
        };
        let handler = self.handlers.instantiate(&ctx)?;

        match collect_tools(id, handler.as_ref()) {
            Ok(tools) => Ok(LoadedParts {
                description: handler.description(),
                complexity: handler.complexity(),
                provider: handler.provider(),
                tools,
                handler,
            }),
            Err(e) => {
                handler.shutdown().await;
                Err(e)
            }
        }
    }

    fn scopes_for(&self, kind: ModuleKind) -> Vec<Scope> {
        if kind.is_shared() {
            vec![Scope::Shared]
        } else {
            self.users
                .read()
                .unwrap_or_else(|p| p.into_inner())
                .iter()
                .map(|u| Scope::User(u.clone()))
                .collect()
        }
    }

    fn slots_of(&self, id: &str) -> Vec<SlotKey> {
        let mut keys: Vec<SlotKey> = self
            .snapshot()
            .entries
            .keys()
            .filter(|(_, slot_id)| slot_id == id)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn ensure_slot(&self, desc: &DiscoveredModule, scope: Scope) {
        let key = (scope.clone(), desc.manifest.id.clone());
        let enabled = self.is_enabled(&key);
        let entry = ModuleEntry::discovered(desc, scope, enabled);
        let event = ModuleEvent {
            scope: entry.scope.clone(),
            module: entry.id.clone(),
            status: entry.status,
        };
        {
            // Checked under the write lock so a slot loaded in the meantime is never reset.
            let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
            if current.entries.contains_key(&key) {
                return;
            }
            let mut next = (**current).clone();
            next.entries.insert(key, Arc::new(entry));
            *current = Arc::new(next);
        }
        let _ = self.events.send(event);
    }

    fn is_enabled(&self, key: &SlotKey) -> bool {
        self.toggles.is_enabled(&key.0.to_string(), &key.1)
    }

    fn entry(&self, key: &SlotKey) -> Option<Arc<ModuleEntry>> {
        self.snapshot().entries.get(key).cloned()
    }

    fn slot_lock(&self, key: &SlotKey) -> Arc<Mutex<()>> {
        self.slot_locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn publish(&self, entry: ModuleEntry) {
        let event = ModuleEvent {
            scope: entry.scope.clone(),
            module: entry.id.clone(),
            status: entry.status,
        };
        {
            let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
            let mut next = (**current).clone();
            next.entries
                .insert((entry.scope.clone(), entry.id.clone()), Arc::new(entry));
            *current = Arc::new(next);
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn remove_slot(&self, key: &SlotKey) {
        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
        let mut next = (**current).clone();
        next.entries.remove(key);
        *current = Arc::new(next);
    }
}

struct LoadedParts {
    handler: Arc<dyn CapabilityProvider>,
    tools: Vec<ToolDefinition>,
    description: Option<String>,
    complexity: Option<ComplexityTier>,
    provider: Option<String>,
}

fn collect_tools(id: &str, handler: &dyn CapabilityProvider) -> Result<Vec<ToolDefinition>> {
    let mut seen = HashSet::new();
    let mut tools = Vec::new();
    for declared in handler.tools() {
        let def = schema::prepare(id, &declared)?;
        if !seen.insert(def.name.clone()) {
            return Err(Error::Load(format!(
                "module '{}' declares tool '{}' twice",
                id, def.name
            )));
        }
        tools.push(def);
    }
    Ok(tools)
}
