use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use homeagent_core::{Error, ModuleManifest, Result};
use serde_json::{Map, Value};
use tracing::debug;

use crate::process::ProcessProvider;
use crate::CapabilityProvider;

/// Everything a handler constructor gets to build one module instance.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub manifest: ModuleManifest,
    /// Owning user for personal modules, `None` for the shared scope.
    pub user: Option<String>,
    /// Validated configuration with defaults applied.
    pub config: Map<String, Value>,
    pub module_dir: PathBuf,
    /// Per-invocation timeout for out-of-process handlers.
    pub timeout: Duration,
}

pub type Constructor =
    Arc<dyn Fn(&ModuleContext) -> Result<Arc<dyn CapabilityProvider>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerRef {
    Builtin(String),
    Process { command: String, args: Vec<String> },
}

impl HandlerRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = raw
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("handler '{}' has no scheme", raw)))?;
        let rest = rest.trim();
        match scheme.trim() {
            "builtin" if !rest.is_empty() => Ok(HandlerRef::Builtin(rest.to_string())),
            "process" => {
                let mut parts = rest.split_whitespace().map(str::to_string);
                let command = parts
                    .next()
                    .ok_or_else(|| Error::Config(format!("handler '{}' names no command", raw)))?;
                Ok(HandlerRef::Process {
                    command,
                    args: parts.collect(),
                })
            }
            _ => Err(Error::Config(format!("unsupported handler reference '{}'", raw))),
        }
    }
}

/// Maps handler references from manifests to constructors. Built-in
/// handlers are registered by the host before modules are loaded.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    builtins: HashMap<String, Constructor>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&ModuleContext) -> Result<Arc<dyn CapabilityProvider>> + Send + Sync + 'static,
    {
        debug!(handler = name, "Registering builtin handler");
        self.builtins.insert(name.to_string(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builtins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a provider for `ctx.manifest.handler`. Any failure is a
    /// `Load` or `Config` error.
    pub fn instantiate(&self, ctx: &ModuleContext) -> Result<Arc<dyn CapabilityProvider>> {
        match HandlerRef::parse(&ctx.manifest.handler)? {
            HandlerRef::Builtin(name) => {
                let constructor = self.builtins.get(&name).ok_or_else(|| {
                    Error::Load(format!(
                        "module '{}' references unknown builtin handler '{}'",
                        ctx.manifest.id, name
                    ))
                })?;
                constructor(ctx).map_err(|e| match e {
                    Error::Config(_) | Error::Load(_) => e,
                    other => Error::Load(format!("module '{}': {}", ctx.manifest.id, other)),
                })
            }
            HandlerRef::Process { command, args } => {
                let program = resolve_command(&command, &ctx.module_dir).ok_or_else(|| {
                    Error::Load(format!(
                        "module '{}': command '{}' not found",
                        ctx.manifest.id, command
                    ))
                })?;
                let provider = ProcessProvider::new(&ctx.manifest.id, program)
                    .with_args(args)
                    .with_working_dir(ctx.module_dir.clone())
                    .with_timeout(ctx.timeout)
                    .with_tools(ctx.manifest.tools.clone())
                    .with_config(ctx.config.clone());
                Ok(Arc::new(provider))
            }
        }
    }
}

/// Paths with a separator are taken relative to the module directory,
/// bare names are looked up on `PATH`.
fn resolve_command(command: &str, module_dir: &Path) -> Option<PathBuf> {
    if command.contains('/') {
        let path = Path::new(command);
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            module_dir.join(path)
        };
        full.is_file().then_some(full)
    } else {
        which::which(command).ok()
    }
}
