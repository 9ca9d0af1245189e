use std::collections::HashMap;
use std::sync::Arc;

use homeagent_core::{ComplexityTier, Error, Result, ToolDefinition};
use homeagent_tools::CapabilityProvider;

use crate::registry::ModuleEntry;

/// Where a tool call goes.
#[derive(Clone)]
pub struct Dispatch {
    pub module: String,
    pub handler: Arc<dyn CapabilityProvider>,
}

/// The tools of a fixed set of loaded modules plus the table that routes
/// each tool name back to its owner. Built per request and never mutated.
#[derive(Clone)]
pub struct CapabilityCatalog {
    tools: Vec<ToolDefinition>,
    dispatch: HashMap<String, Dispatch>,
    modules: Vec<String>,
    max_tier: ComplexityTier,
    overrides: Vec<Option<String>>,
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            dispatch: HashMap::new(),
            modules: Vec::new(),
            max_tier: ComplexityTier::Cheap,
            overrides: Vec::new(),
        }
    }
}

impl CapabilityCatalog {
    /// Union of the tools of `entries`. Two modules exposing the same tool
    /// name is a configuration error.
    pub fn assemble(entries: &[Arc<ModuleEntry>]) -> Result<Self> {
        let mut catalog = CapabilityCatalog::default();
        for entry in entries {
            let Some(handler) = entry.handler.clone() else {
                continue;
            };
            for tool in entry.tools.iter() {
                if let Some(existing) = catalog.dispatch.get(&tool.name) {
                    return Err(Error::Config(format!(
                        "tool '{}' is exposed by both '{}' and '{}'",
                        tool.name, existing.module, entry.id
                    )));
                }
                catalog.dispatch.insert(
                    tool.name.clone(),
                    Dispatch {
                        module: entry.id.clone(),
                        handler: handler.clone(),
                    },
                );
                catalog.tools.push(tool.clone());
            }
            catalog.modules.push(entry.id.clone());
            catalog.max_tier = catalog.max_tier.max(entry.complexity);
            catalog.overrides.push(entry.provider_override.clone());
        }
        Ok(catalog)
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn dispatch(&self, tool: &str) -> Option<&Dispatch> {
        self.dispatch.get(tool)
    }

    pub fn module_ids(&self) -> &[String] {
        &self.modules
    }

    pub fn max_tier(&self) -> ComplexityTier {
        self.max_tier
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The provider every module that names one agrees on. Disagreement or
    /// no preference at all means the default provider.
    pub fn agreed_provider(&self) -> Option<&str> {
        let mut named = self.overrides.iter().flatten();
        let first = named.next()?;
        named.all(|p| p == first).then_some(first.as_str())
    }
}
