use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Always part of every request's catalog.
    Core,
    /// Shared by all users, selected by triage.
    Global,
    /// One instance per user, selected by triage.
    Personal,
}

impl ModuleKind {
    pub fn is_shared(&self) -> bool {
        !matches!(self, ModuleKind::Personal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Discovered,
    Loading,
    Loaded,
    Disabled,
    Error,
}

impl ModuleStatus {
    /// Whether `load` may start from this state.
    pub fn can_begin_load(&self) -> bool {
        matches!(self, ModuleStatus::Discovered | ModuleStatus::Disabled | ModuleStatus::Error)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::Discovered => "discovered",
            ModuleStatus::Loading => "loading",
            ModuleStatus::Loaded => "loaded",
            ModuleStatus::Disabled => "disabled",
            ModuleStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Model-selection level: 0 = cheap/fast, 1 = default, 2 = heavy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ComplexityTier {
    Cheap,
    #[default]
    Default,
    Heavy,
}

impl TryFrom<u8> for ComplexityTier {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ComplexityTier::Cheap),
            1 => Ok(ComplexityTier::Default),
            2 => Ok(ComplexityTier::Heavy),
            other => Err(format!("complexity tier must be 0, 1 or 2 (got {})", other)),
        }
    }
}

impl From<ComplexityTier> for u8 {
    fn from(tier: ComplexityTier) -> u8 {
        match tier {
            ComplexityTier::Cheap => 0,
            ComplexityTier::Default => 1,
            ComplexityTier::Heavy => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// A configuration parameter declared in a module manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

/// A tool as declared by a module (before the owning module is attached).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Static description of a module, read from `manifest.yaml`/`manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Defaults to the module's directory name.
    #[serde(default)]
    pub id: String,
    /// Handler reference: `builtin:<name>` or `process:<command> [args..]`.
    pub handler: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_kind")]
    pub kind: ModuleKind,
    #[serde(default)]
    pub complexity: ComplexityTier,
    /// LLM provider this module prefers, if any.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Tools for handlers that cannot describe themselves (process plugins).
    #[serde(default)]
    pub tools: Vec<DeclaredTool>,
}

fn default_kind() -> ModuleKind {
    ModuleKind::Global
}

impl ModuleManifest {
    /// Check `supplied` against the declared parameters and return the
    /// effective configuration with defaults filled in.
    pub fn resolve_config(&self, supplied: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut resolved = Map::new();
        for param in &self.params {
            match supplied.get(&param.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    if !param.param_type.accepts(value) {
                        return Err(Error::Config(format!(
                            "module '{}': parameter '{}' must be of type {:?}",
                            self.id, param.name, param.param_type
                        )));
                    }
                    resolved.insert(param.name.clone(), value.clone());
                }
                None => match &param.default {
                    Some(default) => {
                        resolved.insert(param.name.clone(), default.clone());
                    }
                    None if param.required => {
                        return Err(Error::Config(format!(
                            "module '{}': missing required parameter '{}'",
                            self.id, param.name
                        )));
                    }
                    None => {}
                },
            }
        }
        for (key, value) in supplied {
            if !resolved.contains_key(key) && !self.params.iter().any(|p| &p.name == key) {
                tracing::debug!(module = %self.id, key = %key, "Passing through undeclared config key");
                resolved.insert(key.clone(), value.clone());
            }
        }
        Ok(resolved)
    }
}

/// A tool as it appears in an assembled catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema object describing the arguments.
    pub parameters: Value,
    /// `parameters` with `additionalProperties: false` forced at every
    /// object level. Computed once when the owning module loads.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub strict_parameters: Value,
    /// Id of the module that owns this tool.
    pub module: String,
}

impl ToolDefinition {
    pub fn new(module: &str, name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            strict_parameters: Value::Null,
            module: module.to_string(),
        }
    }

    /// OpenAI-style function schema sent to providers.
    pub fn to_schema(&self, strict: bool) -> Value {
        let parameters = if strict && !self.strict_parameters.is_null() {
            &self.strict_parameters
        } else {
            &self.parameters
        };
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": parameters,
            }
        })
    }
}
