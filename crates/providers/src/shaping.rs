//! Provider-specific request shaping.
//!
//! Two tables drive it: tool-schema rules per provider (matched on the
//! provider name or API base) and sampling controls per model family.

use homeagent_core::config::{ProviderConfig, ProviderKind};
use homeagent_core::ToolDefinition;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShapingProfile {
    /// Drop `parameters` entirely when a tool takes no arguments.
    pub omit_empty_parameters: bool,
    /// Send the `additionalProperties: false` variant of each schema.
    pub strict_schemas: bool,
}

struct ShapingRule {
    needle: &'static str,
    profile: ShapingProfile,
}

const SHAPING_RULES: &[ShapingRule] = &[
    ShapingRule {
        needle: "gemini",
        profile: ShapingProfile { omit_empty_parameters: true, strict_schemas: false },
    },
    ShapingRule {
        needle: "mistral",
        profile: ShapingProfile { omit_empty_parameters: true, strict_schemas: false },
    },
    ShapingRule {
        needle: "groq",
        profile: ShapingProfile { omit_empty_parameters: true, strict_schemas: false },
    },
    ShapingRule {
        needle: "openai",
        profile: ShapingProfile { omit_empty_parameters: false, strict_schemas: true },
    },
];

impl ShapingProfile {
    /// Look up the table by provider name, then API base, then fall back
    /// on the wire protocol. Explicit config flags win over the table.
    pub fn resolve(name: &str, config: &ProviderConfig) -> Self {
        let name = name.to_lowercase();
        let base = config.api_base.as_deref().unwrap_or("").to_lowercase();
        let mut profile = SHAPING_RULES
            .iter()
            .find(|r| name.contains(r.needle))
            .or_else(|| SHAPING_RULES.iter().find(|r| base.contains(r.needle)))
            .map(|r| r.profile)
            .unwrap_or(match config.kind {
                ProviderKind::OpenAi => ShapingProfile { omit_empty_parameters: false, strict_schemas: true },
                ProviderKind::Anthropic => ShapingProfile::default(),
            });
        if let Some(omit) = config.omit_empty_parameters {
            profile.omit_empty_parameters = omit;
        }
        if let Some(strict) = config.strict_schemas {
            profile.strict_schemas = strict;
        }
        profile
    }

    /// Turn catalog entries into the function schemas sent on the wire.
    pub fn shape_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                let mut schema = tool.to_schema(self.strict_schemas);
                if self.omit_empty_parameters && takes_no_arguments(&tool.parameters) {
                    if let Some(func) = schema.get_mut("function").and_then(Value::as_object_mut) {
                        func.remove("parameters");
                    }
                }
                schema
            })
            .collect()
    }
}

fn takes_no_arguments(parameters: &Value) -> bool {
    match parameters.get("properties") {
        None => true,
        Some(Value::Object(props)) => props.is_empty(),
        Some(_) => false,
    }
}

/// Which token-limit field a model family expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimitField {
    MaxTokens,
    MaxCompletionTokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingProfile {
    pub token_field: TokenLimitField,
    /// Whether the family accepts a `temperature` control.
    pub temperature: bool,
}

const REASONING: SamplingProfile = SamplingProfile {
    token_field: TokenLimitField::MaxCompletionTokens,
    temperature: false,
};

const STANDARD: SamplingProfile = SamplingProfile {
    token_field: TokenLimitField::MaxTokens,
    temperature: true,
};

/// Model-name prefixes (after any `vendor/` prefix) and their controls.
const SAMPLING_RULES: &[(&str, SamplingProfile)] = &[
    ("o1", REASONING),
    ("o3", REASONING),
    ("o4", REASONING),
    ("gpt-5", REASONING),
];

impl SamplingProfile {
    pub fn for_model(model: &str) -> Self {
        let bare = model.rsplit('/').next().unwrap_or(model).to_lowercase();
        SAMPLING_RULES
            .iter()
            .find(|(prefix, _)| bare.starts_with(prefix))
            .map(|(_, profile)| *profile)
            .unwrap_or(STANDARD)
    }
}
