use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::module::ComplexityTier;
use crate::paths::Paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any OpenAI-compatible chat-completions endpoint.
    #[default]
    OpenAi,
    Anthropic,
}

/// The three models a provider exposes, one per complexity tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelTiers {
    pub cheap: String,
    pub default: String,
    pub heavy: String,
}

impl ModelTiers {
    pub fn for_tier(&self, tier: ComplexityTier) -> &str {
        match tier {
            ComplexityTier::Cheap => &self.cheap,
            ComplexityTier::Default => &self.default,
            ComplexityTier::Heavy => &self.heavy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub models: ModelTiers,
    /// Minimum spacing between two requests; 0 disables the limiter.
    #[serde(default)]
    pub min_request_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub proxy: Option<String>,
    /// Overrides the shaping table for this provider.
    #[serde(default)]
    pub omit_empty_parameters: Option<bool>,
    #[serde(default)]
    pub strict_schemas: Option<bool>,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            api_key: String::new(),
            api_base: None,
            models: ModelTiers::default(),
            min_request_interval_ms: 0,
            timeout_secs: default_timeout_secs(),
            proxy: None,
            omit_empty_parameters: None,
            strict_schemas: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "default_llm_retry_delay_ms")]
    pub llm_retry_delay_ms: u64,
    #[serde(default = "default_persona")]
    pub persona: String,
    /// Persona used when the selected modules expose no tools yet.
    #[serde(default = "default_unavailable_persona")]
    pub unavailable_persona: String,
    /// Fixed reply for a greeting that resets the conversation.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// IANA zone name; the host zone is used when unset.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Per-channel formatting instructions.
    #[serde(default)]
    pub channels: HashMap<String, String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_llm_max_retries() -> u32 {
    2
}

fn default_llm_retry_delay_ms() -> u64 {
    1000
}

fn default_persona() -> String {
    "You are a helpful home assistant. Answer briefly and use the available tools when they help."
        .to_string()
}

fn default_unavailable_persona() -> String {
    "You are a helpful home assistant. The capability the user is asking about is currently unavailable; \
     say so briefly and answer from general knowledge if you can."
        .to_string()
}

fn default_greeting() -> String {
    "Hello! How can I help you?".to_string()
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            llm_max_retries: default_llm_max_retries(),
            llm_retry_delay_ms: default_llm_retry_delay_ms(),
            persona: default_persona(),
            unavailable_persona: default_unavailable_persona(),
            greeting: default_greeting(),
            timezone: None,
            channels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulesConfig {
    /// Module source location; defaults to `~/.homeagent/modules`.
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_hot_reload")]
    pub hot_reload: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Timeout for one `process:` handler invocation.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// Module id -> configuration for core/global modules.
    #[serde(default)]
    pub settings: HashMap<String, Map<String, Value>>,
    /// User id -> module id -> configuration for personal modules.
    #[serde(default)]
    pub users: HashMap<String, HashMap<String, Map<String, Value>>>,
}

fn default_hot_reload() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_handler_timeout_secs() -> u64 {
    30
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            directory: None,
            hot_reload: default_hot_reload(),
            debounce_ms: default_debounce_ms(),
            handler_timeout_secs: default_handler_timeout_secs(),
            settings: HashMap::new(),
            users: HashMap::new(),
        }
    }
}

impl ModulesConfig {
    /// Configuration for `module` as seen by `user`. User entries are laid
    /// over the shared settings key by key.
    pub fn settings_for(&self, user: Option<&str>, module: &str) -> Map<String, Value> {
        let mut merged = self.settings.get(module).cloned().unwrap_or_default();
        if let Some(per_user) = user
            .and_then(|u| self.users.get(u))
            .and_then(|m| m.get(module))
        {
            for (k, v) in per_user {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    pub fn directory(&self, paths: &Paths) -> PathBuf {
        match self.directory.as_deref() {
            Some(dir) if !dir.trim().is_empty() => expand_home(dir),
            _ => paths.modules_dir(),
        }
    }
}

fn expand_home(dir: &str) -> PathBuf {
    if let Some(rest) = dir.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(dir)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub modules: ModulesConfig,
}

impl Config {
    /// Load a config file. Accepts JSON5 (comments, trailing commas).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self> {
        json5::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json5_with_defaults() {
        let raw = r#"{
  // comment
  providers: {
    openai: { apiKey: "k", models: { cheap: "m0", default: "m1", heavy: "m2" }, },
    claude: { kind: "anthropic", minRequestIntervalMs: 500 },
  },
  agent: { maxIterations: 4 },
}"#;
        let cfg = Config::parse(raw).unwrap();
        assert_eq!(cfg.agent.max_iterations, 4);
        assert_eq!(cfg.agent.llm_max_retries, 2);
        assert_eq!(cfg.modules.debounce_ms, 1000);
        let openai = cfg.get_provider("openai").unwrap();
        assert_eq!(openai.models.for_tier(ComplexityTier::Heavy), "m2");
        assert_eq!(openai.timeout_secs, 120);
        assert_eq!(cfg.get_provider("claude").unwrap().kind, ProviderKind::Anthropic);
    }

    #[test]
    fn test_settings_for_merges_user_overrides() {
        let raw = r#"{
  modules: {
    settings: { calendar: { days: 7, url: "shared" } },
    users: { alice: { calendar: { url: "alice" } } },
  },
}"#;
        let cfg = Config::parse(raw).unwrap();
        let alice = cfg.modules.settings_for(Some("alice"), "calendar");
        assert_eq!(alice["url"], "alice");
        assert_eq!(alice["days"], 7);
        let shared = cfg.modules.settings_for(None, "calendar");
        assert_eq!(shared["url"], "shared");
        assert!(cfg.modules.settings_for(Some("bob"), "mail").is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let mut cfg = Config::default();
        cfg.agent.greeting = "Salut !".to_string();
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.agent.greeting, "Salut !");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        assert!(matches!(Config::parse("{ nope"), Err(Error::Config(_))));
    }
}
