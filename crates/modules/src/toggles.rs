use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use homeagent_core::{Error, Result};
use tracing::warn;

type ToggleMap = HashMap<String, HashMap<String, bool>>;

/// Persisted enabled flags: `{ "<scope>": { "<module>": bool } }`.
/// Modules are enabled unless a flag says otherwise.
pub struct ToggleStore {
    path: Option<PathBuf>,
    state: Mutex<ToggleMap>,
}

impl ToggleStore {
    pub fn open(path: PathBuf) -> Self {
        let state = load_toggles(&path);
        Self {
            path: Some(path),
            state: Mutex::new(state),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self, scope: &str, module: &str) -> bool {
        self.lock()
            .get(scope)
            .and_then(|m| m.get(module))
            .copied()
            .unwrap_or(true)
    }

    pub fn set(&self, scope: &str, module: &str, enabled: bool) -> Result<()> {
        let mut state = self.lock();
        state
            .entry(scope.to_string())
            .or_default()
            .insert(module.to_string(), enabled);

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(&*state)?;
            std::fs::write(path, content)
                .map_err(|e| Error::Config(format!("Failed to write toggles: {}", e)))?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ToggleMap> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_toggles(path: &std::path::Path) -> ToggleMap {
    let Ok(content) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Ignoring unreadable toggles file");
        HashMap::new()
    })
}
