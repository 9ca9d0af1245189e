pub mod agent;
pub mod modules;
pub mod status;

use std::sync::Arc;

use homeagent_core::{Config, Paths};
use homeagent_modules::{ModuleRegistry, ToggleStore};
use homeagent_tools::HandlerRegistry;

pub(crate) fn load_config(paths: &Paths) -> anyhow::Result<Config> {
    Ok(Config::load_or_default(paths)?)
}

/// Registry over the configured module directory. Builtin handlers are
/// registered by hosts that embed the kernel; the CLI runs `process:`
/// modules only.
pub(crate) fn build_registry(config: &Config, paths: &Paths) -> Arc<ModuleRegistry> {
    Arc::new(ModuleRegistry::new(
        config.modules.directory(paths),
        config.modules.clone(),
        HandlerRegistry::new(),
        ToggleStore::open(paths.toggles_file()),
    ))
}
