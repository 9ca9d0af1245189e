use homeagent_core::Paths;
use homeagent_modules::Scope;

use super::{build_registry, load_config};

pub async fn set_enabled(id: &str, user: Option<&str>, enabled: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = load_config(&paths)?;
    let registry = build_registry(&config, &paths);
    registry.load_all().await?;

    let descriptor = registry
        .descriptor(id)
        .ok_or_else(|| anyhow::anyhow!("no module named '{}' in {}", id, registry.directory().display()))?;
    if let Some(user) = user {
        registry.ensure_user(user).await?;
    }
    let scope = Scope::for_kind(descriptor.manifest.kind, user)?;

    let status = registry.set_enabled(&scope, id, enabled).await?;
    println!(
        "{} {} ({}): {}",
        if enabled { "Enabled" } else { "Disabled" },
        id,
        scope,
        status
    );
    print_error(&registry, id);
    Ok(())
}

pub async fn reload(id: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = load_config(&paths)?;
    let registry = build_registry(&config, &paths);
    registry.load_all().await?;

    for (scope, status) in registry.hot_reload(id).await? {
        println!("Reloaded {} ({}): {}", id, scope, status);
    }
    print_error(&registry, id);
    Ok(())
}

fn print_error(registry: &homeagent_modules::ModuleRegistry, id: &str) {
    for m in registry.status(Some(id)).modules {
        if let Some(err) = m.last_error {
            println!("  {}: {}", m.scope, err);
        }
    }
}
