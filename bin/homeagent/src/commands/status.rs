use homeagent_core::Paths;

use super::{build_registry, load_config};

pub async fn run(module: Option<String>, json: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = load_config(&paths)?;
    let registry = build_registry(&config, &paths);
    registry.load_all().await?;

    let report = registry.status(module.as_deref());
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("homeagent status");
    println!("================");
    println!();
    println!("Modules:   {}", registry.directory().display());
    println!();

    if report.modules.is_empty() {
        match module {
            Some(id) => println!("No module named '{}'.", id),
            None => println!("No modules found."),
        }
        return Ok(());
    }

    println!(
        "  {:<20} {:<14} {:<10} {:<5} {:<6} {:<8} {}",
        "NAME", "SCOPE", "STATUS", "TIER", "TOOLS", "ENABLED", "DESCRIPTION"
    );
    for m in &report.modules {
        println!(
            "  {:<20} {:<14} {:<10} {:<5} {:<6} {:<8} {}",
            m.name,
            m.scope.to_string(),
            m.status.to_string(),
            u8::from(m.complexity),
            m.tool_count,
            if m.enabled { "yes" } else { "no" },
            m.description
        );
        if let Some(err) = &m.last_error {
            println!("      last error ({} failures): {}", m.failure_count, err);
        }
    }

    println!();
    println!(
        "{} loaded, {} disabled, {} error",
        report.loaded, report.disabled, report.error
    );
    Ok(())
}
