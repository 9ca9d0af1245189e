use std::sync::Arc;
use std::time::Duration;

use homeagent_agent::AgentKernel;
use homeagent_core::{AgentReply, AgentRequest, Location, Paths, ReplyStatus};
use homeagent_modules::ModuleWatcher;
use homeagent_providers::LlmGateway;
use homeagent_storage::ConversationHistoryStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{build_registry, load_config};

pub async fn run(
    message: Option<String>,
    channel: String,
    user: String,
    location: Option<String>,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = load_config(&paths)?;

    let location = location
        .map(|raw| raw.parse::<Location>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()?;

    let gateway = LlmGateway::from_config(&config).map_err(|e| {
        anyhow::anyhow!("{}\nAdd a provider to {}", e, paths.config_file().display())
    })?;

    let registry = build_registry(&config, &paths);
    let report = registry.load_all().await?;
    info!(
        loaded = report.loaded,
        disabled = report.disabled,
        error = report.error,
        "Modules ready"
    );

    let history = Arc::new(ConversationHistoryStore::new(paths.clone()));
    let kernel = AgentKernel::new(&config, registry.clone(), Arc::new(gateway), history);

    let request = |text: &str| {
        let mut req = AgentRequest::new(&user, &channel, text);
        req.location = location;
        req
    };

    if let Some(text) = message {
        print_reply(&kernel.handle(request(&text)).await);
        return Ok(());
    }

    let _watcher = if config.modules.hot_reload {
        Some(ModuleWatcher::start(
            registry.clone(),
            Duration::from_millis(config.modules.debounce_ms),
        )?)
    } else {
        None
    };

    println!("homeagent interactive mode ({}@{}). Type /quit to exit.", user, channel);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" || input == "/exit" {
            break;
        }

        // Ctrl-C cancels the turn in flight, not the session.
        let token = CancellationToken::new();
        let turn = kernel.handle(request(input).with_cancel(token.clone()));
        tokio::pin!(turn);
        let reply = loop {
            tokio::select! {
                reply = &mut turn => break reply,
                _ = tokio::signal::ctrl_c(), if !token.is_cancelled() => {
                    eprintln!("(cancelling after the current step)");
                    token.cancel();
                }
            }
        };
        print_reply(&reply);
    }
    Ok(())
}

fn print_reply(reply: &AgentReply) {
    match reply.status {
        ReplyStatus::Ok | ReplyStatus::Reset => {
            println!("{}", reply.answer.as_deref().unwrap_or(""));
        }
        ReplyStatus::Error => {
            println!(
                "[{}] {}{}",
                reply.error_kind.as_deref().unwrap_or("error"),
                reply.error.as_deref().unwrap_or(""),
                if reply.retryable { " (try again later)" } else { "" }
            );
        }
    }
}
