mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "homeagent")]
#[command(about = "Personal agent server kernel", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show module status
    Status {
        /// Only this module
        module: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the agent
    Agent {
        /// Message to send (interactive mode if not provided)
        #[arg(short, long)]
        message: Option<String>,

        /// Channel whose history the turn uses
        #[arg(short, long, default_value = "cli")]
        channel: String,

        /// User id
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Location as "lat,lon"
        #[arg(long)]
        location: Option<String>,
    },

    /// Manage capability modules
    Modules {
        #[command(subcommand)]
        command: ModulesCommands,
    },
}

#[derive(Subcommand)]
enum ModulesCommands {
    /// Enable a module and load it
    Enable {
        id: String,
        /// Target a user's personal instance
        #[arg(long)]
        user: Option<String>,
    },
    /// Disable a module and unload it
    Disable {
        id: String,
        /// Target a user's personal instance
        #[arg(long)]
        user: Option<String>,
    },
    /// Reload a module from disk
    Reload { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    match cli.command {
        Commands::Status { module, json } => {
            commands::status::run(module, json).await?;
        }
        Commands::Agent {
            message,
            channel,
            user,
            location,
        } => {
            commands::agent::run(message, channel, user, location).await?;
        }
        Commands::Modules { command } => match command {
            ModulesCommands::Enable { id, user } => {
                commands::modules::set_enabled(&id, user.as_deref(), true).await?;
            }
            ModulesCommands::Disable { id, user } => {
                commands::modules::set_enabled(&id, user.as_deref(), false).await?;
            }
            ModulesCommands::Reload { id } => {
                commands::modules::reload(&id).await?;
            }
        },
    }

    Ok(())
}
