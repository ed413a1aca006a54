//! Main entry point for the `MatchIT` chat CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::{ClientConfig, ConfigOverrides};
use std::path::PathBuf;
use uuid::Uuid;

mod commands;
mod tracer;

/// `MatchIT` CLI
#[derive(Parser, Debug)]
#[command(name = "matchit")]
#[command(about = "Command-line client for MatchIT buyer/seller chats", long_about = None)]
struct Cli {
    /// Path to a configuration file (YAML or JSON)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overriding config and environment
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Signed-in user id, overriding config and environment
    #[arg(long, global = true)]
    user: Option<Uuid>,

    /// Log level directive used when `RUST_LOG` is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the `MatchIT` CLI
#[derive(Subcommand, Debug)]
enum Commands {
    /// List your conversations, most recent first
    Chats,

    /// Open a conversation, print it and follow new messages
    Chat(commands::chat::ChatArgs),

    /// Run two in-process participants against an in-memory backend
    Demo(commands::demo::DemoArgs),

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate (yaml or json). Defaults to yaml.
        #[arg(long, short, default_value = "yaml")]
        format: String,

        /// Where to write the file. Defaults to `matchit.<format>` in the current directory.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(long, short)]
        shell: clap_complete::Shell,
    },
}

impl Cli {
    fn load_config(&self) -> Result<ClientConfig> {
        let overrides = ConfigOverrides {
            backend_url: self.backend_url.clone(),
            user_id: self.user,
            log_level: self.log_level.clone(),
        };
        ClientConfig::load_config(self.config.clone(), &overrides)
            .context("failed to load configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Config { format, output } => {
            commands::config::generate_config(format, output.clone())?;
        }
        Commands::Completion { shell } => {
            commands::completion::generate_completion(*shell);
        }
        Commands::Chats => {
            let config = cli.load_config()?;
            tracer::initialize_tracing(&config)?;
            commands::chats::handle_chats(&config).await?;
        }
        Commands::Chat(args) => {
            let config = cli.load_config()?;
            tracer::initialize_tracing(&config)?;
            commands::chat::handle_chat(args, &config).await?;
        }
        Commands::Demo(args) => {
            let config = cli.load_config()?;
            tracer::initialize_tracing(&config)?;
            commands::demo::run_demo(args, &config).await?;
        }
    }

    Ok(())
}
