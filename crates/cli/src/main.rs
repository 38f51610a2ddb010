//! Kateno CLI, the main entry point.
//!
//! Commands:
//! - `init`      : write a default config file
//! - `serve`     : start the HTTP gateway
//! - `chat`      : send one message and stream the reply to stdout
//! - `providers` : list configured providers and their availability

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "kateno",
    about = "Kateno: streaming chat with provider fallback",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "KATENO_JSON_LOGS")]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send a single message and stream the reply
    Chat {
        /// The message to send
        #[arg(short, long)]
        message: String,

        /// Use this provider instead of the active one
        #[arg(short, long)]
        provider: Option<String>,

        /// Background memory to include in the system prompt
        #[arg(long)]
        memory: Option<String>,
    },

    /// List providers and which ones have credentials
    Providers {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Check each available provider's endpoint
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            message,
            provider,
            memory,
        } => commands::chat::run(message, provider, memory).await?,
        Commands::Providers { json, check } => commands::providers::run(json, check).await?,
    }

    Ok(())
}
