//! llamadeck - Command-Line Front End
//!
//! Talks to a local or remote Ollama service through `llamadeck-core`.
//!
//! # Usage
//!
//! ```bash
//! # Service status and installed models
//! llamadeck status
//! llamadeck models
//!
//! # Chat with the selected model (Ctrl-C stops the current reply)
//! llamadeck chat "Why is the sky blue?"
//! llamadeck chat --model qwen3 --think
//!
//! # Download with progress, then watch connectivity
//! llamadeck pull llama3.2
//! llamadeck watch
//!
//! # Another host, no state written to disk
//! llamadeck --base-url http://gpu-box:11434/api --ephemeral models
//!
//! # Verbose logging
//! RUST_LOG=debug llamadeck chat
//! ```

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use llamadeck_core::{
    load_config_from_path, default_config_path, Client, ConfigOverrides, MemoryStore,
    OllamaBackend,
};

/// llamadeck - streaming client for Ollama-style inference services
#[derive(Parser, Debug)]
#[command(name = "llamadeck")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// API root of the service (e.g. http://localhost:11434/api)
    #[arg(short = 'u', long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// Directory for conversations and settings
    #[arg(short = 'd', long, global = true, env = "LLAMADECK_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "LLAMADECK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Keep session state in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, env = "LLAMADECK_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connection state, service version and session summary
    Status,
    /// List installed models
    Models,
    /// List models loaded in memory
    Ps,
    /// Show a model's details
    Show {
        /// Model name
        model: String,
        /// Include verbose metadata
        #[arg(long)]
        verbose: bool,
    },
    /// Download a model
    Pull {
        /// Model name
        model: String,
        /// Allow insecure registries
        #[arg(long)]
        insecure: bool,
    },
    /// Delete a model
    Rm {
        /// Model name
        model: String,
    },
    /// Copy a model under a new name
    Cp {
        /// Existing model
        source: String,
        /// New name
        destination: String,
    },
    /// Embed text
    Embed {
        /// Embedding model
        model: String,
        /// Text to embed
        #[arg(required = true)]
        text: Vec<String>,
        /// Use the legacy /embeddings endpoint
        #[arg(long)]
        legacy: bool,
    },
    /// Chat with a model; reads prompts from stdin when none is given
    Chat {
        /// Model to use (becomes the default)
        #[arg(short, long)]
        model: Option<String>,
        /// Ask for the reasoning trace
        #[arg(long)]
        think: bool,
        /// Start a new conversation
        #[arg(long)]
        new: bool,
        /// Prompt text
        prompt: Vec<String>,
    },
    /// Manage stored conversations
    Conversations {
        #[command(subcommand)]
        action: Option<ConversationAction>,
    },
    /// Monitor connectivity and print state transitions until Ctrl-C
    Watch,
}

#[derive(Subcommand, Debug)]
enum ConversationAction {
    /// List conversations (default)
    List,
    /// Print one conversation
    Show {
        /// Conversation id
        id: String,
    },
    /// Make a conversation current
    Switch {
        /// Conversation id
        id: String,
    },
    /// Delete every conversation
    Clear,
    /// Remove conversations past the retention window
    Cleanup,
}

/// Initialize logging with the specified level. Logs go to stderr so they
/// never interleave with streamed replies on stdout.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("llamadeck={level},llamadeck_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Build a client from the config file, environment and flags
fn build_client(args: &Args) -> Result<Client<OllamaBackend>> {
    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(url) = &args.base_url {
        overrides = overrides.with_base_url(url.clone());
    }
    if let Some(dir) = &args.data_dir {
        overrides = overrides.with_data_dir(dir.clone());
    }
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    debug!(
        base_url = %config.service.base_url,
        data_dir = ?config.data_dir,
        source = ?config.source(),
        ephemeral = args.ephemeral,
        "Configuration resolved"
    );

    if args.ephemeral {
        let api = OllamaBackend::from_config(&config.service)?;
        Ok(Client::new(
            Arc::new(api),
            Arc::new(MemoryStore::new()),
            config,
        ))
    } else {
        Ok(Client::from_config(config)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let client = build_client(&args)?;
    let result = match args.command {
        Command::Status => commands::status(&client).await,
        Command::Models => commands::models(&client).await,
        Command::Ps => commands::ps(&client).await,
        Command::Show { model, verbose } => commands::show(&client, &model, verbose).await,
        Command::Pull { model, insecure } => commands::pull(&client, &model, insecure).await,
        Command::Rm { model } => commands::remove(&client, &model).await,
        Command::Cp {
            source,
            destination,
        } => commands::copy(&client, &source, &destination).await,
        Command::Embed {
            model,
            text,
            legacy,
        } => commands::embed(&client, &model, &text.join(" "), legacy).await,
        Command::Chat {
            model,
            think,
            new,
            prompt,
        } => {
            let options = commands::ChatOptions {
                model,
                think,
                new_conversation: new,
                prompt: (!prompt.is_empty()).then(|| prompt.join(" ")),
            };
            commands::chat(&client, options).await
        }
        Command::Conversations { action } => {
            commands::conversations(&client, action.unwrap_or(ConversationAction::List))
        }
        Command::Watch => commands::watch(&client).await,
    };

    // Persist whatever happened, even after a failed command
    if let Err(e) = client.shutdown() {
        tracing::error!(error = %e, "Failed to save session state");
    }
    result
}
