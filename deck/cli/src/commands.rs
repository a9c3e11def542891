//! Subcommand handlers
//!
//! Each handler drives one slice of the client and prints plain text to
//! stdout. Long-running commands (chat replies, pulls, watch) stop on Ctrl-C.

use std::io::Write;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use llamadeck_core::backend::{EmbedInput, EmbedRequest};
use llamadeck_core::{
    now_ms, Client, ClientError, ConversationId, OllamaBackend, RequestId, SendRequest,
};

use crate::ConversationAction;

type DeckClient = Client<OllamaBackend>;

// ============================================================================
// Status and catalog
// ============================================================================

pub async fn status(client: &DeckClient) -> Result<()> {
    let connected = client.supervisor().check_connection().await;
    println!("service:        {}", client.config().service.base_url);
    println!("connection:     {}", client.connection_state());
    if connected {
        match client.version().await {
            Ok(info) => println!("version:        {}", info.version),
            Err(e) => warn!(error = %e, "Version lookup failed"),
        }
    }

    let session = client.session();
    let stats = session.expired_stats();
    println!("conversations:  {}", stats.total);
    println!(
        "expired:        {} (older than {} days)",
        stats.expired, stats.cleanup_days
    );
    let default_model = &session.settings().default_model;
    if !default_model.is_empty() {
        println!("default model:  {default_model}");
    }
    Ok(())
}

pub async fn models(client: &DeckClient) -> Result<()> {
    let models = client
        .catalog()
        .refresh_models()
        .await
        .context("Failed to list models")?;
    if models.is_empty() {
        println!("No models installed. Try `llamadeck pull <model>`.");
        return Ok(());
    }

    let session = client.session();
    let selected = session.selected_model();
    for model in &models {
        let marker = if model.name == selected { "*" } else { " " };
        let capabilities: Vec<String> = session.capabilities(&model.name).into_iter().collect();
        println!(
            "{marker} {:<32} {:>10}  {:<8} {}",
            model.name,
            format_size(model.size),
            model.details.parameter_size,
            capabilities.join(",")
        );
    }
    Ok(())
}

pub async fn ps(client: &DeckClient) -> Result<()> {
    let running = client
        .catalog()
        .refresh_running()
        .await
        .context("Failed to list running models")?;
    if running.is_empty() {
        println!("No models loaded.");
        return Ok(());
    }
    for model in &running {
        println!(
            "{:<32} {:>10} {:>10} VRAM  until {}",
            model.name,
            format_size(model.size),
            format_size(model.size_vram),
            model.expires_at
        );
    }
    Ok(())
}

pub async fn show(client: &DeckClient, model: &str, verbose: bool) -> Result<()> {
    let info = client
        .catalog()
        .show(model, verbose)
        .await
        .with_context(|| format!("Failed to show {model}"))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub async fn pull(client: &DeckClient, model: &str, insecure: bool) -> Result<()> {
    let mut channel = client
        .pull_stream(model, insecure, None)
        .await
        .with_context(|| format!("Failed to start pulling {model}"))?;
    debug!(request_id = %channel.id(), model, "Pull started");

    let mut last_status = String::new();
    let mut completed = false;
    loop {
        let next = tokio::select! {
            next = channel.next() => next,
            _ = tokio::signal::ctrl_c() => {
                channel.cancel();
                eprintln!();
                bail!("Pull of {model} cancelled");
            }
        };
        let Some(progress) = next else { break };
        let progress = progress.with_context(|| format!("Pull of {model} failed"))?;

        match (progress.completed, progress.total) {
            (Some(done), Some(total)) if total > 0 => {
                eprint!(
                    "\r{:<40} {:>3}% ({} / {})",
                    progress.status,
                    done * 100 / total,
                    format_size(done),
                    format_size(total)
                );
            }
            _ if progress.status != last_status => {
                if !last_status.is_empty() {
                    eprintln!();
                }
                eprint!("{}", progress.status);
            }
            _ => {}
        }
        completed = progress.status == "success";
        last_status = progress.status;
    }
    eprintln!();

    if !completed {
        bail!("Pull of {model} ended without success");
    }
    client.catalog().refresh_models().await?;
    println!("Pulled {model}");
    Ok(())
}

pub async fn remove(client: &DeckClient, model: &str) -> Result<()> {
    client
        .catalog()
        .delete(model)
        .await
        .with_context(|| format!("Failed to delete {model}"))?;
    println!("Deleted {model}");
    Ok(())
}

pub async fn copy(client: &DeckClient, source: &str, destination: &str) -> Result<()> {
    client
        .catalog()
        .copy(source, destination)
        .await
        .with_context(|| format!("Failed to copy {source}"))?;
    println!("Copied {source} to {destination}");
    Ok(())
}

pub async fn embed(client: &DeckClient, model: &str, text: &str, legacy: bool) -> Result<()> {
    let vector = if legacy {
        client.embeddings(model, text).await?.embedding
    } else {
        let request = EmbedRequest::new(model, EmbedInput::Single(text.to_string()));
        client
            .embed(&request)
            .await?
            .embeddings
            .into_iter()
            .next()
            .unwrap_or_default()
    };
    println!("{}", serde_json::to_string(&vector)?);
    Ok(())
}

// ============================================================================
// Chat
// ============================================================================

/// What the `chat` subcommand was asked to do
pub struct ChatOptions {
    pub model: Option<String>,
    pub think: bool,
    pub new_conversation: bool,
    pub prompt: Option<String>,
}

pub async fn chat(client: &DeckClient, options: ChatOptions) -> Result<()> {
    if !client.initialize().await {
        bail!(
            "Cannot reach {}: {}",
            client.config().service.base_url,
            client.connection_state()
        );
    }
    if let Some(model) = &options.model {
        client.switch_model(model);
    }
    if client.session().selected_model().is_empty() {
        bail!("No model selected. Install one with `llamadeck pull <model>`.");
    }
    if options.new_conversation {
        client.new_conversation();
    }

    if let Some(prompt) = options.prompt {
        return send_one(client, &prompt, options.think).await;
    }

    eprintln!(
        "Chatting with {}. Empty line or Ctrl-D to quit, Ctrl-C stops a reply.",
        client.session().selected_model()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;
        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Err(e) = send_one(client, line, options.think).await {
            eprintln!("error: {e:#}");
        }
    }
    Ok(())
}

/// Send one prompt, streaming the reply to stdout. Ctrl-C cancels only
/// this request; the partial reply stays in the conversation.
async fn send_one(client: &DeckClient, prompt: &str, think: bool) -> Result<()> {
    let id = RequestId::generate("chat");
    let mut request = SendRequest::new(prompt).with_request_id(id.clone());
    if think {
        request = request.with_think(true);
    }

    let mut in_thinking = false;
    let send = client.send_message(request, |record| {
        let mut out = std::io::stdout().lock();
        if let Some(thinking) = record.message.thinking.as_deref().filter(|t| !t.is_empty()) {
            if !in_thinking {
                let _ = write!(out, "[thinking] ");
                in_thinking = true;
            }
            let _ = write!(out, "{thinking}");
        }
        if !record.message.content.is_empty() {
            if in_thinking {
                let _ = writeln!(out, "\n");
                in_thinking = false;
            }
            let _ = write!(out, "{}", record.message.content);
        }
        let _ = out.flush();
    });
    tokio::pin!(send);

    let result = tokio::select! {
        result = &mut send => result,
        _ = tokio::signal::ctrl_c() => {
            client.cancel_request(&id);
            send.await
        }
    };
    println!();

    match result {
        Ok(outcome) => {
            if let Some(sample) = outcome.sample {
                eprintln!(
                    "[{} tokens, {:.1} tok/s, {:.0} ms]",
                    sample.total_tokens, sample.tokens_per_second, sample.response_time
                );
            }
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("[stopped]");
            Ok(())
        }
        Err(ClientError::NoModelSelected) => bail!("No model selected"),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Conversations
// ============================================================================

pub fn conversations(client: &DeckClient, action: ConversationAction) -> Result<()> {
    match action {
        ConversationAction::List => {
            let session = client.session();
            let current = session.current_id();
            if session.conversations().is_empty() {
                println!("No conversations.");
            }
            let now = now_ms();
            for conversation in session.conversations() {
                let marker = if Some(&conversation.id) == current { "*" } else { " " };
                println!(
                    "{marker} {}  {:<32} {:<20} {:>3} msgs  {} ago",
                    conversation.id,
                    conversation.title,
                    conversation.model,
                    conversation.messages.len(),
                    format_age(conversation.idle_ms(now))
                );
            }
        }
        ConversationAction::Show { id } => {
            let session = client.session();
            let id = ConversationId::from(id);
            let Some(conversation) = session.conversation(&id) else {
                bail!("No conversation {id}");
            };
            println!("# {} ({})", conversation.title, conversation.model);
            for message in &conversation.messages {
                println!("\n[{:?}]\n{}", message.role, message.content);
            }
        }
        ConversationAction::Switch { id } => {
            let id = ConversationId::from(id);
            if !client.switch_conversation(&id) {
                bail!("No conversation {id}");
            }
            println!("Switched to {id}");
        }
        ConversationAction::Clear => {
            client.clear_conversations();
            println!("All conversations deleted");
        }
        ConversationAction::Cleanup => {
            let removed = client.cleanup_expired();
            println!("Removed {removed} expired conversation(s)");
        }
    }
    Ok(())
}

// ============================================================================
// Watch
// ============================================================================

pub async fn watch(client: &DeckClient) -> Result<()> {
    let mut transitions = client.transitions();
    let mut connection = client.connection();
    client.initialize().await;
    println!("{}", client.connection_state());

    loop {
        tokio::select! {
            transition = transitions.recv() => match transition {
                Ok(t) => println!("{:?} -> {:?}", t.from, t.to),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed connection transitions");
                }
                Err(RecvError::Closed) => break,
            },
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = connection.borrow_and_update().clone();
                if state.reconnecting {
                    println!("  {state}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

// ============================================================================
// Formatting
// ============================================================================

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-readable byte count in powers of 1000
fn format_size(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Coarse age such as "5m" or "3d"
fn format_age(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(999), "999 B");
        assert_eq!(format_size(1_500), "1.5 KB");
        assert_eq!(format_size(4_661_224_676), "4.7 GB");
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(0), "0s");
        assert_eq!(format_age(90_000), "1m");
        assert_eq!(format_age(2 * 3_600_000), "2h");
        assert_eq!(format_age(3 * 86_400_000), "3d");
    }
}
