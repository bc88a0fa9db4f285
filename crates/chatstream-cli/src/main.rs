//! `chatstream`: replay a recorded response stream or send a live prompt.

mod replay;

use std::path::PathBuf;

use chatstream_client::{ChatClient, ClientConfig, TokenMode};
use chatstream_core::ClientEvent;
use chatstream_core::artifact::AppId;
use clap::{Parser, Subcommand};

use crate::replay::{ReplayOptions, replay};

/// Streaming chat client. Prints every client event as one JSON line on stdout.
#[derive(Parser)]
#[command(name = "chatstream", version, about)]
struct Cli {
    /// Show only the named field of a JSON token stream.
    #[arg(long, global = true)]
    token_field: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a recorded `data:` transcript through the pipeline.
    Replay {
        /// Transcript file.
        file: PathBuf,
        /// Bytes per simulated network chunk.
        #[arg(long, default_value_t = 64)]
        chunk_size: usize,
        /// Prompt text that triggered the recorded response.
        #[arg(long, default_value = "replayed prompt")]
        input: String,
        /// App open in the sidebar (e.g. `image-studio`, `writer`).
        #[arg(long, value_parser = parse_app)]
        app: Option<AppId>,
        /// Treat the sidebar as visible.
        #[arg(long)]
        sidebar: bool,
    },
    /// Send a prompt to the endpoint configured by `CHATSTREAM_*` variables.
    Send {
        /// Prompt text.
        prompt: String,
        /// JSON metadata forwarded with the prompt.
        #[arg(long, default_value = "{}")]
        metadata: String,
    },
}

fn parse_app(raw: &str) -> Result<AppId, String> {
    raw.parse::<AppId>().map_err(|e| e.to_string())
}

fn print_event(event: &ClientEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(err) => eprintln!("failed to encode {} event: {err}", event.name()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    chatstream_core::init_observability();
    let cli = Cli::parse();
    let token_mode = cli
        .token_field
        .map(TokenMode::JsonField)
        .unwrap_or_default();

    match cli.command {
        Commands::Replay {
            file,
            chunk_size,
            input,
            app,
            sidebar,
        } => {
            let mut options = ReplayOptions::new(file, input);
            options.chunk_size = chunk_size;
            options.app = app;
            options.sidebar_visible = sidebar;
            options.token_mode = token_mode;
            let summary = replay(&options, print_event).await?;
            eprintln!(
                "replayed request {}: {} task(s), {} artifact(s)",
                summary.request_id,
                summary.tasks.len(),
                summary.artifacts.len()
            );
        }
        Commands::Send { prompt, metadata } => {
            let metadata: serde_json::Value = serde_json::from_str(&metadata)?;
            let mut config = ClientConfig::from_env()?;
            if token_mode != TokenMode::Plain {
                config = config.token_mode(token_mode);
            }
            let mut client = ChatClient::new(config)?;
            client.subscribe(print_event);
            let request_id = client.send_prompt(prompt, metadata).await?;
            eprintln!("request {request_id} finished");
        }
    }
    Ok(())
}
