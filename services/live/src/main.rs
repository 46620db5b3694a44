//! Main Entrypoint for the Live Voice Assistant
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Loading the workspace and serving it to the model as MCP tools.
//! 3. Running a live voice session on the default microphone and speakers,
//!    or answering a single question about an image.

use anyhow::{Context, bail};
use async_openai::config::OpenAIConfig;
use clap::{Parser, Subcommand};
use gemini_realtime::{SessionController, SessionEvent, WsConnector};
use live_core::{
    ContextSnapshotProvider, SpeakerRole,
    llm_client::{InlineImage, MultimodalClient, MultimodalQuery, OpenAICompatibleClient},
    mcp::McpToolHost,
    workspace::{Workspace, WorkspaceService},
};
use live_service::{
    capture::CpalMicrophone,
    config::Config,
    playback::CpalPlaybackSink,
    workspace::{load_workspace, persist_changes},
};
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "live", version, about = "Talk to Gemini Live with your workspace at hand")]
struct Cli {
    /// Directory of Markdown documents exposed as tools (overrides WORKSPACE_PATH).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Prebuilt voice name (overrides LIVE_VOICE).
    #[arg(long, global = true)]
    voice: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live voice session. Type a line to send text, `/reset` to resume.
    Talk {
        /// Start with the microphone off.
        #[arg(long)]
        muted: bool,
    },
    /// Ask one question about an image.
    Ask {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(path) = cli.workspace {
        config.workspace_path = path;
    }
    if let Some(voice) = cli.voice {
        config.voice = voice;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded.");

    // --- 3. Load Workspace ---
    let workspace = Arc::new(Mutex::new(load_workspace(&config.workspace_path)?));
    let context = ContextSnapshotProvider::new(Arc::new(WorkspaceService::new(
        workspace.clone(),
        None,
    )));

    match cli.command {
        Command::Talk { muted } => talk(config, workspace, context, muted).await,
        Command::Ask { image, prompt } => ask(&config, context, &image, prompt).await,
    }
}

async fn talk(
    config: Config,
    workspace: Arc<Mutex<Workspace>>,
    context: ContextSnapshotProvider,
    muted: bool,
) -> anyhow::Result<()> {
    let (changes_tx, changes_rx) = mpsc::channel(16);
    let workspace_path = config.workspace_path.clone();
    tokio::spawn(async move { persist_changes(&workspace_path, changes_rx).await });

    let tools = McpToolHost::start(WorkspaceService::new(workspace, Some(changes_tx)))
        .await
        .context("Failed to start workspace tools")?;

    let live = config.live_config();
    info!(model = %live.model, voice = %live.voice, "Starting live session");
    let connector = WsConnector::new(&live);
    let (mut session, mut events) = SessionController::new(
        live,
        Box::new(connector),
        Box::new(CpalPlaybackSink::new()),
        Box::new(CpalMicrophone),
        Arc::new(tools),
        context,
    );
    let handle = session.init().await?;
    if muted {
        handle.stop_capture().await?;
    }
    let task = tokio::spawn(session.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut closing = false;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(event),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    let sent = match line {
                        "" => Ok(()),
                        "/reset" => handle.reset().await,
                        "/mute" => handle.stop_capture().await,
                        "/unmute" => handle.start_capture().await,
                        "/quit" => {
                            handle.close().await;
                            Ok(())
                        }
                        text => handle.send_text(text).await,
                    };
                    if let Err(e) = sent {
                        warn!(error = %e, "Session did not accept the request");
                    }
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = &mut shutdown, if !closing => {
                closing = true;
                info!("Received shutdown signal. Closing session...");
                handle.close().await;
            }
        }
    }

    task.await.context("Session task failed")?;
    info!("Session has shut down.");
    Ok(())
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::Utterance(utterance) => {
            let who = match utterance.role {
                SpeakerRole::User => "you",
                SpeakerRole::Agent => "gemini",
            };
            println!("{who}: {}", utterance.text);
        }
        SessionEvent::ModelText(text) => println!("gemini (text): {text}"),
        SessionEvent::Opened => info!("Session open. Start talking."),
        SessionEvent::Resuming { handle } => {
            info!(resumable = handle.is_some(), "Resuming session")
        }
        SessionEvent::Closed { reason } => info!(?reason, "Session closed"),
        SessionEvent::Error(e) => error!(error = %e, "Session error"),
        SessionEvent::GoAway { time_left } => {
            warn!(?time_left, "Server is ending the session; type /reset to resume")
        }
        other => debug!(?other, "Session event"),
    }
}

async fn ask(
    config: &Config,
    context: ContextSnapshotProvider,
    image: &Path,
    prompt: String,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(image)
        .with_context(|| format!("Failed to read image {}", image.display()))?;
    let mime_type = image_mime_type(image)?;
    context.refresh().await;

    let openai_config = OpenAIConfig::new()
        .with_api_key(config.gemini_api_key.expose_secret())
        .with_api_base(&config.chat_api_base);
    let client = OpenAICompatibleClient::new(openai_config, config.chat_model.clone(), context);
    let answer = client
        .ask(MultimodalQuery {
            image: InlineImage {
                bytes,
                mime_type: mime_type.to_string(),
            },
            prompt,
        })
        .await?;
    println!("{answer}");
    Ok(())
}

fn image_mime_type(path: &Path) -> anyhow::Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        other => bail!("unsupported image type '{other}'"),
    })
}
