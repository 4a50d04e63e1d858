use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_live::handles::{HandleStore, JsonFileRecords};
use loqa_live::live::{
    LiveEvent, LiveSessionClient, TranscriptAccumulator, Transport, WebSocketTransport,
};
use loqa_live::recording::{TurnRecorder, TurnRecorderConfig};
use loqa_live::{create_router, AppState, Config, SessionOrchestrator};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-live", version, about = "Live voice sessions with resumable conversations")]
struct Cli {
    /// Configuration file (without extension)
    #[arg(short, long, default_value = "config/loqa-live")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat over stdin with a conversation
    Chat {
        /// Conversation to continue (created if missing)
        #[arg(long, default_value = "cli")]
        conversation: String,

        /// Do not record response audio
        #[arg(long)]
        no_record: bool,
    },
    /// Serve the HTTP control API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Loqa Live v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Chat {
            conversation,
            no_record,
        } => chat(&cfg, &conversation, !no_record && cfg.audio.record).await,
        Command::Serve => serve(&cfg).await,
    }
}

async fn build(cfg: &Config) -> Result<(Arc<SessionOrchestrator>, Arc<JsonFileRecords>)> {
    let api_key = cfg.live.resolve_api_key()?;
    let transport: Arc<dyn Transport> =
        Arc::new(WebSocketTransport::new(cfg.live.endpoint.clone(), api_key));

    let path = cfg.storage.conversations_path();
    let records = Arc::new(
        JsonFileRecords::open(&path)
            .await
            .with_context(|| format!("Failed to open conversations at {}", path.display()))?,
    );
    info!("Conversations: {}", path.display());

    let handles = Arc::new(HandleStore::new(
        records.clone(),
        cfg.live.client.policy.clone(),
    ));
    let client = LiveSessionClient::new(transport, cfg.live.client.clone());
    let orchestrator = Arc::new(SessionOrchestrator::new(
        client,
        handles,
        cfg.live.orchestrator_settings(),
    ));

    Ok((orchestrator, records))
}

async fn serve(cfg: &Config) -> Result<()> {
    let (orchestrator, records) = build(cfg).await?;
    let app = create_router(AppState::new(orchestrator.clone(), records));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    orchestrator.disconnect();
    Ok(())
}

async fn chat(cfg: &Config, conversation_id: &str, record: bool) -> Result<()> {
    let (orchestrator, records) = build(cfg).await?;
    records
        .create_conversation(conversation_id, "CLI chat")
        .await?;

    let recorder = if record {
        let mut config = TurnRecorderConfig::new(cfg.audio.recordings_path());
        config.sample_rate = cfg.audio.output_sample_rate;
        Some(TurnRecorder::new(config)?)
    } else {
        None
    };
    let printer = tokio::spawn(print_events(orchestrator.subscribe(), recorder));

    orchestrator
        .connect_with_resumption(conversation_id)
        .await
        .context("Failed to connect")?;
    println!("Connected to conversation '{}'. Type 'quit' to exit.", conversation_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line.to_lowercase().as_str(), "quit" | "exit" | "bye" | "q") {
            break;
        }

        match orchestrator.send_text(line).await {
            Ok(true) => {}
            Ok(false) => warn!("Not sent, session is {:?}", orchestrator.state()),
            Err(e) => error!("Failed to send: {}", e),
        }
    }

    orchestrator.disconnect();
    printer.abort();
    println!("Bye.");
    Ok(())
}

async fn print_events(
    mut events: tokio::sync::broadcast::Receiver<LiveEvent>,
    mut recorder: Option<TurnRecorder>,
) {
    let mut transcript = TranscriptAccumulator::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            LiveEvent::OutputTranscriptFragment(fragment) => {
                print!("{}", fragment.text);
                transcript.push(&fragment);
            }
            LiveEvent::Content(part) => {
                if let Some(text) = part.text {
                    print!("{}", text);
                }
            }
            LiveEvent::Audio { data, .. } => {
                if let Some(recorder) = recorder.as_mut() {
                    if let Err(e) = recorder.write_audio(&data) {
                        error!("Failed to record audio: {}", e);
                    }
                }
            }
            LiveEvent::TurnComplete | LiveEvent::Interrupted => {
                if !transcript.take().is_empty() {
                    println!();
                }
                if let Some(recorder) = recorder.as_mut() {
                    if let Err(e) = recorder.finish_turn() {
                        error!("Failed to finish recording: {}", e);
                    }
                }
            }
            LiveEvent::SessionTimeoutWarning { time_left } => {
                warn!("Session ends in {:?}", time_left);
            }
            LiveEvent::Reconnecting { attempt, delay, .. } => {
                info!("Reconnecting (attempt {}) in {:?}", attempt, delay);
            }
            LiveEvent::Error { message, terminal } => {
                if terminal {
                    error!("Session lost: {}", message);
                } else {
                    warn!("{}", message);
                }
            }
            _ => {}
        }
    }
}
