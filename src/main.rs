use clap::Parser;
use parley::agents::core::{AgentEvent, AgentLoop, ChatSession, RoundOutcome, VaultExecutor};
use parley::agents::domain::Conversation;
use parley::agents::error::AgentError;
use parley::agents::limiter::Semaphore;
use parley::agents::llm::{create_provider, HttpTransport, StreamOrchestrator, Transport};
use parley::agents::memory::create_store;
use parley::agents::naming::{ConversationNamer, OpenAiTitleGenerator};
use parley::cli::Cli;
use parley::config::Settings;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::new_with_cli(&cli)?;

    // Initialize tracing (RUST_LOG wins over the configured level)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = create_store(&settings.storage)?;

    if cli.list {
        for summary in store.list(50, 0).await? {
            println!(
                "{}  {}  {} turns  {}",
                summary.id,
                summary.updated.format("%Y-%m-%d %H:%M"),
                summary.turn_count,
                summary.title
            );
        }
        return Ok(());
    }

    let provider = create_provider(&settings.provider)?;
    info!("Chatting with {} ({})", provider.model(), provider.kind());

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());
    let limiter = Arc::new(Semaphore::new(settings.limits.max_concurrent_requests, true));
    let agent = AgentLoop::new(
        provider,
        StreamOrchestrator::new(transport.clone()),
        Arc::new(VaultExecutor::new(&settings.vault)),
        settings.agent.clone(),
    )
    .with_store(store.clone())
    .with_limiter(limiter);

    let conversation = match &cli.conversation {
        Some(id) => store
            .load(id)
            .await?
            .ok_or_else(|| AgentError::ConversationNotFound(id.clone()))?,
        None => Conversation::new(),
    };

    let shutdown = CancellationToken::new();
    let mut session = ChatSession::new(Arc::new(agent), conversation, shutdown.clone());
    if settings.naming.enabled {
        match OpenAiTitleGenerator::new(transport.clone(), &settings.provider, &settings.naming) {
            Ok(generator) => {
                session = session.with_namer(Arc::new(ConversationNamer::new(Arc::new(generator), store.clone())));
            }
            Err(e) => warn!("Conversation naming disabled: {}", e),
        }
    }
    let session = Arc::new(session);

    // Ctrl-C stops the running prompt, or exits when idle
    {
        let session = session.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if session.is_running() {
                    session.stop();
                } else {
                    shutdown.cancel();
                    break;
                }
            }
        });
    }

    if let Some(prompt) = &cli.prompt {
        ask(&session, prompt).await;
    } else {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };
            let prompt = line.trim();
            if prompt.is_empty() {
                continue;
            }
            ask(&session, prompt).await;
        }
    }

    session.naming_finished().await;
    let conversation = session.conversation().await;
    info!("Conversation {} \"{}\" saved", conversation.id, conversation.title);

    Ok(())
}

/// Submit one prompt, printing text as it streams
async fn ask(session: &ChatSession, prompt: &str) -> RoundOutcome {
    let (sender, mut events) = mpsc::channel(64);

    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Text(text) => {
                    let _ = write!(stdout, "{}", text);
                    let _ = stdout.flush();
                }
                AgentEvent::FunctionCall(call) => eprintln!("\n[{} {}]", call.name, serde_json::Value::Object(call.arguments)),
                AgentEvent::Finished(_) => println!(),
                _ => {}
            }
        }
    });

    let outcome = session.submit(prompt, Some(&sender)).await;
    drop(sender);
    let _ = printer.await;

    match &outcome {
        RoundOutcome::Completed => {}
        RoundOutcome::Aborted => eprintln!("(cancelled)"),
        other => eprintln!("({})", other),
    }
    outcome
}
