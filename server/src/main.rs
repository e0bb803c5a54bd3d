use clap::Parser;
use log::{error, info};
use server::broadcaster::Broadcaster;
use server::chat_logger::ChatLogger;
use server::directory::FileServerDirectory;
use server::listener::{ListenerConfig, LogListener, Pipeline};
use server::match_manager::{Finalizers, MatchConfig, MatchManager};
use server::persistence::{JsonMatchStore, LogNotifier, NoServerState};
use server::resolver::SecretResolver;
use shared::{SourceLogParser, DEFAULT_LOG_PORT};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind the log listener to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// UDP port game servers send their logs to
    #[clap(short, long, default_value_t = DEFAULT_LOG_PORT)]
    port: u16,
    /// JSON file listing known servers and their log secrets
    #[clap(short, long, default_value = "servers.json")]
    servers: PathBuf,
    /// Directory finished matches are written to
    #[clap(short, long, default_value = "matches")]
    matches_dir: PathBuf,
    /// Seconds between server secret refreshes
    #[clap(long, default_value = "300")]
    secret_refresh_secs: u64,
    /// Team final score lines that end a match
    #[clap(long, default_value = "2")]
    final_score_threshold: u32,
    /// Log filter used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    log_level: String,
}

/// Main-method of the application.
/// Wires the listener, the match manager and the chat logger together and
/// runs them until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let directory = Arc::new(FileServerDirectory::new(&args.servers));
    let broadcaster = Arc::new(Broadcaster::new());
    let pipeline = Pipeline {
        resolver: Arc::new(SecretResolver::new(directory.clone())),
        directory,
        parser: Arc::new(SourceLogParser),
        broadcaster: Arc::clone(&broadcaster),
    };

    let config = ListenerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        secret_refresh: Duration::from_secs(args.secret_refresh_secs),
        ..ListenerConfig::default()
    };
    let listener = LogListener::bind(config, pipeline).await?;
    info!("Listening for logs on {}", listener.local_addr()?);
    let stats = listener.stats();

    let manager = Arc::new(MatchManager::new(
        Arc::clone(&broadcaster),
        Finalizers {
            store: Arc::new(JsonMatchStore::new(&args.matches_dir)),
            notifier: Arc::new(LogNotifier),
            states: Arc::new(NoServerState),
        },
        MatchConfig {
            final_score_threshold: args.final_score_threshold,
        },
    ));

    let cancel = CancellationToken::new();

    let manager_handle = tokio::spawn(Arc::clone(&manager).run(cancel.clone()));
    let chat_handle = tokio::spawn(ChatLogger::new(Arc::clone(&broadcaster)).run(cancel.clone()));
    let mut listener_handle = tokio::spawn(listener.run(cancel.clone()));

    // Handle shutdown gracefully
    tokio::select! {
        result = &mut listener_handle => {
            match result {
                Ok(Ok(())) => info!("Listener stopped"),
                Ok(Err(e)) => error!("Listener failed: {}", e),
                Err(e) => error!("Listener task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    cancel.cancel();
    if !listener_handle.is_finished() {
        if let Err(e) = listener_handle.await {
            error!("Listener task panicked: {}", e);
        }
    }
    match manager_handle.await {
        Ok(Err(e)) => error!("Match manager failed: {}", e),
        Err(e) => error!("Match manager task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    match chat_handle.await {
        Ok(Ok(written)) => info!("Logged {} chat messages", written),
        Ok(Err(e)) => error!("Chat logger failed: {}", e),
        Err(e) => error!("Chat logger task panicked: {}", e),
    }

    let totals = stats.snapshot();
    info!(
        "Processed {} packets: {} events, {} legacy, {} malformed, {} unknown secrets",
        totals.packets, totals.emitted, totals.legacy, totals.malformed, totals.unknown_secret
    );

    Ok(())
}
