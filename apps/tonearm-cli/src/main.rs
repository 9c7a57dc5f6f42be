//! Tonearm CLI - headless front end for the Tonearm playback engine.
//!
//! Plays the references given on the command line into a local frame sink
//! and accepts a few playback commands on stdin. It exercises the same
//! engine a chat bot front end would embed.

mod config;
mod providers;
mod sink;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast;
use tonearm_core::protocol_constants::APP_NAME;
use tonearm_core::{
    bootstrap_services, BroadcastEvent, Collaborators, HttpFetcher, PlayOptions, QueueMode,
    Session,
};

use crate::config::CliConfig;
use crate::providers::local_providers;
use crate::sink::FileSinkConnector;

const GROUP_ID: &str = "cli";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Tonearm - Stream media references into a local frame sink.
#[derive(Parser, Debug)]
#[command(name = "tonearm")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TONEARM_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Cache directory (overrides config file).
    #[arg(long, env = "TONEARM_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Directory for raw frame dumps (overrides config file).
    #[arg(short, long, env = "TONEARM_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Destination channel name (overrides config file).
    #[arg(long)]
    channel: Option<String>,

    /// Keep playing related tracks after the queue runs out.
    #[arg(long)]
    autoplay: bool,

    /// Exit once nothing is queued or playing.
    #[arg(long)]
    exit_when_idle: bool,

    /// Links or search queries to queue, in order.
    #[arg(value_name = "REFERENCE")]
    references: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("{} v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        CliConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(cache_dir) = args.cache_dir {
        config.engine.download.cache_dir = cache_dir;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = Some(output_dir);
    }
    if let Some(channel) = args.channel {
        config.channel = channel;
    }
    config.exit_when_idle |= args.exit_when_idle;

    log::info!(
        "Configuration: channel={}, cache_dir={}, output={}",
        config.channel,
        config.engine.download.cache_dir.display(),
        config
            .output_dir
            .as_ref()
            .map_or_else(|| "discard".to_string(), |d| d.display().to_string())
    );

    let core_config = config.to_core_config();
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let collaborators = Collaborators {
        providers: local_providers(client.clone(), core_config.resolver.scrape_timeout()),
        fetcher: Arc::new(HttpFetcher::new(client, CONNECT_TIMEOUT)),
        connector: Arc::new(FileSinkConnector::new(config.output_dir.clone())),
        emitter: None,
    };

    let services = bootstrap_services(&core_config, collaborators)
        .await
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let printer = tokio::spawn(print_events(services.event_bridge.subscribe()));

    let session = services
        .registry
        .get_or_create(GROUP_ID, &config.channel)
        .await;
    session.set_autoplay(args.autoplay);

    for reference in &args.references {
        match session.play(reference, PlayOptions::default()).await {
            Ok(position) => log::info!("Queued {:?} at {}", reference, position),
            Err(e) => log::error!("Cannot queue {:?}: {}", reference, e),
        }
    }

    let mut commands = tokio::spawn(read_commands(Arc::clone(&session)));

    tokio::select! {
        _ = shutdown_signal() => log::info!("Shutdown signal received, cleaning up..."),
        _ = wait_idle(&session), if config.exit_when_idle => log::info!("Queue drained, cleaning up..."),
        _ = &mut commands => log::info!("Quit requested, cleaning up..."),
    }

    commands.abort();

    // Graceful shutdown
    services.registry.remove(GROUP_ID).await;
    services.shutdown().await;
    printer.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Prints every broadcast event as one JSON line.
async fn print_events(mut rx: broadcast::Receiver<BroadcastEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => log::warn!("Failed to serialize event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("Event printer lagged, {} event(s) dropped", n);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Resolves once nothing is queued or playing.
async fn wait_idle(session: &Session) {
    loop {
        tokio::time::sleep(IDLE_POLL).await;
        if session.now_playing().is_none() && session.list_queue().is_empty() {
            return;
        }
    }
}

/// Applies line commands from stdin. Returns once `quit` is read; a closed
/// stdin leaves playback running.
async fn read_commands(session: Arc<Session>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return std::future::pending().await,
            Err(e) => {
                log::warn!("Failed to read stdin: {}", e);
                return std::future::pending().await;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            return;
        }
        if let Err(e) = run_command(&session, line).await {
            println!("error: {e:#}");
        }
    }
}

async fn run_command(session: &Session, line: &str) -> Result<()> {
    let (command, arg) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(c, a)| (c, a.trim()));
    match command {
        "play" | "next" | "now" => {
            let mode = match command {
                "next" => QueueMode::Next,
                "now" => QueueMode::Now,
                _ => QueueMode::Append,
            };
            let options = PlayOptions {
                mode,
                ..PlayOptions::default()
            };
            let position = session.play(arg, options).await?;
            println!("queued at {position}");
        }
        "skip" => session.skip()?,
        "seek" => {
            let offset: i64 = arg.parse().context("seek takes a signed offset in ms")?;
            let position = session.seek(offset).await?;
            println!("at {:.1}s", position.as_secs_f64());
        }
        "queue" => {
            for entry in session.list_queue() {
                let state = if entry.ready { "ready" } else { "pending" };
                println!("{:>3}. {} [{}]", entry.index, entry.title, state);
            }
        }
        "remove" => {
            let index: usize = arg.parse().context("remove takes a queue index")?;
            let entry = session.remove(index)?;
            println!("removed {}", entry.title);
        }
        "autoplay" => session.set_autoplay(parse_switch(arg)?),
        "loop" => session.set_loop(parse_switch(arg)?),
        "np" => match session.now_playing() {
            Some(np) => println!(
                "{} ({}) {:.1}s{}",
                np.title,
                np.url,
                np.position.as_secs_f64(),
                if np.paused { " paused" } else { "" }
            ),
            None => println!("nothing playing"),
        },
        "listeners" => {
            let humans: usize = arg.parse().context("listeners takes a count")?;
            session.on_occupancy_changed(humans);
        }
        _ => anyhow::bail!("unknown command {command:?}"),
    }
    Ok(())
}

fn parse_switch(arg: &str) -> Result<bool> {
    match arg {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => anyhow::bail!("expected on or off, got {arg:?}"),
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
