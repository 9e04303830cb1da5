//! Area Pilot daemon
//!
//! Binds the frame, event and control sockets and runs a control session
//! that injects input through `xdotool`/`xclip`.

use anyhow::{bail, Context, Result};
use area_pilot::config::Config;
use area_pilot::session::Session;
use area_pilot::sink::CommandSink;
use area_pilot::transport::unix;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line options
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    display: Option<String>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args::default();
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    args.config = Some(iter.next().context("--config needs a path")?.into());
                }
                "--display" | "-d" => {
                    args.display = Some(iter.next().context("--display needs a value")?);
                }
                other => bail!("Unknown argument: {}", other),
            }
        }
        Ok(args)
    }
}

/// Input sink for the daemon, optionally pinned to one X display
fn command_sink(target: Option<String>) -> CommandSink {
    let sink = CommandSink::new();
    match target {
        Some(target) => {
            info!("Injecting input on DISPLAY={}", target);
            sink.with_display(target)
        }
        None => sink,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;
    let (config, source) = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Area Pilot control plane");
    source.log(&config);

    // Setup signal handlers for graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
            }
            let _ = shutdown_tx.send(()).await;
        });
    }

    let (channels, binding) = unix::bind(&config.channels).context("Failed to acquire control channels")?;

    let session = match Session::new(&config, channels, Arc::new(command_sink(args.display))) {
        Ok(session) => session,
        Err(e) => {
            binding.shutdown();
            return Err(e).context("Invalid configuration");
        }
    };

    session
        .run(async move {
            shutdown_rx.recv().await;
        })
        .await;

    binding.shutdown();
    info!("Area Pilot stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_sink_display() {
        assert_eq!(command_sink(Some(":2".to_string())).display(), Some(":2"));
        assert_eq!(command_sink(None).display(), None);
    }
}
