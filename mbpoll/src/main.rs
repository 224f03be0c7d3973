//! Modbus polling monitor.
//!
//! Loads a poll list and link settings, then either runs a single pass
//! (`--once`) or restarts a pass every monitor interval until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use mbpoll::{Engine, EngineEvent, EventKind, MbpollConfig, ModbusTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Poll a Modbus device on a fixed schedule.
#[derive(Parser, Debug)]
#[command(name = "mbpoll")]
#[command(about = "Polls a Modbus device and logs the results")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "mbpoll.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Run a single pass and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = MbpollConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = config.logging.with_level_override(args.log_level.as_deref());
    mbpoll_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting mbpoll");
    info!("Loaded configuration from {:?}", args.config);

    let engine = Engine::spawn(Arc::new(ModbusTransport::new()), config.modbus.clone());

    engine.on(EventKind::Data, |event| {
        if let EngineEvent::Data(data) = event {
            match serde_json::to_string(data) {
                Ok(json) => info!(target: "mbpoll::data", "{}", json),
                Err(e) => warn!("Failed to encode data: {}", e),
            }
        }
    });
    engine.on(EventKind::Error, |event| {
        if let EngineEvent::Error(error) = event {
            warn!(error = %error, "Modbus error");
        }
    });
    engine.on(EventKind::Connect, |event| {
        if let EngineEvent::Connect { kind, config } = event {
            info!(kind = %kind, host = %config.host, "Connected");
        }
    });

    engine
        .install(config.poll_list.clone())
        .await
        .context("Failed to install poll list")?;

    if args.once {
        let stopped = Arc::new(Notify::new());
        let notify = stopped.clone();
        engine.on(EventKind::PollingStop, move |_| notify.notify_one());

        engine.start_polling().await.context("Failed to start polling")?;

        tokio::select! {
            _ = stopped.notified() => {
                let snapshot = engine.snapshot().await?;
                info!(state = %snapshot.state, "Pass finished");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                engine.stop_polling().await?;
            }
        }
    } else {
        engine.start_monitor().await.context("Failed to start monitor")?;
        info!(
            "Monitoring {} item(s) every {} ms",
            config.poll_list.len(),
            config.modbus.monitor_interval_ms
        );

        // Wait for shutdown signal
        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");
        engine.stop_monitor().await?;
    }

    if engine.is_open() {
        if let Err(e) = engine.close().await {
            warn!("Failed to close connection: {}", e);
        }
    }
    engine.shutdown();
    info!("mbpoll stopped");

    Ok(())
}
