//! lawnguard - on-board obstacle safety runtime
//!
//! Reads newline-delimited JSON from stdin, writes outbound envelopes to stdout

use clap::Parser;
use lawnguard_cns::{ActionSink, BroadcastSink};
use lawnguard_core::DetectorSource;
use lawnguard_eye::{Detector, ReplayDetector};
use lawnguard_learn::{JsonFileStore, LearningStore};
use lawnguard_server::{GuardConfig, GuardRuntime, Inbound};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lawnguard", version, about = "Obstacle safety runtime for autonomous mowers")]
struct Args {
    /// Configuration file (.toml, .yaml or .yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Directory for learned state; overrides learning.storage_path
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Outbound message buffer
    #[arg(long, default_value_t = 256)]
    outbound_capacity: usize,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            GuardConfig::from_file(path)?
        }
        None => GuardConfig::default(),
    };
    if let Some(dir) = &args.state_dir {
        config.learning.storage_path = Some(dir.join("learning.json"));
    }

    let store: Option<Arc<dyn LearningStore>> = config
        .learning
        .storage_path
        .clone()
        .map(|path| Arc::new(JsonFileStore::new(path)) as Arc<dyn LearningStore>);

    let sink = Arc::new(BroadcastSink::new(args.outbound_capacity));
    let mut outbound = sink.subscribe();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            match outbound.recv().await {
                Ok(message) => {
                    let line = match serde_json::to_string(&message.envelope()) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("Failed to encode {}: {}", message.topic(), e);
                            continue;
                        }
                    };
                    if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Err(RecvError::Lagged(skipped)) => warn!("Outbound writer lagged, skipped {} messages", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let detectors: Vec<Arc<dyn Detector>> = vec![
        Arc::new(ReplayDetector::new(DetectorSource::Primary)),
        Arc::new(ReplayDetector::new(DetectorSource::Backup)),
        Arc::new(ReplayDetector::new(DetectorSource::MotionCue)),
    ];

    let runtime = GuardRuntime::start(config, detectors, sink.clone() as Arc<dyn ActionSink>, store)?;
    info!("lawnguard ready, reading frames from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let inbound: Inbound = match serde_json::from_str(&line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Ignoring malformed input: {}", e);
                continue;
            }
        };

        let result = match inbound {
            Inbound::Frame(frame) => runtime.submit_frame(frame),
            Inbound::Feedback(event) => runtime.submit_feedback(event),
            Inbound::Environment(context) => runtime.update_environment(context),
            Inbound::Control(command) => {
                let response = runtime.control(command).await;
                let mut encoded = serde_json::to_vec(&response)?;
                encoded.push(b'\n');
                stdout.write_all(&encoded).await?;
                stdout.flush().await?;
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("Input rejected: {}", e);
        }
    }

    runtime.stop().await;
    drop(sink);
    if let Err(e) = writer.await {
        error!("Outbound writer ended abnormally: {}", e);
    }
    Ok(())
}
