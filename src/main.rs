//! perceva-daemon: background host for the perceptual session controller
//!
//! Runs the controller against the in-process simulated host and provides:
//! - IPC server for UI clients (status, camera/voice/narration toggles,
//!   event subscription)
//! - Voice commands typed on stdin, delivered as final transcripts
//! - Structured logging of every session event

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use perceva_daemon::config::Config;
use perceva_daemon::host::simulated::{
    ScriptedModel, ScriptedModelProvider, SimulatedCamera, SimulatedHost, SimulatedRecognizer,
};
use perceva_daemon::host::Prediction;
use perceva_daemon::ipc::Server;
use perceva_daemon::lifecycle::ShutdownSignal;
use perceva_daemon::session::{DetectionContext, SessionController};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "perceva-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        poll_ms = config.detection.poll_interval.as_millis() as u64,
        narration_probability = config.detection.narration_probability,
        language = %config.voice.language,
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new()?;

    // Simulated host: every frame shows a person
    let host = SimulatedHost::new(SimulatedCamera::new(), SimulatedRecognizer::auto_ack());
    let model = Arc::new(ScriptedModel::default());
    model.set_fallback(vec![Prediction::new("person", 0.92)]);
    let context = DetectionContext::new(Arc::new(ScriptedModelProvider::new(model)));

    let controller = SessionController::spawn(host.capabilities(), context, &config);
    let mut events = controller.subscribe();

    let server = Server::new(&config.socket_path, controller.clone())?;
    let recognizer = Arc::clone(&host.recognizer);

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Typed lines stand in for spoken commands
        _ = async {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if !recognizer.say(line) {
                            warn!("voice commands have never been enabled, ignoring input");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(?e, "failed to read stdin");
                        break;
                    }
                }
            }
            // Keep serving after stdin closes
            std::future::pending::<()>().await
        } => {}

        // Log session events
        _ = async {
            loop {
                match events.recv().await {
                    Ok(event) => info!(%event, "session event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("session event stream closed");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    if let Err(e) = controller.shutdown().await {
        warn!(%e, "controller already stopped");
    }
    server.shutdown().await;

    info!("perceva-daemon stopped");

    Ok(())
}
