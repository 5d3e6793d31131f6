//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! session events to subscribed clients.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::session::{ControllerClosed, ControllerHandle};

use super::protocol::{read_frame, write_message, Notification, Request, Response};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    controller: ControllerHandle,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the socket, replacing a stale one
    pub fn new(socket_path: &Path, controller: ControllerHandle) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            controller,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let controller = self.controller.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, controller) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, controller: ControllerHandle) -> Result<()> {
        let (reader, writer) = stream.into_split();
        let (request_tx, request_rx) = mpsc::channel(16);
        let reader_task = tokio::spawn(Self::read_requests(reader, request_tx));

        let result = Self::serve_client(writer, request_rx, controller).await;
        reader_task.abort();
        result
    }

    /// Answer requests and, once subscribed, push session events
    async fn serve_client(
        mut writer: OwnedWriteHalf,
        mut requests: mpsc::Receiver<std::result::Result<Request, String>>,
        controller: ControllerHandle,
    ) -> Result<()> {
        let mut events: Option<broadcast::Receiver<SessionEvent>> = None;

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else {
                        debug!("client disconnected");
                        return Ok(());
                    };

                    let response = match request {
                        Ok(request) => {
                            debug!(?request, "received request");
                            let (response, subscribe) =
                                Self::process_request(request, &controller).await;
                            if subscribe && events.is_none() {
                                events = Some(controller.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            response
                        }
                        Err(message) => Response::error("invalid_request", message),
                    };

                    write_message(&mut writer, &response).await?;
                }

                event = next_event(&mut events) => match event {
                    Ok(event) => {
                        write_message(&mut writer, &Notification::Event { event }).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                    }
                },
            }
        }
    }

    /// Decode requests until the client disconnects or sends garbage framing
    async fn read_requests(
        mut reader: OwnedReadHalf,
        requests: mpsc::Sender<std::result::Result<Request, String>>,
    ) {
        loop {
            let body = match read_frame(&mut reader).await {
                Ok(Some(body)) => body,
                Ok(None) => return,
                Err(e) => {
                    warn!(?e, "failed to read request, disconnecting");
                    return;
                }
            };

            let request = serde_json::from_slice::<Request>(&body)
                .map_err(|e| format!("failed to parse request: {}", e));
            if requests.send(request).await.is_err() {
                return;
            }
        }
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, controller: &ControllerHandle) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => match controller.snapshot().await {
                Ok(snapshot) => (Response::Status(snapshot), false),
                Err(e) => (closed(e), false),
            },

            Request::StartCamera => (ack(controller.start_camera()), false),
            Request::StopCamera => (ack(controller.stop_camera()), false),
            Request::ToggleCamera => (ack(controller.toggle_camera()), false),
            Request::ToggleVoice => (ack(controller.toggle_voice()), false),
            Request::ToggleNarration => (ack(controller.toggle_narration()), false),
            Request::ReadDescription => (ack(controller.read_description()), false),

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> std::result::Result<SessionEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn ack(result: std::result::Result<(), ControllerClosed>) -> Response {
    match result {
        Ok(()) => Response::Ack,
        Err(e) => closed(e),
    }
}

fn closed(e: ControllerClosed) -> Response {
    Response::error("controller_closed", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::simulated::{
        ScriptedModel, ScriptedModelProvider, SimulatedCamera, SimulatedHost, SimulatedRecognizer,
    };
    use crate::session::{CaptureStatus, DetectionContext, SessionController};
    use std::sync::Arc;

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("perceva-{}-{}.sock", name, std::process::id()))
    }

    fn controller() -> ControllerHandle {
        let host = SimulatedHost::new(SimulatedCamera::new(), SimulatedRecognizer::auto_ack());
        let provider = Arc::new(ScriptedModelProvider::new(Arc::new(ScriptedModel::default())));
        let config = Config::from_lookup(|key| (key == "HOME").then(|| "/tmp".to_string())).unwrap();
        SessionController::spawn(host.capabilities(), DetectionContext::new(provider), &config)
    }

    async fn start(name: &str) -> (Arc<Server>, OwnedReadHalf, OwnedWriteHalf) {
        let path = socket_path(name);
        let server = Arc::new(Server::new(&path, controller()).unwrap());
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        let (reader, writer) = UnixStream::connect(&path).await.unwrap().into_split();
        (server, reader, writer)
    }

    async fn next(reader: &mut OwnedReadHalf) -> serde_json::Value {
        let body = read_frame(reader).await.unwrap().unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let (server, mut reader, mut writer) = start("status").await;

        write_message(&mut writer, &Request::Ping).await.unwrap();
        assert_eq!(next(&mut reader).await["type"], "pong");

        write_message(&mut writer, &Request::GetStatus).await.unwrap();
        let body = read_frame(&mut reader).await.unwrap().unwrap();
        match serde_json::from_slice::<Response>(&body).unwrap() {
            Response::Status(snapshot) => {
                assert_eq!(snapshot.capture.status, CaptureStatus::Idle);
                assert!(!snapshot.narration);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error() {
        let (server, mut reader, mut writer) = start("malformed").await;

        write_message(&mut writer, &serde_json::json!({"type": "launch"}))
            .await
            .unwrap();
        let reply = next(&mut reader).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "invalid_request");

        write_message(&mut writer, &Request::Ping).await.unwrap();
        assert_eq!(next(&mut reader).await["type"], "pong");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let (server, mut reader, mut writer) = start("subscribe").await;

        write_message(&mut writer, &Request::Subscribe).await.unwrap();
        assert_eq!(next(&mut reader).await["type"], "subscribed");

        write_message(&mut writer, &Request::ToggleNarration)
            .await
            .unwrap();

        let mut acked = false;
        let mut toggled = false;
        while !(acked && toggled) {
            let message = next(&mut reader).await;
            match message["type"].as_str() {
                Some("ack") => acked = true,
                Some("event") if message["event"]["type"] == "narration_toggled" => {
                    assert_eq!(message["event"]["enabled"], true);
                    toggled = true;
                }
                _ => {}
            }
        }

        server.shutdown().await;
    }
}
