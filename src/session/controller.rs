//! Session controller task
//!
//! One task owns the capture manager, detection pipeline, voice channel,
//! permission gate and announcer. UI commands, acquisition results, poller
//! reports, recognition events and permission changes all arrive through a
//! single channel and are applied in order, so no session state is ever
//! shared across tasks.
//!
//! Sinks handed to spawned work hold only a weak sender. Once every
//! [`ControllerHandle`] is gone the channel closes and the controller tears
//! down exactly as it does on [`ControllerHandle::shutdown`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::announcer::Announcer;
use super::capture::{Acquisition, CaptureManager, CaptureStatus, SettleSink};
use super::command::VoiceCommand;
use super::detection::{DetectionContext, DetectionPipeline, PollerReport, ReportSink};
use super::permission::{forward_changes, PermissionGate};
use super::voice::{VoiceChannel, VoiceStatus};
use crate::config::Config;
use crate::error::{ErrorKind, SessionError};
use crate::events::SessionEvent;
use crate::host::{
    HostCapabilities, PermissionState, RecognitionEvent, RecognitionSink, UploadTrigger,
};

/// Spoken by `read_description`
pub const PAGE_DESCRIPTION: &str = "Welcome to Perceva Camera Vision Analysis. \
    This page has two main sections: \
    Left side: Camera controls. Click Start Camera to access your device's camera. \
    Right side: File upload. Click Choose Files to upload videos or images for analysis. \
    Enable voice commands to interact using your voice.";

const EVENT_CAPACITY: usize = 256;

/// A surfaced error as shown to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SessionError> for ErrorReport {
    fn from(error: &SessionError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSnapshot {
    pub status: CaptureStatus,
    pub error: Option<ErrorReport>,
    pub labels: Vec<String>,
    pub model_loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSnapshot {
    pub status: VoiceStatus,
    pub enabled: bool,
    pub permission: PermissionState,
    pub last_command: Option<String>,
    pub error: Option<ErrorReport>,
}

/// Everything the hosting UI renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub capture: CaptureSnapshot,
    pub voice: VoiceSnapshot,
    pub narration: bool,
}

#[derive(Debug)]
enum Command {
    StartCamera,
    StopCamera,
    ToggleCamera,
    ToggleVoice,
    ToggleNarration,
    ReadDescription,
    Announce(String),
}

enum Input {
    Command(Command),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    CaptureSettled { generation: u64, result: Acquisition },
    Detection { generation: u64, report: PollerReport },
    Recognition { session: u64, event: RecognitionEvent },
    PermissionChanged(PermissionState),
    Shutdown(oneshot::Sender<()>),
}

/// The controller task is no longer running
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session controller is not running")]
pub struct ControllerClosed;

/// Cloneable handle to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Input>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ControllerHandle {
    pub fn start_camera(&self) -> Result<(), ControllerClosed> {
        self.command(Command::StartCamera)
    }

    pub fn stop_camera(&self) -> Result<(), ControllerClosed> {
        self.command(Command::StopCamera)
    }

    pub fn toggle_camera(&self) -> Result<(), ControllerClosed> {
        self.command(Command::ToggleCamera)
    }

    pub fn toggle_voice(&self) -> Result<(), ControllerClosed> {
        self.command(Command::ToggleVoice)
    }

    pub fn toggle_narration(&self) -> Result<(), ControllerClosed> {
        self.command(Command::ToggleNarration)
    }

    pub fn read_description(&self) -> Result<(), ControllerClosed> {
        self.command(Command::ReadDescription)
    }

    pub fn announce(&self, text: impl Into<String>) -> Result<(), ControllerClosed> {
        self.command(Command::Announce(text.into()))
    }

    /// Current state, taken after every input sent before this call
    pub async fn snapshot(&self) -> Result<SessionSnapshot, ControllerClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Snapshot(reply))?;
        rx.await.map_err(|_| ControllerClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the camera and voice sessions, then end the controller task
    pub async fn shutdown(&self) -> Result<(), ControllerClosed> {
        let (done, rx) = oneshot::channel();
        self.send(Input::Shutdown(done))?;
        rx.await.map_err(|_| ControllerClosed)
    }

    fn command(&self, command: Command) -> Result<(), ControllerClosed> {
        self.send(Input::Command(command))
    }

    fn send(&self, input: Input) -> Result<(), ControllerClosed> {
        self.tx.send(input).map_err(|_| ControllerClosed)
    }
}

pub struct SessionController {
    tx: mpsc::WeakUnboundedSender<Input>,
    announcer: Announcer,
    permissions: PermissionGate,
    capture: CaptureManager,
    detection: DetectionPipeline,
    voice: VoiceChannel,
    upload: Arc<dyn UploadTrigger>,
    narration_probability: f64,
    permission_watch: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Start a controller task for `host`
    pub fn spawn(
        host: HostCapabilities,
        context: Arc<DetectionContext>,
        config: &Config,
    ) -> ControllerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let weak = tx.downgrade();

        let (permissions, changes) =
            PermissionGate::new(host.permissions.as_deref(), event_tx.clone());
        let permission_watch = changes.map(|changes| {
            let tx = weak.clone();
            forward_changes(changes, move |state| {
                tx.upgrade()
                    .is_some_and(|tx| tx.send(Input::PermissionChanged(state)).is_ok())
            })
        });

        let controller = Self {
            tx: weak,
            announcer: Announcer::new(host.speech.clone(), config.speech, event_tx.clone()),
            permissions,
            capture: CaptureManager::new(
                host.capture.clone(),
                host.surface.clone(),
                config.capture.clone(),
                event_tx.clone(),
            ),
            detection: DetectionPipeline::new(
                context,
                config.detection.poll_interval,
                event_tx.clone(),
            ),
            voice: VoiceChannel::new(host.recognizer.clone(), config.voice.clone(), event_tx.clone()),
            upload: host.upload.clone(),
            narration_probability: config.detection.narration_probability,
            permission_watch,
        };

        tokio::spawn(controller.run(rx));
        ControllerHandle { tx, event_tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        info!(permission = %self.permissions.current(), "session controller started");

        while let Some(input) = rx.recv().await {
            match input {
                Input::Command(command) => self.handle_command(command),
                Input::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Input::CaptureSettled { generation, result } => {
                    let reports = self.report_sink();
                    self.capture.on_settled(
                        generation,
                        result,
                        &mut self.detection,
                        &self.announcer,
                        reports,
                    );
                }
                Input::Detection { generation, report } => self.on_detection(generation, report),
                Input::Recognition { session, event } => {
                    let command =
                        self.voice
                            .on_event(session, event, &mut self.permissions, &self.announcer);
                    if let Some(command) = command {
                        self.dispatch(command);
                    }
                }
                Input::PermissionChanged(state) => {
                    if self.permissions.update(state) {
                        self.voice.on_permission_changed(state, &self.announcer);
                    }
                }
                Input::Shutdown(done) => {
                    self.teardown();
                    self.drain(&mut rx);
                    let _ = done.send(());
                    return;
                }
            }
        }

        debug!("all controller handles dropped");
        self.teardown();
    }

    /// Close the inbox and settle whatever was queued behind a shutdown.
    /// Streams acquired in that window are stopped here; dropping them
    /// would leave their tracks running.
    fn drain(&self, rx: &mut mpsc::UnboundedReceiver<Input>) {
        rx.close();
        while let Ok(input) = rx.try_recv() {
            match input {
                Input::CaptureSettled {
                    generation,
                    result: Ok(mut stream),
                } => {
                    info!(generation, stream = %stream.id(), "releasing stream settled during shutdown");
                    stream.stop();
                }
                Input::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Input::Shutdown(done) => {
                    let _ = done.send(());
                }
                _ => {}
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        debug!(?command, "command received");
        match command {
            Command::StartCamera => self.start_camera(),
            Command::StopCamera => self.stop_camera(),
            Command::ToggleCamera => {
                if matches!(
                    self.capture.status(),
                    CaptureStatus::Requesting | CaptureStatus::Active
                ) {
                    self.stop_camera();
                } else {
                    self.start_camera();
                }
            }
            Command::ToggleVoice => {
                let sinks = self.recognition_sinks();
                self.voice
                    .toggle(self.permissions.current(), &self.announcer, sinks);
            }
            Command::ToggleNarration => {
                self.announcer.toggle_narration();
            }
            Command::ReadDescription => self.announcer.announce(PAGE_DESCRIPTION),
            Command::Announce(text) => self.announcer.announce(&text),
        }
    }

    fn dispatch(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::StartCamera => self.start_camera(),
            VoiceCommand::StopCamera => self.stop_camera(),
            VoiceCommand::OpenUploader => self.upload.open_file_chooser(),
            VoiceCommand::Unrecognized(_) => {}
        }
    }

    fn start_camera(&mut self) {
        let settle = self.settle_sink();
        self.capture.start(&self.announcer, settle);
    }

    fn stop_camera(&mut self) {
        self.capture.stop(&mut self.detection, &self.announcer);
    }

    fn on_detection(&mut self, generation: u64, report: PollerReport) {
        let Some(labels) = self.detection.on_report(generation, report) else {
            return;
        };

        if labels.is_empty() || !self.announcer.narration() {
            return;
        }
        if rand::random::<f64>() < self.narration_probability {
            self.announcer
                .announce(&format!("Camera is detecting: {}", labels.join(", ")));
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            capture: CaptureSnapshot {
                status: self.capture.status(),
                error: self.capture.error().map(ErrorReport::from),
                labels: self.detection.labels().to_vec(),
                model_loading: self.detection.model_loading(),
            },
            voice: VoiceSnapshot {
                status: self.voice.status(),
                enabled: self.voice.enabled(),
                permission: self.permissions.current(),
                last_command: self.voice.last_command().map(str::to_string),
                error: self.voice.error().map(ErrorReport::from),
            },
            narration: self.announcer.narration(),
        }
    }

    fn teardown(&mut self) {
        self.stop_camera();
        self.voice.disable();
        if let Some(watch) = self.permission_watch.take() {
            watch.abort();
        }
        info!("session controller stopped");
    }

    fn settle_sink(&self) -> SettleSink {
        let tx = self.tx.clone();
        Arc::new(move |generation: u64, result: Acquisition| {
            let Some(tx) = tx.upgrade() else {
                return result.ok();
            };
            match tx.send(Input::CaptureSettled { generation, result }) {
                Ok(()) => None,
                Err(mpsc::error::SendError(Input::CaptureSettled { result, .. })) => result.ok(),
                Err(_) => None,
            }
        })
    }

    fn report_sink(&self) -> ReportSink {
        let tx = self.tx.clone();
        Arc::new(move |generation: u64, report: PollerReport| {
            tx.upgrade()
                .is_some_and(|tx| tx.send(Input::Detection { generation, report }).is_ok())
        })
    }

    fn recognition_sinks(&self) -> impl FnOnce(u64) -> RecognitionSink {
        let tx = self.tx.clone();
        move |session| -> RecognitionSink {
            Arc::new(move |event: RecognitionEvent| {
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(Input::Recognition { session, event });
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MICROPHONE_DENIED;
    use crate::host::simulated::{
        ScriptedModel, ScriptedModelProvider, SimulatedCamera, SimulatedHost, SimulatedRecognizer,
    };
    use crate::host::{
        CaptureConstraints, CaptureFailure, MediaCapture, MediaStream, Prediction,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio_test::{assert_err, assert_ok};

    fn config(narration_probability: f64) -> Config {
        let mut config =
            Config::from_lookup(|key| (key == "HOME").then(|| "/tmp/perceva-test".to_string()))
                .unwrap();
        config.detection.narration_probability = narration_probability;
        config
    }

    struct Rig {
        host: SimulatedHost,
        model: Arc<ScriptedModel>,
        provider: Arc<ScriptedModelProvider>,
        handle: ControllerHandle,
    }

    impl Rig {
        fn new(host: SimulatedHost) -> Self {
            Self::with(host, 0.0, |_| {})
        }

        fn with<F>(host: SimulatedHost, narration_probability: f64, edit: F) -> Self
        where
            F: FnOnce(&mut HostCapabilities),
        {
            let model = Arc::new(ScriptedModel::default());
            let provider = Arc::new(ScriptedModelProvider::new(model.clone()));
            let mut capabilities = host.capabilities();
            edit(&mut capabilities);

            let handle = SessionController::spawn(
                capabilities,
                DetectionContext::new(provider.clone()),
                &config(narration_probability),
            );

            Self {
                host,
                model,
                provider,
                handle,
            }
        }

        async fn snapshot(&self) -> SessionSnapshot {
            self.handle.snapshot().await.unwrap()
        }

        /// Poll snapshots on virtual time until `check` holds
        async fn until<F>(&self, check: F) -> SessionSnapshot
        where
            F: Fn(&SessionSnapshot) -> bool,
        {
            for _ in 0..500 {
                let snapshot = self.snapshot().await;
                if check(&snapshot) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("condition not reached: {:?}", self.snapshot().await);
        }
    }

    /// Camera whose acquisitions complete only when the gate opens
    struct GatedCamera {
        inner: Arc<SimulatedCamera>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl MediaCapture for GatedCamera {
        async fn request_stream(
            &self,
            constraints: &CaptureConstraints,
        ) -> Result<Box<dyn MediaStream>, CaptureFailure> {
            self.gate.notified().await;
            self.inner.request_stream(constraints).await
        }
    }

    fn listening_host() -> SimulatedHost {
        SimulatedHost::new(SimulatedCamera::new(), SimulatedRecognizer::auto_ack())
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_without_recognizer_is_forced_off() {
        let rig = Rig::with(listening_host(), 0.0, |caps| caps.recognizer = None);
        rig.handle.toggle_voice().unwrap();

        let snapshot = rig.snapshot().await;
        assert_eq!(snapshot.voice.status, VoiceStatus::Error);
        assert!(!snapshot.voice.enabled);
        let error = snapshot.voice.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Unsupported);
        assert!(error.message.contains("not supported in your browser"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_denied_never_starts_recognizer() {
        let host = listening_host();
        host.permissions.set(PermissionState::Denied);
        let rig = Rig::new(host);

        rig.handle.toggle_voice().unwrap();
        let snapshot = rig.snapshot().await;

        assert_eq!(snapshot.voice.status, VoiceStatus::Error);
        assert!(!snapshot.voice.enabled);
        assert_eq!(snapshot.voice.permission, PermissionState::Denied);
        assert_eq!(snapshot.voice.error.unwrap().message, MICROPHONE_DENIED);
        assert_eq!(rig.host.recognizer.sessions(), 0);
        assert_eq!(rig.host.recognizer.starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spoken_start_command_starts_camera_once() {
        let rig = Rig::new(listening_host());
        rig.handle.toggle_narration().unwrap();
        rig.handle.toggle_voice().unwrap();
        rig.until(|s| s.voice.status == VoiceStatus::Listening).await;

        assert!(rig.host.recognizer.say("Start the camera please"));
        let snapshot = rig
            .until(|s| s.capture.status == CaptureStatus::Active)
            .await;
        assert_eq!(
            snapshot.voice.last_command.as_deref(),
            Some("start the camera please")
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rig.host.camera.acquired(), 1);
        assert_eq!(rig.host.camera.live_tracks(), 1);
        assert!(rig
            .host
            .speaker
            .spoken()
            .contains(&"Starting camera".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_predictions_clear_labels() {
        let rig = Rig::new(listening_host());
        rig.model.push(Ok(vec![
            Prediction::new("person", 0.9),
            Prediction::new("cup", 0.8),
            Prediction::new("person", 0.7),
        ]));

        rig.handle.start_camera().unwrap();
        rig.until(|s| s.capture.labels == ["person", "cup"]).await;
        rig.until(|s| s.capture.labels.is_empty()).await;

        tokio::time::sleep(Duration::from_millis(1600)).await;
        let snapshot = rig.snapshot().await;
        assert!(snapshot.capture.labels.is_empty());
        assert!(rig.model.calls() >= 4);
        assert_eq!(rig.provider.loads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_in_use_reports_error() {
        let rig = Rig::new(listening_host());
        rig.host.camera.push_outcome(Err(CaptureFailure::NotReadable));

        rig.handle.start_camera().unwrap();
        let snapshot = rig
            .until(|s| s.capture.status == CaptureStatus::Error)
            .await;

        let error = snapshot.capture.error.unwrap();
        assert_eq!(error.kind, ErrorKind::DeviceUnavailable);
        assert!(error.message.contains("already in use"));
        assert_eq!(rig.host.camera.live_tracks(), 0);
        assert!(rig.host.surface.attached().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_disable_before_ended_stays_idle() {
        let rig = Rig::new(listening_host());
        rig.handle.toggle_voice().unwrap();
        rig.until(|s| s.voice.status == VoiceStatus::Listening).await;

        rig.handle.toggle_voice().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = rig.snapshot().await;
        assert_eq!(snapshot.voice.status, VoiceStatus::Idle);
        assert!(!snapshot.voice.enabled);
        assert_eq!(rig.host.recognizer.starts(), 1);
        assert_eq!(rig.host.recognizer.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_revoked_stops_listening() {
        let rig = Rig::new(listening_host());
        rig.handle.toggle_voice().unwrap();
        rig.until(|s| s.voice.status == VoiceStatus::Listening).await;

        rig.host.permissions.set(PermissionState::Denied);
        let snapshot = rig
            .until(|s| s.voice.permission == PermissionState::Denied)
            .await;

        assert_eq!(snapshot.voice.status, VoiceStatus::Error);
        assert!(!snapshot.voice.enabled);
        assert_eq!(rig.host.recognizer.starts(), 1);
        assert_eq!(rig.host.recognizer.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_labels_narrated_when_throttle_allows() {
        let rig = Rig::with(listening_host(), 1.0, |_| {});
        rig.model.set_fallback(vec![Prediction::new("dog", 0.9)]);
        rig.handle.toggle_narration().unwrap();
        rig.handle.start_camera().unwrap();

        rig.until(|s| s.capture.labels == ["dog"]).await;
        assert!(rig
            .host
            .speaker
            .spoken()
            .contains(&"Camera is detecting: dog".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_labels_silent_when_throttle_blocks() {
        let rig = Rig::new(listening_host());
        rig.model.set_fallback(vec![Prediction::new("dog", 0.9)]);
        rig.handle.toggle_narration().unwrap();
        rig.handle.start_camera().unwrap();

        rig.until(|s| s.capture.labels == ["dog"]).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!rig
            .host
            .speaker
            .spoken()
            .iter()
            .any(|text| text.starts_with("Camera is detecting")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_command_opens_chooser() {
        let rig = Rig::new(listening_host());
        rig.handle.toggle_voice().unwrap();
        rig.until(|s| s.voice.status == VoiceStatus::Listening).await;

        rig.host.recognizer.say("upload a video");
        rig.until(|s| s.voice.last_command.is_some()).await;
        assert_eq!(rig.host.upload.opened(), 1);
        assert_eq!(rig.host.camera.acquired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_description_needs_narration() {
        let rig = Rig::new(listening_host());
        rig.handle.read_description().unwrap();
        rig.snapshot().await;
        assert!(rig.host.speaker.spoken().is_empty());

        rig.handle.toggle_narration().unwrap();
        rig.handle.read_description().unwrap();
        let snapshot = rig.snapshot().await;
        assert!(snapshot.narration);
        assert_eq!(rig.host.speaker.current().as_deref(), Some(PAGE_DESCRIPTION));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_requesting_releases_stream() {
        let host = SimulatedHost::new(
            SimulatedCamera::with_delay(Duration::from_secs(1)),
            SimulatedRecognizer::manual(),
        );
        let rig = Rig::new(host);

        rig.handle.start_camera().unwrap();
        rig.handle.stop_camera().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let snapshot = rig.snapshot().await;
        assert_eq!(snapshot.capture.status, CaptureStatus::Idle);
        assert_eq!(rig.host.camera.acquired(), 1);
        assert_eq!(rig.host.camera.live_tracks(), 0);
        assert!(rig.host.surface.attached().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_camera() {
        let rig = Rig::new(listening_host());
        rig.handle.toggle_camera().unwrap();
        rig.until(|s| s.capture.status == CaptureStatus::Active).await;

        rig.handle.toggle_camera().unwrap();
        let snapshot = rig.snapshot().await;
        assert_eq!(snapshot.capture.status, CaptureStatus::Idle);
        assert_eq!(rig.host.camera.live_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything() {
        let rig = Rig::new(listening_host());
        rig.handle.start_camera().unwrap();
        rig.handle.toggle_voice().unwrap();
        rig.until(|s| {
            s.capture.status == CaptureStatus::Active && s.voice.status == VoiceStatus::Listening
        })
        .await;

        assert_ok!(rig.handle.shutdown().await);
        assert_eq!(rig.host.camera.live_tracks(), 0);
        assert_eq!(rig.host.recognizer.stops(), 1);
        assert_eq!(rig.handle.snapshot().await, Err(ControllerClosed));
        assert_err!(rig.handle.start_camera());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_settling_during_shutdown_is_released() {
        let gate = Arc::new(Notify::new());
        let host = listening_host();
        let camera = Arc::clone(&host.camera);
        let rig = Rig::with(host, 0.0, |caps| {
            caps.capture = Some(Arc::new(GatedCamera {
                inner: camera,
                gate: Arc::clone(&gate),
            }));
        });

        rig.handle.start_camera().unwrap();
        let snapshot = rig.snapshot().await;
        assert_eq!(snapshot.capture.status, CaptureStatus::Requesting);

        gate.notify_one();
        assert_ok!(rig.handle.shutdown().await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(rig.host.camera.acquired(), 1);
        assert_eq!(rig.host.camera.live_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_without_permission_query_listens() {
        let rig = Rig::with(listening_host(), 0.0, |caps| caps.permissions = None);
        rig.handle.toggle_voice().unwrap();

        let snapshot = rig
            .until(|s| s.voice.status == VoiceStatus::Listening)
            .await;
        assert_eq!(snapshot.voice.permission, PermissionState::Unknown);
        assert!(snapshot.voice.enabled);
        assert!(snapshot.voice.error.is_none());
        assert_eq!(rig.host.recognizer.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_subscribers() {
        let rig = Rig::new(listening_host());
        let mut events = rig.handle.subscribe();

        rig.handle.toggle_narration().unwrap();
        rig.handle.announce("hello").unwrap();
        rig.snapshot().await;

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::NarrationToggled { enabled: true }
        );
        let mut announced = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Announced { text } = event {
                announced.push(text);
            }
        }
        assert_eq!(announced.last().map(String::as_str), Some("hello"));
    }
}
