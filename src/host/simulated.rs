//! In-process host used by the daemon and by tests
//!
//! Each simulated capability records what the controller asked of it so
//! callers can observe track release, recognizer restarts, spoken output
//! and model loads without a real device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use super::{
    CaptureConstraints, CaptureFailure, DetectionModel, Frame, FrameSource, HostCapabilities,
    MediaCapture, MediaStream, ModelError, ModelProvider, PermissionQuery, PermissionState,
    Prediction, RecognitionConfig, RecognitionEvent, RecognitionSession, RecognitionSink,
    RecognizerError, RenderSurface, SpeechOutput, SpeechRecognizer, TranscriptSegment,
    UploadTrigger, Utterance,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

struct Track {
    stopped: AtomicBool,
}

struct SyntheticFrames {
    track: Arc<Track>,
    width: u32,
    height: u32,
}

impl FrameSource for SyntheticFrames {
    fn current_frame(&self) -> Option<Frame> {
        if self.track.stopped.load(Ordering::SeqCst) {
            return None;
        }
        Some(Frame {
            width: self.width,
            height: self.height,
            pixels: Arc::from(vec![0u8; 16]),
        })
    }
}

struct SimulatedStream {
    id: String,
    track: Arc<Track>,
    frames: Arc<SyntheticFrames>,
}

impl MediaStream for SimulatedStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn frames(&self) -> Arc<dyn FrameSource> {
        self.frames.clone()
    }

    fn stop(&mut self) {
        if !self.track.stopped.swap(true, Ordering::SeqCst) {
            debug!(stream = %self.id, "track stopped");
        }
    }
}

/// Camera whose acquisitions follow a script of outcomes
pub struct SimulatedCamera {
    outcomes: Mutex<VecDeque<Result<(), CaptureFailure>>>,
    delay: Duration,
    next_id: AtomicU64,
    tracks: Mutex<Vec<Arc<Track>>>,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Acquisitions settle only after `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            delay,
            next_id: AtomicU64::new(1),
            tracks: Mutex::new(Vec::new()),
        }
    }

    /// Queue the outcome of a future acquisition; unscripted ones succeed
    pub fn push_outcome(&self, outcome: Result<(), CaptureFailure>) {
        lock(&self.outcomes).push_back(outcome);
    }

    /// Number of streams handed out so far
    pub fn acquired(&self) -> usize {
        lock(&self.tracks).len()
    }

    /// Number of handed-out streams whose track is still running
    pub fn live_tracks(&self) -> usize {
        lock(&self.tracks)
            .iter()
            .filter(|track| !track.stopped.load(Ordering::SeqCst))
            .count()
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaCapture for SimulatedCamera {
    async fn request_stream(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureFailure> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = lock(&self.outcomes).pop_front().unwrap_or(Ok(()));
        outcome?;

        let track = Arc::new(Track {
            stopped: AtomicBool::new(false),
        });
        lock(&self.tracks).push(Arc::clone(&track));

        let id = format!("sim-stream-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(stream = %id, width = constraints.width.ideal, "stream acquired");

        Ok(Box::new(SimulatedStream {
            id,
            frames: Arc::new(SyntheticFrames {
                track: Arc::clone(&track),
                width: constraints.width.ideal,
                height: constraints.height.ideal,
            }),
            track,
        }))
    }
}

/// Render surface that remembers which stream is attached
#[derive(Default)]
pub struct RecordingSurface {
    attached: Mutex<Option<String>>,
    detaches: AtomicUsize,
}

impl RecordingSurface {
    pub fn attached(&self) -> Option<String> {
        lock(&self.attached).clone()
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl RenderSurface for RecordingSurface {
    fn attach(&self, stream: &dyn MediaStream) {
        *lock(&self.attached) = Some(stream.id().to_string());
    }

    fn detach(&self) {
        lock(&self.attached).take();
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Detection model
// ---------------------------------------------------------------------------

/// Model that replays scripted predictions, then repeats a fallback set
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Vec<Prediction>, ModelError>>>,
    fallback: Mutex<Vec<Prediction>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn push(&self, result: Result<Vec<Prediction>, ModelError>) {
        lock(&self.script).push_back(result);
    }

    pub fn set_fallback(&self, predictions: Vec<Prediction>) {
        *lock(&self.fallback) = predictions;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionModel for ScriptedModel {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Prediction>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = lock(&self.script).pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(lock(&self.fallback).clone()),
        }
    }
}

/// Provider handing out one shared [`ScriptedModel`]
pub struct ScriptedModelProvider {
    model: Arc<ScriptedModel>,
    load_delay: Duration,
    failures_left: AtomicUsize,
    loads: AtomicUsize,
}

impl ScriptedModelProvider {
    pub fn new(model: Arc<ScriptedModel>) -> Self {
        Self {
            model,
            load_delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// The next `count` loads fail
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Number of load attempts made against this provider
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedModelProvider {
    async fn load(&self) -> Result<Arc<dyn DetectionModel>, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ModelError::Load("simulated load failure".to_string()));
        }

        Ok(self.model.clone())
    }
}

// ---------------------------------------------------------------------------
// Speech recognition
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct SessionProbe {
    sink: RecognitionSink,
    running: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl SessionProbe {
    fn deliver(&self, event: RecognitionEvent) {
        if event == RecognitionEvent::Ended {
            self.running.store(false, Ordering::SeqCst);
        }
        (self.sink)(event);
    }
}

struct SimulatedSession {
    probe: SessionProbe,
    auto_ack: bool,
}

impl RecognitionSession for SimulatedSession {
    fn start(&mut self) -> Result<(), RecognizerError> {
        if self.probe.running.swap(true, Ordering::SeqCst) {
            return Err(RecognizerError::AlreadyStarted);
        }
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        if self.auto_ack {
            self.probe.deliver(RecognitionEvent::Started);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RecognizerError> {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        if self.auto_ack {
            self.probe.deliver(RecognitionEvent::Ended);
        } else {
            self.probe.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Recognizer whose sessions are driven by [`SimulatedRecognizer::emit`]
pub struct SimulatedRecognizer {
    auto_ack: bool,
    sessions: Mutex<Vec<SessionProbe>>,
}

impl SimulatedRecognizer {
    /// Sessions only report what the caller emits
    pub fn manual() -> Self {
        Self {
            auto_ack: false,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Sessions acknowledge `start` with `Started` and `stop` with `Ended`
    pub fn auto_ack() -> Self {
        Self {
            auto_ack: true,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Deliver an event through the most recently created session
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        let probe = lock(&self.sessions).last().cloned();
        match probe {
            Some(probe) => {
                probe.deliver(event);
                true
            }
            None => false,
        }
    }

    /// Deliver a final transcript through the most recent session
    pub fn say(&self, text: &str) -> bool {
        self.emit(RecognitionEvent::Result(vec![TranscriptSegment::final_text(text)]))
    }

    pub fn sessions(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Total `start` calls across all sessions
    pub fn starts(&self) -> usize {
        lock(&self.sessions)
            .iter()
            .map(|p| p.starts.load(Ordering::SeqCst))
            .sum()
    }

    /// Total `stop` calls across all sessions
    pub fn stops(&self) -> usize {
        lock(&self.sessions)
            .iter()
            .map(|p| p.stops.load(Ordering::SeqCst))
            .sum()
    }
}

impl SpeechRecognizer for SimulatedRecognizer {
    fn create_session(
        &self,
        config: &RecognitionConfig,
        sink: RecognitionSink,
    ) -> Box<dyn RecognitionSession> {
        debug!(language = %config.language, "creating recognition session");
        let probe = SessionProbe {
            sink,
            running: Arc::new(AtomicBool::new(false)),
            starts: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        };
        lock(&self.sessions).push(probe.clone());
        Box::new(SimulatedSession {
            probe,
            auto_ack: self.auto_ack,
        })
    }
}

// ---------------------------------------------------------------------------
// Speech output, permissions, upload
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SpeakerLog {
    current: Option<String>,
    spoken: Vec<String>,
    canceled: Vec<String>,
}

/// Speaker that logs utterances and tracks the one in flight
#[derive(Default)]
pub struct RecordingSpeaker {
    log: Mutex<SpeakerLog>,
}

impl RecordingSpeaker {
    /// Utterance still being spoken, if any
    pub fn current(&self) -> Option<String> {
        lock(&self.log).current.clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.log).spoken.clone()
    }

    /// Utterances cut off by a later announcement
    pub fn canceled(&self) -> Vec<String> {
        lock(&self.log).canceled.clone()
    }

    /// Mark the current utterance as finished
    pub fn finish(&self) {
        lock(&self.log).current.take();
    }
}

impl SpeechOutput for RecordingSpeaker {
    fn speak(&self, utterance: &Utterance) {
        info!(text = %utterance.text, "speaking");
        let mut log = lock(&self.log);
        log.current = Some(utterance.text.clone());
        log.spoken.push(utterance.text.clone());
    }

    fn cancel_current(&self) {
        let mut log = lock(&self.log);
        if let Some(text) = log.current.take() {
            log.canceled.push(text);
        }
    }
}

/// Permission source whose state can be changed from outside
pub struct SimulatedPermissions {
    tx: watch::Sender<PermissionState>,
}

impl SimulatedPermissions {
    pub fn new(initial: PermissionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, state: PermissionState) {
        self.tx.send_replace(state);
    }
}

impl PermissionQuery for SimulatedPermissions {
    fn microphone(&self) -> Option<watch::Receiver<PermissionState>> {
        Some(self.tx.subscribe())
    }
}

#[derive(Default)]
pub struct RecordingUploadTrigger {
    opened: AtomicUsize,
}

impl RecordingUploadTrigger {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl UploadTrigger for RecordingUploadTrigger {
    fn open_file_chooser(&self) {
        info!("file chooser opened");
        self.opened.fetch_add(1, Ordering::SeqCst);
    }
}

/// A complete simulated host
pub struct SimulatedHost {
    pub camera: Arc<SimulatedCamera>,
    pub surface: Arc<RecordingSurface>,
    pub recognizer: Arc<SimulatedRecognizer>,
    pub speaker: Arc<RecordingSpeaker>,
    pub permissions: Arc<SimulatedPermissions>,
    pub upload: Arc<RecordingUploadTrigger>,
}

impl SimulatedHost {
    pub fn new(camera: SimulatedCamera, recognizer: SimulatedRecognizer) -> Self {
        Self {
            camera: Arc::new(camera),
            surface: Arc::new(RecordingSurface::default()),
            recognizer: Arc::new(recognizer),
            speaker: Arc::new(RecordingSpeaker::default()),
            permissions: Arc::new(SimulatedPermissions::new(PermissionState::Granted)),
            upload: Arc::new(RecordingUploadTrigger::default()),
        }
    }

    pub fn capabilities(&self) -> HostCapabilities {
        HostCapabilities {
            capture: Some(self.camera.clone()),
            surface: self.surface.clone(),
            recognizer: Some(self.recognizer.clone()),
            speech: Some(self.speaker.clone()),
            permissions: Some(self.permissions.clone()),
            upload: self.upload.clone(),
        }
    }
}
