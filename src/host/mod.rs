//! Host capability ports
//!
//! Camera, speech recognition, speech output, permission queries and the
//! detection model are consumed through these traits so the session
//! controller never touches a platform API directly. A capability the host
//! does not provide is represented by `None` in [`HostCapabilities`].

pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Microphone permission as reported by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    #[default]
    Unknown,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
            PermissionState::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// A `{min, ideal, max}` envelope for one capture dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub min: u32,
    pub ideal: u32,
    pub max: u32,
}

/// Which camera to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    User,
    Environment,
}

/// Constraints passed to [`MediaCapture::request_stream`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub width: Envelope,
    pub height: Envelope,
    pub facing: FacingMode,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: Envelope {
                min: 320,
                ideal: 640,
                max: 1920,
            },
            height: Envelope {
                min: 240,
                ideal: 480,
                max: 1080,
            },
            facing: FacingMode::User,
            audio: false,
        }
    }
}

/// Failure codes reported by the host when a stream cannot be acquired
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureFailure {
    #[error("camera access not allowed")]
    NotAllowed,

    #[error("no camera device found")]
    NotFound,

    #[error("camera is not readable")]
    NotReadable,

    #[error("capture constraints cannot be satisfied")]
    Overconstrained,

    #[error("{0}")]
    Other(String),
}

/// One captured video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

/// Source of the most recent frame of a live stream
pub trait FrameSource: Send + Sync {
    /// Latest frame, or `None` once the stream has been released
    fn current_frame(&self) -> Option<Frame>;
}

/// An acquired camera stream, exclusively owned by its capture session
pub trait MediaStream: Send {
    fn id(&self) -> &str;

    /// Frame source handed to the detection poller
    fn frames(&self) -> Arc<dyn FrameSource>;

    /// Stop every underlying track
    fn stop(&mut self);
}

/// Host media-capture capability
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn request_stream(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureFailure>;
}

/// Surface the live stream is rendered on
pub trait RenderSurface: Send + Sync {
    fn attach(&self, stream: &dyn MediaStream);
    fn detach(&self);
}

// ---------------------------------------------------------------------------
// Detection model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One labeled region returned by the detection model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("failed to load detection model: {0}")]
    Load(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

/// A loaded detection model; read-only after load
#[async_trait]
pub trait DetectionModel: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Prediction>, ModelError>;
}

/// Loads the detection model
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn DetectionModel>, ModelError>;
}

// ---------------------------------------------------------------------------
// Speech recognition
// ---------------------------------------------------------------------------

/// Options for a continuous recognition session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub language: String,
    pub continuous: bool,
    pub interim_results: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            continuous: true,
            interim_results: true,
        }
    }
}

/// One transcript segment delivered by the recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSegment {
    pub text: String,
    pub is_final: bool,
}

impl TranscriptSegment {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }
}

/// Callbacks fired by a recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Started,
    Ended,
    /// Host error code such as `not-allowed` or `no-speech`
    Error(String),
    Result(Vec<TranscriptSegment>),
}

/// Callback the host invokes for every recognition event
pub type RecognitionSink = Arc<dyn Fn(RecognitionEvent) + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognizerError {
    #[error("recognition session already started")]
    AlreadyStarted,

    #[error("{0}")]
    Host(String),
}

/// A live recognition session object
pub trait RecognitionSession: Send {
    fn start(&mut self) -> Result<(), RecognizerError>;
    fn stop(&mut self) -> Result<(), RecognizerError>;
}

/// Host speech-recognition capability
pub trait SpeechRecognizer: Send + Sync {
    fn create_session(
        &self,
        config: &RecognitionConfig,
        sink: RecognitionSink,
    ) -> Box<dyn RecognitionSession>;
}

// ---------------------------------------------------------------------------
// Speech output, permissions, UI actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// Host speech-output capability
pub trait SpeechOutput: Send + Sync {
    fn speak(&self, utterance: &Utterance);
    fn cancel_current(&self);
}

/// Host permission-query capability
pub trait PermissionQuery: Send + Sync {
    /// Current microphone permission plus change notifications, or `None`
    /// when the host cannot be queried
    fn microphone(&self) -> Option<watch::Receiver<PermissionState>>;
}

/// Opens the hosting UI's file chooser
pub trait UploadTrigger: Send + Sync {
    fn open_file_chooser(&self);
}

/// Everything the controller consumes from its host
#[derive(Clone)]
pub struct HostCapabilities {
    pub capture: Option<Arc<dyn MediaCapture>>,
    pub surface: Arc<dyn RenderSurface>,
    pub recognizer: Option<Arc<dyn SpeechRecognizer>>,
    pub speech: Option<Arc<dyn SpeechOutput>>,
    pub permissions: Option<Arc<dyn PermissionQuery>>,
    pub upload: Arc<dyn UploadTrigger>,
}
