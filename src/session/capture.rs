//! Camera capture lifecycle
//!
//! Owns at most one stream at a time. Acquisition runs on its own task and
//! settles back through the controller; every start and stop bumps the
//! generation so a result that settles after `stop` is released instead of
//! adopted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::announcer::Announcer;
use super::detection::{DetectionPipeline, ReportSink};
use crate::error::{SessionError, CAMERA_UNSUPPORTED};
use crate::events::SessionEvent;
use crate::host::{CaptureConstraints, CaptureFailure, MediaCapture, MediaStream, RenderSurface};

pub const CAMERA_ACTIVE: &str = "Camera is now active and displaying your video feed";
pub const CAMERA_STOPPED: &str = "Camera stopped";

/// Status of the capture session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    #[default]
    Idle,
    Requesting,
    Active,
    Stopping,
    Error,
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureStatus::Idle => write!(f, "Idle"),
            CaptureStatus::Requesting => write!(f, "Requesting"),
            CaptureStatus::Active => write!(f, "Active"),
            CaptureStatus::Stopping => write!(f, "Stopping"),
            CaptureStatus::Error => write!(f, "Error"),
        }
    }
}

/// Result of one acquisition attempt
pub type Acquisition = Result<Box<dyn MediaStream>, CaptureFailure>;

/// Hands a settled acquisition to the controller. Gives the stream back
/// when it could not be delivered so the caller can release it.
pub type SettleSink =
    Arc<dyn Fn(u64, Acquisition) -> Option<Box<dyn MediaStream>> + Send + Sync + 'static>;

pub struct CaptureManager {
    status: CaptureStatus,
    stream: Option<Box<dyn MediaStream>>,
    error: Option<SessionError>,
    generation: u64,
    capture: Option<Arc<dyn MediaCapture>>,
    surface: Arc<dyn RenderSurface>,
    constraints: CaptureConstraints,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl CaptureManager {
    pub fn new(
        capture: Option<Arc<dyn MediaCapture>>,
        surface: Arc<dyn RenderSurface>,
        constraints: CaptureConstraints,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            status: CaptureStatus::Idle,
            stream: None,
            error: None,
            generation: 0,
            capture,
            surface,
            constraints,
            event_tx,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Request a stream. The result arrives later through `settle`.
    pub fn start(&mut self, announcer: &Announcer, settle: SettleSink) {
        if matches!(self.status, CaptureStatus::Requesting | CaptureStatus::Active) {
            debug!(status = %self.status, "capture already started");
            return;
        }

        let Some(capture) = self.capture.clone() else {
            self.fail(SessionError::Unsupported(CAMERA_UNSUPPORTED.to_string()), announcer);
            return;
        };

        self.error = None;
        self.generation += 1;
        let generation = self.generation;
        self.transition_to(CaptureStatus::Requesting);

        let constraints = self.constraints.clone();
        tokio::spawn(async move {
            let result = capture.request_stream(&constraints).await;
            if let Some(mut orphan) = settle(generation, result) {
                warn!(generation, stream = %orphan.id(), "controller gone, releasing stream");
                orphan.stop();
            }
        });
    }

    /// Adopt or discard a settled acquisition
    pub fn on_settled(
        &mut self,
        generation: u64,
        result: Acquisition,
        pipeline: &mut DetectionPipeline,
        announcer: &Announcer,
        reports: ReportSink,
    ) {
        if generation != self.generation || self.status != CaptureStatus::Requesting {
            if let Ok(mut stream) = result {
                info!(generation, stream = %stream.id(), "releasing stream acquired after stop");
                stream.stop();
            }
            return;
        }

        match result {
            Ok(stream) => {
                self.surface.attach(stream.as_ref());
                let frames = stream.frames();
                info!(generation, stream = %stream.id(), "camera stream attached");
                self.stream = Some(stream);
                self.transition_to(CaptureStatus::Active);
                announcer.announce(CAMERA_ACTIVE);
                pipeline.start_polling(frames, generation, reports);
            }
            Err(failure) => {
                warn!(generation, %failure, "camera acquisition failed");
                self.fail(SessionError::from_capture(&failure), announcer);
            }
        }
    }

    /// Release everything and return to `Idle`. Idempotent; safe from
    /// teardown. The poller is cancelled before any track is stopped.
    pub fn stop(&mut self, pipeline: &mut DetectionPipeline, announcer: &Announcer) {
        pipeline.stop_polling();
        self.generation += 1;
        self.error = None;

        let Some(mut stream) = self.stream.take() else {
            pipeline.clear_labels();
            self.transition_to(CaptureStatus::Idle);
            return;
        };

        self.transition_to(CaptureStatus::Stopping);
        stream.stop();
        self.surface.detach();
        pipeline.clear_labels();
        announcer.announce(CAMERA_STOPPED);
        self.transition_to(CaptureStatus::Idle);
    }

    fn fail(&mut self, error: SessionError, announcer: &Announcer) {
        let _ = self.event_tx.send(SessionEvent::ErrorRaised {
            kind: error.kind(),
            message: error.to_string(),
        });
        announcer.announce(&error.to_string());
        self.error = Some(error);
        self.transition_to(CaptureStatus::Error);
    }

    fn transition_to(&mut self, status: CaptureStatus) {
        if status == self.status {
            return;
        }

        info!(
            from = %self.status,
            to = %status,
            generation = self.generation,
            "capture transition"
        );
        self.status = status;
        let _ = self.event_tx.send(SessionEvent::CaptureStatusChanged { status });
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            self.surface.detach();
        }
    }
}
