//! Object detection over the live capture
//!
//! The detection model is loaded lazily, once per process, through a
//! [`DetectionContext`] shared by every capture session. Each active capture
//! owns exactly one poller that runs inference on a fixed cadence and
//! reports label sets back to the controller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::host::{DetectionModel, FrameSource, ModelError, ModelProvider, Prediction};

/// Most labels published per frame
pub const MAX_LABELS: usize = 5;

/// Distinct labels in first-seen order, truncated to [`MAX_LABELS`]
pub fn unique_labels(predictions: &[Prediction]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::with_capacity(MAX_LABELS);
    for prediction in predictions {
        if labels.len() == MAX_LABELS {
            break;
        }
        if !labels.contains(&prediction.label) {
            labels.push(prediction.label.clone());
        }
    }
    labels
}

/// Process-wide handle to the detection model.
///
/// The model is loaded at most once; concurrent callers wait on the same
/// in-flight load. The load runs on its own task so it completes even if
/// the poller that requested it is cancelled.
pub struct DetectionContext {
    provider: Arc<dyn ModelProvider>,
    model: OnceCell<Arc<dyn DetectionModel>>,
}

impl DetectionContext {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            model: OnceCell::new(),
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// The loaded model, loading it first if needed
    pub async fn model(self: &Arc<Self>) -> Result<Arc<dyn DetectionModel>, ModelError> {
        if let Some(model) = self.model.get() {
            return Ok(Arc::clone(model));
        }

        let context = Arc::clone(self);
        let load = tokio::spawn(async move {
            context
                .model
                .get_or_try_init(|| async {
                    info!("loading detection model");
                    let model = context.provider.load().await?;
                    info!("detection model loaded");
                    Ok::<_, ModelError>(model)
                })
                .await
                .map(Arc::clone)
        });

        load.await
            .map_err(|e| ModelError::Load(format!("load task failed: {}", e)))?
    }
}

/// What a poller reports back for its capture generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerReport {
    ModelReady,
    Labels(Vec<String>),
}

/// Delivers poller reports; returns `false` once nobody is listening
pub type ReportSink = Arc<dyn Fn(u64, PollerReport) -> bool + Send + Sync + 'static>;

struct Poller {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct DetectionPipeline {
    context: Arc<DetectionContext>,
    interval: Duration,
    poller: Option<Poller>,
    labels: Vec<String>,
    model_loading: bool,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl DetectionPipeline {
    pub fn new(
        context: Arc<DetectionContext>,
        interval: Duration,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            context,
            interval,
            poller: None,
            labels: Vec::new(),
            model_loading: false,
            event_tx,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn model_loading(&self) -> bool {
        self.model_loading
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Start polling `frames` for capture `generation`, replacing any
    /// previous poller. Returns without waiting for the model.
    pub fn start_polling(&mut self, frames: Arc<dyn FrameSource>, generation: u64, sink: ReportSink) {
        self.stop_polling();

        if !self.context.is_loaded() {
            self.set_model_loading(true);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_poller(
            Arc::clone(&self.context),
            frames,
            self.interval,
            generation,
            sink,
            cancel.clone(),
        ));

        debug!(generation, interval_ms = self.interval.as_millis() as u64, "poller scheduled");
        self.poller = Some(Poller {
            generation,
            cancel,
            task,
        });
    }

    /// Cancel the cadence; idempotent
    pub fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel.cancel();
            poller.task.abort();
            debug!(generation = poller.generation, "poller cancelled");
        }
        self.set_model_loading(false);
    }

    pub fn clear_labels(&mut self) {
        if !self.labels.is_empty() {
            self.labels.clear();
            let _ = self
                .event_tx
                .send(SessionEvent::LabelsDetected { labels: Vec::new() });
        }
    }

    /// Apply a poller report. Returns the published labels when a label set
    /// from the live poller was accepted.
    pub fn on_report(&mut self, generation: u64, report: PollerReport) -> Option<Vec<String>> {
        let live = self
            .poller
            .as_ref()
            .is_some_and(|p| p.generation == generation);
        if !live {
            debug!(generation, ?report, "discarding report from stale poller");
            return None;
        }

        match report {
            PollerReport::ModelReady => {
                self.set_model_loading(false);
                None
            }
            PollerReport::Labels(labels) => {
                if labels != self.labels {
                    self.labels = labels.clone();
                    let _ = self.event_tx.send(SessionEvent::LabelsDetected {
                        labels: labels.clone(),
                    });
                }
                Some(labels)
            }
        }
    }

    fn set_model_loading(&mut self, loading: bool) {
        if self.model_loading != loading {
            self.model_loading = loading;
            let _ = self
                .event_tx
                .send(SessionEvent::ModelLoadingChanged { loading });
        }
    }
}

impl Drop for DetectionPipeline {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel.cancel();
            poller.task.abort();
        }
    }
}

async fn run_poller(
    context: Arc<DetectionContext>,
    frames: Arc<dyn FrameSource>,
    interval: Duration,
    generation: u64,
    sink: ReportSink,
    cancel: CancellationToken,
) {
    let model = loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return,
            attempt = context.model() => attempt,
        };
        match attempt {
            Ok(model) => break model,
            Err(e) => {
                let err = SessionError::ModelOrInferenceFailure(e.to_string());
                warn!(generation, kind = ?err.kind(), error = %err, "detection model unavailable, retrying");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    };

    if !sink(generation, PollerReport::ModelReady) {
        return;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(frame) = frames.current_frame() else {
            continue;
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = model.detect(&frame) => result,
        };

        match result {
            Ok(predictions) => {
                if !sink(generation, PollerReport::Labels(unique_labels(&predictions))) {
                    break;
                }
            }
            Err(e) => {
                let err = SessionError::ModelOrInferenceFailure(e.to_string());
                warn!(generation, kind = ?err.kind(), error = %err, "inference failed, skipping frame");
            }
        }
    }

    debug!(generation, "poller stopped");
}
