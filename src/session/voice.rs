//! Voice command channel state machine
//!
//! Drives a continuous recognition session through
//! `Idle -> Starting -> Listening -> (Stopping | Error) -> Idle`.
//! The host may end a session at any time; while the feature is enabled
//! the channel restarts it. Every session gets an id and events from any
//! session other than the current one are ignored, so an `Ended` that
//! arrives after a disable can never restart listening.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::announcer::Announcer;
use super::command::{normalize_transcript, VoiceCommand};
use super::permission::PermissionGate;
use crate::error::{SessionError, MICROPHONE_DENIED, RECOGNITION_UNSUPPORTED};
use crate::events::SessionEvent;
use crate::host::{
    PermissionState, RecognitionConfig, RecognitionEvent, RecognitionSession, RecognitionSink,
    SpeechRecognizer,
};

pub const LISTENING: &str = "Listening for voice commands";

/// Status of the voice channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStatus {
    #[default]
    Idle,
    Starting,
    Listening,
    Stopping,
    Error,
}

impl std::fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceStatus::Idle => write!(f, "Idle"),
            VoiceStatus::Starting => write!(f, "Starting"),
            VoiceStatus::Listening => write!(f, "Listening"),
            VoiceStatus::Stopping => write!(f, "Stopping"),
            VoiceStatus::Error => write!(f, "Error"),
        }
    }
}

struct ActiveSession {
    id: u64,
    handle: Box<dyn RecognitionSession>,
}

pub struct VoiceChannel {
    status: VoiceStatus,
    enabled: bool,
    last_command: Option<String>,
    error: Option<SessionError>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    config: RecognitionConfig,
    session: Option<ActiveSession>,
    next_session: u64,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl VoiceChannel {
    pub fn new(
        recognizer: Option<Arc<dyn SpeechRecognizer>>,
        config: RecognitionConfig,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            status: VoiceStatus::Idle,
            enabled: false,
            last_command: None,
            error: None,
            recognizer,
            config,
            session: None,
            next_session: 0,
            event_tx,
        }
    }

    pub fn status(&self) -> VoiceStatus {
        self.status
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_command(&self) -> Option<&str> {
        self.last_command.as_deref()
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// Turn the feature on. `sink_for` builds the event sink for a new
    /// session id.
    pub fn enable<F>(&mut self, permission: PermissionState, announcer: &Announcer, sink_for: F)
    where
        F: FnOnce(u64) -> RecognitionSink,
    {
        if self.enabled {
            debug!("voice commands already enabled");
            return;
        }

        let Some(recognizer) = self.recognizer.clone() else {
            self.fail(
                SessionError::Unsupported(RECOGNITION_UNSUPPORTED.to_string()),
                announcer,
            );
            return;
        };

        if permission == PermissionState::Denied {
            self.fail(
                SessionError::PermissionDenied(MICROPHONE_DENIED.to_string()),
                announcer,
            );
            return;
        }

        self.next_session += 1;
        let id = self.next_session;
        let handle = recognizer.create_session(&self.config, sink_for(id));
        self.session = Some(ActiveSession { id, handle });
        self.enabled = true;
        info!(session = id, language = %self.config.language, "voice commands enabled");

        self.start_session(announcer);
    }

    /// Turn the feature off. Always ends in `Idle`.
    pub fn disable(&mut self) {
        self.enabled = false;

        if let Some(mut session) = self.session.take() {
            self.transition_to(VoiceStatus::Stopping);
            if let Err(e) = session.handle.stop() {
                warn!(session = session.id, error = %e, "error stopping recognition");
            }
            info!(session = session.id, "voice commands disabled");
        }

        self.transition_to(VoiceStatus::Idle);
    }

    /// Flip the feature
    pub fn toggle<F>(&mut self, permission: PermissionState, announcer: &Announcer, sink_for: F)
    where
        F: FnOnce(u64) -> RecognitionSink,
    {
        if self.enabled {
            self.disable();
        } else {
            self.enable(permission, announcer, sink_for);
        }
    }

    /// Handle a recognition event. Returns the command to dispatch when a
    /// final transcript was heard.
    pub fn on_event(
        &mut self,
        session: u64,
        event: RecognitionEvent,
        permissions: &mut PermissionGate,
        announcer: &Announcer,
    ) -> Option<VoiceCommand> {
        let current = self.session.as_ref().is_some_and(|s| s.id == session);
        if !current {
            debug!(session, ?event, "ignoring event from inactive session");
            return None;
        }

        match event {
            RecognitionEvent::Started => {
                self.error = None;
                self.transition_to(VoiceStatus::Listening);
                announcer.announce(LISTENING);
                None
            }
            RecognitionEvent::Ended => {
                if self.enabled {
                    info!(session, "recognition ended, restarting");
                    self.start_session(announcer);
                } else {
                    self.transition_to(VoiceStatus::Idle);
                }
                None
            }
            RecognitionEvent::Error(code) => {
                let err = SessionError::from_recognition_code(&code);
                error!(session, %code, kind = ?err.kind(), "speech recognition error");

                if matches!(err, SessionError::PermissionDenied(_)) {
                    permissions.update(PermissionState::Denied);
                }
                if err.is_terminal() {
                    self.shut_down_session();
                }
                self.fail(err, announcer);
                None
            }
            RecognitionEvent::Result(segments) => {
                let command = normalize_transcript(&segments)?;
                info!(session, %command, "voice command heard");

                self.last_command = Some(command.clone());
                let _ = self.event_tx.send(SessionEvent::CommandHeard {
                    command: command.clone(),
                });

                let parsed = VoiceCommand::parse(&command);
                announcer.announce(&parsed.intent());
                Some(parsed)
            }
        }
    }

    /// React to a host permission change
    pub fn on_permission_changed(&mut self, permission: PermissionState, announcer: &Announcer) {
        if permission == PermissionState::Denied && self.enabled {
            warn!("microphone permission revoked while listening");
            self.shut_down_session();
            self.fail(
                SessionError::PermissionDenied(MICROPHONE_DENIED.to_string()),
                announcer,
            );
        }
    }

    fn start_session(&mut self, announcer: &Announcer) {
        self.transition_to(VoiceStatus::Starting);
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let id = session.id;
        if let Err(e) = session.handle.start() {
            error!(session = id, error = %e, "failed to start speech recognition");
            self.shut_down_session();
            self.fail(
                SessionError::DeviceUnavailable(format!(
                    "Could not start speech recognition: {}",
                    e
                )),
                announcer,
            );
        }
    }

    /// Force the feature off and release the session without going
    /// through `Idle`
    fn shut_down_session(&mut self) {
        self.enabled = false;
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.handle.stop() {
                warn!(session = session.id, error = %e, "error stopping recognition");
            }
        }
    }

    fn fail(&mut self, error: SessionError, announcer: &Announcer) {
        let _ = self.event_tx.send(SessionEvent::ErrorRaised {
            kind: error.kind(),
            message: error.to_string(),
        });
        announcer.announce(&error.to_string());
        self.error = Some(error);
        self.transition_to(VoiceStatus::Error);
    }

    fn transition_to(&mut self, status: VoiceStatus) {
        if status == self.status {
            return;
        }

        info!(from = %self.status, to = %status, "voice transition");
        self.status = status;
        let _ = self.event_tx.send(SessionEvent::VoiceStatusChanged { status });
    }
}

impl Drop for VoiceChannel {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.handle.stop();
        }
    }
}
