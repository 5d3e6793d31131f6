//! Events broadcast by the session controller
//!
//! Observers (the IPC server, the daemon's log loop) subscribe to these to
//! follow capture, detection and voice activity without polling.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::host::PermissionState;
use crate::session::{CaptureStatus, VoiceStatus};

/// Events emitted by the controller as sessions change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Capture session moved to a new status
    CaptureStatusChanged { status: CaptureStatus },

    /// Detection published a new label set (empty when nothing is seen)
    LabelsDetected { labels: Vec<String> },

    /// The shared detection model started or finished loading
    ModelLoadingChanged { loading: bool },

    /// Voice channel moved to a new status
    VoiceStatusChanged { status: VoiceStatus },

    /// A final transcript was normalized and dispatched
    CommandHeard { command: String },

    /// Text handed to the speech output
    Announced { text: String },

    /// Narration mode flipped
    NarrationToggled { enabled: bool },

    /// Microphone permission changed
    PermissionChanged { permission: PermissionState },

    /// A classified failure surfaced to the user
    ErrorRaised { kind: ErrorKind, message: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::CaptureStatusChanged { status } => {
                write!(f, "CAPTURE_STATUS_CHANGED ({})", status)
            }
            SessionEvent::LabelsDetected { labels } => {
                write!(f, "LABELS_DETECTED ({})", labels.join(", "))
            }
            SessionEvent::ModelLoadingChanged { loading } => {
                write!(f, "MODEL_LOADING_CHANGED ({})", loading)
            }
            SessionEvent::VoiceStatusChanged { status } => {
                write!(f, "VOICE_STATUS_CHANGED ({})", status)
            }
            SessionEvent::CommandHeard { command } => write!(f, "COMMAND_HEARD ({})", command),
            SessionEvent::Announced { text } => write!(f, "ANNOUNCED ({})", text),
            SessionEvent::NarrationToggled { enabled } => {
                write!(f, "NARRATION_TOGGLED ({})", enabled)
            }
            SessionEvent::PermissionChanged { permission } => {
                write!(f, "PERMISSION_CHANGED ({})", permission)
            }
            SessionEvent::ErrorRaised { kind, message } => {
                write!(f, "ERROR_RAISED ({:?}: {})", kind, message)
            }
        }
    }
}
