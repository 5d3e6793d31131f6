//! Error taxonomy shared by the capture, detection and voice sessions
//!
//! Host capabilities report their own failure codes; those are mapped
//! into [`SessionError`] at the boundary so every session surfaces the
//! same fixed set of kinds.

use serde::{Deserialize, Serialize};

use crate::host::CaptureFailure;

/// Message shown when the host has no capture capability at all
pub const CAMERA_UNSUPPORTED: &str = "Camera is not supported in your browser.";

/// Message shown when the host has no speech-recognition capability
pub const RECOGNITION_UNSUPPORTED: &str =
    "Speech recognition is not supported in your browser. Try Chrome, Edge, or Safari.";

/// Message shown when voice is enabled while the microphone is denied
pub const MICROPHONE_DENIED: &str =
    "Microphone permission denied. Please enable microphone access in your browser settings.";

/// Classification of a session failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unsupported,
    PermissionDenied,
    DeviceUnavailable,
    ConstraintUnsatisfiable,
    TransientRecognitionFailure,
    ModelOrInferenceFailure,
}

/// A classified session failure with its user-facing message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The host lacks the capability at all
    #[error("{0}")]
    Unsupported(String),

    /// Explicit user or host denial
    #[error("{0}")]
    PermissionDenied(String),

    /// Device not found or already in use by another consumer
    #[error("{0}")]
    DeviceUnavailable(String),

    /// Requested capture parameters are impossible
    #[error("{0}")]
    ConstraintUnsatisfiable(String),

    /// No speech detected, network hiccup; retried by the restart path
    #[error("{0}")]
    TransientRecognitionFailure(String),

    /// Model load or single-frame detection error; logged only
    #[error("{0}")]
    ModelOrInferenceFailure(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Unsupported(_) => ErrorKind::Unsupported,
            SessionError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SessionError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            SessionError::ConstraintUnsatisfiable(_) => ErrorKind::ConstraintUnsatisfiable,
            SessionError::TransientRecognitionFailure(_) => ErrorKind::TransientRecognitionFailure,
            SessionError::ModelOrInferenceFailure(_) => ErrorKind::ModelOrInferenceFailure,
        }
    }

    /// Terminal errors force the feature off for the current enable attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::Unsupported(_) | SessionError::PermissionDenied(_)
        )
    }

    /// Map a host capture failure into the taxonomy
    pub fn from_capture(failure: &CaptureFailure) -> Self {
        match failure {
            CaptureFailure::NotAllowed => SessionError::PermissionDenied(
                "Camera permission denied. Please allow camera access in your browser settings."
                    .to_string(),
            ),
            CaptureFailure::NotFound => {
                SessionError::DeviceUnavailable("No camera device found on this device.".to_string())
            }
            CaptureFailure::NotReadable => SessionError::DeviceUnavailable(
                "Camera is already in use by another application. Please close other apps using the camera."
                    .to_string(),
            ),
            CaptureFailure::Overconstrained => SessionError::ConstraintUnsatisfiable(
                "Camera requirements could not be met. Try relaxing constraints.".to_string(),
            ),
            CaptureFailure::Other(message) => {
                SessionError::DeviceUnavailable(format!("Error: {}", message))
            }
        }
    }

    /// Map a recognition error code (`not-allowed`, `no-speech`, ...) into the taxonomy
    pub fn from_recognition_code(code: &str) -> Self {
        match code {
            "not-allowed" => SessionError::PermissionDenied(
                "Microphone permission denied. Please allow microphone access in your browser settings."
                    .to_string(),
            ),
            "no-speech" => SessionError::TransientRecognitionFailure(
                "No speech detected. Please try again.".to_string(),
            ),
            "network" => SessionError::TransientRecognitionFailure(
                "Network error. Please check your connection.".to_string(),
            ),
            "audio-capture" => SessionError::DeviceUnavailable(
                "No microphone found. Please check your device has a working microphone."
                    .to_string(),
            ),
            "service-not-allowed" => SessionError::Unsupported(
                "Speech recognition service is not available. Try using HTTPS connection."
                    .to_string(),
            ),
            other => SessionError::TransientRecognitionFailure(format!(
                "Speech recognition error: {}",
                other
            )),
        }
    }
}
