//! Perceptual session controller
//!
//! Capture, detection, voice commands and spoken feedback, coordinated by a
//! single task that owns all session state.

pub mod announcer;
pub mod capture;
pub mod command;
pub mod controller;
pub mod detection;
pub mod permission;
pub mod voice;

pub use capture::CaptureStatus;
pub use command::VoiceCommand;
pub use controller::{
    CaptureSnapshot, ControllerClosed, ControllerHandle, ErrorReport, SessionController,
    SessionSnapshot, VoiceSnapshot,
};
pub use detection::DetectionContext;
pub use voice::VoiceStatus;
