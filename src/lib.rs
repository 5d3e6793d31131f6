//! perceva-daemon: camera object detection and voice commands with spoken
//! feedback, driven by a single session controller task.
//!
//! The library exposes the controller and the host capability ports it
//! consumes; the `perceva-daemon` binary hosts it behind a local IPC socket.

pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod ipc;
pub mod lifecycle;
pub mod session;
