//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::host::{CaptureConstraints, RecognitionConfig};

/// Detection cadence and narration throttle
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    /// Time between inference requests
    pub poll_interval: Duration,

    /// Chance per published label set that it is spoken while narrating
    pub narration_probability: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            narration_probability: 0.1,
        }
    }
}

/// Voice parameters for spoken announcements
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechConfig {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub detection: DetectionConfig,
    pub speech: SpeechConfig,
    pub voice: RecognitionConfig,
    pub capture: CaptureConstraints,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("perceva");

        let socket_path = lookup("PERCEVA_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let mut detection = DetectionConfig::default();
        if let Some(raw) = lookup("PERCEVA_POLL_MS") {
            let ms: u64 = raw
                .parse()
                .with_context(|| format!("invalid PERCEVA_POLL_MS: {raw}"))?;
            if ms == 0 {
                bail!("PERCEVA_POLL_MS must be greater than zero");
            }
            detection.poll_interval = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("PERCEVA_NARRATION_PROBABILITY") {
            let p: f64 = raw
                .parse()
                .with_context(|| format!("invalid PERCEVA_NARRATION_PROBABILITY: {raw}"))?;
            detection.narration_probability = p.clamp(0.0, 1.0);
        }

        let mut voice = RecognitionConfig::default();
        if let Some(language) = lookup("PERCEVA_LANG") {
            voice.language = language;
        }

        Ok(Self {
            socket_path,
            data_dir,
            detection,
            speech: SpeechConfig::default(),
            voice,
            capture: CaptureConstraints::default(),
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
