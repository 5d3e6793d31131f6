//! Voice command parsing

use crate::host::TranscriptSegment;

/// Action requested by a spoken command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCommand {
    StartCamera,
    StopCamera,
    OpenUploader,
    Unrecognized(String),
}

impl VoiceCommand {
    /// Match a normalized (lowercase, trimmed) command
    pub fn parse(command: &str) -> Self {
        let has = |word: &str| command.contains(word);

        if has("start") && (has("camera") || has("cam")) {
            VoiceCommand::StartCamera
        } else if has("stop") && has("camera") {
            VoiceCommand::StopCamera
        } else if has("upload") || has("choose") {
            VoiceCommand::OpenUploader
        } else {
            VoiceCommand::Unrecognized(command.to_string())
        }
    }

    /// What gets announced when the command is dispatched
    pub fn intent(&self) -> String {
        match self {
            VoiceCommand::StartCamera => "Starting camera".to_string(),
            VoiceCommand::StopCamera => "Stopping camera".to_string(),
            VoiceCommand::OpenUploader => "Opening file chooser".to_string(),
            VoiceCommand::Unrecognized(command) => format!("Command not recognized: {}", command),
        }
    }
}

/// Join the final segments of a result into one normalized command.
/// Interim segments are ignored; `None` when nothing final was heard.
pub fn normalize_transcript(segments: &[TranscriptSegment]) -> Option<String> {
    let joined = segments
        .iter()
        .filter(|s| s.is_final)
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let command = joined.trim().to_lowercase();
    if command.is_empty() {
        None
    } else {
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_camera_variants() {
        assert_eq!(VoiceCommand::parse("start the camera please"), VoiceCommand::StartCamera);
        assert_eq!(VoiceCommand::parse("start cam"), VoiceCommand::StartCamera);
    }

    #[test]
    fn test_stop_camera() {
        assert_eq!(VoiceCommand::parse("stop camera"), VoiceCommand::StopCamera);
        assert_eq!(
            VoiceCommand::parse("stop cam"),
            VoiceCommand::Unrecognized("stop cam".into())
        );
    }

    #[test]
    fn test_upload() {
        assert_eq!(VoiceCommand::parse("upload a video"), VoiceCommand::OpenUploader);
        assert_eq!(VoiceCommand::parse("choose files"), VoiceCommand::OpenUploader);
    }

    #[test]
    fn test_unrecognized_intent() {
        let command = VoiceCommand::parse("hello there");
        assert_eq!(command.intent(), "Command not recognized: hello there");
    }

    #[test]
    fn test_normalize_ignores_interim() {
        let segments = vec![
            TranscriptSegment::final_text("  Start The"),
            TranscriptSegment::interim("cam"),
            TranscriptSegment::final_text("Camera  "),
        ];
        assert_eq!(
            normalize_transcript(&segments).as_deref(),
            Some("start the camera")
        );

        assert!(normalize_transcript(&[TranscriptSegment::interim("start camera")]).is_none());
    }
}
