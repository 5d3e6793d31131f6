//! Spoken feedback channel
//!
//! Holds at most one utterance in flight: every announcement cancels the
//! one currently being spoken (latest wins, nothing is queued).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::SpeechConfig;
use crate::events::SessionEvent;
use crate::host::{SpeechOutput, Utterance};

/// Spoken when narration is switched on
pub const NARRATION_ONBOARDING: &str =
    "Screen reader enabled. All buttons and descriptions will be read aloud.";

pub struct Announcer {
    narration: bool,
    output: Option<Arc<dyn SpeechOutput>>,
    voice: SpeechConfig,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Announcer {
    pub fn new(
        output: Option<Arc<dyn SpeechOutput>>,
        voice: SpeechConfig,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            narration: false,
            output,
            voice,
            event_tx,
        }
    }

    /// Whether narration mode is active
    pub fn narration(&self) -> bool {
        self.narration
    }

    /// Speak `text`, cutting off whatever is currently being said.
    /// No-op unless narration is on and the host can speak.
    pub fn announce(&self, text: &str) {
        if !self.narration {
            return;
        }
        let Some(output) = self.output.as_ref() else {
            debug!("no speech output on host, announcement dropped");
            return;
        };

        output.cancel_current();
        output.speak(&Utterance {
            text: text.to_string(),
            rate: self.voice.rate,
            pitch: self.voice.pitch,
            volume: self.voice.volume,
        });

        let _ = self.event_tx.send(SessionEvent::Announced {
            text: text.to_string(),
        });
    }

    /// Flip narration mode; returns the new mode
    pub fn toggle_narration(&mut self) -> bool {
        self.narration = !self.narration;
        info!(enabled = self.narration, "narration toggled");
        let _ = self.event_tx.send(SessionEvent::NarrationToggled {
            enabled: self.narration,
        });

        if self.narration {
            self.announce(NARRATION_ONBOARDING);
        } else if let Some(output) = self.output.as_ref() {
            output.cancel_current();
        }

        self.narration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::simulated::RecordingSpeaker;

    fn announcer(speaker: &Arc<RecordingSpeaker>) -> Announcer {
        let (tx, _rx) = broadcast::channel(16);
        Announcer::new(Some(speaker.clone()), SpeechConfig::default(), tx)
    }

    #[test]
    fn test_silent_without_narration() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let announcer = announcer(&speaker);

        announcer.announce("hello");
        assert!(speaker.spoken().is_empty());
    }

    #[test]
    fn test_enabling_narration_speaks_onboarding() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut announcer = announcer(&speaker);

        assert!(announcer.toggle_narration());
        assert_eq!(speaker.spoken(), vec![NARRATION_ONBOARDING.to_string()]);
    }

    #[test]
    fn test_latest_announcement_wins() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut announcer = announcer(&speaker);
        announcer.toggle_narration();

        announcer.announce("A");
        announcer.announce("B");

        assert_eq!(speaker.current().as_deref(), Some("B"));
        assert!(speaker.canceled().contains(&"A".to_string()));
    }

    #[test]
    fn test_finished_utterance_is_not_canceled() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut announcer = announcer(&speaker);
        announcer.toggle_narration();

        announcer.announce("A");
        speaker.finish();
        announcer.announce("B");

        assert_eq!(speaker.current().as_deref(), Some("B"));
        assert!(!speaker.canceled().contains(&"A".to_string()));
    }

    #[test]
    fn test_disabling_narration_cuts_speech() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut announcer = announcer(&speaker);
        announcer.toggle_narration();
        announcer.announce("long description");

        assert!(!announcer.toggle_narration());
        assert!(speaker.current().is_none());

        announcer.announce("after");
        assert!(!speaker.spoken().contains(&"after".to_string()));
    }

    #[test]
    fn test_missing_speech_output_is_noop() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut announcer = Announcer::new(None, SpeechConfig::default(), tx);
        announcer.toggle_narration();
        announcer.announce("hello");

        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::NarrationToggled { enabled: true })
        ));
        assert!(rx.try_recv().is_err());
    }
}
