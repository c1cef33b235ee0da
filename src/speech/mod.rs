//! Speech input
//!
//! Continuous recognition with language identification is an external
//! capability ([`Recognizer`]). [`SpeechInput`] turns its interim and final
//! results into the `user_speaking` flag and finalized utterances.

use async_trait::async_trait;

use crate::Result;
use crate::config::RecognitionConfig;
use crate::session::{EventSender, SessionEvent};

/// Output of a running recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Partial hypothesis while the user is talking
    Interim { text: String },
    /// Finalized utterance
    Final {
        text: String,
        /// Detected language, if identification ran
        language: Option<String>,
    },
    /// Recognition session ended
    Stopped,
}

/// Handle a recognizer uses to report results for one listening epoch
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    epoch: u64,
    tx: EventSender,
}

impl RecognitionSink {
    pub(crate) const fn new(epoch: u64, tx: EventSender) -> Self {
        Self { epoch, tx }
    }

    /// Listening epoch these results belong to
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Report a partial hypothesis
    pub fn interim(&self, text: impl Into<String>) -> bool {
        self.emit(RecognitionEvent::Interim { text: text.into() })
    }

    /// Report a finalized utterance
    pub fn final_transcript(&self, text: impl Into<String>, language: Option<String>) -> bool {
        self.emit(RecognitionEvent::Final {
            text: text.into(),
            language,
        })
    }

    /// Report that recognition ended
    pub fn stopped(&self) -> bool {
        self.emit(RecognitionEvent::Stopped)
    }

    fn emit(&self, event: RecognitionEvent) -> bool {
        self.tx.send(SessionEvent::Recognition {
            epoch: self.epoch,
            event,
        })
    }
}

/// Continuous speech recognition capability
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Start continuous recognition, reporting through `sink`
    ///
    /// # Errors
    ///
    /// Returns error if recognition cannot be started
    async fn start(&self, config: &RecognitionConfig, sink: RecognitionSink) -> Result<()>;

    /// Stop recognition
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer fails to stop cleanly
    async fn stop(&self) -> Result<()>;
}

/// Effect of a recognition event on session input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputUpdate {
    /// New value of `user_speaking`, if it changed
    pub user_speaking: Option<bool>,
    /// Finalized, non-blank utterance
    pub utterance: Option<String>,
}

/// Microphone-side state
#[derive(Debug, Default)]
pub struct SpeechInput {
    user_speaking: bool,
    listening: Option<u64>,
    next_epoch: u64,
}

impl SpeechInput {
    /// Whether the user is mid-utterance
    #[must_use]
    pub const fn user_speaking(&self) -> bool {
        self.user_speaking
    }

    /// Whether a listening epoch is open
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.listening.is_some()
    }

    /// Open a new listening epoch
    pub fn begin_listening(&mut self) -> u64 {
        self.next_epoch += 1;
        self.listening = Some(self.next_epoch);
        self.next_epoch
    }

    /// Close the listening epoch
    ///
    /// Returns whether the user was marked as speaking.
    pub fn stop_listening(&mut self) -> bool {
        self.listening = None;
        let was_speaking = self.user_speaking;
        self.user_speaking = false;
        was_speaking
    }

    /// Whether an epoch is the open one
    #[must_use]
    pub fn is_current(&self, epoch: u64) -> bool {
        self.listening == Some(epoch)
    }

    /// Apply a recognition event
    ///
    /// Events from a closed epoch return `None`.
    pub fn accept(&mut self, epoch: u64, event: RecognitionEvent) -> Option<InputUpdate> {
        if !self.is_current(epoch) {
            return None;
        }

        let mut update = InputUpdate::default();
        match event {
            RecognitionEvent::Interim { text } => {
                if !text.trim().is_empty() {
                    self.set_speaking(true, &mut update);
                }
            }
            RecognitionEvent::Final { text, language } => {
                self.set_speaking(false, &mut update);
                let text = text.trim();
                if !text.is_empty() {
                    tracing::debug!(
                        language = language.as_deref().unwrap_or("unknown"),
                        "utterance finalized"
                    );
                    update.utterance = Some(text.to_string());
                }
            }
            RecognitionEvent::Stopped => {
                self.set_speaking(false, &mut update);
            }
        }
        Some(update)
    }

    fn set_speaking(&mut self, speaking: bool, update: &mut InputUpdate) {
        if self.user_speaking != speaking {
            self.user_speaking = speaking;
            update.user_speaking = Some(speaking);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interim(text: &str) -> RecognitionEvent {
        RecognitionEvent::Interim {
            text: text.to_string(),
        }
    }

    fn final_text(text: &str) -> RecognitionEvent {
        RecognitionEvent::Final {
            text: text.to_string(),
            language: Some("en-US".to_string()),
        }
    }

    #[test]
    fn interim_then_final() {
        let mut input = SpeechInput::default();
        let epoch = input.begin_listening();

        let update = input.accept(epoch, interim("what's the")).unwrap();
        assert_eq!(update.user_speaking, Some(true));
        assert!(input.user_speaking());

        let update = input.accept(epoch, interim("what's the weather")).unwrap();
        assert_eq!(update.user_speaking, None);

        let update = input.accept(epoch, final_text("  What's the weather?  ")).unwrap();
        assert_eq!(update.user_speaking, Some(false));
        assert_eq!(update.utterance.as_deref(), Some("What's the weather?"));
    }

    #[test]
    fn blank_final_yields_nothing() {
        let mut input = SpeechInput::default();
        let epoch = input.begin_listening();

        let update = input.accept(epoch, final_text("   ")).unwrap();
        assert!(update.utterance.is_none());
    }

    #[test]
    fn blank_interim_does_not_mark_speaking() {
        let mut input = SpeechInput::default();
        let epoch = input.begin_listening();

        input.accept(epoch, interim(""));
        assert!(!input.user_speaking());
    }

    #[test]
    fn stopped_clears_speaking() {
        let mut input = SpeechInput::default();
        let epoch = input.begin_listening();
        input.accept(epoch, interim("hel"));

        let update = input.accept(epoch, RecognitionEvent::Stopped).unwrap();
        assert_eq!(update.user_speaking, Some(false));
    }

    #[test]
    fn stale_epoch_is_dropped() {
        let mut input = SpeechInput::default();
        let old = input.begin_listening();
        input.stop_listening();
        let current = input.begin_listening();

        assert!(input.accept(old, final_text("late")).is_none());
        assert!(input.accept(current, final_text("fresh")).is_some());
    }
}
