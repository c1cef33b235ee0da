//! Avatar speech output
//!
//! The synthesizer renders SSML as lip-synced speech over the live transport.
//! [`AvatarOutput`] tracks the single utterance that may be playing, so that
//! `avatar_speaking` is true exactly while an utterance is in progress.

pub mod ssml;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::AbortHandle;

use crate::Result;
use crate::session::{EventSender, SessionEvent};
use crate::transport::{AvatarAppearance, TransportId};

/// One utterance to be spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakRequest {
    pub utterance: u64,
    pub text: String,
    pub ssml: String,
    /// Transport carrying the avatar media
    pub transport: TransportId,
}

/// How an utterance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// Spoken to the end
    Completed,
    /// Stopped before the end
    Incomplete,
}

/// Avatar speech synthesis capability
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Bind the avatar to a freshly negotiated transport
    ///
    /// # Errors
    ///
    /// Returns error if the avatar cannot be started on the transport
    async fn attach(&self, transport: TransportId, appearance: &AvatarAppearance) -> Result<()>;

    /// Speak an utterance, resolving when playback ends
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn speak(&self, request: SpeakRequest) -> Result<SynthesisOutcome>;

    /// Stop whatever is currently being spoken
    fn cancel(&self);

    /// Release resources tied to a transport that was torn down
    fn detach(&self, _transport: TransportId) {}
}

#[derive(Debug)]
struct Utterance {
    id: u64,
    task: AbortHandle,
}

/// Tracks the utterance in progress
pub struct AvatarOutput {
    synthesizer: Arc<dyn Synthesizer>,
    voice: String,
    locale: String,
    current: Option<Utterance>,
    deferred: Option<String>,
    next_id: u64,
}

impl AvatarOutput {
    /// Create output for a voice
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>, voice: String, locale: String) -> Self {
        Self {
            synthesizer,
            voice,
            locale,
            current: None,
            deferred: None,
            next_id: 0,
        }
    }

    /// Whether an utterance is in progress
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    /// Id of the utterance in progress
    #[must_use]
    pub fn current(&self) -> Option<u64> {
        self.current.as_ref().map(|u| u.id)
    }

    /// Start speaking, cancelling any utterance in progress
    ///
    /// Returns the new utterance id and the id of the one it cancelled. The
    /// outcome arrives as [`SessionEvent::SpeechEnded`].
    pub fn speak(
        &mut self,
        text: &str,
        transport: TransportId,
        events: &EventSender,
    ) -> (u64, Option<u64>) {
        let cancelled = self.cancel();

        self.next_id += 1;
        let id = self.next_id;

        let request = SpeakRequest {
            utterance: id,
            text: text.to_string(),
            ssml: ssml::render(text, &self.voice, &self.locale),
            transport,
        };

        let synthesizer = Arc::clone(&self.synthesizer);
        let tx = events.clone();
        let task = tokio::spawn(async move {
            let result = synthesizer.speak(request).await;
            tx.send(SessionEvent::SpeechEnded {
                utterance: id,
                result,
            });
        });

        tracing::debug!(utterance = id, chars = text.len(), %transport, "speaking");

        self.current = Some(Utterance {
            id,
            task: task.abort_handle(),
        });
        (id, cancelled)
    }

    /// Hold a reply until the session is live again
    ///
    /// Only the latest reply is kept.
    pub fn defer(&mut self, text: String) {
        if let Some(dropped) = self.deferred.replace(text) {
            tracing::debug!(chars = dropped.len(), "replacing deferred reply");
        }
    }

    /// Take the held reply, if any
    pub const fn take_deferred(&mut self) -> Option<String> {
        self.deferred.take()
    }

    /// Stop the utterance in progress
    ///
    /// Returns the id of the utterance that was stopped.
    pub fn cancel(&mut self) -> Option<u64> {
        let utterance = self.current.take()?;
        utterance.task.abort();
        self.synthesizer.cancel();
        tracing::debug!(utterance = utterance.id, "speech cancelled");
        Some(utterance.id)
    }

    /// Settle a finished utterance
    ///
    /// Returns whether it completed, or `None` if it was already cancelled or
    /// superseded.
    pub fn finish(&mut self, id: u64, result: &Result<SynthesisOutcome>) -> Option<bool> {
        if self.current() != Some(id) {
            return None;
        }
        self.current = None;

        match result {
            Ok(outcome) => Some(*outcome == SynthesisOutcome::Completed),
            Err(e) => {
                tracing::warn!(utterance = id, error = %e, "speech synthesis failed");
                Some(false)
            }
        }
    }

    /// Stop speaking and drop any held reply
    pub fn release(&mut self) {
        self.cancel();
        self.deferred = None;
    }
}

impl std::fmt::Debug for AvatarOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarOutput")
            .field("voice", &self.voice)
            .field("current", &self.current)
            .field("deferred", &self.deferred.is_some())
            .finish_non_exhaustive()
    }
}
