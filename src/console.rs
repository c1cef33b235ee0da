//! Terminal capability providers
//!
//! Lets a session run end to end without a media stack: the transport is a
//! loopback that is ready immediately, recognition is fed from typed lines and
//! the avatar "speaks" by printing.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::Result;
use crate::avatar::{SpeakRequest, SynthesisOutcome, Synthesizer};
use crate::config::RecognitionConfig;
use crate::speech::{RecognitionSink, Recognizer};
use crate::transport::{
    AvatarAppearance, HealthState, MediaKind, MediaTransport, NegotiationRequest,
    TransportEvents, TransportHandle, TransportId,
};

/// Transport that connects instantly to nothing
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    live: Arc<Mutex<Option<TransportEvents>>>,
}

impl LoopbackTransport {
    /// Report a connection failure on the live instance
    ///
    /// Returns false if nothing is connected.
    pub fn drop_connection(&self) -> bool {
        let live = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match live {
            Some(events) => {
                tracing::info!(transport = %events.id(), "simulating transport failure");
                events.health(HealthState::Failed);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct LoopbackHandle {
    id: TransportId,
    live: Arc<Mutex<Option<TransportEvents>>>,
}

impl TransportHandle for LoopbackHandle {
    fn close(&mut self) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.as_ref().is_some_and(|e| e.id() == self.id) {
            *live = None;
        }
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn negotiate(
        &self,
        request: NegotiationRequest,
        events: TransportEvents,
    ) -> Result<Box<dyn TransportHandle>> {
        let id = events.id();
        tracing::debug!(%id, channel = %request.data_channel, "loopback negotiating");

        events.health(HealthState::Checking);
        for kind in [MediaKind::Audio, MediaKind::Video] {
            events.track(kind, format!("loopback-{kind}"));
            events.playing(kind);
        }
        events.health(HealthState::Connected);

        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);

        Ok(Box::new(LoopbackHandle {
            id,
            live: Arc::clone(&self.live),
        }))
    }
}

/// Recognizer fed from typed lines
#[derive(Debug, Clone, Default)]
pub struct ConsoleRecognizer {
    sink: Arc<Mutex<Option<RecognitionSink>>>,
}

impl ConsoleRecognizer {
    /// Treat a typed line as a spoken utterance
    ///
    /// Returns false if recognition is not running.
    pub fn hear(&self, line: &str) -> bool {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match sink {
            Some(sink) => {
                sink.interim(line);
                sink.final_transcript(line, None)
            }
            None => false,
        }
    }

    /// Whether recognition is running
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[async_trait]
impl Recognizer for ConsoleRecognizer {
    async fn start(&self, config: &RecognitionConfig, sink: RecognitionSink) -> Result<()> {
        tracing::debug!(
            languages = ?config.languages,
            epoch = sink.epoch(),
            "console recognition started"
        );
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sink) = sink {
            sink.stopped();
        }
        Ok(())
    }
}

/// Synthesizer that prints utterances
///
/// Playback takes a fixed time per word so barge-in can be exercised.
#[derive(Debug)]
pub struct ConsoleSynthesizer {
    per_word: Duration,
    interrupt: Notify,
}

impl ConsoleSynthesizer {
    /// Create a synthesizer that "speaks" at the given pace
    #[must_use]
    pub fn new(per_word: Duration) -> Self {
        Self {
            per_word,
            interrupt: Notify::new(),
        }
    }
}

impl Default for ConsoleSynthesizer {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

#[async_trait]
impl Synthesizer for ConsoleSynthesizer {
    async fn attach(&self, transport: TransportId, appearance: &AvatarAppearance) -> Result<()> {
        tracing::debug!(
            %transport,
            character = %appearance.character,
            style = %appearance.style,
            "console avatar attached"
        );
        Ok(())
    }

    async fn speak(&self, request: SpeakRequest) -> Result<SynthesisOutcome> {
        println!("avatar> {}", request.text);

        let words = u32::try_from(request.text.split_whitespace().count()).unwrap_or(u32::MAX);
        let playback = tokio::time::sleep(self.per_word.saturating_mul(words));

        tokio::select! {
            () = playback => Ok(SynthesisOutcome::Completed),
            () = self.interrupt.notified() => Ok(SynthesisOutcome::Incomplete),
        }
    }

    fn cancel(&self) {
        self.interrupt.notify_waiters();
    }
}
