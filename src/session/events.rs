//! Session inbox and outbound notices
//!
//! Everything that can change session state arrives on one channel as a
//! [`SessionEvent`]. Completions from spawned work carry the id of the
//! operation that produced them so the session can drop stale results.

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::SessionState;
use crate::Result;
use crate::avatar::SynthesisOutcome;
use crate::speech::RecognitionEvent;
use crate::transport::{MediaKind, TransportEvent, TransportHandle, TransportId};

/// User-issued session commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    End,
    ToggleMicrophone,
    ToggleLocalCamera,
}

/// Inputs to the session loop
#[derive(Debug)]
pub enum SessionEvent {
    /// A user command
    Command(SessionCommand),
    /// Descriptor fetch finished
    DescriptorFetched {
        attempt: u64,
        result: Result<crate::transport::ConnectionDescriptor>,
    },
    /// Transport negotiation finished
    Negotiated {
        transport: TransportId,
        result: Result<Box<dyn TransportHandle>>,
    },
    /// A transport reported tracks or health
    Transport {
        transport: TransportId,
        event: TransportEvent,
    },
    /// Tracks did not become ready in time
    ReadinessDeadline { transport: TransportId },
    /// Recognition output for a listening epoch
    Recognition {
        epoch: u64,
        event: RecognitionEvent,
    },
    /// The recognizer could not be started
    RecognizerFailed { epoch: u64, error: crate::Error },
    /// Backend answered (or failed) a dispatched query
    BackendReplied {
        dispatch: u64,
        result: Result<String>,
    },
    /// An utterance finished
    SpeechEnded {
        utterance: u64,
        result: Result<SynthesisOutcome>,
    },
    /// Back-off for a reconnection attempt elapsed
    ReconnectDue { attempt: u32 },
}

/// Cloneable sender into the session inbox
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<SessionEvent>);

impl EventSender {
    /// Create a sender and its receiving end
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Post an event
    ///
    /// Returns false once the session loop has exited.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.0.send(event).is_ok()
    }

    /// Whether the session loop has exited
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// Wait for the session loop to exit
    pub async fn closed(&self) {
        self.0.closed().await;
    }
}

/// Observable happenings, published to subscribers in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    Status {
        text: String,
    },
    TrackBound {
        kind: MediaKind,
    },
    TrackPlaying {
        kind: MediaKind,
    },
    MicrophoneChanged {
        on: bool,
    },
    CameraChanged {
        on: bool,
    },
    UserSpeaking {
        speaking: bool,
    },
    QueryEnqueued {
        text: String,
        pending: usize,
    },
    QueryDispatched {
        text: String,
    },
    Reply {
        text: String,
        /// The fixed apology replaced a failed or empty backend answer
        fallback: bool,
    },
    SpeechStarted {
        utterance: u64,
        text: String,
    },
    SpeechCancelled {
        utterance: u64,
    },
    SpeechFinished {
        utterance: u64,
        completed: bool,
    },
    Reconnecting {
        attempt: u32,
    },
    FatalError {
        message: String,
    },
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: SessionState,
    pub status: String,
    pub avatar_speaking: bool,
    pub user_speaking: bool,
    pub microphone_on: bool,
    pub camera_on: bool,
    pub pending_queries: usize,
    pub dispatching: bool,
    pub reconnect_attempt: u32,
    pub has_activated_once: bool,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// Snapshot of a session that has not started
    #[must_use]
    pub fn idle(session_id: Uuid) -> Self {
        Self {
            session_id,
            state: SessionState::Idle,
            status: "Ready to start".to_string(),
            avatar_speaking: false,
            user_speaking: false,
            microphone_on: false,
            camera_on: false,
            pending_queries: 0,
            dispatching: false,
            reconnect_attempt: 0,
            has_activated_once: false,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_are_tagged() {
        let json = serde_json::to_value(Notice::StateChanged {
            from: SessionState::Connecting,
            to: SessionState::Active,
        })
        .unwrap();

        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["to"], "active");

        let json = serde_json::to_value(Notice::TrackPlaying {
            kind: MediaKind::Video,
        })
        .unwrap();
        assert_eq!(json["kind"], "video");
    }

    #[test]
    fn sender_reports_closed_loop() {
        let (tx, rx) = EventSender::channel();
        assert!(tx.send(SessionEvent::Command(SessionCommand::Start)));

        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.send(SessionEvent::Command(SessionCommand::End)));
    }
}
