//! Real-time media transport
//!
//! The transport itself is an opaque capability: something that takes a
//! [`ConnectionDescriptor`], negotiates bidirectional audio and video, and
//! reports tracks and connectivity as typed events. This module defines that
//! contract plus the [`Negotiator`] that supervises one transport at a time.

mod negotiator;
pub mod relay;
mod tracks;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;

pub use negotiator::Negotiator;
pub use relay::{LoopbackDescriptorSource, RelayTokenSource};
pub use tracks::{Bindings, TrackBinding};

use crate::Result;
use crate::session::{EventSender, SessionEvent};

/// Negotiation material for one connection attempt
///
/// Fetched fresh for every attempt and never persisted.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    /// Relay (TURN) server URLs
    pub relay_urls: Vec<String>,
    /// Short-lived relay username
    pub username: String,
    /// Short-lived relay credential
    pub credential: SecretString,
}

/// Source of connection descriptors
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Fetch a fresh descriptor
    ///
    /// # Errors
    ///
    /// Returns error on network or credential failure
    async fn fetch(&self) -> Result<ConnectionDescriptor>;
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Connectivity reported by the transport health signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl HealthState {
    /// Whether this state should trigger recovery
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Identifies one transport instance within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransportId(pub u64);

impl std::fmt::Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

/// Avatar appearance requested alongside the media channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarAppearance {
    pub character: String,
    pub style: String,
}

/// Everything a transport needs to negotiate
///
/// Audio and video are always negotiated in both directions.
#[derive(Debug, Clone)]
pub struct NegotiationRequest {
    pub descriptor: ConnectionDescriptor,
    /// Label of the auxiliary event data channel
    pub data_channel: String,
    pub appearance: AvatarAppearance,
}

impl NegotiationRequest {
    /// Request bidirectional audio and video
    #[must_use]
    pub fn bidirectional(descriptor: ConnectionDescriptor, appearance: AvatarAppearance) -> Self {
        Self {
            descriptor,
            data_channel: "eventChannel".to_string(),
            appearance,
        }
    }
}

/// Events a transport emits while alive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An inbound track was observed
    Track { kind: MediaKind, stream: String },
    /// An inbound track started playing
    TrackPlaying { kind: MediaKind },
    /// Connectivity changed
    Health(HealthState),
}

/// Handle a transport uses to report events for one instance
///
/// Events are tagged with the instance id so the session can drop reports from
/// a transport it has already torn down.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    id: TransportId,
    tx: EventSender,
}

impl TransportEvents {
    pub(crate) const fn new(id: TransportId, tx: EventSender) -> Self {
        Self { id, tx }
    }

    /// Transport instance these events belong to
    #[must_use]
    pub const fn id(&self) -> TransportId {
        self.id
    }

    /// Report an inbound track
    pub fn track(&self, kind: MediaKind, stream: impl Into<String>) {
        self.emit(TransportEvent::Track {
            kind,
            stream: stream.into(),
        });
    }

    /// Report that a track is playing
    pub fn playing(&self, kind: MediaKind) {
        self.emit(TransportEvent::TrackPlaying { kind });
    }

    /// Report connectivity
    pub fn health(&self, state: HealthState) {
        self.emit(TransportEvent::Health(state));
    }

    fn emit(&self, event: TransportEvent) {
        self.tx.send(SessionEvent::Transport {
            transport: self.id,
            event,
        });
    }
}

/// Live transport instance
pub trait TransportHandle: Send + std::fmt::Debug {
    /// Tear the transport down
    ///
    /// Must release the underlying media before returning.
    fn close(&mut self);
}

/// Media transport capability
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Negotiate a transport for the given request
    ///
    /// Track and health events for the new instance are reported through
    /// `events`, possibly before this call returns.
    ///
    /// # Errors
    ///
    /// Returns error if negotiation fails
    async fn negotiate(
        &self,
        request: NegotiationRequest,
        events: TransportEvents,
    ) -> Result<Box<dyn TransportHandle>>;
}
