//! Transport negotiation and supervision
//!
//! Owns at most one transport instance at a time, together with its track
//! bindings. Tearing down drops the bindings and closes the handle before
//! returning, so no binding outlives its transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;

use super::{
    Bindings, HealthState, MediaKind, MediaTransport, NegotiationRequest, TrackBinding,
    TransportEvent, TransportEvents, TransportHandle, TransportId,
};
use crate::avatar::Synthesizer;
use crate::session::{EventSender, SessionEvent};

/// One transport instance and everything tied to its lifetime
#[derive(Debug)]
struct Slot {
    id: TransportId,
    handle: Option<Box<dyn TransportHandle>>,
    bindings: Bindings,
    health: HealthState,
    negotiation: Option<AbortHandle>,
    deadline: Option<AbortHandle>,
}

/// Establishes and supervises the media transport
pub struct Negotiator {
    transport: Arc<dyn MediaTransport>,
    synthesizer: Arc<dyn Synthesizer>,
    next_id: u64,
    current: Option<Slot>,
}

impl Negotiator {
    /// Create a negotiator over a transport capability
    ///
    /// The synthesizer is attached to every new transport as part of negotiation.
    #[must_use]
    pub fn new(transport: Arc<dyn MediaTransport>, synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            transport,
            synthesizer,
            next_id: 0,
            current: None,
        }
    }

    /// Start negotiating a new transport
    ///
    /// Any existing transport is torn down first. The outcome arrives as
    /// [`SessionEvent::Negotiated`]; if the tracks are not ready within
    /// `deadline`, [`SessionEvent::ReadinessDeadline`] fires.
    pub fn negotiate(
        &mut self,
        request: NegotiationRequest,
        events: &EventSender,
        deadline: Duration,
    ) -> TransportId {
        self.teardown();

        self.next_id += 1;
        let id = TransportId(self.next_id);

        let transport = Arc::clone(&self.transport);
        let synthesizer = Arc::clone(&self.synthesizer);
        let sink = TransportEvents::new(id, events.clone());
        let tx = events.clone();
        let appearance = request.appearance.clone();

        tracing::info!(
            transport = %id,
            relays = request.descriptor.relay_urls.len(),
            "negotiating transport"
        );

        let negotiation = tokio::spawn(async move {
            let result = match transport.negotiate(request, sink).await {
                Ok(mut handle) => match synthesizer.attach(id, &appearance).await {
                    Ok(()) => Ok(handle),
                    Err(e) => {
                        handle.close();
                        Err(e)
                    }
                },
                Err(e) => Err(e),
            };
            tx.send(SessionEvent::Negotiated {
                transport: id,
                result,
            });
        });

        let tx = events.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            tx.send(SessionEvent::ReadinessDeadline { transport: id });
        });

        self.current = Some(Slot {
            id,
            handle: None,
            bindings: Bindings::default(),
            health: HealthState::New,
            negotiation: Some(negotiation.abort_handle()),
            deadline: Some(timer.abort_handle()),
        });

        id
    }

    /// Install the handle produced by negotiation
    ///
    /// A handle for anything but the current instance is closed immediately
    /// and `false` is returned.
    pub fn accept(&mut self, id: TransportId, mut handle: Box<dyn TransportHandle>) -> bool {
        match self.current.as_mut() {
            Some(slot) if slot.id == id => {
                slot.negotiation = None;
                slot.handle = Some(handle);
                tracing::debug!(transport = %id, "transport negotiated");
                true
            }
            _ => {
                tracing::debug!(transport = %id, "closing stale transport");
                handle.close();
                false
            }
        }
    }

    /// Apply an event from a transport
    ///
    /// Returns `None` if the event belongs to a torn-down instance.
    pub fn apply(&mut self, id: TransportId, event: &TransportEvent) -> Option<()> {
        let slot = self.current.as_mut().filter(|s| s.id == id)?;

        match event {
            TransportEvent::Track { kind, stream } => {
                let replaced = slot.bindings.bind(TrackBinding {
                    kind: *kind,
                    stream: stream.clone(),
                    transport: id,
                    playing: false,
                });
                tracing::debug!(
                    transport = %id,
                    %kind,
                    %stream,
                    replaced = replaced.is_some(),
                    "track bound"
                );
            }
            TransportEvent::TrackPlaying { kind } => {
                if !slot.bindings.mark_playing(*kind) {
                    tracing::warn!(transport = %id, %kind, "playing reported for unbound track");
                }
            }
            TransportEvent::Health(state) => {
                slot.health = *state;
            }
        }

        Some(())
    }

    /// Whether an id refers to the live instance
    #[must_use]
    pub fn is_current(&self, id: TransportId) -> bool {
        self.current.as_ref().is_some_and(|s| s.id == id)
    }

    /// Live instance id
    #[must_use]
    pub fn current_id(&self) -> Option<TransportId> {
        self.current.as_ref().map(|s| s.id)
    }

    /// Whether the live instance is negotiated and its required tracks are playing
    #[must_use]
    pub fn is_ready(&self, require_video: bool) -> bool {
        self.current
            .as_ref()
            .is_some_and(|s| s.handle.is_some() && s.bindings.is_ready(require_video))
    }

    /// Last reported health of the live instance
    #[must_use]
    pub fn health(&self) -> Option<HealthState> {
        self.current.as_ref().map(|s| s.health)
    }

    /// Binding for a kind on the live instance
    #[must_use]
    pub fn binding(&self, kind: MediaKind) -> Option<&TrackBinding> {
        self.current.as_ref().and_then(|s| s.bindings.get(kind))
    }

    /// Stop the readiness timer once the session is live
    pub fn disarm_deadline(&mut self) {
        if let Some(timer) = self.current.as_mut().and_then(|s| s.deadline.take()) {
            timer.abort();
        }
    }

    /// Tear down the live instance, if any
    pub fn teardown(&mut self) {
        let Some(mut slot) = self.current.take() else {
            return;
        };

        if let Some(task) = slot.negotiation.take() {
            task.abort();
        }
        if let Some(timer) = slot.deadline.take() {
            timer.abort();
        }

        slot.bindings.clear();
        if let Some(mut handle) = slot.handle.take() {
            handle.close();
        }
        self.synthesizer.detach(slot.id);

        tracing::info!(transport = %slot.id, "transport torn down");
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("next_id", &self.next_id)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
