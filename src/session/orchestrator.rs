//! Session orchestrator
//!
//! One task owns all session state and consumes the inbound event channel.
//! Capability providers never touch that state: their work runs in spawned
//! tasks that post completion events back, tagged with the id of the
//! operation. After `Closed` the loop exits, so late completions land on a
//! closed channel and have no effect.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::AbortHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    Dispatcher, EventSender, Notice, PendingQuery, SessionCommand, SessionEvent, SessionSnapshot,
    SessionState, StateMachine, Transition, Trigger,
};
use crate::avatar::{AvatarOutput, SynthesisOutcome, Synthesizer};
use crate::backend::Reasoner;
use crate::config::Config;
use crate::speech::{RecognitionEvent, RecognitionSink, Recognizer, SpeechInput};
use crate::supervisor::{ReconnectPolicy, Supervisor};
use crate::transport::{
    AvatarAppearance, ConnectionDescriptor, DescriptorSource, MediaTransport, Negotiator,
    NegotiationRequest, TransportEvent, TransportHandle, TransportId,
};
use crate::{Error, Result};

const NOTICE_CAPACITY: usize = 256;

/// External capabilities a session runs on
#[derive(Clone)]
pub struct Providers {
    pub descriptors: Arc<dyn DescriptorSource>,
    pub transport: Arc<dyn MediaTransport>,
    pub recognizer: Arc<dyn Recognizer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub reasoner: Arc<dyn Reasoner>,
}

/// Owner of one session's state
pub struct Orchestrator {
    id: Uuid,
    config: Config,
    providers: Providers,
    machine: StateMachine,
    negotiator: Negotiator,
    input: SpeechInput,
    avatar: AvatarOutput,
    dispatcher: Dispatcher,
    supervisor: Supervisor,
    events: EventSender,
    inbox: mpsc::UnboundedReceiver<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
    status: String,
    microphone_on: bool,
    camera_on: bool,
    last_error: Option<String>,
    descriptor_attempt: u64,
    pending_descriptor: Option<(u64, AbortHandle)>,
}

impl Orchestrator {
    /// Create a session in `Idle` and the handle that drives it
    #[must_use]
    pub fn new(config: Config, providers: Providers) -> (Self, SessionHandle) {
        let id = Uuid::new_v4();
        let (events, inbox) = EventSender::channel();
        let initial = SessionSnapshot::idle(id);
        let status = initial.status.clone();
        let (snapshot, snapshot_rx) = watch::channel(initial);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let negotiator = Negotiator::new(
            Arc::clone(&providers.transport),
            Arc::clone(&providers.synthesizer),
        );
        let avatar = AvatarOutput::new(
            Arc::clone(&providers.synthesizer),
            config.avatar.voice.clone(),
            config.avatar.locale.clone(),
        );
        let supervisor = Supervisor::new(ReconnectPolicy::from(&config.session));

        let handle = SessionHandle {
            id,
            events: events.clone(),
            snapshot: snapshot_rx,
            notices: notices.clone(),
        };

        let orchestrator = Self {
            id,
            config,
            providers,
            machine: StateMachine::new(),
            negotiator,
            input: SpeechInput::default(),
            avatar,
            dispatcher: Dispatcher::default(),
            supervisor,
            events,
            inbox,
            snapshot,
            notices,
            status,
            microphone_on: false,
            camera_on: false,
            last_error: None,
            descriptor_attempt: 0,
            pending_descriptor: None,
        };

        (orchestrator, handle)
    }

    /// Create a session and run it on the current runtime
    #[must_use]
    pub fn spawn(config: Config, providers: Providers) -> SessionHandle {
        let (orchestrator, handle) = Self::new(config, providers);
        tokio::spawn(orchestrator.run());
        handle
    }

    /// Run the session until it closes or every handle is dropped
    pub async fn run(mut self) -> SessionSnapshot {
        let span = tracing::info_span!("session", session_id = %self.id);

        async move {
            tracing::debug!("session loop started");

            loop {
                tokio::select! {
                    event = self.inbox.recv() => {
                        let Some(event) = event else { break };
                        self.handle(event);
                        self.publish();
                        if self.machine.state().is_closed() {
                            break;
                        }
                    }
                    () = self.snapshot.closed() => {
                        tracing::info!("all session handles dropped");
                        self.close(Trigger::EndRequested);
                        break;
                    }
                }
            }

            self.release();
            self.publish();
            tracing::info!(state = %self.machine.state(), "session loop exited");
            self.snapshot.borrow().clone()
        }
        .instrument(span)
        .await
    }

    fn handle(&mut self, event: SessionEvent) {
        if self.machine.state().is_closed() {
            return;
        }

        match event {
            SessionEvent::Command(command) => self.on_command(command),
            SessionEvent::DescriptorFetched { attempt, result } => {
                self.on_descriptor(attempt, result);
            }
            SessionEvent::Negotiated { transport, result } => {
                self.on_negotiated(transport, result);
            }
            SessionEvent::Transport { transport, event } => {
                self.on_transport_event(transport, event);
            }
            SessionEvent::ReadinessDeadline { transport } => self.on_deadline(transport),
            SessionEvent::Recognition { epoch, event } => self.on_recognition(epoch, event),
            SessionEvent::RecognizerFailed { epoch, error } => {
                self.on_recognizer_failed(epoch, &error);
            }
            SessionEvent::BackendReplied { dispatch, result } => self.on_reply(dispatch, result),
            SessionEvent::SpeechEnded { utterance, result } => {
                self.on_speech_ended(utterance, &result);
            }
            SessionEvent::ReconnectDue { attempt } => self.on_reconnect_due(attempt),
        }
    }

    fn on_command(&mut self, command: SessionCommand) {
        tracing::debug!(?command, state = %self.machine.state(), "command received");

        match command {
            SessionCommand::Start => {
                if self.transition(Trigger::StartRequested).is_none() {
                    tracing::debug!("session already started");
                    return;
                }
                self.last_error = None;
                self.set_status("Initializing...");
                self.fetch_descriptor();
            }
            SessionCommand::End => {
                self.close(Trigger::EndRequested);
            }
            SessionCommand::ToggleMicrophone => {
                if self.machine.state() != SessionState::Active {
                    tracing::debug!("microphone toggle ignored while not active");
                    return;
                }
                if self.microphone_on {
                    self.stop_listening();
                } else {
                    self.start_listening();
                }
            }
            SessionCommand::ToggleLocalCamera => {
                self.camera_on = !self.camera_on;
                self.notify(Notice::CameraChanged { on: self.camera_on });
            }
        }
    }

    fn fetch_descriptor(&mut self) {
        self.set_status("Fetching connection token...");

        self.descriptor_attempt += 1;
        let attempt = self.descriptor_attempt;
        let source = Arc::clone(&self.providers.descriptors);
        let tx = self.events.clone();

        let task = tokio::spawn(async move {
            let result = source.fetch().await;
            tx.send(SessionEvent::DescriptorFetched { attempt, result });
        });

        if let Some((_, stale)) = self.pending_descriptor.replace((attempt, task.abort_handle())) {
            stale.abort();
        }
    }

    fn on_descriptor(&mut self, attempt: u64, result: Result<ConnectionDescriptor>) {
        match self.pending_descriptor {
            Some((pending, _)) if pending == attempt => self.pending_descriptor = None,
            _ => {
                tracing::debug!(attempt, "ignoring stale descriptor");
                return;
            }
        }

        match result {
            Ok(descriptor) => {
                if self.machine.state() == SessionState::Initializing {
                    self.transition(Trigger::DescriptorReady);
                }
                self.begin_negotiation(descriptor);
            }
            Err(e) => self.attempt_failed(e),
        }
    }

    fn begin_negotiation(&mut self, descriptor: ConnectionDescriptor) {
        self.set_status("Setting up video connection...");

        let appearance = AvatarAppearance {
            character: self.config.avatar.character.clone(),
            style: self.config.avatar.style.clone(),
        };
        let request = NegotiationRequest::bidirectional(descriptor, appearance);
        self.negotiator.negotiate(
            request,
            &self.events,
            self.config.session.negotiation_timeout,
        );
    }

    fn on_negotiated(&mut self, transport: TransportId, result: Result<Box<dyn TransportHandle>>) {
        match result {
            Ok(handle) => {
                if self.negotiator.accept(transport, handle) {
                    self.check_ready();
                }
            }
            Err(e) => {
                if self.negotiator.is_current(transport) {
                    self.attempt_failed(e);
                }
            }
        }
    }

    fn on_transport_event(&mut self, transport: TransportId, event: TransportEvent) {
        if self.negotiator.apply(transport, &event).is_none() {
            tracing::debug!(%transport, ?event, "ignoring event from stale transport");
            return;
        }

        match event {
            TransportEvent::Track { kind, .. } => {
                self.notify(Notice::TrackBound { kind });
            }
            TransportEvent::TrackPlaying { kind } => {
                self.notify(Notice::TrackPlaying { kind });
                self.check_ready();
            }
            TransportEvent::Health(health) => {
                tracing::debug!(%transport, %health, "transport health");
                self.set_status(&format!("Connection: {health}"));
                if health.is_failure() {
                    self.on_transport_failure(transport, &health.to_string());
                }
            }
        }
    }

    fn on_transport_failure(&mut self, transport: TransportId, reason: &str) {
        match self.machine.state() {
            SessionState::Active => {
                tracing::warn!(%transport, reason, "transport lost");
                self.negotiator.teardown();
                if let Some(utterance) = self.avatar.cancel() {
                    self.notify(Notice::SpeechCancelled { utterance });
                }
                self.transition(Trigger::TransportLost);
                self.schedule_reconnect();
            }
            SessionState::Connecting => {
                self.attempt_failed(Error::Negotiation(format!("transport {reason}")));
            }
            _ => {}
        }
    }

    fn on_deadline(&mut self, transport: TransportId) {
        if !self.negotiator.is_current(transport)
            || self.machine.state() != SessionState::Connecting
        {
            return;
        }

        let timeout = self.config.session.negotiation_timeout;
        tracing::warn!(%transport, timeout_ms = timeout.as_millis(), "transport not ready in time");
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.attempt_failed(Error::NegotiationTimeout(millis));
    }

    fn check_ready(&mut self) {
        if self.machine.state() != SessionState::Connecting
            || !self.negotiator.is_ready(self.config.session.require_video)
        {
            return;
        }

        self.negotiator.disarm_deadline();
        let Some(transition) = self.transition(Trigger::MediaReady) else {
            return;
        };

        self.supervisor.reset();
        self.set_status("Connected");

        if transition.first_activation {
            let greeting = self.config.avatar.greeting.clone();
            self.speak(&greeting);
            if self.config.session.auto_start_microphone && !self.microphone_on {
                self.start_listening();
            }
        }

        if let Some(reply) = self.avatar.take_deferred() {
            self.speak(&reply);
        }

        self.drain();
    }

    /// A connection attempt failed before reaching `Active`
    fn attempt_failed(&mut self, error: Error) {
        self.negotiator.teardown();

        if self.machine.has_activated_once() {
            tracing::warn!(
                error = %error,
                attempt = self.supervisor.attempt(),
                "reconnection attempt failed"
            );
            self.transition(Trigger::AttemptFailed);
            self.schedule_reconnect();
        } else {
            tracing::error!(error = %error, "session initialization failed");
            if let Some((_, task)) = self.pending_descriptor.take() {
                task.abort();
            }
            self.transition(Trigger::InitFailed);
            self.surface_error(&error);
            self.set_status("Connection failed");
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.supervisor.schedule(&self.events) {
            Ok(attempt) => {
                self.set_status("Reconnecting...");
                self.notify(Notice::Reconnecting { attempt });
            }
            Err(e) => {
                tracing::error!(error = %e, "giving up on reconnection");
                self.surface_error(&e);
                self.close(Trigger::RetriesExhausted);
            }
        }
    }

    fn on_reconnect_due(&mut self, attempt: u32) {
        if !self.supervisor.take_due(attempt) {
            return;
        }
        if self.transition(Trigger::ReconnectStarted).is_none() {
            return;
        }

        tracing::info!(attempt, "reconnecting");
        self.fetch_descriptor();
    }

    fn on_recognition(&mut self, epoch: u64, event: RecognitionEvent) {
        let Some(update) = self.input.accept(epoch, event) else {
            tracing::debug!(epoch, "ignoring recognition from closed epoch");
            return;
        };

        if let Some(speaking) = update.user_speaking {
            self.notify(Notice::UserSpeaking { speaking });
        }

        let Some(text) = update.utterance else {
            return;
        };

        // Barge-in: stop talking before the new turn is queued
        if let Some(utterance) = self.avatar.cancel() {
            tracing::info!(utterance, "user interrupted avatar");
            self.notify(Notice::SpeechCancelled { utterance });
        }

        let pending = self.dispatcher.enqueue(PendingQuery::new(text.clone()));
        tracing::info!(query = %text, pending, state = %self.machine.state(), "query enqueued");
        self.notify(Notice::QueryEnqueued { text, pending });

        self.drain();
    }

    fn on_recognizer_failed(&mut self, epoch: u64, error: &Error) {
        if !self.input.is_current(epoch) {
            return;
        }

        tracing::warn!(error = %error, "speech recognition failed to start");
        self.input.stop_listening();
        self.microphone_on = false;
        self.notify(Notice::MicrophoneChanged { on: false });
    }

    /// Dispatch the next query if the session is live and nothing is in flight
    fn drain(&mut self) {
        if self.machine.state() != SessionState::Active {
            return;
        }

        let dispatched = self
            .dispatcher
            .dispatch_next(&self.providers.reasoner, &self.events)
            .map(|query| query.text.clone());

        if let Some(text) = dispatched {
            tracing::info!(query = %text, pending = self.dispatcher.pending(), "query dispatched");
            self.notify(Notice::QueryDispatched { text });
        }
    }

    fn on_reply(&mut self, dispatch: u64, result: Result<String>) {
        let Some(query) = self.dispatcher.complete(dispatch) else {
            return;
        };

        let (text, fallback) = match result {
            Ok(text) if !text.trim().is_empty() => (text, false),
            Ok(_) => {
                tracing::warn!(query = %query.text, "backend returned empty response");
                (self.config.avatar.apology.clone(), true)
            }
            Err(e) => {
                tracing::warn!(query = %query.text, error = %e, "backend query failed");
                (self.config.avatar.apology.clone(), true)
            }
        };

        self.notify(Notice::Reply {
            text: text.clone(),
            fallback,
        });

        if self.machine.state() == SessionState::Active {
            self.speak(&text);
        } else {
            tracing::debug!(state = %self.machine.state(), "deferring reply until active");
            self.avatar.defer(text);
        }

        self.drain();
    }

    fn speak(&mut self, text: &str) {
        let Some(transport) = self.negotiator.current_id() else {
            tracing::warn!("no transport to speak on");
            return;
        };

        let (utterance, cancelled) = self.avatar.speak(text, transport, &self.events);
        if let Some(cancelled) = cancelled {
            self.notify(Notice::SpeechCancelled {
                utterance: cancelled,
            });
        }
        self.notify(Notice::SpeechStarted {
            utterance,
            text: text.to_string(),
        });
    }

    fn on_speech_ended(&mut self, utterance: u64, result: &Result<SynthesisOutcome>) {
        if let Some(completed) = self.avatar.finish(utterance, result) {
            self.notify(Notice::SpeechFinished {
                utterance,
                completed,
            });
        }
    }

    fn start_listening(&mut self) {
        let epoch = self.input.begin_listening();
        self.microphone_on = true;

        let recognizer = Arc::clone(&self.providers.recognizer);
        let config = self.config.recognition.clone();
        let sink = RecognitionSink::new(epoch, self.events.clone());
        let tx = self.events.clone();

        tokio::spawn(async move {
            if let Err(error) = recognizer.start(&config, sink).await {
                tx.send(SessionEvent::RecognizerFailed { epoch, error });
            }
        });

        tracing::info!(epoch, languages = ?self.config.recognition.languages, "microphone on");
        self.notify(Notice::MicrophoneChanged { on: true });
    }

    fn stop_listening(&mut self) {
        if self.input.stop_listening() {
            self.notify(Notice::UserSpeaking { speaking: false });
        }
        self.microphone_on = false;

        let recognizer = Arc::clone(&self.providers.recognizer);
        tokio::spawn(async move {
            if let Err(e) = recognizer.stop().await {
                tracing::warn!(error = %e, "failed to stop speech recognition");
            }
        });

        tracing::info!("microphone off");
        self.notify(Notice::MicrophoneChanged { on: false });
    }

    fn close(&mut self, trigger: Trigger) {
        let Some(transition) = self.transition(trigger) else {
            return;
        };

        self.release();
        self.set_status("Session closed");
        tracing::info!(
            from = %transition.from,
            user = self.machine.user_closed(),
            "session closed"
        );
    }

    /// Release every per-session resource
    fn release(&mut self) {
        if let Some((_, task)) = self.pending_descriptor.take() {
            task.abort();
        }
        self.supervisor.cancel();
        self.dispatcher.release();
        self.avatar.release();
        self.negotiator.teardown();
        if self.input.is_listening() {
            self.stop_listening();
        }
    }

    fn transition(&mut self, trigger: Trigger) -> Option<Transition> {
        let transition = self.machine.apply(trigger)?;
        tracing::info!(from = %transition.from, to = %transition.to, "state transition");
        self.notify(Notice::StateChanged {
            from: transition.from,
            to: transition.to,
        });
        Some(transition)
    }

    fn surface_error(&mut self, error: &Error) {
        let message = error.to_string();
        self.last_error = Some(message.clone());
        self.notify(Notice::FatalError { message });
    }

    fn set_status(&mut self, text: &str) {
        if self.status != text {
            self.status = text.to_string();
            self.notify(Notice::Status {
                text: self.status.clone(),
            });
        }
    }

    fn notify(&self, notice: Notice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }

    fn publish(&self) {
        let next = SessionSnapshot {
            session_id: self.id,
            state: self.machine.state(),
            status: self.status.clone(),
            avatar_speaking: self.avatar.is_speaking(),
            user_speaking: self.input.user_speaking(),
            microphone_on: self.microphone_on,
            camera_on: self.camera_on,
            pending_queries: self.dispatcher.pending(),
            dispatching: self.dispatcher.is_dispatching(),
            reconnect_attempt: self.supervisor.attempt(),
            has_activated_once: self.machine.has_activated_once(),
            last_error: self.last_error.clone(),
        };

        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("id", &self.id)
            .field("state", &self.machine.state())
            .field("negotiator", &self.negotiator)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Command surface for a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    events: EventSender,
    snapshot: watch::Receiver<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl SessionHandle {
    /// Session id
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Begin connecting
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session loop has exited
    pub fn start_session(&self) -> Result<()> {
        self.command(SessionCommand::Start)
    }

    /// End the session and release everything it holds
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session loop has exited
    pub fn end_session(&self) -> Result<()> {
        self.command(SessionCommand::End)
    }

    /// Start or stop speech recognition (only while active)
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session loop has exited
    pub fn toggle_microphone(&self) -> Result<()> {
        self.command(SessionCommand::ToggleMicrophone)
    }

    /// Flip the local camera preview flag
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session loop has exited
    pub fn toggle_local_camera(&self) -> Result<()> {
        self.command(SessionCommand::ToggleLocalCamera)
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to notices emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Watch snapshots as they change
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the session reaches a state
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the loop exits first
    pub async fn wait_for_state(&self, state: SessionState) -> Result<SessionSnapshot> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(|s| s.state == state)
            .await
            .map(|s| s.clone())
            .map_err(|_| Error::SessionClosed)
    }

    /// Wait for the session loop to exit
    pub async fn closed(&self) {
        self.events.closed().await;
    }

    /// Whether the session loop has exited
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    fn command(&self, command: SessionCommand) -> Result<()> {
        if self.events.send(SessionEvent::Command(command)) {
            Ok(())
        } else {
            Err(Error::SessionClosed)
        }
    }
}
