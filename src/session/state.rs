//! Session lifecycle state machine
//!
//! The state machine is the single source of truth for session phase. It is a
//! pure function of (state, trigger); every other component reads it and asks
//! it to move rather than writing the phase directly.

use serde::Serialize;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session has been started (or a start failed)
    Idle,
    /// Fetching the connection descriptor
    Initializing,
    /// Negotiating the media transport
    Connecting,
    /// Both media tracks are playing, conversation is live
    Active,
    /// Transport was lost, waiting to retry
    Reconnecting,
    /// Terminal, all per-session resources are released
    Closed,
}

impl SessionState {
    /// Whether the session is terminal
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Compute the next state for a trigger
    ///
    /// Pairs with no defined transition leave the state unchanged, so the
    /// function is total over (state, trigger).
    #[must_use]
    pub const fn next(self, trigger: Trigger) -> Self {
        match (self, trigger) {
            (Self::Closed, _) => Self::Closed,
            (_, Trigger::EndRequested) => Self::Closed,
            (Self::Idle, Trigger::StartRequested) => Self::Initializing,
            (Self::Initializing, Trigger::DescriptorReady) => Self::Connecting,
            (Self::Initializing | Self::Connecting, Trigger::InitFailed) => Self::Idle,
            (Self::Connecting, Trigger::MediaReady) => Self::Active,
            (Self::Connecting, Trigger::AttemptFailed) | (Self::Active, Trigger::TransportLost) => {
                Self::Reconnecting
            }
            (Self::Reconnecting, Trigger::ReconnectStarted) => Self::Connecting,
            (Self::Connecting | Self::Reconnecting, Trigger::RetriesExhausted) => Self::Closed,
            (state, _) => state,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Events that drive lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// User issued start-session
    StartRequested,
    /// A connection descriptor was obtained on the initial attempt
    DescriptorReady,
    /// Required media tracks are playing
    MediaReady,
    /// Health signal reported disconnect/failure while active
    TransportLost,
    /// Back-off elapsed and a fresh attempt begins
    ReconnectStarted,
    /// A reconnection attempt failed before reaching active
    AttemptFailed,
    /// Initialization failed before the session was ever active
    InitFailed,
    /// Reconnection attempts are exhausted
    RetriesExhausted,
    /// User issued end-session
    EndRequested,
}

/// A state change that actually happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    /// This is the first time the session entered `Active`
    pub first_activation: bool,
}

/// Owner of the canonical session state
#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
    has_activated_once: bool,
    user_closed: bool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a machine in `Idle`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SessionState::Idle,
            has_activated_once: false,
            user_closed: false,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has ever reached `Active`
    #[must_use]
    pub const fn has_activated_once(&self) -> bool {
        self.has_activated_once
    }

    /// Whether the user explicitly ended the session
    #[must_use]
    pub const fn user_closed(&self) -> bool {
        self.user_closed
    }

    /// Apply a trigger, returning the transition if the state changed
    pub fn apply(&mut self, trigger: Trigger) -> Option<Transition> {
        // A user close takes precedence over anything recovery would do next
        let trigger = match trigger {
            Trigger::TransportLost | Trigger::ReconnectStarted if self.user_closed => {
                Trigger::EndRequested
            }
            other => other,
        };

        let from = self.state;
        let to = from.next(trigger);
        if from == to {
            return None;
        }

        if trigger == Trigger::EndRequested {
            self.user_closed = true;
        }

        let first_activation = to == SessionState::Active && !self.has_activated_once;
        if first_activation {
            self.has_activated_once = true;
        }

        self.state = to;
        tracing::debug!(%from, %to, ?trigger, "session state changed");

        Some(Transition {
            from,
            to,
            first_activation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [SessionState; 6] = [
        SessionState::Idle,
        SessionState::Initializing,
        SessionState::Connecting,
        SessionState::Active,
        SessionState::Reconnecting,
        SessionState::Closed,
    ];

    #[test]
    fn happy_path() {
        let mut machine = StateMachine::new();
        machine.apply(Trigger::StartRequested).unwrap();
        machine.apply(Trigger::DescriptorReady).unwrap();
        let t = machine.apply(Trigger::MediaReady).unwrap();

        assert_eq!(t.from, SessionState::Connecting);
        assert_eq!(t.to, SessionState::Active);
        assert!(t.first_activation);
        assert!(machine.has_activated_once());
    }

    #[test]
    fn activation_flag_set_once() {
        let mut machine = StateMachine::new();
        machine.apply(Trigger::StartRequested);
        machine.apply(Trigger::DescriptorReady);
        machine.apply(Trigger::MediaReady);
        machine.apply(Trigger::TransportLost);
        machine.apply(Trigger::ReconnectStarted);
        let t = machine.apply(Trigger::MediaReady).unwrap();

        assert_eq!(t.to, SessionState::Active);
        assert!(!t.first_activation);
    }

    #[test]
    fn end_from_every_live_state_closes() {
        for state in ALL_STATES {
            assert_eq!(state.next(Trigger::EndRequested), SessionState::Closed);
        }
    }

    #[test]
    fn closed_is_terminal() {
        for trigger in [
            Trigger::StartRequested,
            Trigger::DescriptorReady,
            Trigger::MediaReady,
            Trigger::TransportLost,
            Trigger::ReconnectStarted,
            Trigger::AttemptFailed,
            Trigger::InitFailed,
        ] {
            assert_eq!(SessionState::Closed.next(trigger), SessionState::Closed);
        }
    }

    #[test]
    fn undefined_pairs_are_no_ops() {
        assert_eq!(
            SessionState::Idle.next(Trigger::MediaReady),
            SessionState::Idle
        );
        assert_eq!(
            SessionState::Active.next(Trigger::StartRequested),
            SessionState::Active
        );
        assert_eq!(
            SessionState::Idle.next(Trigger::TransportLost),
            SessionState::Idle
        );
        assert_eq!(
            SessionState::Active.next(Trigger::AttemptFailed),
            SessionState::Active
        );

        let mut machine = StateMachine::new();
        assert!(machine.apply(Trigger::MediaReady).is_none());
    }

    #[test]
    fn init_failure_returns_to_idle() {
        assert_eq!(
            SessionState::Initializing.next(Trigger::InitFailed),
            SessionState::Idle
        );
        assert_eq!(
            SessionState::Connecting.next(Trigger::InitFailed),
            SessionState::Idle
        );
    }

    #[test]
    fn failed_attempt_goes_back_to_reconnecting() {
        assert_eq!(
            SessionState::Connecting.next(Trigger::AttemptFailed),
            SessionState::Reconnecting
        );
        assert_eq!(
            SessionState::Reconnecting.next(Trigger::RetriesExhausted),
            SessionState::Closed
        );
    }

    #[test]
    fn user_close_is_recorded() {
        let mut machine = StateMachine::new();
        machine.apply(Trigger::StartRequested);
        machine.apply(Trigger::EndRequested).unwrap();

        assert_eq!(machine.state(), SessionState::Closed);
        assert!(machine.user_closed());
        assert!(machine.apply(Trigger::StartRequested).is_none());
    }

    #[test]
    fn exhausted_close_is_not_user_close() {
        let mut machine = StateMachine::new();
        machine.apply(Trigger::StartRequested);
        machine.apply(Trigger::DescriptorReady);
        machine.apply(Trigger::MediaReady);
        machine.apply(Trigger::TransportLost);
        machine.apply(Trigger::RetriesExhausted).unwrap();

        assert_eq!(machine.state(), SessionState::Closed);
        assert!(!machine.user_closed());
    }

    #[test]
    fn display_names() {
        assert_eq!(SessionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_string(&SessionState::Active).unwrap(),
            "\"active\""
        );
    }
}
