//! Reconnection supervision
//!
//! After a transport is lost the session waits a fixed back-off and then runs
//! a fresh attempt. Attempts are counted from the last time the session was
//! live; once the budget is spent the session gives up.

use std::time::Duration;

use tokio::task::AbortHandle;

use crate::config::SessionConfig;
use crate::session::{EventSender, SessionEvent};
use crate::{Error, Result};

/// Reconnection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed wait before each attempt
    pub delay: Duration,
    /// Attempts allowed per outage
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(3000),
            max_attempts: 5,
        }
    }
}

impl From<&SessionConfig> for ReconnectPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            delay: config.reconnect_delay,
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

/// Schedules reconnection attempts
#[derive(Debug)]
pub struct Supervisor {
    policy: ReconnectPolicy,
    attempt: u32,
    pending: Option<(u32, AbortHandle)>,
}

impl Supervisor {
    /// Create a supervisor
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            pending: None,
        }
    }

    /// Current attempt number (0 while live)
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Policy in effect
    #[must_use]
    pub const fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Schedule the next attempt after the back-off
    ///
    /// [`SessionEvent::ReconnectDue`] fires when the delay elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetriesExhausted`] once the attempt budget is spent
    pub fn schedule(&mut self, events: &EventSender) -> Result<u32> {
        self.cancel();

        if self.attempt >= self.policy.max_attempts {
            return Err(Error::RetriesExhausted(self.attempt));
        }

        self.attempt += 1;
        let attempt = self.attempt;
        let delay = self.policy.delay;
        let tx = events.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tx.send(SessionEvent::ReconnectDue { attempt });
        });

        tracing::info!(
            attempt,
            max = self.policy.max_attempts,
            delay_ms = delay.as_millis(),
            "reconnect scheduled"
        );

        self.pending = Some((attempt, timer.abort_handle()));
        Ok(attempt)
    }

    /// Consume a due notification
    ///
    /// Returns false for an attempt that was cancelled or superseded.
    pub fn take_due(&mut self, attempt: u32) -> bool {
        match self.pending {
            Some((pending, _)) if pending == attempt => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Abandon any scheduled attempt
    pub fn cancel(&mut self) {
        if let Some((attempt, timer)) = self.pending.take() {
            timer.abort();
            tracing::debug!(attempt, "scheduled reconnect abandoned");
        }
    }

    /// The session is live again; restore the full attempt budget
    pub fn reset(&mut self) {
        self.cancel();
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(3000),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_fixed_delay() {
        let (tx, mut rx) = EventSender::channel();
        let mut supervisor = Supervisor::new(policy(3));

        assert_eq!(supervisor.schedule(&tx).unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let Some(SessionEvent::ReconnectDue { attempt }) = rx.recv().await else {
            panic!("expected reconnect");
        };
        assert_eq!(attempt, 1);
        assert!(supervisor.take_due(attempt));
        assert!(!supervisor.take_due(attempt));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_enforced() {
        let (tx, _rx) = EventSender::channel();
        let mut supervisor = Supervisor::new(policy(2));

        supervisor.schedule(&tx).unwrap();
        supervisor.schedule(&tx).unwrap();
        let err = supervisor.schedule(&tx).unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_attempt_never_fires() {
        let (tx, mut rx) = EventSender::channel();
        let mut supervisor = Supervisor::new(policy(3));

        supervisor.schedule(&tx).unwrap();
        supervisor.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert!(!supervisor.take_due(1));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_budget() {
        let (tx, _rx) = EventSender::channel();
        let mut supervisor = Supervisor::new(policy(1));

        supervisor.schedule(&tx).unwrap();
        supervisor.reset();

        assert_eq!(supervisor.attempt(), 0);
        assert_eq!(supervisor.schedule(&tx).unwrap(), 1);
    }
}
