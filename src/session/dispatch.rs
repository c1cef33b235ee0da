//! Query queue and serialized backend dispatch

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;

use super::{EventSender, SessionEvent};
use crate::backend::Reasoner;

/// A finalized user utterance awaiting a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuery {
    pub text: String,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingQuery {
    /// Create a query stamped with the current time
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
struct InFlight {
    id: u64,
    query: PendingQuery,
    task: AbortHandle,
}

/// FIFO of pending queries with at most one backend request in flight
#[derive(Debug, Default)]
pub struct Dispatcher {
    queue: VecDeque<PendingQuery>,
    in_flight: Option<InFlight>,
    next_id: u64,
}

impl Dispatcher {
    /// Append a query, returning the new queue length
    pub fn enqueue(&mut self, query: PendingQuery) -> usize {
        self.queue.push_back(query);
        self.queue.len()
    }

    /// Number of queries not yet dispatched
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether a backend request is outstanding
    #[must_use]
    pub const fn is_dispatching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Send the oldest query to the backend
    ///
    /// Does nothing while a request is outstanding or the queue is empty. The
    /// answer arrives as [`SessionEvent::BackendReplied`].
    pub fn dispatch_next(
        &mut self,
        reasoner: &Arc<dyn Reasoner>,
        events: &EventSender,
    ) -> Option<&PendingQuery> {
        if self.in_flight.is_some() {
            return None;
        }
        let query = self.queue.pop_front()?;

        self.next_id += 1;
        let id = self.next_id;

        let reasoner = Arc::clone(reasoner);
        let tx = events.clone();
        let question = query.text.clone();
        let task = tokio::spawn(async move {
            let result = reasoner.ask(&question).await;
            tx.send(SessionEvent::BackendReplied {
                dispatch: id,
                result,
            });
        });

        tracing::debug!(dispatch = id, pending = self.queue.len(), "query dispatched");

        let in_flight = self.in_flight.insert(InFlight {
            id,
            query,
            task: task.abort_handle(),
        });
        Some(&in_flight.query)
    }

    /// Settle the outstanding request
    ///
    /// Returns the query that was answered, or `None` for a stale id.
    pub fn complete(&mut self, id: u64) -> Option<PendingQuery> {
        if self.in_flight.as_ref().is_some_and(|f| f.id == id) {
            self.in_flight.take().map(|f| f.query)
        } else {
            tracing::debug!(dispatch = id, "ignoring stale backend reply");
            None
        }
    }

    /// Abandon the in-flight request and drop every pending query
    pub fn release(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
        }
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Reasoner for Echo {
        async fn ask(&self, question: &str) -> Result<String> {
            Ok(format!("echo: {question}"))
        }
    }

    #[tokio::test]
    async fn dispatches_in_order_one_at_a_time() {
        let (tx, mut rx) = EventSender::channel();
        let reasoner: Arc<dyn Reasoner> = Arc::new(Echo);
        let mut dispatcher = Dispatcher::default();

        dispatcher.enqueue(PendingQuery::new("first"));
        assert_eq!(dispatcher.enqueue(PendingQuery::new("second")), 2);

        let sent = dispatcher.dispatch_next(&reasoner, &tx).unwrap();
        assert_eq!(sent.text, "first");
        assert!(dispatcher.is_dispatching());
        assert!(dispatcher.dispatch_next(&reasoner, &tx).is_none());
        assert_eq!(dispatcher.pending(), 1);

        let Some(SessionEvent::BackendReplied { dispatch, result }) = rx.recv().await else {
            panic!("expected backend reply");
        };
        assert_eq!(result.unwrap(), "echo: first");

        assert_eq!(dispatcher.complete(dispatch).unwrap().text, "first");
        assert!(!dispatcher.is_dispatching());
        assert_eq!(
            dispatcher.dispatch_next(&reasoner, &tx).unwrap().text,
            "second"
        );
    }

    #[tokio::test]
    async fn stale_completion_is_ignored() {
        let (tx, _rx) = EventSender::channel();
        let reasoner: Arc<dyn Reasoner> = Arc::new(Echo);
        let mut dispatcher = Dispatcher::default();

        dispatcher.enqueue(PendingQuery::new("q"));
        dispatcher.dispatch_next(&reasoner, &tx);

        assert!(dispatcher.complete(99).is_none());
        assert!(dispatcher.is_dispatching());
    }

    #[tokio::test]
    async fn release_clears_everything() {
        let (tx, _rx) = EventSender::channel();
        let reasoner: Arc<dyn Reasoner> = Arc::new(Echo);
        let mut dispatcher = Dispatcher::default();

        dispatcher.enqueue(PendingQuery::new("a"));
        dispatcher.enqueue(PendingQuery::new("b"));
        dispatcher.dispatch_next(&reasoner, &tx);
        dispatcher.release();

        assert!(!dispatcher.is_dispatching());
        assert_eq!(dispatcher.pending(), 0);
    }
}
