//! Conversational session
//!
//! A session moves through [`SessionState`] under the control of a single
//! [`Orchestrator`] task. Callers drive it through a [`SessionHandle`] and
//! observe it through [`SessionSnapshot`]s and [`Notice`]s.

mod dispatch;
mod events;
mod orchestrator;
mod state;

pub use dispatch::{Dispatcher, PendingQuery};
pub use events::{EventSender, Notice, SessionCommand, SessionEvent, SessionSnapshot};
pub use orchestrator::{Orchestrator, Providers, SessionHandle};
pub use state::{SessionState, StateMachine, Transition, Trigger};
