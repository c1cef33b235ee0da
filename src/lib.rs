//! Avatar Gateway - conversational session orchestrator for a talking avatar
//!
//! This library drives one real-time conversation between a user and a
//! streamed avatar:
//! - Session lifecycle with automatic reconnection
//! - Media transport negotiation and track readiness
//! - Speech input with barge-in
//! - Serialized question answering against a reasoning backend
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Surfaces                         │
//! │        SessionHandle  │  HTTP / WebSocket  │  CLI    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ commands / notices
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Orchestrator                        │
//! │  State machine │ Dispatcher │ Avatar │ Supervisor    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ typed events
//! ┌────────────────────▼────────────────────────────────┐
//! │               Capability providers                   │
//! │ Descriptor │ Transport │ Recognizer │ Synth │ Ask    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod avatar;
pub mod backend;
pub mod config;
pub mod console;
pub mod error;
pub mod session;
pub mod speech;
pub mod supervisor;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    Notice, Orchestrator, Providers, SessionHandle, SessionSnapshot, SessionState,
};
