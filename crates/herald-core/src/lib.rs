//! # herald-core
//!
//! Shared vocabulary for the Herald notification relay.
//!
//! - **Messages**: [`Message`] with its closed [`MessageType`] set and [`Source`] tag
//! - **IDs**: [`ConnectionId`] generated once per accepted connection
//! - **Logging**: `tracing` subscriber setup and log-capture helpers for tests
//! - **Constants**: the shared notification channel name and message texts

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod logging;
pub mod messages;

pub use ids::ConnectionId;
pub use messages::{Message, MessageType, Source};
