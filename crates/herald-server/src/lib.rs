//! # herald-server
//!
//! One Herald worker: the connection registry, per-connection relay
//! sessions, the shutdown drain, the periodic notifier, and the Axum
//! HTTP + `WebSocket` transport in front of them.
//!
//! - [`registry`]: live connections, shutdown state, broadcast over the bus
//! - [`websocket`]: client handles, the relay state machine, socket glue
//! - [`shutdown`]: deadline-bounded drain with force-close
//! - [`notifier`]: periodic system notification
//! - [`worker`]: start/stop lifecycle owning the background tasks
//! - [`server`]: router, `/notify`, `/health`, `/metrics`, test page

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod http;
pub mod metrics;
pub mod notifier;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;
pub mod worker;

pub use config::ServerConfig;
pub use registry::{BroadcastError, BusRegistry, ConnectionRegistry};
pub use server::HeraldServer;
pub use worker::Worker;
