//! `WebSocket` connection handles, the relay state machine, and socket glue.

pub mod connection;
pub mod payload;
pub mod relay;
pub mod session;

pub use connection::{ClientConnection, ConnectionError, Outbound};
pub use relay::{ClientReader, MessageRelay, ReadOutcome, RelayOutcome, RelayState, RelayTimings};
pub use session::{SessionConfig, run_ws_session};
