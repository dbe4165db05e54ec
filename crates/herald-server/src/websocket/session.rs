//! `WebSocket` session lifecycle: one upgraded socket from accept through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use herald_core::constants::{CLOSE_GOING_AWAY, CLOSE_NORMAL, SHUTTING_DOWN_REASON};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, instrument, warn};

use super::connection::{ClientConnection, Outbound};
use super::relay::{MessageRelay, RelayOutcome, RelayTimings};
use crate::config::ServerConfig;
use crate::metrics::WS_REJECTED_TOTAL;
use crate::registry::ConnectionRegistry;

/// How long the writer may take to flush the final frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-session knobs.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Outbound queue depth.
    pub outbound_buffer: usize,
    /// Relay timings.
    pub timings: RelayTimings,
}

impl SessionConfig {
    /// Derive from the server configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            outbound_buffer: config.outbound_buffer,
            timings: RelayTimings {
                read_timeout: config.read_timeout,
                shutdown_notice_grace: config.shutdown_notice_grace,
            },
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// Run a `WebSocket` session for an upgraded socket.
///
/// 1. Rejects with close code 1001 if shutdown has started
/// 2. Registers the connection and spawns the socket writer
/// 3. Runs the relay on its own task so a panic stays contained
/// 4. Disconnects from the registry on every path, then sends the final close
#[instrument(skip_all, fields(connection_id))]
pub async fn run_ws_session(
    socket: WebSocket,
    registry: Arc<dyn ConnectionRegistry>,
    config: SessionConfig,
) {
    let (mut ws_tx, ws_rx) = socket.split();

    if registry.is_shutdown_initiated() {
        counter!(WS_REJECTED_TOTAL).increment(1);
        info!("rejecting connection, shutdown in progress");
        let _ = ws_tx
            .send(close_frame(CLOSE_GOING_AWAY, SHUTTING_DOWN_REASON))
            .await;
        return;
    }

    let (connection, outbound) = ClientConnection::channel(config.outbound_buffer);
    let connection = Arc::new(connection);
    let id = registry.connect(Arc::clone(&connection));
    let _ = tracing::Span::current().record("connection_id", id.as_str());

    let mut writer = tokio::spawn(write_outbound(ws_tx, outbound).in_current_span());

    let relay = MessageRelay::new(
        id.clone(),
        Arc::clone(&connection),
        Arc::clone(&registry),
        ws_rx,
        config.timings,
    );
    let outcome = match tokio::spawn(relay.run().in_current_span()).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(error = %e, "relay task failed");
            None
        }
    };

    let _ = registry.disconnect(&id);

    let (code, reason) = match outcome {
        Some(RelayOutcome::ShutdownNotified | RelayOutcome::ForceClosed) => {
            (CLOSE_GOING_AWAY, SHUTTING_DOWN_REASON)
        }
        _ => (CLOSE_NORMAL, ""),
    };
    if let Err(error) = connection.close(code, reason) {
        debug!(%error, "final close frame not queued");
    }
    drop(connection);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        warn!("socket writer did not finish, aborting");
        writer.abort();
    }
}

/// Forward queued frames to the socket until a close frame or the queue ends.
async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Text(text) => {
                if ws_tx.send(WsMessage::Text((*text).clone().into())).await.is_err() {
                    debug!("socket send failed, stopping writer");
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let _ = ws_tx.send(close_frame(code, &reason)).await;
                break;
            }
        }
    }
}

fn close_frame(code: u16, reason: &str) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code,
        reason: reason.to_owned().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_follows_server_config() {
        let server = ServerConfig {
            outbound_buffer: 7,
            read_timeout: Duration::from_millis(250),
            ..ServerConfig::default()
        };
        let cfg = SessionConfig::from_config(&server);
        assert_eq!(cfg.outbound_buffer, 7);
        assert_eq!(cfg.timings.read_timeout, Duration::from_millis(250));
        assert_eq!(cfg.timings.shutdown_notice_grace, Duration::from_millis(500));
    }

    #[test]
    fn close_frame_carries_code_and_reason() {
        match close_frame(CLOSE_GOING_AWAY, SHUTTING_DOWN_REASON) {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason.as_str(), "Server is shutting down");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
