//! Per-connection relay session.
//!
//! ```text
//! OPENING ──welcome, subscribe, spawn listener──▶ ACTIVE
//! ACTIVE ──shutdown | disconnect | read error | force-close──▶ DRAINING
//! DRAINING ──cancel + await listener, release subscription──▶ CLOSED
//! ```
//!
//! Two loops run per session: the client-read loop on the relay's own task,
//! and the bus-listen loop on a spawned task that owns the subscription.
//! Client frames become `notification`s broadcast on the shared channel;
//! bus payloads come back to the client as `echo`es.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::StreamExt;
use futures::stream::SplitStream;
use herald_bus::Subscription;
use herald_core::{ConnectionId, Message, Source};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use super::connection::ClientConnection;
use super::payload::{decode_bus_payload, extract_client_text};
use crate::metrics::WS_CLIENT_MESSAGES_TOTAL;
use crate::registry::ConnectionRegistry;

/// Result of one bounded read from the client.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A text payload.
    Text(String),
    /// The client closed the connection.
    Disconnected,
    /// The transport failed.
    Failed(String),
}

/// Inbound half of a client connection.
///
/// `next_text` must be cancel-safe: the relay wraps it in a timeout and
/// drops the future when no frame arrives in time.
#[async_trait]
pub trait ClientReader: Send {
    /// Wait for the next text payload from the client.
    async fn next_text(&mut self) -> ReadOutcome;
}

#[async_trait]
impl ClientReader for SplitStream<WebSocket> {
    async fn next_text(&mut self) -> ReadOutcome {
        loop {
            match self.next().await {
                None | Some(Ok(WsMessage::Close(_))) => return ReadOutcome::Disconnected,
                Some(Err(e)) => return ReadOutcome::Failed(e.to_string()),
                Some(Ok(WsMessage::Text(text))) => return ReadOutcome::Text(text.as_str().to_owned()),
                Some(Ok(WsMessage::Binary(data))) => return ReadOutcome::Text(binary_text(&data)),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
            }
        }
    }
}

/// Binary frames are read as text; invalid UTF-8 is replaced, not dropped.
fn binary_text(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    if let Cow::Owned(_) = text {
        info!(len = data.len(), "binary frame is not valid UTF-8, decoding lossily");
    }
    text.into_owned()
}

#[async_trait]
impl ClientReader for mpsc::Receiver<String> {
    async fn next_text(&mut self) -> ReadOutcome {
        self.recv().await.map_or(ReadOutcome::Disconnected, ReadOutcome::Text)
    }
}

/// Why a relay session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Shutdown started; the client got its notice.
    ShutdownNotified,
    /// The client went away.
    ClientDisconnected,
    /// The connection was closed from the server side.
    ForceClosed,
    /// Reading from the client failed.
    ReadFailed,
    /// The session could not subscribe to the shared channel.
    OpenFailed,
}

/// Relay lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    /// Sending the welcome and subscribing.
    Opening,
    /// Pumping client and bus messages.
    Active,
    /// Stopping the listener.
    Draining,
    /// Torn down.
    Closed,
}

/// How the bus-listen loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListenerExit {
    Cancelled,
    SourceEnded,
}

/// Timing knobs for a relay session.
#[derive(Clone, Copy, Debug)]
pub struct RelayTimings {
    /// Bounded wait for one client frame; expiry just starts the next cycle.
    pub read_timeout: Duration,
    /// Pause after the shutdown notice.
    pub shutdown_notice_grace: Duration,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            shutdown_notice_grace: Duration::from_millis(500),
        }
    }
}

struct Listener {
    cancel: CancellationToken,
    handle: JoinHandle<ListenerExit>,
}

/// One relay session bound to a registered connection.
pub struct MessageRelay<R> {
    id: ConnectionId,
    connection: Arc<ClientConnection>,
    registry: Arc<dyn ConnectionRegistry>,
    reader: R,
    timings: RelayTimings,
    state: RelayState,
    listener: Option<Listener>,
}

impl<R: ClientReader> MessageRelay<R> {
    /// Bind a relay to the connection registered as `id`.
    pub fn new(
        id: ConnectionId,
        connection: Arc<ClientConnection>,
        registry: Arc<dyn ConnectionRegistry>,
        reader: R,
        timings: RelayTimings,
    ) -> Self {
        Self {
            id,
            connection,
            registry,
            reader,
            timings,
            state: RelayState::Opening,
            listener: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Run the session to completion.
    pub async fn run(mut self) -> RelayOutcome {
        let outcome = match self.open().await {
            Ok(()) => self.pump().await,
            Err(outcome) => outcome,
        };
        self.teardown().await;
        debug!(connection_id = %self.id, ?outcome, "relay finished");
        outcome
    }

    async fn open(&mut self) -> Result<(), RelayOutcome> {
        let welcome = Message::welcome();
        if !self.connection.send_control(&welcome, self.timings.read_timeout).await {
            warn!(connection_id = %self.id, "failed to queue welcome");
        }
        let subscription = match self.registry.subscribe().await {
            Ok(subscription) => subscription,
            Err(error) => {
                error!(connection_id = %self.id, %error, "failed to subscribe to notifications");
                return Err(RelayOutcome::OpenFailed);
            }
        };
        self.spawn_listener(subscription);
        self.state = RelayState::Active;
        Ok(())
    }

    fn spawn_listener(&mut self, mut subscription: Subscription) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let connection = Arc::clone(&self.connection);
        let id = self.id.clone();

        let handle = tokio::spawn(
            async move {
                let exit = loop {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => break ListenerExit::Cancelled,
                        event = subscription.next() => match event {
                            Some(event) => {
                                let echo = Message::echo(decode_bus_payload(&event.payload));
                                if !connection.send_message(&echo) {
                                    debug!(connection_id = %id, "echo dropped, outbound queue unavailable");
                                }
                            }
                            None => break ListenerExit::SourceEnded,
                        },
                    }
                };
                if exit == ListenerExit::SourceEnded {
                    info!(connection_id = %id, "notification source ended");
                }
                subscription.release();
                exit
            }
            .in_current_span(),
        );
        self.listener = Some(Listener { cancel, handle });
    }

    async fn pump(&mut self) -> RelayOutcome {
        let shutdown = self.registry.shutdown_token();
        loop {
            if self.registry.is_shutdown_initiated() {
                self.state = RelayState::Draining;
                let grace = self.timings.shutdown_notice_grace;
                let started = tokio::time::Instant::now();
                if self.connection.send_control(&Message::shutdown_notice(), grace).await {
                    info!(connection_id = %self.id, "shutdown notice sent");
                } else {
                    warn!(connection_id = %self.id, "failed to queue shutdown notice");
                }
                tokio::time::sleep_until(started + grace).await;
                return RelayOutcome::ShutdownNotified;
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {}
                () = self.connection.closed() => {
                    self.state = RelayState::Draining;
                    info!(connection_id = %self.id, "connection closed by server");
                    return RelayOutcome::ForceClosed;
                }
                read = tokio::time::timeout(self.timings.read_timeout, self.reader.next_text()) => {
                    match read {
                        Err(_) => {}
                        Ok(ReadOutcome::Text(raw)) => process(self.registry.as_ref(), &self.id, &raw).await,
                        Ok(ReadOutcome::Disconnected) => {
                            self.state = RelayState::Draining;
                            info!(connection_id = %self.id, "client disconnected");
                            return RelayOutcome::ClientDisconnected;
                        }
                        Ok(ReadOutcome::Failed(error)) => {
                            self.state = RelayState::Draining;
                            warn!(connection_id = %self.id, %error, "client read failed");
                            return RelayOutcome::ReadFailed;
                        }
                    }
                }
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.state = RelayState::Draining;
            listener.cancel.cancel();
            match listener.handle.await {
                Ok(exit) => debug!(connection_id = %self.id, ?exit, "bus listener stopped"),
                Err(e) if e.is_cancelled() => debug!(connection_id = %self.id, "bus listener cancelled"),
                Err(e) => error!(connection_id = %self.id, error = %e, "bus listener panicked"),
            }
        }
        self.state = RelayState::Closed;
    }
}

/// Broadcast one client frame as a user notification. Failures are logged only.
async fn process(registry: &dyn ConnectionRegistry, id: &ConnectionId, raw: &str) {
    counter!(WS_CLIENT_MESSAGES_TOTAL).increment(1);
    let text = extract_client_text(raw);
    debug!(connection_id = %id, len = text.len(), "client message received");
    let message = Message::notification(text, Source::User);
    if let Err(error) = registry.broadcast(&message).await {
        warn!(connection_id = %id, %error, "failed to broadcast client message");
    }
}

impl<R> Drop for MessageRelay<R> {
    fn drop(&mut self) {
        // Dropped mid-run: the listener task releases its subscription on cancel.
        if let Some(listener) = self.listener.take() {
            listener.cancel.cancel();
        }
    }
}
