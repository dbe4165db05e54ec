//! Redis pub/sub backend.
//!
//! Publishing goes through a shared [`ConnectionManager`]; every
//! subscription opens its own dedicated pub/sub connection, which Redis
//! requires since a subscribed connection cannot issue other commands.

use std::borrow::Cow;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, warn};

use crate::errors::BusError;
use crate::subscription::{BusEvent, Subscription};
use crate::PubSubBus;

/// Redis-backed bus shared by every worker pointed at the same server.
pub struct RedisBus {
    client: Client,
    url: String,
    publisher: Mutex<Option<ConnectionManager>>,
}

impl RedisBus {
    /// Parse `url` without opening any connection.
    pub fn new(url: &str) -> Result<Self, BusError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            url: url.to_owned(),
            publisher: Mutex::new(None),
        })
    }

    fn publisher(&self) -> Result<ConnectionManager, BusError> {
        self.publisher.lock().clone().ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl PubSubBus for RedisBus {
    async fn connect(&self) -> Result<(), BusError> {
        let manager = ConnectionManager::new(self.client.clone()).await?;
        *self.publisher.lock() = Some(manager);
        info!(url = %self.url, "redis bus connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        if self.publisher.lock().take().is_some() {
            debug!(url = %self.url, "redis bus disconnected");
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BusError> {
        let mut conn = self.publisher()?;
        let receivers: usize = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        debug!(channel, "redis subscription opened");

        let stream = pubsub
            .into_on_message()
            .map(|msg| event_from_payload(msg.get_channel_name(), msg.get_payload_bytes()));
        Ok(Subscription::new(channel, Box::pin(stream)))
    }

    fn is_connected(&self) -> bool {
        self.publisher.lock().is_some()
    }
}

/// Invalid UTF-8 is replaced rather than dropped, so the listener still sees
/// the message and wraps it like any other non-JSON payload.
fn event_from_payload(channel: &str, bytes: &[u8]) -> BusEvent {
    let payload = match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(text) => text.to_owned(),
        Cow::Owned(text) => {
            warn!(channel, len = bytes.len(), "pub/sub payload is not valid UTF-8");
            text
        }
    };
    BusEvent {
        channel: channel.to_owned(),
        payload,
    }
}
