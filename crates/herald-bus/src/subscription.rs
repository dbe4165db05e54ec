//! Scoped subscription handle.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tracing::debug;

/// One message received on a subscribed channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusEvent {
    /// Channel the message arrived on.
    pub channel: String,
    /// Raw payload as published.
    pub payload: String,
}

/// Boxed event stream produced by a backend.
pub type BusEventStream = Pin<Box<dyn Stream<Item = BusEvent> + Send>>;

/// A live subscription to one channel.
///
/// The underlying stream (and whatever backend connection feeds it) is
/// released exactly once: by [`Subscription::release`] or, failing that, on
/// drop. After release, [`Subscription::next`] yields `None`.
pub struct Subscription {
    channel: String,
    stream: Option<BusEventStream>,
}

impl Subscription {
    /// Wrap a backend stream.
    pub fn new(channel: impl Into<String>, stream: BusEventStream) -> Self {
        Self {
            channel: channel.into(),
            stream: Some(stream),
        }
    }

    /// Subscribed channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next event. `None` once the source ends or after release.
    pub async fn next(&mut self) -> Option<BusEvent> {
        match self.stream.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        }
    }

    /// Whether the subscription has been released.
    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    /// Release the subscription now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.stream.take().is_some() {
            debug!(channel = %self.channel, "subscription released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("released", &self.is_released())
            .finish()
    }
}
