// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process message bus.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{Headers, MessageBus};
use crate::error::BusError;

/// Default channel capacity for the local bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A message delivered by the [`LocalBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Publish topic.
    pub topic: String,
    /// Message headers.
    pub headers: Headers,
    /// Message payload.
    pub payload: Value,
}

/// In-process bus backed by a tokio broadcast channel.
///
/// Every subscriber receives every message published after it subscribed.
/// Publishing never blocks and is confirmed immediately, even without
/// subscribers. A subscriber that falls more than the channel capacity
/// behind loses the oldest messages.
///
/// # Examples
///
/// ```
/// use platform_driver::protocol::{Headers, LocalBus, MessageBus};
///
/// # async fn example() {
/// let bus = LocalBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish("devices/a/temp", &Headers::new(chrono::Utc::now()), &serde_json::json!([1, {}]))
///     .await
///     .unwrap();
///
/// let message = rx.recv().await.unwrap();
/// assert_eq!(message.topic, "devices/a/temp");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a bus buffering up to `capacity` messages per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to every message published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(
        &self,
        topic: &str,
        headers: &Headers,
        payload: &Value,
    ) -> Result<(), BusError> {
        // No subscribers is not an error
        let _ = self.sender.send(BusMessage {
            topic: topic.to_string(),
            headers: headers.clone(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
