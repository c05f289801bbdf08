// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fan-out of driver events.

use tokio::sync::broadcast;

use super::DriverEvent;

/// Events kept for a subscriber that is not keeping up.
const BACKLOG: usize = 256;

/// Where schedulers, the override manager and the orchestrator report what
/// they did.
///
/// Recording never waits: without subscribers the event is dropped, and a
/// subscriber more than 256 events behind gets `RecvError::Lagged` and
/// skips ahead. Clones record into the same channel.
///
/// # Examples
///
/// ```
/// use platform_driver::event::{DriverEvent, EventBus};
///
/// let events = EventBus::new();
/// let mut rx = events.subscribe();
///
/// events.record(DriverEvent::DeviceAdded {
///     device: "campus/building1/device1".to_string(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DriverEvent>,
}

impl EventBus {
    /// Creates an event bus nobody listens to yet.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BACKLOG);
        Self { sender }
    }

    /// Returns a receiver for every event recorded from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.sender.subscribe()
    }

    /// Records an event.
    pub fn record(&self, event: DriverEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
