// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message bus access.
//!
//! The platform driver republishes readings onto a shared bus. The bus itself
//! is a collaborator behind the [`MessageBus`] trait; this module provides
//! the [`PublishGateway`] that every publish goes through, plus two bus
//! implementations:
//!
//! - [`LocalBus`]: in-process broadcast bus
//! - [`MqttBus`]: MQTT transport (requires the `mqtt` feature)
//!
//! # Message shape
//!
//! Every message carries [`Headers`] and a JSON payload. Single point
//! payloads are `[value, meta]`; aggregate payloads are
//! `[{point: value, ...}, {point: meta, ...}]`.

mod gateway;
mod local;
#[cfg(feature = "mqtt")]
mod mqtt;

pub use gateway::{DEFAULT_CONFIRM_TIMEOUT, DEFAULT_MAX_JITTER, PublishGateway};
pub use local::{BusMessage, LocalBus};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBus, MqttBusBuilder};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BusError;

/// Headers attached to every published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    /// Time the message was built.
    #[serde(rename = "Date")]
    pub date: String,
    /// Time the reading was taken.
    #[serde(rename = "TimeStamp")]
    pub timestamp: String,
    /// Interval boundary shared by every device scraped in the same cycle.
    #[serde(
        rename = "SynchronizedTimeStamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub synchronized_timestamp: Option<String>,
}

impl Headers {
    /// Creates headers stamped with `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        let stamp = format_timestamp(now);
        Self {
            date: stamp.clone(),
            timestamp: stamp,
            synchronized_timestamp: None,
        }
    }

    /// Adds the synchronized timestamp.
    #[must_use]
    pub fn with_synchronized(mut self, synchronized: DateTime<Utc>) -> Self {
        self.synchronized_timestamp = Some(format_timestamp(synchronized));
        self
    }
}

/// Formats a timestamp the way it appears in message headers.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use platform_driver::protocol::format_timestamp;
///
/// let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
/// assert_eq!(format_timestamp(t), "2024-01-15T10:30:00.000000+00:00");
/// ```
#[must_use]
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// A message bus the driver can publish to.
///
/// The returned future resolves once the bus has confirmed the publish.
/// Callers bound the wait with their own timeout, so an implementation may
/// simply never resolve when confirmation is lost.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message and waits for confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Busy`] when the bus is temporarily saturated and
    /// the publish may be retried, or [`BusError::Transport`] for failures
    /// that should not be retried.
    async fn publish(&self, topic: &str, headers: &Headers, payload: &Value)
    -> Result<(), BusError>;
}
