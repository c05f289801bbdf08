// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver event types.

use chrono::{DateTime, Utc};

/// Events emitted by the platform driver.
///
/// These events report device lifecycle, scrape outcomes, dropped publishes
/// and override changes. They are the health surface of the driver: a
/// supervisor subscribes to them instead of reading process-wide state.
///
/// # Examples
///
/// ```
/// use platform_driver::event::DriverEvent;
///
/// let event = DriverEvent::ScrapeFailed {
///     device: "campus/building1/device1".to_string(),
///     error: "device timed out".to_string(),
/// };
/// assert!(event.is_failure());
/// assert_eq!(event.device(), Some("campus/building1/device1"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// A device was registered.
    DeviceAdded {
        /// Logical device path.
        device: String,
    },

    /// A device was removed from the registry.
    DeviceRemoved {
        /// Logical device path.
        device: String,
    },

    /// A scheduled scrape began.
    ScrapeStarted {
        /// Logical device path.
        device: String,
    },

    /// A scrape produced readings and they were handed to the bus.
    ScrapeCompleted {
        /// Logical device path.
        device: String,
        /// Number of points read.
        points: usize,
    },

    /// A scrape failed as a whole; nothing was published for this cycle.
    ScrapeFailed {
        /// Logical device path.
        device: String,
        /// Description of the failure.
        error: String,
    },

    /// A single point was missing from an otherwise successful scrape.
    PointScrapeFailed {
        /// Logical device path.
        device: String,
        /// Depth-first topic of the missing point.
        topic: String,
    },

    /// A message was dropped by the publish gateway.
    PublishFailed {
        /// Publish topic.
        topic: String,
        /// Description of the failure.
        error: String,
    },

    /// An override pattern became active.
    OverrideOn {
        /// The pattern.
        pattern: String,
        /// When the override expires, if timed.
        expires: Option<DateTime<Utc>>,
    },

    /// An override pattern was removed or expired.
    OverrideOff {
        /// The pattern.
        pattern: String,
    },

    /// Every override pattern was removed.
    OverridesCleared,
}

impl DriverEvent {
    /// Returns the device path this event is about, if any.
    #[must_use]
    pub fn device(&self) -> Option<&str> {
        match self {
            Self::DeviceAdded { device }
            | Self::DeviceRemoved { device }
            | Self::ScrapeStarted { device }
            | Self::ScrapeCompleted { device, .. }
            | Self::ScrapeFailed { device, .. }
            | Self::PointScrapeFailed { device, .. } => Some(device),
            Self::PublishFailed { .. }
            | Self::OverrideOn { .. }
            | Self::OverrideOff { .. }
            | Self::OverridesCleared => None,
        }
    }

    /// Returns `true` if this is a device lifecycle event (added/removed).
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::DeviceAdded { .. } | Self::DeviceRemoved { .. })
    }

    /// Returns `true` if this event reports a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ScrapeFailed { .. } | Self::PointScrapeFailed { .. } | Self::PublishFailed { .. }
        )
    }

    /// Returns `true` if this is an override event.
    #[must_use]
    pub fn is_override(&self) -> bool {
        matches!(
            self,
            Self::OverrideOn { .. } | Self::OverrideOff { .. } | Self::OverridesCleared
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_extraction() {
        let added = DriverEvent::DeviceAdded {
            device: "a/b".to_string(),
        };
        assert_eq!(added.device(), Some("a/b"));
        assert_eq!(DriverEvent::OverridesCleared.device(), None);
    }

    #[test]
    fn lifecycle_events() {
        let removed = DriverEvent::DeviceRemoved {
            device: "a/b".to_string(),
        };
        assert!(removed.is_lifecycle());
        assert!(!removed.is_failure());
    }

    #[test]
    fn failure_events() {
        let failed = DriverEvent::PublishFailed {
            topic: "devices/a/b/all".to_string(),
            error: "timeout".to_string(),
        };
        assert!(failed.is_failure());
        assert!(!failed.is_override());
    }

    #[test]
    fn override_events() {
        let on = DriverEvent::OverrideOn {
            pattern: "campus/*".to_string(),
            expires: None,
        };
        assert!(on.is_override());
        assert!(DriverEvent::OverridesCleared.is_override());
    }
}
