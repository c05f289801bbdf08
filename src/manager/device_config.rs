// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration models read from the configuration store.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::protocol::DEFAULT_CONFIRM_TIMEOUT;
use crate::scheduler::{DEFAULT_INTERVAL, PublishFlags};
use crate::topic::{DEFAULT_BREADTH_FIRST_BASE, DEFAULT_DEPTH_FIRST_BASE, TopicLayout};

/// Name of the platform-wide configuration.
pub const PLATFORM_CONFIG: &str = "config";

/// Prefix of every device configuration name.
pub const DEVICES_PREFIX: &str = "devices/";

/// Prefix marking a reference to another stored configuration.
pub const CONFIG_REFERENCE_PREFIX: &str = "config://";

/// Default scrape quantum in seconds.
const DEFAULT_SCRAPE_INTERVAL: f64 = 0.02;

/// Platform-wide scheduling and publish settings.
///
/// Stored under [`PLATFORM_CONFIG`]. Every field is optional in the stored
/// JSON. Durations are given in seconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use platform_driver::manager::PlatformConfig;
///
/// let config = PlatformConfig::from_value(&serde_json::json!({
///     "driver_scrape_interval": 0.5,
///     "publish_breadth_first_all": true,
/// }))
/// .unwrap();
///
/// assert_eq!(config.scrape_quantum(), Duration::from_millis(500));
/// assert!(config.publish_flags().breadth_first_all);
/// assert!(config.publish_flags().depth_first_all);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct PlatformConfig {
    /// Offset quantum between consecutive devices of a group.
    pub driver_scrape_interval: f64,
    /// Offset quantum between groups.
    pub group_offset_interval: f64,
    /// Default for the depth-first aggregate publish.
    pub publish_depth_first_all: bool,
    /// Default for the breadth-first aggregate publish.
    pub publish_breadth_first_all: bool,
    /// Default for depth-first per-point publishes.
    pub publish_depth_first: bool,
    /// Default for breadth-first per-point publishes.
    pub publish_breadth_first: bool,
    /// Enables the scrape probe.
    pub scalability_test: bool,
    /// Runs after which the probe reports its summary.
    pub scalability_test_iterations: usize,
    /// Cadence of the periodic heartbeat; disabled when absent.
    pub heartbeat_interval: Option<f64>,
    /// Time to wait for the bus to confirm a publish.
    pub publish_confirm_timeout: f64,
    /// First segment of depth-first topics.
    pub depth_first_base: String,
    /// First segment of breadth-first topics.
    pub breadth_first_base: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            driver_scrape_interval: DEFAULT_SCRAPE_INTERVAL,
            group_offset_interval: 0.0,
            publish_depth_first_all: true,
            publish_breadth_first_all: false,
            publish_depth_first: false,
            publish_breadth_first: false,
            scalability_test: false,
            scalability_test_iterations: 3,
            heartbeat_interval: None,
            publish_confirm_timeout: DEFAULT_CONFIRM_TIMEOUT.as_secs_f64(),
            depth_first_base: DEFAULT_DEPTH_FIRST_BASE.to_string(),
            breadth_first_base: DEFAULT_BREADTH_FIRST_BASE.to_string(),
        }
    }
}

impl PlatformConfig {
    /// Parses the stored configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if a field has the wrong type.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        Self::deserialize(value).map_err(|source| ConfigError::Json {
            name: PLATFORM_CONFIG.to_string(),
            source,
        })
    }

    /// Returns the offset quantum between devices of a group.
    #[must_use]
    pub fn scrape_quantum(&self) -> Duration {
        seconds_or(
            "driver_scrape_interval",
            self.driver_scrape_interval,
            Duration::from_secs_f64(DEFAULT_SCRAPE_INTERVAL),
        )
    }

    /// Returns the offset quantum between groups.
    #[must_use]
    pub fn group_quantum(&self) -> Duration {
        seconds_or("group_offset_interval", self.group_offset_interval, Duration::ZERO)
    }

    /// Returns the publish confirmation timeout.
    #[must_use]
    pub fn confirm_timeout(&self) -> Duration {
        seconds_or("publish_confirm_timeout", self.publish_confirm_timeout, DEFAULT_CONFIRM_TIMEOUT)
    }

    /// Returns the heartbeat cadence, if enabled.
    #[must_use]
    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat_interval
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|d| !d.is_zero())
    }

    /// Returns the default publish modes.
    #[must_use]
    pub fn publish_flags(&self) -> PublishFlags {
        PublishFlags {
            depth_first: self.publish_depth_first,
            breadth_first: self.publish_breadth_first,
            depth_first_all: self.publish_depth_first_all,
            breadth_first_all: self.publish_breadth_first_all,
        }
    }

    /// Returns the topic layout.
    #[must_use]
    pub fn layout(&self) -> TopicLayout {
        TopicLayout::new(self.depth_first_base.as_str(), self.breadth_first_base.as_str())
    }
}

/// Configuration of a single device.
///
/// Stored under `devices/<device path>`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use platform_driver::manager::DeviceConfig;
///
/// let config = DeviceConfig::new("fake")
///     .with_interval(5.0)
///     .with_group(1)
///     .with_heart_beat_point("heartbeat");
///
/// assert_eq!(config.interval(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Key of the driver constructor in the driver registry.
    pub driver_type: String,
    /// Driver-specific settings.
    #[serde(default)]
    pub driver_config: Value,
    /// Register definitions, or a `config://` reference to them.
    #[serde(default)]
    pub registry_config: Option<String>,
    /// Polling interval in seconds.
    #[serde(default = "default_interval", deserialize_with = "lenient_interval")]
    pub interval: f64,
    /// Point toggled by the heartbeat.
    #[serde(default)]
    pub heart_beat_point: Option<String>,
    /// Timezone reported in point metadata.
    #[serde(default)]
    pub timezone: String,
    /// Scheduling group.
    #[serde(default)]
    pub group: usize,
    /// Overrides the platform default for the depth-first aggregate publish.
    #[serde(default)]
    pub publish_depth_first_all: Option<bool>,
    /// Overrides the platform default for the breadth-first aggregate publish.
    #[serde(default)]
    pub publish_breadth_first_all: Option<bool>,
    /// Overrides the platform default for depth-first per-point publishes.
    #[serde(default)]
    pub publish_depth_first: Option<bool>,
    /// Overrides the platform default for breadth-first per-point publishes.
    #[serde(default)]
    pub publish_breadth_first: Option<bool>,
}

impl DeviceConfig {
    /// Creates a configuration for the given driver type.
    #[must_use]
    pub fn new(driver_type: impl Into<String>) -> Self {
        Self {
            driver_type: driver_type.into(),
            driver_config: Value::Object(serde_json::Map::new()),
            registry_config: None,
            interval: DEFAULT_INTERVAL.as_secs_f64(),
            heart_beat_point: None,
            timezone: String::new(),
            group: 0,
            publish_depth_first_all: None,
            publish_breadth_first_all: None,
            publish_depth_first: None,
            publish_breadth_first: None,
        }
    }

    /// Parses a stored device configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] without a `driver_type`, or
    /// [`ConfigError::Json`] if a field has the wrong type.
    pub fn from_value(name: &str, value: &Value) -> Result<Self, ConfigError> {
        if value.get("driver_type").is_none() {
            return Err(ConfigError::MissingField {
                name: name.to_string(),
                field: "driver_type",
            });
        }
        Self::deserialize(value).map_err(|source| ConfigError::Json {
            name: name.to_string(),
            source,
        })
    }

    /// Sets the driver-specific settings.
    #[must_use]
    pub fn with_driver_config(mut self, driver_config: Value) -> Self {
        self.driver_config = driver_config;
        self
    }

    /// Sets the register definitions.
    #[must_use]
    pub fn with_registry_config(mut self, registry_config: impl Into<String>) -> Self {
        self.registry_config = Some(registry_config.into());
        self
    }

    /// Sets the polling interval in seconds.
    #[must_use]
    pub fn with_interval(mut self, seconds: f64) -> Self {
        self.interval = seconds;
        self
    }

    /// Sets the heartbeat point.
    #[must_use]
    pub fn with_heart_beat_point(mut self, point: impl Into<String>) -> Self {
        self.heart_beat_point = Some(point.into());
        self
    }

    /// Sets the timezone.
    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Sets the scheduling group.
    #[must_use]
    pub fn with_group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    /// Sets every publish mode of this device, ignoring platform defaults.
    #[must_use]
    pub fn with_publish_flags(mut self, flags: PublishFlags) -> Self {
        self.publish_depth_first = Some(flags.depth_first);
        self.publish_breadth_first = Some(flags.breadth_first);
        self.publish_depth_first_all = Some(flags.depth_first_all);
        self.publish_breadth_first_all = Some(flags.breadth_first_all);
        self
    }

    /// Returns the polling interval.
    ///
    /// Intervals below one second fall back to the default of 60 seconds.
    #[must_use]
    pub fn interval(&self) -> Duration {
        if self.interval.is_finite() && self.interval >= 1.0 {
            if let Ok(interval) = Duration::try_from_secs_f64(self.interval) {
                return interval;
            }
        }
        tracing::warn!(
            interval = self.interval,
            default = ?DEFAULT_INTERVAL,
            "Invalid device interval, using default"
        );
        DEFAULT_INTERVAL
    }

    /// Resolves the publish modes against the platform defaults.
    #[must_use]
    pub fn publish_flags(&self, defaults: PublishFlags) -> PublishFlags {
        PublishFlags {
            depth_first: self.publish_depth_first.unwrap_or(defaults.depth_first),
            breadth_first: self.publish_breadth_first.unwrap_or(defaults.breadth_first),
            depth_first_all: self
                .publish_depth_first_all
                .unwrap_or(defaults.depth_first_all),
            breadth_first_all: self
                .publish_breadth_first_all
                .unwrap_or(defaults.breadth_first_all),
        }
    }

    /// Returns the name of the configuration holding the register
    /// definitions, if `registry_config` is a `config://` reference.
    #[must_use]
    pub fn registry_reference(&self) -> Option<&str> {
        self.registry_config
            .as_deref()
            .and_then(|r| r.strip_prefix(CONFIG_REFERENCE_PREFIX))
    }
}

fn default_interval() -> f64 {
    DEFAULT_INTERVAL.as_secs_f64()
}

/// Accepts numbers and numeric strings; anything else becomes the default.
fn lenient_interval<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let parsed = match &raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(|| {
        tracing::warn!(interval = %raw, "Non-numeric device interval, using default");
        default_interval()
    }))
}

fn seconds_or(field: &'static str, seconds: f64, default: Duration) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or_else(|_| {
        tracing::warn!(field, value = seconds, "Invalid duration, using default");
        default
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn platform_defaults() {
        let config = PlatformConfig::from_value(&json!({})).unwrap();

        assert_eq!(config, PlatformConfig::default());
        assert_eq!(config.scrape_quantum(), Duration::from_millis(20));
        assert_eq!(config.group_quantum(), Duration::ZERO);
        assert_eq!(config.confirm_timeout(), Duration::from_secs(10));
        assert_eq!(config.publish_flags(), PublishFlags::default());
        assert_eq!(config.layout(), TopicLayout::default());
        assert!(config.heartbeat().is_none());
    }

    #[test]
    fn platform_config_rejects_wrong_types() {
        let err = PlatformConfig::from_value(&json!({"publish_depth_first": "yes"})).unwrap_err();
        assert!(matches!(err, ConfigError::Json { name, .. } if name == "config"));
    }

    #[test]
    fn negative_quantum_falls_back_to_default() {
        let config = PlatformConfig {
            group_offset_interval: -1.0,
            ..PlatformConfig::default()
        };
        assert_eq!(config.group_quantum(), Duration::ZERO);
    }

    #[test]
    fn zero_heartbeat_is_disabled() {
        let config = PlatformConfig {
            heartbeat_interval: Some(0.0),
            ..PlatformConfig::default()
        };
        assert!(config.heartbeat().is_none());
    }

    #[test]
    fn device_config_parses_stored_form() {
        let config = DeviceConfig::from_value(
            "devices/campus/building1/device1",
            &json!({
                "driver_type": "fake",
                "driver_config": {},
                "registry_config": "config://fake.json",
                "interval": 5,
                "timezone": "US/Pacific",
                "heart_beat_point": "Heartbeat",
                "group": 2,
                "publish_breadth_first": true,
            }),
        )
        .unwrap();

        assert_eq!(config.interval(), Duration::from_secs(5));
        assert_eq!(config.group, 2);
        assert_eq!(config.registry_reference(), Some("fake.json"));

        let flags = config.publish_flags(PublishFlags::default());
        assert!(flags.breadth_first);
        assert!(flags.depth_first_all);
    }

    #[test]
    fn device_config_requires_driver_type() {
        let err = DeviceConfig::from_value("devices/a", &json!({"interval": 5})).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "driver_type", .. }));
    }

    #[test]
    fn invalid_intervals_fall_back_to_sixty_seconds() {
        for interval in [json!(0.5), json!(-3), json!("soon"), json!(null)] {
            let config =
                DeviceConfig::from_value("devices/a", &json!({"driver_type": "fake", "interval": interval}))
                    .unwrap();
            assert_eq!(config.interval(), Duration::from_secs(60));
        }
    }

    #[test]
    fn numeric_string_interval_is_accepted() {
        let config =
            DeviceConfig::from_value("devices/a", &json!({"driver_type": "fake", "interval": "15"}))
                .unwrap();
        assert_eq!(config.interval(), Duration::from_secs(15));
    }

    #[test]
    fn device_flags_override_platform_defaults() {
        let config = DeviceConfig {
            publish_depth_first_all: Some(false),
            ..DeviceConfig::new("fake")
        };
        let flags = config.publish_flags(PublishFlags::default());
        assert!(!flags.depth_first_all);
    }

    #[test]
    fn inline_registry_config_is_not_a_reference() {
        let config = DeviceConfig::new("fake").with_registry_config("[]");
        assert_eq!(config.registry_reference(), None);
    }
}
