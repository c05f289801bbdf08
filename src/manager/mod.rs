// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration-driven orchestration of device drivers.
//!
//! The [`PlatformDriver`] reads its configuration from a
//! [`ConfigStore`](crate::store::ConfigStore) and follows every change:
//!
//! | Name | Effect |
//! |------|--------|
//! | `config` | [`PlatformConfig`]: scrape quanta, publish defaults, topic bases, heartbeat |
//! | `devices/<path>` | [`DeviceConfig`]: creates, replaces or removes the driver for `<path>` |
//! | `override_patterns` | Persisted overrides, restored at startup |
//!
//! # Examples
//!
//! ```no_run
//! use platform_driver::manager::{DeviceConfig, PlatformDriver};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> platform_driver::Result<()> {
//!     let driver = PlatformDriver::builder().build();
//!     driver.start().await?;
//!
//!     let config = DeviceConfig::new("fake")
//!         .with_interval(5.0)
//!         .with_driver_config(json!({"registers": [
//!             {"point_name": "damper", "type": "integer", "writable": true, "default": 0}
//!         ]}));
//!     driver.configure_device("campus/building1/ahu1", config).await?;
//!
//!     driver.set_point("campus/building1/ahu1", "damper", json!(40)).await?;
//!
//!     // Take the whole building under manual control for an hour.
//!     driver
//!         .set_override_on("campus/building1/*", Some(std::time::Duration::from_secs(3600)), true)
//!         .await?;
//!
//!     driver.shutdown().await;
//!     Ok(())
//! }
//! ```

mod device_config;
mod platform_driver;

pub use device_config::{
    CONFIG_REFERENCE_PREFIX, DEVICES_PREFIX, DeviceConfig, PLATFORM_CONFIG, PlatformConfig,
};
pub use platform_driver::{PlatformDriver, PlatformDriverBuilder};
