// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform Driver - periodic polling of field devices with bus republishing.
//!
//! This library drives a fleet of field devices (HVAC controllers, meters,
//! simulated registers) from a single process. Each device is scraped on a
//! fixed interval, and every reading is republished on a message bus under
//! two topic hierarchies.
//!
//! # Features
//!
//! - **Load-distributed scheduling**: devices get deterministic offsets so
//!   their scrapes spread across the interval instead of bursting at once
//! - **Dual-topology publishing**: depth-first
//!   (`devices/<campus>/<building>/<device>/<point>`) and breadth-first
//!   (`points/<point>/<device>/<building>/<campus>`) topics, per point or
//!   aggregated per device
//! - **Operator overrides**: glob patterns put whole branches of the device
//!   tree under manual control, indefinitely or for a duration, surviving
//!   restarts
//! - **Configuration-driven**: devices come and go as configuration entries
//!   are stored, replaced and deleted
//! - **Scalability probe**: optional timing of complete scrape cycles
//!
//! # Architecture
//!
//! | Module | Role |
//! |--------|------|
//! | [`interface`] | The [`DeviceInterface`](interface::DeviceInterface) trait drivers implement, and the driver registry |
//! | [`scheduler`] | Per-device timers, scrape cycles and publishing |
//! | [`protocol`] | Message headers, the publish gateway and bus transports |
//! | [`topic`] | Depth-first and breadth-first topic construction |
//! | [`overrides`] | Override patterns and their expiry |
//! | [`manager`] | The [`PlatformDriver`] orchestrator and its configuration |
//! | [`store`] | The configuration store abstraction |
//! | [`event`] | Health and activity events |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use platform_driver::PlatformDriver;
//! use platform_driver::protocol::LocalBus;
//! use platform_driver::store::{ConfigStore, MemoryConfigStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> platform_driver::Result<()> {
//!     let store = Arc::new(MemoryConfigStore::new());
//!     store.set("config", json!({"publish_breadth_first_all": true})).await?;
//!     store.set("devices/campus/building1/rtu1", json!({
//!         "driver_type": "fake",
//!         "interval": 5,
//!         "driver_config": {"registers": [
//!             {"point_name": "SupplyTemp", "type": "float", "units": "degF", "default": 55.0}
//!         ]}
//!     })).await?;
//!
//!     let bus = Arc::new(LocalBus::new());
//!     let mut messages = bus.subscribe();
//!
//!     let driver = PlatformDriver::builder()
//!         .store(store)
//!         .bus(bus)
//!         .build();
//!     driver.start().await?;
//!
//!     // devices/campus/building1/rtu1/all, then points/all/rtu1/building1/campus
//!     let message = messages.recv().await.expect("bus closed");
//!     println!("{}: {}", message.topic, message.payload);
//!
//!     driver.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # MQTT
//!
//! With the default `mqtt` feature, [`protocol::MqttBus`] publishes to an
//! MQTT broker instead of the in-process bus.
//!
//! # Logging
//!
//! Everything is logged through [`tracing`]; install any subscriber to see
//! scrape failures, publish timeouts and override changes.

pub mod error;
pub mod event;
pub mod interface;
pub mod manager;
pub mod overrides;
pub mod probe;
pub mod protocol;
pub mod scheduler;
pub mod store;
pub mod topic;

pub use error::{
    BusError, ConfigError, Error, InterfaceError, OverrideError, PublishError, Result, StoreError,
};
pub use event::{DriverEvent, EventBus};
pub use interface::{DeviceInterface, DriverRegistry, PointValues};
pub use manager::{DeviceConfig, PlatformConfig, PlatformDriver, PlatformDriverBuilder};
pub use overrides::OverrideManager;
pub use scheduler::{DeviceDriver, PublishFlags};
pub use topic::TopicLayout;
