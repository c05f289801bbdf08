// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of the platform driver over the in-process bus.

use std::sync::Arc;
use std::time::Duration;

use platform_driver::interface::{DeviceInterface, DriverRegistry, MemoryInterface};
use platform_driver::protocol::{BusMessage, LocalBus};
use platform_driver::store::{ConfigStore, MemoryConfigStore};
use platform_driver::{DeviceConfig, DriverEvent, Error, PlatformDriver, PointValues};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::time::timeout;

const DEVICE1: &str = "campus/building1/device1";
const DEVICE2: &str = "campus/building1/device2";
const OTHER: &str = "campus/building2/device1";

fn device_config(interval: u64) -> Value {
    json!({
        "driver_type": "fake",
        "interval": interval,
        "heart_beat_point": "heartbeat",
        "driver_config": {"registers": [
            {"point_name": "temperature", "type": "float", "units": "degF", "default": 72.5},
            {"point_name": "setpoint", "type": "float", "units": "degF", "writable": true, "default": 70.0},
            {"point_name": "heartbeat", "type": "integer", "writable": true, "default": 0}
        ]}
    })
}

struct Harness {
    store: Arc<MemoryConfigStore>,
    bus: Arc<LocalBus>,
    driver: PlatformDriver,
}

impl Harness {
    async fn with_devices(platform: Value, devices: &[(&str, u64)]) -> Self {
        let store = Arc::new(MemoryConfigStore::new());
        store.set("config", platform).await.unwrap();
        for (path, interval) in devices {
            store
                .set(&format!("devices/{path}"), device_config(*interval))
                .await
                .unwrap();
        }
        Self::on_store(store).await
    }

    async fn on_store(store: Arc<MemoryConfigStore>) -> Self {
        let bus = Arc::new(LocalBus::new());
        let driver = PlatformDriver::builder()
            .store(store.clone())
            .bus(bus.clone())
            .build();
        driver.start().await.unwrap();
        Self { store, bus, driver }
    }
}

async fn next_on(rx: &mut broadcast::Receiver<BusMessage>, topic: &str) -> BusMessage {
    timeout(Duration::from_secs(5), async {
        loop {
            let message = rx.recv().await.unwrap();
            if message.topic == topic {
                return message;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("nothing published on {topic}"))
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// Scheduling and publishing
// ============================================================================

mod publishing {
    use super::*;

    #[tokio::test]
    async fn scrape_publishes_depth_first_aggregate() {
        let harness = Harness::with_devices(json!({}), &[(DEVICE1, 1)]).await;
        let mut rx = harness.bus.subscribe();

        let message = next_on(&mut rx, "devices/campus/building1/device1/all").await;

        assert_eq!(message.payload[0]["temperature"], json!(72.5));
        assert_eq!(message.payload[0]["setpoint"], json!(70.0));
        assert_eq!(
            message.payload[1]["temperature"],
            json!({"units": "degF", "type": "float", "tz": ""})
        );
        let sync = message.headers.synchronized_timestamp.expect("scheduled scrape");
        assert!(sync.ends_with(".000000+00:00"), "{sync} is not on a second boundary");

        harness.driver.shutdown().await;
    }

    #[tokio::test]
    async fn platform_defaults_select_topics() {
        let harness = Harness::with_devices(
            json!({"publish_depth_first_all": false, "publish_breadth_first_all": true, "publish_breadth_first": true}),
            &[(DEVICE1, 1)],
        )
        .await;
        let mut rx = harness.bus.subscribe();

        let all = next_on(&mut rx, "points/all/device1/building1/campus").await;
        assert_eq!(all.payload[0]["temperature"], json!(72.5));

        let point = next_on(&mut rx, "points/temperature/device1/building1/campus").await;
        assert_eq!(point.payload[0], json!(72.5));
        assert_eq!(point.payload[1]["units"], json!("degF"));

        harness.driver.shutdown().await;
    }

    #[tokio::test]
    async fn failing_point_is_reported_and_omitted() {
        let registry = DriverRegistry::with_builtin().with_driver("flaky", |ctx| {
            let interface = MemoryInterface::from_context(ctx)?;
            interface.fail_point("broken");
            Ok(Arc::new(interface) as Arc<dyn DeviceInterface>)
        });
        let bus = Arc::new(LocalBus::new());
        let driver = PlatformDriver::builder()
            .bus(bus.clone())
            .registry(registry)
            .build();
        let mut events = driver.subscribe();
        let mut rx = bus.subscribe();
        driver.start().await.unwrap();

        driver
            .configure_device(
                DEVICE1,
                DeviceConfig::new("flaky")
                    .with_interval(1.0)
                    .with_driver_config(json!({"registers": [
                        {"point_name": "temperature", "type": "float", "default": 72.5},
                        {"point_name": "broken", "type": "float", "default": 0.0}
                    ]})),
            )
            .await
            .unwrap();

        let failed = timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(DriverEvent::PointScrapeFailed { topic, .. }) = events.recv().await {
                    return topic;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(failed, "devices/campus/building1/device1/broken");

        let message = next_on(&mut rx, "devices/campus/building1/device1/all").await;
        assert_eq!(message.payload[0], json!({"temperature": 72.5}));

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn cov_values_publish_without_sync_timestamp() {
        let harness = Harness::with_devices(json!({}), &[(DEVICE1, 3600)]).await;
        let mut rx = harness.bus.subscribe();

        let values: PointValues = [("temperature".to_string(), json!(75.0))].into_iter().collect();
        harness.driver.forward_cov_value(DEVICE1, &values).await.unwrap();

        let message = next_on(&mut rx, "devices/campus/building1/device1/all").await;
        assert_eq!(message.payload[0], json!({"temperature": 75.0}));
        assert!(message.headers.synchronized_timestamp.is_none());

        assert!(matches!(
            harness.driver.forward_cov_value("campus/missing", &values).await,
            Err(Error::DeviceNotFound(_))
        ));
        harness.driver.shutdown().await;
    }
}

// ============================================================================
// Configuration following
// ============================================================================

mod configuration {
    use super::*;

    #[tokio::test]
    async fn store_changes_add_and_remove_devices() {
        let harness = Harness::with_devices(json!({}), &[(DEVICE1, 60)]).await;
        assert_eq!(harness.driver.device_paths().await, vec![DEVICE1.to_string()]);

        harness
            .store
            .set(&format!("devices/{OTHER}"), device_config(60))
            .await
            .unwrap();
        let driver = harness.driver.clone();
        eventually(|| {
            let driver = driver.clone();
            async move { driver.device_paths().await.len() == 2 }
        })
        .await;

        harness.store.delete(&format!("devices/{DEVICE1}")).await.unwrap();
        let driver = harness.driver.clone();
        eventually(|| {
            let driver = driver.clone();
            async move { driver.device_paths().await == vec![OTHER.to_string()] }
        })
        .await;

        harness.driver.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_device_config_is_skipped() {
        let store = Arc::new(MemoryConfigStore::new());
        store
            .set(&format!("devices/{DEVICE1}"), json!({"interval": 60}))
            .await
            .unwrap();
        store
            .set(&format!("devices/{DEVICE2}"), json!({"driver_type": "modbus"}))
            .await
            .unwrap();
        store.set(&format!("devices/{OTHER}"), device_config(60)).await.unwrap();

        let harness = Harness::on_store(store).await;
        assert_eq!(harness.driver.device_paths().await, vec![OTHER.to_string()]);
        harness.driver.shutdown().await;
    }

    #[tokio::test]
    async fn platform_config_change_reslots_devices() {
        let harness = Harness::with_devices(json!({}), &[(DEVICE1, 60), (DEVICE2, 60)]).await;
        let device2 = harness.driver.driver(DEVICE2).await.unwrap();
        assert_eq!(device2.offset(), Duration::from_millis(20));

        harness
            .store
            .set("config", json!({"driver_scrape_interval": 1.5}))
            .await
            .unwrap();

        eventually(|| {
            let device2 = device2.clone();
            async move { device2.offset() == Duration::from_millis(1500) }
        })
        .await;
        harness.driver.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_every_schedule() {
        let harness = Harness::with_devices(json!({}), &[(DEVICE1, 60), (OTHER, 60)]).await;
        let drivers = [
            harness.driver.driver(DEVICE1).await.unwrap(),
            harness.driver.driver(OTHER).await.unwrap(),
        ];

        harness.driver.shutdown().await;
        assert!(drivers.iter().all(|d| !d.is_scheduled()));
    }
}

// ============================================================================
// Overrides
// ============================================================================

mod overrides {
    use super::*;

    #[tokio::test]
    async fn building_override_rejects_device_calls() {
        let harness =
            Harness::with_devices(json!({}), &[(DEVICE1, 60), (DEVICE2, 60), (OTHER, 60)]).await;
        let driver = &harness.driver;

        driver.set_override_on("campus/building1/*", None, false).await.unwrap();

        assert_eq!(
            driver.get_override_devices(),
            vec![DEVICE1.to_string(), DEVICE2.to_string()]
        );
        assert!(matches!(
            driver.set_point(DEVICE1, "setpoint", json!(65.0)).await,
            Err(Error::DeviceOverridden(_))
        ));
        assert!(matches!(
            driver.revert_device(DEVICE2).await,
            Err(Error::DeviceOverridden(_))
        ));
        assert_eq!(
            driver.set_point(OTHER, "setpoint", json!(65.0)).await.unwrap(),
            json!(65.0)
        );

        let persisted = harness.store.get("override_patterns").await.unwrap().unwrap();
        assert_eq!(persisted, json!({"campus/building1/*": "0.0"}));

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn devices_added_later_inherit_override() {
        let harness = Harness::with_devices(json!({}), &[(DEVICE1, 60)]).await;
        harness
            .driver
            .set_override_on("campus/building1", None, false)
            .await
            .unwrap();

        harness
            .store
            .set(&format!("devices/{DEVICE2}"), device_config(60))
            .await
            .unwrap();
        let driver = harness.driver.clone();
        eventually(|| {
            let driver = driver.clone();
            async move { driver.get_override_devices().len() == 2 }
        })
        .await;

        assert!(matches!(
            harness.driver.get_point(DEVICE2, "temperature").await,
            Err(Error::DeviceOverridden(_))
        ));
        harness.driver.shutdown().await;
    }

    #[tokio::test]
    async fn timed_override_expires() {
        let harness = Harness::with_devices(json!({}), &[(DEVICE1, 60)]).await;
        let mut events = harness.driver.subscribe();

        harness
            .driver
            .set_override_on(DEVICE1, Some(Duration::from_millis(200)), false)
            .await
            .unwrap();
        assert!(harness.driver.get_override_patterns()[DEVICE1].is_some());

        let off = timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(DriverEvent::OverrideOff { pattern }) = events.recv().await {
                    return pattern;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(off, DEVICE1);
        assert!(harness.driver.get_override_devices().is_empty());
        assert!(harness.driver.get_point(DEVICE1, "temperature").await.is_ok());
        harness.driver.shutdown().await;
    }

    #[tokio::test]
    async fn overrides_survive_restart() {
        let harness = Harness::with_devices(json!({}), &[(DEVICE1, 60), (OTHER, 60)]).await;
        harness
            .driver
            .set_override_on("campus/building1/*", None, false)
            .await
            .unwrap();
        harness.driver.shutdown().await;

        let restarted = Harness::on_store(harness.store.clone()).await;

        assert_eq!(restarted.driver.get_override_devices(), vec![DEVICE1.to_string()]);
        assert!(restarted.driver.get_override_patterns()["campus/building1/*"].is_none());
        restarted.driver.shutdown().await;
    }

    #[tokio::test]
    async fn clear_overrides_releases_everything() {
        let harness = Harness::with_devices(json!({}), &[(DEVICE1, 60), (OTHER, 60)]).await;
        let driver = &harness.driver;
        driver.set_override_on("campus/building1", None, false).await.unwrap();
        driver
            .set_override_on("campus/building2", Some(Duration::from_secs(600)), false)
            .await
            .unwrap();

        driver.clear_overrides().await;

        assert!(driver.get_override_devices().is_empty());
        assert!(driver.get_override_patterns().is_empty());
        assert_eq!(
            harness.store.get("override_patterns").await.unwrap(),
            Some(json!({}))
        );
        driver.shutdown().await;
    }
}
