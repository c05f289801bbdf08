// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT bus using mockforge-mqtt.

#![cfg(feature = "mqtt")]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use platform_driver::protocol::{Headers, MessageBus, MqttBus, PublishGateway};
use platform_driver::{DeviceConfig, DriverEvent, PlatformDriver, PublishError};
use serde_json::json;
use tokio::time::{sleep, timeout};

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to bind
    sleep(Duration::from_millis(500)).await;
}

// ============================================================================
// MqttBus Tests
// ============================================================================

mod mqtt_bus {
    use super::*;

    #[tokio::test]
    async fn connect_with_schemes() {
        let port = get_test_port();
        start_mock_broker(port).await;

        assert!(MqttBus::connect(format!("mqtt://127.0.0.1:{port}")).is_ok());
        assert!(MqttBus::connect(format!("tcp://127.0.0.1:{port}")).is_ok());
        assert!(MqttBus::connect(format!("127.0.0.1:{port}")).is_ok());
    }

    #[tokio::test]
    async fn invalid_port_is_rejected() {
        assert!(MqttBus::connect("mqtt://127.0.0.1:notaport").is_err());
    }

    #[tokio::test]
    async fn publish_resolves_on_broker_acknowledgement() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let bus = MqttBus::builder()
            .broker(format!("mqtt://127.0.0.1:{port}"))
            .client_id("platform_driver_test")
            .build()
            .unwrap();

        let result = timeout(
            Duration::from_secs(5),
            bus.publish(
                "devices/campus/building1/device1/all",
                &Headers::new(Utc::now()),
                &json!([{"temperature": 72.5}, {}]),
            ),
        )
        .await
        .expect("broker never acknowledged the publish");
        assert!(result.is_ok(), "publish failed: {:?}", result.err());
    }

    #[tokio::test]
    async fn silent_broker_hits_confirmation_timeout() {
        // Accepts TCP connections but never speaks MQTT.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let bus = MqttBus::connect(format!("mqtt://127.0.0.1:{port}")).unwrap();
        let gateway =
            PublishGateway::new(Arc::new(bus)).with_confirm_timeout(Duration::from_millis(200));

        let result = gateway
            .publish(
                "devices/campus/building1/device1/all",
                &Headers::new(Utc::now()),
                &json!([{}, {}]),
            )
            .await;

        assert!(matches!(result, Err(PublishError::ConfirmationTimeout { .. })));
        drop(listener);
    }

    #[tokio::test]
    async fn refused_connection_rejects_publish() {
        let bus = MqttBus::connect("mqtt://127.0.0.1:1").unwrap();
        let gateway =
            PublishGateway::new(Arc::new(bus)).with_confirm_timeout(Duration::from_secs(5));

        let result = gateway
            .publish(
                "devices/campus/building1/device1/all",
                &Headers::new(Utc::now()),
                &json!([{}, {}]),
            )
            .await;

        assert!(matches!(result, Err(PublishError::Rejected { .. })));
    }

    #[tokio::test]
    async fn gateway_publishes_through_mqtt() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let bus = MqttBus::connect(format!("mqtt://127.0.0.1:{port}")).unwrap();
        let gateway = PublishGateway::new(Arc::new(bus));

        let result = gateway
            .publish(
                "devices/campus/building1/device1/temperature",
                &Headers::new(Utc::now()),
                &json!([72.5, {"units": "degF", "type": "float", "tz": ""}]),
            )
            .await;
        assert!(result.is_ok());
    }
}

// ============================================================================
// Platform Driver over MQTT
// ============================================================================
//
// The mockforge-mqtt broker does not forward messages between clients, so
// these tests only check that scrapes publish without failures.

mod platform_driver_mqtt {
    use super::*;

    #[tokio::test]
    async fn scrape_publishes_without_failures() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let bus = MqttBus::connect(format!("mqtt://127.0.0.1:{port}")).unwrap();
        let driver = PlatformDriver::builder().bus(Arc::new(bus)).build();
        let mut events = driver.subscribe();
        driver.start().await.unwrap();

        driver
            .configure_device(
                "campus/building1/device1",
                DeviceConfig::new("fake")
                    .with_interval(1.0)
                    .with_driver_config(json!({"registers": [
                        {"point_name": "temperature", "type": "float", "default": 72.5}
                    ]})),
            )
            .await
            .unwrap();

        let completed = timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(DriverEvent::ScrapeCompleted { points, .. }) => break Ok(points),
                    Ok(DriverEvent::PublishFailed { topic, error }) => break Err((topic, error)),
                    Ok(_) => {}
                    Err(e) => panic!("event stream failed: {e}"),
                }
            }
        })
        .await
        .expect("no scrape within 5s");

        assert_eq!(completed, Ok(1));
        driver.shutdown().await;
    }
}
