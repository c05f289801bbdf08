// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport for the message bus.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ClientError, ConnectionError, EventLoop, MqttOptions, Outgoing, QoS};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::{Headers, MessageBus};
use crate::error::BusError;

/// Default capacity of the client request queue.
const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Pause before polling the event loop again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Message bus publishing over MQTT.
///
/// Each message is sent as a JSON object `{"headers": ..., "message": ...}`
/// on the message topic with QoS 1. A publish resolves when the broker
/// acknowledges it, so the [`PublishGateway`](super::PublishGateway)
/// confirmation timeout bounds the wait. A full client request queue is
/// reported as [`BusError::Busy`]; a connection error fails every publish
/// still waiting for its acknowledgement.
///
/// The background event loop stops when the last clone is dropped.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use platform_driver::protocol::{MqttBus, PublishGateway};
///
/// # async fn example() -> Result<(), platform_driver::error::BusError> {
/// let bus = MqttBus::builder()
///     .broker("mqtt://192.168.1.50:1883")
///     .credentials("driver", "secret")
///     .build()?;
///
/// let gateway = PublishGateway::new(Arc::new(bus));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MqttBus {
    client: AsyncClient,
    connection: Arc<Connection>,
}

/// Publishes waiting for their PubAck.
///
/// Outgoing publishes leave the client in request order, so each
/// `Outgoing::Publish` event takes the oldest queued waiter.
#[derive(Debug, Default)]
struct Acks {
    queued: VecDeque<oneshot::Sender<()>>,
    in_flight: HashMap<u16, oneshot::Sender<()>>,
}

impl Acks {
    fn sent(&mut self, pkid: u16) {
        if let Some(waiter) = self.queued.pop_front() {
            self.in_flight.insert(pkid, waiter);
        }
    }

    fn acknowledged(&mut self, pkid: u16) {
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            let _ = waiter.send(());
        }
    }

    fn fail_all(&mut self) -> usize {
        let failed = self.queued.len() + self.in_flight.len();
        self.queued.clear();
        self.in_flight.clear();
        failed
    }
}

#[derive(Debug)]
struct Connection {
    acks: Arc<Mutex<Acks>>,
    event_loop: AbortHandle,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl MqttBus {
    /// Connects to a broker with default options.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn connect(broker_url: impl Into<String>) -> Result<Self, BusError> {
        Self::builder().broker(broker_url).build()
    }

    /// Returns a builder for custom options.
    #[must_use]
    pub fn builder() -> MqttBusBuilder {
        MqttBusBuilder::default()
    }

    /// Encodes a message as the MQTT payload.
    fn encode(headers: &Headers, payload: &Value) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(&json!({ "headers": headers, "message": payload }))
            .map_err(|e| BusError::Transport(e.to_string()))
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(
        &self,
        topic: &str,
        headers: &Headers,
        payload: &Value,
    ) -> Result<(), BusError> {
        let bytes = Self::encode(headers, payload)?;

        tracing::trace!(topic = %topic, bytes = bytes.len(), "Publishing MQTT message");

        let (waiter, acked) = oneshot::channel();
        {
            // Held across the enqueue so waiters stay in request order.
            let mut acks = self.connection.acks.lock();
            self.client
                .try_publish(topic, QoS::AtLeastOnce, false, bytes)
                .map_err(|e| match e {
                    ClientError::TryRequest(_) => BusError::Busy,
                    other => BusError::Transport(other.to_string()),
                })?;
            acks.queued.push_back(waiter);
        }

        acked
            .await
            .map_err(|_| BusError::Transport("connection lost before acknowledgement".to_string()))
    }
}

/// Builder for an [`MqttBus`].
#[derive(Debug, Default)]
pub struct MqttBusBuilder {
    broker: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    keep_alive: Option<Duration>,
    queue_capacity: Option<usize>,
}

impl MqttBusBuilder {
    /// Sets the MQTT broker URL.
    #[must_use]
    pub fn broker(mut self, broker: impl Into<String>) -> Self {
        self.broker = Some(broker.into());
        self
    }

    /// Sets authentication credentials for the MQTT broker.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets a custom client ID.
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = Some(duration);
        self
    }

    /// Sets how many requests may be queued before publishes report busy.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Builds the bus and spawns its event loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the broker is missing or its URL is invalid.
    pub fn build(self) -> Result<MqttBus, BusError> {
        let broker = self
            .broker
            .ok_or_else(|| BusError::Transport("broker is required".to_string()))?;

        let (host, port) = parse_mqtt_url(&broker)?;

        let client_id = self
            .client_id
            .unwrap_or_else(|| format!("platform_driver_{}", uuid::Uuid::new_v4().simple()));

        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(self.keep_alive.unwrap_or(Duration::from_secs(30)));
        mqtt_options.set_clean_session(true);

        if let (Some(username), Some(password)) = (self.username, self.password) {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(
            mqtt_options,
            self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
        );

        let acks = Arc::new(Mutex::new(Acks::default()));
        let task = tokio::spawn(drive_event_loop(event_loop, Arc::clone(&acks)));

        Ok(MqttBus {
            client,
            connection: Arc::new(Connection {
                acks,
                event_loop: task.abort_handle(),
            }),
        })
    }
}

/// Parses an MQTT URL into host and port.
fn parse_mqtt_url(url: &str) -> Result<(String, u16), BusError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| BusError::Transport(format!("invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    if host.is_empty() {
        return Err(BusError::Transport(format!("invalid broker address: {url}")));
    }

    Ok((host, port))
}

/// Drives the MQTT connection in the background.
///
/// Outgoing publishes only leave the client while the event loop is polled.
/// Connection errors fail the pending publishes and polling resumes after a
/// short pause, which makes rumqttc reconnect. The loop ends once every
/// client handle is gone.
async fn drive_event_loop(mut event_loop: EventLoop, acks: Arc<Mutex<Acks>>) {
    use rumqttc::{Event, Packet};

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::info!(?connack, "MQTT bus connected");
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                acks.lock().sent(pkid);
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                tracing::trace!(pkid = ack.pkid, "MQTT publish acknowledged");
                acks.lock().acknowledged(ack.pkid);
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => {
                tracing::debug!("MQTT bus closed");
                break;
            }
            Err(e) => {
                let failed = acks.lock().fail_all();
                tracing::error!(error = %e, failed, "MQTT event loop error");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
