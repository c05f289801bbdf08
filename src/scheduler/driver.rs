// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-device scheduler.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use super::PublishFlags;
use super::timing::{find_starting_datetime, next_wake, until};
use crate::error::InterfaceError;
use crate::event::{DriverEvent, EventBus};
use crate::interface::{DeviceInterface, PointErrors, PointMeta, PointValues};
use crate::probe::ScrapeProbe;
use crate::protocol::{Headers, PublishGateway};
use crate::topic::TopicLayout;

/// Default polling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Static settings of a device driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    /// Polling interval.
    pub interval: Duration,
    /// Timezone reported in point metadata.
    pub timezone: String,
    /// Point toggled by [`DeviceDriver::heart_beat`].
    pub heart_beat_point: Option<String>,
    /// Publish modes.
    pub publish: PublishFlags,
    /// Topic bases.
    pub layout: TopicLayout,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timezone: String::new(),
            heart_beat_point: None,
            publish: PublishFlags::default(),
            layout: TopicLayout::default(),
        }
    }
}

/// Shared services every device driver publishes and reports through.
#[derive(Debug, Clone)]
pub struct SchedulerServices {
    /// Gateway all publishes go through.
    pub gateway: Arc<PublishGateway>,
    /// Scrape accounting.
    pub probe: Arc<ScrapeProbe>,
    /// Health and activity events.
    pub events: EventBus,
}

impl SchedulerServices {
    /// Creates services with a disabled probe and a fresh event bus.
    #[must_use]
    pub fn new(gateway: Arc<PublishGateway>) -> Self {
        Self {
            gateway,
            probe: Arc::new(ScrapeProbe::disabled()),
            events: EventBus::new(),
        }
    }

    /// Sets the scrape probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<ScrapeProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Sets the event bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

/// Polls one device and republishes its readings.
///
/// The driver runs a timer task while started. Each wake arms the next one
/// before scraping, and every scrape runs in its own task, so a slow device
/// never delays its own schedule. Stopping the driver cancels the pending
/// wake; a scrape already in flight still completes.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use platform_driver::interface::{MemoryInterface, MemoryRegister, ValueKind};
/// use platform_driver::protocol::{LocalBus, PublishGateway};
/// use platform_driver::scheduler::{DeviceDriver, DriverSettings, SchedulerServices};
/// use serde_json::json;
///
/// # async fn example() {
/// let bus = LocalBus::new();
/// let mut rx = bus.subscribe();
/// let services = SchedulerServices::new(Arc::new(PublishGateway::new(Arc::new(bus))));
///
/// let interface = MemoryInterface::new(vec![
///     MemoryRegister::new("temperature", ValueKind::Float, json!(72.5)),
/// ]);
/// let driver = DeviceDriver::new(
///     "campus/building1/device1",
///     Arc::new(interface),
///     DriverSettings::default(),
///     services,
/// );
///
/// driver.scrape_and_publish(chrono::Utc::now()).await;
/// assert_eq!(rx.recv().await.unwrap().topic, "devices/campus/building1/device1/all");
/// # }
/// ```
pub struct DeviceDriver {
    path: String,
    topic: String,
    interface: Arc<dyn DeviceInterface>,
    meta: BTreeMap<String, PointMeta>,
    interval: Duration,
    heart_beat_point: Option<String>,
    layout: TopicLayout,
    publish: RwLock<PublishFlags>,
    offset: Mutex<Duration>,
    heart_beat_value: AtomicBool,
    services: SchedulerServices,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceDriver {
    /// Creates a stopped driver for the device at `path`.
    ///
    /// Point metadata is captured from the interface's register
    /// definitions.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        interface: Arc<dyn DeviceInterface>,
        settings: DriverSettings,
        services: SchedulerServices,
    ) -> Self {
        let path = path.into();
        let meta = interface
            .register_names()
            .into_iter()
            .filter_map(|name| {
                let register = interface.register(&name)?;
                Some((name, PointMeta::from_register(&register, &settings.timezone)))
            })
            .collect();

        Self {
            topic: settings.layout.device_topic(&path),
            path,
            interface,
            meta,
            interval: settings.interval,
            heart_beat_point: settings.heart_beat_point,
            layout: settings.layout,
            publish: RwLock::new(settings.publish),
            offset: Mutex::new(Duration::ZERO),
            heart_beat_value: AtomicBool::new(false),
            services,
            timer: Mutex::new(None),
        }
    }

    /// Returns the logical device path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the depth-first topic of the device.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the polling interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the offset of the current schedule.
    #[must_use]
    pub fn offset(&self) -> Duration {
        *self.offset.lock()
    }

    /// Returns the point metadata.
    #[must_use]
    pub fn meta(&self) -> &BTreeMap<String, PointMeta> {
        &self.meta
    }

    /// Returns the wrapped interface.
    #[must_use]
    pub fn interface(&self) -> &Arc<dyn DeviceInterface> {
        &self.interface
    }

    /// Returns the current publish modes.
    #[must_use]
    pub fn publish_flags(&self) -> PublishFlags {
        *self.publish.read()
    }

    /// Replaces the publish modes; takes effect on the next publish.
    pub fn set_publish_flags(&self, flags: PublishFlags) {
        *self.publish.write() = flags;
    }

    /// Returns `true` while a wake is pending.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Starts polling with the given offset.
    ///
    /// Any pending wake is cancelled first. Must be called from within a
    /// tokio runtime.
    pub fn start(self: &Arc<Self>, offset: Duration) {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *self.offset.lock() = offset;

        tracing::debug!(
            device = %self.path,
            offset = ?offset,
            interval = ?self.interval,
            "Starting scrape schedule"
        );
        *timer = Some(tokio::spawn(Arc::clone(self).run_schedule(offset)));
    }

    /// Moves the schedule to a new offset.
    pub fn update_scrape_schedule(self: &Arc<Self>, offset: Duration) {
        tracing::debug!(device = %self.path, offset = ?offset, "Updating scrape schedule");
        self.start(offset);
    }

    /// Cancels the pending wake.
    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
            tracing::debug!(device = %self.path, "Scrape schedule cancelled");
        }
    }

    async fn run_schedule(self: Arc<Self>, offset: Duration) {
        let mut wake = find_starting_datetime(Utc::now(), self.interval, offset);
        loop {
            tracing::debug!(device = %self.path, next = %wake, "Next scrape scheduled");
            tokio::time::sleep(until(wake, Utc::now())).await;

            let next = next_wake(wake, Utc::now(), self.interval, offset);
            let driver = Arc::clone(&self);
            tokio::spawn(async move { driver.scrape_and_publish(wake).await });
            wake = next;
        }
    }

    /// Scrapes the device once and publishes the readings.
    ///
    /// `wake` is the scheduled time of this scrape; the synchronized
    /// timestamp of the messages is `wake` minus the device offset. Failures
    /// are logged and reported as events, never returned.
    pub async fn scrape_and_publish(&self, wake: DateTime<Utc>) {
        self.services.probe.scrape_starting(&self.topic);
        self.services.events.record(DriverEvent::ScrapeStarted {
            device: self.path.clone(),
        });

        self.scrape_cycle(wake).await;

        self.services.probe.scrape_ending(&self.topic);
    }

    async fn scrape_cycle(&self, wake: DateTime<Utc>) {
        tracing::debug!(device = %self.path, "Scraping device");

        let results = match self.interface.scrape_all().await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(device = %self.path, error = %e, "Failed to scrape device");
                self.services.events.record(DriverEvent::ScrapeFailed {
                    device: self.path.clone(),
                    error: e.to_string(),
                });
                return;
            }
        };

        for point in self.interface.register_names() {
            if !results.contains_key(&point) {
                let topic = self.layout.depth_first(&self.path, &point);
                tracing::error!(topic = %topic, "Failed to scrape point");
                self.services.events.record(DriverEvent::PointScrapeFailed {
                    device: self.path.clone(),
                    topic,
                });
            }
        }

        if results.is_empty() {
            tracing::debug!(device = %self.path, "Scrape returned no values");
            return;
        }

        let offset = TimeDelta::from_std(self.offset()).unwrap_or(TimeDelta::zero());
        let headers = Headers::new(Utc::now()).with_synchronized(wake - offset);
        self.publish_values(&headers, &results, &self.meta).await;

        self.services.events.record(DriverEvent::ScrapeCompleted {
            device: self.path.clone(),
            points: results.len(),
        });
    }

    /// Publishes values reported by the device itself, outside the schedule.
    ///
    /// Honors the same publish modes as a scheduled scrape. The messages
    /// carry no synchronized timestamp.
    pub async fn publish_cov_value(&self, values: &PointValues) {
        tracing::debug!(device = %self.path, points = values.len(), "Publishing change of value");
        let meta: BTreeMap<String, PointMeta> = self
            .meta
            .iter()
            .filter(|(point, _)| values.contains_key(*point))
            .map(|(point, meta)| (point.clone(), meta.clone()))
            .collect();
        let headers = Headers::new(Utc::now());
        self.publish_values(&headers, values, &meta).await;
    }

    async fn publish_values(
        &self,
        headers: &Headers,
        values: &PointValues,
        meta: &BTreeMap<String, PointMeta>,
    ) {
        let flags = self.publish_flags();

        if flags.any_point() {
            for (point, value) in values {
                let paths = self.layout.paths(&self.path, point);
                let message = json!([value, meta.get(point)]);

                if flags.depth_first {
                    self.publish(&paths.depth_first, headers, &message).await;
                }
                if flags.breadth_first {
                    self.publish(&paths.breadth_first, headers, &message).await;
                }
            }
        }

        if flags.any_all() {
            let paths = self.layout.all_paths(&self.path);
            let message = json!([values, meta]);

            if flags.depth_first_all {
                self.publish(&paths.depth_first, headers, &message).await;
            }
            if flags.breadth_first_all {
                self.publish(&paths.breadth_first, headers, &message).await;
            }
        }
    }

    async fn publish(&self, topic: &str, headers: &Headers, message: &Value) {
        if let Err(e) = self.services.gateway.publish(topic, headers, message).await {
            self.services.events.record(DriverEvent::PublishFailed {
                topic: topic.to_string(),
                error: e.to_string(),
            });
        }
    }

    /// Toggles the heartbeat point.
    ///
    /// Does nothing if no heartbeat point is configured.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the write fails.
    pub async fn heart_beat(&self) -> Result<(), InterfaceError> {
        let Some(point) = &self.heart_beat_point else {
            return Ok(());
        };

        let value = !self.heart_beat_value.fetch_xor(true, Ordering::SeqCst);
        tracing::debug!(device = %self.path, value, "Sending heartbeat");
        self.interface
            .set_point(point, json!(u8::from(value)))
            .await
            .map(|_| ())
    }

    /// Reads a point.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the read fails.
    pub async fn get_point(&self, point: &str) -> Result<Value, InterfaceError> {
        self.interface.get_point(point).await
    }

    /// Writes a point.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the write fails.
    pub async fn set_point(&self, point: &str, value: Value) -> Result<Value, InterfaceError> {
        self.interface.set_point(point, value).await
    }

    /// Reads every point at once.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the scrape fails.
    pub async fn scrape_all(&self) -> Result<PointValues, InterfaceError> {
        self.interface.scrape_all().await
    }

    /// Reads several points.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the device fails as a whole.
    pub async fn get_multiple_points(
        &self,
        points: &[String],
    ) -> Result<(PointValues, PointErrors), InterfaceError> {
        self.interface.get_multiple_points(points).await
    }

    /// Writes several points.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the device fails as a whole.
    pub async fn set_multiple_points(
        &self,
        values: PointValues,
    ) -> Result<PointErrors, InterfaceError> {
        self.interface.set_multiple_points(values).await
    }

    /// Restores a point to its default.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the revert fails.
    pub async fn revert_point(&self, point: &str) -> Result<(), InterfaceError> {
        self.interface.revert_point(point).await
    }

    /// Restores every writable point to its default.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the revert fails.
    pub async fn revert_all(&self) -> Result<(), InterfaceError> {
        self.interface.revert_all().await
    }
}

impl fmt::Debug for DeviceDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDriver")
            .field("path", &self.path)
            .field("interval", &self.interval)
            .field("offset", &self.offset())
            .field("publish", &self.publish_flags())
            .field("scheduled", &self.is_scheduled())
            .finish_non_exhaustive()
    }
}
