// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The platform driver orchestrator.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;

use super::device_config::{DEVICES_PREFIX, DeviceConfig, PLATFORM_CONFIG, PlatformConfig};
use crate::error::{ConfigError, Error, Result};
use crate::event::{DriverEvent, EventBus};
use crate::interface::{DeviceInterface, DriverContext, DriverRegistry, PointErrors, PointValues};
use crate::overrides::{OVERRIDE_PATTERNS_CONFIG, OverrideManager};
use crate::probe::{ProbeSummary, ScrapeProbe};
use crate::protocol::{LocalBus, MessageBus, PublishGateway};
use crate::scheduler::{DeviceDriver, DriverSettings, SchedulerServices, compute_offset};
use crate::store::{ConfigAction, ConfigChange, ConfigStore, MemoryConfigStore};

struct DeviceRecord {
    config: DeviceConfig,
    driver: Arc<DeviceDriver>,
    slot: usize,
}

struct DriverState {
    config: PlatformConfig,
    services: SchedulerServices,
    devices: BTreeMap<String, DeviceRecord>,
    group_counts: HashMap<usize, usize>,
}

impl DriverState {
    fn next_slot(&mut self, group: usize) -> usize {
        let count = self.group_counts.entry(group).or_default();
        let slot = *count;
        *count += 1;
        slot
    }

    /// Creates, starts and registers the driver of a device.
    fn launch(
        &mut self,
        path: String,
        config: DeviceConfig,
        interface: Arc<dyn DeviceInterface>,
    ) -> Arc<DeviceDriver> {
        let group = config.group;
        let slot = self.next_slot(group);
        let settings = DriverSettings {
            interval: config.interval(),
            timezone: config.timezone.clone(),
            heart_beat_point: config.heart_beat_point.clone(),
            publish: config.publish_flags(self.config.publish_flags()),
            layout: self.config.layout(),
        };
        let offset = compute_offset(
            slot,
            self.config.scrape_quantum(),
            group,
            self.config.group_quantum(),
            settings.interval,
        );

        let driver = Arc::new(DeviceDriver::new(
            path.clone(),
            interface,
            settings,
            self.services.clone(),
        ));
        driver.start(offset);

        tracing::info!(device = %path, slot, group, offset = ?offset, "Device driver started");
        self.devices.insert(
            path,
            DeviceRecord {
                config,
                driver: Arc::clone(&driver),
                slot,
            },
        );
        driver
    }

    /// Reassigns slots in registry order and moves every schedule.
    fn reslot(&mut self) {
        let quantum = self.config.scrape_quantum();
        let group_quantum = self.config.group_quantum();
        let mut counts: HashMap<usize, usize> = HashMap::new();

        for (path, record) in &mut self.devices {
            let group = record.config.group;
            let count = counts.entry(group).or_default();
            record.slot = *count;
            *count += 1;

            let offset = compute_offset(
                record.slot,
                quantum,
                group,
                group_quantum,
                record.driver.interval(),
            );
            tracing::debug!(
                device = %path,
                slot = record.slot,
                offset = ?offset,
                "Rescheduling device"
            );
            record.driver.update_scrape_schedule(offset);
        }

        self.group_counts = counts;
    }
}

fn build_services(
    bus: &Arc<dyn MessageBus>,
    config: &PlatformConfig,
    events: &EventBus,
) -> SchedulerServices {
    let gateway =
        PublishGateway::new(Arc::clone(bus)).with_confirm_timeout(config.confirm_timeout());
    let probe = if config.scalability_test {
        ScrapeProbe::new(config.scalability_test_iterations)
    } else {
        ScrapeProbe::disabled()
    };
    SchedulerServices::new(Arc::new(gateway))
        .with_probe(Arc::new(probe))
        .with_events(events.clone())
}

struct Inner {
    store: Arc<dyn ConfigStore>,
    bus: Arc<dyn MessageBus>,
    registry: DriverRegistry,
    events: EventBus,
    overrides: OverrideManager,
    state: RwLock<DriverState>,
    listener: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

/// Owns every device driver and the caller-facing operations.
///
/// The platform driver follows the configuration store: the platform
/// configuration (`"config"`) sets scheduling and publish defaults, and
/// each `"devices/<path>"` entry creates, replaces or removes the driver of
/// one device. Devices of the same group get consecutive slots, spreading
/// their scrapes across the interval.
///
/// Every device-targeted call fails with [`Error::DeviceNotFound`] for an
/// unknown device and with [`Error::DeviceOverridden`] while an override
/// pattern selects the device.
///
/// Cloning is cheap; clones share state.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use platform_driver::PlatformDriver;
/// use platform_driver::protocol::LocalBus;
/// use platform_driver::store::{ConfigStore, MemoryConfigStore};
/// use serde_json::json;
///
/// # async fn example() -> platform_driver::Result<()> {
/// let store = Arc::new(MemoryConfigStore::new());
/// store.set("devices/campus/building1/device1", json!({
///     "driver_type": "fake",
///     "interval": 60,
///     "driver_config": {"registers": [
///         {"point_name": "temperature", "type": "float", "units": "degF", "default": 72.5}
///     ]}
/// })).await?;
///
/// let driver = PlatformDriver::builder()
///     .store(store)
///     .bus(Arc::new(LocalBus::new()))
///     .build();
/// driver.start().await?;
///
/// let value = driver.get_point("campus/building1/device1", "temperature").await?;
/// assert_eq!(value, json!(72.5));
///
/// driver.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PlatformDriver {
    inner: Arc<Inner>,
}

impl PlatformDriver {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> PlatformDriverBuilder {
        PlatformDriverBuilder::default()
    }

    /// Returns the device path configured under `config_name`.
    ///
    /// The first segment of the configuration name is dropped.
    ///
    /// ```
    /// use platform_driver::PlatformDriver;
    ///
    /// assert_eq!(PlatformDriver::derive_device_topic("devices/campus/rtu1"), "campus/rtu1");
    /// assert_eq!(PlatformDriver::derive_device_topic("mytopic/foobar_topic"), "foobar_topic");
    /// ```
    #[must_use]
    pub fn derive_device_topic(config_name: &str) -> String {
        config_name
            .split_once('/')
            .map(|(_, path)| path.to_string())
            .unwrap_or_default()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Loads the stored configuration and starts following changes.
    ///
    /// Reads the platform configuration, every device configuration and the
    /// persisted overrides. Configuration problems of individual devices are
    /// logged and leave that device unregistered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the store cannot be read.
    pub async fn start(&self) -> Result<()> {
        let changes = self.inner.store.subscribe();

        if let Some(value) = self.inner.store.get(PLATFORM_CONFIG).await? {
            match PlatformConfig::from_value(&value) {
                Ok(config) => self.configure_main(config).await,
                Err(e) => tracing::error!(error = %e, "Ignoring invalid platform configuration"),
            }
        }

        for name in self.inner.store.list().await? {
            if !name.starts_with(DEVICES_PREFIX) {
                continue;
            }
            if let Some(value) = self.inner.store.get(&name).await? {
                self.apply_device_config(&name, &value).await;
            }
        }

        if let Some(value) = self.inner.store.get(OVERRIDE_PATTERNS_CONFIG).await? {
            if let Err(e) = self.inner.overrides.restore(&value).await {
                tracing::error!(error = %e, "Failed to restore overrides");
            }
        }

        let listener = tokio::spawn(self.clone().follow_changes(changes));
        if let Some(previous) = self.inner.listener.lock().replace(listener) {
            previous.abort();
        }

        let heartbeat = self.inner.state.read().await.config.heartbeat();
        self.restart_heartbeat(heartbeat);

        tracing::info!(
            devices = self.inner.state.read().await.devices.len(),
            "Platform driver started"
        );
        Ok(())
    }

    /// Stops every schedule, the heartbeat, the change listener and every
    /// override expiry.
    pub async fn shutdown(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        self.restart_heartbeat(None);

        for record in self.inner.state.read().await.devices.values() {
            record.driver.stop();
        }
        self.inner.overrides.disarm();

        tracing::info!("Platform driver stopped");
    }

    async fn follow_changes(self, mut changes: broadcast::Receiver<ConfigChange>) {
        loop {
            match changes.recv().await {
                Ok(change) => self.handle_config_change(change).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Configuration listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Configuration listener stopped");
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Routes a configuration change to the right handler.
    pub async fn handle_config_change(&self, change: ConfigChange) {
        tracing::debug!(name = %change.name, action = ?change.action, "Configuration changed");

        if change.name == PLATFORM_CONFIG {
            let config = match (&change.action, &change.contents) {
                (ConfigAction::Delete, _) | (_, None) => PlatformConfig::default(),
                (_, Some(value)) => match PlatformConfig::from_value(value) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::error!(error = %e, "Ignoring invalid platform configuration");
                        return;
                    }
                },
            };
            self.configure_main(config).await;
        } else if change.name.starts_with(DEVICES_PREFIX) {
            match (&change.action, &change.contents) {
                (ConfigAction::Delete, _) | (_, None) => {
                    self.stop_driver(&Self::derive_device_topic(&change.name))
                        .await;
                }
                (_, Some(value)) => self.apply_device_config(&change.name, value).await,
            }
        }
    }

    async fn apply_device_config(&self, name: &str, value: &Value) {
        let path = Self::derive_device_topic(name);
        let result = match DeviceConfig::from_value(name, value) {
            Ok(config) => self.configure_device(&path, config).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            tracing::error!(device = %path, error = %e, "Failed to configure device");
            self.stop_driver(&path).await;
        }
    }

    /// Applies the platform configuration.
    ///
    /// A change of the scrape or group quantum re-slots every device. A
    /// change of topic bases, confirmation timeout or probe settings
    /// recreates every device driver. Publish defaults are re-applied to
    /// every device.
    pub async fn configure_main(&self, config: PlatformConfig) {
        let mut state = self.inner.state.write().await;
        let previous = std::mem::replace(&mut state.config, config);
        let current = state.config.clone();

        let rebuild = previous.layout() != current.layout()
            || previous.confirm_timeout() != current.confirm_timeout()
            || previous.scalability_test != current.scalability_test
            || previous.scalability_test_iterations != current.scalability_test_iterations;
        let reslot = previous.scrape_quantum() != current.scrape_quantum()
            || previous.group_quantum() != current.group_quantum();

        if rebuild {
            tracing::info!("Publish settings changed, restarting every device");
            state.services = build_services(&self.inner.bus, &current, &self.inner.events);
            state.group_counts.clear();
            let records = std::mem::take(&mut state.devices);
            for (path, record) in records {
                record.driver.stop();
                let interface = Arc::clone(record.driver.interface());
                state.launch(path, record.config, interface);
            }
        } else if reslot {
            tracing::info!(
                quantum = ?current.scrape_quantum(),
                group_quantum = ?current.group_quantum(),
                "Scrape offsets changed, rescheduling every device"
            );
            state.reslot();
        }

        let defaults = current.publish_flags();
        for record in state.devices.values() {
            record
                .driver
                .set_publish_flags(record.config.publish_flags(defaults));
        }
        drop(state);

        if previous.heartbeat() != current.heartbeat() && self.inner.listener.lock().is_some() {
            self.restart_heartbeat(current.heartbeat());
        }
    }

    /// Creates or replaces the driver of a device.
    ///
    /// Any existing driver for `path` is stopped first. The new driver gets
    /// the next slot of its group and starts polling immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDriverType`] if no constructor is registered
    /// for the driver type, [`Error::Interface`] if the constructor fails, or
    /// [`Error::Config`] if a referenced registry configuration is missing.
    pub async fn configure_device(&self, path: &str, config: DeviceConfig) -> Result<()> {
        let registry_config = self.resolve_registry_config(&config).await?;
        let interface = self.inner.registry.create(
            &config.driver_type,
            &DriverContext {
                device_path: path,
                driver_config: &config.driver_config,
                registry_config: registry_config.as_deref(),
            },
        )?;

        let mut state = self.inner.state.write().await;
        if let Some(previous) = state.devices.remove(path) {
            previous.driver.stop();
            tracing::info!(device = %path, "Replacing device driver");
        }
        state.launch(path.to_string(), config, interface);
        drop(state);

        self.inner.overrides.device_added(path);
        self.inner.events.record(DriverEvent::DeviceAdded {
            device: path.to_string(),
        });
        Ok(())
    }

    async fn resolve_registry_config(&self, config: &DeviceConfig) -> Result<Option<String>> {
        let Some(reference) = config.registry_reference() else {
            return Ok(config.registry_config.clone());
        };

        let value = self.inner.store.get(reference).await?.ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "registry_config",
                message: format!("no configuration named {reference}"),
            }
        })?;

        match value {
            Value::String(text) => Ok(Some(text)),
            other => Ok(Some(other.to_string())),
        }
    }

    /// Stops and forgets the driver of a device.
    ///
    /// Unknown paths are ignored.
    pub async fn stop_driver(&self, path: &str) {
        let Some(record) = self.inner.state.write().await.devices.remove(path) else {
            tracing::debug!(device = %path, "No driver to stop");
            return;
        };

        record.driver.stop();
        self.inner.overrides.device_removed(path);
        tracing::info!(device = %path, "Device driver stopped");
        self.inner.events.record(DriverEvent::DeviceRemoved {
            device: path.to_string(),
        });
    }

    // =========================================================================
    // Heartbeat
    // =========================================================================

    fn restart_heartbeat(&self, period: Option<Duration>) {
        let mut slot = self.inner.heartbeat.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        if let Some(period) = period {
            tracing::debug!(period = ?period, "Starting periodic heartbeat");
            let driver = self.clone();
            *slot = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    driver.heart_beat_all().await;
                }
            }));
        }
    }

    /// Toggles the heartbeat point of every device that is not overridden.
    pub async fn heart_beat_all(&self) {
        let drivers: Vec<Arc<DeviceDriver>> = self
            .inner
            .state
            .read()
            .await
            .devices
            .values()
            .map(|record| Arc::clone(&record.driver))
            .collect();

        for driver in drivers {
            if self.inner.overrides.is_overridden(driver.path()) {
                continue;
            }
            if let Err(e) = driver.heart_beat().await {
                tracing::warn!(device = %driver.path(), error = %e, "Heartbeat failed");
            }
        }
    }

    // =========================================================================
    // Device operations
    // =========================================================================

    async fn registered(&self, path: &str) -> Result<Arc<DeviceDriver>> {
        self.inner
            .state
            .read()
            .await
            .devices
            .get(path)
            .map(|record| Arc::clone(&record.driver))
            .ok_or_else(|| Error::DeviceNotFound(path.to_string()))
    }

    async fn writable(&self, path: &str) -> Result<Arc<DeviceDriver>> {
        let driver = self.registered(path).await?;
        if self.inner.overrides.is_overridden(path) {
            return Err(Error::DeviceOverridden(path.to_string()));
        }
        Ok(driver)
    }

    /// Reads a point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`], [`Error::DeviceOverridden`] or
    /// [`Error::Interface`].
    pub async fn get_point(&self, path: &str, point: &str) -> Result<Value> {
        Ok(self.writable(path).await?.get_point(point).await?)
    }

    /// Writes a point and returns the value read back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`], [`Error::DeviceOverridden`] or
    /// [`Error::Interface`].
    pub async fn set_point(&self, path: &str, point: &str, value: Value) -> Result<Value> {
        Ok(self.writable(path).await?.set_point(point, value).await?)
    }

    /// Reads every point of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`], [`Error::DeviceOverridden`] or
    /// [`Error::Interface`].
    pub async fn scrape_all(&self, path: &str) -> Result<PointValues> {
        Ok(self.writable(path).await?.scrape_all().await?)
    }

    /// Reads several points of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`], [`Error::DeviceOverridden`] or
    /// [`Error::Interface`].
    pub async fn get_multiple_points(
        &self,
        path: &str,
        points: &[String],
    ) -> Result<(PointValues, PointErrors)> {
        Ok(self
            .writable(path)
            .await?
            .get_multiple_points(points)
            .await?)
    }

    /// Writes several points of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`], [`Error::DeviceOverridden`] or
    /// [`Error::Interface`].
    pub async fn set_multiple_points(&self, path: &str, values: PointValues) -> Result<PointErrors> {
        Ok(self
            .writable(path)
            .await?
            .set_multiple_points(values)
            .await?)
    }

    /// Restores a point to its default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`], [`Error::DeviceOverridden`] or
    /// [`Error::Interface`].
    pub async fn revert_point(&self, path: &str, point: &str) -> Result<()> {
        Ok(self.writable(path).await?.revert_point(point).await?)
    }

    /// Restores every writable point of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`], [`Error::DeviceOverridden`] or
    /// [`Error::Interface`].
    pub async fn revert_device(&self, path: &str) -> Result<()> {
        Ok(self.writable(path).await?.revert_all().await?)
    }

    /// Toggles the heartbeat point of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`], [`Error::DeviceOverridden`] or
    /// [`Error::Interface`].
    pub async fn heart_beat(&self, path: &str) -> Result<()> {
        Ok(self.writable(path).await?.heart_beat().await?)
    }

    /// Publishes values a device reported on its own.
    ///
    /// Overrides do not suppress these publishes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown device.
    pub async fn forward_cov_value(&self, path: &str, values: &PointValues) -> Result<()> {
        self.registered(path).await?.publish_cov_value(values).await;
        Ok(())
    }

    // =========================================================================
    // Overrides
    // =========================================================================

    /// Puts every device matching `pattern` under manual control.
    ///
    /// With `failsafe`, every matching device is reverted first; revert
    /// failures are logged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Override`] if the pattern is invalid.
    pub async fn set_override_on(
        &self,
        pattern: &str,
        duration: Option<Duration>,
        failsafe: bool,
    ) -> Result<()> {
        if failsafe {
            for path in self.inner.overrides.matching_devices(pattern)? {
                let Ok(driver) = self.registered(&path).await else {
                    continue;
                };
                if let Err(e) = driver.revert_all().await {
                    tracing::warn!(device = %path, error = %e, "Failsafe revert failed");
                }
            }
        }
        self.inner.overrides.set_override_on(pattern, duration).await
    }

    /// Releases an override.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Override`] if the pattern is not active.
    pub async fn set_override_off(&self, pattern: &str) -> Result<()> {
        self.inner.overrides.set_override_off(pattern).await
    }

    /// Releases every override.
    pub async fn clear_overrides(&self) {
        self.inner.overrides.clear_overrides().await;
    }

    /// Returns the overridden devices in sorted order.
    #[must_use]
    pub fn get_override_devices(&self) -> Vec<String> {
        self.inner.overrides.overridden_devices()
    }

    /// Returns the active override patterns with their expiry.
    #[must_use]
    pub fn get_override_patterns(&self) -> BTreeMap<String, Option<DateTime<Utc>>> {
        self.inner.overrides.patterns()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Subscribes to driver events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the override manager.
    #[must_use]
    pub fn overrides(&self) -> &OverrideManager {
        &self.inner.overrides
    }

    /// Returns the registered device paths in sorted order.
    pub async fn device_paths(&self) -> Vec<String> {
        self.inner.state.read().await.devices.keys().cloned().collect()
    }

    /// Returns the driver of a device.
    pub async fn driver(&self, path: &str) -> Option<Arc<DeviceDriver>> {
        self.registered(path).await.ok()
    }

    /// Returns the slot of a device within its group.
    pub async fn slot(&self, path: &str) -> Option<usize> {
        self.inner
            .state
            .read()
            .await
            .devices
            .get(path)
            .map(|record| record.slot)
    }

    /// Returns the current platform configuration.
    pub async fn config(&self) -> PlatformConfig {
        self.inner.state.read().await.config.clone()
    }

    /// Returns the scalability probe summary, if the probe has completed a run.
    pub async fn probe_summary(&self) -> Option<ProbeSummary> {
        self.inner.state.read().await.services.probe.summary()
    }
}

impl fmt::Debug for PlatformDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformDriver")
            .field("registry", &self.inner.registry)
            .field("overrides", &self.inner.overrides)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`PlatformDriver`].
///
/// Defaults to an in-memory store, an in-process bus and the built-in
/// driver types.
#[derive(Default)]
pub struct PlatformDriverBuilder {
    store: Option<Arc<dyn ConfigStore>>,
    bus: Option<Arc<dyn MessageBus>>,
    registry: Option<DriverRegistry>,
    events: Option<EventBus>,
}

impl PlatformDriverBuilder {
    /// Sets the configuration store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the message bus.
    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets the driver registry.
    #[must_use]
    pub fn registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the event bus.
    #[must_use]
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Builds the platform driver with the default platform configuration.
    #[must_use]
    pub fn build(self) -> PlatformDriver {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryConfigStore::new()));
        let bus = self.bus.unwrap_or_else(|| Arc::new(LocalBus::new()));
        let events = self.events.unwrap_or_default();
        let config = PlatformConfig::default();

        let state = DriverState {
            services: build_services(&bus, &config, &events),
            config,
            devices: BTreeMap::new(),
            group_counts: HashMap::new(),
        };

        PlatformDriver {
            inner: Arc::new(Inner {
                overrides: OverrideManager::new(Arc::clone(&store), events.clone()),
                store,
                bus,
                registry: self.registry.unwrap_or_else(DriverRegistry::with_builtin),
                events,
                state: RwLock::new(state),
                listener: Mutex::new(None),
                heartbeat: Mutex::new(None),
            }),
        }
    }
}

impl fmt::Debug for PlatformDriverBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformDriverBuilder")
            .field("store", &self.store.is_some())
            .field("bus", &self.bus.is_some())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
