// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Active override patterns and the devices they cover.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::AbortHandle;

use super::OverridePattern;
use crate::error::{OverrideError, Result};
use crate::event::{DriverEvent, EventBus};
use crate::store::ConfigStore;

/// Configuration name under which active overrides are persisted.
pub const OVERRIDE_PATTERNS_CONFIG: &str = "override_patterns";

/// Persisted marker of an override without expiry.
const INDEFINITE: &str = "0.0";

struct OverrideEntry {
    pattern: OverridePattern,
    expires: Option<DateTime<Utc>>,
    matched: BTreeSet<String>,
}

#[derive(Default)]
struct OverrideState {
    entries: BTreeMap<String, OverrideEntry>,
    index: BTreeMap<String, usize>,
    devices: BTreeSet<String>,
    timers: HashMap<String, AbortHandle>,
}

impl OverrideState {
    fn insert(&mut self, pattern: OverridePattern, expires: Option<DateTime<Utc>>) {
        let matched: BTreeSet<String> = self
            .devices
            .iter()
            .filter(|device| pattern.matches(device))
            .cloned()
            .collect();
        for device in &matched {
            *self.index.entry(device.clone()).or_default() += 1;
        }
        self.entries.insert(
            pattern.as_str().to_string(),
            OverrideEntry {
                pattern,
                expires,
                matched,
            },
        );
    }

    fn remove(&mut self, pattern: &str) -> Option<OverrideEntry> {
        let entry = self.entries.remove(pattern)?;
        for device in &entry.matched {
            if let Some(count) = self.index.get_mut(device) {
                *count -= 1;
                if *count == 0 {
                    self.index.remove(device);
                }
            }
        }
        Some(entry)
    }

    fn set_expiry(&mut self, pattern: &str, expires: Option<DateTime<Utc>>) {
        if let Some(entry) = self.entries.get_mut(pattern) {
            entry.expires = expires;
        }
    }

    fn cancel_timer(&mut self, pattern: &str) {
        if let Some(handle) = self.timers.remove(pattern) {
            handle.abort();
        }
    }

    fn snapshot(&self) -> Value {
        let patterns: Map<String, Value> = self
            .entries
            .iter()
            .map(|(pattern, entry)| {
                let expiry = entry.expires.map_or_else(
                    || INDEFINITE.to_string(),
                    |t| t.to_rfc3339_opts(SecondsFormat::Micros, false),
                );
                (pattern.clone(), Value::String(expiry))
            })
            .collect();
        Value::Object(patterns)
    }
}

struct Inner {
    state: Mutex<OverrideState>,
    writer: tokio::sync::Mutex<()>,
    store: Arc<dyn ConfigStore>,
    events: EventBus,
}

/// Tracks which devices are under manual override.
///
/// Each active pattern selects the registered devices whose path it
/// matches (see [`OverridePattern`]). A device is overridden while at least
/// one active pattern selects it. Patterns are either indefinite or expire
/// after a duration.
///
/// The pattern set is written to the configuration store under
/// [`OVERRIDE_PATTERNS_CONFIG`] whenever an indefinite override is turned
/// on and on every removal, so it can be restored after a restart. Mutating
/// operations never interleave with each other.
///
/// Cloning is cheap; clones share state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use platform_driver::event::EventBus;
/// use platform_driver::overrides::OverrideManager;
/// use platform_driver::store::MemoryConfigStore;
///
/// # async fn example() -> platform_driver::Result<()> {
/// let overrides = OverrideManager::new(Arc::new(MemoryConfigStore::new()), EventBus::new());
/// overrides.device_added("campus/building1/device1");
///
/// overrides.set_override_on("campus/building1/*", None).await?;
/// assert!(overrides.is_overridden("campus/building1/device1"));
///
/// overrides.set_override_off("campus/building1/*").await?;
/// assert!(!overrides.is_overridden("campus/building1/device1"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OverrideManager {
    inner: Arc<Inner>,
}

impl OverrideManager {
    /// Creates a manager with no active overrides.
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(OverrideState::default()),
                writer: tokio::sync::Mutex::new(()),
                store,
                events,
            }),
        }
    }

    /// Activates an override.
    ///
    /// Without a `duration` the override lasts until turned off. With one it
    /// expires on its own and is not persisted by this call.
    ///
    /// Turning on a pattern that is already active never creates a second
    /// entry: an indefinite request makes the override indefinite, and a
    /// timed request only pushes the expiry of a timed override later.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::InvalidPattern`] if the pattern is empty or
    /// malformed.
    pub async fn set_override_on(&self, pattern: &str, duration: Option<Duration>) -> Result<()> {
        let pattern = OverridePattern::new(pattern)?;
        let key = pattern.as_str().to_string();
        let _writer = self.inner.writer.lock().await;

        let expires = duration.map(|d| {
            Utc::now()
                .checked_add_signed(TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });

        let changed = {
            let mut state = self.inner.state.lock();
            let current = state.entries.get(&key).map(|entry| entry.expires);
            match (current, expires) {
                (None, _) => {
                    state.insert(pattern, expires);
                    true
                }
                (Some(Some(_)), None) => {
                    state.set_expiry(&key, None);
                    state.cancel_timer(&key);
                    true
                }
                (Some(Some(current)), Some(requested)) if requested > current => {
                    state.set_expiry(&key, Some(requested));
                    true
                }
                _ => false,
            }
        };

        if !changed {
            tracing::debug!(pattern = %key, "Override already active");
            return Ok(());
        }

        if let (Some(d), Some(at)) = (duration, expires) {
            self.arm_timer(&key, d, at);
        }

        tracing::info!(pattern = %key, expires = ?expires, "Override on");
        self.inner.events.record(DriverEvent::OverrideOn {
            pattern: key,
            expires,
        });

        if expires.is_none() {
            self.persist().await;
        }
        Ok(())
    }

    /// Deactivates an override.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::NotActive`] if the pattern is not active; the
    /// state is left unchanged.
    pub async fn set_override_off(&self, pattern: &str) -> Result<()> {
        let key = pattern.trim().to_string();
        let _writer = self.inner.writer.lock().await;

        {
            let mut state = self.inner.state.lock();
            if state.remove(&key).is_none() {
                return Err(OverrideError::NotActive(key).into());
            }
            state.cancel_timer(&key);
        }

        tracing::info!(pattern = %key, "Override off");
        self.inner
            .events
            .record(DriverEvent::OverrideOff { pattern: key });
        self.persist().await;
        Ok(())
    }

    /// Removes every override and cancels every expiry.
    pub async fn clear_overrides(&self) {
        let _writer = self.inner.writer.lock().await;

        {
            let mut state = self.inner.state.lock();
            for (_, handle) in state.timers.drain() {
                handle.abort();
            }
            state.entries.clear();
            state.index.clear();
        }

        tracing::info!("Overrides cleared");
        self.inner.events.record(DriverEvent::OverridesCleared);
        self.persist().await;
    }

    /// Re-activates overrides from their persisted form.
    ///
    /// Indefinite entries are restored as they were. Timed entries are
    /// re-armed for their remaining time; those already expired are
    /// dropped. Nothing is written back to the store.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::InvalidState`] if `persisted` is not an
    /// object of pattern to expiry strings. Individual bad entries are
    /// logged and skipped.
    pub async fn restore(&self, persisted: &Value) -> Result<()> {
        let Some(entries) = persisted.as_object() else {
            return Err(OverrideError::InvalidState(format!(
                "expected an object, got {persisted}"
            ))
            .into());
        };

        let _writer = self.inner.writer.lock().await;
        let now = Utc::now();

        for (raw, expiry) in entries {
            let pattern = match OverridePattern::new(raw) {
                Ok(pattern) => pattern,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping persisted override");
                    continue;
                }
            };
            let key = pattern.as_str().to_string();

            let expires = match expiry.as_str() {
                Some(INDEFINITE) => None,
                Some(text) => match DateTime::parse_from_rfc3339(text) {
                    Ok(t) => Some(t.with_timezone(&Utc)),
                    Err(e) => {
                        tracing::warn!(pattern = %key, error = %e, "Skipping persisted override");
                        continue;
                    }
                },
                None => {
                    tracing::warn!(pattern = %key, "Skipping persisted override without expiry");
                    continue;
                }
            };

            let remaining = match expires {
                Some(at) if at <= now => {
                    tracing::info!(pattern = %key, expired = %at, "Dropping expired override");
                    continue;
                }
                Some(at) => Some((at - now).to_std().unwrap_or(Duration::ZERO)),
                None => None,
            };

            {
                let mut state = self.inner.state.lock();
                state.cancel_timer(&key);
                state.remove(&key);
                state.insert(pattern, expires);
            }
            if let (Some(d), Some(at)) = (remaining, expires) {
                self.arm_timer(&key, d, at);
            }

            tracing::info!(pattern = %key, expires = ?expires, "Override restored");
            self.inner.events.record(DriverEvent::OverrideOn {
                pattern: key,
                expires,
            });
        }
        Ok(())
    }

    /// Cancels every pending expiry without changing the pattern set.
    pub fn disarm(&self) {
        for (_, handle) in self.inner.state.lock().timers.drain() {
            handle.abort();
        }
    }

    /// Registers a device, indexing it against every active pattern.
    pub fn device_added(&self, path: &str) {
        let mut state = self.inner.state.lock();
        if !state.devices.insert(path.to_string()) {
            return;
        }

        let mut hits = 0;
        for entry in state.entries.values_mut() {
            if entry.pattern.matches(path) {
                entry.matched.insert(path.to_string());
                hits += 1;
            }
        }
        if hits > 0 {
            state.index.insert(path.to_string(), hits);
            tracing::debug!(device = %path, patterns = hits, "New device is overridden");
        }
    }

    /// Forgets a device.
    pub fn device_removed(&self, path: &str) {
        let mut state = self.inner.state.lock();
        state.devices.remove(path);
        state.index.remove(path);
        for entry in state.entries.values_mut() {
            entry.matched.remove(path);
        }
    }

    /// Returns `true` if at least one active pattern selects the device.
    #[must_use]
    pub fn is_overridden(&self, path: &str) -> bool {
        self.inner.state.lock().index.contains_key(path)
    }

    /// Returns the overridden devices in sorted order.
    #[must_use]
    pub fn overridden_devices(&self) -> Vec<String> {
        self.inner.state.lock().index.keys().cloned().collect()
    }

    /// Returns every active pattern with its expiry.
    #[must_use]
    pub fn patterns(&self) -> BTreeMap<String, Option<DateTime<Utc>>> {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .map(|(pattern, entry)| (pattern.clone(), entry.expires))
            .collect()
    }

    /// Returns the registered devices `pattern` would select.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::InvalidPattern`] if the pattern is malformed.
    pub fn matching_devices(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = OverridePattern::new(pattern)?;
        Ok(self
            .inner
            .state
            .lock()
            .devices
            .iter()
            .filter(|device| pattern.matches(device))
            .cloned()
            .collect())
    }

    /// Returns how many active patterns select the device.
    #[must_use]
    pub fn match_count(&self, path: &str) -> usize {
        self.inner.state.lock().index.get(path).copied().unwrap_or(0)
    }

    fn arm_timer(&self, pattern: &str, after: Duration, expires: DateTime<Utc>) {
        let manager = self.clone();
        let key = pattern.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            manager.expire(&key, expires).await;
        });

        let mut state = self.inner.state.lock();
        if let Some(previous) = state.timers.insert(pattern.to_string(), task.abort_handle()) {
            previous.abort();
        }
    }

    async fn expire(&self, pattern: &str, armed_for: DateTime<Utc>) {
        let _writer = self.inner.writer.lock().await;

        {
            let mut state = self.inner.state.lock();
            let current = state.entries.get(pattern).and_then(|e| e.expires);
            if current != Some(armed_for) {
                return;
            }
            state.remove(pattern);
            state.timers.remove(pattern);
        }

        tracing::info!(pattern = %pattern, "Override expired");
        self.inner.events.record(DriverEvent::OverrideOff {
            pattern: pattern.to_string(),
        });
        self.persist().await;
    }

    async fn persist(&self) {
        let snapshot = self.inner.state.lock().snapshot();
        if let Err(e) = self
            .inner
            .store
            .set(OVERRIDE_PATTERNS_CONFIG, snapshot)
            .await
        {
            tracing::error!(error = %e, "Failed to persist override patterns");
        }
    }
}

impl fmt::Debug for OverrideManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("OverrideManager")
            .field("patterns", &state.entries.keys().collect::<Vec<_>>())
            .field("overridden", &state.index.len())
            .finish_non_exhaustive()
    }
}
