// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration store access.
//!
//! The durable configuration store is a collaborator. The driver reads the
//! platform and device configurations from it, persists active override
//! patterns into it and follows its change notifications.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::StoreError;

/// Default channel capacity for change notifications.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Kind of change made to a stored configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigAction {
    /// The name did not exist before.
    New,
    /// An existing entry was replaced.
    Update,
    /// The entry was removed.
    Delete,
}

/// Notification of a configuration change.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    /// What happened.
    pub action: ConfigAction,
    /// Configuration name.
    pub name: String,
    /// New contents, `None` on delete.
    pub contents: Option<Value>,
}

/// A store of named JSON configuration blobs.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Reads a configuration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    async fn get(&self, name: &str) -> Result<Option<Value>, StoreError>;

    /// Writes a configuration, notifying subscribers.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    async fn set(&self, name: &str, contents: Value) -> Result<(), StoreError>;

    /// Removes a configuration, notifying subscribers if it existed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Lists every configuration name in sorted order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Subscribes to changes made from now on.
    fn subscribe(&self) -> broadcast::Receiver<ConfigChange>;
}

/// In-memory configuration store.
///
/// # Examples
///
/// ```
/// use platform_driver::store::{ConfigStore, MemoryConfigStore};
///
/// # async fn example() -> Result<(), platform_driver::error::StoreError> {
/// let store = MemoryConfigStore::new();
/// store.set("config", serde_json::json!({"driver_scrape_interval": 0.05})).await?;
/// assert!(store.get("config").await?.is_some());
/// # Ok(())
/// # }
/// ```
pub struct MemoryConfigStore {
    entries: RwLock<BTreeMap<String, Value>>,
    sender: broadcast::Sender<ConfigChange>,
}

impl MemoryConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            sender,
        }
    }

    /// Creates a store pre-populated with `entries`, without notifications.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        let store = Self::new();
        store.entries.write().extend(entries);
        store
    }

    fn notify(&self, action: ConfigAction, name: &str, contents: Option<Value>) {
        let _ = self.sender.send(ConfigChange {
            action,
            name: name.to_string(),
            contents,
        });
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConfigStore")
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().get(name).cloned())
    }

    async fn set(&self, name: &str, contents: Value) -> Result<(), StoreError> {
        let previous = self
            .entries
            .write()
            .insert(name.to_string(), contents.clone());
        let action = if previous.is_some() {
            ConfigAction::Update
        } else {
            ConfigAction::New
        };
        self.notify(action, name, Some(contents));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        if self.entries.write().remove(name).is_some() {
            self.notify(ConfigAction::Delete, name, None);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.sender.subscribe()
    }
}
