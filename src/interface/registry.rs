// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver type registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{DeviceInterface, MemoryInterface};
use crate::error::{Error, InterfaceError};

/// Everything a driver constructor gets to build an interface.
#[derive(Debug, Clone, Copy)]
pub struct DriverContext<'a> {
    /// Logical path of the device.
    pub device_path: &'a str,
    /// Driver-specific configuration block.
    pub driver_config: &'a Value,
    /// Optional register definitions, in whatever format the driver uses.
    pub registry_config: Option<&'a str>,
}

/// Constructor for a device interface.
pub type DriverFactory = Arc<
    dyn Fn(&DriverContext<'_>) -> Result<Arc<dyn DeviceInterface>, InterfaceError> + Send + Sync,
>;

/// Maps driver type identifiers to interface constructors.
///
/// The registry is populated explicitly at startup; a device configuration
/// naming a type that was never registered is rejected.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use platform_driver::interface::{DeviceInterface, DriverRegistry, MemoryInterface};
///
/// let registry = DriverRegistry::with_builtin().with_driver("simulated", |ctx| {
///     let interface = MemoryInterface::from_context(ctx)?;
///     Ok(Arc::new(interface) as Arc<dyn DeviceInterface>)
/// });
///
/// assert!(registry.contains("fake"));
/// assert!(registry.contains("simulated"));
/// ```
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Driver type of the built-in in-memory interface.
    pub const FAKE_DRIVER: &'static str = "fake";

    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in drivers.
    #[must_use]
    pub fn with_builtin() -> Self {
        Self::new().with_driver(Self::FAKE_DRIVER, |ctx| {
            let interface = MemoryInterface::from_context(ctx)?;
            Ok(Arc::new(interface) as Arc<dyn DeviceInterface>)
        })
    }

    /// Registers a constructor, replacing any previous one for the type.
    #[must_use]
    pub fn with_driver<F>(mut self, driver_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&DriverContext<'_>) -> Result<Arc<dyn DeviceInterface>, InterfaceError>
            + Send
            + Sync
            + 'static,
    {
        self.register(driver_type, factory);
        self
    }

    /// Registers a constructor in place.
    pub fn register<F>(&mut self, driver_type: impl Into<String>, factory: F)
    where
        F: Fn(&DriverContext<'_>) -> Result<Arc<dyn DeviceInterface>, InterfaceError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(driver_type.into(), Arc::new(factory));
    }

    /// Returns true if a constructor is registered for the type.
    #[must_use]
    pub fn contains(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// Returns the registered driver types, sorted.
    #[must_use]
    pub fn driver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Builds an interface for a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDriverType`] if nothing is registered for the
    /// type, or the constructor's [`InterfaceError`].
    pub fn create(
        &self,
        driver_type: &str,
        ctx: &DriverContext<'_>,
    ) -> Result<Arc<dyn DeviceInterface>, Error> {
        let factory = self
            .factories
            .get(driver_type)
            .ok_or_else(|| Error::UnknownDriverType(driver_type.to_string()))?;
        Ok(factory(ctx)?)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("driver_types", &self.driver_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_driver_type_is_rejected() {
        let registry = DriverRegistry::new();
        let config = serde_json::json!({});
        let ctx = DriverContext {
            device_path: "campus/building1/device1",
            driver_config: &config,
            registry_config: None,
        };

        let result = registry.create("modbus", &ctx);
        assert!(matches!(result, Err(Error::UnknownDriverType(t)) if t == "modbus"));
    }

    #[test]
    fn builtin_fake_driver_builds_interface() {
        let registry = DriverRegistry::with_builtin();
        let config = serde_json::json!({});
        let registers = r#"[{"point_name": "temp", "type": "float", "default": 70.5}]"#;
        let ctx = DriverContext {
            device_path: "campus/building1/device1",
            driver_config: &config,
            registry_config: Some(registers),
        };

        let interface = registry.create("fake", &ctx).unwrap();
        assert_eq!(interface.register_names(), vec!["temp".to_string()]);
    }

    #[test]
    fn driver_types_are_sorted() {
        let registry = DriverRegistry::with_builtin()
            .with_driver("bacnet", |ctx| {
                Ok(Arc::new(MemoryInterface::from_context(ctx)?) as Arc<dyn DeviceInterface>)
            });
        assert_eq!(registry.driver_types(), vec!["bacnet", "fake"]);
    }
}
