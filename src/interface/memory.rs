// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory device interface.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use super::{DeviceInterface, DriverContext, PointValues, RegisterInfo, RegisterType, ValueKind};
use crate::error::InterfaceError;

/// Definition of a register of a [`MemoryInterface`].
///
/// This is also the JSON shape of the `registry_config` of the `"fake"`
/// driver type:
///
/// ```json
/// [
///   {"point_name": "temperature", "type": "float", "units": "degF", "default": 72.5},
///   {"point_name": "fan", "register_type": "bit", "writable": true, "default": false}
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemoryRegister {
    /// Point name.
    pub point_name: String,
    /// Register width.
    #[serde(default = "default_register_type")]
    pub register_type: RegisterType,
    /// Declared value kind.
    #[serde(rename = "type", default = "default_value_kind")]
    pub value_kind: ValueKind,
    /// Engineering units.
    #[serde(default)]
    pub units: String,
    /// Whether the point accepts writes.
    #[serde(default)]
    pub writable: bool,
    /// Value at startup and after a revert.
    #[serde(default)]
    pub default: Value,
}

fn default_register_type() -> RegisterType {
    RegisterType::Byte
}

fn default_value_kind() -> ValueKind {
    ValueKind::Float
}

impl MemoryRegister {
    /// Creates a read-only byte register.
    #[must_use]
    pub fn new(point_name: impl Into<String>, value_kind: ValueKind, default: Value) -> Self {
        Self {
            point_name: point_name.into(),
            register_type: RegisterType::Byte,
            value_kind,
            units: String::new(),
            writable: false,
            default,
        }
    }

    /// Sets the engineering units.
    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Marks the register as writable.
    #[must_use]
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Makes this a single-bit register.
    #[must_use]
    pub fn bit(mut self) -> Self {
        self.register_type = RegisterType::Bit;
        self
    }

    fn info(&self) -> RegisterInfo {
        RegisterInfo {
            name: self.point_name.clone(),
            register_type: self.register_type,
            value_kind: self.value_kind,
            units: self.units.clone(),
            writable: self.writable,
        }
    }
}

/// A device interface whose registers live in memory.
///
/// Useful to simulate devices: individual points can be made to fail and
/// the whole device can be taken offline.
///
/// # Examples
///
/// ```
/// use platform_driver::interface::{DeviceInterface, MemoryInterface, MemoryRegister, ValueKind};
/// use serde_json::json;
///
/// # async fn example() {
/// let device = MemoryInterface::new(vec![
///     MemoryRegister::new("temperature", ValueKind::Float, json!(72.5)).with_units("degF"),
/// ]);
///
/// let values = device.scrape_all().await.unwrap();
/// assert_eq!(values["temperature"], json!(72.5));
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryInterface {
    registers: Vec<MemoryRegister>,
    values: RwLock<PointValues>,
    failing: RwLock<HashSet<String>>,
    offline: AtomicBool,
    scrapes: AtomicU64,
}

impl MemoryInterface {
    /// Creates an interface with the given registers at their defaults.
    #[must_use]
    pub fn new(registers: Vec<MemoryRegister>) -> Self {
        let values = registers
            .iter()
            .map(|r| (r.point_name.clone(), r.default.clone()))
            .collect();
        Self {
            registers,
            values: RwLock::new(values),
            failing: RwLock::new(HashSet::new()),
            offline: AtomicBool::new(false),
            scrapes: AtomicU64::new(0),
        }
    }

    /// Builds an interface from a driver context.
    ///
    /// Registers are read from `registry_config` (a JSON array of
    /// [`MemoryRegister`]) or, failing that, from the `registers` array of
    /// the driver configuration.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::InvalidConfiguration`] if no register list
    /// is present or it cannot be parsed.
    pub fn from_context(ctx: &DriverContext<'_>) -> Result<Self, InterfaceError> {
        let registers: Vec<MemoryRegister> = if let Some(raw) = ctx.registry_config {
            serde_json::from_str(raw)
                .map_err(|e| InterfaceError::InvalidConfiguration(e.to_string()))?
        } else if let Some(list) = ctx.driver_config.get("registers") {
            serde_json::from_value(list.clone())
                .map_err(|e| InterfaceError::InvalidConfiguration(e.to_string()))?
        } else {
            return Err(InterfaceError::InvalidConfiguration(format!(
                "no registers defined for {}",
                ctx.device_path
            )));
        };
        Ok(Self::new(registers))
    }

    /// Makes a point fail on every read until restored.
    pub fn fail_point(&self, point: impl Into<String>) {
        self.failing.write().insert(point.into());
    }

    /// Makes a failing point readable again.
    pub fn restore_point(&self, point: &str) {
        self.failing.write().remove(point);
    }

    /// Takes the whole device offline or back online.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns the number of `scrape_all` calls served so far.
    #[must_use]
    pub fn scrape_count(&self) -> u64 {
        self.scrapes.load(Ordering::SeqCst)
    }

    /// Returns the current value of a point.
    #[must_use]
    pub fn value(&self, point: &str) -> Option<Value> {
        self.values.read().get(point).cloned()
    }

    fn find(&self, point: &str) -> Result<&MemoryRegister, InterfaceError> {
        self.registers
            .iter()
            .find(|r| r.point_name == point)
            .ok_or_else(|| InterfaceError::UnknownPoint(point.to_string()))
    }

    fn check_online(&self) -> Result<(), InterfaceError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(InterfaceError::Communication("device offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeviceInterface for MemoryInterface {
    fn register_names(&self) -> Vec<String> {
        self.registers.iter().map(|r| r.point_name.clone()).collect()
    }

    fn register(&self, name: &str) -> Option<RegisterInfo> {
        self.find(name).ok().map(MemoryRegister::info)
    }

    async fn get_point(&self, point: &str) -> Result<Value, InterfaceError> {
        self.check_online()?;
        self.find(point)?;
        if self.failing.read().contains(point) {
            return Err(InterfaceError::Communication(format!("read of {point} failed")));
        }
        self.value(point)
            .ok_or_else(|| InterfaceError::UnknownPoint(point.to_string()))
    }

    async fn set_point(&self, point: &str, value: Value) -> Result<Value, InterfaceError> {
        self.check_online()?;
        let register = self.find(point)?;
        if !register.writable {
            return Err(InterfaceError::ReadOnly(point.to_string()));
        }
        self.values.write().insert(point.to_string(), value.clone());
        Ok(value)
    }

    async fn scrape_all(&self) -> Result<PointValues, InterfaceError> {
        self.scrapes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let failing = self.failing.read();
        Ok(self
            .values
            .read()
            .iter()
            .filter(|(name, _)| !failing.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    async fn revert_point(&self, point: &str) -> Result<(), InterfaceError> {
        self.check_online()?;
        let default = self.find(point)?.default.clone();
        self.values.write().insert(point.to_string(), default);
        Ok(())
    }

    async fn revert_all(&self) -> Result<(), InterfaceError> {
        self.check_online()?;
        let mut values = self.values.write();
        for register in self.registers.iter().filter(|r| r.writable) {
            values.insert(register.point_name.clone(), register.default.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn device() -> MemoryInterface {
        MemoryInterface::new(vec![
            MemoryRegister::new("temperature", ValueKind::Float, json!(72.5)).with_units("degF"),
            MemoryRegister::new("setpoint", ValueKind::Integer, json!(70)).writable(),
            MemoryRegister::new("fan", ValueKind::Integer, json!(0)).bit().writable(),
        ])
    }

    #[tokio::test]
    async fn scrape_returns_all_points() {
        let device = device();
        let values = device.scrape_all().await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values["setpoint"], json!(70));
        assert_eq!(device.scrape_count(), 1);
    }

    #[tokio::test]
    async fn failing_point_is_omitted_from_scrape() {
        let device = device();
        device.fail_point("temperature");

        let values = device.scrape_all().await.unwrap();
        assert!(!values.contains_key("temperature"));
        assert!(device.get_point("temperature").await.is_err());

        device.restore_point("temperature");
        assert_eq!(device.get_point("temperature").await.unwrap(), json!(72.5));
    }

    #[tokio::test]
    async fn offline_device_fails_scrape() {
        let device = device();
        device.set_offline(true);
        assert!(matches!(
            device.scrape_all().await,
            Err(InterfaceError::Communication(_))
        ));
    }

    #[tokio::test]
    async fn read_only_point_rejects_write() {
        let device = device();
        let result = device.set_point("temperature", json!(1.0)).await;
        assert_eq!(result, Err(InterfaceError::ReadOnly("temperature".to_string())));
    }

    #[tokio::test]
    async fn revert_all_restores_writable_defaults() {
        let device = device();
        device.set_point("setpoint", json!(65)).await.unwrap();
        device.set_point("fan", json!(1)).await.unwrap();

        device.revert_all().await.unwrap();

        assert_eq!(device.value("setpoint"), Some(json!(70)));
        assert_eq!(device.value("fan"), Some(json!(0)));
    }

    #[tokio::test]
    async fn get_multiple_points_collects_errors() {
        let device = device();
        let points = vec!["setpoint".to_string(), "missing".to_string()];

        let (values, errors) = device.get_multiple_points(&points).await.unwrap();
        assert_eq!(values["setpoint"], json!(70));
        assert_eq!(errors["missing"], "no such point: missing");
    }

    #[tokio::test]
    async fn set_multiple_points_collects_errors() {
        let device = device();
        let mut values = PointValues::new();
        values.insert("setpoint".to_string(), json!(68));
        values.insert("temperature".to_string(), json!(1.0));

        let errors = device.set_multiple_points(values).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("temperature"));
        assert_eq!(device.value("setpoint"), Some(json!(68)));
    }

    #[test]
    fn register_info_reflects_definition() {
        let device = device();
        let info = device.register("fan").unwrap();
        assert_eq!(info.register_type, RegisterType::Bit);
        assert!(info.writable);
        assert!(device.register("missing").is_none());
    }

    #[test]
    fn from_context_reads_driver_config_registers() {
        let config = json!({"registers": [{"point_name": "a"}, {"point_name": "b", "type": "string"}]});
        let ctx = DriverContext {
            device_path: "dev",
            driver_config: &config,
            registry_config: None,
        };
        let device = MemoryInterface::from_context(&ctx).unwrap();
        assert_eq!(device.register_names(), vec!["a", "b"]);
        assert_eq!(device.register("b").unwrap().value_kind, ValueKind::String);
    }

    #[test]
    fn from_context_without_registers_fails() {
        let config = json!({});
        let ctx = DriverContext {
            device_path: "dev",
            driver_config: &config,
            registry_config: None,
        };
        assert!(matches!(
            MemoryInterface::from_context(&ctx),
            Err(InterfaceError::InvalidConfiguration(_))
        ));
    }
}
