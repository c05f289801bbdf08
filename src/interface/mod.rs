// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device interfaces.
//!
//! A [`DeviceInterface`] is the component that actually talks to a field
//! device: it knows the device's registers and how to read and write them.
//! The scheduler only ever sees this trait, so protocol-specific decoding
//! lives entirely in the implementations.
//!
//! Interfaces are created through a [`DriverRegistry`], which maps the
//! `driver_type` string of a device configuration to a constructor.
//!
//! - [`MemoryInterface`]: in-memory registers, registered as the `"fake"`
//!   driver type

mod memory;
mod registry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InterfaceError;

pub use memory::{MemoryInterface, MemoryRegister};
pub use registry::{DriverContext, DriverFactory, DriverRegistry};

/// Point values keyed by point name.
pub type PointValues = BTreeMap<String, Value>;

/// Per-point error messages keyed by point name.
pub type PointErrors = BTreeMap<String, String>;

/// Physical register width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    /// A single bit (coil, binary input).
    Bit,
    /// A multi-byte register.
    Byte,
}

/// The kind of value a point carries on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// `true`/`false`.
    Boolean,
    /// Whole numbers.
    Integer,
    /// Floating point numbers.
    Float,
    /// Free text.
    String,
}

/// Description of a single register exposed by an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInfo {
    /// Point name.
    pub name: String,
    /// Register width.
    pub register_type: RegisterType,
    /// Declared value kind.
    pub value_kind: ValueKind,
    /// Engineering units.
    pub units: String,
    /// Whether the point accepts writes.
    pub writable: bool,
}

impl RegisterInfo {
    /// Returns the type published in point metadata.
    ///
    /// Bit registers are always published as booleans.
    #[must_use]
    pub fn published_kind(&self) -> ValueKind {
        match self.register_type {
            RegisterType::Bit => ValueKind::Boolean,
            RegisterType::Byte => self.value_kind,
        }
    }
}

/// Metadata published alongside each point value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointMeta {
    /// Engineering units.
    pub units: String,
    /// Published value kind.
    #[serde(rename = "type")]
    pub kind: ValueKind,
    /// Timezone of the device.
    pub tz: String,
}

impl PointMeta {
    /// Builds the metadata of a register for a device in `timezone`.
    #[must_use]
    pub fn from_register(register: &RegisterInfo, timezone: &str) -> Self {
        Self {
            units: register.units.clone(),
            kind: register.published_kind(),
            tz: timezone.to_string(),
        }
    }
}

/// Access to the registers of a single device.
///
/// Implementations must be cheap to share: the scheduler holds the
/// interface behind an `Arc` and may call it from several tasks.
#[async_trait]
pub trait DeviceInterface: Send + Sync {
    /// Returns the names of every register of the device.
    fn register_names(&self) -> Vec<String>;

    /// Returns the description of a register.
    fn register(&self, name: &str) -> Option<RegisterInfo>;

    /// Reads a single point.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the point is unknown or the device fails.
    async fn get_point(&self, point: &str) -> Result<Value, InterfaceError>;

    /// Writes a single point and returns the value read back.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the point is unknown, read-only or the
    /// device fails.
    async fn set_point(&self, point: &str, value: Value) -> Result<Value, InterfaceError>;

    /// Reads every readable point.
    ///
    /// Points that failed individually may be missing from the result.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the device cannot be read at all.
    async fn scrape_all(&self) -> Result<PointValues, InterfaceError>;

    /// Restores a point to its default value.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the point is unknown or the device fails.
    async fn revert_point(&self, point: &str) -> Result<(), InterfaceError>;

    /// Restores every writable point to its default value.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the device fails.
    async fn revert_all(&self) -> Result<(), InterfaceError>;

    /// Reads several points, collecting per-point failures.
    ///
    /// # Errors
    ///
    /// The default implementation never fails as a whole.
    async fn get_multiple_points(
        &self,
        points: &[String],
    ) -> Result<(PointValues, PointErrors), InterfaceError> {
        let mut values = PointValues::new();
        let mut errors = PointErrors::new();
        for point in points {
            match self.get_point(point).await {
                Ok(value) => {
                    values.insert(point.clone(), value);
                }
                Err(e) => {
                    errors.insert(point.clone(), e.to_string());
                }
            }
        }
        Ok((values, errors))
    }

    /// Writes several points, returning the failures by point name.
    ///
    /// # Errors
    ///
    /// The default implementation never fails as a whole.
    async fn set_multiple_points(
        &self,
        values: PointValues,
    ) -> Result<PointErrors, InterfaceError> {
        let mut errors = PointErrors::new();
        for (point, value) in values {
            if let Err(e) = self.set_point(&point, value).await {
                errors.insert(point, e.to_string());
            }
        }
        Ok(errors)
    }
}
