// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the platform driver.
//!
//! This module provides the error hierarchy for the failures the core can
//! surface to callers: configuration problems, device interface failures,
//! bus publish failures, override misuse and configuration store access.
//!
//! Most runtime failures never reach a caller. A failed scrape or a dropped
//! publish is logged and broadcast as a [`DriverEvent`](crate::event::DriverEvent)
//! and the next cycle proceeds normally. The types here are returned by the
//! caller-facing operations of [`PlatformDriver`](crate::PlatformDriver).

use std::time::Duration;

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration blob could not be used.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The wrapped device interface failed.
    #[error("interface error: {0}")]
    Interface(#[from] InterfaceError),

    /// A message could not be published.
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// An override operation was misused.
    #[error("override error: {0}")]
    Override(#[from] OverrideError),

    /// The configuration store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// No device is registered under the given path.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The device is under manual override and rejects this call.
    #[error("device {0} is currently overridden")]
    DeviceOverridden(String),

    /// No driver constructor is registered for the given type.
    #[error("unknown driver type: {0}")]
    UnknownDriverType(String),
}

/// Errors raised while interpreting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration is not valid JSON for the expected shape.
    #[error("invalid JSON in {name}: {source}")]
    Json {
        /// The configuration name that failed to parse.
        name: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A required field is missing.
    #[error("missing field in {name}: {field}")]
    MissingField {
        /// The configuration name.
        name: String,
        /// The missing field.
        field: &'static str,
    },

    /// A field holds a value outside its allowed domain.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },
}

/// Errors reported by a device interface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterfaceError {
    /// The named point is not defined on the device.
    #[error("no such point: {0}")]
    UnknownPoint(String),

    /// The named point cannot be written.
    #[error("point is read-only: {0}")]
    ReadOnly(String),

    /// The device did not answer in time.
    #[error("device timed out")]
    Timeout,

    /// The device could not be reached or answered with an error.
    #[error("device communication failed: {0}")]
    Communication(String),

    /// The driver configuration is unusable.
    #[error("invalid driver configuration: {0}")]
    InvalidConfiguration(String),
}

/// Errors reported by the message bus or the publish gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus is temporarily saturated; the caller may try again.
    #[error("bus is busy")]
    Busy,

    /// A non-retryable transport failure.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Terminal outcome of a publish that did not succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The bus did not confirm the publish within the timeout.
    #[error("no confirmation for {topic} after {timeout:?}")]
    ConfirmationTimeout {
        /// The topic that was published.
        topic: String,
        /// The confirmation timeout that elapsed.
        timeout: Duration,
    },

    /// The bus rejected the publish with a non-retryable error.
    #[error("failed to publish {topic}: {source}")]
    Rejected {
        /// The topic that was published.
        topic: String,
        /// The bus error.
        #[source]
        source: BusError,
    },

    /// The message could not be serialized.
    #[error("failed to encode message for {topic}: {message}")]
    Encode {
        /// The topic that was published.
        topic: String,
        /// Description of the encoding failure.
        message: String,
    },
}

/// Errors caused by misusing the override operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OverrideError {
    /// The pattern is not an active override.
    #[error("no such override pattern: {0}")]
    NotActive(String),

    /// The pattern is not a valid glob.
    #[error("invalid override pattern {pattern}: {message}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        message: String,
    },

    /// The persisted override state could not be interpreted.
    #[error("invalid persisted override state: {0}")]
    InvalidState(String),
}

/// Errors raised by a configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store backend failed.
    #[error("store backend failed: {0}")]
    Backend(String),

    /// A value could not be serialized for storage.
    #[error("failed to serialize {name}: {source}")]
    Serialize {
        /// The configuration name.
        name: String,
        /// The underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
