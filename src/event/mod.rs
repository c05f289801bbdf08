// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system for driver health and activity.
//!
//! This module provides a pub/sub event system for observing what the
//! scheduler, the publish gateway and the override manager are doing. The
//! [`EventBus`] uses tokio's broadcast channel so that any number of
//! observers can follow the same events.
//!
//! # Examples
//!
//! ```
//! use platform_driver::event::{DriverEvent, EventBus};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.record(DriverEvent::OverridesCleared);
//! ```

mod driver_event;
mod event_bus;

pub use driver_event::DriverEvent;
pub use event_bus::EventBus;
