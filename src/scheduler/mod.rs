// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device polling.
//!
//! A [`DeviceDriver`] owns one device interface and a timer task. The timer
//! wakes on wall-clock interval boundaries shifted by the device's offset
//! (see [`compute_offset`] and [`find_starting_datetime`]), arms the next
//! wake and then scrapes the device and republishes its readings.
//!
//! # Publish modes
//!
//! Four independent flags select what a scrape publishes:
//!
//! | Flag                | Topic                                   |
//! |---------------------|-----------------------------------------|
//! | `depth_first`       | `devices/<path>/<point>` per point      |
//! | `breadth_first`     | `points/<point>/<reversed path>` per point |
//! | `depth_first_all`   | `devices/<path>/all`                    |
//! | `breadth_first_all` | `points/all/<reversed path>`            |

mod driver;
mod timing;

pub use driver::{DEFAULT_INTERVAL, DeviceDriver, DriverSettings, SchedulerServices};
pub use timing::{compute_offset, find_starting_datetime, next_wake, until};

use serde::{Deserialize, Serialize};

/// Which topics a scrape is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct PublishFlags {
    /// One message per point, depth-first.
    pub depth_first: bool,
    /// One message per point, breadth-first.
    pub breadth_first: bool,
    /// One aggregate message, depth-first.
    pub depth_first_all: bool,
    /// One aggregate message, breadth-first.
    pub breadth_first_all: bool,
}

impl PublishFlags {
    /// Returns `true` if any per-point mode is enabled.
    #[must_use]
    pub fn any_point(&self) -> bool {
        self.depth_first || self.breadth_first
    }

    /// Returns `true` if any aggregate mode is enabled.
    #[must_use]
    pub fn any_all(&self) -> bool {
        self.depth_first_all || self.breadth_first_all
    }
}

impl Default for PublishFlags {
    fn default() -> Self {
        Self {
            depth_first: false,
            breadth_first: false,
            depth_first_all: true,
            breadth_first_all: false,
        }
    }
}
