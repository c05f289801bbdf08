// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator overrides.
//!
//! An override puts every device matched by a pattern under manual control.
//! While a device is overridden, the [`PlatformDriver`](crate::PlatformDriver)
//! rejects every device-targeted call for it.

mod manager;
mod pattern;

pub use manager::{OVERRIDE_PATTERNS_CONFIG, OverrideManager};
pub use pattern::OverridePattern;
