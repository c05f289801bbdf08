// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publish topic generation.
//!
//! Every reading is addressed twice on the bus:
//!
//! ```text
//! depth-first:   devices/campus/building1/device1/temperature
//! breadth-first: points/temperature/device1/building1/campus
//! ```
//!
//! The depth-first topic follows the device hierarchy from root to leaf. The
//! breadth-first topic carries the same segments from leaf to root, so a
//! subscriber can filter on a point name (`points/temperature/#`) without
//! knowing where the devices live.

/// Default base segment of depth-first topics.
pub const DEFAULT_DEPTH_FIRST_BASE: &str = "devices";

/// Default base segment of breadth-first topics.
pub const DEFAULT_BREADTH_FIRST_BASE: &str = "points";

/// Point name used for the aggregate message of a device.
pub const ALL_POINTS: &str = "all";

/// Topic separator.
const SEPARATOR: char = '/';

/// A pair of publish addresses for a single device point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPaths {
    /// Root-to-leaf topic.
    pub depth_first: String,
    /// Leaf-to-root topic.
    pub breadth_first: String,
}

/// The base segments used to build publish topics.
///
/// # Examples
///
/// ```
/// use platform_driver::topic::TopicLayout;
///
/// let layout = TopicLayout::default();
/// let paths = layout.paths("campus/building1/device1", "temperature");
///
/// assert_eq!(paths.depth_first, "devices/campus/building1/device1/temperature");
/// assert_eq!(paths.breadth_first, "points/temperature/device1/building1/campus");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    depth_first_base: String,
    breadth_first_base: String,
}

impl TopicLayout {
    /// Creates a layout with custom base segments.
    #[must_use]
    pub fn new(depth_first_base: impl Into<String>, breadth_first_base: impl Into<String>) -> Self {
        Self {
            depth_first_base: normalize_path(&depth_first_base.into()),
            breadth_first_base: normalize_path(&breadth_first_base.into()),
        }
    }

    /// Returns the depth-first base segment.
    #[must_use]
    pub fn depth_first_base(&self) -> &str {
        &self.depth_first_base
    }

    /// Returns the breadth-first base segment.
    #[must_use]
    pub fn breadth_first_base(&self) -> &str {
        &self.breadth_first_base
    }

    /// Returns both topics for a point of a device.
    #[must_use]
    pub fn paths(&self, device_path: &str, point: &str) -> TopicPaths {
        let depth_first = self.depth_first(device_path, point);
        let breadth_first = self.breadth_first(&depth_first);
        TopicPaths {
            depth_first,
            breadth_first,
        }
    }

    /// Returns both topics of the aggregate ("all") message of a device.
    #[must_use]
    pub fn all_paths(&self, device_path: &str) -> TopicPaths {
        self.paths(device_path, ALL_POINTS)
    }

    /// Returns the depth-first topic of the device itself, without a point.
    ///
    /// This is the name under which scrapes are logged and accounted.
    #[must_use]
    pub fn device_topic(&self, device_path: &str) -> String {
        join_segments([self.depth_first_base.as_str(), device_path])
    }

    /// Builds the depth-first topic for a point.
    #[must_use]
    pub fn depth_first(&self, device_path: &str, point: &str) -> String {
        join_segments([self.depth_first_base.as_str(), device_path, point])
    }

    /// Converts a depth-first topic into its breadth-first counterpart.
    ///
    /// The first segment (the depth-first base) is dropped, the remaining
    /// segments are reversed and the breadth-first base is prepended.
    #[must_use]
    pub fn breadth_first(&self, depth_first: &str) -> String {
        let mut segments: Vec<&str> = depth_first
            .split(SEPARATOR)
            .filter(|s| !s.is_empty())
            .skip(1)
            .collect();
        segments.reverse();

        let mut topic = self.breadth_first_base.clone();
        for segment in segments {
            if !topic.is_empty() {
                topic.push(SEPARATOR);
            }
            topic.push_str(segment);
        }
        topic
    }
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH_FIRST_BASE, DEFAULT_BREADTH_FIRST_BASE)
    }
}

/// Collapses empty segments and strips leading/trailing separators.
///
/// ```
/// use platform_driver::topic::normalize_path;
///
/// assert_eq!(normalize_path("/campus//building1/"), "campus/building1");
/// ```
#[must_use]
pub fn normalize_path(path: &str) -> String {
    join_segments([path])
}

fn join_segments<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for segment in parts
        .into_iter()
        .flat_map(|p| p.split(SEPARATOR))
        .filter(|s| !s.is_empty())
    {
        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        out.push_str(segment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_first_concatenates_base_path_and_point() {
        let layout = TopicLayout::default();
        assert_eq!(
            layout.depth_first("campus/building/unit", "point"),
            "devices/campus/building/unit/point"
        );
    }

    #[test]
    fn breadth_first_reverses_non_base_segments() {
        let layout = TopicLayout::default();
        assert_eq!(
            layout.breadth_first("devices/campus/building/point"),
            "points/point/building/campus"
        );
    }

    #[test]
    fn all_paths_use_all_point() {
        let layout = TopicLayout::default();
        let paths = layout.all_paths("campus/building1/device1");
        assert_eq!(paths.depth_first, "devices/campus/building1/device1/all");
        assert_eq!(paths.breadth_first, "points/all/device1/building1/campus");
    }

    #[test]
    fn custom_bases() {
        let layout = TopicLayout::new("devices", "devices");
        let paths = layout.paths("campus/rtu1", "OutsideAirTemperature");
        assert_eq!(paths.depth_first, "devices/campus/rtu1/OutsideAirTemperature");
        assert_eq!(paths.breadth_first, "devices/OutsideAirTemperature/rtu1/campus");
    }

    #[test]
    fn stray_separators_are_ignored() {
        let layout = TopicLayout::default();
        let paths = layout.paths("/campus//building1/", "temp");
        assert_eq!(paths.depth_first, "devices/campus/building1/temp");
        assert_eq!(paths.breadth_first, "points/temp/building1/campus");
    }

    #[test]
    fn device_topic_has_no_point() {
        let layout = TopicLayout::default();
        assert_eq!(layout.device_topic("campus/building1/device1"), "devices/campus/building1/device1");
    }

    #[test]
    fn normalize_path_handles_empty() {
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("///"), "");
    }
}
