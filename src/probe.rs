// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scrape accounting for scalability tests.
//!
//! When enabled, the probe measures how long it takes for a burst of
//! concurrent scrapes to drain. A run starts with the first scrape that
//! begins while nothing is in flight and ends when the last in-flight
//! scrape finishes.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Aggregate timing of completed scalability runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSummary {
    /// Number of completed runs.
    pub runs: usize,
    /// Mean run duration in seconds.
    pub mean: f64,
    /// Sample standard deviation of run durations in seconds.
    pub stdev: f64,
}

#[derive(Default)]
struct ProbeState {
    in_flight: HashSet<String>,
    run_start: Option<Instant>,
    results: Vec<Duration>,
    iterations: usize,
}

/// Records in-flight scrapes and the duration of each scrape burst.
///
/// A disabled probe ignores every call.
///
/// # Examples
///
/// ```
/// use platform_driver::probe::ScrapeProbe;
///
/// let probe = ScrapeProbe::new(3);
/// probe.scrape_starting("campus/building1/device1");
/// assert_eq!(probe.in_flight(), 1);
///
/// probe.scrape_ending("campus/building1/device1");
/// assert_eq!(probe.iterations(), 1);
/// ```
pub struct ScrapeProbe {
    enabled: bool,
    target_iterations: usize,
    state: Mutex<ProbeState>,
}

impl ScrapeProbe {
    /// Creates an enabled probe that reports after `target_iterations` runs.
    #[must_use]
    pub fn new(target_iterations: usize) -> Self {
        Self {
            enabled: true,
            target_iterations,
            state: Mutex::new(ProbeState::default()),
        }
    }

    /// Creates a probe that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            target_iterations: 0,
            state: Mutex::new(ProbeState::default()),
        }
    }

    /// Returns `true` if the probe records scrapes.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Marks a scrape of `topic` as started.
    pub fn scrape_starting(&self, topic: &str) {
        if !self.enabled {
            return;
        }

        let mut state = self.state.lock();
        if state.in_flight.is_empty() {
            state.run_start = Some(Instant::now());
        }
        state.in_flight.insert(topic.to_string());
    }

    /// Marks a scrape of `topic` as finished.
    ///
    /// Completes the current run when nothing else is in flight.
    pub fn scrape_ending(&self, topic: &str) {
        if !self.enabled {
            return;
        }

        let mut state = self.state.lock();
        if !state.in_flight.remove(topic) || !state.in_flight.is_empty() {
            return;
        }
        let Some(start) = state.run_start.take() else {
            return;
        };

        let elapsed = start.elapsed();
        state.results.push(elapsed);
        state.iterations += 1;
        tracing::info!(
            iteration = state.iterations,
            elapsed = ?elapsed,
            "Scalability run finished"
        );

        if state.iterations == self.target_iterations {
            if let Some(summary) = summarize(&state.results) {
                tracing::info!(
                    runs = summary.runs,
                    mean = summary.mean,
                    stdev = summary.stdev,
                    "Scalability test complete"
                );
            }
        }
    }

    /// Returns the number of scrapes currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Returns the number of completed runs.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.state.lock().iterations
    }

    /// Returns the duration of every completed run.
    #[must_use]
    pub fn results(&self) -> Vec<Duration> {
        self.state.lock().results.clone()
    }

    /// Returns aggregate timing, or `None` before the first completed run.
    #[must_use]
    pub fn summary(&self) -> Option<ProbeSummary> {
        summarize(&self.state.lock().results)
    }
}

impl fmt::Debug for ScrapeProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeProbe")
            .field("enabled", &self.enabled)
            .field("target_iterations", &self.target_iterations)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_precision_loss)]
fn summarize(results: &[Duration]) -> Option<ProbeSummary> {
    if results.is_empty() {
        return None;
    }

    let runs = results.len();
    let mean = results.iter().map(Duration::as_secs_f64).sum::<f64>() / runs as f64;
    let stdev = if runs > 1 {
        let variance = results
            .iter()
            .map(|d| (d.as_secs_f64() - mean).powi(2))
            .sum::<f64>()
            / (runs - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    Some(ProbeSummary { runs, mean, stdev })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_probe_ignores_scrapes() {
        let probe = ScrapeProbe::disabled();
        probe.scrape_starting("a");
        assert_eq!(probe.in_flight(), 0);
        probe.scrape_ending("a");
        assert_eq!(probe.iterations(), 0);
        assert!(probe.summary().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_spans_overlapping_scrapes() {
        let probe = ScrapeProbe::new(3);
        probe.scrape_starting("a");
        tokio::time::advance(Duration::from_millis(100)).await;
        probe.scrape_starting("b");
        assert_eq!(probe.in_flight(), 2);

        probe.scrape_ending("a");
        assert_eq!(probe.iterations(), 0);

        tokio::time::advance(Duration::from_millis(50)).await;
        probe.scrape_ending("b");

        assert_eq!(probe.iterations(), 1);
        assert_eq!(probe.results(), vec![Duration::from_millis(150)]);
    }

    #[test]
    fn ending_unknown_topic_is_ignored() {
        let probe = ScrapeProbe::new(1);
        probe.scrape_starting("a");
        probe.scrape_ending("b");
        assert_eq!(probe.in_flight(), 1);
        assert_eq!(probe.iterations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn summary_reports_mean_and_stdev() {
        let probe = ScrapeProbe::new(2);
        for millis in [100, 300] {
            probe.scrape_starting("a");
            tokio::time::advance(Duration::from_millis(millis)).await;
            probe.scrape_ending("a");
        }

        let summary = probe.summary().unwrap();
        assert_eq!(summary.runs, 2);
        assert!((summary.mean - 0.2).abs() < 1e-9);
        assert!((summary.stdev - 0.141_421_356).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_keeps_recording_after_target() {
        let probe = ScrapeProbe::new(1);
        for _ in 0..3 {
            probe.scrape_starting("a");
            tokio::time::advance(Duration::from_millis(10)).await;
            probe.scrape_ending("a");
        }
        assert_eq!(probe.iterations(), 3);
    }
}
