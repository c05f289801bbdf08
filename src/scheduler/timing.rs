// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scrape timing.
//!
//! Every device polls on wall-clock boundaries counted from midnight UTC,
//! shifted by a per-device offset. Anchoring to the clock instead of to the
//! previous wake keeps schedules independent of process start time and free
//! of drift.

use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Computes the offset of a device within its polling interval.
///
/// The raw offset is `slot * quantum + group * group_quantum`. An offset
/// that does not fit within `interval` is reduced modulo the interval, so
/// the result always satisfies `offset < interval` (for a non-zero
/// interval).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use platform_driver::scheduler::compute_offset;
///
/// let offset = compute_offset(
///     2,
///     Duration::from_secs(1),
///     0,
///     Duration::ZERO,
///     Duration::from_secs(60),
/// );
/// assert_eq!(offset, Duration::from_secs(2));
/// ```
#[must_use]
pub fn compute_offset(
    slot: usize,
    quantum: Duration,
    group: usize,
    group_quantum: Duration,
    interval: Duration,
) -> Duration {
    let raw = scale(quantum, slot).saturating_add(scale(group_quantum, group));

    if interval.is_zero() {
        return Duration::ZERO;
    }
    if raw < interval {
        return raw;
    }

    let reduced = raw.as_nanos() % interval.as_nanos();
    let reduced = Duration::from_nanos(u64::try_from(reduced).unwrap_or(u64::MAX));
    tracing::warn!(
        offset = ?raw,
        interval = ?interval,
        reduced = ?reduced,
        "Scrape offset exceeds interval, reducing"
    );
    reduced
}

/// Returns the first wake time at or after `now`.
///
/// The result is the next interval boundary counted from midnight UTC plus
/// `offset`. When `now` lies exactly on a boundary that boundary is used,
/// so the result is always `now + offset` or later and always aligned to
/// `midnight + k * interval + offset`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use platform_driver::scheduler::find_starting_datetime;
///
/// let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 25).unwrap();
/// let start = find_starting_datetime(now, Duration::from_secs(60), Duration::from_secs(2));
/// assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 15, 10, 31, 2).unwrap());
/// ```
#[must_use]
pub fn find_starting_datetime(
    now: DateTime<Utc>,
    interval: Duration,
    offset: Duration,
) -> DateTime<Utc> {
    let offset = to_delta(offset);
    let Ok(midnight) = now.duration_trunc(TimeDelta::days(1)) else {
        return add(now, offset);
    };

    let since_midnight = (now - midnight).num_nanoseconds().unwrap_or(0);
    let interval_nanos = i64::try_from(interval.as_nanos()).unwrap_or(i64::MAX);
    if interval_nanos <= 0 {
        return add(now, offset);
    }

    let remainder = since_midnight % interval_nanos;
    if remainder == 0 {
        return add(now, offset);
    }

    let next_boundary = since_midnight - remainder + interval_nanos;
    add(add(midnight, TimeDelta::nanoseconds(next_boundary)), offset)
}

/// Computes the wake that follows `scheduled`.
///
/// Normally this is `scheduled + interval`. If `now` is already more than
/// one interval past `scheduled` (the host was suspended, or the runtime
/// stalled) the missed cycles are skipped and the schedule re-anchors with
/// [`find_starting_datetime`].
#[must_use]
pub fn next_wake(
    scheduled: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: Duration,
    offset: Duration,
) -> DateTime<Utc> {
    let interval_delta = to_delta(interval);
    if now - scheduled > interval_delta {
        let anchored = find_starting_datetime(now, interval, offset);
        tracing::warn!(
            scheduled = %scheduled,
            next = %anchored,
            "Scrape woke late, skipping missed cycles"
        );
        return anchored;
    }
    add(scheduled, interval_delta)
}

/// Converts a wall-clock gap into a sleep duration, clamping the past to zero.
#[must_use]
pub fn until(wake: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (wake - now).to_std().unwrap_or(Duration::ZERO)
}

fn scale(quantum: Duration, count: usize) -> Duration {
    quantum.saturating_mul(u32::try_from(count).unwrap_or(u32::MAX))
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn add(t: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    t.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
