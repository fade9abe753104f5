//! Edge-triggered event counters (rain-gauge tips, anemometer pulses).
//!
//! An `EdgeCounter` is fed by an interrupt-style callback (`record_event`) on
//! one thread and read by the sampling loop on another. Count, timestamp
//! history and start time live behind a single mutex so a reader can never
//! observe a count increment without its timestamp. The clock is read while
//! the mutex is held, so timestamps are appended in ascending order and never
//! precede the start timestamp.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};

/// Seconds per hour, used to turn per-second rates into per-hour rates.
pub const SECS_PER_HOUR: f64 = 3600.0;

/// Maps raw event counts to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterProfile {
    /// Physical units per event.
    pub scale: f64,
    /// Added to the scaled total.
    pub offset: f64,
    /// Decimal places kept by `total()`.
    pub total_precision: u32,
    /// Decimal places kept by `average()`.
    pub rate_precision: u32,
}

impl CounterProfile {
    /// Plain event counter: one unit per event.
    pub const GENERIC: Self = Self {
        scale: 1.0,
        offset: 0.0,
        total_precision: 2,
        rate_precision: 2,
    };

    /// Tipping-bucket rain gauge: 0.2 mm per tip, totals to 0.1 mm.
    pub const RAIN_GAUGE: Self = Self {
        scale: 0.2,
        offset: 0.0,
        total_precision: 1,
        rate_precision: 2,
    };

    /// Cup anemometer: one pulse per second is 2.4 km/h (0.667 m/s).
    pub const ANEMOMETER: Self = Self {
        scale: 2.4 / 3.6,
        offset: 0.0,
        total_precision: 2,
        rate_precision: 2,
    };

    pub fn new(scale: f64, offset: f64) -> Self {
        Self {
            scale,
            offset,
            ..Self::GENERIC
        }
    }

    pub fn with_precision(mut self, total_precision: u32, rate_precision: u32) -> Self {
        self.total_precision = total_precision;
        self.rate_precision = rate_precision;
        self
    }
}

impl Default for CounterProfile {
    fn default() -> Self {
        Self::GENERIC
    }
}

/// Rounds `value` to `places` decimal places (half away from zero).
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

#[derive(Debug)]
struct CounterState {
    count: u64,
    /// Events since the start timestamp was last re-stamped.
    since_start: u64,
    /// Ascending event timestamps, possibly pruned to the retention horizon.
    times: VecDeque<Duration>,
    start: Duration,
}

impl CounterState {
    fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.start)
    }
}

/// Thread-safe counter of discrete edge events.
#[derive(Debug)]
pub struct EdgeCounter<C: Clock = MonotonicClock> {
    clock: C,
    profile: CounterProfile,
    horizon: Option<Duration>,
    state: Mutex<CounterState>,
}

impl EdgeCounter<MonotonicClock> {
    /// Creates a counter on the real monotonic clock, started now.
    pub fn monotonic(profile: CounterProfile) -> Self {
        Self::new(MonotonicClock::new(), profile)
    }
}

impl<C: Clock> EdgeCounter<C> {
    /// Creates a counter whose start timestamp is the clock's current time.
    pub fn new(clock: C, profile: CounterProfile) -> Self {
        let start = clock.now();
        Self {
            clock,
            profile,
            horizon: None,
            state: Mutex::new(CounterState {
                count: 0,
                since_start: 0,
                times: VecDeque::new(),
                start,
            }),
        }
    }

    /// Limits timestamp retention to `horizon`.
    ///
    /// The count stays exact; windowed queries longer than the horizon only
    /// see the retained events.
    pub fn with_history_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = Some(horizon);
        self
    }

    pub fn profile(&self) -> CounterProfile {
        self.profile
    }

    fn lock(&self) -> MutexGuard<'_, CounterState> {
        // Every mutation completes before its guard drops; poison carries no torn state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records one edge event at the current time.
    ///
    /// Safe to call from an event-callback thread concurrently with readers.
    pub fn record_event(&self) {
        let mut state = self.lock();
        let now = self.clock.now();
        state.count += 1;
        state.since_start += 1;
        state.times.push_back(now);
        if let Some(horizon) = self.horizon {
            let cutoff = now.saturating_sub(horizon);
            while state.times.front().is_some_and(|t| *t < cutoff) {
                state.times.pop_front();
            }
        }
    }

    /// Raw number of events since the last count reset.
    pub fn count(&self) -> u64 {
        self.lock().count
    }

    /// Time since the start timestamp.
    pub fn elapsed(&self) -> Duration {
        let state = self.lock();
        state.elapsed(self.clock.now())
    }

    /// Count converted to physical units and rounded to the profile precision.
    pub fn total(&self) -> f64 {
        let count = self.lock().count;
        round_to(
            count as f64 * self.profile.scale + self.profile.offset,
            self.profile.total_precision,
        )
    }

    /// Sets the count from a physical total, rounding to the nearest event.
    ///
    /// Dropped events are taken from the oldest end of the history; added
    /// events are stamped now.
    pub fn set_total(&self, total: f64) {
        let target = if self.profile.scale == 0.0 {
            0
        } else {
            ((total - self.profile.offset) / self.profile.scale)
                .round()
                .max(0.0) as u64
        };
        let mut state = self.lock();
        let now = self.clock.now();
        if target < state.count {
            let removed = state.count - target;
            let drop_n = (removed as usize).min(state.times.len());
            state.times.drain(..drop_n);
            state.since_start = state.since_start.min(target);
        } else {
            let added = target - state.count;
            state.times.extend(std::iter::repeat_n(now, added as usize));
            state.since_start += added;
        }
        state.count = target;
    }

    /// Unrounded scaled event rate per second.
    ///
    /// `None` averages over the whole time since start. A window of zero,
    /// negative or non-finite seconds yields 0. The window never reaches
    /// back past the start timestamp.
    pub fn rate(&self, window_s: Option<f64>) -> f64 {
        let state = self.lock();
        let now = self.clock.now();
        let elapsed = state.elapsed(now).as_secs_f64();

        let (events, denominator) = match window_s {
            None => (state.since_start, elapsed),
            Some(window) => {
                if !window.is_finite() || window <= 0.0 {
                    return 0.0;
                }
                let effective = window.min(elapsed);
                let cutoff = now.saturating_sub(Duration::from_secs_f64(effective));
                let events = state.times.iter().rev().take_while(|t| **t > cutoff).count();
                (events as u64, effective)
            }
        };

        if denominator <= 0.0 {
            return 0.0;
        }
        events as f64 * self.profile.scale / denominator
    }

    /// Scaled event rate per second, rounded to the profile precision.
    pub fn average(&self, window_s: Option<f64>) -> f64 {
        self.average_scaled(window_s, 1.0)
    }

    /// Like `average`, with the rate multiplied by `multiplier` before
    /// rounding (e.g. `SECS_PER_HOUR` for per-hour rates).
    pub fn average_scaled(&self, window_s: Option<f64>, multiplier: f64) -> f64 {
        round_to(self.rate(window_s) * multiplier, self.profile.rate_precision)
    }

    /// Zeroes the count and its history; the start timestamp is kept.
    pub fn reset_count(&self) {
        let mut state = self.lock();
        state.count = 0;
        state.since_start = 0;
        state.times.clear();
    }

    /// Re-stamps the start timestamp; the count is kept.
    pub fn reset_time(&self) {
        let mut state = self.lock();
        let now = self.clock.now();
        state.start = now;
        state.since_start = 0;
    }

    /// Zeroes the count and re-stamps the start timestamp in one step.
    pub fn reset(&self) {
        let mut state = self.lock();
        let now = self.clock.now();
        state.count = 0;
        state.since_start = 0;
        state.times.clear();
        state.start = now;
    }
}

/// Tipping-bucket rain gauge on top of an `EdgeCounter`.
#[derive(Debug)]
pub struct RainGauge<C: Clock = MonotonicClock> {
    counter: std::sync::Arc<EdgeCounter<C>>,
}

impl<C: Clock> RainGauge<C> {
    pub fn new(counter: std::sync::Arc<EdgeCounter<C>>) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &std::sync::Arc<EdgeCounter<C>> {
        &self.counter
    }

    pub fn tips(&self) -> u64 {
        self.counter.count()
    }

    /// Accumulated rain in millimetres.
    pub fn rain_mm(&self) -> f64 {
        self.counter.total()
    }

    /// Rain rate in mm/h over the given window (whole run when `None`).
    pub fn rain_rate_mm_h(&self, window_s: Option<f64>) -> f64 {
        self.counter.average_scaled(window_s, SECS_PER_HOUR)
    }
}

/// Cup anemometer speed sensor on top of an `EdgeCounter`.
#[derive(Debug)]
pub struct Anemometer<C: Clock = MonotonicClock> {
    counter: std::sync::Arc<EdgeCounter<C>>,
}

impl<C: Clock> Anemometer<C> {
    /// Window for gust speed.
    pub const GUST_WINDOW_S: f64 = 3.0;
    /// Window for sustained speed.
    pub const SUSTAINED_WINDOW_S: f64 = 600.0;

    pub fn new(counter: std::sync::Arc<EdgeCounter<C>>) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &std::sync::Arc<EdgeCounter<C>> {
        &self.counter
    }

    /// Wind speed in m/s over the last 3 seconds.
    pub fn gust_m_s(&self) -> f64 {
        self.counter.average(Some(Self::GUST_WINDOW_S))
    }

    /// Wind speed in m/s over the last 10 minutes.
    pub fn sustained_m_s(&self) -> f64 {
        self.counter.average(Some(Self::SUSTAINED_WINDOW_S))
    }
}
