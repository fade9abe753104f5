//! Fixed-cadence run loop with drift correction and cooperative cancellation.
//!
//! Each tick's deadline is anchored to that tick's own start, so slow work
//! makes the next tick fire immediately instead of pushing every later tick
//! back. Sleeps are split into `granularity`-sized slices and the
//! cancellation token is checked between slices, which bounds stop latency
//! by the granularity rather than by the period.

use std::convert::Infallible;
use std::time::Duration;

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::clock::{Clock, MonotonicClock};
use crate::schedule::ScheduleSpec;

/// Longest single sleep between cancellation checks.
pub const DEFAULT_GRANULARITY: Duration = Duration::from_millis(500);

/// Outcome of a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of completed `work` invocations.
    pub ticks: u64,
    /// Ticks whose work ran past the period.
    pub overruns: u64,
}

/// Runs a unit of work on a fixed cadence until cancelled.
#[derive(Debug, Clone)]
pub struct Scheduler<C: Clock = MonotonicClock> {
    clock: C,
    cadence: ScheduleSpec,
    granularity: Duration,
}

impl Scheduler<MonotonicClock> {
    pub fn new(cadence: ScheduleSpec) -> Self {
        Self::with_clock(MonotonicClock::new(), cadence)
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn with_clock(clock: C, cadence: ScheduleSpec) -> Self {
        Self {
            clock,
            cadence,
            granularity: DEFAULT_GRANULARITY,
        }
    }

    /// Overrides the sleep slice. Zero is raised to one millisecond.
    pub fn with_granularity(mut self, granularity: Duration) -> Self {
        self.granularity = granularity.max(Duration::from_millis(1));
        self
    }

    pub fn cadence(&self) -> ScheduleSpec {
        self.cadence
    }

    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    /// Invokes `work` once per tick until `cancel` is set.
    pub fn run<F>(&self, mut work: F, cancel: &CancellationToken) -> RunSummary
    where
        F: FnMut(),
    {
        let result = self.try_run(
            || {
                work();
                Ok::<(), Infallible>(())
            },
            cancel,
        );
        match result {
            Ok(summary) => summary,
            Err(never) => match never {},
        }
    }

    /// Like `run`, but stops and returns the first error `work` reports.
    pub fn try_run<F, E>(&self, mut work: F, cancel: &CancellationToken) -> Result<RunSummary, E>
    where
        F: FnMut() -> Result<(), E>,
    {
        let period = self.cadence.period();
        info!(
            "Starting periodic run: period={:?}, granularity={:?}",
            period, self.granularity
        );

        let mut summary = RunSummary::default();
        while !cancel.is_cancelled() {
            let tick_start = self.clock.now();
            let deadline = tick_start.checked_add(period).unwrap_or(Duration::MAX);

            work()?;
            summary.ticks += 1;

            let now = self.clock.now();
            if now >= deadline {
                summary.overruns += 1;
                debug!(
                    "Tick #{} overran period by {:?}",
                    summary.ticks,
                    now - deadline
                );
                continue;
            }
            self.sleep_until(deadline, cancel);
        }

        info!(
            "Periodic run stopped after {} ticks ({} overruns)",
            summary.ticks, summary.overruns
        );
        Ok(summary)
    }

    fn sleep_until(&self, deadline: Duration, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            let now = self.clock.now();
            if now >= deadline {
                return;
            }
            self.clock.sleep((deadline - now).min(self.granularity));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::{Arc, Mutex};

    /// Manual clock that cancels a token once time reaches `cancel_at`.
    struct CancellingClock {
        inner: ManualClock,
        token: CancellationToken,
        cancel_at: Duration,
    }

    impl Clock for CancellingClock {
        fn now(&self) -> Duration {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            if self.inner.now() >= self.cancel_at {
                self.token.cancel();
            }
        }
    }

    fn secs_f(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_ticks_anchor_to_tick_start() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::with_clock(clock.clone(), ScheduleSpec::Period(1.0));

        let mut starts = Vec::new();
        let summary = scheduler.run(
            || {
                starts.push(clock.now());
                // Work takes 0.3 s of the 1 s period.
                clock.advance(secs_f(0.3));
                if starts.len() == 10 {
                    cancel.cancel();
                }
            },
            &cancel,
        );

        assert_eq!(summary.ticks, 10);
        assert_eq!(summary.overruns, 0);
        for (k, start) in starts.iter().enumerate() {
            assert_eq!(*start, Duration::from_secs(k as u64));
        }
    }

    #[test]
    fn test_drift_bounded_with_odd_period() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let granularity = Duration::from_millis(500);
        let scheduler = Scheduler::with_clock(clock.clone(), ScheduleSpec::Period(0.7))
            .with_granularity(granularity);

        let mut starts = Vec::new();
        scheduler.run(
            || {
                starts.push(clock.now());
                if starts.len() == 50 {
                    cancel.cancel();
                }
            },
            &cancel,
        );

        let period = ScheduleSpec::Period(0.7).period();
        for (k, start) in starts.iter().enumerate() {
            let ideal = period * k as u32;
            let skew = start.abs_diff(ideal);
            assert!(skew <= granularity, "tick {k} skewed by {skew:?}");
        }
    }

    #[test]
    fn test_overrun_fires_next_tick_immediately() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::with_clock(clock.clone(), ScheduleSpec::Period(1.0));

        let mut starts = Vec::new();
        let summary = scheduler.run(
            || {
                starts.push(clock.now());
                clock.advance(secs_f(1.5));
                if starts.len() == 3 {
                    cancel.cancel();
                }
            },
            &cancel,
        );

        assert_eq!(starts, vec![secs_f(0.0), secs_f(1.5), secs_f(3.0)]);
        assert_eq!(summary.overruns, 3);
    }

    #[test]
    fn test_cancel_during_sleep_stops_within_granularity() {
        let token = CancellationToken::new();
        let granularity = Duration::from_millis(500);
        let cancel_at = secs_f(12.2);
        let clock = Arc::new(CancellingClock {
            inner: ManualClock::new(),
            token: token.clone(),
            cancel_at,
        });
        let scheduler = Scheduler::with_clock(clock.clone(), ScheduleSpec::Period(10.0))
            .with_granularity(granularity);

        let calls = Mutex::new(0u32);
        let summary = scheduler.run(|| *calls.lock().unwrap() += 1, &token);

        // Ticks at t=0 and t=10; cancelled while sleeping towards t=20.
        assert_eq!(summary.ticks, 2);
        assert_eq!(*calls.lock().unwrap(), 2);
        let stopped_at = clock.now();
        assert!(stopped_at >= cancel_at);
        assert!(stopped_at - cancel_at <= granularity);
    }

    #[test]
    fn test_cancel_before_start_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler = Scheduler::with_clock(ManualClock::new(), ScheduleSpec::Period(1.0));

        let mut calls = 0;
        let summary = scheduler.run(|| calls += 1, &cancel);
        assert_eq!(calls, 0);
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn test_try_run_propagates_work_error() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::with_clock(clock, ScheduleSpec::Frequency(2.0));

        let mut calls = 0;
        let result = scheduler.try_run(
            || {
                calls += 1;
                if calls == 3 { Err("sensor fault") } else { Ok(()) }
            },
            &cancel,
        );
        assert_eq!(result, Err("sensor fault"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_real_clock_cancellation_latency() {
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(ScheduleSpec::Period(30.0))
            .with_granularity(Duration::from_millis(20));

        let remote = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = std::time::Instant::now();
        let mut calls = 0;
        scheduler.run(|| calls += 1, &cancel);
        let took = started.elapsed();
        canceller.join().unwrap();

        assert_eq!(calls, 1);
        assert!(took < Duration::from_secs(2), "run took {took:?}");
    }
}
