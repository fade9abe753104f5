//! Tick cadence: a period or a frequency, never both.

use std::time::Duration;

use thiserror::Error;

/// Sleep floor used when the cadence would otherwise be zero or undefined.
pub const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Default cadence: one tick per second.
pub const DEFAULT_PERIOD_S: f64 = 1.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("period must be a finite, non-negative number of seconds, got {0}")]
    InvalidPeriod(f64),

    #[error("frequency must be a finite, non-negative number of hertz, got {0}")]
    InvalidFrequency(f64),
}

/// How often the scheduler fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleSpec {
    /// Seconds between tick starts.
    Period(f64),
    /// Ticks per second.
    Frequency(f64),
}

impl ScheduleSpec {
    pub fn from_period_s(period_s: f64) -> Result<Self, ScheduleError> {
        if !period_s.is_finite() || period_s < 0.0 {
            return Err(ScheduleError::InvalidPeriod(period_s));
        }
        Ok(Self::Period(period_s))
    }

    pub fn from_frequency(hz: f64) -> Result<Self, ScheduleError> {
        if !hz.is_finite() || hz < 0.0 {
            return Err(ScheduleError::InvalidFrequency(hz));
        }
        Ok(Self::Frequency(hz))
    }

    /// Builds a cadence from optional CLI-style inputs; the period wins
    /// when both are given, and the default applies when neither is.
    pub fn from_options(
        period_s: Option<f64>,
        frequency: Option<f64>,
    ) -> Result<Self, ScheduleError> {
        match (period_s, frequency) {
            (Some(p), _) => Self::from_period_s(p),
            (None, Some(f)) => Self::from_frequency(f),
            (None, None) => Self::from_period_s(DEFAULT_PERIOD_S),
        }
    }

    /// Effective time between tick starts, floored at `MIN_PERIOD`.
    pub fn period(&self) -> Duration {
        let secs = match *self {
            Self::Period(p) => p,
            Self::Frequency(f) if f > 0.0 => 1.0 / f,
            Self::Frequency(_) => 0.0,
        };
        if !secs.is_finite() || secs <= 0.0 {
            return MIN_PERIOD;
        }
        // Very small frequencies produce periods beyond Duration's range.
        Duration::try_from_secs_f64(secs)
            .unwrap_or(Duration::MAX)
            .max(MIN_PERIOD)
    }

    /// Effective ticks per second.
    pub fn frequency(&self) -> f64 {
        1.0 / self.period().as_secs_f64()
    }
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self::Period(DEFAULT_PERIOD_S)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_and_frequency_convert() {
        let spec = ScheduleSpec::from_frequency(4.0).unwrap();
        assert_eq!(spec.period(), Duration::from_millis(250));

        let spec = ScheduleSpec::from_period_s(0.5).unwrap();
        assert_eq!(spec.frequency(), 2.0);
    }

    #[test]
    fn test_zero_cadence_uses_floor() {
        assert_eq!(ScheduleSpec::Frequency(0.0).period(), MIN_PERIOD);
        assert_eq!(ScheduleSpec::Period(0.0).period(), MIN_PERIOD);
        assert_eq!(ScheduleSpec::Period(0.001).period(), MIN_PERIOD);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(matches!(
            ScheduleSpec::from_period_s(-1.0),
            Err(ScheduleError::InvalidPeriod(_))
        ));
        assert!(matches!(
            ScheduleSpec::from_frequency(f64::NAN),
            Err(ScheduleError::InvalidFrequency(_))
        ));
    }

    #[test]
    fn test_from_options() {
        assert_eq!(
            ScheduleSpec::from_options(None, None).unwrap(),
            ScheduleSpec::Period(1.0)
        );
        assert_eq!(
            ScheduleSpec::from_options(None, Some(8.0)).unwrap().period(),
            Duration::from_millis(125)
        );
        assert_eq!(
            ScheduleSpec::from_options(Some(2.0), None).unwrap().period(),
            Duration::from_secs(2)
        );
    }
}
