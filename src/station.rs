//! Sampling glue: turns counter state and environmental readings into a
//! `Record` for whichever wire schema is in use.
//!
//! Field values are looked up by field name, so any schema built from the
//! names below can be sampled without touching this module. Names the station
//! cannot supply are reported as NaN (0 for integer fields).

use thiserror::Error;

use crate::clock::{Clock, MonotonicClock};
use crate::counter::{Anemometer, RainGauge};
use crate::record::Record;
use crate::schema::Schema;

/// Failure reported by an environmental sensor driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{sensor}: {message}")]
pub struct SensorError {
    pub sensor: &'static str,
    pub message: String,
}

impl SensorError {
    pub fn new(sensor: &'static str, message: impl Into<String>) -> Self {
        Self {
            sensor,
            message: message.into(),
        }
    }
}

/// Linear calibration from a raw sensor reading to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    pub scale: f64,
    pub offset: f64,
}

impl Linear {
    /// Analog wind vane on a 16-bit ADC, to degrees from north.
    pub const WIND_DIRECTION: Self = Self::new(0.013113, 4.66);
    /// Analog soil moisture probe, raw counts.
    pub const SOIL_MOISTURE: Self = Self::new(1.0, 0.0);
    /// DS18B20 1-wire thermometer, millidegrees to degrees Celsius.
    pub const DS18B20: Self = Self::new(1.0 / 1000.0, 0.0);

    pub const fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.scale + self.offset
    }
}

/// One reading of the non-counter sensors. Missing values are NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReading {
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    pub altitude_m: f64,
    pub temperature2_c: f64,
    pub relative_humidity: f64,
    pub wind_direction_deg_n: f64,
    pub soil_temperature_c: f64,
    pub soil_moisture_raw: f64,
}

impl Default for EnvironmentReading {
    fn default() -> Self {
        Self {
            temperature_c: f64::NAN,
            pressure_hpa: f64::NAN,
            altitude_m: f64::NAN,
            temperature2_c: f64::NAN,
            relative_humidity: f64::NAN,
            wind_direction_deg_n: f64::NAN,
            soil_temperature_c: f64::NAN,
            soil_moisture_raw: f64::NAN,
        }
    }
}

/// Source of environmental readings (I2C, ADC and 1-wire drivers).
pub trait Environment: Send {
    fn read(&mut self) -> Result<EnvironmentReading, SensorError>;
}

impl<F> Environment for F
where
    F: FnMut() -> Result<EnvironmentReading, SensorError> + Send,
{
    fn read(&mut self) -> Result<EnvironmentReading, SensorError> {
        self()
    }
}

/// Environment with no sensors attached: every reading is NaN.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl Environment for Unavailable {
    fn read(&mut self) -> Result<EnvironmentReading, SensorError> {
        Ok(EnvironmentReading::default())
    }
}

/// Builds records from the station's sensors.
pub struct Station<C: Clock = MonotonicClock> {
    schema: &'static Schema,
    rain: RainGauge<C>,
    wind: Option<Anemometer<C>>,
    environment: Box<dyn Environment>,
    rain_rate_window_s: Option<f64>,
}

impl<C: Clock> Station<C> {
    pub fn new(schema: &'static Schema, rain: RainGauge<C>) -> Self {
        Self {
            schema,
            rain,
            wind: None,
            environment: Box::new(Unavailable),
            rain_rate_window_s: None,
        }
    }

    pub fn with_wind(mut self, wind: Anemometer<C>) -> Self {
        self.wind = Some(wind);
        self
    }

    pub fn with_environment(mut self, environment: Box<dyn Environment>) -> Self {
        self.environment = environment;
        self
    }

    /// Averages the rain rate over a trailing window instead of the whole run.
    pub fn with_rain_rate_window(mut self, window_s: f64) -> Self {
        self.rain_rate_window_s = Some(window_s);
        self
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn rain(&self) -> &RainGauge<C> {
        &self.rain
    }

    /// Takes one sample. Environmental driver failures are returned as-is.
    pub fn sample(&mut self) -> Result<Record, SensorError> {
        let env = self.environment.read()?;
        let elapsed_s = self.rain.counter().elapsed().as_secs_f64();
        Ok(Record::from_fn(self.schema, |field| {
            self.measurement(field.name, elapsed_s, &env)
        }))
    }

    fn measurement(&self, name: &str, elapsed_s: f64, env: &EnvironmentReading) -> f64 {
        match name {
            "elapsed_s" | "time_elapsed_s" => elapsed_s,
            "tip_count" => self.rain.tips() as f64,
            "rain_mm" => self.rain.rain_mm(),
            "rain_rate_mm_h" => self.rain.rain_rate_mm_h(self.rain_rate_window_s),
            "temperature_C" | "temperature_bmp280_C" => env.temperature_c,
            "pressure_hPa" => env.pressure_hpa,
            "altitude_m" => env.altitude_m,
            "temperature2_C" | "temperature_sht31d_C" => env.temperature2_c,
            "relative_humidity" => env.relative_humidity,
            "wind_gust_m_s_3s" => self.wind.as_ref().map_or(f64::NAN, |w| w.gust_m_s()),
            "wind_sustained_m_s_10min" => {
                self.wind.as_ref().map_or(f64::NAN, |w| w.sustained_m_s())
            }
            "wind_direction_deg_n" => env.wind_direction_deg_n,
            "soil_temperature_C" => env.soil_temperature_c,
            "soil_moisture_raw" => env.soil_moisture_raw,
            _ => f64::NAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::counter::{CounterProfile, EdgeCounter};
    use crate::record::Value;
    use crate::schema::{FINAL, RAIN, STATION};
    use std::sync::Arc;
    use std::time::Duration;

    fn rain_counter(clock: &ManualClock) -> Arc<EdgeCounter<ManualClock>> {
        Arc::new(EdgeCounter::new(clock.clone(), CounterProfile::RAIN_GAUGE))
    }

    fn bench_environment() -> Box<dyn Environment> {
        Box::new(|| -> Result<EnvironmentReading, SensorError> {
            Ok(EnvironmentReading {
                temperature_c: 21.3,
                pressure_hpa: 1013.2,
                altitude_m: 50.1,
                temperature2_c: 21.4,
                relative_humidity: 44.0,
                wind_direction_deg_n: Linear::WIND_DIRECTION.apply(10_000.0),
                soil_temperature_c: Linear::DS18B20.apply(18_250.0),
                soil_moisture_raw: 512.0,
            })
        })
    }

    #[test]
    fn test_final_sample_matches_counter_state() {
        let clock = ManualClock::new();
        let counter = rain_counter(&clock);
        for _ in 0..3 {
            counter.record_event();
        }
        clock.advance(Duration::from_millis(12_500));

        let mut station =
            Station::new(&FINAL, RainGauge::new(counter)).with_environment(bench_environment());
        let record = station.sample().unwrap();

        let expected = [
            Value::F32(12.5),
            Value::U32(3),
            Value::F32(0.6),
            Value::F32(172.8),
            Value::F32(21.3),
            Value::F32(1013.2),
            Value::F32(50.1),
            Value::F32(21.4),
            Value::F32(44.0),
        ];
        assert_eq!(record.values(), &expected);
    }

    #[test]
    fn test_missing_sensors_are_nan() {
        let clock = ManualClock::new();
        let mut station = Station::new(&STATION, RainGauge::new(rain_counter(&clock)));
        let record = station.sample().unwrap();

        match record.get("pressure_hPa") {
            Some(Value::F32(v)) => assert!(v.is_nan()),
            other => panic!("unexpected {other:?}"),
        }
        match record.get("wind_gust_m_s_3s") {
            Some(Value::F32(v)) => assert!(v.is_nan()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(record.get("soil_moisture_raw"), Some(Value::U32(0)));
    }

    #[test]
    fn test_station_schema_with_wind() {
        let clock = ManualClock::new();
        let wind = Arc::new(EdgeCounter::new(clock.clone(), CounterProfile::GENERIC));
        clock.advance(Duration::from_secs(1));
        for _ in 0..3 {
            wind.record_event();
        }
        clock.advance(Duration::from_secs(2));

        let mut station = Station::new(&STATION, RainGauge::new(rain_counter(&clock)))
            .with_wind(Anemometer::new(wind))
            .with_environment(bench_environment());
        let record = station.sample().unwrap();

        assert_eq!(record.get("wind_gust_m_s_3s"), Some(Value::F32(1.0)));
        assert_eq!(record.get("soil_temperature_C"), Some(Value::F32(18.25)));
        assert_eq!(record.get("soil_moisture_raw"), Some(Value::U32(512)));
        assert_eq!(
            record.get("wind_direction_deg_n"),
            Some(Value::F32((10_000.0 * 0.013113 + 4.66) as f32))
        );
    }

    #[test]
    fn test_rain_rate_window() {
        let clock = ManualClock::new();
        let counter = rain_counter(&clock);
        counter.record_event();
        clock.advance(Duration::from_secs(600));
        counter.record_event();
        clock.advance(Duration::from_secs(60));

        let mut station = Station::new(&RAIN, RainGauge::new(counter)).with_rain_rate_window(300.0);
        let record = station.sample().unwrap();
        // One 0.2 mm tip in the last 300 s: 0.2 / 300 * 3600.
        assert_eq!(record.get("rain_rate_mm_h"), Some(Value::F32(2.4)));
    }

    #[test]
    fn test_sensor_fault_propagates() {
        let clock = ManualClock::new();
        let mut station = Station::new(&FINAL, RainGauge::new(rain_counter(&clock)))
            .with_environment(Box::new(|| -> Result<EnvironmentReading, SensorError> {
                Err(SensorError::new("bmp280", "i2c nack"))
            }));
        let err = station.sample().unwrap_err();
        assert_eq!(err.to_string(), "bmp280: i2c nack");
    }
}
