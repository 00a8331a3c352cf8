//! Sensor readings: raw sources, transfer curves, and the per-tick snapshot.
//!
//! Sources report the raw transduced value (a voltage for the analog probes,
//! degrees Celsius for the 1-wire water probe). The snapshot applies the
//! transfer curves, including the live pH calibration, so a reading is only
//! ever converted with the model of the tick that took it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::calibration::CalibrationModel;
use crate::humidity::{round_to, to_fahrenheit};

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    AirTemperature,
    RelativeHumidity,
    WaterTemperature,
    PhProbe,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AirTemperature => write!(f, "air temperature"),
            Self::RelativeHumidity => write!(f, "relative humidity"),
            Self::WaterTemperature => write!(f, "water temperature"),
            Self::PhProbe => write!(f, "pH"),
        }
    }
}

/// A value, or the reason there isn't one. Never defaulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Value(f64),
    Unavailable(String),
}

impl Reading {
    #[cfg(test)]
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Unavailable(_) => None,
        }
    }

    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Reading {
        match self {
            Self::Value(v) => Self::Value(f(v)),
            other => other,
        }
    }
}

/// Physical readings for one tick. Temperatures in °F, humidity in %.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub temperature: Reading,
    pub relative_humidity: Reading,
    pub water_temperature: Reading,
    pub ph: Reading,
}

impl SensorSnapshot {
    pub fn unavailable(reason: &str) -> Self {
        Self {
            temperature: Reading::Unavailable(reason.to_string()),
            relative_humidity: Reading::Unavailable(reason.to_string()),
            water_temperature: Reading::Unavailable(reason.to_string()),
            ph: Reading::Unavailable(reason.to_string()),
        }
    }
}

/// Anything that can produce raw readings. Implementations must not fail:
/// a missing sensor is reported as `Reading::Unavailable`.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn read(&self, quantity: Quantity) -> Reading;
}

// ---------------------------------------------------------------------------
// Transfer curves
// ---------------------------------------------------------------------------

/// TMP36-style analog temperature sensor: 10 mV/°C with a 500 mV offset.
fn air_temperature_f(volts: f64) -> f64 {
    to_fahrenheit((volts - 0.5) * 100.0)
}

/// HIH-4000-style humidity sensor at 3.3 V supply.
fn relative_humidity(volts: f64) -> f64 {
    (volts - 0.8) / 0.0062
}

/// Read every sensor once and convert to physical units.
pub async fn take_snapshot(source: &dyn SensorSource, model: &CalibrationModel) -> SensorSnapshot {
    let (temperature, relative_humidity_raw, water_temperature, ph) = tokio::join!(
        source.read(Quantity::AirTemperature),
        source.read(Quantity::RelativeHumidity),
        source.read(Quantity::WaterTemperature),
        source.read(Quantity::PhProbe),
    );
    SensorSnapshot {
        temperature: temperature.map(|v| round_to(air_temperature_f(v), 2)),
        relative_humidity: relative_humidity_raw.map(|v| round_to(relative_humidity(v), 2)),
        water_temperature: water_temperature.map(|c| round_to(to_fahrenheit(c), 2)),
        ph: ph.map(|v| round_to(model.convert(v), 2)),
    }
}

/// [`take_snapshot`] bounded by `limit`; a hung source yields an
/// all-unavailable snapshot instead of stalling the caller.
pub async fn take_snapshot_within(
    source: &dyn SensorSource,
    model: &CalibrationModel,
    limit: Duration,
) -> SensorSnapshot {
    match tokio::time::timeout(limit, take_snapshot(source, model)).await {
        Ok(s) => s,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "sensor read timed out");
            SensorSnapshot::unavailable("sensor read timed out")
        }
    }
}

/// Read only the pH probe, converted with `model`.
pub async fn read_ph(
    source: &dyn SensorSource,
    model: &CalibrationModel,
    limit: Duration,
) -> Reading {
    match tokio::time::timeout(limit, source.read(Quantity::PhProbe)).await {
        Ok(r) => r.map(|v| round_to(model.convert(v), 2)),
        Err(_) => Reading::Unavailable("pH read timed out".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Telemetry-fed sensors (MQTT)
// ---------------------------------------------------------------------------

/// Latest raw reading per quantity, pushed in by the MQTT event loop.
pub struct TelemetrySensors {
    latest: Mutex<HashMap<Quantity, (f64, Instant)>>,
    stale_after: Duration,
}

impl TelemetrySensors {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            latest: Mutex::new(HashMap::new()),
            stale_after,
        }
    }

    pub fn record(&self, quantity: Quantity, raw: f64) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        latest.insert(quantity, (raw, Instant::now()));
    }
}

#[async_trait]
impl SensorSource for TelemetrySensors {
    async fn read(&self, quantity: Quantity) -> Reading {
        let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        match latest.get(&quantity) {
            None => Reading::Unavailable(format!("no {quantity} reading received")),
            Some((_, at)) if at.elapsed() > self.stale_after => Reading::Unavailable(format!(
                "stale {quantity} reading ({}s old)",
                at.elapsed().as_secs()
            )),
            Some((raw, _)) if !raw.is_finite() => {
                Reading::Unavailable(format!("non-finite {quantity} reading"))
            }
            Some((raw, _)) => Reading::Value(*raw),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated sensors
// ---------------------------------------------------------------------------

/// Approximate N(0,1) via Irwin-Hall: twelve uniforms minus six.
fn approx_std_normal() -> f64 {
    let mut sum = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

struct Walk {
    value: f64,
    center: f64,
    sigma: f64,
    reversion: f64,
}

impl Walk {
    fn step(&mut self) -> f64 {
        let pull = self.reversion * (self.center - self.value);
        self.value += pull + self.sigma * approx_std_normal();
        self.value
    }
}

/// Mean-reverting random walk in raw-signal space, for development without
/// hardware attached.
pub struct SimulatedSensors {
    walks: Mutex<HashMap<Quantity, Walk>>,
}

impl SimulatedSensors {
    pub fn new() -> Self {
        let walk = |center: f64, sigma: f64| Walk {
            value: center,
            center,
            sigma,
            reversion: 0.1,
        };
        let walks = HashMap::from([
            // ~24 °C
            (Quantity::AirTemperature, walk(0.74, 0.01)),
            // ~60 % RH
            (Quantity::RelativeHumidity, walk(1.17, 0.01)),
            // °C straight from the 1-wire probe
            (Quantity::WaterTemperature, walk(20.0, 0.2)),
            // ~pH 6.3 on the default curve
            (Quantity::PhProbe, walk(1.63, 0.005)),
        ]);
        Self {
            walks: Mutex::new(walks),
        }
    }
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorSource for SimulatedSensors {
    async fn read(&self, quantity: Quantity) -> Reading {
        let mut walks = self.walks.lock().unwrap_or_else(|e| e.into_inner());
        match walks.get_mut(&quantity) {
            Some(w) => Reading::Value(w.step()),
            None => Reading::Unavailable(format!("{quantity} not simulated")),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
