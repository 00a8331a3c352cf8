//! Psychrometric helpers: temperature unit conversion and vapor-pressure
//! deficit.

use serde::{Deserialize, Serialize};

/// Which humidity quantity the controller regulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HumidityMode {
    /// Relative humidity in percent.
    #[default]
    Rh,
    /// Vapor-pressure deficit in kPa.
    Vpd,
}

/// Fallback VPD band (kPa) when a stage profile has none.
pub const DEFAULT_VPD_MIN: f64 = 0.8;
pub const DEFAULT_VPD_MAX: f64 = 1.2;
pub const DEFAULT_VPD_TARGET: f64 = 1.0;

pub fn to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

pub fn to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Saturation vapor pressure in kPa (Tetens form).
pub fn saturation_vapor_pressure(temp_c: f64) -> f64 {
    0.61078 * (17.27 * temp_c / (temp_c + 237.3)).exp()
}

/// Vapor-pressure deficit in kPa, rounded to 3 decimals.
///
/// Inputs are not clamped: a noisy sensor reporting 103 % RH yields a
/// slightly negative deficit rather than an error.
pub fn vpd(temp_c: f64, rh: f64) -> f64 {
    let svp = saturation_vapor_pressure(temp_c);
    let avp = svp * (rh / 100.0);
    round_to(svp - avp, 3)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

// ===========================================================================
// Tests
// ===========================================================================
