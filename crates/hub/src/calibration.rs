//! pH probe calibration: voltage → pH models and fitting them from buffer
//! solution readings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Voltages closer than this are treated as the same reading.
const MIN_VOLTAGE_SPREAD: f64 = 1e-6;

/// Published transfer curve for the probe on a 3.3 V ADC front-end.
const DEFAULT_SLOPE: f64 = -5.6548;
const DEFAULT_INTERCEPT: f64 = 15.509;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("calibration points share the same voltage (division by zero)")]
    DivisionByZero,
    #[error("calibration voltages must be distinct for a quadratic fit")]
    SingularFit,
    #[error("cannot fit a curve from {0} point(s); 2 or 3 are required")]
    UnsupportedPointCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CalibrationModel {
    Linear { slope: f64, intercept: f64 },
    Quadratic { a: f64, b: f64, c: f64 },
}

impl Default for CalibrationModel {
    fn default() -> Self {
        Self::Linear {
            slope: DEFAULT_SLOPE,
            intercept: DEFAULT_INTERCEPT,
        }
    }
}

impl CalibrationModel {
    pub fn convert(&self, voltage: f64) -> f64 {
        match *self {
            Self::Linear { slope, intercept } => slope * voltage + intercept,
            Self::Quadratic { a, b, c } => a * voltage * voltage + b * voltage + c,
        }
    }
}

/// One buffer-solution reading: the known pH and the probe voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub ph: f64,
    pub voltage: f64,
}

/// Fit a model through the given points. Two points give a line, three an
/// exact parabola.
pub fn fit_from_points(points: &[CalibrationPoint]) -> Result<CalibrationModel, CalibrationError> {
    match points {
        [p1, p2] => fit_linear(p1, p2),
        [p1, p2, p3] => fit_quadratic(p1, p2, p3),
        _ => Err(CalibrationError::UnsupportedPointCount(points.len())),
    }
}

fn same_voltage(a: f64, b: f64) -> bool {
    (a - b).abs() < MIN_VOLTAGE_SPREAD
}

fn fit_linear(
    p1: &CalibrationPoint,
    p2: &CalibrationPoint,
) -> Result<CalibrationModel, CalibrationError> {
    if same_voltage(p1.voltage, p2.voltage) {
        return Err(CalibrationError::DivisionByZero);
    }
    let slope = (p1.ph - p2.ph) / (p1.voltage - p2.voltage);
    let intercept = p1.ph - slope * p1.voltage;
    Ok(CalibrationModel::Linear { slope, intercept })
}

// Newton divided differences; three points with distinct voltages determine
// the parabola exactly.
fn fit_quadratic(
    p1: &CalibrationPoint,
    p2: &CalibrationPoint,
    p3: &CalibrationPoint,
) -> Result<CalibrationModel, CalibrationError> {
    let (v1, v2, v3) = (p1.voltage, p2.voltage, p3.voltage);
    if same_voltage(v1, v2) || same_voltage(v1, v3) || same_voltage(v2, v3) {
        return Err(CalibrationError::SingularFit);
    }
    let d1 = (p2.ph - p1.ph) / (v2 - v1);
    let d2 = (p3.ph - p2.ph) / (v3 - v2);
    let a = (d2 - d1) / (v3 - v1);
    let b = d1 - a * (v1 + v2);
    let c = p1.ph - a * v1 * v1 - b * v1;
    if !(a.is_finite() && b.is_finite() && c.is_finite()) {
        return Err(CalibrationError::SingularFit);
    }
    Ok(CalibrationModel::Quadratic { a, b, c })
}

// ---------------------------------------------------------------------------
// Calibration session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    #[default]
    TwoPoint,
    ThreePoint,
}

impl CalibrationMode {
    pub fn required_points(self) -> usize {
        match self {
            Self::TwoPoint => 2,
            Self::ThreePoint => 3,
        }
    }
}

/// Live model plus any buffer readings collected towards the next fit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationState {
    #[serde(default)]
    pub mode: CalibrationMode,
    #[serde(default)]
    pub model: CalibrationModel,
    #[serde(default)]
    pub pending: Vec<CalibrationPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationProgress {
    NeedMore { remaining: usize },
    Fitted { model: CalibrationModel },
}

impl CalibrationState {
    /// Record a buffer reading and fit once enough have been collected.
    ///
    /// A failed fit keeps the previous model and drops the point that
    /// caused it, so the operator can retake that buffer.
    pub fn add_point(
        &mut self,
        point: CalibrationPoint,
    ) -> Result<CalibrationProgress, CalibrationError> {
        self.pending.push(point);
        let required = self.mode.required_points();
        if self.pending.len() < required {
            return Ok(CalibrationProgress::NeedMore {
                remaining: required - self.pending.len(),
            });
        }

        match fit_from_points(&self.pending) {
            Ok(model) => {
                self.model = model;
                self.pending.clear();
                Ok(CalibrationProgress::Fitted { model })
            }
            Err(e) => {
                self.pending.pop();
                Err(e)
            }
        }
    }

    /// Switch between two- and three-point fitting. Readings taken for the
    /// old mode are discarded; the live model stays until the next fit.
    pub fn set_mode(&mut self, mode: CalibrationMode) {
        if self.mode != mode {
            self.pending.clear();
        }
        self.mode = mode;
    }

    pub fn reset(&mut self) {
        self.model = CalibrationModel::default();
        self.pending.clear();
    }
}

impl std::fmt::Display for CalibrationProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeedMore { remaining: 1 } => write!(f, "1 more point needed"),
            Self::NeedMore { remaining } => write!(f, "{remaining} more points needed"),
            Self::Fitted { model } => write!(f, "calibrated: {model:?}"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
