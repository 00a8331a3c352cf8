//! TOML configuration: schema, validation, and the file-backed store.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibration::{CalibrationModel, CalibrationState};
use crate::engine::Device;
use crate::humidity::HumidityMode;
use crate::light::{LightPhase, LightSchedule};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub current_stage: String,
    #[serde(default)]
    pub humidity_mode: HumidityMode,
    #[serde(default)]
    pub control: ControlSettings,
    pub light_schedule: LightSchedule,
    #[serde(default)]
    pub actuators: ActuatorSettings,
    #[serde(default)]
    pub sensors: SensorSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub calibration: CalibrationState,
    #[serde(default)]
    pub stages: BTreeMap<String, StageProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub tick_interval_sec: u64,
    pub ph_check_interval_sec: u64,
    /// How long a plug's reported state is trusted before re-querying.
    pub plug_cache_sec: u64,
    /// Per-call timeout for plug and sensor I/O.
    pub device_timeout_sec: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            tick_interval_sec: 300,
            ph_check_interval_sec: 4 * 60 * 60,
            plug_cache_sec: 5,
            device_timeout_sec: 3,
        }
    }
}

impl ControlSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_sec)
    }

    pub fn ph_check_interval(&self) -> Duration {
        Duration::from_secs(self.ph_check_interval_sec)
    }

    pub fn plug_cache(&self) -> Duration {
        Duration::from_secs(self.plug_cache_sec)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_sec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Tasmota-style plugs over the MQTT broker.
    Mqtt,
    /// In-memory plugs; nothing is switched.
    #[default]
    Mock,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActuatorSettings {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub devices: DeviceMap,
}

/// Plug address per device. A device without an address is not controlled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceMap {
    pub fan: Option<String>,
    pub humidifier: Option<String>,
    pub dehumidifier: Option<String>,
    pub heater: Option<String>,
    pub light: Option<String>,
}

impl DeviceMap {
    pub fn address(&self, device: Device) -> Option<&str> {
        let addr = match device {
            Device::Fan => &self.fan,
            Device::Humidifier => &self.humidifier,
            Device::Dehumidifier => &self.dehumidifier,
            Device::Heater => &self.heater,
            Device::Light => &self.light,
        };
        addr.as_deref()
    }

    /// Configured devices with their addresses, in [`Device`] order.
    pub fn configured(&self) -> impl Iterator<Item = (Device, &str)> {
        Device::ALL
            .into_iter()
            .filter_map(|d| self.address(d).map(|a| (d, a)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorSourceKind {
    /// Latest readings published by sensor nodes on `tele/<node>/reading`.
    #[default]
    Mqtt,
    /// Random-walk simulation.
    Sim,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub source: SensorSourceKind,
    pub stale_after_sec: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            source: SensorSourceKind::Mqtt,
            stale_after_sec: 900,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSinkKind {
    #[default]
    Log,
    /// JSON on `grow/alerts`.
    Mqtt,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default)]
    pub sink: AlertSinkKind,
}

// ---------------------------------------------------------------------------
// Stage profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub min: f64,
    pub max: f64,
    pub target: f64,
}

/// Air temperature is either one band or one per light phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemperatureBand {
    PerPhase {
        #[serde(alias = "Lights On")]
        lights_on: TargetRange,
        #[serde(alias = "Lights Off")]
        lights_off: TargetRange,
    },
    Flat(TargetRange),
}

impl TemperatureBand {
    pub fn for_phase(&self, phase: LightPhase) -> TargetRange {
        match (self, phase) {
            (Self::Flat(r), _) => *r,
            (Self::PerPhase { lights_on, .. }, LightPhase::LightsOn) => *lights_on,
            (Self::PerPhase { lights_off, .. }, LightPhase::LightsOff) => *lights_off,
        }
    }
}

/// Target bands for one growth stage. Temperatures in °F, humidity in %,
/// VPD in kPa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProfile {
    #[serde(alias = "Air Temperature")]
    pub air_temperature: TemperatureBand,
    #[serde(alias = "Relative Humidity", default)]
    pub relative_humidity: Option<TargetRange>,
    #[serde(alias = "VPD", default)]
    pub vpd: Option<TargetRange>,
    #[serde(alias = "Water pH", default)]
    pub water_ph: Option<TargetRange>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_stages(&mut errors);
        self.validate_control(&mut errors);
        self.validate_devices(&mut errors);
        self.validate_calibration(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    pub fn current_profile(&self) -> Option<&StageProfile> {
        self.stages.get(&self.current_stage)
    }

    fn validate_stages(&self, errors: &mut Vec<String>) {
        if self.current_stage.trim().is_empty() {
            errors.push("current_stage is empty".to_string());
        } else if !self.stages.contains_key(&self.current_stage) {
            errors.push(format!(
                "current_stage '{}' does not match any defined stage",
                self.current_stage
            ));
        }

        for (name, p) in &self.stages {
            if name.trim().is_empty() {
                errors.push("stage with empty name".to_string());
            }
            let ctx = |q: &str| format!("stage '{name}' {q}");
            match &p.air_temperature {
                TemperatureBand::Flat(r) => check_range(&ctx("air_temperature"), r, errors),
                TemperatureBand::PerPhase {
                    lights_on,
                    lights_off,
                } => {
                    check_range(&ctx("air_temperature.lights_on"), lights_on, errors);
                    check_range(&ctx("air_temperature.lights_off"), lights_off, errors);
                }
            }
            for (q, r) in [
                ("relative_humidity", &p.relative_humidity),
                ("vpd", &p.vpd),
                ("water_ph", &p.water_ph),
            ] {
                if let Some(r) = r {
                    check_range(&ctx(q), r, errors);
                }
            }
        }
    }

    fn validate_control(&self, errors: &mut Vec<String>) {
        let c = &self.control;
        for (field, v) in [
            ("tick_interval_sec", c.tick_interval_sec),
            ("ph_check_interval_sec", c.ph_check_interval_sec),
            ("device_timeout_sec", c.device_timeout_sec),
        ] {
            if v == 0 {
                errors.push(format!("control.{field} must be positive"));
            }
        }
        if self.sensors.stale_after_sec == 0 {
            errors.push("sensors.stale_after_sec must be positive".to_string());
        }
    }

    fn validate_devices(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<&str> = HashSet::new();
        for device in Device::ALL {
            let Some(addr) = self.actuators.devices.address(device) else {
                continue;
            };
            if addr.trim().is_empty() {
                errors.push(format!("device '{device}': address is empty"));
            } else if !seen.insert(addr) {
                errors.push(format!(
                    "device '{device}': address '{addr}' is already used by another device"
                ));
            }
        }
    }

    fn validate_calibration(&self, errors: &mut Vec<String>) {
        let finite = match self.calibration.model {
            CalibrationModel::Linear { slope, intercept } => {
                slope.is_finite() && intercept.is_finite()
            }
            CalibrationModel::Quadratic { a, b, c } => {
                a.is_finite() && b.is_finite() && c.is_finite()
            }
        };
        if !finite {
            errors.push("calibration.model has non-finite coefficients".to_string());
        }
        if self.calibration.pending.len() >= self.calibration.mode.required_points() {
            errors.push(format!(
                "calibration.pending holds {} point(s); at most {} allowed in {:?} mode",
                self.calibration.pending.len(),
                self.calibration.mode.required_points() - 1,
                self.calibration.mode
            ));
        }
    }
}

fn check_range(ctx: &str, r: &TargetRange, errors: &mut Vec<String>) {
    if !(r.min.is_finite() && r.max.is_finite() && r.target.is_finite()) {
        errors.push(format!("{ctx}: range values must be finite"));
        return;
    }
    if r.min > r.max {
        errors.push(format!("{ctx}: min ({}) exceeds max ({})", r.min, r.max));
    } else if !(r.min..=r.max).contains(&r.target) {
        errors.push(format!(
            "{ctx}: target ({}) outside [{}, {}]",
            r.target, r.min, r.max
        ));
    }
}

// ---------------------------------------------------------------------------
// Load + store
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;
    Ok(config)
}

/// The config file on disk; written whole on every update.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Config> {
        load(&self.path)
    }

    /// Replace the file atomically: write a sibling temp file, then rename.
    pub fn save(&self, config: &Config) -> Result<()> {
        let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, contents)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
