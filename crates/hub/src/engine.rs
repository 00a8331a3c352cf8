//! Control decision engine: turns one sensor snapshot plus the stage's target
//! bands into actuator intents.
//!
//! The engine is a pure function. It never touches a device and never
//! fails; missing sensors and gaps in the configuration come back as
//! "no change" intents carrying the reason.
//!
//! ## Rules
//!
//! ```text
//!                RH mode                        VPD mode
//! Fan            on ⇔ temp ≥ t.min              on ⇔ temp > t.min ∧ vpd < v.max
//! Humidifier     on ⇔ rh < h.min                on ⇔ vpd > v.max
//! Dehumidifier   on: rh > h.max                 on: vpd < v.min
//!                off: rh ≤ h.target             off: vpd ≥ v.target
//! Heater         on: temp < t.min, off: temp ≥ t.target
//! Light          schedule, skipped when the plug is known to match
//! ```
//!
//! Dehumidifier and heater are tri-state: between the two thresholds they
//! are left as they are.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{DeviceMap, StageProfile, TargetRange};
use crate::humidity::{
    self, HumidityMode, DEFAULT_VPD_MAX, DEFAULT_VPD_MIN, DEFAULT_VPD_TARGET,
};
use crate::light::LightPhase;
use crate::sensors::{Reading, SensorSnapshot};

// ---------------------------------------------------------------------------
// Devices and intents
// ---------------------------------------------------------------------------

/// Controlled devices, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Fan,
    Humidifier,
    Dehumidifier,
    Heater,
    Light,
}

impl Device {
    pub const ALL: [Device; 5] = [
        Device::Fan,
        Device::Humidifier,
        Device::Dehumidifier,
        Device::Heater,
        Device::Light,
    ];
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fan => "fan",
            Self::Humidifier => "humidifier",
            Self::Dehumidifier => "dehumidifier",
            Self::Heater => "heater",
            Self::Light => "light",
        };
        f.write_str(s)
    }
}

/// What one device should do this tick. `desired_on == None` leaves it alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorIntent {
    pub device: Device,
    pub desired_on: Option<bool>,
    pub reason: String,
}

impl ActuatorIntent {
    fn set(device: Device, on: bool, reason: String) -> Self {
        Self {
            device,
            desired_on: Some(on),
            reason,
        }
    }

    fn hold(device: Device, reason: String) -> Self {
        Self {
            device,
            desired_on: None,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Decision {
    /// One entry per configured device, in [`Device`] order.
    pub intents: Vec<ActuatorIntent>,
    /// Tick-wide notes that don't belong to a single device.
    pub notes: Vec<String>,
}

#[cfg(test)]
impl Decision {
    pub fn intent(&self, device: Device) -> Option<&ActuatorIntent> {
        self.intents.iter().find(|i| i.device == device)
    }

    /// The on/off command for `device`, if one is issued this tick.
    pub fn command(&self, device: Device) -> Option<bool> {
        self.intent(device).and_then(|i| i.desired_on)
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Schedule state for the light plug.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightInput {
    pub should_be_on: bool,
    /// Last state reported by the plug, `None` if unknown.
    pub last_known: Option<bool>,
}

pub struct EngineInput<'a> {
    pub snapshot: &'a SensorSnapshot,
    pub stage: &'a str,
    /// `None` when the current stage has no profile.
    pub profile: Option<&'a StageProfile>,
    pub light_phase: LightPhase,
    pub mode: HumidityMode,
    pub devices: &'a DeviceMap,
    pub light: LightInput,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// The humidity quantity the rules compare, in the units of its band.
struct HumidityView {
    value: Reading,
    band: Option<TargetRange>,
    label: &'static str,
}

/// Derive VPD from the snapshot; unavailable if either input is.
pub fn snapshot_vpd(snapshot: &SensorSnapshot) -> Reading {
    match (&snapshot.temperature, &snapshot.relative_humidity) {
        (Reading::Value(t), Reading::Value(rh)) => {
            Reading::Value(humidity::vpd(humidity::to_celsius(*t), *rh))
        }
        (Reading::Unavailable(r), _) => Reading::Unavailable(format!("temperature: {r}")),
        (_, Reading::Unavailable(r)) => Reading::Unavailable(format!("humidity: {r}")),
    }
}

pub fn decide(input: &EngineInput<'_>) -> Decision {
    let mut decision = Decision::default();
    let configured = |d: Device| input.devices.address(d).is_some();

    match input.profile {
        Some(profile) => {
            let temp_band = profile.air_temperature.for_phase(input.light_phase);
            let humidity = humidity_view(input, profile);
            if configured(Device::Fan) {
                decision.intents.push(fan(input, &temp_band, &humidity));
            }
            if configured(Device::Humidifier) {
                decision.intents.push(humidifier(input.mode, &humidity));
            }
            if configured(Device::Dehumidifier) {
                decision.intents.push(dehumidifier(input.mode, &humidity));
            }
            if configured(Device::Heater) {
                decision
                    .intents
                    .push(heater(&input.snapshot.temperature, &temp_band));
            }
        }
        None => {
            decision.notes.push(format!(
                "configuration inconsistent: stage '{}' has no target ranges; sensor rules skipped",
                input.stage
            ));
            for d in [
                Device::Fan,
                Device::Humidifier,
                Device::Dehumidifier,
                Device::Heater,
            ] {
                if configured(d) {
                    decision.intents.push(ActuatorIntent::hold(
                        d,
                        format!(
                            "configuration inconsistent: no ranges for stage '{}'",
                            input.stage
                        ),
                    ));
                }
            }
        }
    }

    if configured(Device::Light) {
        decision.intents.push(light(input.light));
    }

    decision
}

fn humidity_view(input: &EngineInput<'_>, profile: &StageProfile) -> HumidityView {
    match input.mode {
        HumidityMode::Rh => HumidityView {
            value: input.snapshot.relative_humidity.clone(),
            band: profile.relative_humidity,
            label: "humidity",
        },
        HumidityMode::Vpd => HumidityView {
            value: snapshot_vpd(input.snapshot),
            band: Some(profile.vpd.unwrap_or(TargetRange {
                min: DEFAULT_VPD_MIN,
                max: DEFAULT_VPD_MAX,
                target: DEFAULT_VPD_TARGET,
            })),
            label: "VPD",
        },
    }
}

fn unavailable(device: Device, what: &str, reason: &str) -> ActuatorIntent {
    ActuatorIntent::hold(
        device,
        format!("cannot evaluate, sensor unavailable: {what} ({reason})"),
    )
}

fn no_band(device: Device, label: &str) -> ActuatorIntent {
    ActuatorIntent::hold(
        device,
        format!("configuration inconsistent: no {label} range for this stage"),
    )
}

fn fan(
    input: &EngineInput<'_>,
    temp_band: &TargetRange,
    humidity: &HumidityView,
) -> ActuatorIntent {
    let d = Device::Fan;
    let temp = match &input.snapshot.temperature {
        Reading::Value(t) => *t,
        Reading::Unavailable(r) => return unavailable(d, "temperature", r),
    };

    match input.mode {
        HumidityMode::Rh => {
            if temp < temp_band.min {
                ActuatorIntent::set(
                    d,
                    false,
                    format!("temperature {temp:.1}°F below min {:.1}°F", temp_band.min),
                )
            } else if temp <= temp_band.max {
                ActuatorIntent::set(d, true, format!("temperature {temp:.1}°F in ideal range"))
            } else {
                ActuatorIntent::set(
                    d,
                    true,
                    format!("temperature {temp:.1}°F above max {:.1}°F", temp_band.max),
                )
            }
        }
        HumidityMode::Vpd => {
            let vpd = match &humidity.value {
                Reading::Value(v) => *v,
                Reading::Unavailable(r) => return unavailable(d, "VPD", r),
            };
            let Some(band) = humidity.band else {
                return no_band(d, humidity.label);
            };
            if temp > temp_band.min && vpd < band.max {
                ActuatorIntent::set(
                    d,
                    true,
                    format!(
                        "temperature {temp:.1}°F above min and VPD {vpd:.3} below max {:.3}: ventilating",
                        band.max
                    ),
                )
            } else if temp <= temp_band.min {
                ActuatorIntent::set(
                    d,
                    false,
                    format!("temperature {temp:.1}°F at or below min {:.1}°F", temp_band.min),
                )
            } else {
                ActuatorIntent::set(
                    d,
                    false,
                    format!(
                        "VPD {vpd:.3} at or above max {:.3}: air too dry to ventilate",
                        band.max
                    ),
                )
            }
        }
    }
}

fn humidifier(mode: HumidityMode, humidity: &HumidityView) -> ActuatorIntent {
    let d = Device::Humidifier;
    let value = match &humidity.value {
        Reading::Value(v) => *v,
        Reading::Unavailable(r) => return unavailable(d, humidity.label, r),
    };
    let Some(band) = humidity.band else {
        return no_band(d, humidity.label);
    };

    match mode {
        HumidityMode::Rh if value < band.min => ActuatorIntent::set(
            d,
            true,
            format!("humidity {value:.1}% below min {:.1}%", band.min),
        ),
        HumidityMode::Rh => ActuatorIntent::set(
            d,
            false,
            format!("humidity {value:.1}% at or above min {:.1}%", band.min),
        ),
        HumidityMode::Vpd if value > band.max => ActuatorIntent::set(
            d,
            true,
            format!("VPD {value:.3} above max {:.3}: air too dry", band.max),
        ),
        HumidityMode::Vpd => ActuatorIntent::set(
            d,
            false,
            format!("VPD {value:.3} at or below max {:.3}", band.max),
        ),
    }
}

fn dehumidifier(mode: HumidityMode, humidity: &HumidityView) -> ActuatorIntent {
    let d = Device::Dehumidifier;
    let value = match &humidity.value {
        Reading::Value(v) => *v,
        Reading::Unavailable(r) => return unavailable(d, humidity.label, r),
    };
    let Some(band) = humidity.band else {
        return no_band(d, humidity.label);
    };

    // Low VPD means humid air, so the VPD thresholds mirror the RH ones.
    match mode {
        HumidityMode::Rh => {
            if value > band.max {
                ActuatorIntent::set(
                    d,
                    true,
                    format!("humidity {value:.1}% above max {:.1}%", band.max),
                )
            } else if value <= band.target {
                ActuatorIntent::set(
                    d,
                    false,
                    format!("humidity {value:.1}% at or below target {:.1}%", band.target),
                )
            } else {
                ActuatorIntent::hold(
                    d,
                    format!("humidity {value:.1}% between target and max: unchanged"),
                )
            }
        }
        HumidityMode::Vpd => {
            if value < band.min {
                ActuatorIntent::set(
                    d,
                    true,
                    format!("VPD {value:.3} below min {:.3}: air too humid", band.min),
                )
            } else if value >= band.target {
                ActuatorIntent::set(
                    d,
                    false,
                    format!("VPD {value:.3} at or above target {:.3}", band.target),
                )
            } else {
                ActuatorIntent::hold(
                    d,
                    format!("VPD {value:.3} between min and target: unchanged"),
                )
            }
        }
    }
}

fn heater(temperature: &Reading, band: &TargetRange) -> ActuatorIntent {
    let d = Device::Heater;
    let temp = match temperature {
        Reading::Value(t) => *t,
        Reading::Unavailable(r) => return unavailable(d, "temperature", r),
    };
    if temp < band.min {
        ActuatorIntent::set(
            d,
            true,
            format!("temperature {temp:.1}°F below min {:.1}°F", band.min),
        )
    } else if temp >= band.target {
        ActuatorIntent::set(
            d,
            false,
            format!("temperature {temp:.1}°F at or above target {:.1}°F", band.target),
        )
    } else {
        ActuatorIntent::hold(
            d,
            format!("temperature {temp:.1}°F between min and target: unchanged"),
        )
    }
}

fn light(input: LightInput) -> ActuatorIntent {
    let d = Device::Light;
    let want = if input.should_be_on { "on" } else { "off" };
    match input.last_known {
        Some(current) if current == input.should_be_on => {
            ActuatorIntent::hold(d, format!("light already correct ({want})"))
        }
        Some(_) => ActuatorIntent::set(d, input.should_be_on, format!("schedule: light {want}")),
        None => ActuatorIntent::set(
            d,
            input.should_be_on,
            format!("schedule: light {want} (plug state unknown)"),
        ),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemperatureBand;

    fn range(min: f64, max: f64, target: f64) -> TargetRange {
        TargetRange { min, max, target }
    }

    fn profile() -> StageProfile {
        StageProfile {
            air_temperature: TemperatureBand::PerPhase {
                lights_on: range(68.0, 72.0, 70.0),
                lights_off: range(62.0, 66.0, 64.0),
            },
            relative_humidity: Some(range(50.0, 60.0, 55.0)),
            vpd: None,
            water_ph: Some(range(5.8, 6.5, 6.2)),
        }
    }

    fn all_devices() -> DeviceMap {
        DeviceMap {
            fan: Some("fan".into()),
            humidifier: Some("hum".into()),
            dehumidifier: Some("dehum".into()),
            heater: Some("heat".into()),
            light: Some("light".into()),
        }
    }

    fn snapshot(temp: f64, rh: f64) -> SensorSnapshot {
        SensorSnapshot {
            temperature: Reading::Value(temp),
            relative_humidity: Reading::Value(rh),
            water_temperature: Reading::Value(68.0),
            ph: Reading::Value(6.2),
        }
    }

    struct Case {
        snapshot: SensorSnapshot,
        profile: Option<StageProfile>,
        mode: HumidityMode,
        devices: DeviceMap,
        phase: LightPhase,
        light: LightInput,
    }

    impl Case {
        fn new(snapshot: SensorSnapshot) -> Self {
            Self {
                snapshot,
                profile: Some(profile()),
                mode: HumidityMode::Rh,
                devices: all_devices(),
                phase: LightPhase::LightsOn,
                light: LightInput {
                    should_be_on: true,
                    last_known: None,
                },
            }
        }

        fn decide(&self) -> Decision {
            decide(&EngineInput {
                snapshot: &self.snapshot,
                stage: "Vegetative",
                profile: self.profile.as_ref(),
                light_phase: self.phase,
                mode: self.mode,
                devices: &self.devices,
                light: self.light,
            })
        }
    }

    // -- Ordering and configuration ---------------------------------------

    #[test]
    fn intents_follow_device_order() {
        let d = Case::new(snapshot(70.0, 55.0)).decide();
        let order: Vec<Device> = d.intents.iter().map(|i| i.device).collect();
        assert_eq!(order, Device::ALL.to_vec());
    }

    #[test]
    fn unconfigured_devices_emit_nothing() {
        let mut c = Case::new(snapshot(60.0, 40.0));
        c.devices = DeviceMap {
            fan: Some("fan".into()),
            ..Default::default()
        };
        let d = c.decide();
        assert_eq!(d.intents.len(), 1);
        assert!(d.intent(Device::Heater).is_none());
        assert!(d.intent(Device::Light).is_none());
    }

    #[test]
    fn missing_stage_profile_holds_sensor_devices_but_runs_light() {
        let mut c = Case::new(snapshot(60.0, 40.0));
        c.profile = None;
        let d = c.decide();
        assert!(d.notes[0].contains("configuration inconsistent"));
        for dev in [Device::Fan, Device::Humidifier, Device::Dehumidifier, Device::Heater] {
            assert_eq!(d.command(dev), None);
        }
        assert_eq!(d.command(Device::Light), Some(true));
    }

    // -- Fan ----------------------------------------------------------------

    #[test]
    fn rh_fan_on_above_range() {
        let d = Case::new(snapshot(80.0, 55.0)).decide();
        let fan = d.intent(Device::Fan).unwrap();
        assert_eq!(fan.desired_on, Some(true));
        assert!(fan.reason.contains("above"), "{}", fan.reason);
    }

    #[test]
    fn rh_fan_on_in_range() {
        let d = Case::new(snapshot(70.0, 55.0)).decide();
        let fan = d.intent(Device::Fan).unwrap();
        assert_eq!(fan.desired_on, Some(true));
        assert!(fan.reason.contains("ideal"));
    }

    #[test]
    fn rh_fan_on_exactly_at_min() {
        let d = Case::new(snapshot(68.0, 55.0)).decide();
        assert_eq!(d.command(Device::Fan), Some(true));
    }

    #[test]
    fn rh_fan_off_below_min() {
        let d = Case::new(snapshot(65.0, 55.0)).decide();
        assert_eq!(d.command(Device::Fan), Some(false));
    }

    #[test]
    fn fan_uses_lights_off_band() {
        let mut c = Case::new(snapshot(65.0, 55.0));
        c.phase = LightPhase::LightsOff;
        // 65 is below the lights-on min (68) but inside the lights-off band.
        assert_eq!(c.decide().command(Device::Fan), Some(true));
    }

    #[test]
    fn fan_unavailable_temperature_is_noted_not_fatal() {
        let mut s = snapshot(0.0, 55.0);
        s.temperature = Reading::Unavailable("sensor absent".into());
        let d = Case::new(s).decide();
        let fan = d.intent(Device::Fan).unwrap();
        assert_eq!(fan.desired_on, None);
        assert!(fan.reason.contains("sensor unavailable"), "{}", fan.reason);
        assert!(fan.reason.contains("sensor absent"));
        assert_eq!(d.command(Device::Heater), None);
        // Humidity rules don't depend on temperature in RH mode.
        assert_eq!(d.command(Device::Humidifier), Some(false));
    }

    #[test]
    fn vpd_fan_on_when_warm_and_humid() {
        // 75 °F, 70 % RH → VPD ≈ 0.89
        let mut c = Case::new(snapshot(75.0, 70.0));
        c.mode = HumidityMode::Vpd;
        assert_eq!(c.decide().command(Device::Fan), Some(true));
    }

    #[test]
    fn vpd_fan_off_when_air_dry() {
        // 75 °F, 30 % RH → VPD ≈ 2.08, over the default max of 1.2
        let mut c = Case::new(snapshot(75.0, 30.0));
        c.mode = HumidityMode::Vpd;
        let d = c.decide();
        assert_eq!(d.command(Device::Fan), Some(false));
        assert!(d.intent(Device::Fan).unwrap().reason.contains("too dry"));
    }

    #[test]
    fn vpd_fan_off_when_cold() {
        let mut c = Case::new(snapshot(68.0, 70.0));
        c.mode = HumidityMode::Vpd;
        assert_eq!(c.decide().command(Device::Fan), Some(false));
    }

    #[test]
    fn vpd_fan_needs_humidity_reading() {
        let mut s = snapshot(75.0, 0.0);
        s.relative_humidity = Reading::Unavailable("disconnected".into());
        let mut c = Case::new(s);
        c.mode = HumidityMode::Vpd;
        let d = c.decide();
        let fan = d.intent(Device::Fan).unwrap();
        assert_eq!(fan.desired_on, None);
        assert!(fan.reason.contains("VPD"));
    }

    // -- Humidifier -------------------------------------------------------

    #[test]
    fn rh_humidifier_on_below_min() {
        let d = Case::new(snapshot(70.0, 45.0)).decide();
        assert_eq!(d.command(Device::Humidifier), Some(true));
    }

    #[test]
    fn rh_humidifier_off_at_min() {
        let d = Case::new(snapshot(70.0, 50.0)).decide();
        assert_eq!(d.command(Device::Humidifier), Some(false));
    }

    #[test]
    fn vpd_humidifier_on_when_dry() {
        let mut c = Case::new(snapshot(75.0, 30.0));
        c.mode = HumidityMode::Vpd;
        assert_eq!(c.decide().command(Device::Humidifier), Some(true));
    }

    #[test]
    fn vpd_humidifier_uses_stage_band_when_present() {
        let mut c = Case::new(snapshot(75.0, 30.0));
        c.mode = HumidityMode::Vpd;
        if let Some(p) = c.profile.as_mut() {
            p.vpd = Some(range(1.8, 2.4, 2.1));
        }
        assert_eq!(c.decide().command(Device::Humidifier), Some(false));
    }

    #[test]
    fn rh_mode_without_rh_band_is_inconsistent() {
        let mut c = Case::new(snapshot(70.0, 45.0));
        if let Some(p) = c.profile.as_mut() {
            p.relative_humidity = None;
        }
        let d = c.decide();
        let h = d.intent(Device::Humidifier).unwrap();
        assert_eq!(h.desired_on, None);
        assert!(h.reason.contains("configuration inconsistent"));
        // Temperature rules still run.
        assert_eq!(d.command(Device::Fan), Some(true));
    }

    // -- Dehumidifier -----------------------------------------------------

    #[test]
    fn rh_dehumidifier_tri_state() {
        assert_eq!(
            Case::new(snapshot(70.0, 65.0)).decide().command(Device::Dehumidifier),
            Some(true)
        );
        assert_eq!(
            Case::new(snapshot(70.0, 55.0)).decide().command(Device::Dehumidifier),
            Some(false)
        );
        let d = Case::new(snapshot(70.0, 58.0)).decide();
        let i = d.intent(Device::Dehumidifier).unwrap();
        assert_eq!(i.desired_on, None);
        assert!(i.reason.contains("unchanged"));
    }

    #[test]
    fn vpd_dehumidifier_on_when_humid() {
        // 70 °F, 85 % RH → VPD ≈ 0.37, under the default min of 0.8
        let mut c = Case::new(snapshot(70.0, 85.0));
        c.mode = HumidityMode::Vpd;
        assert_eq!(c.decide().command(Device::Dehumidifier), Some(true));
    }

    #[test]
    fn vpd_dehumidifier_off_at_target() {
        // 75 °F, 60 % RH → VPD ≈ 1.19, above target 1.0
        let mut c = Case::new(snapshot(75.0, 60.0));
        c.mode = HumidityMode::Vpd;
        assert_eq!(c.decide().command(Device::Dehumidifier), Some(false));
    }

    #[test]
    fn vpd_dehumidifier_holds_between_min_and_target() {
        // 75 °F, 68 % RH → VPD ≈ 0.95
        let mut c = Case::new(snapshot(75.0, 68.0));
        c.mode = HumidityMode::Vpd;
        assert_eq!(c.decide().command(Device::Dehumidifier), None);
    }

    // -- Heater -------------------------------------------------------------

    #[test]
    fn heater_tri_state() {
        assert_eq!(
            Case::new(snapshot(66.0, 55.0)).decide().command(Device::Heater),
            Some(true)
        );
        assert_eq!(
            Case::new(snapshot(70.0, 55.0)).decide().command(Device::Heater),
            Some(false)
        );
        assert_eq!(
            Case::new(snapshot(69.0, 55.0)).decide().command(Device::Heater),
            None
        );
    }

    #[test]
    fn inverted_band_is_taken_literally() {
        let mut c = Case::new(snapshot(70.0, 55.0));
        if let Some(p) = c.profile.as_mut() {
            p.air_temperature = TemperatureBand::Flat(range(75.0, 65.0, 80.0));
        }
        let d = c.decide();
        // 70 < min 75 → heater on, fan off; no panic.
        assert_eq!(d.command(Device::Heater), Some(true));
        assert_eq!(d.command(Device::Fan), Some(false));
    }

    // -- Light --------------------------------------------------------------

    #[test]
    fn light_already_correct_issues_nothing() {
        let mut c = Case::new(snapshot(70.0, 55.0));
        c.light = LightInput {
            should_be_on: true,
            last_known: Some(true),
        };
        let d = c.decide();
        let l = d.intent(Device::Light).unwrap();
        assert_eq!(l.desired_on, None);
        assert!(l.reason.contains("already correct"));
    }

    #[test]
    fn light_unknown_state_still_commands() {
        let mut c = Case::new(snapshot(70.0, 55.0));
        c.light = LightInput {
            should_be_on: false,
            last_known: None,
        };
        let d = c.decide();
        let l = d.intent(Device::Light).unwrap();
        assert_eq!(l.desired_on, Some(false));
        assert!(!l.reason.contains("already correct"));
    }

    #[test]
    fn light_mismatch_commands_change() {
        let mut c = Case::new(snapshot(70.0, 55.0));
        c.light = LightInput {
            should_be_on: false,
            last_known: Some(true),
        };
        assert_eq!(c.decide().command(Device::Light), Some(false));
    }

    #[test]
    fn light_ignores_missing_sensors() {
        let c = Case::new(SensorSnapshot::unavailable("no hardware"));
        let d = c.decide();
        assert_eq!(d.command(Device::Light), Some(true));
        assert_eq!(d.command(Device::Fan), None);
    }

    // -- VPD derivation ---------------------------------------------------

    #[test]
    fn snapshot_vpd_converts_fahrenheit() {
        // 77 °F = 25 °C
        let v = snapshot_vpd(&snapshot(77.0, 50.0)).value().unwrap();
        assert!((v - 1.582).abs() < 0.01);
    }

    #[test]
    fn snapshot_vpd_reports_missing_input() {
        let mut s = snapshot(77.0, 50.0);
        s.relative_humidity = Reading::Unavailable("unplugged".into());
        assert!(matches!(snapshot_vpd(&s), Reading::Unavailable(ref r) if r.contains("unplugged")));
    }
}
