use serde::Deserialize;

use crate::sensors::Quantity;

pub(crate) const TELEMETRY_FILTER: &str = "tele/+/reading";
pub(crate) const PLUG_STATE_FILTER: &str = "stat/+/POWER";
pub(crate) const ALERT_TOPIC: &str = "grow/alerts";

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// One raw value from a sensor node: volts for the analog probes, °C for the
/// water probe.
#[derive(Debug, Deserialize)]
pub(crate) struct RawReading {
    pub(crate) quantity: Quantity,
    pub(crate) raw: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TelemetryMsg {
    pub(crate) ts: i64,
    pub(crate) readings: Vec<RawReading>,
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

fn middle_segment<'a>(topic: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == prefix && parts[2] == suffix && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// Extract node_id from "tele/<node_id>/reading".
pub(crate) fn extract_node_id(topic: &str) -> Option<&str> {
    middle_segment(topic, "tele", "reading")
}

/// Extract plug id from "stat/<plug_id>/POWER".
pub(crate) fn extract_plug_id(topic: &str) -> Option<&str> {
    middle_segment(topic, "stat", "POWER")
}

pub(crate) fn command_topic(plug_id: &str) -> String {
    format!("cmnd/{plug_id}/POWER")
}

/// Parse an "ON"/"OFF" payload into a bool (case-insensitive, trims whitespace).
pub(crate) fn parse_power_payload(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown power state '{s}'")),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- extract_node_id ----------------------------------------------------

    #[test]
    fn extract_node_id_valid_topic() {
        assert_eq!(extract_node_id("tele/tent-a/reading"), Some("tent-a"));
    }

    #[test]
    fn extract_node_id_wrong_prefix() {
        assert_eq!(extract_node_id("foo/tent-a/reading"), None);
    }

    #[test]
    fn extract_node_id_wrong_suffix() {
        assert_eq!(extract_node_id("tele/tent-a/status"), None);
    }

    #[test]
    fn extract_node_id_segment_count() {
        assert_eq!(extract_node_id("tele/reading"), None);
        assert_eq!(extract_node_id("tele/tent-a/sub/reading"), None);
        assert_eq!(extract_node_id(""), None);
    }

    #[test]
    fn extract_node_id_empty_node() {
        assert_eq!(extract_node_id("tele//reading"), None);
    }

    // -- extract_plug_id ----------------------------------------------------

    #[test]
    fn extract_plug_id_valid_topic() {
        assert_eq!(extract_plug_id("stat/tent-fan/POWER"), Some("tent-fan"));
    }

    #[test]
    fn extract_plug_id_is_case_sensitive() {
        assert_eq!(extract_plug_id("stat/tent-fan/power"), None);
    }

    #[test]
    fn extract_plug_id_ignores_command_topic() {
        assert_eq!(extract_plug_id("cmnd/tent-fan/POWER"), None);
    }

    #[test]
    fn command_topic_format() {
        assert_eq!(command_topic("tent-light"), "cmnd/tent-light/POWER");
        assert_eq!(
            extract_plug_id(&command_topic("x").replacen("cmnd", "stat", 1)),
            Some("x")
        );
    }

    // -- parse_power_payload -------------------------------------------------

    #[test]
    fn parse_power_payload_on_off() {
        assert_eq!(parse_power_payload(b"ON"), Ok(true));
        assert_eq!(parse_power_payload(b"OFF"), Ok(false));
    }

    #[test]
    fn parse_power_payload_mixed_case_and_whitespace() {
        assert_eq!(parse_power_payload(b"oN"), Ok(true));
        assert_eq!(parse_power_payload(b"\tOFF\n"), Ok(false));
    }

    #[test]
    fn parse_power_payload_garbage() {
        assert!(parse_power_payload(b"TOGGLE").is_err());
        assert!(parse_power_payload(b"").is_err());
    }

    // -- TelemetryMsg deserialization ----------------------------------------

    #[test]
    fn telemetry_msg_deserialize_valid() {
        let json = r#"{"ts":1700000000,"readings":[{"quantity":"air_temperature","raw":0.74},{"quantity":"water_temperature","raw":20.5}]}"#;
        let msg: TelemetryMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.ts, 1700000000);
        assert_eq!(msg.readings.len(), 2);
        assert_eq!(msg.readings[0].quantity, Quantity::AirTemperature);
        assert_eq!(msg.readings[1].raw, 20.5);
    }

    #[test]
    fn telemetry_msg_unknown_quantity_fails() {
        let json = r#"{"ts":1,"readings":[{"quantity":"soil_moisture","raw":1.0}]}"#;
        assert!(serde_json::from_str::<TelemetryMsg>(json).is_err());
    }

    #[test]
    fn telemetry_msg_missing_field_fails() {
        assert!(serde_json::from_str::<TelemetryMsg>(r#"{"ts":1}"#).is_err());
    }

    #[test]
    fn telemetry_msg_extra_fields_ignored() {
        let json = r#"{"ts":1,"readings":[],"extra":"ignored"}"#;
        let msg: TelemetryMsg = serde_json::from_str(json).unwrap();
        assert!(msg.readings.is_empty());
    }
}
