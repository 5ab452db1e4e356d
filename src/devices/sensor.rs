// MIT License - Copyright (c) 2026 Peter Wright
// Sensor presentation of telemetry keys

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

use crate::constants::keys;
use crate::state::DeviceState;

/// How a telemetry key is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// On/off value (`atm`, `tcm`, `fst`, ...)
    Binary,
    /// `flt`: "off" or an `Enn` code
    Fault,
    /// Cumulative gas meter, m³
    Gas,
    /// Flow, hot water and outdoor temperatures, whole degrees
    Temperature,
    /// Room temperatures, tenths of a degree
    RoomTemperature,
    /// Burner modulation, percent
    Modulation,
    Numeric,
}

impl SensorKind {
    pub fn classify(key: &str) -> Self {
        if key.ends_with('m') || key.ends_with("fst") || key.ends_with("ovr") {
            return Self::Binary;
        }
        match key {
            keys::FAULT => Self::Fault,
            keys::GAS => Self::Gas,
            "cct" | "cdt" | "tct" | "tdt" | "odt" | "tdf" => Self::Temperature,
            "trt" | "crt" => Self::RoomTemperature,
            keys::MODULATION => Self::Modulation,
            _ => Self::Numeric,
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            Self::Temperature | Self::RoomTemperature => Some("°C"),
            Self::Gas => Some("m³"),
            Self::Modulation => Some("%"),
            Self::Binary | Self::Fault | Self::Numeric => None,
        }
    }

    /// Decimal places kept when publishing.
    pub fn precision(&self) -> Option<u32> {
        match self {
            Self::Gas => Some(6),
            Self::RoomTemperature => Some(1),
            Self::Temperature | Self::Modulation | Self::Numeric => Some(0),
            Self::Binary | Self::Fault => None,
        }
    }

    /// Presented value for a raw reading.
    pub fn render(&self, value: f64) -> Value {
        match self {
            Self::Binary => json!(value == 1.0),
            Self::Fault => json!(format_fault(value)),
            _ => match self.precision() {
                Some(0) => json!(value.round() as i64),
                Some(p) => json!(round_to(value, p)),
                None => json!(value),
            },
        }
    }
}

/// `flt` as shown to users: "off" for 0, otherwise `E` and two digits.
pub fn format_fault(value: f64) -> String {
    let code = value as i64;
    if code == 0 {
        "off".to_string()
    } else {
        format!("E{:02}", code)
    }
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// One presented sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub kind: SensorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    pub value: Value,
}

/// Present every key in the state.
pub fn render_state(state: &DeviceState) -> BTreeMap<String, SensorReading> {
    state
        .iter()
        .map(|(key, raw)| {
            let kind = SensorKind::classify(key);
            (
                key.to_string(),
                SensorReading {
                    kind,
                    unit: kind.unit(),
                    value: kind.render(raw),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        for key in ["atm", "tcm", "ccm", "tdm", "cdm", "fst", "ovr"] {
            assert_eq!(SensorKind::classify(key), SensorKind::Binary, "{}", key);
        }
        assert_eq!(SensorKind::classify("flt"), SensorKind::Fault);
        assert_eq!(SensorKind::classify("gas"), SensorKind::Gas);
        assert_eq!(SensorKind::classify("tdt"), SensorKind::Temperature);
        assert_eq!(SensorKind::classify("crt"), SensorKind::RoomTemperature);
        assert_eq!(SensorKind::classify("mod"), SensorKind::Modulation);
        assert_eq!(SensorKind::classify("coe"), SensorKind::Numeric);
        assert_eq!(SensorKind::classify("pwr"), SensorKind::Numeric);
    }

    #[test]
    fn test_format_fault() {
        assert_eq!(format_fault(0.0), "off");
        assert_eq!(format_fault(2.0), "E02");
        assert_eq!(format_fault(13.0), "E13");
    }

    #[test]
    fn test_render_precision() {
        assert_eq!(SensorKind::RoomTemperature.render(21.46), json!(21.5));
        assert_eq!(SensorKind::Temperature.render(44.6), json!(45));
        assert_eq!(SensorKind::Gas.render(0.000001), json!(0.000001));
        assert_eq!(SensorKind::Binary.render(1.0), json!(true));
        assert_eq!(SensorKind::Binary.render(0.0), json!(false));
        assert_eq!(SensorKind::Fault.render(0.0), json!("off"));
    }

    #[test]
    fn test_render_state_covers_all_keys() {
        let state = DeviceState::default();
        let rendered = render_state(&state);
        assert_eq!(rendered.len(), state.len());
        assert_eq!(rendered["flt"].value, json!("off"));
        assert_eq!(rendered["crt"].unit, Some("°C"));
        assert_eq!(rendered["gas"].unit, Some("m³"));
    }
}
