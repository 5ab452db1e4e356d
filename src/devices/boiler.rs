// MIT License - Copyright (c) 2026 Peter Wright
// Boiler views derived from DeviceState

use bitflags::bitflags;
use serde::Serialize;

use crate::config::OperateMode;
use crate::constants::keys;
use crate::protocol::ClimateCommand;
use crate::state::DeviceState;

bitflags! {
    /// On/off telemetry decoded from a state snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BoilerFlags: u8 {
        /// atm - room-temperature control enabled
        const AUTO_MODE   = 1 << 0;
        /// tcm - central heating enabled (manual mode)
        const CH_ENABLED  = 1 << 1;
        /// tdm - hot water enabled
        const DHW_ENABLED = 1 << 2;
        /// ccm - central heating demand active
        const CH_ACTIVE   = 1 << 3;
        /// cdm - hot water demand active
        const DHW_ACTIVE  = 1 << 4;
        /// fst - burner lit
        const FLAME       = 1 << 5;
    }
}

const FLAG_KEYS: [(&str, BoilerFlags); 6] = [
    (keys::AUTO_MODE, BoilerFlags::AUTO_MODE),
    (keys::CH_ENABLED, BoilerFlags::CH_ENABLED),
    (keys::DHW_ENABLED, BoilerFlags::DHW_ENABLED),
    (keys::CH_ACTIVE, BoilerFlags::CH_ACTIVE),
    (keys::DHW_ACTIVE, BoilerFlags::DHW_ACTIVE),
    (keys::FLAME, BoilerFlags::FLAME),
];

impl BoilerFlags {
    pub fn from_state(state: &DeviceState) -> Self {
        FLAG_KEYS
            .iter()
            .filter(|(key, _)| state.is_set(key))
            .fold(Self::empty(), |acc, (_, flag)| acc | *flag)
    }

    /// Flag names that are set, lower-case, for publishing.
    pub fn names(&self) -> Vec<String> {
        self.iter_names().map(|(name, _)| name.to_lowercase()).collect()
    }
}

/// Which circuit a view describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitKind {
    /// Central heating following a room target
    HeatingAuto,
    /// Central heating following a flow target
    HeatingManual,
    /// Domestic hot water
    Dhw,
}

impl CircuitKind {
    /// Allowed target range in °C.
    pub fn target_range(&self) -> (f64, f64) {
        match self {
            Self::HeatingAuto => (4.0, 30.0),
            Self::HeatingManual => (35.0, 80.0),
            Self::Dhw => (35.0, 60.0),
        }
    }

    fn keys(&self) -> (&'static str, &'static str, &'static str, &'static str) {
        // (enabled, current, target, demand)
        match self {
            Self::HeatingAuto => (
                keys::AUTO_MODE,
                keys::ROOM_CURRENT,
                keys::ROOM_TARGET,
                keys::CH_ACTIVE,
            ),
            Self::HeatingManual => (
                keys::CH_ENABLED,
                keys::CH_CURRENT,
                keys::CH_TARGET,
                keys::CH_ACTIVE,
            ),
            Self::Dhw => (
                keys::DHW_ENABLED,
                keys::DHW_CURRENT,
                keys::DHW_TARGET,
                keys::DHW_ACTIVE,
            ),
        }
    }
}

/// Thermostat-style view of one circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Circuit {
    pub kind: CircuitKind,
    pub enabled: bool,
    pub current: f64,
    pub target: f64,
    /// Demand active and burner lit
    pub heating: bool,
    pub min_target: f64,
    pub max_target: f64,
}

impl Circuit {
    /// Heating circuit as seen in the given operate mode.
    pub fn heating(state: &DeviceState, mode: OperateMode) -> Self {
        let kind = match mode {
            OperateMode::Auto => CircuitKind::HeatingAuto,
            OperateMode::Manual => CircuitKind::HeatingManual,
        };
        Self::from_state(state, kind)
    }

    pub fn dhw(state: &DeviceState) -> Self {
        Self::from_state(state, CircuitKind::Dhw)
    }

    pub fn from_state(state: &DeviceState, kind: CircuitKind) -> Self {
        let (enabled, current, target, demand) = kind.keys();
        let (min_target, max_target) = kind.target_range();
        Self {
            kind,
            enabled: state.is_set(enabled),
            current: state.get_or(current, 0.0),
            target: state.get_or(target, 0.0),
            heating: state.is_set(demand) && state.is_set(keys::FLAME),
            min_target,
            max_target,
        }
    }
}

/// Clamp `target` into the circuit's range and build the matching command.
pub fn target_command(kind: CircuitKind, target: f64) -> ClimateCommand {
    let (min, max) = kind.target_range();
    let target = target.clamp(min, max);
    match kind {
        CircuitKind::HeatingAuto => ClimateCommand::SetRoomTarget(target),
        CircuitKind::HeatingManual => ClimateCommand::SetHeatingTarget(target),
        CircuitKind::Dhw => ClimateCommand::SetDhwTarget(target),
    }
}

/// The command that brings the boiler's `atm` in line with `mode`, if the
/// reported value disagrees.
pub fn mode_correction(state: &DeviceState, mode: OperateMode) -> Option<ClimateCommand> {
    let reported = state.get(keys::AUTO_MODE)?;
    let wanted = mode.atm_value() as f64;
    if reported != wanted {
        Some(ClimateCommand::SetAutoMode(mode == OperateMode::Auto))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn state(value: Value) -> DeviceState {
        match value {
            Value::Object(map) => DeviceState::from_payload(&map),
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_flags_from_state() {
        let s = state(json!({"atm": 1, "tdm": 1, "cdm": 1, "fst": 1, "ccm": 0}));
        let flags = BoilerFlags::from_state(&s);
        assert!(flags.contains(BoilerFlags::AUTO_MODE | BoilerFlags::DHW_ENABLED));
        assert!(flags.contains(BoilerFlags::DHW_ACTIVE | BoilerFlags::FLAME));
        assert!(!flags.contains(BoilerFlags::CH_ACTIVE));
        assert_eq!(
            flags.names(),
            vec!["auto_mode", "dhw_enabled", "dhw_active", "flame"]
        );
    }

    #[test]
    fn test_default_state_has_no_flags() {
        assert!(BoilerFlags::from_state(&DeviceState::default()).is_empty());
    }

    #[test]
    fn test_heating_circuit_auto() {
        let s = state(json!({"atm": 1, "crt": 20.5, "trt": 21, "ccm": 1, "fst": 1}));
        let c = Circuit::heating(&s, OperateMode::Auto);
        assert_eq!(c.kind, CircuitKind::HeatingAuto);
        assert!(c.enabled);
        assert_eq!(c.current, 20.5);
        assert_eq!(c.target, 21.0);
        assert!(c.heating);
        assert_eq!((c.min_target, c.max_target), (4.0, 30.0));
    }

    #[test]
    fn test_heating_circuit_manual() {
        let s = state(json!({"tcm": 1, "cct": 55, "tct": 60, "ccm": 1, "fst": 0}));
        let c = Circuit::heating(&s, OperateMode::Manual);
        assert!(c.enabled);
        assert_eq!(c.current, 55.0);
        assert_eq!(c.target, 60.0);
        assert!(!c.heating);
        assert_eq!((c.min_target, c.max_target), (35.0, 80.0));
    }

    #[test]
    fn test_dhw_circuit() {
        let s = state(json!({"tdm": 0, "cdt": 42, "tdt": 48}));
        let c = Circuit::dhw(&s);
        assert!(!c.enabled);
        assert_eq!(c.current, 42.0);
        assert_eq!(c.target, 48.0);
        assert_eq!((c.min_target, c.max_target), (35.0, 60.0));
    }

    #[test]
    fn test_target_command_clamps() {
        assert_eq!(
            target_command(CircuitKind::Dhw, 75.0),
            ClimateCommand::SetDhwTarget(60.0)
        );
        assert_eq!(
            target_command(CircuitKind::HeatingAuto, 2.0),
            ClimateCommand::SetRoomTarget(4.0)
        );
        assert_eq!(
            target_command(CircuitKind::HeatingManual, 65.0),
            ClimateCommand::SetHeatingTarget(65.0)
        );
    }

    #[test]
    fn test_mode_correction() {
        let manual = state(json!({"atm": 0}));
        assert_eq!(
            mode_correction(&manual, OperateMode::Auto),
            Some(ClimateCommand::SetAutoMode(true))
        );
        assert_eq!(mode_correction(&manual, OperateMode::Manual), None);

        let auto = state(json!({"atm": 1}));
        assert_eq!(
            mode_correction(&auto, OperateMode::Manual),
            Some(ClimateCommand::SetAutoMode(false))
        );
        assert_eq!(mode_correction(&state(json!({"crt": 20})), OperateMode::Auto), None);
    }
}
