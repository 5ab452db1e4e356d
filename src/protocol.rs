// MIT License - Copyright (c) 2026 Peter Wright
// JSON payload handling

use serde_json::{Map, Value, json};

use crate::config::OperateMode;
use crate::constants::{COMMAND_PRIORITY, SOURCE_TAG, keys};
use crate::error::{AirtubError, Result};

/// Commands understood by the boiler.
///
/// Each variant serializes to a one-key JSON fragment; the dispatcher adds
/// the routing fields (`tar`, `dev`, `pwr`, `try`) before sending.
///
/// The heating circuit has two families of commands depending on the
/// operate mode: in auto mode the boiler tracks a room target (`trt`) and
/// is switched with `atm`; in manual mode it tracks a flow target (`tct`)
/// and is switched with `tcm`. DHW is the same in both modes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClimateCommand {
    /// `atm` - room-temperature (auto) control on/off
    SetAutoMode(bool),
    /// `tcm` - manual central heating on/off
    SetHeating(bool),
    /// `tdm` - domestic hot water on/off
    SetDhw(bool),
    /// `trt` - room target, auto mode
    SetRoomTarget(f64),
    /// `tct` - flow target, manual mode
    SetHeatingTarget(f64),
    /// `tdt` - hot water target
    SetDhwTarget(f64),
}

impl ClimateCommand {
    /// Switch the heating circuit using the key matching `mode`.
    pub fn for_heating_mode(mode: OperateMode, on: bool) -> Self {
        match mode {
            OperateMode::Auto => Self::SetAutoMode(on),
            OperateMode::Manual => Self::SetHeating(on),
        }
    }

    /// Set the heating target using the key matching `mode`.
    pub fn for_heating_target(mode: OperateMode, target: f64) -> Self {
        match mode {
            OperateMode::Auto => Self::SetRoomTarget(target),
            OperateMode::Manual => Self::SetHeatingTarget(target),
        }
    }

    /// The JSON key this command writes.
    pub fn key(&self) -> &'static str {
        match self {
            Self::SetAutoMode(_) => keys::AUTO_MODE,
            Self::SetHeating(_) => keys::CH_ENABLED,
            Self::SetDhw(_) => keys::DHW_ENABLED,
            Self::SetRoomTarget(_) => keys::ROOM_TARGET,
            Self::SetHeatingTarget(_) => keys::CH_TARGET,
            Self::SetDhwTarget(_) => keys::DHW_TARGET,
        }
    }

    /// Compact JSON fragment, e.g. `{"tdt":45.0}`.
    pub fn to_fragment(&self) -> String {
        let value = match *self {
            Self::SetAutoMode(on) | Self::SetHeating(on) | Self::SetDhw(on) => json!(on as u8),
            Self::SetRoomTarget(t) | Self::SetHeatingTarget(t) | Self::SetDhwTarget(t) => json!(t),
        };
        let mut map = Map::new();
        map.insert(self.key().to_string(), value);
        Value::Object(map).to_string()
    }
}

/// Whether a decrypted payload mentions the device at all.
///
/// Several boilers share one group, so this is the first filter.
pub fn mentions_device(text: &str, device_id: &str) -> bool {
    text.contains(device_id)
}

/// Parse a payload addressed to `device_id` into a JSON object.
///
/// The identifier field is dropped, first as the literal `"dev":"<id>",`
/// prefix the boiler emits and then as a key if it survived in another
/// position.
pub fn parse_device_payload(text: &str, device_id: &str) -> serde_json::Result<Map<String, Value>> {
    let needle = format!("\"{}\":\"{}\",", keys::DEVICE, device_id);
    let stripped = text.replace(&needle, "");
    let mut map: Map<String, Value> = serde_json::from_str(stripped.trim_end_matches('\0'))?;
    map.remove(keys::DEVICE);
    Ok(map)
}

/// Parse a caller-supplied command fragment and add routing fields.
///
/// The fragment must be a JSON object. The attempt counter is added per
/// send by [`with_attempt`].
pub fn build_command(fragment: &str, device_id: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(fragment)?;
    let Value::Object(mut map) = value else {
        return Err(AirtubError::InvalidCommand {
            details: format!("expected a JSON object, got: {}", fragment),
        });
    };
    map.insert(keys::TARGET.to_string(), json!(device_id));
    map.insert(keys::DEVICE.to_string(), json!(SOURCE_TAG));
    map.insert(keys::PRIORITY.to_string(), json!(COMMAND_PRIORITY));
    Ok(map)
}

/// Stamp the attempt counter and serialize compactly.
pub fn with_attempt(command: &mut Map<String, Value>, attempt: u32) -> String {
    command.insert(keys::TRY.to_string(), json!(attempt));
    Value::Object(command.clone()).to_string()
}
