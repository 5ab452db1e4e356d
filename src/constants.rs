// MIT License - Copyright (c) 2026 Peter Wright
// Wire protocol constants

use std::net::Ipv4Addr;
use std::time::Duration;

/// Frame header: msg_type, data_len, two reserved bytes, CRC-32 (LE).
pub const HEADER_SIZE: usize = 8;
/// Payload region, zero-padded after `data_len` bytes.
pub const MAX_PAYLOAD_SIZE: usize = 180;
/// Every frame on the wire is exactly this long.
pub const FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// Message type used for outbound commands.
pub const MSG_TYPE_COMMAND: u8 = 4;

/// Datagram receive buffer.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Default multicast group the boilers publish on.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 3);
/// Default UDP port for both the group and unicast commands.
pub const DEFAULT_PORT: u16 = 4211;
/// Default multicast TTL for outbound traffic.
pub const DEFAULT_MULTICAST_TTL: u32 = 10;

/// Attempts per command before giving up.
pub const DEFAULT_RETRY_MAX: u32 = 5;
/// Wait between a send and the acknowledgment check.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// Pause after a socket error in the receive loop.
pub const DEFAULT_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// JSON keys with protocol meaning.
pub mod keys {
    /// Device identifier carried by every inbound frame.
    pub const DEVICE: &str = "dev";
    /// One-shot acknowledgment marker.
    pub const ACK: &str = "rec";
    /// Present on full telemetry refreshes.
    pub const HEARTBEAT: &str = "crt";
    /// Target device identifier on outbound commands.
    pub const TARGET: &str = "tar";
    /// Priority on outbound commands. Also the boiler power reading inbound.
    pub const PRIORITY: &str = "pwr";
    /// Attempt counter on outbound commands.
    pub const TRY: &str = "try";

    pub const GAS: &str = "gas";
    pub const MODULATION: &str = "mod";
    pub const FAULT: &str = "flt";

    pub const AUTO_MODE: &str = "atm";
    pub const ROOM_CURRENT: &str = "crt";
    pub const ROOM_TARGET: &str = "trt";
    pub const CH_ENABLED: &str = "tcm";
    pub const CH_TARGET: &str = "tct";
    pub const CH_ACTIVE: &str = "ccm";
    pub const CH_CURRENT: &str = "cct";
    pub const DHW_ENABLED: &str = "tdm";
    pub const DHW_TARGET: &str = "tdt";
    pub const DHW_ACTIVE: &str = "cdm";
    pub const DHW_CURRENT: &str = "cdt";
    pub const FLAME: &str = "fst";
}

/// Source tag stamped into the `dev` field of outbound commands.
pub const SOURCE_TAG: &str = "airtub_udp";
/// Fixed priority value sent with every command.
pub const COMMAND_PRIORITY: u64 = 5;

/// Stand-in for a gas reading of exactly zero, which the device reserves
/// for "unset".
pub const GAS_SENTINEL: f64 = 0.000001;

/// Keys present in a freshly created state, all defaulting to zero except
/// `gas`.
pub const DEFAULT_STATE_KEYS: [&str; 17] = [
    "tcm", "tct", "ccm", "cct", "tdm", "tdt", "cdm", "cdt", "atm", "trt", "crt", "pwr", "odt",
    "coe", "fst", "mod", "flt",
];

/// Keys backfilled with zero when an inbound frame omits them.
pub const BACKFILL_KEYS: [&str; 3] = [keys::MODULATION, keys::FAULT, keys::PRIORITY];
