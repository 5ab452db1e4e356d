// MIT License - Copyright (c) 2026 Peter Wright
// Device state cache

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::constants::{BACKFILL_KEYS, DEFAULT_STATE_KEYS, GAS_SENTINEL, keys};
use crate::event::{EngineEvent, EventSender};

/// Engine status as seen by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// No telemetry received yet
    #[default]
    WaitingForData,
    /// A command retry sequence is in flight
    Busy,
    Ready,
    Error,
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForData => "waiting_for_data",
            Self::Busy => "busy",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest telemetry snapshot from the boiler, keyed by short telemetry code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DeviceState {
    values: BTreeMap<String, f64>,
}

impl Default for DeviceState {
    /// All documented keys at zero, `gas` at the sentinel.
    fn default() -> Self {
        let mut values: BTreeMap<String, f64> = DEFAULT_STATE_KEYS
            .iter()
            .map(|k| (k.to_string(), 0.0))
            .collect();
        values.insert(keys::GAS.to_string(), GAS_SENTINEL);
        Self { values }
    }
}

impl DeviceState {
    /// Build the next state from a decoded payload.
    ///
    /// The payload replaces the previous state wholesale. `mod`, `flt` and
    /// `pwr` are backfilled with zero, a `gas` reading of zero becomes the
    /// sentinel, and non-numeric values are skipped (booleans map to 0/1).
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let mut values = BTreeMap::new();
        for (key, value) in payload {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            };
            match number {
                Some(n) => {
                    values.insert(key.clone(), n);
                }
                None => debug!("Skipping non-numeric key {}: {}", key, value),
            }
        }
        for key in BACKFILL_KEYS {
            values.entry(key.to_string()).or_insert(0.0);
        }
        if let Some(gas) = values.get_mut(keys::GAS)
            && *gas == 0.0
        {
            *gas = GAS_SENTINEL;
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Value of `key`, or `default` when absent.
    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).unwrap_or(default)
    }

    /// Whether `key` is present and non-zero.
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v != 0.0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Consistent read of the cache.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub state: Arc<DeviceState>,
    /// Address the boiler was last heard from
    pub sender: Option<IpAddr>,
}

/// What a single `apply` saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub acknowledged: bool,
    pub new_data: bool,
}

struct CacheInner {
    state: Arc<DeviceState>,
    sender: Option<IpAddr>,
    acknowledged: bool,
}

/// Shared state between the receiver (sole writer) and the dispatcher and
/// collaborators (readers).
///
/// State, sender and the acknowledgment flag live under one lock and the
/// state is swapped as a whole `Arc`, so readers never see a half-applied
/// frame.
pub struct StateCache {
    inner: RwLock<CacheInner>,
    status: RwLock<EngineStatus>,
    event_tx: EventSender,
}

impl StateCache {
    pub fn new(event_tx: EventSender) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                state: Arc::new(DeviceState::default()),
                sender: None,
                acknowledged: false,
            }),
            status: RwLock::new(EngineStatus::WaitingForData),
            event_tx,
        }
    }

    /// Snapshot of state and sender.
    pub async fn get(&self) -> CacheSnapshot {
        let inner = self.inner.read().await;
        CacheSnapshot {
            state: inner.state.clone(),
            sender: inner.sender,
        }
    }

    pub async fn state(&self) -> Arc<DeviceState> {
        self.inner.read().await.state.clone()
    }

    pub async fn sender(&self) -> Option<IpAddr> {
        self.inner.read().await.sender
    }

    /// Merge a decoded payload from `sender`.
    pub async fn apply(&self, mut payload: Map<String, Value>, sender: IpAddr) -> ApplyOutcome {
        let acknowledged = payload.remove(keys::ACK).is_some();
        let new_data = payload.contains_key(keys::HEARTBEAT);
        let next = Arc::new(DeviceState::from_payload(&payload));

        {
            let mut inner = self.inner.write().await;
            if inner.sender != Some(sender) {
                info!("Boiler endpoint learned: {}", sender);
                inner.sender = Some(sender);
            }
            inner.state = next;
            if acknowledged {
                inner.acknowledged = true;
            }
        }

        if acknowledged {
            debug!("Acknowledgment received from {}", sender);
            let _ = self.event_tx.send(EngineEvent::Acknowledged);
            self.set_status(EngineStatus::Ready).await;
        }
        if new_data {
            if self.status().await == EngineStatus::WaitingForData {
                self.set_status(EngineStatus::Ready).await;
            }
            let _ = self.event_tx.send(EngineEvent::NewData);
        }

        ApplyOutcome {
            acknowledged,
            new_data,
        }
    }

    /// Reset the acknowledgment flag before a new retry sequence.
    pub async fn clear_ack(&self) {
        self.inner.write().await.acknowledged = false;
    }

    pub async fn is_acknowledged(&self) -> bool {
        self.inner.read().await.acknowledged
    }

    pub async fn status(&self) -> EngineStatus {
        *self.status.read().await
    }

    /// Update status, emitting `StatusChanged` if it differs.
    pub async fn set_status(&self, new: EngineStatus) {
        let old = {
            let mut status = self.status.write().await;
            let old = *status;
            *status = new;
            old
        };
        if old != new {
            debug!("Status {} -> {}", old, new);
            let _ = self.event_tx.send(EngineEvent::StatusChanged { old, new });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_channel;
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    const BOILER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));

    #[test]
    fn test_default_state() {
        let state = DeviceState::default();
        assert_eq!(state.len(), 18);
        assert_eq!(state.get("crt"), Some(0.0));
        assert_eq!(state.get("gas"), Some(GAS_SENTINEL));
    }

    #[test]
    fn test_backfill_rules() {
        let state = DeviceState::from_payload(&payload(json!({"crt": 21.5, "gas": 0})));
        assert_eq!(state.get("mod"), Some(0.0));
        assert_eq!(state.get("flt"), Some(0.0));
        assert_eq!(state.get("pwr"), Some(0.0));
        assert_eq!(state.get("gas"), Some(GAS_SENTINEL));
        assert_eq!(state.get("crt"), Some(21.5));
    }

    #[test]
    fn test_backfill_keeps_reported_values() {
        let state = DeviceState::from_payload(&payload(
            json!({"mod": 40, "flt": 2, "pwr": 1, "gas": 12.5}),
        ));
        assert_eq!(state.get("mod"), Some(40.0));
        assert_eq!(state.get("flt"), Some(2.0));
        assert_eq!(state.get("pwr"), Some(1.0));
        assert_eq!(state.get("gas"), Some(12.5));
    }

    #[test]
    fn test_gas_absent_stays_absent() {
        let state = DeviceState::from_payload(&payload(json!({"crt": 20})));
        assert!(!state.contains("gas"));
    }

    #[test]
    fn test_non_numeric_values_skipped() {
        let state =
            DeviceState::from_payload(&payload(json!({"ver": "1.2", "fst": true, "crt": 20})));
        assert!(!state.contains("ver"));
        assert_eq!(state.get("fst"), Some(1.0));
    }

    #[tokio::test]
    async fn test_apply_replaces_state_and_learns_sender() {
        let (tx, _rx) = event_channel(16);
        let cache = StateCache::new(tx);
        assert!(cache.sender().await.is_none());

        cache
            .apply(payload(json!({"crt": 21.0, "tdt": 45})), BOILER)
            .await;
        let snap = cache.get().await;
        assert_eq!(snap.sender, Some(BOILER));
        assert_eq!(snap.state.get("tdt"), Some(45.0));

        // Wholesale replace: tdt disappears when the next frame omits it.
        cache.apply(payload(json!({"crt": 21.5})), BOILER).await;
        let state = cache.state().await;
        assert!(!state.contains("tdt"));
        assert_eq!(state.get("crt"), Some(21.5));
    }

    #[tokio::test]
    async fn test_apply_ack_marker() {
        let (tx, mut rx) = event_channel(16);
        let cache = StateCache::new(tx);

        let outcome = cache.apply(payload(json!({"rec": 1, "tdt": 50})), BOILER).await;
        assert!(outcome.acknowledged);
        assert!(!outcome.new_data);
        assert!(cache.is_acknowledged().await);
        assert!(!cache.state().await.contains("rec"));
        assert_eq!(cache.status().await, EngineStatus::Ready);
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::Acknowledged);

        // A later frame without the marker leaves the flag set until cleared.
        cache.apply(payload(json!({"tdt": 50})), BOILER).await;
        assert!(cache.is_acknowledged().await);
        cache.clear_ack().await;
        assert!(!cache.is_acknowledged().await);
    }

    #[tokio::test]
    async fn test_apply_heartbeat_fires_new_data() {
        let (tx, mut rx) = event_channel(16);
        let cache = StateCache::new(tx);
        assert_eq!(cache.status().await, EngineStatus::WaitingForData);

        let outcome = cache.apply(payload(json!({"crt": 19.0})), BOILER).await;
        assert!(outcome.new_data);
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::StatusChanged {
                old: EngineStatus::WaitingForData,
                new: EngineStatus::Ready
            }
        );
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::NewData);

        let outcome = cache.apply(payload(json!({"tdt": 40})), BOILER).await;
        assert!(!outcome.new_data);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_status_display_matches_serialized_form() {
        for status in [
            EngineStatus::WaitingForData,
            EngineStatus::Busy,
            EngineStatus::Ready,
            EngineStatus::Error,
        ] {
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                json!(status.to_string())
            );
        }
        assert_eq!(EngineStatus::WaitingForData.to_string(), "waiting_for_data");
    }

    #[tokio::test]
    async fn test_set_status_only_emits_on_change() {
        let (tx, mut rx) = event_channel(16);
        let cache = StateCache::new(tx);
        cache.set_status(EngineStatus::Busy).await;
        cache.set_status(EngineStatus::Busy).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::StatusChanged { new: EngineStatus::Busy, .. })
        ));
        assert!(rx.try_recv().is_err());
    }
}
