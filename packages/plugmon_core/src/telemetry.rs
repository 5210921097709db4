//! Latest-reading store shared between device sessions and publishing sinks.
//!
//! One entry per outlet, keyed by the transport-assigned device identifier.
//! Sessions are the sole writers; sinks read concurrently. Entries are
//! created at subscribe time with sentinel values and are never removed —
//! stale data stays visible until a reconnect refreshes it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Opaque transport-assigned device identifier, unique per physical outlet
/// for the process lifetime.
pub type DeviceId = String;

/// The latest fully-decoded telemetry reading for one outlet.
///
/// A snapshot is only ever replaced whole by a successfully decoded
/// `ONLINE_DATA` notification; readers never observe a partial update.
/// Fresh entries carry the `-1` sentinel in every field and no
/// `updated_at` stamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Volts.
    pub voltage: f64,
    /// Amperes.
    pub current: f64,
    /// Watts.
    pub power: f64,
    /// Hertz.
    pub frequency: f64,
    /// Unitless, nominally 0–1.
    pub power_factor: f64,
    /// Kilowatt-hours.
    pub accumulated_energy: f64,
    /// Seconds the outlet has been switched on, unscaled.
    #[serde(rename = "ontime")]
    pub on_time: i64,
    /// When the store last accepted this snapshot; `None` until the first
    /// successful decode.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TelemetrySnapshot {
    /// Sentinel for a field that has never been read from the device.
    pub const UNKNOWN: f64 = -1.0;

    /// A fresh entry with every field at the sentinel value.
    pub fn unknown() -> Self {
        Self {
            voltage: Self::UNKNOWN,
            current: Self::UNKNOWN,
            power: Self::UNKNOWN,
            frequency: Self::UNKNOWN,
            power_factor: Self::UNKNOWN,
            accumulated_energy: Self::UNKNOWN,
            on_time: -1,
            updated_at: None,
        }
    }
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Shared telemetry store handle.
///
/// Cheap to clone; all clones view the same map. Writes replace the whole
/// snapshot under the lock, so concurrent readers see either the old or
/// the new reading, never a mix.
#[derive(Clone, Default)]
pub struct TelemetryStore {
    inner: Arc<RwLock<HashMap<DeviceId, TelemetrySnapshot>>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for a device if absent, initialized to sentinels.
    ///
    /// Idempotent: re-registration after a reconnect leaves an existing
    /// snapshot untouched. Returns whether a new entry was created.
    pub async fn register(&self, device: &str) -> bool {
        let mut map = self.inner.write().await;
        if map.contains_key(device) {
            return false;
        }
        map.insert(device.to_string(), TelemetrySnapshot::unknown());
        true
    }

    /// Replace a device's snapshot in full, stamping `updated_at`.
    ///
    /// Returns the snapshot as stored, for forwarding to sinks.
    pub async fn update(&self, device: &str, mut snapshot: TelemetrySnapshot) -> TelemetrySnapshot {
        snapshot.updated_at = Some(Utc::now());
        let mut map = self.inner.write().await;
        map.insert(device.to_string(), snapshot.clone());
        snapshot
    }

    pub async fn get(&self, device: &str) -> Option<TelemetrySnapshot> {
        self.inner.read().await.get(device).cloned()
    }

    pub async fn contains(&self, device: &str) -> bool {
        self.inner.read().await.contains_key(device)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Copy of the full map, for readers that iterate without holding the lock.
    pub async fn all(&self) -> HashMap<DeviceId, TelemetrySnapshot> {
        self.inner.read().await.clone()
    }

    /// The store as a JSON object mapping device identity to snapshot
    /// fields — the payload an HTTP `/online` handler would serve.
    pub async fn export_json(&self) -> serde_json::Value {
        let map = self.inner.read().await;
        serde_json::to_value(&*map).unwrap_or(serde_json::Value::Null)
    }
}
