//! BLE transport trait definitions and outlet GATT identifiers
//!
//! Defines the abstract adapter/peripheral interface the bridge consumes.
//! A host BLE stack (btleplug, simplepyble-alike, or the in-process
//! simulator) provides the implementation; the bridge never touches the
//! radio itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::TransportError;

/// GATT service advertised by the smart outlet.
pub const OUTLET_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ff00_0000_1000_8000_00805f9b34fb);

/// Characteristic accepting request frames.
pub const WRITE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

/// Characteristic delivering notification frames.
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);

/// A local Bluetooth adapter capable of scanning for peripherals.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Human-readable adapter name.
    fn identifier(&self) -> String;

    /// Adapter hardware address.
    fn address(&self) -> String;

    /// Scan for the given duration and return everything heard.
    async fn scan(&self, duration: Duration)
        -> Result<Vec<Arc<dyn BlePeripheral>>, TransportError>;
}

/// A discovered BLE peripheral, exclusively owned by one device session
/// once a session is created for it.
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    /// Transport-assigned device identifier; the telemetry store key.
    fn identifier(&self) -> String;

    /// Peripheral hardware address.
    fn address(&self) -> String;

    /// Advertised GATT service UUIDs.
    async fn services(&self) -> Vec<Uuid>;

    async fn connect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Write a request frame to a characteristic. Fails with
    /// `NotConnected` if the link is down.
    async fn write_command(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Register for notifications on a characteristic.
    ///
    /// Inbound frames are delivered on the returned queue, decoupling the
    /// transport's delivery context from the session's decode path. The
    /// queue closes when the link drops; re-subscribe after reconnecting.
    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;
}
