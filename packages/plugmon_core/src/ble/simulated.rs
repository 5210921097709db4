//! In-process outlet simulator
//!
//! Provides a simulated BLE neighborhood where outlet peripherals can be
//! discovered, connected, polled, and disconnected entirely in-process.
//! Used for integration testing and the demo CLI without requiring real
//! BLE hardware. Simulated outlets answer `ONLINE_DATA` requests with
//! well-formed notification frames built from configurable raw readings,
//! and expose fault-injection knobs for exercising the reconnect paths.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::transport::{
    BleAdapter, BlePeripheral, NOTIFY_CHARACTERISTIC_UUID, OUTLET_SERVICE_UUID,
    WRITE_CHARACTERISTIC_UUID,
};
use super::TransportError;
use crate::protocol::ONLINE_DATA;

/// Raw register values a simulated outlet reports, in the device's native
/// units (the notification frame carries these unscaled).
#[derive(Clone, Copy, Debug)]
pub struct OutletReading {
    pub voltage_millivolts: u32,
    pub current_milliamps: u32,
    pub power_milliwatts: u32,
    pub frequency_decihertz: u16,
    pub power_factor_centi: u16,
    pub energy_watt_hours: u32,
    pub on_time_seconds: u32,
}

impl Default for OutletReading {
    fn default() -> Self {
        Self {
            voltage_millivolts: 230_000,
            current_milliamps: 1_000,
            power_milliwatts: 230_000,
            frequency_decihertz: 500,
            power_factor_centi: 100,
            energy_watt_hours: 0,
            on_time_seconds: 0,
        }
    }
}

/// The simulated neighborhood: every device added here is visible to the
/// adapter's scans.
pub struct SimOutletNetwork {
    devices: Mutex<Vec<Arc<SimOutlet>>>,
}

impl SimOutletNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(Vec::new()),
        })
    }

    /// Add a smart outlet advertising the outlet GATT service.
    pub async fn add_outlet(self: &Arc<Self>, identifier: &str) -> Arc<SimOutlet> {
        self.add_device(identifier, vec![OUTLET_SERVICE_UUID]).await
    }

    /// Add a device with arbitrary advertised services (e.g. an unrelated
    /// peripheral the discovery filter must skip).
    pub async fn add_device(
        self: &Arc<Self>,
        identifier: &str,
        services: Vec<Uuid>,
    ) -> Arc<SimOutlet> {
        let mut devices = self.devices.lock().await;
        let address = format!("AA:BB:CC:00:00:{:02X}", devices.len());
        let device = Arc::new(SimOutlet {
            identifier: identifier.to_string(),
            address,
            services,
            connected: AtomicBool::new(false),
            reject_connects: AtomicU32::new(0),
            connect_attempts: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            sequence: AtomicU16::new(0),
            reading: Mutex::new(OutletReading::default()),
            subscribers: Mutex::new(Vec::new()),
        });
        devices.push(Arc::clone(&device));
        device
    }

    /// The host adapter for this neighborhood.
    pub fn adapter(self: &Arc<Self>) -> Arc<SimAdapter> {
        Arc::new(SimAdapter {
            network: Arc::clone(self),
        })
    }
}

/// Simulated local Bluetooth adapter.
pub struct SimAdapter {
    network: Arc<SimOutletNetwork>,
}

#[async_trait]
impl BleAdapter for SimAdapter {
    fn identifier(&self) -> String {
        "sim0".to_string()
    }

    fn address(&self) -> String {
        "00:00:00:00:00:00".to_string()
    }

    async fn scan(
        &self,
        duration: Duration,
    ) -> Result<Vec<Arc<dyn BlePeripheral>>, TransportError> {
        tokio::time::sleep(duration).await;
        let devices = self.network.devices.lock().await;
        Ok(devices
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn BlePeripheral>)
            .collect())
    }
}

/// A simulated smart outlet peripheral.
pub struct SimOutlet {
    identifier: String,
    address: String,
    services: Vec<Uuid>,
    connected: AtomicBool,
    /// Number of upcoming connect attempts to reject; `u32::MAX` rejects
    /// indefinitely.
    reject_connects: AtomicU32,
    connect_attempts: AtomicU64,
    request_count: AtomicU64,
    sequence: AtomicU16,
    reading: Mutex<OutletReading>,
    subscribers: Mutex<Vec<mpsc::Sender<Vec<u8>>>>,
}

impl SimOutlet {
    /// Replace the raw readings reported by subsequent polls.
    pub async fn set_reading(&self, reading: OutletReading) {
        *self.reading.lock().await = reading;
    }

    /// Reject the next `n` connect attempts (`u32::MAX` for all of them).
    pub fn fail_next_connects(&self, n: u32) {
        self.reject_connects.store(n, Ordering::SeqCst);
    }

    /// Kill the link without a clean disconnect: the next write fails
    /// with `NotConnected` and notification queues close.
    pub async fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscribers.lock().await.clear();
    }

    /// Connect attempts observed, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// `ONLINE_DATA` requests answered so far.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Push an arbitrary notification frame to every subscriber, bypassing
    /// the request path. Lets tests deliver malformed or unrelated frames.
    pub async fn inject_notification(&self, frame: Vec<u8>) {
        self.notify_subscribers(frame).await;
    }

    async fn online_data_frame(&self) -> Vec<u8> {
        let reading = *self.reading.lock().await;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let mut frame = Vec::with_capacity(30);
        frame.extend_from_slice(&sequence.to_be_bytes());
        frame.extend_from_slice(&ONLINE_DATA.to_be_bytes());
        frame.extend_from_slice(&24u16.to_be_bytes());
        frame.extend_from_slice(&reading.voltage_millivolts.to_be_bytes());
        frame.extend_from_slice(&reading.current_milliamps.to_be_bytes());
        frame.extend_from_slice(&reading.power_milliwatts.to_be_bytes());
        frame.extend_from_slice(&reading.frequency_decihertz.to_be_bytes());
        frame.extend_from_slice(&reading.power_factor_centi.to_be_bytes());
        frame.extend_from_slice(&reading.energy_watt_hours.to_be_bytes());
        frame.extend_from_slice(&reading.on_time_seconds.to_be_bytes());
        frame
    }

    async fn notify_subscribers(&self, frame: Vec<u8>) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[async_trait]
impl BlePeripheral for SimOutlet {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn services(&self) -> Vec<Uuid> {
        self.services.clone()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.reject_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.reject_connects.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(TransportError::ConnectionError(format!(
                "{} refused the connection",
                self.identifier
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.subscribers.lock().await.clear();
        Ok(())
    }

    async fn write_command(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if characteristic != WRITE_CHARACTERISTIC_UUID {
            return Err(TransportError::WriteError(format!(
                "unknown characteristic {}",
                characteristic
            )));
        }
        // Requests carry the command code in bytes 2..4; only telemetry
        // polls get an answer.
        if payload.len() >= 4 && payload[2..4] == ONLINE_DATA.to_be_bytes() {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            let frame = self.online_data_frame().await;
            self.notify_subscribers(frame).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if characteristic != NOTIFY_CHARACTERISTIC_UUID {
            return Err(TransportError::SubscribeError(format!(
                "unknown characteristic {}",
                characteristic
            )));
        }
        let (tx, rx) = mpsc::channel(32);
        self.subscribers.lock().await.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_notification, encode_request};

    #[tokio::test(start_paused = true)]
    async fn test_scan_returns_all_devices_after_duration() {
        let network = SimOutletNetwork::new();
        network.add_outlet("outlet-a").await;
        network.add_outlet("outlet-b").await;
        let adapter = network.adapter();

        let before = tokio::time::Instant::now();
        let found = adapter.scan(Duration::from_secs(5)).await.unwrap();
        assert!(before.elapsed() >= Duration::from_secs(5));
        assert_eq!(found.len(), 2);
        assert!(found[0].services().await.contains(&OUTLET_SERVICE_UUID));
    }

    #[tokio::test]
    async fn test_poll_round_trip() {
        let network = SimOutletNetwork::new();
        let outlet = network.add_outlet("outlet-a").await;
        outlet
            .set_reading(OutletReading {
                voltage_millivolts: 230_000,
                current_milliamps: 1_500,
                power_milliwatts: 345_000,
                frequency_decihertz: 600,
                power_factor_centi: 99,
                energy_watt_hours: 12_345,
                on_time_seconds: 3_600,
            })
            .await;

        outlet.connect().await.unwrap();
        let mut rx = outlet
            .subscribe(OUTLET_SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID)
            .await
            .unwrap();

        let request = encode_request(ONLINE_DATA).unwrap();
        outlet
            .write_command(OUTLET_SERVICE_UUID, WRITE_CHARACTERISTIC_UUID, &request)
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        let snapshot = decode_notification(&frame).unwrap().unwrap();
        assert!((snapshot.voltage - 230.0).abs() < 1e-9);
        assert!((snapshot.current - 1.5).abs() < 1e-9);
        assert_eq!(snapshot.on_time, 3_600);
        assert_eq!(outlet.request_count(), 1);
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let network = SimOutletNetwork::new();
        let outlet = network.add_outlet("outlet-a").await;
        let request = encode_request(ONLINE_DATA).unwrap();

        let result = outlet
            .write_command(OUTLET_SERVICE_UUID, WRITE_CHARACTERISTIC_UUID, &request)
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failure_injection() {
        let network = SimOutletNetwork::new();
        let outlet = network.add_outlet("outlet-a").await;
        outlet.fail_next_connects(2);

        assert!(outlet.connect().await.is_err());
        assert!(outlet.connect().await.is_err());
        outlet.connect().await.unwrap();
        assert!(outlet.is_connected());
        assert_eq!(outlet.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_drop_link_closes_notification_queue() {
        let network = SimOutletNetwork::new();
        let outlet = network.add_outlet("outlet-a").await;
        outlet.connect().await.unwrap();
        let mut rx = outlet
            .subscribe(OUTLET_SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID)
            .await
            .unwrap();

        outlet.drop_link().await;
        assert!(!outlet.is_connected());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_non_telemetry_request_gets_no_answer() {
        let network = SimOutletNetwork::new();
        let outlet = network.add_outlet("outlet-a").await;
        outlet.connect().await.unwrap();
        let mut rx = outlet
            .subscribe(OUTLET_SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID)
            .await
            .unwrap();

        let request = encode_request(61442).unwrap();
        outlet
            .write_command(OUTLET_SERVICE_UUID, WRITE_CHARACTERISTIC_UUID, &request)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(outlet.request_count(), 0);
    }
}
