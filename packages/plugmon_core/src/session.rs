//! Per-outlet session: connect with retry, subscribe, poll, reconnect.
//!
//! One session exclusively owns one peripheral for the duration of a
//! cycle. It connects with an unbounded 1 s retry loop (shutdown is the
//! only escape), registers for telemetry notifications, then polls the
//! outlet every second until the cycle budget elapses. Transport and
//! protocol errors are contained here: a failed write re-enters the
//! connect loop, a malformed notification is dropped with the previous
//! snapshot left untouched.

use std::sync::Arc;

use tokio::time::{sleep, Instant};

use crate::ble::transport::{
    BlePeripheral, NOTIFY_CHARACTERISTIC_UUID, OUTLET_SERVICE_UUID, WRITE_CHARACTERISTIC_UUID,
};
use crate::ble::TransportError;
use crate::config::SessionConfig;
use crate::protocol::{decode_notification, encode_request, ONLINE_DATA};
use crate::shutdown::ShutdownSignal;
use crate::sink::TelemetrySink;
use crate::telemetry::TelemetryStore;

pub struct DeviceSession {
    peripheral: Arc<dyn BlePeripheral>,
    store: TelemetryStore,
    sink: Arc<dyn TelemetrySink>,
    config: SessionConfig,
    shutdown: ShutdownSignal,
}

impl DeviceSession {
    pub fn new(
        peripheral: Arc<dyn BlePeripheral>,
        store: TelemetryStore,
        sink: Arc<dyn TelemetrySink>,
        config: SessionConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            peripheral,
            store,
            sink,
            config,
            shutdown,
        }
    }

    /// Run one full connect → subscribe → poll cycle.
    ///
    /// Returns when the cycle budget elapses or shutdown is triggered,
    /// after disconnecting the peripheral.
    pub async fn run(&self) {
        let id = self.peripheral.identifier();
        if !self.connect_with_retry().await {
            self.teardown().await;
            return;
        }
        log::info!(
            "Successfully connected to {} [{}]",
            id,
            self.peripheral.address()
        );

        if let Err(e) = self.subscribe().await {
            log::warn!("Failed to subscribe to {}: {}", id, e);
            self.teardown().await;
            return;
        }

        self.poll_loop().await;
        self.teardown().await;
    }

    /// Connect until the peripheral accepts or shutdown is requested.
    /// Returns false on shutdown.
    async fn connect_with_retry(&self) -> bool {
        let id = self.peripheral.identifier();
        while !self.peripheral.is_connected() {
            if self.shutdown.is_triggered() {
                return false;
            }
            log::info!("Connecting to {} [{}]", id, self.peripheral.address());
            if let Err(e) = self.peripheral.connect().await {
                log::warn!("Connect attempt to {} failed: {}", id, e);
            }
            tokio::select! {
                _ = sleep(self.config.connect_retry_delay) => {}
                _ = self.shutdown.wait() => return false,
            }
        }
        true
    }

    /// Register for telemetry notifications and start the decode pump.
    ///
    /// Creates the device's store entry if absent; re-subscription after a
    /// reconnect leaves an existing snapshot untouched.
    async fn subscribe(&self) -> Result<(), TransportError> {
        let rx = self
            .peripheral
            .subscribe(OUTLET_SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID)
            .await?;
        let id = self.peripheral.identifier();
        if self.store.register(&id).await {
            log::info!("Created telemetry entry for {}", id);
        } else {
            log::debug!("Telemetry entry already exists for {}", id);
        }

        let store = self.store.clone();
        let sink = Arc::clone(&self.sink);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut rx = rx;
            loop {
                tokio::select! {
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        match decode_notification(&frame) {
                            Ok(Some(snapshot)) => {
                                let stored = store.update(&id, snapshot).await;
                                if let Err(e) = sink.publish(&id, &stored).await {
                                    log::warn!("Sink publish for {} failed: {}", id, e);
                                }
                            }
                            Ok(None) => {
                                log::debug!("Ignoring non-telemetry notification from {}", id);
                            }
                            Err(e) => {
                                log::warn!(
                                    "Dropping malformed notification from {}: {} [{}]",
                                    id,
                                    e,
                                    hex::encode(&frame)
                                );
                            }
                        }
                    }
                    _ = shutdown.wait() => break,
                }
            }
        });

        log::info!("Registered notifications for {}", self.peripheral.identifier());
        Ok(())
    }

    /// Send an `ONLINE_DATA` request every poll interval until the cycle
    /// budget elapses or shutdown arrives. Replies come back through the
    /// notification pump; the loop never waits for them.
    async fn poll_loop(&self) {
        let id = self.peripheral.identifier();
        let request = match encode_request(ONLINE_DATA) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to encode poll request: {}", e);
                return;
            }
        };

        let started = Instant::now();
        while !self.shutdown.is_triggered() && started.elapsed() < self.config.cycle_budget {
            let write = self
                .peripheral
                .write_command(OUTLET_SERVICE_UUID, WRITE_CHARACTERISTIC_UUID, &request)
                .await;
            match write {
                Ok(()) => {}
                Err(TransportError::NotConnected) => {
                    log::warn!("{} lost the link, reconnecting", id);
                    if !self.connect_with_retry().await {
                        return;
                    }
                    log::info!("Reconnected to {} [{}]", id, self.peripheral.address());
                    if let Err(e) = self.subscribe().await {
                        log::warn!("Failed to re-subscribe to {}: {}", id, e);
                    }
                }
                Err(e) => log::warn!("Poll write to {} failed: {}", id, e),
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                _ = self.shutdown.wait() => return,
            }
        }
    }

    async fn teardown(&self) {
        let id = self.peripheral.identifier();
        log::info!("Disconnecting {}", id);
        if let Err(e) = self.peripheral.disconnect().await {
            log::warn!("Disconnect of {} failed: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::ble::simulated::{OutletReading, SimOutletNetwork};
    use crate::sink::{NoOpSink, SinkError};
    use crate::telemetry::TelemetrySnapshot;

    struct CountingSink {
        published: AtomicUsize,
    }

    #[async_trait]
    impl TelemetrySink for CountingSink {
        async fn publish(
            &self,
            _device: &str,
            _snapshot: &TelemetrySnapshot,
        ) -> Result<(), SinkError> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn reading_with_voltage(millivolts: u32) -> OutletReading {
        OutletReading {
            voltage_millivolts: millivolts,
            ..OutletReading::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cycle_updates_store_and_sink() {
        let network = SimOutletNetwork::new();
        let outlet = network.add_outlet("outlet-a").await;
        outlet.set_reading(reading_with_voltage(230_000)).await;

        let store = TelemetryStore::new();
        let sink = Arc::new(CountingSink {
            published: AtomicUsize::new(0),
        });
        let shutdown = ShutdownSignal::new();
        let session = DeviceSession::new(
            outlet.clone(),
            store.clone(),
            Arc::clone(&sink) as Arc<dyn TelemetrySink>,
            SessionConfig::default(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move { session.run().await });

        tokio::time::sleep(Duration::from_secs(3)).await;
        let snapshot = store.get("outlet-a").await.expect("entry created");
        assert!((snapshot.voltage - 230.0).abs() < 1e-9);
        assert!(snapshot.updated_at.is_some());
        assert!(outlet.request_count() >= 2);
        assert!(sink.published.load(Ordering::SeqCst) >= 2);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("session exits promptly")
            .unwrap();
        assert!(!outlet.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_reenters_connecting() {
        let network = SimOutletNetwork::new();
        let outlet = network.add_outlet("outlet-a").await;
        outlet.set_reading(reading_with_voltage(230_000)).await;

        let store = TelemetryStore::new();
        let shutdown = ShutdownSignal::new();
        let session = DeviceSession::new(
            outlet.clone(),
            store.clone(),
            Arc::new(NoOpSink),
            SessionConfig::default(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move { session.run().await });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!((store.get("outlet-a").await.unwrap().voltage - 230.0).abs() < 1e-9);

        // Kill the link and change the reading; the session must reconnect,
        // re-subscribe, and resume polling the new value on its own.
        outlet.drop_link().await;
        outlet.set_reading(reading_with_voltage(121_000)).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(outlet.is_connected());
        assert!((store.get("outlet-a").await.unwrap().voltage - 121.0).abs() < 1e-9);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("session exits promptly")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_connect_retry() {
        let network = SimOutletNetwork::new();
        let outlet = network.add_outlet("outlet-a").await;
        outlet.fail_next_connects(u32::MAX);

        let store = TelemetryStore::new();
        let shutdown = ShutdownSignal::new();
        let session = DeviceSession::new(
            outlet.clone(),
            store.clone(),
            Arc::new(NoOpSink),
            SessionConfig::default(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move { session.run().await });

        tokio::time::sleep(Duration::from_secs(3)).await;
        let attempts_before = outlet.connect_attempts();
        assert!(attempts_before >= 2);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("session exits within one retry interval")
            .unwrap();

        // No further attempts once the session has exited.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(outlet.connect_attempts() <= attempts_before + 1);
        assert!(store.get("outlet-a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_notifications_leave_snapshot_untouched() {
        let network = SimOutletNetwork::new();
        let outlet = network.add_outlet("outlet-a").await;
        outlet.set_reading(reading_with_voltage(230_000)).await;

        let store = TelemetryStore::new();
        let shutdown = ShutdownSignal::new();
        // A huge poll interval: exactly one poll happens, then the session
        // idles so injected garbage is the only store traffic.
        let config = SessionConfig {
            poll_interval: Duration::from_secs(3_600),
            ..SessionConfig::default()
        };
        let session = DeviceSession::new(
            outlet.clone(),
            store.clone(),
            Arc::new(NoOpSink),
            config,
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move { session.run().await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = store.get("outlet-a").await.expect("first poll landed");
        assert!((before.voltage - 230.0).abs() < 1e-9);

        // Truncated telemetry frame and a non-telemetry notification: both
        // dropped, neither resets nor mutates the snapshot.
        let mut truncated = vec![0x00, 0x01];
        truncated.extend_from_slice(&ONLINE_DATA.to_be_bytes());
        truncated.extend_from_slice(&[0x00; 10]);
        outlet.inject_notification(truncated).await;
        let mut other_kind = vec![0x00, 0x02];
        other_kind.extend_from_slice(&61442u16.to_be_bytes());
        other_kind.extend_from_slice(&[0x00; 2]);
        outlet.inject_notification(other_kind).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.get("outlet-a").await.unwrap(), before);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("session exits promptly")
            .unwrap();
    }
}
