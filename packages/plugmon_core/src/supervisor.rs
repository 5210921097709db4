//! Session supervisor — discovery loop that ties it all together
//!
//! Owns the top-level cycle: scan until at least one outlet advertises
//! the service UUID, run one session task per discovered outlet, wait for
//! the cycle to end (budget or shutdown), then start over. Per-device
//! errors stay inside their sessions; only the total absence of a
//! Bluetooth adapter escapes as fatal.

use std::collections::HashSet;
use std::sync::Arc;

use crate::ble::transport::{BleAdapter, BlePeripheral, OUTLET_SERVICE_UUID};
use crate::ble::TransportError;
use crate::config::SupervisorConfig;
use crate::session::DeviceSession;
use crate::shutdown::ShutdownSignal;
use crate::sink::TelemetrySink;
use crate::telemetry::TelemetryStore;

pub struct Supervisor {
    adapter: Arc<dyn BleAdapter>,
    store: TelemetryStore,
    sink: Arc<dyn TelemetrySink>,
    config: SupervisorConfig,
    shutdown: ShutdownSignal,
}

impl Supervisor {
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        store: TelemetryStore,
        sink: Arc<dyn TelemetrySink>,
        config: SupervisorConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            adapter,
            store,
            sink,
            config,
            shutdown,
        }
    }

    /// The store this supervisor's sessions write into; external sinks
    /// read it at any time.
    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    /// Run discovery + session cycles until shutdown.
    ///
    /// Only `NoAdapter` is fatal; every other transport error is retried
    /// inside the cycle.
    pub async fn run(&self) -> Result<(), TransportError> {
        log::info!(
            "Selected adapter: {} [{}]",
            self.adapter.identifier(),
            self.adapter.address()
        );
        while !self.shutdown.is_triggered() {
            self.run_cycle().await?;
        }
        log::info!("Supervisor exiting");
        Ok(())
    }

    /// One full cycle: discover outlets, run their sessions to completion.
    pub async fn run_cycle(&self) -> Result<(), TransportError> {
        let outlets = self.discover().await?;
        if outlets.is_empty() {
            // Shutdown arrived during discovery.
            return Ok(());
        }

        let mut handles = Vec::with_capacity(outlets.len());
        for peripheral in outlets {
            let session = DeviceSession::new(
                peripheral,
                self.store.clone(),
                Arc::clone(&self.sink),
                self.config.session.clone(),
                self.shutdown.clone(),
            );
            handles.push(tokio::spawn(async move { session.run().await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Scan until at least one peripheral advertises the outlet service,
    /// deduplicated by device identifier. Returns an empty set only if
    /// shutdown is requested first.
    async fn discover(&self) -> Result<Vec<Arc<dyn BlePeripheral>>, TransportError> {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(Vec::new());
            }
            // A shutdown request landing mid-scan must not wait out the
            // full scan window.
            let scanned = tokio::select! {
                result = self.adapter.scan(self.config.scan_duration) => result,
                _ = self.shutdown.wait() => return Ok(Vec::new()),
            };
            match scanned {
                Ok(peripherals) => {
                    let mut seen = HashSet::new();
                    let mut matched: Vec<Arc<dyn BlePeripheral>> = Vec::new();
                    for peripheral in peripherals {
                        if !peripheral.services().await.contains(&OUTLET_SERVICE_UUID) {
                            continue;
                        }
                        if !seen.insert(peripheral.identifier()) {
                            continue;
                        }
                        log::info!(
                            "Found {} [{}]",
                            peripheral.identifier(),
                            peripheral.address()
                        );
                        matched.push(peripheral);
                    }
                    if !matched.is_empty() {
                        return Ok(matched);
                    }
                    log::warn!("No devices found, repeating scan");
                }
                Err(TransportError::NoAdapter) => return Err(TransportError::NoAdapter),
                Err(e) => log::warn!("Scan failed: {}", e),
            }
        }
    }
}
