//! Publishing seam for decoded telemetry
//!
//! Sessions hand every accepted snapshot to a `TelemetrySink`; the MQTT
//! discovery client and the HTTP endpoint live behind this trait, outside
//! this crate. Sink failures are logged by the caller and never interrupt
//! polling.

use async_trait::async_trait;
use thiserror::Error;

use crate::telemetry::TelemetrySnapshot;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Publish error: {0}")]
    Publish(String),
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, device: &str, snapshot: &TelemetrySnapshot) -> Result<(), SinkError>;
}

/// Sink that discards everything. Useful when only the store is consumed.
pub struct NoOpSink;

#[async_trait]
impl TelemetrySink for NoOpSink {
    async fn publish(&self, _device: &str, _snapshot: &TelemetrySnapshot) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that emits one structured log line per accepted snapshot.
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn publish(&self, device: &str, snapshot: &TelemetrySnapshot) -> Result<(), SinkError> {
        log::info!(
            "{}: {:.1} V {:.3} A {:.1} W {:.1} Hz pf {:.2} {:.3} kWh on {} s",
            device,
            snapshot.voltage,
            snapshot.current,
            snapshot.power,
            snapshot.frequency,
            snapshot.power_factor,
            snapshot.accumulated_energy,
            snapshot.on_time,
        );
        Ok(())
    }
}
