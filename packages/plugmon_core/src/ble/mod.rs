//! BLE transport seam for the outlet bridge
//!
//! Provides the abstraction traits a host BLE stack implements, the fixed
//! GATT identifiers for the outlet service, and a simulated transport for
//! testing without radio hardware.

pub mod simulated;
pub mod transport;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("Scan error: {0}")]
    ScanError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Peripheral is not connected")]
    NotConnected,

    #[error("Write error: {0}")]
    WriteError(String),

    #[error("Subscribe error: {0}")]
    SubscribeError(String),
}
