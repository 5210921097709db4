// plugmon - BLE Smart Outlet Telemetry Bridge

pub mod ble;
pub mod config;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod sink;
pub mod supervisor;
pub mod telemetry;

pub use config::{SessionConfig, SupervisorConfig};
pub use shutdown::ShutdownSignal;
pub use supervisor::Supervisor;
pub use telemetry::{TelemetrySnapshot, TelemetryStore};
