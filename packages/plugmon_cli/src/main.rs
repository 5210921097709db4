//! Runs the outlet bridge over the in-process simulated transport:
//! simulated outlets with drifting readings, the full discovery/session
//! supervisor, and a periodic JSON dump of the telemetry store in the
//! shape an HTTP `/online` endpoint would serve.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::sleep;

use plugmon::ble::simulated::{OutletReading, SimOutletNetwork};
use plugmon::sink::LogSink;
use plugmon::{SessionConfig, ShutdownSignal, Supervisor, SupervisorConfig, TelemetryStore};

#[derive(Parser)]
#[command(name = "plugmon", about = "BLE smart outlet telemetry bridge (simulated transport)")]
struct Cli {
    /// Number of simulated outlets.
    #[arg(long, default_value_t = 2)]
    outlets: usize,

    /// Seconds between telemetry polls.
    #[arg(long, default_value_t = 1)]
    poll_interval: u64,

    /// Seconds per discovery scan.
    #[arg(long, default_value_t = 5)]
    scan_duration: u64,

    /// Minutes of polling before a cycle restarts from discovery.
    #[arg(long, default_value_t = 30)]
    cycle_minutes: u64,

    /// Seconds between JSON dumps of the store (0 disables).
    #[arg(long, default_value_t = 10)]
    dump_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let shutdown = ShutdownSignal::new();

    // SIGINT/SIGTERM both trigger the shared shutdown signal; every
    // session observes it within one poll interval.
    {
        let shutdown = shutdown.clone();
        let mut term = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
            log::info!("Shutdown signal received");
            shutdown.trigger();
        });
    }

    let network = SimOutletNetwork::new();
    for i in 0..cli.outlets {
        let outlet = network.add_outlet(&format!("outlet-{i}")).await;
        let shutdown = shutdown.clone();
        // Drift the readings so successive polls show movement.
        tokio::spawn(async move {
            let mut tick: u64 = 0;
            loop {
                let phase = tick as f64 * 0.1;
                outlet
                    .set_reading(OutletReading {
                        voltage_millivolts: (230_000.0 + 1_500.0 * phase.sin()) as u32,
                        current_milliamps: (900.0 + 400.0 * (phase * 0.7).cos()) as u32,
                        power_milliwatts: (207_000.0 + 90_000.0 * (phase * 0.7).cos()) as u32,
                        frequency_decihertz: 500,
                        power_factor_centi: 98,
                        energy_watt_hours: (tick / 15) as u32,
                        on_time_seconds: (tick * 2) as u32,
                    })
                    .await;
                tick += 1;
                tokio::select! {
                    _ = sleep(Duration::from_secs(2)) => {}
                    _ = shutdown.wait() => break,
                }
            }
        });
    }

    let store = TelemetryStore::new();
    if cli.dump_interval > 0 {
        let store = store.clone();
        let shutdown = shutdown.clone();
        let interval = Duration::from_secs(cli.dump_interval);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = shutdown.wait() => break,
                }
                match serde_json::to_string_pretty(&store.export_json().await) {
                    Ok(json) => println!("{json}"),
                    Err(e) => log::warn!("Failed to serialize store: {e}"),
                }
            }
        });
    }

    let config = SupervisorConfig {
        scan_duration: Duration::from_secs(cli.scan_duration),
        session: SessionConfig {
            poll_interval: Duration::from_secs(cli.poll_interval),
            cycle_budget: Duration::from_secs(cli.cycle_minutes * 60),
            ..SessionConfig::default()
        },
    };
    let supervisor = Supervisor::new(
        network.adapter(),
        store,
        Arc::new(LogSink),
        config,
        shutdown,
    );
    supervisor.run().await?;
    Ok(())
}
