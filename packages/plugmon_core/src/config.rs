//! Timing configuration for sessions and the supervisor.

use std::time::Duration;

/// Configuration for one device session's poll cycle.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Delay between connect attempts.
    pub connect_retry_delay: Duration,
    /// Interval between `ONLINE_DATA` poll requests.
    pub poll_interval: Duration,
    /// How long a session polls before the cycle is restarted from
    /// discovery.
    pub cycle_budget: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_retry_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            cycle_budget: Duration::from_secs(30 * 60),
        }
    }
}

/// Configuration for the supervisor's discovery loop.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Duration of one scan round.
    pub scan_duration: Duration,
    /// Applied to every session the supervisor creates.
    pub session: SessionConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(5),
            session: SessionConfig::default(),
        }
    }
}
