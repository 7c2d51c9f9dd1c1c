//! Driver configuration.
use std::time::Duration;

use serde::Deserialize;

use crate::actor::HostSpec;

/// Configuration of one benchmark run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Hosts that run load workers. `"localhost"` means the coordinator
    /// host; anything else must be an IP address. Workers are placed
    /// round-robin across this list.
    pub load_driver_hosts: Vec<String>,

    /// Challenge to execute; the track's default challenge when unset.
    pub challenge: Option<String>,

    /// Shortens all coordination delays for fast functional runs: no
    /// inter-step handoff delay and a sub-second worker wakeup interval.
    pub test_mode: bool,

    /// Suppresses the periodic progress line.
    pub quiet: bool,

    /// Delay between a completed step and the synchronized start of the
    /// next one. Must dominate the one-way worker-to-coordinator message
    /// latency for the skew compensation to hold.
    #[serde(with = "humantime_string")]
    pub step_handoff_delay: Duration,

    /// How often a busy worker wakes up to ship samples.
    #[serde(with = "humantime_string")]
    pub wakeup_interval: Duration,

    /// Worker wakeup interval in test mode.
    #[serde(with = "humantime_string")]
    pub test_wakeup_interval: Duration,

    /// How often the coordinator reports progress.
    #[serde(with = "humantime_string")]
    pub progress_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            load_driver_hosts: vec!["localhost".to_string()],
            challenge: None,
            test_mode: false,
            quiet: false,
            step_handoff_delay: Duration::from_secs(5),
            wakeup_interval: Duration::from_secs(5),
            test_wakeup_interval: Duration::from_millis(500),
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl DriverConfig {
    /// The effective inter-step delay: zero in test mode.
    pub fn handoff_delay(&self) -> Duration {
        if self.test_mode { Duration::ZERO } else { self.step_handoff_delay }
    }

    /// The effective worker wakeup interval.
    pub fn worker_wakeup(&self) -> Duration {
        if self.test_mode { self.test_wakeup_interval } else { self.wakeup_interval }
    }

    /// Parses the configured hosts into placement capabilities.
    pub fn hosts(&self) -> anyhow::Result<Vec<HostSpec>> {
        self.load_driver_hosts.iter().map(|h| HostSpec::parse(h)).collect()
    }
}

mod humantime_string {
    use super::*;
    use serde::Deserializer;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
