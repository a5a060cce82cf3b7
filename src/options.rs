//! Timings and bridge-wide settings.
//!
//! Defaults match what the bulbs tolerate in practice. Everything can be
//! overridden from a JSON document, with durations given in milliseconds.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::errors::Error;

/// Retry budgets and intervals used by the client, the workers and the
/// discovery loop.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Discovery probes sent before listening.
    pub discovery_broadcasts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_broadcast_spacing: Duration,
    /// Total time spent listening for discovery replies.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_window: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_receive_timeout: Duration,
    /// Minimum time since the last probe before a quiet window re-probes.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_rebroadcast_after: Duration,

    pub config_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub config_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub config_retry_delay: Duration,

    pub read_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub read_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub read_retry_delay: Duration,

    pub write_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub write_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub write_retry_delay: Duration,

    /// Minimum spacing between any two datagrams sent to bulbs.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub send_spacing: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick: Duration,
    /// How long mesh leadership lasts without a new mesh command.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub leader_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub read_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub resend_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub save_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub state_lock_budget: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub store_lock_budget: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub mesh_check_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            discovery_broadcasts: 3,
            discovery_broadcast_spacing: Duration::from_millis(500),
            discovery_window: Duration::from_secs(10),
            discovery_receive_timeout: Duration::from_secs(1),
            discovery_rebroadcast_after: Duration::from_secs(3),

            config_attempts: 20,
            config_timeout: Duration::from_millis(150),
            config_retry_delay: Duration::from_millis(500),

            read_attempts: 2,
            read_timeout: Duration::from_millis(1500),
            read_retry_delay: Duration::from_millis(300),

            write_attempts: 5,
            write_timeout: Duration::from_secs(1),
            write_retry_delay: Duration::from_millis(50),

            send_spacing: Duration::from_millis(10),

            tick: Duration::from_millis(100),
            leader_timeout: Duration::from_secs(5),
            read_interval: Duration::from_secs(5),
            resend_interval: Duration::from_secs(10),
            save_interval: Duration::from_secs(2),
            state_lock_budget: Duration::from_millis(100),
            store_lock_budget: Duration::from_millis(50),

            mesh_check_interval: Duration::from_secs(60),
        }
    }
}

/// Settings for a whole bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Directory holding the registry and per-light settings files.
    pub store_dir: PathBuf,
    pub broadcast: Ipv4Addr,
    pub bulb_port: u16,
    /// Local port bulbs push `syncPilot` notifications to.
    pub push_port: u16,
    /// Mesh endpoint given to the light with the lowest MAC.
    pub first_endpoint: u8,
    /// Consecutive write failures after which bulbs are reported unhealthy.
    pub failure_threshold: u32,
    pub timings: Timings,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        BridgeOptions {
            store_dir: PathBuf::from("."),
            broadcast: Ipv4Addr::BROADCAST,
            bulb_port: 38899,
            push_port: 38900,
            first_endpoint: 10,
            failure_threshold: 10,
            timings: Timings::default(),
        }
    }
}

impl BridgeOptions {
    /// Load options from JSON, filling missing keys with defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use wiz_hue_bridge::BridgeOptions;
    ///
    /// let opts = BridgeOptions::from_json(r#"{"broadcast":"192.168.1.255","timings":{"tick":50}}"#).unwrap();
    /// assert_eq!(opts.timings.tick, Duration::from_millis(50));
    /// assert_eq!(opts.first_endpoint, 10);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(Error::JsonLoad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timings_round_trip_as_millis() {
        let timings = Timings::default();
        let value = serde_json::to_value(&timings).unwrap();
        assert_eq!(value["leader_timeout"], 5000);
        assert_eq!(value["send_spacing"], 10);
        let back: Timings = serde_json::from_value(value).unwrap();
        assert_eq!(back, timings);
    }

    #[test]
    fn test_empty_document_is_default() {
        let opts = BridgeOptions::from_json("{}").unwrap();
        assert_eq!(opts, BridgeOptions::default());
        assert_eq!(opts.timings.config_attempts, 20);
    }

    #[test]
    fn test_bad_document_is_an_error() {
        assert!(matches!(
            BridgeOptions::from_json(r#"{"bulb_port":"x"}"#),
            Err(Error::JsonLoad(_))
        ));
    }
}
