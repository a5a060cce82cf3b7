//! Health signals for an external supervisor.
//!
//! Nothing here restarts anything. The bridge counts failed bulb writes and
//! watches mesh connectivity, and whoever runs the process decides what to
//! do when either goes bad.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use crate::mesh::MeshStack;
use crate::runtime::{self, Instant, JoinHandle};

/// Shared failure counter and connectivity flag.
#[derive(Debug)]
pub struct Health {
    write_failures: AtomicU32,
    threshold: u32,
    mesh_connected: AtomicBool,
}

/// A snapshot of [`Health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub bulbs_healthy: bool,
    pub mesh_healthy: bool,
    pub write_failures: u32,
}

impl Health {
    pub fn new(threshold: u32) -> Self {
        Health {
            write_failures: AtomicU32::new(0),
            threshold,
            mesh_connected: AtomicBool::new(true),
        }
    }

    pub fn record_write_success(&self) {
        self.write_failures.store(0, Ordering::SeqCst);
    }

    /// Count a failed write, returning the new count.
    pub fn record_write_failure(&self) -> u32 {
        let failures = self.write_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures == self.threshold {
            warn!("{failures} consecutive bulb writes failed, bulbs unhealthy");
        }
        failures
    }

    pub fn write_failures(&self) -> u32 {
        self.write_failures.load(Ordering::SeqCst)
    }

    /// True while fewer consecutive writes than the threshold have failed.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::Health;
    ///
    /// let health = Health::new(2);
    /// health.record_write_failure();
    /// assert!(health.bulbs_healthy());
    /// health.record_write_failure();
    /// assert!(!health.bulbs_healthy());
    /// health.record_write_success();
    /// assert!(health.bulbs_healthy());
    /// ```
    pub fn bulbs_healthy(&self) -> bool {
        self.write_failures() < self.threshold
    }

    pub fn set_mesh_connected(&self, connected: bool) {
        self.mesh_connected.store(connected, Ordering::SeqCst);
    }

    pub fn mesh_healthy(&self) -> bool {
        self.mesh_connected.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            bulbs_healthy: self.bulbs_healthy(),
            mesh_healthy: self.mesh_healthy(),
            write_failures: self.write_failures(),
        }
    }
}

/// Periodically copies the mesh stack's connectivity into [`Health`].
pub struct HealthMonitor {
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Start checking every `interval`.
    ///
    /// The task wakes every `tick` so [`HealthMonitor::stop`] never waits a
    /// whole interval.
    pub fn start(
        mesh: Arc<dyn MeshStack>,
        health: Arc<Health>,
        interval: Duration,
        tick: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let task = runtime::spawn(async move {
            let mut last_check: Option<Instant> = None;
            while flag.load(Ordering::SeqCst) {
                let due = last_check.is_none_or(|t| t.elapsed() >= interval);
                if due {
                    let connected = mesh.is_connected();
                    if connected != health.mesh_healthy() {
                        if connected {
                            info!("Mesh connection restored");
                        } else {
                            warn!("Mesh connection lost, restart required");
                        }
                    }
                    health.set_mesh_connected(connected);
                    last_check = Some(Instant::now());
                }
                runtime::sleep(tick).await;
            }
        });

        HealthMonitor {
            running,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the monitor and wait for its task to finish.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.await;
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::fake::FakeMesh;

    #[test]
    fn test_threshold_and_reset() {
        let health = Health::new(10);
        for _ in 0..9 {
            health.record_write_failure();
        }
        assert!(health.bulbs_healthy());
        assert_eq!(health.record_write_failure(), 10);
        assert!(!health.bulbs_healthy());
        health.record_write_success();
        assert_eq!(health.report().write_failures, 0);
        assert!(health.report().bulbs_healthy);
    }

    #[tokio::test]
    async fn test_monitor_follows_mesh_connectivity() {
        let mesh = Arc::new(FakeMesh::default());
        let health = Arc::new(Health::new(10));
        let mut monitor = HealthMonitor::start(
            mesh.clone(),
            Arc::clone(&health),
            Duration::from_millis(20),
            Duration::from_millis(5),
        );

        runtime::sleep(Duration::from_millis(60)).await;
        assert!(!health.mesh_healthy());

        mesh.set_connected(true);
        runtime::sleep(Duration::from_millis(60)).await;
        assert!(health.mesh_healthy());

        monitor.stop().await;
        assert!(!monitor.is_running());
    }
}
