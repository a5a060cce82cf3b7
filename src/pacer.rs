//! Global spacing of datagrams sent to bulbs.

use std::sync::Mutex;
use std::time::Duration;

use crate::runtime::{self, Instant};

/// Enforces a minimum gap between any two datagrams sent to bulbs.
///
/// Every sender shares one pacer. Each call reserves the next free slot and
/// sleeps until it comes up, so concurrent senders go out in the order they
/// reserved.
#[derive(Debug)]
pub struct TransmitPacer {
    spacing: Duration,
    last: Mutex<Option<Instant>>,
}

impl TransmitPacer {
    pub fn new(spacing: Duration) -> Self {
        TransmitPacer {
            spacing,
            last: Mutex::new(None),
        }
    }

    /// Wait for this sender's turn to transmit.
    pub async fn pace(&self) {
        let wait = {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = match *last {
                Some(prev) => now.max(prev + self.spacing),
                None => now,
            };
            *last = Some(slot);
            slot.duration_since(now)
        };

        if !wait.is_zero() {
            runtime::sleep(wait).await;
        }
    }
}
