//! Advisory key pool throttling.
//!
//! Every QKD handshake drains keys from a pool shared with everyone else
//! using the same KMEs. The sweep periodically looks at the master KME's
//! pool and pauses when it runs low. Nothing is locked or reserved: a failed
//! status query is logged and the sweep carries on.

use std::time::Duration;

use async_trait::async_trait;
use etsi014::{KeyStatus, KmeClient};
use tracing::{debug, info, warn};

/// Source of key pool levels.
#[async_trait]
pub trait KeyPoolMonitor: Send + Sync {
    async fn key_status(&self) -> etsi014::Result<KeyStatus>;
}

/// Queries `status` on the master KME for the slave SAE.
pub struct MasterKmeMonitor {
    client: KmeClient,
    slave_sae: String,
}

impl MasterKmeMonitor {
    pub fn new(client: KmeClient, slave_sae: impl Into<String>) -> Self {
        Self {
            client,
            slave_sae: slave_sae.into(),
        }
    }
}

#[async_trait]
impl KeyPoolMonitor for MasterKmeMonitor {
    async fn key_status(&self) -> etsi014::Result<KeyStatus> {
        self.client.get_status(&self.slave_sae).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPoolCheck {
    /// At or above the threshold.
    Healthy { stored: u64 },
    /// Below the threshold; the replenishment delay was waited out.
    Replenished { stored: u64 },
    /// The status query failed; no delay was applied.
    Unavailable,
}

pub struct Backpressure {
    monitor: Box<dyn KeyPoolMonitor>,
    every: u64,
    threshold: u64,
    delay: Duration,
    counter: u64,
}

impl Backpressure {
    /// Check the pool once every `every` iterations (0 disables periodic
    /// checks) and wait `delay` whenever fewer than `threshold` keys remain.
    pub fn new(
        monitor: Box<dyn KeyPoolMonitor>,
        every: u64,
        threshold: u64,
        delay: Duration,
    ) -> Self {
        Self {
            monitor,
            every,
            threshold,
            delay,
            counter: 0,
        }
    }

    pub fn iterations(&self) -> u64 {
        self.counter
    }

    /// Query the pool now, sleeping through the replenishment delay if it
    /// is below the threshold.
    pub async fn check_key_status(&self) -> KeyPoolCheck {
        let status = match self.monitor.key_status().await {
            Ok(s) => s,
            Err(e) => {
                warn!("key pool status unavailable, continuing: {e}");
                return KeyPoolCheck::Unavailable;
            }
        };

        let stored = status.stored_key_count;
        if stored >= self.threshold {
            debug!(stored, max = status.max_key_count, "key pool healthy");
            return KeyPoolCheck::Healthy { stored };
        }

        info!(
            stored,
            threshold = self.threshold,
            "key pool low, waiting {:?} for replenishment",
            self.delay
        );
        tokio::time::sleep(self.delay).await;
        KeyPoolCheck::Replenished { stored }
    }

    /// Count one completed iteration, running a check on every `every`th.
    pub async fn tick(&mut self) -> Option<KeyPoolCheck> {
        self.counter += 1;
        if self.every == 0 || self.counter % self.every != 0 {
            return None;
        }
        Some(self.check_key_status().await)
    }
}
