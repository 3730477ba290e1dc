//! Background retention sweep for dead refresh token rows.
//!
//! Rotation and revocation only ever mark rows; this task deletes rows that
//! have been expired or revoked for longer than the grace period. Pure
//! storage hygiene: correctness never depends on the sweep running.

use super::storage;
use rand::Rng;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct SweeperConfig {
    interval: Duration,
    grace_days: i64,
}

impl SweeperConfig {
    /// Default sweep: hourly, keeping dead rows for 30 days of audit trail.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            grace_days: 30,
        }
    }

    #[must_use]
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_grace_days(mut self, days: i64) -> Self {
        self.grace_days = days;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let interval = if self.interval < Duration::from_secs(60) {
            Duration::from_secs(60)
        } else {
            self.interval
        };
        let grace_days = self.grace_days.max(1);
        Self {
            interval,
            grace_days,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn grace_days(&self) -> i64 {
        self.grace_days
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the background sweep task.
///
/// Failures are logged and the loop keeps going; an unavailable store at
/// sweep time costs nothing but disk.
pub fn spawn_retention_sweeper(pool: PgPool, config: SweeperConfig) {
    let config = config.normalize();
    tokio::spawn(async move {
        info!(
            interval_seconds = config.interval().as_secs(),
            grace_days = config.grace_days(),
            "retention sweeper started"
        );
        loop {
            // Jitter so horizontally-scaled instances don't sweep in lockstep.
            let jitter = rand::thread_rng().gen_range(Duration::ZERO..config.interval() / 10);
            sleep(config.interval() + jitter).await;

            match storage::delete_expired_rows(&pool, config.grace_days()).await {
                Ok(0) => debug!("retention sweep found nothing to prune"),
                Ok(count) => info!(count, "pruned dead refresh token rows"),
                Err(err) => warn!("retention sweep failed: {err}"),
            }
        }
    });
}
