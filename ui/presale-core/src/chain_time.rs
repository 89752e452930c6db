//! Chain-adjusted "now" for countdowns and unlock checks.
//!
//! Unlocks are decided by block timestamps, so the client clock is corrected by the offset
//! observed against the latest block and that offset is refreshed periodically.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::contract::PresaleContract;
use crate::error::Result;

#[derive(Clone, Copy, Debug)]
struct Offset {
    chain_id: u64,
    offset_ms: i64,
    synced_at_ms: u64,
}

pub struct ChainClock {
    clock: Arc<dyn Clock>,
    resync: Duration,
    offset: Mutex<Option<Offset>>,
}

impl ChainClock {
    pub fn new(clock: Arc<dyn Clock>, resync: Duration) -> Self {
        Self {
            clock,
            resync,
            offset: Mutex::new(None),
        }
    }

    /// Record that the latest block on `chain_id` carries `block_timestamp` (seconds).
    pub fn record(&self, chain_id: u64, block_timestamp: u64) {
        let now = self.clock.now_ms();
        let offset_ms = (block_timestamp as i64 * 1_000) - now as i64;
        debug!(chain_id, offset_ms, "chain clock synced");
        *self.offset.lock() = Some(Offset {
            chain_id,
            offset_ms,
            synced_at_ms: now,
        });
    }

    pub fn needs_sync(&self, chain_id: u64) -> bool {
        match *self.offset.lock() {
            Some(o) if o.chain_id == chain_id => {
                self.clock.now_ms().saturating_sub(o.synced_at_ms) >= self.resync.as_millis() as u64
            }
            _ => true,
        }
    }

    /// Chain time in seconds. Falls back to the client clock before the first sync.
    pub fn now_secs(&self) -> u64 {
        let offset = self.offset.lock().map(|o| o.offset_ms).unwrap_or_default();
        let now = self.clock.now_ms() as i64 + offset;
        (now.max(0) / 1_000) as u64
    }

    /// Resync against the latest block if the offset is missing, stale or from another
    /// chain, then return chain time.
    pub async fn sync(&self, contract: &dyn PresaleContract, chain_id: u64) -> Result<u64> {
        if self.needs_sync(chain_id) {
            let block = contract.latest_block().await?;
            self.record(chain_id, block.timestamp);
        }
        Ok(self.now_secs())
    }
}

/// Time left until a deadline, broken down for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Countdown {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl Countdown {
    /// `None` once `target` has been reached.
    pub fn until(now: u64, target: u64) -> Option<Self> {
        let left = target.checked_sub(now).filter(|left| *left > 0)?;
        Some(Self {
            days: left / 86_400,
            hours: left % 86_400 / 3_600,
            minutes: left % 3_600 / 60,
            seconds: left % 60,
        })
    }
}

impl std::fmt::Display for Countdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}d {:02}h {:02}m {:02}s",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}
