//! Interruptible delays for the dispatch work loops
//!
//! Inter-send delays can run to minutes, but a stop request must be honored
//! within a couple of seconds. The sleep here is sliced so the cancellation
//! signal is re-checked at roughly one-second granularity instead of a
//! single uninterruptible sleep of the full duration.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Granularity at which a sleeping loop re-checks its cancellation signal
const SLICE: Duration = Duration::from_secs(1);

/// Sleep for `duration`, waking early if the cancellation signal fires.
///
/// Returns `true` if the full duration elapsed, `false` if the sleep was
/// interrupted by cancellation.
pub async fn sleep_cancellable(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return false;
    }

    let mut remaining = duration;
    while !remaining.is_zero() {
        let slice = remaining.min(SLICE);
        tokio::select! {
            _ = tokio::time::sleep(slice) => {
                remaining = remaining.saturating_sub(slice);
            }
            changed = cancel.changed() => {
                // A closed channel counts as cancellation: the job owner
                // is gone and the loop must not keep sleeping.
                if changed.is_err() || *cancel.borrow() {
                    return false;
                }
            }
        }
    }
    true
}

/// Randomized inter-send delay policy
///
/// Draws a uniform duration in `[min, max]` for each pause between sends.
#[derive(Debug)]
pub struct DelayPolicy {
    min_secs: u64,
    max_secs: u64,
    rng: Mutex<ChaCha8Rng>,
}

impl DelayPolicy {
    /// Create a policy with an entropy-seeded generator
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self::seeded(min_secs, max_secs, rand::thread_rng().gen())
    }

    /// Create a policy with a fixed seed (deterministic, for tests)
    pub fn seeded(min_secs: u64, max_secs: u64, seed: u64) -> Self {
        let (lo, hi) = if min_secs <= max_secs {
            (min_secs, max_secs)
        } else {
            (max_secs, min_secs)
        };
        Self {
            min_secs: lo,
            max_secs: hi,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Draw the next inter-send pause
    pub fn next_delay(&self) -> Duration {
        if self.max_secs == 0 {
            return Duration::ZERO;
        }
        let secs = self
            .rng
            .lock()
            .unwrap()
            .gen_range(self.min_secs..=self.max_secs);
        Duration::from_secs(secs)
    }
}
