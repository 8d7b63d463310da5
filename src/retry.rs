//! Exponential backoff

use rand::Rng;
use std::{thread, time::Duration};
use tracing::debug;

/// Backoff schedule: doubling from `base`, capped at `max` plus up to
/// one second of jitter, for at most `attempts` tries
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            attempts: 10,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..1000);
        self.delay(attempt) + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds or the attempts run out, sleeping the
    /// calling thread between tries.  Returns the last error.
    pub fn retry<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 >= self.attempts => return Err(e),
                Err(e) => {
                    let wait = self.jittered(attempt);
                    debug!("attempt {} failed ({}), retrying in {:?}", attempt + 1, e, wait);
                    thread::sleep(wait);
                    attempt += 1;
                }
            }
        }
    }
}
