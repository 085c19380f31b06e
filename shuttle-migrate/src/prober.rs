//! Readiness polling for a freshly launched remote task.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use shuttle_core::config::ProbeConfig;

/// Pause between attempts. Swapped out in tests so no real time passes.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Readiness {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl Readiness {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts } | Self::TimedOut { attempts } => *attempts,
        }
    }
}

#[derive(Clone)]
pub struct ReadinessProber {
    max_attempts: u32,
    interval: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for ReadinessProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessProber")
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ReadinessProber {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_secs(config.interval_secs))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Call `check` until it succeeds or the attempt budget runs out. Any
    /// error counts as "not ready yet". No sleep follows the final attempt.
    pub fn wait_until_ready<T, E, F>(&self, mut check: F) -> Readiness
    where
        F: FnMut() -> Result<T, E>,
        E: Display,
    {
        for attempt in 1..=self.max_attempts {
            match check() {
                Ok(_) => {
                    tracing::info!(attempt, "node ready");
                    return Readiness::Ready { attempts: attempt };
                }
                Err(err) => {
                    tracing::debug!(attempt, max = self.max_attempts, error = %err, "node not ready");
                }
            }
            if attempt < self.max_attempts {
                self.sleeper.sleep(self.interval);
            }
        }
        tracing::warn!(attempts = self.max_attempts, "node never became ready");
        Readiness::TimedOut {
            attempts: self.max_attempts,
        }
    }
}
