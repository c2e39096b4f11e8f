//! Idle strategies for polling loops.
//!
//! Every spin point (connectivity waits, backpressure retries, response
//! waits and the agent duty cycle) reports how much work its last attempt
//! did. Zero means back off further; anything else resets the backoff.
//!
//! [`BackoffIdleStrategy`] escalates through three phases:
//! spin (`std::hint::spin_loop`) → yield (`tokio::task::yield_now`) →
//! park (`tokio::time::sleep`, doubling from `min_park` up to `max_park`).

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of busy spins before yielding.
pub const DEFAULT_MAX_SPINS: u32 = 10;

/// Default number of yields before parking.
pub const DEFAULT_MAX_YIELDS: u32 = 5;

/// Default initial park duration.
pub const DEFAULT_MIN_PARK: Duration = Duration::from_micros(1);

/// Default park ceiling.
pub const DEFAULT_MAX_PARK: Duration = Duration::from_millis(1);

/// Policy invoked between unproductive polling attempts.
pub trait IdleStrategy: Send {
    /// Idle according to the amount of work done in the last attempt.
    fn idle(&mut self, work_count: usize) -> impl Future<Output = ()> + Send;

    /// Reset backoff after the caller finished a wait.
    fn reset(&mut self);
}

/// Tunables for [`BackoffIdleStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub max_spins: u32,
    pub max_yields: u32,
    /// Initial park, in microseconds.
    #[serde(rename = "min_park_us", with = "micros")]
    pub min_park: Duration,
    /// Park ceiling, in microseconds.
    #[serde(rename = "max_park_us", with = "micros")]
    pub max_park: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            max_spins: DEFAULT_MAX_SPINS,
            max_yields: DEFAULT_MAX_YIELDS,
            min_park: DEFAULT_MIN_PARK,
            max_park: DEFAULT_MAX_PARK,
        }
    }
}

mod micros {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotIdle,
    Spinning,
    Yielding,
    Parking,
}

/// Spin, then yield, then park with exponential backoff.
#[derive(Debug, Clone)]
pub struct BackoffIdleStrategy {
    config: IdleConfig,
    phase: Phase,
    spins: u32,
    yields: u32,
    park: Duration,
}

impl BackoffIdleStrategy {
    /// Create a strategy with default tunables.
    pub fn new() -> Self {
        Self::with_config(IdleConfig::default())
    }

    /// Create a strategy from explicit tunables.
    pub fn with_config(config: IdleConfig) -> Self {
        let max_park = config.max_park.max(config.min_park);
        Self {
            config: IdleConfig { max_park, ..config },
            phase: Phase::NotIdle,
            spins: 0,
            yields: 0,
            park: config.min_park,
        }
    }

    /// Duration the next park would sleep for.
    pub fn current_park(&self) -> Duration {
        self.park
    }
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleStrategy for BackoffIdleStrategy {
    async fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        match self.phase {
            Phase::NotIdle => {
                self.phase = Phase::Spinning;
                self.spins += 1;
                std::hint::spin_loop();
            }
            Phase::Spinning => {
                std::hint::spin_loop();
                self.spins += 1;
                if self.spins > self.config.max_spins {
                    self.phase = Phase::Yielding;
                    self.yields = 0;
                }
            }
            Phase::Yielding => {
                self.yields += 1;
                if self.yields > self.config.max_yields {
                    self.phase = Phase::Parking;
                    self.park = self.config.min_park;
                } else {
                    tokio::task::yield_now().await;
                }
            }
            Phase::Parking => {
                tokio::time::sleep(self.park).await;
                self.park = (self.park * 2).min(self.config.max_park);
            }
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::NotIdle;
        self.spins = 0;
        self.yields = 0;
        self.park = self.config.min_park;
    }
}

/// Fixed sleep whenever no work was done.
#[derive(Debug, Clone, Copy)]
pub struct SleepingIdleStrategy {
    period: Duration,
}

impl SleepingIdleStrategy {
    /// Sleep for `period` after every idle cycle.
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl IdleStrategy for SleepingIdleStrategy {
    async fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            tokio::time::sleep(self.period).await;
        }
    }

    fn reset(&mut self) {}
}
