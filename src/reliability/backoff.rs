use rand::Rng;
use std::time::Duration;
use thiserror::Error;

/// Default retry schedule, in seconds. Attempts past the end reuse the last
/// entry.
pub const DEFAULT_BACKOFF_SCHEDULE_SECS: [u64; 6] = [2, 6, 12, 20, 40, 80];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackoffError {
    #[error("Backoff schedule must not be empty")]
    EmptySchedule,
    #[error("Backoff schedule entry {index} is zero")]
    ZeroDelay { index: usize },
    #[error("Backoff schedule must be non-decreasing (entry {index} is smaller than its predecessor)")]
    Decreasing { index: usize },
}

/// Randomized retry delay drawn from a fixed, increasing schedule.
///
/// `delay(attempt)` is `schedule[attempt] * U(0, 1]`, so concurrent clients
/// retrying the same outage spread out instead of arriving together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    schedule: Vec<Duration>,
}

impl BackoffPolicy {
    pub fn new(schedule: Vec<Duration>) -> Result<Self, BackoffError> {
        if schedule.is_empty() {
            return Err(BackoffError::EmptySchedule);
        }
        for (index, delay) in schedule.iter().enumerate() {
            if delay.is_zero() {
                return Err(BackoffError::ZeroDelay { index });
            }
            if index > 0 && *delay < schedule[index - 1] {
                return Err(BackoffError::Decreasing { index });
            }
        }
        Ok(Self { schedule })
    }

    pub fn from_secs(schedule: &[u64]) -> Result<Self, BackoffError> {
        Self::new(schedule.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn from_millis(schedule: &[u64]) -> Result<Self, BackoffError> {
        Self::new(schedule.iter().copied().map(Duration::from_millis).collect())
    }

    /// Deterministic ceiling for the given zero-based attempt.
    pub fn upper_bound(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.schedule.len() - 1);
        self.schedule[index]
    }

    /// Randomized delay in `(0, upper_bound(attempt)]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::rng();
        // 1 - [0, 1) keeps the factor strictly positive
        let factor = 1.0 - rng.random::<f64>();
        self.upper_bound(attempt)
            .mul_f64(factor)
            .max(Duration::from_nanos(1))
    }

    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_BACKOFF_SCHEDULE_SECS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}
