// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Truncated exponential backoff with jitter.

use crate::backoff_policy::BackoffPolicy;
use crate::retry_state::RetryState;
use std::time::Duration;

/// The error type for exponential backoff creation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("the multiplier ({0}) should be >= 1.0")]
    InvalidMultiplier(f64),
    #[error("the initial backoff ({0:?}) should be greater than zero")]
    InvalidInitialBackoff(Duration),
    #[error(
        "the maximum backoff ({maximum:?}) should be greater than or equal to the initial backoff ({initial:?})"
    )]
    EmptyRange {
        maximum: Duration,
        initial: Duration,
    },
}

/// Builds [ExponentialBackoff] instances.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffBuilder {
    initial_backoff: Duration,
    maximum_backoff: Duration,
    multiplier: f64,
}

impl ExponentialBackoffBuilder {
    /// Creates a builder with the default parameters.
    ///
    /// # Example
    /// ```
    /// # use cosmos_consistency::exponential_backoff::*;
    /// use std::time::Duration;
    /// let backoff = ExponentialBackoffBuilder::new()
    ///     .with_initial_backoff(Duration::from_millis(100))
    ///     .with_maximum_backoff(Duration::from_secs(5))
    ///     .with_multiplier(4.0)
    ///     .build()?;
    /// # Ok::<(), Error>(())
    /// ```
    pub fn new() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            maximum_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    pub fn with_initial_backoff<V: Into<Duration>>(mut self, v: V) -> Self {
        self.initial_backoff = v.into();
        self
    }

    pub fn with_maximum_backoff<V: Into<Duration>>(mut self, v: V) -> Self {
        self.maximum_backoff = v.into();
        self
    }

    pub fn with_multiplier<V: Into<f64>>(mut self, v: V) -> Self {
        self.multiplier = v.into();
        self
    }

    /// Creates the policy, rejecting invalid parameters.
    pub fn build(self) -> Result<ExponentialBackoff, Error> {
        if self.multiplier < 1.0 {
            return Err(Error::InvalidMultiplier(self.multiplier));
        }
        if self.initial_backoff.is_zero() {
            return Err(Error::InvalidInitialBackoff(self.initial_backoff));
        }
        if self.maximum_backoff < self.initial_backoff {
            return Err(Error::EmptyRange {
                maximum: self.maximum_backoff,
                initial: self.initial_backoff,
            });
        }
        Ok(ExponentialBackoff {
            initial_backoff: self.initial_backoff,
            maximum_backoff: self.maximum_backoff,
            multiplier: self.multiplier,
        })
    }

    /// Creates the policy, clamping the parameters to usable ranges.
    ///
    /// The maximum backoff is clamped to `[10ms, 1h]`, then the initial
    /// backoff to `[1ms, maximum]`, and the multiplier to `[1.0, 32.0]`.
    pub fn clamp(self) -> ExponentialBackoff {
        let multiplier = if self.multiplier.is_nan() {
            1.0
        } else {
            self.multiplier.clamp(1.0, 32.0)
        };
        let maximum_backoff = self
            .maximum_backoff
            .clamp(Duration::from_millis(10), Duration::from_secs(60 * 60));
        let initial_backoff = self
            .initial_backoff
            .clamp(Duration::from_millis(1), maximum_backoff);
        ExponentialBackoff {
            initial_backoff,
            maximum_backoff,
            multiplier,
        }
    }
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncated exponential backoff with jitter.
///
/// The n-th failure computes `initial * multiplier^(n-1)`, capped at the
/// maximum backoff. The returned delay is uniformly distributed between half
/// that value and the full value, so concurrent clients spread their retries
/// without ever retrying immediately.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial_backoff: Duration,
    maximum_backoff: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    /// The upper bound of the delay after `attempt_count` failures.
    pub fn delay(&self, attempt_count: u32) -> Duration {
        let exp = std::cmp::min(i32::MAX as u32, attempt_count) as i32;
        let exp = exp.saturating_sub(1);
        let scaling = self.multiplier.powi(exp);
        if scaling >= self.maximum_backoff.div_duration_f64(self.initial_backoff) {
            self.maximum_backoff
        } else {
            // Cannot overflow: scaling >= 1.0 and initial * scaling < maximum.
            self.initial_backoff.mul_f64(scaling)
        }
    }

    fn delay_with_jitter(&self, attempt_count: u32, rng: &mut impl rand::Rng) -> Duration {
        let delay = self.delay(attempt_count);
        let floor = delay / 2;
        rng.random_range(floor..=delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoffBuilder::new().clamp()
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn on_failure(&self, state: &RetryState) -> Duration {
        self.delay_with_jitter(state.attempt_count, &mut rand::rng())
    }
}
