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

//! Configuration value objects.
//!
//! The options are plain data, they can be built in code with the `with_*`
//! setters or deserialized from any format supported by `serde`. Durations are
//! (de)serialized as integer milliseconds.

use crate::constants::MAX_OPERATIONS_IN_BATCH;
use crate::exponential_backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use crate::retry_policy_chain::PolicyLayer;
use serde_with::{DurationMilliSeconds, serde_as};
use std::time::Duration;

/// The error returned when validating options.
#[derive(thiserror::Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum OptionsError {
    #[error("the maximum micro-batch size must be at least 1, got {0}")]
    InvalidMicroBatchSize(usize),
    #[error("the targeted retry rates must satisfy 0 <= min ({min}) <= max ({max}) <= 1")]
    InvalidRetryRateRange { min: f64, max: f64 },
    #[error("the maximum number of attempts must be at least 1")]
    InvalidMaxAttempts,
}

/// Limits and backoff parameters for the retry loop of one logical request.
#[serde_as]
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct RetryOptions {
    /// The maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// The maximum time spent in the retry loop, including backoff.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_elapsed: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_backoff: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub maximum_backoff: Duration,

    pub backoff_multiplier: f64,
}

impl RetryOptions {
    pub fn with_max_attempts(mut self, v: u32) -> Self {
        self.max_attempts = v;
        self
    }

    pub fn with_max_elapsed<V: Into<Duration>>(mut self, v: V) -> Self {
        self.max_elapsed = v.into();
        self
    }

    pub fn with_initial_backoff<V: Into<Duration>>(mut self, v: V) -> Self {
        self.initial_backoff = v.into();
        self
    }

    pub fn with_maximum_backoff<V: Into<Duration>>(mut self, v: V) -> Self {
        self.maximum_backoff = v.into();
        self
    }

    pub fn with_backoff_multiplier(mut self, v: f64) -> Self {
        self.backoff_multiplier = v;
        self
    }

    /// The backoff policy described by these options.
    ///
    /// Out of range parameters are clamped rather than rejected.
    pub fn backoff_policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_backoff(self.initial_backoff)
            .with_maximum_backoff(self.maximum_backoff)
            .with_multiplier(self.backoff_multiplier)
            .clamp()
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.max_attempts == 0 {
            return Err(OptionsError::InvalidMaxAttempts);
        }
        Ok(())
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 9,
            max_elapsed: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(100),
            maximum_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// Options for the [RequestExecutor][crate::executor::RequestExecutor].
#[serde_as]
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct ExecutionOptions {
    pub retry: RetryOptions,

    /// Backoffs longer than this run the alternate callback, if any.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_backoff_for_alternate: Duration,

    /// The recovery layers wrapped around the backoff policy, innermost first.
    pub layers: Vec<PolicyLayer>,
}

impl ExecutionOptions {
    pub fn with_retry(mut self, v: RetryOptions) -> Self {
        self.retry = v;
        self
    }

    pub fn with_min_backoff_for_alternate<V: Into<Duration>>(mut self, v: V) -> Self {
        self.min_backoff_for_alternate = v.into();
        self
    }

    pub fn with_layers<I>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = PolicyLayer>,
    {
        self.layers = v.into_iter().collect();
        self
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            retry: RetryOptions::default(),
            min_backoff_for_alternate: Duration::from_secs(1),
            layers: vec![PolicyLayer::RenameAware],
        }
    }
}

/// Options for the [BulkExecutor][crate::bulk::BulkExecutor].
#[serde_as]
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct BulkExecutionOptions {
    /// The largest micro-batch sent to a single partition key range.
    ///
    /// Values above the service limit are capped at that limit.
    pub max_micro_batch_size: usize,

    /// Below this retry rate the micro-batch size grows.
    pub min_targeted_retry_rate: f64,

    /// Above this retry rate the micro-batch size shrinks.
    pub max_targeted_retry_rate: f64,

    /// How many times a throttled operation is re-enqueued.
    pub max_operation_retries: u32,

    /// The maximum cumulative wait for one throttled operation.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_throttle_wait: Duration,
}

impl BulkExecutionOptions {
    pub fn with_max_micro_batch_size(mut self, v: usize) -> Self {
        self.max_micro_batch_size = v;
        self
    }

    pub fn with_targeted_retry_rates(mut self, min: f64, max: f64) -> Self {
        self.min_targeted_retry_rate = min;
        self.max_targeted_retry_rate = max;
        self
    }

    pub fn with_max_operation_retries(mut self, v: u32) -> Self {
        self.max_operation_retries = v;
        self
    }

    pub fn with_max_throttle_wait<V: Into<Duration>>(mut self, v: V) -> Self {
        self.max_throttle_wait = v.into();
        self
    }

    /// The initial micro-batch size, and the upper bound for adjustments.
    pub fn effective_max_micro_batch_size(&self) -> usize {
        self.max_micro_batch_size.min(MAX_OPERATIONS_IN_BATCH)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.max_micro_batch_size == 0 {
            return Err(OptionsError::InvalidMicroBatchSize(
                self.max_micro_batch_size,
            ));
        }
        let (min, max) = (self.min_targeted_retry_rate, self.max_targeted_retry_rate);
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
            return Err(OptionsError::InvalidRetryRateRange { min, max });
        }
        Ok(())
    }
}

impl Default for BulkExecutionOptions {
    fn default() -> Self {
        Self {
            max_micro_batch_size: MAX_OPERATIONS_IN_BATCH,
            min_targeted_retry_rate: 0.1,
            max_targeted_retry_rate: 0.2,
            max_operation_retries: 9,
            max_throttle_wait: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff_policy::BackoffPolicy;
    use crate::retry_state::RetryState;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn retry_defaults() {
        let options = RetryOptions::default();
        assert_eq!(options.max_attempts, 9);
        assert_eq!(options.max_elapsed, Duration::from_secs(30));
        assert!(options.validate().is_ok(), "{options:?}");
        let options = options.with_max_attempts(0);
        assert_eq!(options.validate(), Err(OptionsError::InvalidMaxAttempts));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backoff_policy() {
        let options = RetryOptions::default()
            .with_initial_backoff(Duration::from_millis(10))
            .with_maximum_backoff(Duration::from_millis(40))
            .with_backoff_multiplier(2.0);
        let backoff = options.backoff_policy();
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(10), Duration::from_millis(40));
        let got = backoff.on_failure(&RetryState::new(true).set_attempt_count(10_u32));
        assert!(got <= Duration::from_millis(40), "{got:?}");
    }

    #[test]
    fn retry_serde() -> anyhow::Result<()> {
        let options: RetryOptions = serde_json::from_value(json!({
            "maxAttempts": 3,
            "maxElapsed": 1500,
        }))?;
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.max_elapsed, Duration::from_millis(1500));
        assert_eq!(options.initial_backoff, RetryOptions::default().initial_backoff);

        let value = serde_json::to_value(&options)?;
        assert_eq!(value["maxElapsed"], json!(1500));
        Ok(())
    }

    #[test]
    fn execution_serde() -> anyhow::Result<()> {
        let options = ExecutionOptions::default()
            .with_min_backoff_for_alternate(Duration::from_millis(250))
            .with_layers([PolicyLayer::ClearSessionOnNotFound, PolicyLayer::RenameAware]);
        let value = serde_json::to_value(&options)?;
        assert_eq!(value["minBackoffForAlternate"], json!(250));
        let got: ExecutionOptions = serde_json::from_value(value)?;
        assert_eq!(got, options);
        Ok(())
    }

    #[test]
    fn execution_defaults() {
        let options = ExecutionOptions::default();
        assert_eq!(options.layers, vec![PolicyLayer::RenameAware]);
        assert_eq!(options.min_backoff_for_alternate, Duration::from_secs(1));
    }

    #[test]
    fn bulk_defaults() {
        let options = BulkExecutionOptions::default();
        assert_eq!(options.max_micro_batch_size, 100);
        assert_eq!(options.effective_max_micro_batch_size(), 100);
        assert!(options.validate().is_ok(), "{options:?}");
    }

    #[test_case(5, 5)]
    #[test_case(100, 100)]
    #[test_case(1000, 100)]
    fn bulk_effective_max(configured: usize, want: usize) {
        let options = BulkExecutionOptions::default().with_max_micro_batch_size(configured);
        assert_eq!(options.effective_max_micro_batch_size(), want);
    }

    #[test_case(0.3, 0.2; "min over max")]
    #[test_case(-0.1, 0.2; "negative min")]
    #[test_case(0.1, 1.5; "max over one")]
    fn bulk_invalid_rates(min: f64, max: f64) {
        let options = BulkExecutionOptions::default().with_targeted_retry_rates(min, max);
        let got = options.validate();
        assert!(
            matches!(got, Err(OptionsError::InvalidRetryRateRange { .. })),
            "{got:?}"
        );
    }

    #[test]
    fn bulk_invalid_size() {
        let options = BulkExecutionOptions::default().with_max_micro_batch_size(0);
        assert_eq!(
            options.validate(),
            Err(OptionsError::InvalidMicroBatchSize(0))
        );
    }
}
