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

//! Defines the trait for backoff policies and a constant implementation.
//!
//! A backoff policy computes how long to wait before the next attempt. It
//! does not decide *whether* to retry, that is the job of the
//! [RetryPolicy][crate::retry_policy::RetryPolicy].

use crate::retry_state::RetryState;
use std::sync::Arc;
use std::time::Duration;

/// Computes the delay between attempts of a logical request.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the delay before the next attempt.
    ///
    /// # Parameters
    /// * `state` - the state of the retry loop, `state.attempt_count` includes
    ///   the attempt that just failed.
    fn on_failure(&self, state: &RetryState) -> Duration;
}

/// A helper type to use [BackoffPolicy] in client and request options.
#[derive(Clone, Debug)]
pub struct BackoffPolicyArg(pub(crate) Arc<dyn BackoffPolicy>);

impl<T> std::convert::From<T> for BackoffPolicyArg
where
    T: BackoffPolicy + 'static,
{
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn BackoffPolicy>> for BackoffPolicyArg {
    fn from(value: Arc<dyn BackoffPolicy>) -> Self {
        Self(value)
    }
}

impl From<BackoffPolicyArg> for Arc<dyn BackoffPolicy> {
    fn from(value: BackoffPolicyArg) -> Arc<dyn BackoffPolicy> {
        value.0
    }
}

/// Waits the same amount of time after every failure.
///
/// # Example
/// ```
/// # use cosmos_consistency::backoff_policy::*;
/// # use std::time::Duration;
/// let backoff = ConstantBackoff::new(Duration::from_millis(250));
/// assert_eq!(backoff.delay(), Duration::from_millis(250));
/// ```
#[derive(Clone, Debug)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl BackoffPolicy for ConstantBackoff {
    fn on_failure(&self, _state: &RetryState) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify `BackoffPolicyArg` can be converted from the desired types.
    #[test]
    fn backoff_policy_arg() {
        let policy = ConstantBackoff::new(Duration::from_millis(10));
        let _ = BackoffPolicyArg::from(policy);

        let policy: Arc<dyn BackoffPolicy> = Arc::new(ConstantBackoff::new(Duration::ZERO));
        let arg = BackoffPolicyArg::from(policy);
        let _: Arc<dyn BackoffPolicy> = arg.into();
    }

    #[tokio::test(start_paused = true)]
    async fn constant() {
        let backoff = ConstantBackoff::new(Duration::from_millis(100));
        for attempt in 1..10_u32 {
            let state = RetryState::new(true).set_attempt_count(attempt);
            assert_eq!(backoff.on_failure(&state), Duration::from_millis(100));
        }
    }
}
