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

//! Defines the trait for retry policies and the base implementations.
//!
//! A retry policy decides, after each failed attempt, if the request should
//! be attempted again and how long to wait before doing so. Policies are
//! stateful and owned by one logical request. Recovery layers decorate a
//! base policy, see [retry_policy_chain][crate::retry_policy_chain].

use crate::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use crate::error::Error;
use crate::exponential_backoff::ExponentialBackoff;
use crate::options::RetryOptions;
use crate::request::RequestContext;
use crate::retry_result::ShouldRetryResult;
use crate::retry_state::RetryState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Decides if a failed attempt should be retried.
///
/// Implementations may update the request, for example to force a refresh of
/// cached routing information in the next attempt.
#[async_trait::async_trait]
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `request` - the state of the logical request.
    /// * `error` - the error from the last attempt.
    async fn should_retry(
        &mut self,
        request: &mut RequestContext,
        error: &Error,
    ) -> ShouldRetryResult;
}

#[async_trait::async_trait]
impl<P> RetryPolicy for Box<P>
where
    P: RetryPolicy + ?Sized,
{
    async fn should_retry(
        &mut self,
        request: &mut RequestContext,
        error: &Error,
    ) -> ShouldRetryResult {
        (**self).should_retry(request, error).await
    }
}

/// Retries transient errors with a backoff, within limits.
///
/// Idempotent requests are retried on any [transient][Error::is_transient]
/// error. Other requests are only retried when the service guarantees the
/// operation was not applied, see [Error::is_retryable_for_writes].
///
/// The policy stops once it reaches the maximum number of attempts, or when
/// the next backoff would exceed the maximum elapsed time. In both cases it
/// returns [ShouldRetryResult::NoRetry], so the caller receives the last
/// error unchanged.
///
/// Throttling errors wait for the delay requested by the service, if any.
#[derive(Clone, Debug)]
pub struct BackoffRetryPolicy {
    max_attempts: u32,
    max_elapsed: Duration,
    backoff: Arc<dyn BackoffPolicy>,
    idempotent: Option<bool>,
    state: RetryState,
}

impl BackoffRetryPolicy {
    /// Creates a policy for a new logical request.
    ///
    /// The retry loop starts when the policy is created.
    pub fn new(options: &RetryOptions) -> Self {
        Self {
            max_attempts: options.max_attempts,
            max_elapsed: options.max_elapsed,
            backoff: Arc::new(options.backoff_policy()),
            idempotent: None,
            state: RetryState::default(),
        }
    }

    /// Replaces the backoff policy.
    pub fn with_backoff<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.backoff = v.into().into();
        self
    }

    /// Overrides the idempotency derived from the request.
    pub fn with_idempotency(mut self, v: bool) -> Self {
        self.idempotent = Some(v);
        self.state = self.state.set_idempotent(v);
        self
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Makes a decision for `error`, observed at `now`.
    pub fn decide(&mut self, error: &Error, now: Instant) -> ShouldRetryResult {
        if error.is_cancelled() {
            return ShouldRetryResult::NoRetry;
        }
        self.state.attempt_count = self.state.attempt_count.saturating_add(1);
        let retryable = if self.state.idempotent {
            error.is_transient()
        } else {
            error.is_retryable_for_writes()
        };
        if !retryable {
            tracing::debug!(
                idempotent = self.state.idempotent,
                "not retrying permanent error: {error}"
            );
            return ShouldRetryResult::NoRetry;
        }
        if self.state.attempt_count >= self.max_attempts {
            tracing::debug!(
                attempts = self.state.attempt_count,
                "retry attempts exhausted: {error}"
            );
            return ShouldRetryResult::NoRetry;
        }
        let delay = match error.retry_after() {
            Some(d) if error.is_retryable_for_writes() => d,
            _ => self.backoff.on_failure(&self.state),
        };
        let elapsed = self.state.elapsed_at(now);
        if elapsed.saturating_add(delay) > self.max_elapsed {
            tracing::debug!(
                ?elapsed,
                ?delay,
                "retry time exhausted: {error}"
            );
            return ShouldRetryResult::NoRetry;
        }
        self.state.last_backoff = Some(delay);
        ShouldRetryResult::RetryAfter(delay)
    }
}

#[async_trait::async_trait]
impl RetryPolicy for BackoffRetryPolicy {
    async fn should_retry(
        &mut self,
        request: &mut RequestContext,
        error: &Error,
    ) -> ShouldRetryResult {
        let idempotent = self.idempotent.unwrap_or_else(|| request.is_idempotent());
        self.state.idempotent = idempotent;
        self.decide(error, Instant::now())
    }
}

/// Retries throttling errors only, honoring the delay requested by the
/// service.
///
/// The policy is limited by a number of attempts and by the cumulative time
/// spent waiting. Any error other than a `429` stops the loop.
#[derive(Clone, Debug)]
pub struct ResourceThrottleRetryPolicy {
    max_attempts: u32,
    max_wait: Duration,
    backoff: Arc<dyn BackoffPolicy>,
    state: RetryState,
    cumulative_wait: Duration,
}

impl ResourceThrottleRetryPolicy {
    pub fn new(max_attempts: u32, max_wait: Duration) -> Self {
        Self {
            max_attempts,
            max_wait,
            backoff: Arc::new(ExponentialBackoff::default()),
            state: RetryState::new(false),
            cumulative_wait: Duration::ZERO,
        }
    }

    /// The backoff used when the service does not provide a delay.
    pub fn with_backoff<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.backoff = v.into().into();
        self
    }

    /// The total delay returned by this policy so far.
    pub fn cumulative_wait(&self) -> Duration {
        self.cumulative_wait
    }

    /// The number of throttling errors retried so far.
    pub fn attempt_count(&self) -> u32 {
        self.state.attempt_count
    }

    /// Makes a decision for `error`.
    pub fn on_throttle(&mut self, error: &Error) -> ShouldRetryResult {
        if !error.is_throttled() {
            return ShouldRetryResult::NoRetry;
        }
        if self.state.attempt_count >= self.max_attempts {
            tracing::debug!(
                attempts = self.state.attempt_count,
                "throttling retries exhausted"
            );
            return ShouldRetryResult::NoRetry;
        }
        self.state.attempt_count += 1;
        let delay = error
            .retry_after()
            .unwrap_or_else(|| self.backoff.on_failure(&self.state));
        let wait = self.cumulative_wait.saturating_add(delay);
        if wait > self.max_wait {
            tracing::debug!(?wait, max_wait = ?self.max_wait, "throttling wait exhausted");
            return ShouldRetryResult::NoRetry;
        }
        self.cumulative_wait = wait;
        self.state.last_backoff = Some(delay);
        ShouldRetryResult::RetryAfter(delay)
    }
}

#[async_trait::async_trait]
impl RetryPolicy for ResourceThrottleRetryPolicy {
    async fn should_retry(
        &mut self,
        _request: &mut RequestContext,
        error: &Error,
    ) -> ShouldRetryResult {
        self.on_throttle(error)
    }
}
