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

//! Drives a logical request through repeated attempts.

use crate::Result;
use crate::error::Error;
use crate::request::RequestContext;
use crate::retry_policy::RetryPolicy;
use crate::retry_result::ShouldRetryResult;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
// Using tokio's wrapper makes the loop testable with a paused clock.
use tokio::time::Instant;

/// Runs the retry loop for logical requests.
///
/// Attempts of one request are strictly sequential. Between attempts the
/// loop waits for the delay prescribed by the retry policy. If the request is
/// cancelled, the loop stops at the next suspension point: the in-flight
/// attempt, the alternate callback, or the backoff.
///
/// Long backoffs can be put to use with an alternate callback, for example
/// to read from a different region. See
/// [execute_with_alternate][RetryOrchestrator::execute_with_alternate].
#[derive(Clone, Debug, Default)]
pub struct RetryOrchestrator {
    cancel: CancellationToken,
}

impl RetryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the loop when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Calls `primary` until it succeeds or `policy` stops the loop.
    ///
    /// When the policy stops the loop with [ShouldRetryResult::NoRetry] the
    /// caller receives the error from the last attempt, unchanged.
    pub async fn execute<T, P, F>(
        &self,
        request: &mut RequestContext,
        policy: &mut P,
        primary: F,
    ) -> Result<T>
    where
        P: RetryPolicy + ?Sized,
        F: AsyncFnMut(&mut RequestContext) -> Result<T>,
    {
        self.run(
            request,
            policy,
            primary,
            async |_: &RequestContext| -> Result<T> { Err(Error::other("no alternate callback")) },
            None,
        )
        .await
    }

    /// Calls `primary` until it succeeds or `policy` stops the loop, using
    /// `alternate` during long backoffs.
    ///
    /// If the policy requests a backoff longer than
    /// `min_backoff_for_alternate`, `alternate` runs before the primary
    /// callback is retried. If it succeeds its result is returned. If it fails
    /// the failure is logged, and the time it took is deducted from the
    /// backoff. The remaining backoff never goes below zero.
    pub async fn execute_with_alternate<T, P, F, A>(
        &self,
        request: &mut RequestContext,
        policy: &mut P,
        primary: F,
        alternate: A,
        min_backoff_for_alternate: Duration,
    ) -> Result<T>
    where
        P: RetryPolicy + ?Sized,
        F: AsyncFnMut(&mut RequestContext) -> Result<T>,
        A: AsyncFnMut(&RequestContext) -> Result<T>,
    {
        self.run(
            request,
            policy,
            primary,
            alternate,
            Some(min_backoff_for_alternate),
        )
        .await
    }

    async fn run<T, P, F, A>(
        &self,
        request: &mut RequestContext,
        policy: &mut P,
        mut primary: F,
        mut alternate: A,
        min_backoff_for_alternate: Option<Duration>,
    ) -> Result<T>
    where
        P: RetryPolicy + ?Sized,
        F: AsyncFnMut(&mut RequestContext) -> Result<T>,
        A: AsyncFnMut(&RequestContext) -> Result<T>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(cancelled());
            }
            let error = tokio::select! {
                _ = self.cancel.cancelled() => return Err(cancelled()),
                r = primary(&mut *request) => match r {
                    Ok(v) => return Ok(v),
                    Err(e) => e,
                },
            };
            if error.is_cancelled() {
                return Err(error);
            }
            let decision = tokio::select! {
                _ = self.cancel.cancelled() => return Err(cancelled()),
                d = policy.should_retry(request, &error) => d,
            };
            let delay = match decision {
                ShouldRetryResult::NoRetry => return Err(error),
                ShouldRetryResult::Fail(e) => return Err(e),
                ShouldRetryResult::RetryAfter(d) => d,
            };
            tracing::debug!(?delay, "retrying after error: {error}");

            let remaining = match min_backoff_for_alternate {
                Some(min) if delay > min => {
                    let stopwatch = Instant::now();
                    let result = tokio::select! {
                        _ = self.cancel.cancelled() => return Err(cancelled()),
                        r = alternate(&*request) => r,
                    };
                    match result {
                        Ok(v) => return Ok(v),
                        Err(e) => {
                            let elapsed = stopwatch.elapsed();
                            tracing::warn!(
                                ?elapsed,
                                ?delay,
                                "alternate callback failed during backoff: {e}"
                            );
                            delay.saturating_sub(elapsed)
                        }
                    }
                }
                _ => delay,
            };
            if remaining.is_zero() {
                continue;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep(remaining) => {},
            }
        }
    }
}

fn cancelled() -> Error {
    Error::cancelled("the request was cancelled by the caller")
}
