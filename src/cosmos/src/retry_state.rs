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

//! Defines the state shared between attempts of one logical request.

use std::time::Duration;
use tokio::time::Instant;

/// The input into a retry policy decision.
///
/// One instance exists per logical request. The retry policies update it as
/// the request fails and is retried.
///
/// The start time uses [tokio::time::Instant], a monotonic clock that can be
/// paused and advanced in tests.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct RetryState {
    /// If true, the request is idempotent and it is safe to retry after any
    /// transient error.
    pub idempotent: bool,

    /// The start time for this retry loop.
    pub start: Instant,

    /// The number of failed attempts so far.
    pub attempt_count: u32,

    /// The last backoff computed by the policy, if any.
    pub last_backoff: Option<Duration>,
}

impl RetryState {
    /// Create a new instance.
    pub fn new(idempotent: bool) -> Self {
        Self::default().set_idempotent(idempotent)
    }

    /// Update the idempotency.
    pub fn set_idempotent(mut self, v: bool) -> Self {
        self.idempotent = v;
        self
    }

    /// Update the start time, useful in tests.
    pub fn set_start<T: Into<Instant>>(mut self, v: T) -> Self {
        self.start = v.into();
        self
    }

    /// Update the attempt count, useful in tests.
    pub fn set_attempt_count<T: Into<u32>>(mut self, v: T) -> Self {
        self.attempt_count = v.into();
        self
    }

    /// The time spent in the retry loop, measured at `now`.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }
}

impl std::default::Default for RetryState {
    fn default() -> Self {
        Self {
            idempotent: false,
            start: Instant::now(),
            attempt_count: 0,
            last_backoff: None,
        }
    }
}
