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

//! The decision returned by retry policies.

use crate::error::Error;
use std::time::Duration;

/// The result of a retry policy decision.
///
/// # Example
/// ```
/// # use cosmos_consistency::retry_result::ShouldRetryResult;
/// # use std::time::Duration;
/// let decision = ShouldRetryResult::RetryAfter(Duration::from_millis(100));
/// assert!(decision.is_retry());
/// assert_eq!(decision.retry_after(), Some(Duration::from_millis(100)));
/// ```
#[derive(Debug)]
pub enum ShouldRetryResult {
    /// Make a new attempt after the given delay.
    RetryAfter(Duration),

    /// Stop the loop. The caller receives the error from the last attempt,
    /// unchanged.
    NoRetry,

    /// Stop the loop, and return this error instead of the last attempt's
    /// error.
    Fail(Error),
}

impl ShouldRetryResult {
    /// Make a new attempt immediately.
    pub fn retry_now() -> Self {
        Self::RetryAfter(Duration::ZERO)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Self::RetryAfter(_))
    }

    pub fn is_no_retry(&self) -> bool {
        matches!(self, Self::NoRetry)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail(_))
    }

    /// The delay before the next attempt, if the loop should continue.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RetryAfter(d) => Some(*d),
            Self::NoRetry | Self::Fail(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after() {
        let result = ShouldRetryResult::RetryAfter(Duration::from_secs(1));
        assert!(result.is_retry(), "{result:?}");
        assert!(!result.is_no_retry(), "{result:?}");
        assert!(!result.is_fail(), "{result:?}");
        assert_eq!(result.retry_after(), Some(Duration::from_secs(1)));

        let result = ShouldRetryResult::retry_now();
        assert_eq!(result.retry_after(), Some(Duration::ZERO));
    }

    #[test]
    fn no_retry() {
        let result = ShouldRetryResult::NoRetry;
        assert!(result.is_no_retry(), "{result:?}");
        assert!(!result.is_retry(), "{result:?}");
        assert_eq!(result.retry_after(), None);
    }

    #[test]
    fn fail() {
        let result = ShouldRetryResult::Fail(Error::other("replaced"));
        assert!(result.is_fail(), "{result:?}");
        assert!(!result.is_retry(), "{result:?}");
        assert_eq!(result.retry_after(), None);
    }
}
