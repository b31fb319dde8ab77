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

use super::{RecoveryTrigger, recovery_target};
use crate::error::Error;
use crate::request::RequestContext;
use crate::retry_policy::RetryPolicy;
use crate::retry_result::ShouldRetryResult;
use crate::session::SessionTokenStore;
use std::sync::Arc;

/// Decorates a retry policy to drop stale session tokens.
///
/// A name-based read failing with "read session not available" may carry a
/// token from a deleted collection with the same name. Once per logical
/// request, this layer clears the session tokens of the collection. It never
/// changes the decision of the inner policy.
#[derive(Debug)]
pub struct ClearingSessionRetryPolicy<P> {
    inner: P,
    sessions: Arc<SessionTokenStore>,
    trigger: RecoveryTrigger,
}

impl<P> ClearingSessionRetryPolicy<P> {
    pub fn new(inner: P, sessions: Arc<SessionTokenStore>) -> Self {
        Self {
            inner,
            sessions,
            trigger: RecoveryTrigger::default(),
        }
    }

    pub fn trigger(&self) -> RecoveryTrigger {
        self.trigger
    }
}

#[async_trait::async_trait]
impl<P> RetryPolicy for ClearingSessionRetryPolicy<P>
where
    P: RetryPolicy,
{
    async fn should_retry(
        &mut self,
        request: &mut RequestContext,
        error: &Error,
    ) -> ShouldRetryResult {
        let result = self.inner.should_retry(request, error).await;
        if !result.is_no_retry() {
            return result;
        }
        let Some(collection_name) = recovery_target(request, error) else {
            return result;
        };
        if !self.trigger.fire() {
            return result;
        }
        let cleared = self.sessions.clear_token_by_collection_name(&collection_name);
        if let Some(rid) = request.resolved_collection_rid.as_deref() {
            self.sessions.clear_token_by_collection(rid);
        }
        tracing::debug!(
            collection_name,
            cleared_rid = cleared,
            "cleared session tokens after read session not available"
        );
        result
    }
}
