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
use crate::collection_cache::CollectionCache;
use crate::error::Error;
use crate::request::RequestContext;
use crate::retry_policy::RetryPolicy;
use crate::retry_result::ShouldRetryResult;
use crate::session::SessionTokenStore;
use std::sync::Arc;

/// Decorates a retry policy to recover from collection recreation.
///
/// If a collection is deleted and recreated with the same name, name-based
/// reads may fail with "read session not available" because their session
/// token belongs to the old collection. The inner policy treats these errors
/// as permanent.
///
/// Once per logical request, this layer clears the session tokens of the
/// collection and refreshes the collection cache. If the refresh shows a new
/// resource id the request is retried immediately against the new collection.
/// Otherwise the inner policy's decision stands, and the caller receives the
/// original error.
#[derive(Debug)]
pub struct RenameAwareRetryPolicy<P> {
    inner: P,
    sessions: Arc<SessionTokenStore>,
    cache: Arc<CollectionCache>,
    trigger: RecoveryTrigger,
}

impl<P> RenameAwareRetryPolicy<P> {
    pub fn new(inner: P, sessions: Arc<SessionTokenStore>, cache: Arc<CollectionCache>) -> Self {
        Self {
            inner,
            sessions,
            cache,
            trigger: RecoveryTrigger::default(),
        }
    }

    pub fn trigger(&self) -> RecoveryTrigger {
        self.trigger
    }
}

#[async_trait::async_trait]
impl<P> RetryPolicy for RenameAwareRetryPolicy<P>
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
            tracing::debug!(collection_name, "collection recovery already attempted");
            return result;
        }

        let old_rid = request
            .resolved_collection_rid
            .clone()
            .or_else(|| self.cache.cached(&collection_name).map(|c| c.resource_id));
        self.sessions.clear_token_by_collection_name(&collection_name);
        if let Some(rid) = old_rid.as_deref() {
            self.sessions.clear_token_by_collection(rid);
        }

        let refreshed = match old_rid.as_deref() {
            Some(rid) => self.cache.refresh_if_obsolete(&collection_name, rid).await,
            None => self.cache.force_refresh(&collection_name).await,
        };
        let info = match refreshed {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    collection_name,
                    "cannot refresh collection cache, keeping the original error: {e}"
                );
                self.trigger.exhaust();
                return result;
            }
        };
        match old_rid {
            Some(old) if old != info.resource_id => {
                tracing::debug!(
                    collection_name,
                    old_rid = old,
                    new_rid = info.resource_id,
                    "collection recreated, retrying"
                );
                request.resolved_collection_rid = Some(info.resource_id);
                request.force_name_cache_refresh = false;
                ShouldRetryResult::retry_now()
            }
            _ => {
                tracing::debug!(
                    collection_name,
                    rid = info.resource_id,
                    "collection resource id unchanged, not retrying"
                );
                self.trigger.exhaust();
                result
            }
        }
    }
}
