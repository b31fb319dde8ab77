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

//! Executes logical requests with session consistency and recovery.

use crate::Result;
use crate::backoff_policy::BackoffPolicyArg;
use crate::collection_cache::{CollectionCache, CollectionResolver};
use crate::options::ExecutionOptions;
use crate::request::{RequestContext, StoreResponse, Transport};
use crate::retry_orchestrator::RetryOrchestrator;
use crate::retry_policy_chain::RetryPolicyChain;
use crate::session::{SessionToken, SessionTokenStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes requests for one client instance.
///
/// The executor owns the session tokens and the collection cache shared by all
/// the requests of the client. Each request gets its own retry policy from the
/// [RetryPolicyChain].
///
/// Each attempt:
/// - resolves the target collection, bypassing the cache if a recovery layer
///   asked for a refresh,
/// - attaches the session token for reads,
/// - sends the request,
/// - records the session token returned by the service.
#[derive(Debug)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    sessions: Arc<SessionTokenStore>,
    cache: Arc<CollectionCache>,
    chain: RetryPolicyChain,
    options: ExecutionOptions,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn CollectionResolver>,
        options: ExecutionOptions,
    ) -> Self {
        let sessions = Arc::new(SessionTokenStore::new());
        let cache = Arc::new(CollectionCache::new(resolver));
        let chain = RetryPolicyChain::new(sessions.clone(), cache.clone(), options.retry.clone())
            .with_layers(options.layers.iter().copied());
        tracing::debug!(layers = ?options.layers, "created request executor");
        Self {
            transport,
            sessions,
            cache,
            chain,
            options,
        }
    }

    /// Replaces the backoff policy derived from the retry options.
    pub fn with_backoff<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.chain = self.chain.with_backoff(v);
        self
    }

    pub fn session_store(&self) -> &Arc<SessionTokenStore> {
        &self.sessions
    }

    pub fn collection_cache(&self) -> &Arc<CollectionCache> {
        &self.cache
    }

    pub fn policy_chain(&self) -> &RetryPolicyChain {
        &self.chain
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Executes a logical request.
    ///
    /// On failure the caller receives the error from the last attempt, with
    /// the status and sub-status codes reported by the service.
    pub async fn execute(&self, request: &mut RequestContext) -> Result<StoreResponse> {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Executes a logical request, stopping if `cancel` is cancelled.
    pub async fn execute_with_cancellation(
        &self,
        request: &mut RequestContext,
        cancel: CancellationToken,
    ) -> Result<StoreResponse> {
        let mut policy = self.chain.request_policy();
        RetryOrchestrator::new()
            .with_cancellation(cancel)
            .execute(request, &mut policy, async |r| self.attempt(r).await)
            .await
    }

    /// Executes a logical request, running `alternate` during backoffs longer
    /// than [ExecutionOptions::min_backoff_for_alternate].
    pub async fn execute_with_alternate<A>(
        &self,
        request: &mut RequestContext,
        alternate: A,
    ) -> Result<StoreResponse>
    where
        A: AsyncFnMut(&RequestContext) -> Result<StoreResponse>,
    {
        let mut policy = self.chain.request_policy();
        RetryOrchestrator::new()
            .execute_with_alternate(
                request,
                &mut policy,
                async |r| self.attempt(r).await,
                alternate,
                self.options.min_backoff_for_alternate,
            )
            .await
    }

    async fn attempt(&self, request: &mut RequestContext) -> Result<StoreResponse> {
        let collection = if request.collection_name.is_some() {
            let info = self.cache.resolve(request).await?;
            request.force_name_cache_refresh = false;
            request.resolved_collection_rid = Some(info.resource_id.clone());
            Some(info)
        } else {
            None
        };
        request.session_token = match (&collection, request.is_idempotent()) {
            (Some(info), true) => match request.partition_key_range_id.as_deref() {
                Some(partition) => self
                    .sessions
                    .resolve_session_token(&info.resource_id, partition),
                None => self.sessions.global_session_token(&info.resource_id),
            },
            _ => None,
        };

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| e.with_request(request))?;

        if let (Some(info), Some(header)) = (&collection, response.session_token.as_deref()) {
            match SessionToken::parse_response_token(header) {
                Ok((partition, token)) => {
                    // The cache may have moved on while the request was in flight.
                    let current = self.cache.cached(&info.name).map(|c| c.resource_id);
                    self.sessions.set_token_for_name(
                        &info.name,
                        &info.resource_id,
                        &partition,
                        token,
                        current.as_deref(),
                    )
                }
                Err(e) => tracing::warn!(
                    collection_name = info.name,
                    "ignoring invalid session token in response: {e}"
                ),
            }
        }
        Ok(response)
    }
}
