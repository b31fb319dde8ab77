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

//! Recovery layers around the base retry policy.
//!
//! The base [BackoffRetryPolicy] handles transient errors. Some permanent
//! errors can be recovered by fixing client-side state, for example by
//! dropping stale session tokens or refreshing the collection cache. Each
//! recovery is a decorator around an inner policy: the decorator asks the
//! inner policy first, and only acts if the inner policy gives up.
//!
//! The [RetryPolicyChain] builds the policy for each logical request from an
//! explicit list of layers.

mod clearing_session;
mod rename_aware;
mod trigger;

pub use clearing_session::ClearingSessionRetryPolicy;
pub use rename_aware::RenameAwareRetryPolicy;
pub use trigger::RecoveryTrigger;

use crate::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use crate::collection_cache::CollectionCache;
use crate::error::Error;
use crate::options::RetryOptions;
use crate::request::{RequestContext, collection_name_from_address};
use crate::retry_policy::{BackoffRetryPolicy, RetryPolicy};
use crate::session::SessionTokenStore;
use std::sync::Arc;

/// A recovery layer in a [RetryPolicyChain].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum PolicyLayer {
    /// See [ClearingSessionRetryPolicy].
    ClearSessionOnNotFound,
    /// See [RenameAwareRetryPolicy].
    RenameAware,
}

/// Creates the retry policy for each logical request.
///
/// The layers are applied in order, the first layer wraps the base policy and
/// the last layer is the outermost. Every call to
/// [request_policy][RetryPolicyChain::request_policy] returns a policy with
/// fresh state: attempt counts and recovery triggers are never shared between
/// requests.
///
/// # Example
/// ```
/// # use cosmos_consistency::retry_policy_chain::*;
/// # use cosmos_consistency::collection_cache::*;
/// # use cosmos_consistency::session::SessionTokenStore;
/// # use cosmos_consistency::options::RetryOptions;
/// # use std::sync::Arc;
/// # fn sample(cache: Arc<CollectionCache>) {
/// let chain = RetryPolicyChain::new(Arc::new(SessionTokenStore::new()), cache, RetryOptions::default())
///     .with_layers([PolicyLayer::ClearSessionOnNotFound, PolicyLayer::RenameAware]);
/// let policy = chain.request_policy();
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RetryPolicyChain {
    sessions: Arc<SessionTokenStore>,
    cache: Arc<CollectionCache>,
    retry: RetryOptions,
    layers: Vec<PolicyLayer>,
    backoff: Option<Arc<dyn BackoffPolicy>>,
}

impl RetryPolicyChain {
    pub fn new(
        sessions: Arc<SessionTokenStore>,
        cache: Arc<CollectionCache>,
        retry: RetryOptions,
    ) -> Self {
        Self {
            sessions,
            cache,
            retry,
            layers: vec![PolicyLayer::RenameAware],
            backoff: None,
        }
    }

    /// Replaces the recovery layers, innermost first.
    pub fn with_layers<I>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = PolicyLayer>,
    {
        self.layers = v.into_iter().collect();
        self
    }

    /// Replaces the backoff policy derived from the retry options.
    pub fn with_backoff<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.backoff = Some(v.into().into());
        self
    }

    pub fn layers(&self) -> &[PolicyLayer] {
        &self.layers
    }

    /// Creates the policy for a new logical request.
    pub fn request_policy(&self) -> Box<dyn RetryPolicy> {
        let mut base = BackoffRetryPolicy::new(&self.retry);
        if let Some(backoff) = &self.backoff {
            base = base.with_backoff(backoff.clone());
        }
        let mut policy: Box<dyn RetryPolicy> = Box::new(base);
        for layer in &self.layers {
            policy = match layer {
                PolicyLayer::ClearSessionOnNotFound => Box::new(ClearingSessionRetryPolicy::new(
                    policy,
                    self.sessions.clone(),
                )),
                PolicyLayer::RenameAware => Box::new(RenameAwareRetryPolicy::new(
                    policy,
                    self.sessions.clone(),
                    self.cache.clone(),
                )),
            };
        }
        policy
    }
}

/// Returns the collection to recover if `error` may be caused by a collection
/// recreated under the same name.
pub(crate) fn recovery_target(request: &RequestContext, error: &Error) -> Option<String> {
    if !error.is_session_unavailable() || !(error.is_name_based() || request.name_based) {
        return None;
    }
    request
        .collection_name
        .clone()
        .or_else(|| error.resource_address().and_then(collection_name_from_address))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backoff_policy::ConstantBackoff;
    use crate::collection_cache::CollectionInfo;
    use crate::collection_cache::tests::MockResolver;
    use crate::error::ServiceError;
    use crate::request::{OperationType, ResourceType};
    use crate::retry_result::ShouldRetryResult;
    use crate::session::SessionToken;
    use std::time::Duration;

    mockall::mock! {
        #[derive(Debug)]
        pub Policy {}
        #[async_trait::async_trait]
        impl RetryPolicy for Policy {
            async fn should_retry(&mut self, request: &mut RequestContext, error: &Error) -> ShouldRetryResult;
        }
    }

    pub(crate) fn read_request() -> RequestContext {
        RequestContext::new(
            OperationType::Read,
            ResourceType::Document,
            "dbs/db/colls/coll/docs/d1",
        )
    }

    pub(crate) fn session_unavailable() -> Error {
        Error::service(
            ServiceError::new(404)
                .set_sub_status_code(1002_u32)
                .set_resource_address("dbs/db/colls/coll/docs/d1")
                .set_name_based(true),
        )
    }

    #[test]
    fn recovery_target_signature() {
        let request = read_request();
        assert_eq!(
            recovery_target(&request, &session_unavailable()).as_deref(),
            Some("dbs/db/colls/coll")
        );

        let error = Error::service(ServiceError::new(404).set_sub_status_code(1002_u32));
        assert_eq!(
            recovery_target(&request, &error).as_deref(),
            Some("dbs/db/colls/coll")
        );
        let by_rid = read_request().with_name_based(false);
        assert!(recovery_target(&by_rid, &error).is_none());

        let error = Error::service(ServiceError::new(404).set_sub_status_code(1000_u32));
        assert!(recovery_target(&request, &error).is_none());
        assert!(recovery_target(&request, &Error::io("reset")).is_none());
    }

    #[test]
    fn recovery_target_from_error_address() {
        let request = RequestContext::default();
        assert_eq!(
            recovery_target(&request, &session_unavailable()).as_deref(),
            Some("dbs/db/colls/coll")
        );
    }

    #[test]
    fn policy_layer_serde() -> anyhow::Result<()> {
        let got = serde_json::to_value(PolicyLayer::ClearSessionOnNotFound)?;
        assert_eq!(got, serde_json::json!("clearSessionOnNotFound"));
        let got: PolicyLayer = serde_json::from_value(serde_json::json!("renameAware"))?;
        assert_eq!(got, PolicyLayer::RenameAware);
        Ok(())
    }

    fn chain(resolver: MockResolver, sessions: Arc<SessionTokenStore>) -> RetryPolicyChain {
        let cache = Arc::new(CollectionCache::new(Arc::new(resolver)));
        RetryPolicyChain::new(sessions, cache, RetryOptions::default())
            .with_backoff(ConstantBackoff::new(Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn default_layers() {
        let chain = chain(MockResolver::new(), Arc::new(SessionTokenStore::new()));
        assert_eq!(chain.layers(), &[PolicyLayer::RenameAware]);
    }

    #[tokio::test]
    async fn base_only() {
        let sessions = Arc::new(SessionTokenStore::new());
        sessions.set_token_for_name(
            "dbs/db/colls/coll",
            "rid-1",
            "0",
            SessionToken::new(1, 1),
            None,
        );
        let chain = chain(MockResolver::new(), sessions.clone()).with_layers(Vec::new());
        let mut policy = chain.request_policy();
        let mut request = read_request();
        let got = policy.should_retry(&mut request, &session_unavailable()).await;
        assert!(got.is_no_retry(), "{got:?}");
        assert!(sessions.get_token("rid-1", "0").is_some());

        let got = policy
            .should_retry(&mut request, &Error::service(ServiceError::new(503)))
            .await;
        assert_eq!(got.retry_after(), Some(Duration::from_millis(10)), "{got:?}");
    }

    #[tokio::test]
    async fn clear_then_rename() -> anyhow::Result<()> {
        let mut seq = mockall::Sequence::new();
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve_collection()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Ok(CollectionInfo::new(name, "rid-2")));
        let sessions = Arc::new(SessionTokenStore::new());
        sessions.set_token_for_name(
            "dbs/db/colls/coll",
            "rid-1",
            "0",
            SessionToken::new(1, 1),
            None,
        );
        let chain = chain(resolver, sessions.clone())
            .with_layers([PolicyLayer::ClearSessionOnNotFound, PolicyLayer::RenameAware]);

        let mut policy = chain.request_policy();
        let mut request = read_request().with_resolved_collection_rid("rid-1");
        let got = policy.should_retry(&mut request, &session_unavailable()).await;
        assert!(got.is_retry(), "{got:?}");
        assert_eq!(request.resolved_collection_rid.as_deref(), Some("rid-2"));
        assert!(sessions.get_token("rid-1", "0").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn fresh_state_per_request() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve_collection()
            .times(2)
            .returning(|name| Ok(CollectionInfo::new(name, "rid-1")));
        let chain = chain(resolver, Arc::new(SessionTokenStore::new()));
        for _ in 0..2 {
            let mut policy = chain.request_policy();
            let mut request = read_request().with_resolved_collection_rid("rid-1");
            let got = policy.should_retry(&mut request, &session_unavailable()).await;
            assert!(got.is_no_retry(), "{got:?}");
        }
    }
}
