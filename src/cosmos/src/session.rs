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

//! Session consistency tokens.
//!
//! Reads in a session must observe the writes made earlier in the same
//! session. The service returns a token with each response, and the client
//! attaches the latest token for the target partition to subsequent reads.
//!
//! Tokens are only meaningful for the collection instance that produced them.
//! If a collection is deleted and recreated with the same name, the old
//! tokens are meaningless for the new collection and must be dropped. The
//! store keys tokens by the collection resource id, which is never reused,
//! and tracks which resource id each collection name maps to.

mod token;

pub use token::{SessionToken, SessionTokenError};

use crate::constants::{PARTITION_TOKEN_SEPARATOR, TOKEN_LIST_SEPARATOR};
use std::collections::HashMap;
use std::sync::RwLock;

/// Session tokens for all the collections used by one client.
///
/// Each mutation holds the lock for a single map operation, so clears are
/// visible to all subsequent lookups.
#[derive(Debug, Default)]
pub struct SessionTokenStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    // Collection resource id -> partition key range id -> token.
    tokens: HashMap<String, HashMap<String, SessionToken>>,
    // Collection name -> collection resource id.
    names: HashMap<String, String>,
}

impl SessionTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest token for a partition of the collection.
    pub fn get_token(&self, collection_rid: &str, partition: &str) -> Option<SessionToken> {
        let guard = self.inner.read().expect("session token lock is poisoned");
        guard
            .tokens
            .get(collection_rid)
            .and_then(|m| m.get(partition))
            .cloned()
    }

    /// Records a token returned by the service.
    ///
    /// The token is merged with any existing token for the same partition, an
    /// out of order response cannot move the session backwards.
    pub fn set_token(&self, collection_rid: &str, partition: &str, token: SessionToken) {
        let mut guard = self.inner.write().expect("session token lock is poisoned");
        guard.merge(collection_rid, partition, token);
    }

    /// Records a token and the collection name that resolved to
    /// `collection_rid`.
    ///
    /// `current_rid` is the resource id the name resolves to now, typically
    /// the entry in the [CollectionCache][crate::collection_cache::CollectionCache].
    /// The name is mapped to `collection_rid` only if that is the current
    /// resource id, or if the name is unknown and there is no current resource
    /// id. If the name previously mapped to a different resource id the
    /// collection was recreated, and the tokens for the old resource id are
    /// dropped.
    ///
    /// A late response from a collection that has since been recreated does
    /// not change the mapping, and does not drop the tokens of the current
    /// collection. Its token is stored under its own resource id.
    pub fn set_token_for_name(
        &self,
        collection_name: &str,
        collection_rid: &str,
        partition: &str,
        token: SessionToken,
        current_rid: Option<&str>,
    ) {
        let mut guard = self.inner.write().expect("session token lock is poisoned");
        let remap = match current_rid {
            Some(current) => current == collection_rid,
            None => !guard.names.contains_key(collection_name),
        };
        if !remap {
            tracing::debug!(
                collection_name,
                rid = collection_rid,
                current_rid,
                "session token from a stale collection instance"
            );
            guard.merge(collection_rid, partition, token);
            return;
        }
        let previous = guard
            .names
            .insert(collection_name.to_string(), collection_rid.to_string());
        if let Some(old) = previous.filter(|old| old != collection_rid) {
            tracing::debug!(
                collection_name,
                old_rid = old,
                new_rid = collection_rid,
                "collection recreated, dropping its session tokens"
            );
            guard.tokens.remove(&old);
        }
        guard.merge(collection_rid, partition, token);
    }

    /// Drops all the tokens of a collection.
    pub fn clear_token_by_collection(&self, collection_rid: &str) {
        let mut guard = self.inner.write().expect("session token lock is poisoned");
        guard.tokens.remove(collection_rid);
    }

    /// Drops all the tokens of a collection, identified by its full name.
    ///
    /// Returns the resource id the name mapped to, if any.
    pub fn clear_token_by_collection_name(&self, collection_name: &str) -> Option<String> {
        let mut guard = self.inner.write().expect("session token lock is poisoned");
        let rid = guard.names.remove(collection_name)?;
        guard.tokens.remove(&rid);
        Some(rid)
    }

    /// The value to send with a request targeting a single partition.
    pub fn resolve_session_token(&self, collection_rid: &str, partition: &str) -> Option<String> {
        self.get_token(collection_rid, partition)
            .map(|t| format!("{partition}{PARTITION_TOKEN_SEPARATOR}{t}"))
    }

    /// The value to send with a request whose target partition is unknown.
    ///
    /// Contains the tokens of all known partitions, sorted by partition key
    /// range id, e.g. `0:1#100,1:1#230`.
    pub fn global_session_token(&self, collection_rid: &str) -> Option<String> {
        let guard = self.inner.read().expect("session token lock is poisoned");
        let partitions = guard.tokens.get(collection_rid)?;
        let mut entries: Vec<_> = partitions.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let value = entries
            .into_iter()
            .map(|(p, t)| format!("{p}{PARTITION_TOKEN_SEPARATOR}{t}"))
            .collect::<Vec<_>>()
            .join(&TOKEN_LIST_SEPARATOR.to_string());
        (!value.is_empty()).then_some(value)
    }
}

impl Inner {
    fn merge(&mut self, collection_rid: &str, partition: &str, token: SessionToken) {
        let partitions = self.tokens.entry(collection_rid.to_string()).or_default();
        let merged = match partitions.get(partition) {
            Some(existing) => existing.merge(&token),
            None => token,
        };
        partitions.insert(partition.to_string(), merged);
    }
}
