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

//! Resolves collection names to the current collection instance.
//!
//! Applications address collections by name, but the service identifies them
//! by an immutable resource id. A collection deleted and recreated under the
//! same name gets a new resource id. The cache maps names to resource ids and
//! routing information, and offers forced refreshes for the recovery paths.

use crate::Result;
use crate::error::Error;
use crate::request::RequestContext;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// The metadata of a collection needed to route requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct CollectionInfo {
    /// The full name, `dbs/{database}/colls/{collection}`.
    pub name: String,
    /// The immutable resource id, unique across recreations.
    pub resource_id: String,
    pub partition_key_paths: Vec<String>,
    pub partition_key_range_ids: Vec<String>,
}

impl CollectionInfo {
    pub fn new<N: Into<String>, R: Into<String>>(name: N, resource_id: R) -> Self {
        Self {
            name: name.into(),
            resource_id: resource_id.into(),
            ..Default::default()
        }
    }

    pub fn with_partition_key_paths<I, V>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.partition_key_paths = v.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_partition_key_range_ids<I, V>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.partition_key_range_ids = v.into_iter().map(Into::into).collect();
        self
    }
}

/// Fetches collection metadata from the service.
#[async_trait::async_trait]
pub trait CollectionResolver: Send + Sync + std::fmt::Debug {
    async fn resolve_collection(&self, collection_name: &str) -> Result<CollectionInfo>;
}

/// Caches [CollectionInfo] by collection name.
///
/// Concurrent lookups of a name missing from the cache share a single fetch.
/// A failed fetch leaves the existing entry untouched.
#[derive(Debug)]
pub struct CollectionCache {
    resolver: Arc<dyn CollectionResolver>,
    entries: RwLock<HashMap<String, CollectionInfo>>,
    // Held while fetching a name. Waiters re-check the entries on wake up.
    // Only names with a fetch in progress, or waiting for one, have a lock.
    fetches: FetchLocks,
}

type FetchLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

// A reference to the fetch lock for one name. The last reference to drop
// removes the lock from the map.
struct FetchSlot<'a> {
    fetches: &'a FetchLocks,
    name: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> FetchSlot<'a> {
    fn new(fetches: &'a FetchLocks, name: &'a str) -> Self {
        let lock = {
            let mut guard = fetches.lock().expect("collection fetch lock is poisoned");
            guard.entry(name.to_string()).or_default().clone()
        };
        Self {
            fetches,
            name,
            lock,
        }
    }
}

impl Drop for FetchSlot<'_> {
    fn drop(&mut self) {
        let Ok(mut guard) = self.fetches.lock() else {
            return;
        };
        // One reference in the map, and this one.
        let last = guard
            .get(self.name)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2);
        if last {
            guard.remove(self.name);
        }
    }
}

impl CollectionCache {
    pub fn new(resolver: Arc<dyn CollectionResolver>) -> Self {
        Self {
            resolver,
            entries: RwLock::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the collection targeted by a request.
    ///
    /// If the request sets `force_name_cache_refresh` the cached entry is
    /// ignored and replaced.
    pub async fn resolve(&self, request: &RequestContext) -> Result<CollectionInfo> {
        let name = request.collection_name.as_deref().ok_or_else(|| {
            Error::other(format!(
                "the address `{}` does not identify a collection",
                request.resource_address
            ))
        })?;
        if request.force_name_cache_refresh {
            return self.force_refresh(name).await;
        }
        if let Some(info) = self.cached(name) {
            return Ok(info);
        }
        let slot = FetchSlot::new(&self.fetches, name);
        let _guard = slot.lock.lock().await;
        if let Some(info) = self.cached(name) {
            return Ok(info);
        }
        self.fetch(name).await
    }

    /// Fetches the collection metadata, replacing any cached entry.
    pub async fn force_refresh(&self, collection_name: &str) -> Result<CollectionInfo> {
        let slot = FetchSlot::new(&self.fetches, collection_name);
        let _guard = slot.lock.lock().await;
        self.fetch(collection_name).await
    }

    /// Fetches the collection metadata if the cached entry still has the
    /// obsolete resource id.
    ///
    /// Requests that observe the same stale entry concurrently trigger a
    /// single fetch, the others receive the refreshed entry.
    pub async fn refresh_if_obsolete(
        &self,
        collection_name: &str,
        obsolete_rid: &str,
    ) -> Result<CollectionInfo> {
        let slot = FetchSlot::new(&self.fetches, collection_name);
        let _guard = slot.lock.lock().await;
        match self.cached(collection_name) {
            Some(info) if info.resource_id != obsolete_rid => Ok(info),
            _ => self.fetch(collection_name).await,
        }
    }

    /// The cached entry for a name, if any.
    pub fn cached(&self, collection_name: &str) -> Option<CollectionInfo> {
        let guard = self.entries.read().expect("collection cache lock is poisoned");
        guard.get(collection_name).cloned()
    }

    /// Drops the cached entry for a name.
    pub fn remove(&self, collection_name: &str) -> Option<CollectionInfo> {
        let mut guard = self.entries.write().expect("collection cache lock is poisoned");
        guard.remove(collection_name)
    }

    async fn fetch(&self, collection_name: &str) -> Result<CollectionInfo> {
        let info = self.resolver.resolve_collection(collection_name).await?;
        let previous = {
            let mut guard = self.entries.write().expect("collection cache lock is poisoned");
            guard.insert(collection_name.to_string(), info.clone())
        };
        tracing::debug!(
            collection_name,
            resource_id = info.resource_id,
            previous = previous.as_ref().map(|p| p.resource_id.as_str()),
            "refreshed collection cache entry"
        );
        Ok(info)
    }
}
