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

//! The per-request state carried through the retry loop, and the boundary
//! with the transport.

use crate::Result;

/// The kind of operation performed by a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OperationType {
    #[default]
    Read,
    ReadFeed,
    Query,
    Create,
    Replace,
    Upsert,
    Delete,
    Batch,
}

impl OperationType {
    /// Read operations are idempotent, and use session tokens.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Read | Self::ReadFeed | Self::Query)
    }
}

/// The kind of resource addressed by a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ResourceType {
    Database,
    Collection,
    #[default]
    Document,
    PartitionKeyRange,
}

/// The state of a single logical request.
///
/// A logical request may be sent several times. The retry policies inspect
/// and update this state between attempts, for example to force a refresh of
/// the collection cache, or to record the resource id the request resolved
/// to.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct RequestContext {
    pub operation_type: OperationType,
    pub resource_type: ResourceType,

    /// The address of the target resource, e.g. `dbs/db/colls/coll/docs/id`.
    pub resource_address: String,

    /// If true, the address uses names rather than immutable resource ids.
    pub name_based: bool,

    /// The full name of the collection containing the resource, if any.
    pub collection_name: Option<String>,

    /// The partition key range targeted by the request, if already known.
    pub partition_key_range_id: Option<String>,

    /// The resource id the collection name resolved to in the last attempt.
    pub resolved_collection_rid: Option<String>,

    /// If true, the next attempt must bypass the collection cache.
    pub force_name_cache_refresh: bool,

    /// The session token attached to the current attempt.
    pub session_token: Option<String>,
}

impl RequestContext {
    /// Creates a name-based request for the given address.
    ///
    /// # Example
    /// ```
    /// # use cosmos_consistency::request::*;
    /// let request = RequestContext::new(OperationType::Read, ResourceType::Document, "dbs/db/colls/coll/docs/d1");
    /// assert_eq!(request.collection_name.as_deref(), Some("dbs/db/colls/coll"));
    /// assert!(request.name_based);
    /// ```
    pub fn new<T: Into<String>>(
        operation_type: OperationType,
        resource_type: ResourceType,
        resource_address: T,
    ) -> Self {
        let resource_address = resource_address.into();
        let collection_name = collection_name_from_address(&resource_address);
        Self {
            operation_type,
            resource_type,
            resource_address,
            name_based: true,
            collection_name,
            ..Default::default()
        }
    }

    pub fn with_name_based(mut self, v: bool) -> Self {
        self.name_based = v;
        self
    }

    pub fn with_partition_key_range_id<T: Into<String>>(mut self, v: T) -> Self {
        self.partition_key_range_id = Some(v.into());
        self
    }

    pub fn with_resolved_collection_rid<T: Into<String>>(mut self, v: T) -> Self {
        self.resolved_collection_rid = Some(v.into());
        self
    }

    pub fn with_force_name_cache_refresh(mut self, v: bool) -> Self {
        self.force_name_cache_refresh = v;
        self
    }

    /// Reads can be safely retried after any transient error.
    pub fn is_idempotent(&self) -> bool {
        self.operation_type.is_read_only()
    }
}

/// Extracts the full collection name (`dbs/{db}/colls/{coll}`) from a
/// resource address.
///
/// Returns `None` if the address does not point inside a collection.
pub fn collection_name_from_address(address: &str) -> Option<String> {
    let segments: Vec<&str> = address
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    match segments.as_slice() {
        ["dbs", db, "colls", coll, ..] => Some(format!("dbs/{db}/colls/{coll}")),
        _ => None,
    }
}

/// A successful response from the transport.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct StoreResponse {
    pub status_code: u16,

    /// The session token header, typically `{partition key range id}:{token}`.
    pub session_token: Option<String>,

    /// The request units consumed by the operation.
    pub request_charge: f64,

    pub body: bytes::Bytes,
}

impl StoreResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }

    pub fn set_session_token<T: Into<String>>(mut self, v: T) -> Self {
        self.session_token = Some(v.into());
        self
    }

    pub fn set_request_charge(mut self, v: f64) -> Self {
        self.request_charge = v;
        self
    }

    pub fn set_body<T: Into<bytes::Bytes>>(mut self, v: T) -> Self {
        self.body = v.into();
        self
    }
}

/// Sends requests to the service.
///
/// Implemented by the HTTP or TCP pipeline, which is outside the scope of this
/// crate. Implementations should return service errors with their status
/// code, sub-status code, and (if known) the `retry-after` delay.
///
/// Dropping the returned future should cancel the in-flight request.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: &RequestContext) -> Result<StoreResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("dbs/db/colls/coll/docs/d1", Some("dbs/db/colls/coll"))]
    #[test_case("/dbs/db/colls/coll/", Some("dbs/db/colls/coll"))]
    #[test_case("dbs/db/colls/coll", Some("dbs/db/colls/coll"))]
    #[test_case("dbs/db", None)]
    #[test_case("dbs/db/users/u1", None)]
    #[test_case("", None)]
    fn collection_name(address: &str, want: Option<&str>) {
        assert_eq!(collection_name_from_address(address).as_deref(), want);
    }

    #[test]
    fn request_defaults() {
        let request = RequestContext::new(
            OperationType::Create,
            ResourceType::Document,
            "dbs/db/colls/coll/docs/d1",
        );
        assert!(request.name_based);
        assert!(!request.is_idempotent());
        assert!(!request.force_name_cache_refresh);
        assert!(request.resolved_collection_rid.is_none());
        assert!(request.session_token.is_none());

        let request = request
            .with_name_based(false)
            .with_partition_key_range_id("0")
            .with_resolved_collection_rid("rid-1")
            .with_force_name_cache_refresh(true);
        assert!(!request.name_based);
        assert_eq!(request.partition_key_range_id.as_deref(), Some("0"));
        assert_eq!(request.resolved_collection_rid.as_deref(), Some("rid-1"));
        assert!(request.force_name_cache_refresh);
    }

    #[test_case(OperationType::Read, true)]
    #[test_case(OperationType::ReadFeed, true)]
    #[test_case(OperationType::Query, true)]
    #[test_case(OperationType::Create, false)]
    #[test_case(OperationType::Replace, false)]
    #[test_case(OperationType::Upsert, false)]
    #[test_case(OperationType::Delete, false)]
    #[test_case(OperationType::Batch, false)]
    fn read_only(operation: OperationType, want: bool) {
        assert_eq!(operation.is_read_only(), want);
    }

    #[test]
    fn store_response() {
        let response = StoreResponse::new(200)
            .set_session_token("0:1#100")
            .set_request_charge(1.5)
            .set_body("{}");
        assert_eq!(response.status_code, 200);
        assert_eq!(response.session_token.as_deref(), Some("0:1#100"));
        assert_eq!(response.request_charge, 1.5);
        assert_eq!(response.body, bytes::Bytes::from_static(b"{}"));
    }
}
