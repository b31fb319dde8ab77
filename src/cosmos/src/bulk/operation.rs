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

use crate::Result;
use crate::constants::status_codes;
use crate::error::{Error, ServiceError};
use bytes::Bytes;
use std::time::Duration;

/// The kind of item operation in a bulk request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OperationKind {
    Create,
    Replace,
    Upsert,
    Delete,
}

/// A single item operation in a bulk request.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ItemOperation {
    pub kind: OperationKind,
    /// The partition key value, used to route the operation.
    pub partition_key: String,
    pub id: String,
    /// The item, for operations that write one.
    pub body: Option<Bytes>,
}

impl ItemOperation {
    pub fn create<K, I, B>(partition_key: K, id: I, body: B) -> Self
    where
        K: Into<String>,
        I: Into<String>,
        B: Into<Bytes>,
    {
        Self::with_body(OperationKind::Create, partition_key, id, body)
    }

    pub fn replace<K, I, B>(partition_key: K, id: I, body: B) -> Self
    where
        K: Into<String>,
        I: Into<String>,
        B: Into<Bytes>,
    {
        Self::with_body(OperationKind::Replace, partition_key, id, body)
    }

    pub fn upsert<K, I, B>(partition_key: K, id: I, body: B) -> Self
    where
        K: Into<String>,
        I: Into<String>,
        B: Into<Bytes>,
    {
        Self::with_body(OperationKind::Upsert, partition_key, id, body)
    }

    pub fn delete<K: Into<String>, I: Into<String>>(partition_key: K, id: I) -> Self {
        Self {
            kind: OperationKind::Delete,
            partition_key: partition_key.into(),
            id: id.into(),
            body: None,
        }
    }

    fn with_body<K, I, B>(kind: OperationKind, partition_key: K, id: I, body: B) -> Self
    where
        K: Into<String>,
        I: Into<String>,
        B: Into<Bytes>,
    {
        Self {
            kind,
            partition_key: partition_key.into(),
            id: id.into(),
            body: Some(body.into()),
        }
    }
}

/// The service response for one operation in a batch.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct OperationResponse {
    pub status_code: u16,
    pub sub_status_code: Option<u32>,
    pub retry_after: Option<Duration>,
    pub request_charge: f64,
    pub body: Bytes,
}

impl OperationResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }

    pub fn set_sub_status_code<T: Into<u32>>(mut self, v: T) -> Self {
        self.sub_status_code = Some(v.into());
        self
    }

    pub fn set_retry_after<T: Into<Duration>>(mut self, v: T) -> Self {
        self.retry_after = Some(v.into());
        self
    }

    pub fn set_request_charge(mut self, v: f64) -> Self {
        self.request_charge = v;
        self
    }

    pub fn set_body<T: Into<Bytes>>(mut self, v: T) -> Self {
        self.body = v.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_throttled(&self) -> bool {
        self.status_code == status_codes::TOO_MANY_REQUESTS
    }

    /// Converts a failed response into an error, keeping the service details.
    pub fn to_error(&self) -> Error {
        let mut details = ServiceError::new(self.status_code);
        details.sub_status_code = self.sub_status_code;
        details.retry_after = self.retry_after;
        Error::service(details)
    }
}

/// The outcome of one operation submitted to the bulk executor.
#[derive(Debug)]
#[non_exhaustive]
pub struct BulkOperationResult {
    /// The position of the operation in the input stream.
    pub index: usize,
    pub operation: ItemOperation,
    /// The response, or the error of the last attempt.
    pub result: Result<OperationResponse>,
    /// The number of times the operation was throttled and re-enqueued.
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::sub_status_codes::USER_REQUEST_RATE_TOO_LARGE;
    use test_case::test_case;

    #[test]
    fn constructors() {
        let op = ItemOperation::create("pk", "id-1", "{}");
        assert_eq!(op.kind, OperationKind::Create);
        assert_eq!(op.partition_key, "pk");
        assert_eq!(op.id, "id-1");
        assert_eq!(op.body, Some(Bytes::from_static(b"{}")));
        assert_eq!(ItemOperation::replace("pk", "id", "x").kind, OperationKind::Replace);
        assert_eq!(ItemOperation::upsert("pk", "id", "x").kind, OperationKind::Upsert);
        let op = ItemOperation::delete("pk", "id-2");
        assert_eq!(op.kind, OperationKind::Delete);
        assert!(op.body.is_none(), "{op:?}");
    }

    #[test_case(200, true, false)]
    #[test_case(201, true, false)]
    #[test_case(204, true, false)]
    #[test_case(429, false, true)]
    #[test_case(409, false, false)]
    #[test_case(503, false, false)]
    fn classification(code: u16, success: bool, throttled: bool) {
        let response = OperationResponse::new(code);
        assert_eq!(response.is_success(), success, "{response:?}");
        assert_eq!(response.is_throttled(), throttled, "{response:?}");
    }

    #[test]
    fn to_error() {
        let response = OperationResponse::new(429)
            .set_sub_status_code(USER_REQUEST_RATE_TOO_LARGE)
            .set_retry_after(Duration::from_millis(20))
            .set_request_charge(1.0)
            .set_body("throttled");
        let error = response.to_error();
        assert!(error.is_throttled(), "{error:?}");
        assert_eq!(error.sub_status_code(), Some(USER_REQUEST_RATE_TOO_LARGE));
        assert_eq!(error.retry_after(), Some(Duration::from_millis(20)));
    }
}
