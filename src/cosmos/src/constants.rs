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

//! Status codes, sub-status codes and protocol limits used by the service.

/// HTTP status codes returned by the service.
pub mod status_codes {
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const CONFLICT: u16 = 409;
    pub const GONE: u16 = 410;
    pub const PRECONDITION_FAILED: u16 = 412;
    pub const REQUEST_ENTITY_TOO_LARGE: u16 = 413;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const RETRY_WITH: u16 = 449;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Sub-status codes refining a status code.
pub mod sub_status_codes {
    /// The replica could not serve the requested session token.
    ///
    /// Only meaningful together with [NOT_FOUND][super::status_codes::NOT_FOUND].
    pub const READ_SESSION_NOT_AVAILABLE: u32 = 1002;
    /// Refines [TOO_MANY_REQUESTS][super::status_codes::TOO_MANY_REQUESTS]
    /// when the request units provisioned for the collection are exhausted.
    pub const USER_REQUEST_RATE_TOO_LARGE: u32 = 3200;
}

/// The maximum number of operations the service accepts in one batch request.
pub const MAX_OPERATIONS_IN_BATCH: usize = 100;

/// The separator between a partition key range id and its session token.
pub(crate) const PARTITION_TOKEN_SEPARATOR: char = ':';

/// The separator between tokens of different partition key ranges.
pub(crate) const TOKEN_LIST_SEPARATOR: char = ',';
