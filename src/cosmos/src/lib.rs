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

//! Session consistency and retry core for Cosmos DB clients.
//!
//! This crate contains the logic between an application-facing client and the
//! transport that talks to the service:
//! - the [session token store][session::SessionTokenStore] used to provide
//!   read-your-writes consistency,
//! - the [collection cache][collection_cache::CollectionCache] mapping
//!   collection names to resource ids,
//! - [retry policies][retry_policy] and the [retry orchestrator][retry_orchestrator]
//!   driving them,
//! - the [policy chain][retry_policy_chain] that recovers from stale session
//!   tokens after a collection is deleted and recreated with the same name,
//! - adaptive micro-batching for [bulk] operations.
//!
//! The transport itself is outside the scope of this crate. Applications
//! provide it via the [Transport][request::Transport] trait.
//!
//! # Example
//! ```
//! # use cosmos_consistency::*;
//! # use std::sync::Arc;
//! # async fn sample(transport: Arc<dyn request::Transport>, resolver: Arc<dyn collection_cache::CollectionResolver>) -> Result<()> {
//! use request::{OperationType, RequestContext, ResourceType};
//! let executor = executor::RequestExecutor::new(transport, resolver, options::ExecutionOptions::default());
//! let mut request = RequestContext::new(OperationType::Read, ResourceType::Document, "dbs/db/colls/coll/docs/d1");
//! let response = executor.execute(&mut request).await?;
//! println!("status = {}", response.status_code);
//! # Ok(()) }
//! ```

/// An alias of [std::result::Result] where the error is always [crate::error::Error].
pub type Result<T> = std::result::Result<T, crate::error::Error>;

pub mod backoff_policy;
pub mod bulk;
pub mod collection_cache;
pub mod constants;
pub mod error;
pub mod executor;
pub mod exponential_backoff;
pub mod options;
pub mod request;
pub mod retry_orchestrator;
pub mod retry_policy;
pub mod retry_policy_chain;
pub mod retry_result;
pub mod retry_state;
pub mod session;
