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

//! Adaptive micro-batching for bulk item operations.
//!
//! The service accepts batches of up to
//! [MAX_OPERATIONS_IN_BATCH][crate::constants::MAX_OPERATIONS_IN_BATCH]
//! operations targeting a single partition key range. Larger batches use fewer
//! requests, but are more likely to be throttled. The [BulkExecutor] groups
//! operations by partition key range, and sizes each micro-batch using the
//! [PartitionScopeThresholds] of the range: the target size shrinks when too
//! many operations are throttled, and grows back when throttling subsides.
//!
//! # Example
//! ```
//! # use cosmos_consistency::bulk::PartitionScopeThresholds;
//! # use cosmos_consistency::options::BulkExecutionOptions;
//! let thresholds = PartitionScopeThresholds::new("0", &BulkExecutionOptions::default());
//! assert_eq!(thresholds.target_micro_batch_size_snapshot(), 100);
//! thresholds.record_enqueued_retry();
//! assert!(thresholds.target_micro_batch_size_snapshot() < 100);
//! ```

mod executor;
mod operation;
mod thresholds;

pub use executor::{BatchTransport, BulkExecutor, PartitionRouter};
pub use operation::{BulkOperationResult, ItemOperation, OperationKind, OperationResponse};
pub use thresholds::PartitionScopeThresholds;
