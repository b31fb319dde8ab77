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

use super::operation::{BulkOperationResult, ItemOperation, OperationResponse};
use super::thresholds::PartitionScopeThresholds;
use crate::Result;
use crate::error::Error;
use crate::options::{BulkExecutionOptions, OptionsError};
use crate::retry_policy::ResourceThrottleRetryPolicy;
use crate::retry_result::ShouldRetryResult;
use futures::{Stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Sends a micro-batch of operations to one partition key range.
#[async_trait::async_trait]
pub trait BatchTransport: Send + Sync + std::fmt::Debug {
    /// Returns one response per operation, in the same order.
    ///
    /// An error means the batch as a whole failed, for example because the
    /// connection was reset.
    async fn execute_batch(
        &self,
        partition_key_range_id: &str,
        operations: &[ItemOperation],
    ) -> Result<Vec<OperationResponse>>;
}

/// Maps partition key values to partition key ranges.
#[async_trait::async_trait]
pub trait PartitionRouter: Send + Sync + std::fmt::Debug {
    async fn partition_key_range_id(&self, partition_key: &str) -> Result<String>;
}

/// Executes a stream of item operations in micro-batches.
///
/// Operations are grouped by partition key range. Each range has its own
/// [PartitionScopeThresholds], created on first use and kept for the lifetime
/// of the executor. A range's buffer is sent once it reaches the range's
/// target size, and all buffers are drained concurrently once the input ends.
///
/// Throttled operations are put back at the front of their range's buffer
/// and retried after the delay requested by the service, within the limits
/// of a [ResourceThrottleRetryPolicy]. Every other failure is final. The delay
/// only holds back the throttled range: the input keeps flowing, and other
/// ranges keep sending micro-batches.
#[derive(Debug)]
pub struct BulkExecutor {
    transport: Arc<dyn BatchTransport>,
    router: Arc<dyn PartitionRouter>,
    options: BulkExecutionOptions,
    thresholds: Mutex<HashMap<String, Arc<PartitionScopeThresholds>>>,
}

// The operations waiting for one partition key range.
#[derive(Debug, Default)]
struct RangeBuffer {
    queue: VecDeque<Pending>,
    // Set when the range is throttled, no batches are sent before this time.
    not_before: Option<Instant>,
}

impl RangeBuffer {
    fn is_ready(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|t| t <= now)
    }
}

#[derive(Debug)]
struct Pending {
    index: usize,
    operation: ItemOperation,
    throttle: ResourceThrottleRetryPolicy,
}

impl Pending {
    fn complete(self, result: Result<OperationResponse>) -> BulkOperationResult {
        BulkOperationResult {
            index: self.index,
            operation: self.operation,
            result,
            retries: self.throttle.attempt_count(),
        }
    }
}

impl BulkExecutor {
    pub fn new(
        transport: Arc<dyn BatchTransport>,
        router: Arc<dyn PartitionRouter>,
        options: BulkExecutionOptions,
    ) -> std::result::Result<Self, OptionsError> {
        options.validate()?;
        Ok(Self {
            transport,
            router,
            options,
            thresholds: Mutex::new(HashMap::new()),
        })
    }

    /// The thresholds for a partition key range, created if needed.
    pub fn thresholds(&self, partition_key_range_id: &str) -> Arc<PartitionScopeThresholds> {
        let mut guard = self.thresholds.lock().expect("thresholds map lock is poisoned");
        guard
            .entry(partition_key_range_id.to_string())
            .or_insert_with(|| {
                Arc::new(PartitionScopeThresholds::new(
                    partition_key_range_id,
                    &self.options,
                ))
            })
            .clone()
    }

    /// Executes all the operations in `operations`.
    ///
    /// The stream is consumed lazily. Returns one result per input operation,
    /// sorted by their position in the input.
    pub async fn execute<S>(&self, operations: S) -> Vec<BulkOperationResult>
    where
        S: Stream<Item = ItemOperation>,
    {
        let mut operations = std::pin::pin!(operations);
        let mut buffers: HashMap<String, RangeBuffer> = HashMap::new();
        let mut results = Vec::new();
        let mut index = 0_usize;
        while let Some(operation) = operations.next().await {
            let current = index;
            index += 1;
            let range = match self.router.partition_key_range_id(&operation.partition_key).await {
                Ok(r) => r,
                Err(e) => {
                    results.push(self.pending(current, operation).complete(Err(e)));
                    continue;
                }
            };
            let buffer = buffers.entry(range.clone()).or_default();
            buffer.queue.push_back(self.pending(current, operation));
            let target = self.thresholds(&range).target_micro_batch_size_snapshot();
            if buffer.queue.len() >= target && buffer.is_ready(Instant::now()) {
                results.extend(self.send_batch(&range, buffer).await);
            }
        }
        tracing::debug!(
            operations = index,
            ranges = buffers.len(),
            "input exhausted, draining buffers"
        );
        let drains = buffers
            .into_iter()
            .map(|(range, buffer)| self.drain(range, buffer));
        for drained in futures::future::join_all(drains).await {
            results.extend(drained);
        }
        results.sort_by_key(|r| r.index);
        results
    }

    fn pending(&self, index: usize, operation: ItemOperation) -> Pending {
        Pending {
            index,
            operation,
            throttle: ResourceThrottleRetryPolicy::new(
                self.options.max_operation_retries,
                self.options.max_throttle_wait,
            ),
        }
    }

    async fn drain(&self, range: String, mut buffer: RangeBuffer) -> Vec<BulkOperationResult> {
        let mut results = Vec::new();
        while !buffer.queue.is_empty() {
            if let Some(deadline) = buffer.not_before {
                tokio::time::sleep_until(deadline).await;
            }
            results.extend(self.send_batch(&range, &mut buffer).await);
        }
        results
    }

    /// Sends one micro-batch from the front of the range's queue.
    ///
    /// Returns the completed operations. Throttled operations are put back at
    /// the front of the queue, in their original order, and the range is held
    /// back until the longest delay requested by the service elapses.
    async fn send_batch(&self, range: &str, buffer: &mut RangeBuffer) -> Vec<BulkOperationResult> {
        let thresholds = self.thresholds(range);
        let size = thresholds
            .target_micro_batch_size_snapshot()
            .min(buffer.queue.len());
        let batch: Vec<Pending> = buffer.queue.drain(..size).collect();
        buffer.not_before = None;
        let operations: Vec<ItemOperation> = batch.iter().map(|p| p.operation.clone()).collect();
        tracing::debug!(partition_key_range_id = range, size, "sending micro-batch");

        let responses = match self.transport.execute_batch(range, &operations).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(partition_key_range_id = range, size, "micro-batch failed: {e}");
                let e = Arc::new(e);
                return batch
                    .into_iter()
                    .map(|p| p.complete(Err(shared_error(&e))))
                    .collect();
            }
        };

        let mut completed = Vec::new();
        let mut throttled = Vec::new();
        let mut delay = Duration::ZERO;
        let mut responses = responses.into_iter();
        for mut pending in batch {
            let Some(response) = responses.next() else {
                completed.push(pending.complete(Err(Error::other(
                    "the service did not return a response for the operation",
                ))));
                continue;
            };
            if response.is_success() {
                thresholds.record_successful_operation();
                completed.push(pending.complete(Ok(response)));
                continue;
            }
            let error = response.to_error();
            if !response.is_throttled() {
                completed.push(pending.complete(Err(error)));
                continue;
            }
            match pending.throttle.on_throttle(&error) {
                ShouldRetryResult::RetryAfter(d) => {
                    thresholds.record_enqueued_retry();
                    delay = delay.max(d);
                    throttled.push(pending);
                }
                ShouldRetryResult::NoRetry | ShouldRetryResult::Fail(_) => {
                    completed.push(pending.complete(Err(error)));
                }
            }
        }
        if !throttled.is_empty() {
            tracing::debug!(
                partition_key_range_id = range,
                throttled = throttled.len(),
                ?delay,
                "re-enqueued throttled operations"
            );
            for pending in throttled.into_iter().rev() {
                buffer.queue.push_front(pending);
            }
            buffer.not_before = Some(Instant::now() + delay);
        }
        completed
    }
}

// Each operation in a failed batch gets its own error with the same details.
fn shared_error(e: &Arc<Error>) -> Error {
    match e.service_error() {
        Some(details) => Error::service(details.clone()),
        None => Error::io(e.clone()),
    }
}
