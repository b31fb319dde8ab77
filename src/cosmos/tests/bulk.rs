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

//! These tests verify the adaptive micro-batching under sustained load.

#[cfg(test)]
mod tests {
    use cosmos_consistency::Result;
    use cosmos_consistency::bulk::{
        BatchTransport, BulkExecutor, ItemOperation, OperationResponse, PartitionRouter,
        PartitionScopeThresholds,
    };
    use cosmos_consistency::constants::{status_codes, sub_status_codes};
    use cosmos_consistency::error::Error;
    use cosmos_consistency::options::BulkExecutionOptions;
    use futures::stream;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn sustained_throttling_then_recovery() {
        let thresholds = PartitionScopeThresholds::new("0", &BulkExecutionOptions::default());
        for _ in 0..1_000 {
            thresholds.record_enqueued_retry();
        }
        assert_eq!(thresholds.target_micro_batch_size_snapshot(), 1);

        for _ in 0..100_000 {
            thresholds.record_successful_operation();
        }
        assert_eq!(thresholds.target_micro_batch_size_snapshot(), 100);
        assert_eq!(thresholds.total_operation_count(), 101_000);
    }

    #[test]
    fn bounded_under_random_load() {
        use rand::Rng;
        let options = BulkExecutionOptions::default().with_max_micro_batch_size(50);
        let thresholds = PartitionScopeThresholds::new("0", &options);
        let mut rng = rand::rng();
        for _ in 0..20_000 {
            if rng.random_bool(0.3) {
                thresholds.record_enqueued_retry();
            } else {
                thresholds.record_successful_operation();
            }
            let size = thresholds.target_micro_batch_size_snapshot();
            assert!((1..=50).contains(&size), "{size}");
        }
    }

    /// Routes `{range}/{n}` partition keys to `{range}`.
    #[derive(Debug)]
    struct PrefixRouter;

    #[async_trait::async_trait]
    impl PartitionRouter for PrefixRouter {
        async fn partition_key_range_id(&self, partition_key: &str) -> Result<String> {
            partition_key
                .split_once('/')
                .map(|(range, _)| range.to_string())
                .ok_or_else(|| Error::other(format!("unroutable key {partition_key}")))
        }
    }

    /// Accepts up to `capacity` operations per batch for the `hot` range,
    /// and throttles the rest.
    #[derive(Debug)]
    struct CapacityTransport {
        capacity: usize,
        batches: Mutex<Vec<(String, usize)>>,
    }

    impl CapacityTransport {
        fn new(capacity: usize) -> Arc<Self> {
            Arc::new(Self {
                capacity,
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batches(&self) -> Vec<(String, usize)> {
            self.batches.lock().expect("batches lock is poisoned").clone()
        }
    }

    #[async_trait::async_trait]
    impl BatchTransport for CapacityTransport {
        async fn execute_batch(
            &self,
            partition_key_range_id: &str,
            operations: &[ItemOperation],
        ) -> Result<Vec<OperationResponse>> {
            self.batches
                .lock()
                .expect("batches lock is poisoned")
                .push((partition_key_range_id.to_string(), operations.len()));
            Ok((0..operations.len())
                .map(|i| {
                    if partition_key_range_id == "hot" && i >= self.capacity {
                        OperationResponse::new(status_codes::TOO_MANY_REQUESTS)
                            .set_sub_status_code(sub_status_codes::USER_REQUEST_RATE_TOO_LARGE)
                            .set_retry_after(Duration::from_millis(10))
                    } else {
                        OperationResponse::new(201).set_request_charge(5.0)
                    }
                })
                .collect())
        }
    }

    fn operations(range: &str, n: usize) -> Vec<ItemOperation> {
        (0..n)
            .map(|i| ItemOperation::upsert(format!("{range}/{i}"), format!("{range}-{i}"), "{}"))
            .collect()
    }

    fn options() -> BulkExecutionOptions {
        BulkExecutionOptions::default()
            .with_max_operation_retries(1_000)
            .with_max_throttle_wait(Duration::from_secs(3600))
    }

    #[tokio::test(start_paused = true)]
    async fn adapts_to_capacity() -> anyhow::Result<()> {
        let transport = CapacityTransport::new(10);
        let executor = BulkExecutor::new(transport.clone(), Arc::new(PrefixRouter), options())?;

        let results = executor.execute(stream::iter(operations("hot", 500))).await;
        assert_eq!(results.len(), 500);
        assert!(results.iter().all(|r| r.result.is_ok()), "{results:?}");
        assert!(results.iter().enumerate().all(|(i, r)| r.index == i));

        let retries: u64 = results.iter().map(|r| r.retries as u64).sum();
        assert!(retries > 0);
        let thresholds = executor.thresholds("hot");
        assert_eq!(thresholds.total_operation_count(), 500 + retries);

        let batches = transport.batches();
        assert!(batches.iter().all(|(_, size)| *size <= 100), "{batches:?}");
        // The last batch fits within the capacity, or it would be throttled.
        assert_eq!(batches.first().map(|(_, size)| *size), Some(100));
        let last = batches.last().map(|(_, size)| *size).unwrap_or_default();
        assert!((1..=10).contains(&last), "{batches:?}");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn ranges_adapt_independently() -> anyhow::Result<()> {
        let transport = CapacityTransport::new(5);
        let executor = BulkExecutor::new(transport.clone(), Arc::new(PrefixRouter), options())?;

        let input = operations("hot", 200)
            .into_iter()
            .zip(operations("cold", 200))
            .flat_map(|(a, b)| [a, b]);
        let results = executor.execute(stream::iter(input)).await;
        assert_eq!(results.len(), 400);
        assert!(results.iter().all(|r| r.result.is_ok()), "{results:?}");
        assert!(
            results
                .iter()
                .filter(|r| r.operation.partition_key.starts_with("cold/"))
                .all(|r| r.retries == 0)
        );

        let cold = executor.thresholds("cold");
        assert_eq!(cold.target_micro_batch_size_snapshot(), 100);
        assert_eq!(cold.total_operation_count(), 200);
        assert!(executor.thresholds("hot").total_operation_count() > 200);
        let cold_batches = transport
            .batches()
            .into_iter()
            .filter(|(range, _)| range == "cold")
            .count();
        assert_eq!(cold_batches, 2);
        Ok(())
    }
}
