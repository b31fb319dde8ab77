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

use crate::options::BulkExecutionOptions;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

// Until a partition has seen this many operations, every operation
// re-evaluates the target size. Afterwards, only full windows do.
const WARM_UP_OPERATIONS: u64 = 1000;

/// The adaptive micro-batch size for one partition key range.
///
/// The size starts at the configured maximum (capped by the service limit)
/// and adapts to the rate of throttled operations observed in a window of
/// recent operations:
/// - below the minimum targeted retry rate the size grows, at most doubling,
/// - above the maximum targeted retry rate the size shrinks, in proportion to
///   how far the rate is above the average of both targets.
///
/// Successful operations only ever grow the size, and retries only ever shrink
/// it. The size always stays in `[1, max]`.
///
/// # Example
/// ```
/// # use cosmos_consistency::bulk::PartitionScopeThresholds;
/// # use cosmos_consistency::options::BulkExecutionOptions;
/// let thresholds = PartitionScopeThresholds::new("0", &BulkExecutionOptions::default());
/// assert_eq!(thresholds.target_micro_batch_size_snapshot(), 100);
/// thresholds.record_enqueued_retry();
/// assert!(thresholds.target_micro_batch_size_snapshot() < 100);
/// ```
#[derive(Debug)]
pub struct PartitionScopeThresholds {
    partition_key_range_id: String,
    target_micro_batch_size: AtomicUsize,
    total_operation_count: AtomicU64,
    window: Mutex<EvaluationWindow>,
    max_micro_batch_size: usize,
    min_retry_rate: f64,
    max_retry_rate: f64,
    avg_retry_rate: f64,
}

#[derive(Debug, Default)]
struct EvaluationWindow {
    operations: u64,
    retries: u64,
}

impl PartitionScopeThresholds {
    pub fn new<T: Into<String>>(partition_key_range_id: T, options: &BulkExecutionOptions) -> Self {
        let max_micro_batch_size = options.effective_max_micro_batch_size().max(1);
        let min_retry_rate = options.min_targeted_retry_rate;
        let max_retry_rate = options.max_targeted_retry_rate;
        Self {
            partition_key_range_id: partition_key_range_id.into(),
            target_micro_batch_size: AtomicUsize::new(max_micro_batch_size),
            total_operation_count: AtomicU64::new(0),
            window: Mutex::new(EvaluationWindow::default()),
            max_micro_batch_size,
            min_retry_rate,
            max_retry_rate,
            avg_retry_rate: (min_retry_rate + max_retry_rate) / 2.0,
        }
    }

    pub fn partition_key_range_id(&self) -> &str {
        &self.partition_key_range_id
    }

    pub fn max_micro_batch_size(&self) -> usize {
        self.max_micro_batch_size
    }

    /// The number of operations recorded so far.
    pub fn total_operation_count(&self) -> u64 {
        self.total_operation_count.load(Ordering::Relaxed)
    }

    /// The current target size for micro-batches sent to this partition.
    pub fn target_micro_batch_size_snapshot(&self) -> usize {
        self.target_micro_batch_size.load(Ordering::Acquire)
    }

    pub fn record_successful_operation(&self) {
        self.record(false);
    }

    /// Records an operation throttled by the service and queued for retry.
    pub fn record_enqueued_retry(&self) {
        self.record(true);
    }

    fn record(&self, is_retry: bool) {
        let total = self.total_operation_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut window = self.window.lock().expect("thresholds window lock is poisoned");
        window.operations += 1;
        if is_retry {
            window.retries += 1;
        }
        let current = self.target_micro_batch_size.load(Ordering::Acquire);
        let window_full = window.operations >= current as u64;
        if total >= WARM_UP_OPERATIONS && !window_full {
            return;
        }
        let retry_rate = window.retries as f64 / window.operations as f64;
        let updated = self.reevaluate(current, retry_rate, is_retry);
        if updated != current {
            tracing::debug!(
                partition_key_range_id = self.partition_key_range_id,
                retry_rate,
                from = current,
                to = updated,
                "adjusted micro-batch size"
            );
            self.target_micro_batch_size.store(updated, Ordering::Release);
        }
        if updated != current || window_full {
            *window = EvaluationWindow::default();
        }
    }

    fn reevaluate(&self, current: usize, retry_rate: f64, is_retry: bool) -> usize {
        if !is_retry && retry_rate < self.min_retry_rate && current < self.max_micro_batch_size {
            let increment = ((self.max_micro_batch_size as f64 * self.avg_retry_rate) as usize).max(1);
            return (current * 2)
                .min(current + increment)
                .min(self.max_micro_batch_size);
        }
        if is_retry && retry_rate > self.max_retry_rate && current > 1 {
            let delta = retry_rate - self.avg_retry_rate;
            let scaled = (current as f64 * (1.0 - delta)).floor() as usize;
            return scaled.clamp(1, current);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use test_case::test_case;

    fn thresholds(max: usize) -> PartitionScopeThresholds {
        PartitionScopeThresholds::new(
            "0",
            &BulkExecutionOptions::default().with_max_micro_batch_size(max),
        )
    }

    #[test_case(100, 100)]
    #[test_case(5, 5)]
    #[test_case(1, 1)]
    #[test_case(500, 100)]
    fn initial_size(max: usize, want: usize) {
        let t = thresholds(max);
        assert_eq!(t.target_micro_batch_size_snapshot(), want);
        assert_eq!(t.max_micro_batch_size(), want);
        assert_eq!(t.partition_key_range_id(), "0");
    }

    #[test]
    fn retries_shrink() {
        let t = thresholds(100);
        t.record_enqueued_retry();
        assert_eq!(t.target_micro_batch_size_snapshot(), 15);
        t.record_enqueued_retry();
        assert_eq!(t.target_micro_batch_size_snapshot(), 2);
        t.record_enqueued_retry();
        assert_eq!(t.target_micro_batch_size_snapshot(), 1);
        t.record_enqueued_retry();
        assert_eq!(t.target_micro_batch_size_snapshot(), 1);
    }

    #[test]
    fn successes_grow() {
        let t = thresholds(100);
        for _ in 0..3 {
            t.record_enqueued_retry();
        }
        assert_eq!(t.target_micro_batch_size_snapshot(), 1);
        let mut sizes = Vec::new();
        for _ in 0..10 {
            t.record_successful_operation();
            sizes.push(t.target_micro_batch_size_snapshot());
        }
        assert_eq!(sizes, vec![2, 4, 8, 16, 31, 46, 61, 76, 91, 100]);
    }

    #[test]
    fn small_maximum_grows() {
        let t = thresholds(5);
        for _ in 0..10 {
            t.record_enqueued_retry();
        }
        assert_eq!(t.target_micro_batch_size_snapshot(), 1);
        for _ in 0..10 {
            t.record_successful_operation();
        }
        assert_eq!(t.target_micro_batch_size_snapshot(), 5);
    }

    #[test]
    fn mixed_rates_hold_steady() {
        let t = thresholds(100);
        // Retry rate between the targets after warm up: no change.
        for i in 0..2000 {
            if i % 7 == 0 {
                t.record_enqueued_retry();
            } else {
                t.record_successful_operation();
            }
        }
        let size = t.target_micro_batch_size_snapshot();
        assert!((1..=100).contains(&size), "{size}");
        assert_eq!(t.total_operation_count(), 2000);
    }

    #[test]
    fn monotonic_under_random_sequences() {
        let mut rng = rand::rng();
        for max in [1, 5, 37, 100] {
            let t = thresholds(max);
            for _ in 0..5_000 {
                let before = t.target_micro_batch_size_snapshot();
                if rng.random_bool(0.3) {
                    t.record_enqueued_retry();
                    let after = t.target_micro_batch_size_snapshot();
                    assert!(after <= before, "retry grew {before} -> {after}");
                    assert!(after >= 1, "{after}");
                } else {
                    t.record_successful_operation();
                    let after = t.target_micro_batch_size_snapshot();
                    assert!(after >= before, "success shrank {before} -> {after}");
                    assert!(after <= max.min(100), "{after} > {max}");
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_stay_in_range() -> anyhow::Result<()> {
        let t = std::sync::Arc::new(thresholds(100));
        let mut tasks = Vec::new();
        for i in 0..8 {
            let t = t.clone();
            tasks.push(tokio::spawn(async move {
                for j in 0..1_000 {
                    if (i + j) % 3 == 0 {
                        t.record_enqueued_retry();
                    } else {
                        t.record_successful_operation();
                    }
                    let size = t.target_micro_batch_size_snapshot();
                    assert!((1..=100).contains(&size), "{size}");
                }
            }));
        }
        for task in tasks {
            task.await?;
        }
        assert_eq!(t.total_operation_count(), 8_000);
        Ok(())
    }
}
