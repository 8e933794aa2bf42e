//! Bounded-concurrency batch processing of planned transitions.
//!
//! Candidates are cut into consecutive chunks of `batch_size`. Items inside a
//! chunk run as concurrent tokio tasks (start times staggered by
//! `item_stagger`); chunks run one after another with `inter_batch_delay`
//! between them. That keeps the number of in-flight writes against the
//! database at or below `batch_size`.
//!
//! Dropping a run (for example on job timeout) aborts the item tasks still in
//! flight.
//!
//! There are no retries inside a run. A failed item stays in its old status,
//! stays eligible, and is picked up again by the next scheduled run.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::eligibility::DEFAULT_MAX_ITEMS;
use crate::executor::{PlannedTransition, StatusTransitionResult};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub item_stagger: Duration,
    pub max_items: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            batch_size: 10,
            inter_batch_delay: Duration::from_millis(1_000),
            item_stagger: Duration::from_millis(100),
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    /// Run `handler` over every candidate (after truncation to `max_items`).
    ///
    /// Always returns exactly one result per processed candidate, in input
    /// order. A handler that panics yields a failed result for its item and
    /// does not disturb the rest of the chunk.
    pub async fn run<F, Fut>(
        &self,
        mut candidates: Vec<PlannedTransition>,
        handler: F,
    ) -> Vec<StatusTransitionResult>
    where
        F: Fn(PlannedTransition) -> Fut,
        Fut: Future<Output = StatusTransitionResult> + Send + 'static,
    {
        candidates.truncate(self.config.max_items);
        let batch_size = self.config.batch_size.max(1);
        let total_batches = candidates.len().div_ceil(batch_size);
        let mut results = Vec::with_capacity(candidates.len());

        for (index, chunk) in candidates.chunks(batch_size).enumerate() {
            if index > 0 && !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
            debug!(
                batch = index + 1,
                total_batches,
                items = chunk.len(),
                "Processing batch"
            );

            let mut handles = AbortOnDrop(
                chunk
                    .iter()
                    .enumerate()
                    .map(|(position, planned)| {
                        let stagger = self.config.item_stagger * position as u32;
                        let task = handler(planned.clone());
                        tokio::spawn(async move {
                            if !stagger.is_zero() {
                                tokio::time::sleep(stagger).await;
                            }
                            task.await
                        })
                    })
                    .collect(),
            );

            let joined = join_all(handles.0.iter_mut()).await;
            for (planned, joined) in chunk.iter().zip(joined) {
                let result = joined.unwrap_or_else(|e| {
                    error!(campaign_id = planned.campaign.id, "Transition task aborted: {e}");
                    StatusTransitionResult::failed(planned, format!("task aborted: {e}"))
                });
                results.push(result);
            }
        }

        results
    }
}

/// Spawned item tasks, aborted if the owning run is dropped mid-chunk.
struct AbortOnDrop<T>(Vec<JoinHandle<T>>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;
    use crate::campaign::testing::{campaign, date};
    use crate::executor::Transition;
    use crate::status::{CampaignStatus, TransitionReason};

    fn candidates(n: i64) -> Vec<PlannedTransition> {
        (1..=n)
            .map(|id| PlannedTransition {
                campaign: campaign(id, CampaignStatus::Active, date(2024, 5, 1), date(2024, 5, 31)),
                transition: Transition::to(
                    CampaignStatus::Processing,
                    TransitionReason::FundraisingEndDateReached,
                ),
            })
            .collect()
    }

    fn runner(batch_size: usize, max_items: usize) -> BatchRunner {
        BatchRunner::new(BatchConfig {
            batch_size,
            inter_batch_delay: Duration::ZERO,
            item_stagger: Duration::ZERO,
            max_items,
        })
    }

    fn ok(planned: PlannedTransition) -> impl Future<Output = StatusTransitionResult> {
        async move { StatusTransitionResult::succeeded(&planned) }
    }

    #[tokio::test]
    async fn result_count_is_min_of_candidates_and_cap() {
        for (n, cap) in [(0, 5), (3, 5), (5, 5), (12, 5), (7, 100)] {
            let results = runner(2, cap).run(candidates(n), ok).await;
            assert_eq!(results.len(), (n as usize).min(cap), "n={n} cap={cap}");
        }
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let results = runner(3, 100).run(candidates(8), ok).await;
        let ids: Vec<i64> = results.iter().map(|r| r.campaign_id).collect();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let results = runner(4, 100)
            .run(candidates(6), |planned| async move {
                match planned.campaign.id {
                    2 => StatusTransitionResult::failed(&planned, "write failed"),
                    5 => panic!("boom"),
                    _ => StatusTransitionResult::succeeded(&planned),
                }
            })
            .await;

        assert_eq!(results.len(), 6);
        let failed: Vec<i64> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.campaign_id)
            .collect();
        assert_eq!(failed, vec![2, 5]);
        assert!(results[4].error.as_deref().unwrap().contains("task aborted"));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_batch_size() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = runner(3, 100)
            .run(candidates(10), |planned| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    StatusTransitionResult::succeeded(&planned)
                }
            })
            .await;

        assert_eq!(results.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_run_aborts_in_flight_items() {
        let finished = Arc::new(AtomicUsize::new(0));
        let runner = runner(4, 100);
        let run = runner.run(candidates(3), |planned| {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                StatusTransitionResult::succeeded(&planned)
            }
        });

        assert!(tokio::time::timeout(Duration::from_secs(1), run).await.is_err());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_apply_between_batches_and_items() {
        let runner = BatchRunner::new(BatchConfig {
            batch_size: 2,
            inter_batch_delay: Duration::from_secs(1),
            item_stagger: Duration::from_millis(100),
            max_items: 100,
        });

        let started = Instant::now();
        runner.run(candidates(5), ok).await;

        // Three batches → two pauses; the widest batch staggers its second item by 100ms.
        assert_eq!(started.elapsed(), Duration::from_millis(2 * 1_000 + 2 * 100));
    }
}
