//! Parallel batch orchestration: partition seeds, dispatch workers,
//! merge results.
//!
//! Workers share no mutable state; each owns a sequential loop over its
//! seed range, and the only synchronization point is the join after
//! dispatch. Merge treats completed results as an unordered multiset
//! keyed by seed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::batch::run_batch;
use crate::error::{Result, RunnerError};
use crate::invoker::{RunInvoker, RunResult};

/// One worker's contiguous seed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchRange {
    pub batch_id: usize,
    pub seed_start: u64,
    pub count: u64,
}

/// Deterministic partition of a run request into worker batches.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPlan {
    pub total_runs: u64,
    pub base_seed: u64,
    pub batches: Vec<BatchRange>,
}

impl BatchPlan {
    /// Partition `total_runs` into contiguous, non-overlapping ranges:
    /// worker `i` owns `[base + i*chunk, base + (i+1)*chunk)`, with any
    /// non-divisible remainder folded into the final batch.
    ///
    /// Non-overlap is what lets concurrent workers share the simulator's
    /// per-seed output paths without collisions.
    pub fn partition(total_runs: u64, workers: usize, base_seed: u64) -> Result<BatchPlan> {
        if total_runs == 0 {
            return Err(RunnerError::InvalidPlan("total_runs must be > 0".to_string()));
        }
        if workers == 0 {
            return Err(RunnerError::InvalidPlan("workers must be > 0".to_string()));
        }

        let workers = (workers as u64).min(total_runs);
        let chunk = total_runs / workers;

        let mut batches = Vec::with_capacity(workers as usize);
        for i in 0..workers {
            let seed_start = base_seed + i * chunk;
            let count = if i == workers - 1 {
                // Last worker absorbs the remainder.
                total_runs - i * chunk
            } else {
                chunk
            };
            batches.push(BatchRange {
                batch_id: i as usize + 1,
                seed_start,
                count,
            });
        }

        Ok(BatchPlan {
            total_runs,
            base_seed,
            batches,
        })
    }

    pub fn workers(&self) -> usize {
        self.batches.len()
    }

    /// Runs per worker before the remainder fold (for artifact metadata).
    pub fn runs_per_worker(&self) -> u64 {
        self.batches.first().map(|b| b.count).unwrap_or(0)
    }
}

/// Aggregated statistics over the successful runs of a batch session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub runs_completed: u64,
    pub runs_failed: u64,

    /// Runs whose top score was shared; they record no winner.
    pub drawn_runs: u64,

    pub win_counts: BTreeMap<String, u64>,
    pub score_totals: BTreeMap<String, i64>,
    pub collapse_counts: BTreeMap<String, u64>,
}

/// Fold run results into a summary.
///
/// The winner of a run is the house with the strictly-highest score; a
/// tied top score increments `drawn_runs` instead. A house collapses
/// when its score falls below `collapse_floor`. Failed runs are counted
/// but contribute nothing to the per-house aggregates.
pub fn summarize(results: &[RunResult], collapse_floor: i64) -> BatchSummary {
    let mut summary = BatchSummary::default();

    for result in results {
        if !result.success {
            summary.runs_failed += 1;
            continue;
        }
        summary.runs_completed += 1;

        let top = result.scores.values().max().copied();
        if let Some(top) = top {
            let mut leaders = result.scores.iter().filter(|(_, s)| **s == top);
            let leader = leaders.next().map(|(h, _)| h.clone());
            if leaders.next().is_some() {
                summary.drawn_runs += 1;
            } else if let Some(winner) = leader {
                *summary.win_counts.entry(winner).or_default() += 1;
            }
        }

        for (house, score) in &result.scores {
            *summary.score_totals.entry(house.clone()).or_default() += score;
            if *score < collapse_floor {
                *summary.collapse_counts.entry(house.clone()).or_default() += 1;
            }
        }
    }

    summary
}

/// Everything a batch session produced, before artifact serialization.
#[derive(Debug)]
pub struct BatchOutcome {
    pub plan: BatchPlan,
    pub summary: BatchSummary,

    /// Every run result, failures included, in batch order.
    pub results: Vec<RunResult>,

    pub elapsed_seconds: f64,
}

/// Dispatch one worker task per batch and merge the outputs.
///
/// Always completes and always yields a summary, even when every run
/// failed. A worker task that panics drops only its own batch from the
/// result set; the session still summarizes the rest.
pub async fn run_parallel(
    invoker: Arc<dyn RunInvoker>,
    plan: BatchPlan,
    collapse_floor: i64,
) -> BatchOutcome {
    let start = Instant::now();
    info!(
        workers = plan.workers(),
        total_runs = plan.total_runs,
        base_seed = plan.base_seed,
        "starting parallel batch session"
    );

    let mut tasks: Vec<JoinHandle<Vec<RunResult>>> = Vec::with_capacity(plan.batches.len());
    for range in &plan.batches {
        let invoker = Arc::clone(&invoker);
        let range = *range;
        tasks.push(tokio::spawn(async move {
            run_batch(invoker, range.batch_id, range.seed_start, range.count).await
        }));
    }

    // Sole synchronization point: wait for every worker.
    let mut results = Vec::with_capacity(plan.total_runs as usize);
    for (task, range) in tasks.into_iter().zip(&plan.batches) {
        match task.await {
            Ok(batch_results) => results.extend(batch_results),
            Err(e) => warn!(batch = range.batch_id, error = %e, "worker task lost"),
        }
    }

    let summary = summarize(&results, collapse_floor);
    let elapsed_seconds = start.elapsed().as_secs_f64();

    info!(
        completed = summary.runs_completed,
        failed = summary.runs_failed,
        elapsed_seconds = elapsed_seconds,
        "parallel batch session complete"
    );

    BatchOutcome {
        plan,
        summary,
        results,
        elapsed_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn scores(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(h, s)| (h.to_string(), *s)).collect()
    }

    #[test]
    fn test_partition_even_split() {
        let plan = BatchPlan::partition(20, 4, 2000).unwrap();
        assert_eq!(plan.batches.len(), 4);
        assert_eq!(
            plan.batches,
            vec![
                BatchRange { batch_id: 1, seed_start: 2000, count: 5 },
                BatchRange { batch_id: 2, seed_start: 2005, count: 5 },
                BatchRange { batch_id: 3, seed_start: 2010, count: 5 },
                BatchRange { batch_id: 4, seed_start: 2015, count: 5 },
            ]
        );
    }

    #[test]
    fn test_partition_remainder_folds_into_last() {
        let plan = BatchPlan::partition(10, 4, 0).unwrap();
        let counts: Vec<u64> = plan.batches.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 2, 2, 4]);

        // contiguous, non-overlapping, exactly total_runs seeds
        let mut seeds = Vec::new();
        for b in &plan.batches {
            for i in 0..b.count {
                seeds.push(b.seed_start + i);
            }
        }
        assert_eq!(seeds, (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_partition_more_workers_than_runs() {
        let plan = BatchPlan::partition(3, 8, 100).unwrap();
        assert_eq!(plan.batches.len(), 3);
        assert!(plan.batches.iter().all(|b| b.count == 1));
    }

    #[test]
    fn test_partition_rejects_degenerate_input() {
        assert!(matches!(
            BatchPlan::partition(0, 4, 0),
            Err(RunnerError::InvalidPlan(_))
        ));
        assert!(matches!(
            BatchPlan::partition(10, 0, 0),
            Err(RunnerError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_summarize_unique_winner() {
        let results = vec![RunResult::completed(
            1,
            scores(&[("atreides", 198), ("ordos", 245), ("corrino", 150)]),
            10,
        )];
        let summary = summarize(&results, 0);

        assert_eq!(summary.runs_completed, 1);
        assert_eq!(summary.win_counts.get("ordos"), Some(&1));
        assert_eq!(summary.win_counts.get("atreides"), None);
        assert_eq!(summary.drawn_runs, 0);
    }

    #[test]
    fn test_summarize_tied_top_score_is_a_draw() {
        let results = vec![RunResult::completed(
            1,
            scores(&[("atreides", 245), ("ordos", 245), ("corrino", 150)]),
            10,
        )];
        let summary = summarize(&results, 0);

        assert_eq!(summary.drawn_runs, 1);
        assert!(summary.win_counts.is_empty());
        // score totals still accumulate
        assert_eq!(summary.score_totals.get("ordos"), Some(&245));
    }

    #[test]
    fn test_summarize_collapse_below_floor() {
        let results = vec![
            RunResult::completed(1, scores(&[("ordos", 50), ("harkonnen", -12)]), 10),
            RunResult::completed(2, scores(&[("ordos", 60), ("harkonnen", 3)]), 10),
        ];
        let summary = summarize(&results, 0);

        assert_eq!(summary.collapse_counts.get("harkonnen"), Some(&1));
        assert_eq!(summary.collapse_counts.get("ordos"), None);
        assert_eq!(summary.score_totals.get("harkonnen"), Some(&-9));
    }

    #[test]
    fn test_summarize_failures_excluded_from_aggregates() {
        let results = vec![
            RunResult::completed(1, scores(&[("ordos", 10), ("atreides", 5)]), 10),
            RunResult::failed(2, "timed out after 300s", 300_000),
        ];
        let summary = summarize(&results, 0);

        assert_eq!(summary.runs_completed, 1);
        assert_eq!(summary.runs_failed, 1);
        assert_eq!(summary.score_totals.get("ordos"), Some(&10));
    }

    #[test]
    fn test_summarize_all_failures_still_summarizes() {
        let results = vec![
            RunResult::failed(1, "exited with code 1", 5),
            RunResult::failed(2, "exited with code 1", 5),
        ];
        let summary = summarize(&results, 0);

        assert_eq!(summary.runs_completed, 0);
        assert_eq!(summary.runs_failed, 2);
        assert!(summary.win_counts.is_empty());
    }
}
