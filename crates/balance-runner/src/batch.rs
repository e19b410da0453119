//! Sequential batch worker: one contiguous seed range, one invoker.

use std::sync::Arc;

use tracing::{info, warn};

use crate::invoker::{RunInvoker, RunResult};

/// Emit a progress marker every this many runs.
const PROGRESS_INTERVAL: u64 = 10;

/// Run `count` consecutive seeds starting at `seed_start`, strictly in
/// ascending order.
///
/// Every result — success or failure — is appended; an individual run
/// failure never aborts the rest of the batch.
pub async fn run_batch(
    invoker: Arc<dyn RunInvoker>,
    batch_id: usize,
    seed_start: u64,
    count: u64,
) -> Vec<RunResult> {
    info!(
        batch = batch_id,
        seed_start = seed_start,
        seed_end = seed_start + count.saturating_sub(1),
        runs = count,
        "starting batch"
    );

    let mut results = Vec::with_capacity(count as usize);
    for i in 0..count {
        let seed = seed_start + i;
        let result = invoker.invoke(seed).await;
        if !result.success {
            warn!(
                batch = batch_id,
                seed = seed,
                reason = result.reason.as_deref().unwrap_or("unknown"),
                "run failed"
            );
        }
        results.push(result);

        if (i + 1) % PROGRESS_INTERVAL == 0 {
            info!(batch = batch_id, completed = i + 1, total = count, "batch progress");
        }
    }

    info!(batch = batch_id, runs = results.len(), "batch complete");
    results
}
