//! Batch summary artifact: the one persisted output of a session.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::invoker::RunResult;
use crate::orchestrator::{BatchOutcome, BatchSummary};

/// Session metadata recorded alongside the statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub workers: usize,
    pub runs_per_worker: u64,
    pub total_runs: u64,
    pub turns_per_run: u32,
    pub elapsed_seconds: f64,
}

/// Serialized once per orchestration session, then the session state is
/// discarded. The raw result list stays in for auditability.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchArtifact {
    pub metadata: ArtifactMetadata,
    pub statistics: BatchSummary,
    pub raw_results: Vec<RunResult>,
}

impl BatchArtifact {
    pub fn from_outcome(outcome: BatchOutcome, turns_per_run: u32) -> Self {
        BatchArtifact {
            metadata: ArtifactMetadata {
                timestamp: Utc::now(),
                session_id: Uuid::new_v4(),
                workers: outcome.plan.workers(),
                runs_per_worker: outcome.plan.runs_per_worker(),
                total_runs: outcome.plan.total_runs,
                turns_per_run,
                elapsed_seconds: outcome.elapsed_seconds,
            },
            statistics: outcome.summary,
            raw_results: outcome.results,
        }
    }

    /// Write `parallel_test_<timestamp>.json` under `dir`, creating the
    /// directory as needed. Returns the written path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let name = format!(
            "parallel_test_{}.json",
            self.metadata.timestamp.format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "batch artifact written");
        Ok(path)
    }
}
