//! Runner configuration: `balance.toml` with built-in defaults.
//!
//! Every field is optional in the file; CLI flags override whatever the
//! file provides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RunnerError};
use crate::invoker::SimulatorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Simulator binary to invoke.
    pub simulator: PathBuf,

    pub workers: usize,
    pub total_runs: u64,
    pub turns_per_run: u32,

    /// 0 = let the simulator derive map size from the player count.
    pub map_rings: u32,
    pub players: u32,

    /// Parallel sessions start high to stay clear of sequential-test seeds.
    pub base_seed: u64,

    pub timeout_secs: u64,

    /// A score below this counts as a collapse.
    pub collapse_floor: i64,

    pub expected_entities: usize,

    /// Where the batch artifact lands.
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            simulator: PathBuf::from("tests/balance/run_simulation"),
            workers: 8,
            total_runs: 200,
            turns_per_run: 100,
            map_rings: 0,
            players: 4,
            base_seed: 2000,
            timeout_secs: 300,
            collapse_floor: 0,
            expected_entities: 4,
            output_dir: PathBuf::from("balance_results"),
        }
    }
}

impl RunnerConfig {
    /// Parse a `balance.toml` file.
    pub fn load(path: &Path) -> Result<RunnerConfig> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RunnerError::Config(format!("{}: {e}", path.display())))?;
        let config: RunnerConfig = toml::from_str(&text)
            .map_err(|e| RunnerError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "runner config loaded");
        Ok(config)
    }

    /// Load `path` when given, fall back to defaults when it is absent.
    pub fn load_or_default(path: Option<&Path>) -> Result<RunnerConfig> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => Err(RunnerError::Config(format!(
                "config file not found: {}",
                p.display()
            ))),
            None => Ok(RunnerConfig::default()),
        }
    }

    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            binary: self.simulator.clone(),
            turn_limit: self.turns_per_run,
            map_rings: self.map_rings,
            players: self.players,
            timeout: Duration::from_secs(self.timeout_secs),
            expected_entities: self.expected_entities,
            results_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_no_file() {
        let config = RunnerConfig::load_or_default(None).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.base_seed, 2000);
        assert_eq!(config.collapse_floor, 0);
    }

    #[test]
    fn test_partial_file_fills_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("balance.toml");
        std::fs::write(&path, "workers = 4\ntotal_runs = 20\n").unwrap();

        let config = RunnerConfig::load(&path).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.total_runs, 20);
        // untouched fields keep defaults
        assert_eq!(config.turns_per_run, 100);
        assert_eq!(config.timeout_secs, 300);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("balance.toml");
        std::fs::write(&path, "wokrers = 4\n").unwrap();

        assert!(matches!(
            RunnerConfig::load(&path),
            Err(RunnerError::Config(_))
        ));
    }

    #[test]
    fn test_named_but_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            RunnerConfig::load_or_default(Some(&missing)),
            Err(RunnerError::Config(_))
        ));
    }

    #[test]
    fn test_simulator_config_mapping() {
        let mut config = RunnerConfig::default();
        config.players = 6;
        config.timeout_secs = 60;

        let sim = config.simulator_config();
        assert_eq!(sim.players, 6);
        assert_eq!(sim.timeout, Duration::from_secs(60));
        assert_eq!(sim.expected_entities, 4);
    }
}
