//! Single simulator invocation: spawn, capture, parse.
//!
//! `invoke` never returns an error. A pathological seed must never take
//! down a batch, so every failure mode — spawn error, timeout, non-zero
//! exit, unparseable output — is folded into a failed [`RunResult`] with
//! a reason string.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// Outcome of one simulator run for one seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub seed: u64,

    /// Whether the run produced a usable ranking.
    pub success: bool,

    /// Final score per house; empty when the run failed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<String, i64>,

    /// Failure reason; absent when the run succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub duration_ms: u64,
}

impl RunResult {
    pub fn completed(seed: u64, scores: BTreeMap<String, i64>, duration_ms: u64) -> Self {
        Self {
            seed,
            success: true,
            scores,
            reason: None,
            duration_ms,
        }
    }

    pub fn failed(seed: u64, reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            seed,
            success: false,
            scores: BTreeMap::new(),
            reason: Some(reason.into()),
            duration_ms,
        }
    }
}

/// Result of parsing simulator output.
///
/// Parse failure is a first-class value, not an exception to catch.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Rankings(BTreeMap<String, i64>),
    Failure { reason: String },
}

/// Parse the `Final Rankings:` stdout block.
///
/// The contract is one `N. <house>: <score> ...` line per entity after
/// the header; fewer than `expected` entities is a failure.
pub fn parse_rankings(stdout: &str, expected: usize) -> ParseOutcome {
    // e.g. "  1. house-ordos: 245 prestige"
    let line_re = Regex::new(r"^\s*\d+\.\s*(.+?):\s*(-?\d+)").expect("static regex");

    let mut rankings = BTreeMap::new();
    let mut in_block = false;

    for line in stdout.lines() {
        if line.contains("Final Rankings:") {
            in_block = true;
            continue;
        }
        if !in_block {
            continue;
        }
        if let Some(caps) = line_re.captures(line) {
            let house = caps[1].trim().to_string();
            let score: i64 = match caps[2].parse() {
                Ok(s) => s,
                Err(_) => {
                    return ParseOutcome::Failure {
                        reason: format!("unparseable score in ranking line: {line:?}"),
                    }
                }
            };
            rankings.insert(house, score);
            if rankings.len() == expected {
                return ParseOutcome::Rankings(rankings);
            }
        }
    }

    if !in_block {
        ParseOutcome::Failure {
            reason: "no 'Final Rankings:' block in output".to_string(),
        }
    } else {
        ParseOutcome::Failure {
            reason: format!("ranking block ended after {} of {expected} entities", rankings.len()),
        }
    }
}

/// Read the simulator's JSON results file variant.
///
/// The entity→score map lives under the `rankings` key.
fn parse_results_file(path: &std::path::Path, expected: usize) -> ParseOutcome {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            return ParseOutcome::Failure {
                reason: format!("results file {}: {e}", path.display()),
            }
        }
    };
    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            return ParseOutcome::Failure {
                reason: format!("results file {}: {e}", path.display()),
            }
        }
    };
    let Some(rankings) = value.get("rankings").and_then(|v| v.as_object()) else {
        return ParseOutcome::Failure {
            reason: format!("results file {} has no 'rankings' map", path.display()),
        };
    };

    let mut scores = BTreeMap::new();
    for (house, score) in rankings {
        match score.as_i64() {
            Some(s) => {
                scores.insert(house.clone(), s);
            }
            None => {
                return ParseOutcome::Failure {
                    reason: format!("non-integer score for '{house}' in {}", path.display()),
                }
            }
        }
    }
    if scores.len() < expected {
        return ParseOutcome::Failure {
            reason: format!("results file holds {} of {expected} entities", scores.len()),
        };
    }
    ParseOutcome::Rankings(scores)
}

/// How to invoke the external simulator binary.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub binary: PathBuf,

    /// Turns per run, first positional argument.
    pub turn_limit: u32,

    /// Hex rings for map size; 0 lets the simulator derive it from the
    /// player count and is omitted from the command line unless the
    /// player count forces it.
    pub map_rings: u32,

    /// Player count; appended only when non-default.
    pub players: u32,

    pub timeout: Duration,

    /// Entities every run must rank.
    pub expected_entities: usize,

    /// When set, read `result_<seed>.json` from this directory instead of
    /// parsing stdout.
    pub results_dir: Option<PathBuf>,
}

impl SimulatorConfig {
    pub fn new(binary: PathBuf, turn_limit: u32) -> Self {
        Self {
            binary,
            turn_limit,
            map_rings: 0,
            players: 4,
            timeout: Duration::from_secs(300),
            expected_entities: 4,
            results_dir: None,
        }
    }

    /// Positional arguments for one seed: `<turns> <seed> [rings] [players]`.
    fn args(&self, seed: u64) -> Vec<String> {
        let mut args = vec![self.turn_limit.to_string(), seed.to_string()];
        if self.map_rings > 0 {
            args.push(self.map_rings.to_string());
        }
        if self.players != 4 {
            if self.map_rings == 0 {
                args.push("0".to_string());
            }
            args.push(self.players.to_string());
        }
        args
    }
}

/// Seam between batch workers and the external binary; test stubs
/// implement this to exercise orchestration without a simulator.
#[async_trait]
pub trait RunInvoker: Send + Sync {
    async fn invoke(&self, seed: u64) -> RunResult;
}

/// Drives the real simulator subprocess.
pub struct SimulatorInvoker {
    config: SimulatorConfig,
}

impl SimulatorInvoker {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RunInvoker for SimulatorInvoker {
    async fn invoke(&self, seed: u64) -> RunResult {
        let start = Instant::now();
        let elapsed_ms = |start: Instant| start.elapsed().as_millis() as u64;

        let child = Command::new(&self.config.binary)
            .args(self.config.args(seed))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => return RunResult::failed(seed, format!("spawn failed: {e}"), elapsed_ms(start)),
        };

        // kill_on_drop reaps the subprocess when the timeout wins the race.
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return RunResult::failed(seed, format!("wait failed: {e}"), elapsed_ms(start)),
            Err(_) => {
                return RunResult::failed(
                    seed,
                    format!("timed out after {}s", self.config.timeout.as_secs()),
                    elapsed_ms(start),
                )
            }
        };

        // Non-zero exit is unconditional failure, partial output or not.
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return RunResult::failed(seed, format!("exited with code {code}"), elapsed_ms(start));
        }

        let outcome = match &self.config.results_dir {
            Some(dir) => parse_results_file(
                &dir.join(format!("result_{seed}.json")),
                self.config.expected_entities,
            ),
            None => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                parse_rankings(&stdout, self.config.expected_entities)
            }
        };

        match outcome {
            ParseOutcome::Rankings(scores) => {
                debug!(seed = seed, "run complete");
                RunResult::completed(seed, scores, elapsed_ms(start))
            }
            ParseOutcome::Failure { reason } => RunResult::failed(seed, reason, elapsed_ms(start)),
        }
    }
}
