//! Phase gap analysis: a fixed battery of named balance checks plus a
//! cross-cutting anomaly scan.
//!
//! Every check computes a rate or mean from aggregate sums over the table
//! and grades it against a hard-coded target range. Checks degrade
//! independently: a missing required column turns that one check into
//! `not_implemented`, the rest of the battery is unaffected.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::table::DiagnosticTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    CriticalFail,
    NotImplemented,
}

/// One named, independently-graded balance rule.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseCheck {
    pub name: String,
    pub status: CheckStatus,
    /// Measured values behind the grade, keyed by metric name.
    pub measured: BTreeMap<String, f64>,
    /// Human-readable target range.
    pub target: String,
    pub note: Option<String>,
}

impl PhaseCheck {
    fn not_implemented(name: &str, target: &str, missing: &str) -> PhaseCheck {
        PhaseCheck {
            name: name.to_string(),
            status: CheckStatus::NotImplemented,
            measured: BTreeMap::new(),
            target: target.to_string(),
            note: Some(format!("column '{missing}' not found in diagnostics")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Error,
    Warning,
}

/// A cross-cutting irregularity found outside the named check battery.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyEvent {
    pub kind: String,
    pub severity: AnomalySeverity,
    pub description: String,
    /// Count or rate, depending on the rule.
    pub magnitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    AllSystemsNominal,
    IssuesFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapSummary {
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub checks_not_implemented: usize,
    pub anomaly_errors: usize,
    pub anomaly_warnings: usize,
}

/// Full gap analysis result.
#[derive(Debug, Clone, Serialize)]
pub struct GapReport {
    pub checks: Vec<PhaseCheck>,
    pub anomalies: Vec<AnomalyEvent>,
    pub summary: GapSummary,
    pub overall: OverallStatus,
}

/// Run the full check battery and anomaly scan.
///
/// The report always enumerates every configured check by name, however
/// many degraded to `not_implemented`.
pub fn analyze(table: &DiagnosticTable) -> GapReport {
    let checks = vec![
        check_fighter_carrier(table),
        check_scouts(table),
        check_espionage(table),
        check_defense(table),
        check_eli_mesh(table),
    ];
    let anomalies = scan_anomalies(table);

    let summary = GapSummary {
        checks_run: checks.len(),
        checks_passed: count_status(&checks, CheckStatus::Pass),
        checks_failed: count_status(&checks, CheckStatus::Fail)
            + count_status(&checks, CheckStatus::CriticalFail),
        checks_not_implemented: count_status(&checks, CheckStatus::NotImplemented),
        anomaly_errors: anomalies
            .iter()
            .filter(|a| a.severity == AnomalySeverity::Error)
            .count(),
        anomaly_warnings: anomalies
            .iter()
            .filter(|a| a.severity == AnomalySeverity::Warning)
            .count(),
    };

    // Derived, never set independently.
    let overall = if summary.checks_failed > 0 || summary.anomaly_errors > 0 {
        OverallStatus::IssuesFound
    } else {
        OverallStatus::AllSystemsNominal
    };

    GapReport {
        checks,
        anomalies,
        summary,
        overall,
    }
}

fn count_status(checks: &[PhaseCheck], status: CheckStatus) -> usize {
    checks.iter().filter(|c| c.status == status).count()
}

// ---------------------------------------------------------------------------
// Named checks
// ---------------------------------------------------------------------------

/// Fighters must live on carriers: no capacity violations, carriers kept
/// busy auto-loading.
fn check_fighter_carrier(table: &DiagnosticTable) -> PhaseCheck {
    const NAME: &str = "fighter_carrier";
    const TARGET: &str = "0% capacity violations, <5% idle carriers";

    for required in ["capacity_violations", "idle_carriers", "total_carriers", "total_fighters"] {
        if !table.has_column(required) {
            return PhaseCheck::not_implemented(NAME, TARGET, required);
        }
    }

    let violation_rate = rate_of_rows_where(table, "capacity_violations", |v| v > 0.0);
    let idle_rate = mean_ratio(table, "idle_carriers", "total_carriers") * 100.0;
    let avg_fighters = column_mean(table, "total_fighters");
    let avg_carriers = column_mean(table, "total_carriers");

    let status = if violation_rate < 1.0 && idle_rate < 10.0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };

    PhaseCheck {
        name: NAME.to_string(),
        status,
        measured: BTreeMap::from([
            ("capacity_violation_rate".to_string(), round2(violation_rate)),
            ("idle_carrier_rate".to_string(), round2(idle_rate)),
            ("avg_fighters_per_house".to_string(), round2(avg_fighters)),
            ("avg_carriers_per_house".to_string(), round2(avg_carriers)),
        ]),
        target: TARGET.to_string(),
        note: None,
    }
}

/// Scout fleets should reach the 5-7 range for mesh and espionage duty.
fn check_scouts(table: &DiagnosticTable) -> PhaseCheck {
    const NAME: &str = "scouts";
    const TARGET: &str = "5-7 scouts per house";

    if !table.has_column("scout_count") {
        return PhaseCheck::not_implemented(NAME, TARGET, "scout_count");
    }

    let avg_scouts = column_mean(table, "scout_count");
    let utilization = rate_of_rows_where(table, "scout_count", |v| v >= 5.0);

    let status = if avg_scouts >= 3.0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };

    PhaseCheck {
        name: NAME.to_string(),
        status,
        measured: BTreeMap::from([
            ("avg_scouts_per_house".to_string(), round2(avg_scouts)),
            ("utilization_5plus".to_string(), round2(utilization)),
        ]),
        target: TARGET.to_string(),
        note: None,
    }
}

/// Espionage must actually be used; total silence is a critical failure.
fn check_espionage(table: &DiagnosticTable) -> PhaseCheck {
    const NAME: &str = "espionage";
    const TARGET: &str = "100% of runs use espionage";

    for required in ["spy_planet", "hack_starbase", "total_espionage"] {
        if !table.has_column(required) {
            return PhaseCheck::not_implemented(NAME, TARGET, required);
        }
    }

    let spy_planet = column_sum(table, "spy_planet");
    let hack_starbase = column_sum(table, "hack_starbase");
    let total = column_sum(table, "total_espionage");
    let usage_rate = rate_of_rows_where(table, "total_espionage", |v| v > 0.0);

    let status = if total > 0.0 {
        CheckStatus::Pass
    } else {
        CheckStatus::CriticalFail
    };

    PhaseCheck {
        name: NAME.to_string(),
        status,
        measured: BTreeMap::from([
            ("spy_planet_missions".to_string(), spy_planet),
            ("hack_starbase_missions".to_string(), hack_starbase),
            ("total_missions".to_string(), total),
            ("usage_rate".to_string(), round2(usage_rate)),
        ]),
        target: TARGET.to_string(),
        note: None,
    }
}

/// Important colonies should carry some defense.
fn check_defense(table: &DiagnosticTable) -> PhaseCheck {
    const NAME: &str = "defense";
    const TARGET: &str = "<40% undefended colonies";

    for required in ["undefended_colonies", "total_colonies"] {
        if !table.has_column(required) {
            return PhaseCheck::not_implemented(NAME, TARGET, required);
        }
    }

    let undefended_rate = mean_ratio(table, "undefended_colonies", "total_colonies") * 100.0;

    let status = if undefended_rate < 50.0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };

    PhaseCheck {
        name: NAME.to_string(),
        status,
        measured: BTreeMap::from([("avg_undefended_rate".to_string(), round2(undefended_rate))]),
        target: TARGET.to_string(),
        note: None,
    }
}

/// Invasions should be covered by a scout ELI mesh.
fn check_eli_mesh(table: &DiagnosticTable) -> PhaseCheck {
    const NAME: &str = "eli_mesh";
    const TARGET: &str = ">80% of invasions with ELI coverage";

    for required in ["invasions_no_eli", "total_invasions"] {
        if !table.has_column(required) {
            return PhaseCheck::not_implemented(NAME, TARGET, required);
        }
    }

    let without_eli = column_sum(table, "invasions_no_eli");
    let total = column_sum(table, "total_invasions");

    if total == 0.0 {
        return PhaseCheck {
            name: NAME.to_string(),
            status: CheckStatus::Pass,
            measured: BTreeMap::from([
                ("invasions_with_eli".to_string(), 0.0),
                ("total_invasions".to_string(), 0.0),
            ]),
            target: TARGET.to_string(),
            note: Some("no invasion data".to_string()),
        };
    }

    let coverage = (1.0 - without_eli / total) * 100.0;
    let status = if coverage > 50.0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };

    PhaseCheck {
        name: NAME.to_string(),
        status,
        measured: BTreeMap::from([
            ("invasions_with_eli".to_string(), round2(coverage)),
            ("total_invasions".to_string(), total),
        ]),
        target: TARGET.to_string(),
        note: None,
    }
}

// ---------------------------------------------------------------------------
// Anomaly scan
// ---------------------------------------------------------------------------

/// Evaluate the fixed anomaly rules. A rule whose input columns are
/// missing is skipped; the scan is best-effort by design.
fn scan_anomalies(table: &DiagnosticTable) -> Vec<AnomalyEvent> {
    let mut anomalies = Vec::new();

    // Treasury hoarding: long streaks of zero spending.
    if table.has_column("zero_spend_turns") {
        let hoarding = count_rows_where(table, "zero_spend_turns", |v| v > 10.0);
        if hoarding > 0 {
            anomalies.push(AnomalyEvent {
                kind: "treasury_hoarding".to_string(),
                severity: AnomalySeverity::Warning,
                description: format!("{hoarding} turns with 10+ consecutive zero-spend turns"),
                magnitude: hoarding as f64,
            });
        }
    }

    // Space combat should sit near a 50% win rate in balanced play.
    if table.has_column("space_wins") && table.has_column("space_losses") {
        let wins = column_sum(table, "space_wins");
        let losses = column_sum(table, "space_losses");
        if wins + losses > 0.0 {
            let win_rate = wins / (wins + losses) * 100.0;
            if !(40.0..=60.0).contains(&win_rate) {
                anomalies.push(AnomalyEvent {
                    kind: "combat_imbalance".to_string(),
                    severity: AnomalySeverity::Warning,
                    description: format!(
                        "space combat win rate {win_rate:.1}% (should be ~50%)"
                    ),
                    magnitude: round2(win_rate),
                });
            }
        }
    }

    // CLK researched but no Raiders built to use it.
    if table.has_column("clk_no_raiders") {
        let count = count_rows_where_bool(table, "clk_no_raiders");
        if count > 0 {
            anomalies.push(AnomalyEvent {
                kind: "clk_no_raiders".to_string(),
                severity: AnomalySeverity::Error,
                description: format!("{count} turns where CLK researched but no Raiders built"),
                magnitude: count as f64,
            });
        }
    }

    // Order rejection rate: the AI should not be spamming invalid commands.
    if table.has_column("invalid_orders") && table.has_column("total_orders") {
        let invalid = column_sum(table, "invalid_orders");
        let total = column_sum(table, "total_orders");
        if total > 0.0 {
            let invalid_rate = invalid / total * 100.0;
            if invalid_rate > 5.0 {
                anomalies.push(AnomalyEvent {
                    kind: "invalid_orders".to_string(),
                    severity: AnomalySeverity::Error,
                    description: format!(
                        "invalid order rate {invalid_rate:.2}% (should be <5%)"
                    ),
                    magnitude: round2(invalid_rate),
                });
            }
        }
    }

    anomalies
}

// ---------------------------------------------------------------------------
// Aggregate helpers
// ---------------------------------------------------------------------------

fn numeric_or_empty(table: &DiagnosticTable, name: &str) -> Vec<Option<f64>> {
    table.numeric(name).unwrap_or_default()
}

fn column_sum(table: &DiagnosticTable, name: &str) -> f64 {
    numeric_or_empty(table, name).iter().flatten().sum()
}

fn column_mean(table: &DiagnosticTable, name: &str) -> f64 {
    let values: Vec<f64> = numeric_or_empty(table, name).into_iter().flatten().collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Percentage of rows where the column satisfies `pred`.
fn rate_of_rows_where(table: &DiagnosticTable, name: &str, pred: impl Fn(f64) -> bool) -> f64 {
    if table.is_empty() {
        return 0.0;
    }
    count_rows_where(table, name, pred) as f64 / table.len() as f64 * 100.0
}

fn count_rows_where(table: &DiagnosticTable, name: &str, pred: impl Fn(f64) -> bool) -> usize {
    numeric_or_empty(table, name)
        .iter()
        .flatten()
        .filter(|v| pred(**v))
        .count()
}

fn count_rows_where_bool(table: &DiagnosticTable, name: &str) -> usize {
    match table.column(name) {
        Some(col) => col
            .iter()
            .flatten()
            .filter(|v| matches!(v.as_bool(), Some(true)))
            .count(),
        None => 0,
    }
}

/// Mean of per-row `numerator / denominator`, zero denominators replaced
/// by one so a row with no denominator contributes a zero-ish rate rather
/// than a NaN.
fn mean_ratio(table: &DiagnosticTable, numerator: &str, denominator: &str) -> f64 {
    let nums = numeric_or_empty(table, numerator);
    let dens = numeric_or_empty(table, denominator);
    let mut ratios = Vec::new();
    for (n, d) in nums.iter().zip(dens.iter()) {
        if let (Some(n), Some(d)) = (n, d) {
            let d = if *d == 0.0 { 1.0 } else { *d };
            ratios.push(n / d);
        }
    }
    if ratios.is_empty() {
        0.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DiagnosticTable;
    use crate::value::Value;

    fn ints(values: &[i64]) -> Vec<Option<Value>> {
        values.iter().map(|v| Some(Value::Int(*v))).collect()
    }

    /// Columns for a clean four-row dataset every check passes on.
    fn healthy_columns() -> Vec<(&'static str, Vec<Option<Value>>)> {
        vec![
            ("capacity_violations", ints(&[0, 0, 0, 0])),
            ("idle_carriers", ints(&[0, 0, 1, 0])),
            ("total_carriers", ints(&[4, 4, 4, 4])),
            ("total_fighters", ints(&[8, 8, 8, 8])),
            ("scout_count", ints(&[5, 6, 5, 7])),
            ("spy_planet", ints(&[1, 2, 0, 1])),
            ("hack_starbase", ints(&[0, 1, 1, 0])),
            ("total_espionage", ints(&[1, 3, 1, 1])),
            ("undefended_colonies", ints(&[1, 0, 1, 0])),
            ("total_colonies", ints(&[5, 5, 5, 5])),
            ("invasions_no_eli", ints(&[0, 0, 0, 0])),
            ("total_invasions", ints(&[1, 2, 0, 1])),
        ]
    }

    #[test]
    fn test_all_checks_pass_on_healthy_data() {
        let table = DiagnosticTable::from_columns(healthy_columns());
        let report = analyze(&table);

        assert_eq!(report.overall, OverallStatus::AllSystemsNominal);
        assert_eq!(report.summary.checks_run, 5);
        assert_eq!(report.summary.checks_passed, 5);
        assert_eq!(report.summary.checks_failed, 0);
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn test_missing_column_is_not_implemented_never_fail() {
        let mut columns = healthy_columns();
        columns.retain(|(name, _)| *name != "scout_count");
        let table = DiagnosticTable::from_columns(columns);
        let report = analyze(&table);

        let scouts = report.checks.iter().find(|c| c.name == "scouts").unwrap();
        assert_eq!(scouts.status, CheckStatus::NotImplemented);
        assert!(scouts.note.as_deref().unwrap().contains("scout_count"));

        // A degraded check alone never flips the overall status.
        assert_eq!(report.overall, OverallStatus::AllSystemsNominal);
        // And the rest of the battery still ran.
        assert_eq!(report.summary.checks_run, 5);
        assert_eq!(report.summary.checks_passed, 4);
    }

    #[test]
    fn test_zero_espionage_is_critical_fail() {
        let mut columns = healthy_columns();
        for (name, cells) in columns.iter_mut() {
            if matches!(*name, "spy_planet" | "hack_starbase" | "total_espionage") {
                *cells = ints(&[0, 0, 0, 0]);
            }
        }
        let table = DiagnosticTable::from_columns(columns);
        let report = analyze(&table);

        let espionage = report.checks.iter().find(|c| c.name == "espionage").unwrap();
        assert_eq!(espionage.status, CheckStatus::CriticalFail);
        assert_eq!(report.overall, OverallStatus::IssuesFound);
    }

    #[test]
    fn test_zero_invasions_passes_with_note() {
        let mut columns = healthy_columns();
        for (name, cells) in columns.iter_mut() {
            if *name == "total_invasions" {
                *cells = ints(&[0, 0, 0, 0]);
            }
        }
        let table = DiagnosticTable::from_columns(columns);
        let report = analyze(&table);

        let eli = report.checks.iter().find(|c| c.name == "eli_mesh").unwrap();
        assert_eq!(eli.status, CheckStatus::Pass);
        assert_eq!(eli.note.as_deref(), Some("no invasion data"));
    }

    #[test]
    fn test_warning_anomaly_does_not_flip_overall() {
        let mut columns = healthy_columns();
        columns.push(("zero_spend_turns", ints(&[12, 0, 0, 15])));
        let table = DiagnosticTable::from_columns(columns);
        let report = analyze(&table);

        assert_eq!(report.summary.anomaly_warnings, 1);
        assert_eq!(report.anomalies[0].kind, "treasury_hoarding");
        assert_eq!(report.anomalies[0].magnitude, 2.0);
        assert_eq!(report.overall, OverallStatus::AllSystemsNominal);
    }

    #[test]
    fn test_error_anomaly_flips_overall() {
        let mut columns = healthy_columns();
        columns.push(("invalid_orders", ints(&[30, 30, 30, 30])));
        columns.push(("total_orders", ints(&[100, 100, 100, 100])));
        let table = DiagnosticTable::from_columns(columns);
        let report = analyze(&table);

        assert_eq!(report.summary.anomaly_errors, 1);
        assert_eq!(report.anomalies[0].kind, "invalid_orders");
        assert_eq!(report.overall, OverallStatus::IssuesFound);
    }

    #[test]
    fn test_combat_imbalance_bounds() {
        let mut columns = healthy_columns();
        columns.push(("space_wins", ints(&[9, 9, 9, 9])));
        columns.push(("space_losses", ints(&[1, 1, 1, 1])));
        let table = DiagnosticTable::from_columns(columns);
        let report = analyze(&table);

        let combat = report
            .anomalies
            .iter()
            .find(|a| a.kind == "combat_imbalance")
            .unwrap();
        assert_eq!(combat.severity, AnomalySeverity::Warning);
        assert_eq!(combat.magnitude, 90.0);
    }

    #[test]
    fn test_clk_no_raiders_bool_column() {
        let mut columns = healthy_columns();
        columns.push((
            "clk_no_raiders",
            vec![
                Some(Value::Bool(true)),
                Some(Value::Bool(false)),
                None,
                Some(Value::Bool(true)),
            ],
        ));
        let table = DiagnosticTable::from_columns(columns);
        let report = analyze(&table);

        let clk = report.anomalies.iter().find(|a| a.kind == "clk_no_raiders").unwrap();
        assert_eq!(clk.severity, AnomalySeverity::Error);
        assert_eq!(clk.magnitude, 2.0);
        assert_eq!(report.overall, OverallStatus::IssuesFound);
    }

    #[test]
    fn test_every_check_enumerated_on_empty_table() {
        let table = DiagnosticTable::from_columns(vec![]);
        let report = analyze(&table);
        assert_eq!(report.summary.checks_run, 5);
        assert_eq!(report.summary.checks_not_implemented, 5);
        assert_eq!(report.overall, OverallStatus::AllSystemsNominal);
    }
}
