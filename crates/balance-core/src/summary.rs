//! Per-house and per-turn aggregate summaries.

use serde::Serialize;

use crate::error::{AnalysisError, Result};
use crate::table::{DiagnosticTable, HOUSE_COLUMN, RUN_ID_COLUMN, TURN_COLUMN};
use crate::value::Value;

/// Aggregates of one metric within one group.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub metric: String,
    pub mean: Option<f64>,
    pub sum: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// All metric aggregates for one group key (a house, or a turn).
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub key: String,
    pub metrics: Vec<MetricSummary>,
}

/// Aggregate metrics per house, ordered by house name.
pub fn summary_by_house(
    table: &DiagnosticTable,
    metrics: Option<&[String]>,
) -> Result<Vec<GroupSummary>> {
    grouped_summary(table, HOUSE_COLUMN, metrics, true)
}

/// Aggregate metrics per turn (averaged across houses), ordered by turn.
///
/// Min/max are omitted here; per-turn extremes are dominated by house
/// spread and add noise rather than signal.
pub fn summary_by_turn(
    table: &DiagnosticTable,
    metrics: Option<&[String]>,
) -> Result<Vec<GroupSummary>> {
    grouped_summary(table, TURN_COLUMN, metrics, false)
}

/// Numeric columns eligible for aggregation: everything except group
/// keys, run ids and `_`-prefixed meta columns.
pub fn default_metrics(table: &DiagnosticTable) -> Vec<String> {
    table
        .columns()
        .iter()
        .filter(|name| {
            !matches!(name.as_str(), HOUSE_COLUMN | TURN_COLUMN | RUN_ID_COLUMN)
                && !name.starts_with('_')
                && is_numeric_column(table, name)
        })
        .cloned()
        .collect()
}

fn is_numeric_column(table: &DiagnosticTable, name: &str) -> bool {
    match table.column(name) {
        Some(col) => col
            .iter()
            .flatten()
            .next()
            .map(|v| v.as_f64().is_some())
            .unwrap_or(false),
        None => false,
    }
}

fn grouped_summary(
    table: &DiagnosticTable,
    key_column: &str,
    metrics: Option<&[String]>,
    with_extremes: bool,
) -> Result<Vec<GroupSummary>> {
    let keys = table
        .column(key_column)
        .ok_or_else(|| AnalysisError::MetricNotFound(key_column.to_string()))?;

    let metrics: Vec<String> = match metrics {
        Some(m) => {
            for name in m {
                if !table.has_column(name) {
                    return Err(AnalysisError::MetricNotFound(name.clone()));
                }
            }
            m.to_vec()
        }
        None => default_metrics(table),
    };

    // Group row indices by rendered key, sorted by key.
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        let Some(key) = key.as_ref().map(Value::render) else {
            continue;
        };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, rows)) => rows.push(i),
            None => groups.push((key, vec![i])),
        }
    }
    groups.sort_by(|(a, _), (b, _)| sort_key(a).cmp(&sort_key(b)));

    let mut out = Vec::with_capacity(groups.len());
    for (key, rows) in groups {
        let mut summaries = Vec::with_capacity(metrics.len());
        for metric in &metrics {
            let column = table.numeric(metric)?;
            let values: Vec<f64> = rows.iter().filter_map(|&i| column[i]).collect();
            summaries.push(summarize(metric, &values, with_extremes));
        }
        out.push(GroupSummary {
            key,
            metrics: summaries,
        });
    }
    Ok(out)
}

/// Numeric keys sort numerically, everything else lexically after them.
fn sort_key(key: &str) -> (i64, String) {
    match key.parse::<i64>() {
        Ok(n) => (n, String::new()),
        Err(_) => (i64::MAX, key.to_string()),
    }
}

fn summarize(metric: &str, values: &[f64], with_extremes: bool) -> MetricSummary {
    if values.is_empty() {
        return MetricSummary {
            metric: metric.to_string(),
            mean: None,
            sum: None,
            std: None,
            min: None,
            max: None,
        };
    }

    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    let mean = sum / n;
    let std = if values.len() < 2 {
        None
    } else {
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt())
    };

    let (min, max) = if with_extremes {
        (
            Some(values.iter().cloned().fold(f64::INFINITY, f64::min)),
            Some(values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)),
        )
    } else {
        (None, None)
    };

    MetricSummary {
        metric: metric.to_string(),
        mean: Some(mean),
        sum: Some(sum),
        std,
        min,
        max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DiagnosticTable;
    use crate::value::Value;

    fn strs(values: &[&str]) -> Vec<Option<Value>> {
        values.iter().map(|v| Some(Value::Str(v.to_string()))).collect()
    }

    fn ints(values: &[i64]) -> Vec<Option<Value>> {
        values.iter().map(|v| Some(Value::Int(*v))).collect()
    }

    fn sample_table() -> DiagnosticTable {
        DiagnosticTable::from_columns(vec![
            ("house", strs(&["atreides", "ordos", "atreides", "ordos"])),
            ("turn", ints(&[1, 1, 2, 2])),
            ("prestige", ints(&[10, 20, 30, 40])),
            ("fleet_size", ints(&[3, 5, 4, 6])),
        ])
    }

    #[test]
    fn test_by_house_groups_and_sorts() {
        let summaries = summary_by_house(&sample_table(), None).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].key, "atreides");
        assert_eq!(summaries[1].key, "ordos");

        let prestige = summaries[0]
            .metrics
            .iter()
            .find(|m| m.metric == "prestige")
            .unwrap();
        assert_eq!(prestige.mean, Some(20.0));
        assert_eq!(prestige.sum, Some(40.0));
        assert_eq!(prestige.min, Some(10.0));
        assert_eq!(prestige.max, Some(30.0));
    }

    #[test]
    fn test_by_turn_numeric_order_no_extremes() {
        let summaries = summary_by_turn(&sample_table(), None).unwrap();
        assert_eq!(summaries[0].key, "1");
        assert_eq!(summaries[1].key, "2");

        let prestige = summaries[1]
            .metrics
            .iter()
            .find(|m| m.metric == "prestige")
            .unwrap();
        assert_eq!(prestige.mean, Some(35.0));
        assert!(prestige.min.is_none());
    }

    #[test]
    fn test_default_metrics_excludes_keys() {
        let metrics = default_metrics(&sample_table());
        assert_eq!(metrics, vec!["prestige".to_string(), "fleet_size".to_string()]);
    }

    #[test]
    fn test_explicit_unknown_metric_errors() {
        let err = summary_by_house(&sample_table(), Some(&["ghost".to_string()]));
        assert!(matches!(err, Err(AnalysisError::MetricNotFound(_))));
    }

    #[test]
    fn test_missing_group_column_errors() {
        let table = DiagnosticTable::from_columns(vec![("prestige", ints(&[1, 2]))]);
        assert!(matches!(
            summary_by_house(&table, None),
            Err(AnalysisError::MetricNotFound(_))
        ));
    }
}
