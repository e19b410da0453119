//! Statistical outlier detection over a diagnostic table.
//!
//! Two methods: z-score (mean/stddev) and IQR fences, each optionally
//! grouped by a key column so that per-house baselines are independent.
//! Zero variance in a scope yields an empty report for that scope.

use serde::Serialize;

use crate::error::{AnalysisError, Result};
use crate::table::{DiagnosticTable, RowTag};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    ZScore,
    Iqr,
}

/// One flagged row.
#[derive(Debug, Clone, Serialize)]
pub struct OutlierRow {
    /// Index into the source table.
    pub row: usize,

    #[serde(flatten)]
    pub tag: RowTag,

    /// Group key value when the detection was grouped.
    pub group: Option<String>,

    /// The metric value that was flagged.
    pub value: f64,

    /// Signed z-score, or signed distance beyond the violated IQR fence.
    pub deviation: f64,
}

/// Outlier detection result, sorted by descending `|deviation|`.
#[derive(Debug, Clone, Serialize)]
pub struct OutlierReport {
    pub metric: String,
    pub method: OutlierMethod,
    /// Z-score threshold or IQR multiplier, as supplied by the caller.
    pub threshold: f64,
    pub group_by: Option<String>,
    pub rows: Vec<OutlierRow>,
}

/// Default z-score threshold (99.7% of a normal distribution).
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 3.0;

/// Default IQR multiplier; 3.0 is the conventional "extreme" variant.
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

/// Detect outliers by z-score.
///
/// Fails with [`AnalysisError::MetricNotFound`] when `metric` (or the
/// `group_by` column) is absent. A scope with fewer than two values or
/// zero variance contributes no rows — degenerate data is "no outliers",
/// never an error and never every row.
pub fn zscore(
    table: &DiagnosticTable,
    metric: &str,
    threshold: f64,
    group_by: Option<&str>,
) -> Result<OutlierReport> {
    let scopes = scoped_values(table, metric, group_by)?;
    let mut rows = Vec::new();

    for (group, values) in scopes {
        let sample: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
        let Some((mean, std)) = mean_std(&sample) else {
            continue;
        };
        if std == 0.0 {
            continue;
        }
        for (idx, value) in values {
            let z = (value - mean) / std;
            if z.abs() > threshold {
                rows.push(OutlierRow {
                    row: idx,
                    tag: table.row_tag(idx),
                    group: group.clone(),
                    value,
                    deviation: z,
                });
            }
        }
    }

    sort_by_severity(&mut rows);
    Ok(OutlierReport {
        metric: metric.to_string(),
        method: OutlierMethod::ZScore,
        threshold,
        group_by: group_by.map(String::from),
        rows,
    })
}

/// Detect outliers by IQR fence.
///
/// Rows strictly outside `[Q1 - multiplier*IQR, Q3 + multiplier*IQR]` are
/// flagged; the recorded deviation is the signed distance beyond the
/// violated fence. Same not-found and degeneracy contract as [`zscore`].
pub fn iqr(
    table: &DiagnosticTable,
    metric: &str,
    multiplier: f64,
    group_by: Option<&str>,
) -> Result<OutlierReport> {
    let scopes = scoped_values(table, metric, group_by)?;
    let mut rows = Vec::new();

    for (group, values) in scopes {
        let mut sample: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
        if sample.is_empty() {
            continue;
        }
        sample.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let q1 = percentile(&sample, 0.25);
        let q3 = percentile(&sample, 0.75);
        let fence = multiplier * (q3 - q1);
        let lower = q1 - fence;
        let upper = q3 + fence;

        for (idx, value) in values {
            let deviation = if value < lower {
                value - lower
            } else if value > upper {
                value - upper
            } else {
                continue;
            };
            rows.push(OutlierRow {
                row: idx,
                tag: table.row_tag(idx),
                group: group.clone(),
                value,
                deviation,
            });
        }
    }

    sort_by_severity(&mut rows);
    Ok(OutlierReport {
        metric: metric.to_string(),
        method: OutlierMethod::Iqr,
        threshold: multiplier,
        group_by: group_by.map(String::from),
        rows,
    })
}

/// Non-null metric values partitioned into (group key, values) scopes.
///
/// Ungrouped detection is a single scope with a `None` key. Rows whose
/// group cell is null are excluded from grouped detection.
fn scoped_values(
    table: &DiagnosticTable,
    metric: &str,
    group_by: Option<&str>,
) -> Result<Vec<(Option<String>, Vec<(usize, f64)>)>> {
    let values = table.numeric(metric)?;

    match group_by {
        None => {
            let scope: Vec<(usize, f64)> = values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (i, v)))
                .collect();
            Ok(vec![(None, scope)])
        }
        Some(key_column) => {
            let keys = table
                .column(key_column)
                .ok_or_else(|| AnalysisError::MetricNotFound(key_column.to_string()))?;

            let mut scopes: Vec<(Option<String>, Vec<(usize, f64)>)> = Vec::new();
            for (i, v) in values.iter().enumerate() {
                let (Some(v), Some(key)) = (v, keys[i].as_ref().map(Value::render)) else {
                    continue;
                };
                match scopes.iter_mut().find(|(g, _)| g.as_deref() == Some(key.as_str())) {
                    Some((_, scope)) => scope.push((i, *v)),
                    None => scopes.push((Some(key), vec![(i, *v)])),
                }
            }
            Ok(scopes)
        }
    }
}

/// Sample mean and standard deviation (ddof = 1). None for n < 2.
fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    Some((mean, var.sqrt()))
}

/// Linear-interpolation percentile over sorted data, `p` in [0, 1].
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Descending `|deviation|`; stable, so equal severities keep row order.
fn sort_by_severity(rows: &mut [OutlierRow]) {
    rows.sort_by(|a, b| {
        b.deviation
            .abs()
            .partial_cmp(&a.deviation.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
