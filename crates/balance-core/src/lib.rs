//! Balance Core - statistical analysis of EC4X diagnostic data
//!
//! Provides the read-only half of the balance lab:
//! - Loads per-run diagnostic CSV files into a unioned, column-oriented table
//! - Detects outliers (z-score, IQR), globally or per house
//! - Runs the named gap-check battery and anomaly scan
//! - Aggregates metrics by house or by turn

pub mod error;
pub mod gaps;
pub mod outliers;
pub mod summary;
pub mod table;
pub mod value;

// Re-export key types
pub use error::{AnalysisError, Result};
pub use gaps::{
    analyze, AnomalyEvent, AnomalySeverity, CheckStatus, GapReport, GapSummary, OverallStatus,
    PhaseCheck,
};
pub use outliers::{
    iqr, zscore, OutlierMethod, OutlierReport, OutlierRow, DEFAULT_IQR_MULTIPLIER,
    DEFAULT_ZSCORE_THRESHOLD,
};
pub use summary::{default_metrics, summary_by_house, summary_by_turn, GroupSummary, MetricSummary};
pub use table::{DiagnosticTable, RowTag, TableMetadata, HOUSE_COLUMN, RUN_ID_COLUMN, TURN_COLUMN};
pub use value::Value;
