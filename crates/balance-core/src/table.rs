//! Column-oriented diagnostic table unioned from per-run CSV files.
//!
//! One CSV file per simulator run, one row per (turn, house). Column sets
//! drift across runs as new metrics are added; the table is the union of
//! every column seen, with absent cells as nulls.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};
use crate::value::Value;

/// Column holding the run identifier derived from the source file name.
pub const RUN_ID_COLUMN: &str = "run_id";

/// Column holding the competing entity.
pub const HOUSE_COLUMN: &str = "house";

/// Column holding the turn number.
pub const TURN_COLUMN: &str = "turn";

const GIT_HASH_COLUMN: &str = "_git_hash";

/// Dataset metadata computed once at load time.
#[derive(Debug, Clone, Serialize)]
pub struct TableMetadata {
    /// First non-null `_git_hash` value, or "unknown".
    pub provenance_hash: String,

    /// Hex sha-256 digest over the sorted names of the files that loaded.
    pub source_digest: String,

    /// When this table was built.
    pub loaded_at: DateTime<Utc>,

    /// Distinct run identifiers.
    pub run_count: usize,

    /// Distinct houses.
    pub entity_count: usize,

    /// Total rows across all files.
    pub total_records: usize,
}

/// Identifying tags of a single row.
#[derive(Debug, Clone, Serialize)]
pub struct RowTag {
    pub run_id: Option<String>,
    pub turn: Option<i64>,
    pub house: Option<String>,
}

/// In-memory union of diagnostic records from many source files.
///
/// Append-only during [`DiagnosticTable::load`], read-only afterward. Row
/// order is insertion order and carries no meaning; consumers sort or
/// group explicitly.
#[derive(Debug)]
pub struct DiagnosticTable {
    column_order: Vec<String>,
    cells: BTreeMap<String, Vec<Option<Value>>>,
    len: usize,
    metadata: TableMetadata,
    warnings: Vec<String>,
}

impl DiagnosticTable {
    /// Load and union all readable diagnostic files.
    ///
    /// A file that fails to read or parse is skipped with a warning; the
    /// load hard-fails only when every file fails (or none were given).
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<DiagnosticTable> {
        if paths.is_empty() {
            return Err(AnalysisError::NoInputFiles);
        }

        let mut builder = TableBuilder::default();
        let mut warnings = Vec::new();
        let mut loaded_names = Vec::new();

        for p in paths {
            let path = p.as_ref();
            match read_file(path) {
                Ok((headers, rows)) => {
                    let run_id = run_id_from_path(path);
                    let row_count = rows.len();
                    builder.append_file(&run_id, &headers, rows);
                    loaded_names.push(path.display().to_string());
                    debug!(file = %path.display(), rows = row_count, "loaded diagnostic file");
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable diagnostic file");
                    warnings.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        if loaded_names.is_empty() {
            return Err(AnalysisError::NoFilesLoaded {
                attempted: paths.len(),
            });
        }

        Ok(builder.finish(&loaded_names, warnings))
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Column names in first-seen order.
    pub fn columns(&self) -> &[String] {
        &self.column_order
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.cells.contains_key(name)
    }

    /// Cells of one column, or None if the column does not exist.
    pub fn column(&self, name: &str) -> Option<&[Option<Value>]> {
        self.cells.get(name).map(|v| v.as_slice())
    }

    /// Numeric view of a column.
    ///
    /// Fails with [`AnalysisError::MetricNotFound`] when the column is
    /// absent; non-numeric cells become nulls.
    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let col = self
            .cells
            .get(name)
            .ok_or_else(|| AnalysisError::MetricNotFound(name.to_string()))?;
        Ok(col
            .iter()
            .map(|cell| cell.as_ref().and_then(Value::as_f64))
            .collect())
    }

    /// Identifying tags of row `idx`.
    pub fn row_tag(&self, idx: usize) -> RowTag {
        let cell = |name: &str| self.cells.get(name).and_then(|c| c.get(idx)).and_then(|v| v.clone());
        RowTag {
            run_id: cell(RUN_ID_COLUMN).map(|v| v.render()),
            turn: cell(TURN_COLUMN).and_then(|v| match v {
                Value::Int(t) => Some(t),
                Value::Float(t) => Some(t as i64),
                _ => None,
            }),
            house: cell(HOUSE_COLUMN).map(|v| v.render()),
        }
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Per-file load warnings accumulated during [`DiagnosticTable::load`].
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn distinct_rendered(&self, name: &str) -> usize {
        match self.cells.get(name) {
            Some(col) => col
                .iter()
                .filter_map(|v| v.as_ref().map(Value::render))
                .collect::<BTreeSet<_>>()
                .len(),
            None => 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_columns(columns: Vec<(&str, Vec<Option<Value>>)>) -> DiagnosticTable {
        let mut builder = TableBuilder::default();
        let len = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        for (name, cells) in columns {
            assert_eq!(cells.len(), len, "ragged test columns");
            builder.column_order.push(name.to_string());
            builder.cells.insert(name.to_string(), cells);
        }
        builder.len = len;
        builder.finish(&["test".to_string()], Vec::new())
    }
}

#[derive(Default)]
struct TableBuilder {
    column_order: Vec<String>,
    cells: BTreeMap<String, Vec<Option<Value>>>,
    len: usize,
}

impl TableBuilder {
    fn ensure_column(&mut self, name: &str) {
        if !self.cells.contains_key(name) {
            self.column_order.push(name.to_string());
            self.cells.insert(name.to_string(), vec![None; self.len]);
        }
    }

    fn append_file(&mut self, run_id: &str, headers: &[String], rows: Vec<Vec<Option<Value>>>) {
        self.ensure_column(RUN_ID_COLUMN);
        for h in headers {
            if h != RUN_ID_COLUMN {
                self.ensure_column(h);
            }
        }

        for row in rows {
            // A source column named run_id is shadowed by the derived one.
            for (name, value) in headers.iter().zip(row) {
                if name != RUN_ID_COLUMN {
                    self.cells.get_mut(name).expect("column ensured").push(value);
                }
            }
            self.cells
                .get_mut(RUN_ID_COLUMN)
                .expect("column ensured")
                .push(Some(Value::Str(run_id.to_string())));

            // Columns this file never had: null.
            let target = self.len + 1;
            for cells in self.cells.values_mut() {
                if cells.len() < target {
                    cells.push(None);
                }
            }
            self.len = target;
        }
    }

    fn finish(self, loaded_names: &[String], warnings: Vec<String>) -> DiagnosticTable {
        let provenance_hash = self
            .cells
            .get(GIT_HASH_COLUMN)
            .and_then(|col| col.iter().flatten().next())
            .map(Value::render)
            .unwrap_or_else(|| "unknown".to_string());

        let mut sorted = loaded_names.to_vec();
        sorted.sort();
        let mut hasher = Sha256::new();
        for name in &sorted {
            hasher.update(name.as_bytes());
            hasher.update(b"\n");
        }
        let source_digest = hex::encode(hasher.finalize());

        let mut table = DiagnosticTable {
            column_order: self.column_order,
            cells: self.cells,
            len: self.len,
            metadata: TableMetadata {
                provenance_hash,
                source_digest,
                loaded_at: Utc::now(),
                run_count: 0,
                entity_count: 0,
                total_records: self.len,
            },
            warnings,
        };
        table.metadata.run_count = table.distinct_rendered(RUN_ID_COLUMN);
        table.metadata.entity_count = table.distinct_rendered(HOUSE_COLUMN);
        table
    }
}

/// Derive the run identifier from the source file name
/// (`game_2041.csv` → `2041`).
fn run_id_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    stem.strip_prefix("game_").unwrap_or(&stem).to_string()
}

type FileRows = (Vec<String>, Vec<Vec<Option<Value>>>);

fn read_file(path: &Path) -> Result<FileRows> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if headers.is_empty() {
        return Err(AnalysisError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "csv input has no headers",
        )));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Vec<Option<Value>> = (0..headers.len())
            .map(|i| record.get(i).and_then(Value::parse_field))
            .collect();
        rows.push(row);
    }
    Ok((headers, rows))
}
