//! Bulk loading of data directories
//!
//! Each delimited file of a data directory is decoded, matched against the
//! field mapping, coerced column by column and written to the directory's
//! table. Writes go through the streaming fast path while it works; the
//! first fast-path failure switches the whole run to batched inserts.

pub mod postgres;

use crate::coerce::{coerce_column, CellValue};
use crate::config::PipelineOptions;
use crate::discovery::DataDirectory;
use crate::encoding::TextEncoding;
use crate::error::{IngestError, Result};
use crate::fsutil::display_relative;
use crate::report::StageReport;
use crate::run_log::RunLog;
use crate::schema::{Column, SchemaMapper};
use crate::table::RawTable;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One coerced row, aligned to the table's columns
pub type NormalizedRow = Vec<CellValue>;

/// Destination of a data directory's rows
///
/// One target owns one database connection for the whole directory.
#[async_trait]
pub trait LoadTarget: Send {
    async fn drop_table(&mut self, table: &str) -> Result<()>;

    async fn create_table(&mut self, table: &str, columns: &[Column]) -> Result<()>;

    /// Streaming bulk load; returns rows written
    async fn copy_rows(&mut self, table: &str, columns: &[Column], rows: &[NormalizedRow]) -> Result<u64>;

    /// Batched parameterized inserts, one transaction per call
    async fn insert_rows(&mut self, table: &str, columns: &[Column], rows: &[NormalizedRow]) -> Result<u64>;
}

/// Run-wide switch between the fast path and the insert fallback
#[derive(Debug)]
pub struct FastPath {
    enabled: AtomicBool,
}

impl FastPath {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Disable the fast path; true only for the call that disabled it
    pub fn downgrade(&self) -> bool {
        self.enabled.swap(false, Ordering::AcqRel)
    }
}

/// Per-table outcome reported back to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub name: String,
    /// Files loaded into the table
    pub files: usize,
    pub rows: u64,
    /// Files that failed or were rejected
    pub rejected: usize,
    /// Auxiliary files passed over
    pub skipped: usize,
}

/// A data file after decoding and coercion
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedFile {
    Rows {
        rows: Vec<NormalizedRow>,
        matched: usize,
        encoding: TextEncoding,
        /// Columns whose conversion failed
        degraded: Vec<String>,
    },
    /// Too few recognised columns, but named as an auxiliary file
    Auxiliary { matched: usize },
}

/// Read, match and coerce one delimited file
///
/// Fails with [`IngestError::ColumnMatch`] when fewer than `min_matched`
/// distinct canonical fields are recognised, unless the file name contains
/// `auxiliary_marker` (case-insensitive).
pub fn prepare_file(
    path: &Path,
    schema: &SchemaMapper,
    min_matched: usize,
    auxiliary_marker: &str,
) -> Result<PreparedFile> {
    let (raw, encoding) = RawTable::read(path)?;

    // (canonical index, source column); first source column wins
    let mut mapping: Vec<(usize, usize)> = Vec::new();
    for (source, header) in raw.headers.iter().enumerate() {
        if let Some(target) = schema.column_index(header) {
            if !mapping.iter().any(|(t, _)| *t == target) {
                mapping.push((target, source));
            }
        }
    }

    let matched = mapping.len();
    if matched < min_matched {
        let marker = auxiliary_marker.to_lowercase();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !marker.is_empty() && name.contains(&marker) {
            return Ok(PreparedFile::Auxiliary { matched });
        }
        return Err(IngestError::ColumnMatch {
            path: path.to_path_buf(),
            matched,
        });
    }

    let columns = schema.columns();
    let mut rows: Vec<NormalizedRow> = vec![vec![CellValue::Null; columns.len()]; raw.row_count];
    let mut degraded = Vec::new();

    for (target, source) in mapping {
        let column = &columns[target];
        let Some(values) = raw.column(source) else {
            continue;
        };
        let coerced = coerce_column(values, column.declared_type);
        if coerced.degraded {
            degraded.push(column.name.clone());
        }
        for (row, value) in rows.iter_mut().zip(coerced.values) {
            row[target] = value;
        }
    }

    Ok(PreparedFile::Rows {
        rows,
        matched,
        encoding,
        degraded,
    })
}

/// Loads data directories into their tables
pub struct BulkLoader {
    schema: Arc<SchemaMapper>,
    options: PipelineOptions,
    fast_path: Arc<FastPath>,
    log: Arc<RunLog>,
    root: PathBuf,
}

impl BulkLoader {
    pub fn new(
        schema: Arc<SchemaMapper>,
        options: PipelineOptions,
        fast_path: Arc<FastPath>,
        log: Arc<RunLog>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            schema,
            options,
            fast_path,
            log,
            root: root.into(),
        }
    }

    /// Drop and reload one data directory's table
    ///
    /// File-level failures are logged and counted; only the initial drop
    /// and file discovery can fail the call.
    pub async fn load_directory<T: LoadTarget + ?Sized>(
        &self,
        target: &mut T,
        data_dir: &DataDirectory,
    ) -> Result<(TableSummary, StageReport)> {
        let table = data_dir.table.as_str();
        let columns = self.schema.columns();
        let files = data_dir.csv_files()?;

        for dir in &data_dir.dirs {
            self.log.info(format!(
                "Processing directory: {} -> table: {table}",
                display_relative(&self.root, dir)
            ));
        }

        target.drop_table(table).await?;
        self.log.info(format!("Found {} CSV file(s) for {table}", files.len()));

        let mut summary = TableSummary {
            name: table.to_string(),
            ..TableSummary::default()
        };
        let mut report = StageReport::default();
        let mut created = false;
        let started = Instant::now();

        for (index, path) in files.iter().enumerate() {
            let rel = display_relative(&self.root, path);

            match self
                .load_file(target, table, columns, path, &rel, &mut created)
                .await
            {
                Ok(Some(rows)) => {
                    summary.files += 1;
                    summary.rows += rows;
                    report.record_success();
                },
                Ok(None) => {
                    summary.skipped += 1;
                    report.record_skip();
                },
                Err(e) => {
                    self.log.error(format!("CSV processing failed {rel}: {e}"));
                    summary.rejected += 1;
                    report.record_failure(rel, e);
                },
            }

            let done = index + 1;
            if self.options.progress_every > 0 && done % self.options.progress_every == 0 {
                self.log.info(format!(
                    "Progress: {done}/{} files, {} rows imported, {:.1}s elapsed",
                    files.len(),
                    summary.rows,
                    started.elapsed().as_secs_f64()
                ));
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            (summary.rows as f64 / elapsed).round() as u64
        } else {
            0
        };
        self.log.success(format!(
            "Table {table} loaded: {} rows from {} file(s) in {elapsed:.2}s ({speed} rows/s)",
            summary.rows, summary.files
        ));

        Ok((summary, report))
    }

    /// Load one file; `Ok(None)` when it was skipped as auxiliary
    async fn load_file<T: LoadTarget + ?Sized>(
        &self,
        target: &mut T,
        table: &str,
        columns: &[Column],
        path: &Path,
        rel: &str,
        created: &mut bool,
    ) -> Result<Option<u64>> {
        let schema = Arc::clone(&self.schema);
        let min_matched = self.options.min_matched_columns;
        let marker = self.options.auxiliary_marker.clone();
        let owned_path = path.to_path_buf();

        let prepared = tokio::task::spawn_blocking(move || {
            prepare_file(&owned_path, &schema, min_matched, &marker)
        })
        .await??;

        let (rows, matched, encoding, degraded) = match prepared {
            PreparedFile::Auxiliary { matched } => {
                self.log.warn(format!(
                    "Skipped non-data file: {rel} ({matched} recognised column(s))"
                ));
                return Ok(None);
            },
            PreparedFile::Rows {
                rows,
                matched,
                encoding,
                degraded,
            } => (rows, matched, encoding, degraded),
        };

        self.log.info(format!(
            "Processing CSV: {rel} (encoding: {encoding}, {matched} column(s) matched, {} row(s))",
            rows.len()
        ));
        if !degraded.is_empty() {
            self.log.warn(format!(
                "{rel}: conversion failed for column(s) {}; text kept, typed cells left null",
                degraded.join(", ")
            ));
        }

        if rows.is_empty() {
            return Ok(Some(0));
        }
        if !*created {
            target.create_table(table, columns).await?;
            *created = true;
        }

        self.write_rows(target, table, columns, &rows).await.map(Some)
    }

    async fn write_rows<T: LoadTarget + ?Sized>(
        &self,
        target: &mut T,
        table: &str,
        columns: &[Column],
        rows: &[NormalizedRow],
    ) -> Result<u64> {
        let batch_size = self.options.batch_size.max(1);
        let mut written = 0u64;
        let mut offset = 0;

        while offset < rows.len() && self.fast_path.is_enabled() {
            let end = (offset + batch_size).min(rows.len());
            match target.copy_rows(table, columns, &rows[offset..end]).await {
                Ok(count) => {
                    written += count;
                    offset = end;
                },
                Err(e) => {
                    if self.fast_path.downgrade() {
                        self.log.warn(format!(
                            "Fast bulk load unavailable ({e}); using batched inserts for the rest of the run"
                        ));
                    }
                },
            }
        }

        if offset < rows.len() {
            written += target.insert_rows(table, columns, &rows[offset..]).await?;
        }

        Ok(written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use crate::run_log::Severity;
    use std::collections::HashMap;
    use udload_common::types::{DeclaredType, FieldDefinition};

    /// In-memory target; `fail_copy_after` breaks the fast path after N calls
    #[derive(Default)]
    pub(crate) struct MemoryTarget {
        pub tables: HashMap<String, Vec<NormalizedRow>>,
        pub dropped: Vec<String>,
        pub created: Vec<String>,
        pub copy_calls: usize,
        pub insert_calls: usize,
        pub fail_copy_after: Option<usize>,
    }

    #[async_trait]
    impl LoadTarget for MemoryTarget {
        async fn drop_table(&mut self, table: &str) -> Result<()> {
            self.dropped.push(table.to_string());
            self.tables.remove(table);
            Ok(())
        }

        async fn create_table(&mut self, table: &str, _columns: &[Column]) -> Result<()> {
            self.created.push(table.to_string());
            self.tables.entry(table.to_string()).or_default();
            Ok(())
        }

        async fn copy_rows(&mut self, table: &str, _columns: &[Column], rows: &[NormalizedRow]) -> Result<u64> {
            self.copy_calls += 1;
            if self.fail_copy_after.is_some_and(|n| self.copy_calls > n) {
                return Err(IngestError::BulkLoad("COPY is not permitted".to_string()));
            }
            self.tables
                .entry(table.to_string())
                .or_default()
                .extend(rows.iter().cloned());
            Ok(rows.len() as u64)
        }

        async fn insert_rows(&mut self, table: &str, _columns: &[Column], rows: &[NormalizedRow]) -> Result<u64> {
            self.insert_calls += 1;
            self.tables
                .entry(table.to_string())
                .or_default()
                .extend(rows.iter().cloned());
            Ok(rows.len() as u64)
        }
    }

    pub(crate) fn sample_schema() -> SchemaMapper {
        let fields = vec![
            FieldDefinition::new("DATE", ["Date"], DeclaredType::Datetime).unwrap(),
            FieldDefinition::new("CELL", ["Cell Name", "小区名称"], DeclaredType::String).unwrap(),
            FieldDefinition::new("PRB_UTIL", ["PRB Utilization"], DeclaredType::Float).unwrap(),
            FieldDefinition::new("USERS", ["Users"], DeclaredType::Int).unwrap(),
            FieldDefinition::new("REMARK", ["Remark"], DeclaredType::Text).unwrap(),
        ];
        SchemaMapper::new(&fields).unwrap()
    }

    const DATA_CSV: &str = "Date,Cell Name,PRB Utilization,Users,Ignored\n\
                            2026-01-06,Cell-A,95%,\"1,200\",x\n\
                            2026/01/07 00:00,Cell-B,,0,y\n";

    fn loader(root: &Path, options: PipelineOptions, fast_path: Arc<FastPath>) -> (BulkLoader, Arc<RunLog>) {
        let log = Arc::new(RunLog::in_memory(None));
        let loader = BulkLoader::new(
            Arc::new(sample_schema()),
            options,
            fast_path,
            Arc::clone(&log),
            root,
        );
        (loader, log)
    }

    fn write(path: &Path, text: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn test_prepare_aligns_rows_to_all_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write(&path, DATA_CSV);

        let prepared = prepare_file(&path, &sample_schema(), 4, "kpis").unwrap();
        let PreparedFile::Rows { rows, matched, .. } = prepared else {
            panic!("expected rows");
        };

        assert_eq!(matched, 4);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 5);
        assert_eq!(rows[0][1], CellValue::Text("Cell-A".to_string()));
        assert_eq!(rows[0][2], CellValue::Float(0.95));
        assert_eq!(rows[0][3], CellValue::Int(1200));
        assert_eq!(rows[0][4], CellValue::Null);
        assert_eq!(rows[1][2], CellValue::Null);
        assert_eq!(rows[1][3], CellValue::Int(0));
        assert_eq!(
            rows[1][0].render().as_deref(),
            Some("2026-01-07 00:00:00")
        );
    }

    #[test]
    fn test_too_few_columns_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.csv");
        write(&path, "Date,Cell Name,PRB Utilization,Foo\n2026-01-06,a,1,z\n");

        let err = prepare_file(&path, &sample_schema(), 4, "kpis").unwrap_err();
        assert!(matches!(err, IngestError::ColumnMatch { matched: 3, .. }));
    }

    #[test]
    fn test_padded_header_does_not_match_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("padded.csv");
        write(&path, " Date,Cell Name,PRB Utilization,Users\n2026-01-06,a,1,2\n");

        let err = prepare_file(&path, &sample_schema(), 4, "kpis").unwrap_err();
        assert!(matches!(err, IngestError::ColumnMatch { matched: 3, .. }));
    }

    #[test]
    fn test_auxiliary_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("KPIs_meta.csv");
        write(&path, "Date,Whatever\n2026-01-06,1\n");

        let prepared = prepare_file(&path, &sample_schema(), 4, "kpis").unwrap();
        assert_eq!(prepared, PreparedFile::Auxiliary { matched: 1 });
    }

    #[test]
    fn test_duplicate_source_columns_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.csv");
        write(
            &path,
            "Date,Cell Name,小区名称,PRB Utilization,Users\n2026-01-06,first,second,1,2\n",
        );

        let PreparedFile::Rows { rows, matched, .. } =
            prepare_file(&path, &sample_schema(), 4, "kpis").unwrap()
        else {
            panic!("expected rows");
        };
        assert_eq!(matched, 4);
        assert_eq!(rows[0][1], CellValue::Text("first".to_string()));
    }

    #[tokio::test]
    async fn test_directory_load_with_rejects_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("4G/a.csv"), DATA_CSV);
        write(&root.join("4G/bad.csv"), "Foo,Bar\n1,2\n");
        write(&root.join("4G/kpis_meta.csv"), "Date\n2026-01-06\n");

        let (loader, log) = loader(root, PipelineOptions::default(), Arc::new(FastPath::new(true)));
        let data_dir = DataDirectory {
            table: "4G_UD".to_string(),
            dirs: vec![root.join("4G")],
        };
        let mut target = MemoryTarget::default();

        let (summary, report) = loader.load_directory(&mut target, &data_dir).await.unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(report.failures[0].item, "4G/bad.csv");
        assert_eq!(target.dropped, vec!["4G_UD"]);
        assert_eq!(target.created, vec!["4G_UD"]);
        assert_eq!(target.tables["4G_UD"].len(), 2);

        let entries = log.entries();
        assert!(entries
            .iter()
            .any(|e| e.level == Severity::Warn && e.message.contains("kpis_meta.csv")));
        assert!(!entries
            .iter()
            .any(|e| e.level == Severity::Error && e.message.contains("kpis_meta.csv")));
        assert!(entries
            .iter()
            .any(|e| e.level == Severity::Error && e.message.contains("bad.csv")));
    }

    #[tokio::test]
    async fn test_fast_path_failure_downgrades_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["a", "b", "c", "d"] {
            write(&root.join(format!("4G/{name}.csv")), DATA_CSV);
        }
        write(&root.join("5G/e.csv"), DATA_CSV);

        let options = PipelineOptions {
            batch_size: 1,
            ..PipelineOptions::default()
        };
        let fast_path = Arc::new(FastPath::new(true));
        let (loader, log) = loader(root, options, Arc::clone(&fast_path));

        // Breaks in the middle of the second file
        let mut four_g = MemoryTarget {
            fail_copy_after: Some(3),
            ..MemoryTarget::default()
        };
        let (summary, report) = loader
            .load_directory(
                &mut four_g,
                &DataDirectory {
                    table: "4G_UD".to_string(),
                    dirs: vec![root.join("4G")],
                },
            )
            .await
            .unwrap();

        assert_eq!(report.failed(), 0);
        assert_eq!(summary.rows, 8);
        assert_eq!(four_g.tables["4G_UD"].len(), 8);
        assert_eq!(four_g.copy_calls, 4);
        assert!(!fast_path.is_enabled());

        // A later directory never tries the fast path again
        let mut five_g = MemoryTarget::default();
        let (summary, _) = loader
            .load_directory(
                &mut five_g,
                &DataDirectory {
                    table: "5G_UD".to_string(),
                    dirs: vec![root.join("5G")],
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(five_g.copy_calls, 0);
        assert_eq!(five_g.insert_calls, 1);

        let downgrades = log
            .entries()
            .iter()
            .filter(|e| e.message.starts_with("Fast bulk load unavailable"))
            .count();
        assert_eq!(downgrades, 1);
    }

    #[tokio::test]
    async fn test_header_only_file_creates_no_table() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("4G/empty.csv"), "Date,Cell Name,PRB Utilization,Users\n");

        let (loader, _log) = loader(root, PipelineOptions::default(), Arc::new(FastPath::new(true)));
        let mut target = MemoryTarget::default();
        let (summary, report) = loader
            .load_directory(
                &mut target,
                &DataDirectory {
                    table: "4G_UD".to_string(),
                    dirs: vec![root.join("4G")],
                },
            )
            .await
            .unwrap();

        assert_eq!(report.failed(), 0);
        assert_eq!(summary.files, 1);
        assert_eq!(summary.rows, 0);
        assert_eq!(target.dropped, vec!["4G_UD"]);
        assert!(target.created.is_empty());
        assert_eq!(target.copy_calls, 0);
    }

    #[tokio::test]
    async fn test_progress_logged_every_n_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["a", "b", "c", "d", "e"] {
            write(&root.join(format!("4G/{name}.csv")), DATA_CSV);
        }

        let options = PipelineOptions {
            progress_every: 2,
            ..PipelineOptions::default()
        };
        let (loader, log) = loader(root, options, Arc::new(FastPath::new(true)));
        let mut target = MemoryTarget::default();
        loader
            .load_directory(
                &mut target,
                &DataDirectory {
                    table: "4G_UD".to_string(),
                    dirs: vec![root.join("4G")],
                },
            )
            .await
            .unwrap();

        let progress: Vec<String> = log
            .entries()
            .into_iter()
            .filter(|e| e.level == Severity::Info && e.message.starts_with("Progress:"))
            .map(|e| e.message)
            .collect();
        assert_eq!(progress.len(), 2);
        assert!(progress[0].starts_with("Progress: 2/5 files, 4 rows imported"));
        assert!(progress[1].starts_with("Progress: 4/5 files, 8 rows imported"));
    }

    #[test]
    fn test_fast_path_flag() {
        let flag = FastPath::new(true);
        assert!(flag.downgrade());
        assert!(!flag.downgrade());
        assert!(!flag.is_enabled());
        assert!(!FastPath::new(false).is_enabled());
    }
}
