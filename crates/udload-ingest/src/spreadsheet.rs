//! Spreadsheet to CSV conversion
//!
//! Each workbook under the working tree becomes one `<stem>_<sheet>.csv`
//! per sheet, written next to the workbook. Workbooks are converted
//! concurrently on the blocking pool; sheets within a workbook are written
//! one after another.

use crate::coerce::datetime::CANONICAL_FORMAT;
use crate::error::{IngestError, Result};
use crate::fsutil::{display_relative, find_files};
use crate::report::StageReport;
use crate::run_log::RunLog;
use calamine::{open_workbook_auto, Data, Reader};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Workbook formats calamine can open
pub const SPREADSHEET_EXTENSIONS: &[&str] = &[".xlsx", ".xlsm", ".xls", ".xlsb", ".ods"];

/// What converting one workbook produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkbookOutcome {
    pub outputs: Vec<PathBuf>,
    /// Sheets skipped by the exclusion set
    pub excluded: Vec<String>,
    /// (sheet, error) for sheets that could not be written
    pub failed_sheets: Vec<(String, String)>,
}

/// Stage result: per-workbook accounting plus the total files written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub workbooks: StageReport,
    pub outputs: usize,
}

fn is_spreadsheet(lowercase_name: &str) -> bool {
    // "~$" prefixed files are Office lock files
    !lowercase_name.starts_with("~$")
        && SPREADSHEET_EXTENSIONS
            .iter()
            .any(|ext| lowercase_name.ends_with(ext))
}

/// Convert every workbook under `root`
///
/// Returns once every workbook task has finished. A failing workbook is
/// logged and counted; it never cancels the others.
pub async fn convert_spreadsheets(
    root: &Path,
    exclusions: Arc<BTreeSet<String>>,
    workers: usize,
    log: Arc<RunLog>,
) -> Result<ConversionReport> {
    let files = find_files(root, is_spreadsheet)?;
    log.info(format!(
        "Converting {} spreadsheet(s) with {} worker(s)...",
        files.len(),
        workers
    ));

    let results: Vec<(String, Result<WorkbookOutcome>)> = stream::iter(files)
        .map(|path| {
            let rel = display_relative(root, &path);
            let exclusions = Arc::clone(&exclusions);
            let log = Arc::clone(&log);

            async move {
                let task_log = Arc::clone(&log);
                let task_rel = rel.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    convert_workbook(&path, &exclusions, &task_rel, &task_log)
                })
                .await;

                let outcome = joined.map_err(IngestError::from).and_then(|r| r);
                if let Err(e) = &outcome {
                    log.error(format!("Conversion failed {rel}: {e}"));
                }
                (rel, outcome)
            }
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    let mut report = ConversionReport::default();
    for (rel, outcome) in results {
        match outcome {
            Ok(outcome) => {
                report.outputs += outcome.outputs.len();
                for (sheet, message) in outcome.failed_sheets {
                    report.workbooks.record_failure(format!("{rel} [{sheet}]"), message);
                }
                report.workbooks.record_success();
            },
            Err(e) => report.workbooks.record_failure(rel, e),
        }
    }

    log.info(format!(
        "Spreadsheet conversion finished: {} file(s) written, {} failure(s)",
        report.outputs,
        report.workbooks.failed()
    ));
    Ok(report)
}

/// Write one CSV per non-excluded sheet of `path`
pub fn convert_workbook(
    path: &Path,
    exclusions: &BTreeSet<String>,
    rel: &str,
    log: &RunLog,
) -> Result<WorkbookOutcome> {
    let mut workbook = open_workbook_auto(path).map_err(|e| IngestError::spreadsheet(path, e))?;
    let dir = path
        .parent()
        .ok_or_else(|| IngestError::spreadsheet(path, "workbook has no parent directory"))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut outcome = WorkbookOutcome::default();
    let mut used = HashSet::new();

    for sheet in workbook.sheet_names() {
        if exclusions.contains(&sheet) {
            outcome.excluded.push(sheet);
            continue;
        }

        let name = unique_file_name(&format!("{stem}_{}", sanitize_sheet_name(&sheet)), &mut used);
        let target = dir.join(format!("{name}.csv"));
        let written = workbook
            .worksheet_range(&sheet)
            .map_err(|e| IngestError::spreadsheet(path, e))
            .and_then(|range| write_csv(&target, range.rows()));

        match written {
            Ok(rows) => {
                tracing::debug!(workbook = rel, sheet = %sheet, rows, "Sheet converted");
                outcome.outputs.push(target);
            },
            Err(e) => {
                log.error(format!("Sheet {sheet} in {rel} failed: {e}"));
                outcome.failed_sheets.push((sheet, e.to_string()));
            },
        }
    }

    log.info(format!(
        "Converted {rel}: {} sheet(s) written, {} excluded",
        outcome.outputs.len(),
        outcome.excluded.len()
    ));
    Ok(outcome)
}

fn write_csv<'a, I>(target: &Path, rows: I) -> Result<usize>
where
    I: Iterator<Item = &'a [Data]>,
{
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(target)?;
    let mut count = 0;
    for row in rows {
        writer.write_record(row.iter().map(render_cell))?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Cell text as it should appear in the CSV
pub fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(v) => v.to_string(),
        Data::Float(v) => v.to_string(),
        Data::Bool(true) => "TRUE".to_string(),
        Data::Bool(false) => "FALSE".to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|dt| dt.format(CANONICAL_FORMAT).to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

/// Sheet name made safe for a file name
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "sheet".to_string()
    } else {
        cleaned
    }
}

/// `base`, or `base_2`, `base_3`... if an earlier sheet already took it
fn unique_file_name(base: &str, used: &mut HashSet<String>) -> String {
    let mut name = base.to_string();
    let mut suffix = 2;
    while !used.insert(name.to_lowercase()) {
        name = format!("{base}_{suffix}");
        suffix += 1;
    }
    name
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    /// Workbook with a data sheet and a summary sheet
    pub(crate) fn write_report_workbook(path: &Path) {
        let mut workbook = Workbook::new();

        let data = workbook.add_worksheet();
        data.set_name("Data").unwrap();
        let headers = ["Date", "Cell Name", "PRB Utilization", "Users", "Remark"];
        for (col, header) in headers.iter().enumerate() {
            data.write_string(0, col as u16, *header).unwrap();
        }
        data.write_string(1, 0, "2026-01-06").unwrap();
        data.write_string(1, 1, "Cell-A").unwrap();
        data.write_string(1, 2, "95%").unwrap();
        data.write_number(1, 3, 120.0).unwrap();
        data.write_string(1, 4, "ok").unwrap();
        data.write_string(2, 0, "2026/01/07 00:00").unwrap();
        data.write_string(2, 1, "Cell-B").unwrap();
        data.write_string(2, 2, "12.5%").unwrap();
        data.write_number(2, 3, 7.5).unwrap();

        let summary = workbook.add_worksheet();
        summary.set_name("Summary").unwrap();
        summary.write_string(0, 0, "total").unwrap();

        workbook.save(path).unwrap();
    }

    #[test]
    fn test_excluded_sheets_produce_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        write_report_workbook(&path);
        let exclusions: BTreeSet<String> = ["Summary".to_string()].into();
        let log = RunLog::in_memory(None);

        let outcome = convert_workbook(&path, &exclusions, "report.xlsx", &log).unwrap();

        assert_eq!(outcome.outputs, vec![dir.path().join("report_Data.csv")]);
        assert_eq!(outcome.excluded, vec!["Summary".to_string()]);
        assert!(!dir.path().join("report_Summary.csv").exists());

        let text = std::fs::read_to_string(dir.path().join("report_Data.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Date,Cell Name,PRB Utilization,Users,Remark");
        assert_eq!(lines[1], "2026-01-06,Cell-A,95%,120,ok");
        assert_eq!(lines[2], "2026/01/07 00:00,Cell-B,12.5%,7.5,");
    }

    #[tokio::test]
    async fn test_bad_workbook_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("4G")).unwrap();
        std::fs::create_dir_all(dir.path().join("5G")).unwrap();
        write_report_workbook(&dir.path().join("4G").join("a.xlsx"));
        write_report_workbook(&dir.path().join("5G").join("b.xlsx"));
        std::fs::write(dir.path().join("broken.xlsx"), b"not a workbook").unwrap();

        let log = Arc::new(RunLog::in_memory(None));
        let report = convert_spreadsheets(dir.path(), Arc::new(BTreeSet::new()), 2, Arc::clone(&log))
            .await
            .unwrap();

        assert_eq!(report.workbooks.succeeded, 2);
        assert_eq!(report.workbooks.failed(), 1);
        assert_eq!(report.workbooks.failures[0].item, "broken.xlsx");
        assert_eq!(report.outputs, 4);
        assert!(dir.path().join("4G").join("a_Data.csv").is_file());
        assert!(dir.path().join("5G").join("b_Summary.csv").is_file());
    }

    #[test]
    fn test_colliding_sheet_names_get_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        let mut workbook = Workbook::new();
        for (name, value) in [("A<B", "first"), ("A_B", "second"), ("A>B", "third")] {
            let sheet = workbook.add_worksheet();
            sheet.set_name(name).unwrap();
            sheet.write_string(0, 0, value).unwrap();
        }
        workbook.save(&path).unwrap();
        let log = RunLog::in_memory(None);

        let outcome = convert_workbook(&path, &BTreeSet::new(), "report.xlsx", &log).unwrap();

        assert_eq!(
            outcome.outputs,
            vec![
                dir.path().join("report_A_B.csv"),
                dir.path().join("report_A_B_2.csv"),
                dir.path().join("report_A_B_3.csv"),
            ]
        );
        let second = std::fs::read_to_string(dir.path().join("report_A_B_2.csv")).unwrap();
        assert_eq!(second.trim_end(), "second");
    }

    #[test]
    fn test_render_cell() {
        assert_eq!(render_cell(&Data::Float(3.0)), "3");
        assert_eq!(render_cell(&Data::Float(0.125)), "0.125");
        assert_eq!(render_cell(&Data::Int(42)), "42");
        assert_eq!(render_cell(&Data::Bool(true)), "TRUE");
        assert_eq!(render_cell(&Data::Empty), "");
    }

    #[test]
    fn test_sanitize_sheet_name() {
        assert_eq!(sanitize_sheet_name("A/B:C"), "A_B_C");
        assert_eq!(sanitize_sheet_name("  "), "sheet");
        assert_eq!(sanitize_sheet_name("小区"), "小区");
    }

    #[test]
    fn test_lock_files_are_ignored() {
        assert!(is_spreadsheet("report.xlsx"));
        assert!(is_spreadsheet("legacy.xls"));
        assert!(!is_spreadsheet("~$report.xlsx"));
        assert!(!is_spreadsheet("report.csv"));
    }
}
