//! Delimited files as raw text tables

use crate::encoding::{self, TextEncoding};
use crate::error::Result;
use std::path::Path;

/// A delimited file held in memory, every cell as raw text
///
/// Cells are stored column-major so each column can be coerced on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    /// `columns[c][r]`; `None` where a short row had no cell
    pub columns: Vec<Vec<Option<String>>>,
    pub row_count: usize,
}

impl RawTable {
    /// Parse CSV text with a header row
    ///
    /// Headers are kept verbatim apart from a leading byte-order mark, since
    /// alias matching is exact.
    pub fn from_csv_str(text: &str) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        let mut row_count = 0;

        for record in reader.records() {
            let record = record?;
            if record.iter().all(|cell| cell.is_empty()) {
                continue;
            }
            for (index, column) in columns.iter_mut().enumerate() {
                column.push(record.get(index).map(str::to_string));
            }
            row_count += 1;
        }

        Ok(Self {
            headers,
            columns,
            row_count,
        })
    }

    /// Read a file, detecting its text encoding first
    pub fn read(path: &Path) -> Result<(Self, TextEncoding)> {
        let (text, encoding) = encoding::read_text(path)?;
        Ok((Self::from_csv_str(&text)?, encoding))
    }

    pub fn column(&self, index: usize) -> Option<&[Option<String>]> {
        self.columns.get(index).map(Vec::as_slice)
    }
}
