//! PostgreSQL load target
//!
//! Fast path: rows are written to a tab-separated file in the run's scratch
//! directory and streamed to the server with `COPY ... FROM STDIN`.
//! Fallback: multi-row `INSERT` statements built with `QueryBuilder`.

use super::{LoadTarget, NormalizedRow};
use crate::coerce::CellValue;
use crate::db::quote_ident;
use crate::error::{IngestError, Result};
use crate::schema::Column;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::PgConnection;
use sqlx::query_builder::Separated;
use sqlx::{Connection, Postgres, QueryBuilder};
use std::path::{Path, PathBuf};
use udload_common::types::DeclaredType;

/// Bind parameters allowed in one statement
pub const MAX_BIND_PARAMS: usize = 65_535;

/// SQL column type for a declared type
pub fn column_type(declared: DeclaredType) -> &'static str {
    match declared {
        DeclaredType::String => "VARCHAR(255)",
        DeclaredType::Text => "TEXT",
        DeclaredType::Int => "BIGINT",
        DeclaredType::Float => "DOUBLE PRECISION",
        DeclaredType::Datetime => "TIMESTAMP",
    }
}

/// `CREATE TABLE` for the canonical columns
pub fn create_table_sql(table: &str, columns: &[Column]) -> String {
    let definitions: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), column_type(c.declared_type)))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        definitions.join(", ")
    )
}

fn column_list(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Encode rows in `COPY` text format (`\N` for null)
pub fn encode_copy_rows(rows: &[NormalizedRow]) -> Vec<u8> {
    let mut out = String::new();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if index > 0 {
                out.push('\t');
            }
            match cell.render() {
                None => out.push_str("\\N"),
                Some(text) => {
                    for ch in text.chars() {
                        match ch {
                            '\\' => out.push_str("\\\\"),
                            '\t' => out.push_str("\\t"),
                            '\n' => out.push_str("\\n"),
                            '\r' => out.push_str("\\r"),
                            ch => out.push(ch),
                        }
                    }
                },
            }
        }
        out.push('\n');
    }
    out.into_bytes()
}

/// Rows per `INSERT` so one statement stays under the bind limit
pub fn insert_batch_rows(batch_size: usize, column_count: usize) -> usize {
    let by_params = MAX_BIND_PARAMS / column_count.max(1);
    batch_size.min(by_params).max(1)
}

fn push_cell(b: &mut Separated<'_, '_, Postgres, &'static str>, cell: &CellValue, declared: DeclaredType) {
    match cell {
        CellValue::Null => match declared {
            DeclaredType::Int => b.push_bind(None::<i64>),
            DeclaredType::Float => b.push_bind(None::<f64>),
            DeclaredType::Datetime => b.push_bind(None::<NaiveDateTime>),
            DeclaredType::String | DeclaredType::Text => b.push_bind(None::<String>),
        },
        CellValue::Text(s) => b.push_bind(s.clone()),
        CellValue::Int(v) => b.push_bind(*v),
        CellValue::Float(v) => b.push_bind(*v),
        CellValue::Timestamp(dt) => b.push_bind(*dt),
    };
}

/// Load target backed by one dedicated connection
pub struct PgTarget {
    conn: PgConnection,
    scratch_dir: PathBuf,
    batch_size: usize,
    sequence: u64,
}

impl PgTarget {
    pub fn new(conn: PgConnection, scratch_dir: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            conn,
            scratch_dir: scratch_dir.into(),
            batch_size,
            sequence: 0,
        }
    }

    /// Close the underlying connection
    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    fn next_scratch_file(&mut self, table: &str) -> PathBuf {
        self.sequence += 1;
        let stem: String = table
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.scratch_dir
            .join(format!("{stem}_{}_{}.tsv", std::process::id(), self.sequence))
    }

    async fn stream_file(&mut self, statement: &str, path: &Path) -> Result<u64> {
        let file = tokio::fs::File::open(path).await?;
        let mut copy = self.conn.copy_in_raw(statement).await?;

        if let Err(e) = copy.read_from(file).await {
            // Ends the COPY so the connection stays usable
            if let Err(abort_err) = copy.abort(e.to_string()).await {
                tracing::debug!(error = %abort_err, "COPY abort reported an error");
            }
            return Err(e.into());
        }

        Ok(copy.finish().await?)
    }
}

#[async_trait]
impl LoadTarget for PgTarget {
    async fn drop_table(&mut self, table: &str) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn create_table(&mut self, table: &str, columns: &[Column]) -> Result<()> {
        if columns.is_empty() {
            return Err(IngestError::BulkLoad(format!(
                "no columns defined for table {table}"
            )));
        }
        sqlx::query(&create_table_sql(table, columns))
            .execute(&mut self.conn)
            .await?;
        tracing::debug!(table, columns = columns.len(), "Table created");
        Ok(())
    }

    async fn copy_rows(&mut self, table: &str, columns: &[Column], rows: &[NormalizedRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let path = self.next_scratch_file(table);
        tokio::fs::write(&path, encode_copy_rows(rows)).await?;

        let statement = format!(
            "COPY {} ({}) FROM STDIN",
            quote_ident(table),
            column_list(columns)
        );
        let result = self.stream_file(&statement, &path).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove bulk-load temp file");
        }

        result
    }

    async fn insert_rows(&mut self, table: &str, columns: &[Column], rows: &[NormalizedRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let per_statement = insert_batch_rows(self.batch_size, columns.len());
        let prefix = format!("INSERT INTO {} ({}) ", quote_ident(table), column_list(columns));
        let mut tx = self.conn.begin().await?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(per_statement) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
            query_builder.push_values(chunk, |mut b, row| {
                for (cell, column) in row.iter().zip(columns) {
                    push_cell(&mut b, cell, column.declared_type);
                }
            });

            let result = query_builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}
