//! Report script execution
//!
//! The script is split into statements and run in order on one session.
//! Statements may create temporary tables used by later ones, so the whole
//! script shares a single connection and a single transaction. A failing
//! statement is logged and the script moves on; the transaction is
//! committed once at the end.

use crate::encoding;
use crate::error::Result;
use crate::report::StageReport;
use crate::run_log::RunLog;
use async_trait::async_trait;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError, Whitespace};
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Executor};
use std::path::Path;
use std::time::Instant;

/// Characters of a statement shown in log lines
const PREVIEW_CHARS: usize = 80;

const SAVEPOINT: &str = "udload_statement";

/// A database session that keeps state across statements
#[async_trait]
pub trait SqlSession: Send {
    async fn begin(&mut self) -> Result<()>;

    /// Run one statement; a failure must leave the session usable
    async fn execute(&mut self, statement: &str) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;
}

/// Postgres session; each statement runs under a savepoint so one error
/// does not abort the surrounding transaction
pub struct PgSession {
    conn: PgConnection,
}

impl PgSession {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    async fn simple(&mut self, sql: &str) -> Result<u64> {
        let result = self.conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SqlSession for PgSession {
    async fn begin(&mut self) -> Result<()> {
        self.simple("BEGIN").await.map(|_| ())
    }

    async fn execute(&mut self, statement: &str) -> Result<u64> {
        self.simple(&format!("SAVEPOINT {SAVEPOINT}")).await?;
        match self.simple(statement).await {
            Ok(rows) => {
                self.simple(&format!("RELEASE SAVEPOINT {SAVEPOINT}")).await?;
                Ok(rows)
            },
            Err(e) => {
                self.simple(&format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}")).await?;
                Err(e)
            },
        }
    }

    async fn commit(&mut self) -> Result<()> {
        self.simple("COMMIT").await.map(|_| ())
    }
}

/// Split a script into statements on top-level `;`
///
/// Quoted strings, identifiers and dollar-quoted bodies come through the
/// tokenizer whole, so a `;` or comment marker inside them is left alone.
/// `--` comments, lines starting with `#` and blank lines are dropped, and
/// statements with nothing but comments left are discarded.
pub fn split_statements(script: &str) -> std::result::Result<Vec<String>, TokenizerError> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, script)
        .with_unescape(false)
        .tokenize()?;

    let mut splitter = Splitter::default();
    for token in tokens {
        splitter.push(token);
    }
    Ok(splitter.finish())
}

#[derive(Default)]
struct Splitter {
    statements: Vec<String>,
    current: String,
    line: String,
    skip_line: bool,
    has_code: bool,
}

impl Splitter {
    fn push(&mut self, token: Token) {
        match token {
            Token::Whitespace(Whitespace::Newline | Whitespace::SingleLineComment { .. }) => {
                self.end_line()
            },
            _ if self.skip_line => {},
            Token::SemiColon => self.end_statement(),
            Token::Sharp if self.line.trim().is_empty() => self.skip_line = true,
            Token::Whitespace(ws) => self.line.push_str(&ws.to_string()),
            token => {
                self.line.push_str(&token.to_string());
                self.has_code = true;
            },
        }
    }

    fn end_line(&mut self) {
        let line = self.line.trim_end();
        if !line.trim_start().is_empty() {
            self.current.push_str(line);
            self.current.push('\n');
        }
        self.line.clear();
        self.skip_line = false;
    }

    fn end_statement(&mut self) {
        self.end_line();
        let statement = self.current.trim();
        if self.has_code && !statement.is_empty() {
            self.statements.push(statement.to_string());
        }
        self.current.clear();
        self.has_code = false;
    }

    fn finish(mut self) -> Vec<String> {
        self.end_statement();
        self.statements
    }
}

fn preview(statement: &str) -> String {
    let flat = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

/// Runs report scripts on a session
pub struct ScriptRunner<'a> {
    log: &'a RunLog,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(log: &'a RunLog) -> Self {
        Self { log }
    }

    /// Read and run the script at `path`; `Ok(None)` if there is no script
    pub async fn run_file<S: SqlSession + ?Sized>(
        &self,
        session: &mut S,
        path: &Path,
    ) -> Result<Option<StageReport>> {
        if !path.is_file() {
            self.log.warn(format!(
                "SQL script {} not found, skipping",
                path.display()
            ));
            return Ok(None);
        }

        let (text, _) = encoding::read_text(path)?;
        self.run(session, &text).await.map(Some)
    }

    /// Run every statement of `script`, then commit once
    pub async fn run<S: SqlSession + ?Sized>(&self, session: &mut S, script: &str) -> Result<StageReport> {
        let mut report = StageReport::default();
        let statements = match split_statements(script) {
            Ok(statements) => statements,
            Err(e) => {
                self.log.error(format!("SQL script could not be tokenized: {e}"));
                report.record_failure("script", e);
                return Ok(report);
            },
        };
        let total = statements.len();

        self.log.info(format!("Executing SQL script ({total} statement(s))..."));
        session.begin().await?;

        for (index, statement) in statements.iter().enumerate() {
            let position = index + 1;
            self.log.info(format!(
                "Executing SQL ({position}/{total}): {}",
                preview(statement)
            ));

            let started = Instant::now();
            match session.execute(statement).await {
                Ok(rows) => {
                    self.log.info(format!(
                        "Done in {:.2}s ({rows} row(s) affected)",
                        started.elapsed().as_secs_f64()
                    ));
                    report.record_success();
                },
                Err(e) => {
                    self.log.error(format!("SQL failed ({position}/{total}): {e}"));
                    report.record_failure(format!("statement {position}"), e);
                },
            }
        }

        session.commit().await?;
        self.log.success(format!(
            "SQL script finished: {} succeeded, {} failed",
            report.succeeded,
            report.failed()
        ));
        Ok(report)
    }
}
