//! Run orchestration
//!
//! A run walks `Unzipping -> Converting -> Loading -> Scripting` and ends in
//! `Completed` or `Failed`. Item-level failures are logged inside each
//! stage; anything a stage returns as an error aborts the run. The scratch
//! directory and every connection are released on both exits.

use crate::archive::normalize_archives;
use crate::config::{AppConfig, DatabaseConfig};
use crate::db;
use crate::discovery::discover_data_directories;
use crate::error::{IngestError, Result};
use crate::loader::postgres::PgTarget;
use crate::loader::{BulkLoader, FastPath, LoadTarget, TableSummary};
use crate::report::StageReport;
use crate::run_log::{LogObserver, RunLog};
use crate::schema::SchemaMapper;
use crate::script::{PgSession, ScriptRunner, SqlSession};
use crate::spreadsheet::convert_spreadsheets;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Run log artifact, relative to the working directory
pub const LOG_FILE_NAME: &str = "log.txt";

/// Bulk-load scratch directory, relative to the working directory
pub const SCRATCH_DIR_NAME: &str = ".bulk_tmp";

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Unzipping,
    Converting,
    Loading,
    Scripting,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    /// Move to `next` if it directly follows the current state
    ///
    /// `Failed` is reachable from any non-terminal state. Returns false,
    /// leaving the state unchanged, for any other transition.
    pub fn advance(&mut self, next: RunState) -> bool {
        use RunState::*;

        let allowed = match (*self, next) {
            (current, Failed) => !current.is_terminal(),
            (Idle, Unzipping)
            | (Unzipping, Converting)
            | (Converting, Loading)
            | (Loading, Scripting)
            | (Scripting, Completed) => true,
            _ => false,
        };

        if allowed {
            *self = next;
        } else {
            tracing::warn!(from = ?*self, to = ?next, "Rejected run state transition");
        }
        allowed
    }
}

/// Outcome of [`Pipeline::run`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub elapsed_seconds: f64,
    /// First fatal error, if the run failed
    pub error: Option<String>,
    pub state: RunState,
    pub tables: Vec<TableSummary>,
}

impl RunResult {
    fn failed_before_start(error: impl std::fmt::Display, started: Instant) -> Self {
        Self {
            success: false,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            error: Some(error.to_string()),
            state: RunState::Failed,
            tables: Vec::new(),
        }
    }
}

/// Opens the connections a run needs
///
/// Every target and session handed out is given back through the matching
/// `release_*` call, whether or not its work succeeded.
#[async_trait]
pub trait Connector: Send + Sync {
    type Target: LoadTarget;
    type Session: SqlSession;

    /// A fresh load target for one data directory
    async fn load_target(&self, scratch_dir: &Path) -> Result<Self::Target>;

    async fn release_target(&self, target: Self::Target) -> Result<()>;

    /// A dedicated session for the report script
    async fn script_session(&self) -> Result<Self::Session>;

    async fn release_session(&self, session: Self::Session) -> Result<()>;
}

/// Connector for the configured PostgreSQL database
#[derive(Debug, Clone)]
pub struct PgConnector {
    database: DatabaseConfig,
    batch_size: usize,
}

impl PgConnector {
    pub fn new(database: DatabaseConfig, batch_size: usize) -> Self {
        Self {
            database,
            batch_size,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Target = PgTarget;
    type Session = PgSession;

    async fn load_target(&self, scratch_dir: &Path) -> Result<PgTarget> {
        let conn = db::connect_for_load(&self.database).await?;
        Ok(PgTarget::new(conn, scratch_dir, self.batch_size))
    }

    async fn release_target(&self, target: PgTarget) -> Result<()> {
        target.close().await
    }

    async fn script_session(&self) -> Result<PgSession> {
        Ok(PgSession::new(db::connect(&self.database).await?))
    }

    async fn release_session(&self, session: PgSession) -> Result<()> {
        session.close().await
    }
}

/// The ingestion pipeline
pub struct Pipeline<C = PgConnector> {
    config: AppConfig,
    schema: Arc<SchemaMapper>,
    connector: C,
    observer: Option<LogObserver>,
}

impl Pipeline<PgConnector> {
    /// Pipeline against the configured database
    pub fn new(config: AppConfig) -> Result<Self> {
        let connector = PgConnector::new(config.database.clone(), config.options.batch_size);
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> Pipeline<C> {
    pub fn with_connector(config: AppConfig, connector: C) -> Result<Self> {
        let schema = Arc::new(SchemaMapper::new(&config.fields)?);
        Ok(Self {
            config,
            schema,
            connector,
            observer: None,
        })
    }

    /// Receive every run-log entry as it is emitted
    pub fn with_observer(mut self, observer: LogObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Process `working_dir` end to end
    ///
    /// Never returns an error: a fatal failure is reported in the result
    /// and the full trail is in `<working_dir>/log.txt`.
    pub async fn run(&self, working_dir: &Path) -> RunResult {
        let started = Instant::now();

        if !working_dir.is_dir() {
            return RunResult::failed_before_start(
                format!("working directory {} does not exist", working_dir.display()),
                started,
            );
        }

        let log = Arc::new(RunLog::to_file(
            working_dir.join(LOG_FILE_NAME),
            self.observer.clone(),
        ));
        log.info(format!(
            "Processing started, working directory: {}",
            working_dir.display()
        ));

        let mut state = RunState::Idle;
        let mut tables = Vec::new();
        let outcome = self
            .run_stages(working_dir, &log, &mut state, &mut tables)
            .await;

        self.cleanup(working_dir, &log).await;
        let elapsed_seconds = started.elapsed().as_secs_f64();

        let error = match outcome {
            Ok(()) => {
                state.advance(RunState::Completed);
                log.success(format!("Processing completed in {elapsed_seconds:.2}s"));
                None
            },
            Err(e) => {
                state.advance(RunState::Failed);
                log.error(format!("Processing failed: {e}"));
                Some(e.to_string())
            },
        };

        if log.artifact_failed() {
            tracing::warn!(path = ?log.path(), "Run log artifact is incomplete");
        }

        RunResult {
            success: error.is_none(),
            elapsed_seconds,
            error,
            state,
            tables,
        }
    }

    async fn run_stages(
        &self,
        working_dir: &Path,
        log: &Arc<RunLog>,
        state: &mut RunState,
        tables: &mut Vec<TableSummary>,
    ) -> Result<()> {
        let options = &self.config.options;

        state.advance(RunState::Unzipping);
        let root = working_dir.to_path_buf();
        let stage_log = Arc::clone(log);
        tokio::task::spawn_blocking(move || normalize_archives(&root, &stage_log)).await??;

        state.advance(RunState::Converting);
        convert_spreadsheets(
            working_dir,
            Arc::new(options.sheet_filter.clone()),
            options.worker_count(),
            Arc::clone(log),
        )
        .await?;

        state.advance(RunState::Loading);
        self.load_tables(working_dir, log, tables).await?;

        state.advance(RunState::Scripting);
        self.execute_script(log).await?;

        Ok(())
    }

    async fn load_tables(
        &self,
        working_dir: &Path,
        log: &Arc<RunLog>,
        tables: &mut Vec<TableSummary>,
    ) -> Result<()> {
        log.info("Loading CSV files into the database...");

        let data_dirs = discover_data_directories(working_dir)?;
        if data_dirs.is_empty() {
            log.warn("No data directories found");
            return Ok(());
        }

        let scratch_dir = working_dir.join(SCRATCH_DIR_NAME);
        let loader = BulkLoader::new(
            Arc::clone(&self.schema),
            self.config.options.clone(),
            Arc::new(FastPath::new(self.config.options.fast_path)),
            Arc::clone(log),
            working_dir,
        );

        for data_dir in &data_dirs {
            let mut target = self.connector.load_target(&scratch_dir).await?;
            let loaded = loader.load_directory(&mut target, data_dir).await;

            if let Err(e) = self.connector.release_target(target).await {
                tracing::warn!(table = %data_dir.table, error = %e, "Failed to close load connection");
            }

            let (summary, _) = loaded?;
            tables.push(summary);
        }

        Ok(())
    }

    async fn execute_script(&self, log: &RunLog) -> Result<Option<StageReport>> {
        let path = &self.config.options.sql_script;
        if !path.is_file() {
            log.warn(format!("SQL script {} not found, skipping", path.display()));
            return Ok(None);
        }

        let mut session = self.connector.script_session().await?;
        let outcome = ScriptRunner::new(log).run_file(&mut session, path).await;

        if let Err(e) = self.connector.release_session(session).await {
            tracing::warn!(error = %e, "Failed to close script connection");
        }

        outcome
    }

    /// Run only the report script, outside any working directory
    pub async fn run_script(&self) -> Result<Option<StageReport>> {
        let log = RunLog::in_memory(self.observer.clone());
        self.execute_script(&log).await
    }

    async fn cleanup(&self, working_dir: &Path, log: &RunLog) {
        let scratch_dir = working_dir.join(SCRATCH_DIR_NAME);
        match tokio::fs::remove_dir_all(&scratch_dir).await {
            Ok(()) => tracing::debug!(path = %scratch_dir.display(), "Scratch directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => log.warn(format!(
                "Could not remove scratch directory {}: {e}",
                scratch_dir.display()
            )),
        }
    }
}

/// Synchronous entry point: build a runtime and process `working_dir`
pub fn run_blocking(
    config: AppConfig,
    working_dir: impl Into<PathBuf>,
    observer: Option<LogObserver>,
) -> RunResult {
    let started = Instant::now();
    let working_dir = working_dir.into();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => return RunResult::failed_before_start(IngestError::Io(e), started),
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => return RunResult::failed_before_start(e, started),
    };
    let pipeline = match observer {
        Some(observer) => pipeline.with_observer(observer),
        None => pipeline,
    };

    runtime.block_on(pipeline.run(&working_dir))
}
