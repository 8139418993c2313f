//! Loader configuration
//!
//! Field mapping, sheet exclusions and database credentials come from a JSON
//! file (`Configure.json` by default) maintained by the configuration UI.
//! `UDLOAD_*` environment variables, including ones from a `.env` file,
//! override the file. Everything is validated once here so later stages
//! only see typed values.

use crate::schema::SchemaMapper;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use udload_common::types::FieldDefinition;
use udload_common::{Result, UdloadError};

// ============================================================================
// Defaults
// ============================================================================

/// Configuration file used when neither `--config` nor `UDLOAD_CONFIG` is given.
pub const DEFAULT_CONFIG_FILE: &str = "Configure.json";

/// Report script executed after loading.
pub const DEFAULT_SQL_SCRIPT: &str = "ReportScript.sql";

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_DB_NAME: &str = "CapacityReport";
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Statement timeout applied to the loader's bulk connection.
pub const DEFAULT_DB_STATEMENT_TIMEOUT_SECS: u64 = 300;

/// Rows per bulk-load batch.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Progress is logged every this many files.
pub const DEFAULT_PROGRESS_EVERY: usize = 10;

/// A data file needs at least this many recognised columns.
pub const DEFAULT_MIN_MATCHED_COLUMNS: usize = 4;

/// Files whose path contains this marker are auxiliary, not data.
pub const DEFAULT_AUXILIARY_MARKER: &str = "kpis";

/// Upper bound on spreadsheet conversion workers.
pub const MAX_CONVERSION_WORKERS: usize = 8;

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(rename = "MySQL_DBInfo", alias = "Database", default)]
    database: RawDatabase,
    #[serde(rename = "SheetFilter", default)]
    sheet_filter: Vec<String>,
    #[serde(rename = "ExtractField", default)]
    extract_fields: Vec<RawField>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDatabase {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    passwd: Option<String>,
    dbname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    #[serde(rename = "Field")]
    field: String,
    #[serde(rename = "Extract", default)]
    extract: Vec<String>,
    #[serde(rename = "Type", default)]
    declared_type: Option<String>,
}

// ============================================================================
// Typed configuration
// ============================================================================

/// Database connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub connect_timeout_secs: u64,
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            user: DEFAULT_DB_USER.to_string(),
            password: String::new(),
            dbname: DEFAULT_DB_NAME.to_string(),
            connect_timeout_secs: DEFAULT_DB_CONNECT_TIMEOUT_SECS,
            statement_timeout_secs: DEFAULT_DB_STATEMENT_TIMEOUT_SECS,
        }
    }
}

/// Tunables for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Sheets with these names are never converted
    pub sheet_filter: BTreeSet<String>,
    /// Report script, read at script-execution time
    pub sql_script: PathBuf,
    pub batch_size: usize,
    pub progress_every: usize,
    pub min_matched_columns: usize,
    pub auxiliary_marker: String,
    pub max_workers: usize,
    /// Try `COPY FROM STDIN` before falling back to batched inserts
    pub fast_path: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            sheet_filter: BTreeSet::new(),
            sql_script: PathBuf::from(DEFAULT_SQL_SCRIPT),
            batch_size: DEFAULT_BATCH_SIZE,
            progress_every: DEFAULT_PROGRESS_EVERY,
            min_matched_columns: DEFAULT_MIN_MATCHED_COLUMNS,
            auxiliary_marker: DEFAULT_AUXILIARY_MARKER.to_string(),
            max_workers: MAX_CONVERSION_WORKERS,
            fast_path: true,
        }
    }
}

impl PipelineOptions {
    /// Worker count for spreadsheet conversion: host cores, capped
    pub fn worker_count(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        cores.clamp(1, self.max_workers.max(1))
    }
}

/// Complete, validated configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub fields: Vec<FieldDefinition>,
    pub options: PipelineOptions,
}

impl AppConfig {
    /// Load configuration from `path`, `UDLOAD_CONFIG` or the default file
    ///
    /// A missing file is not an error: defaults are used and environment
    /// overrides still apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("UDLOAD_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            Self::from_json(&text)?
        } else {
            tracing::warn!(path = %path.display(), "Configuration file not found, using defaults");
            Self::default()
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the JSON configuration document
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(text)?;

        let fields = raw
            .extract_fields
            .into_iter()
            .map(|f| FieldDefinition::parse(&f.field, f.extract, f.declared_type.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        let defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            host: raw.database.host.unwrap_or(defaults.host),
            port: raw.database.port.unwrap_or(defaults.port),
            user: raw.database.user.unwrap_or(defaults.user),
            password: raw.database.passwd.unwrap_or(defaults.password),
            dbname: raw.database.dbname.unwrap_or(defaults.dbname),
            ..defaults
        };

        let options = PipelineOptions {
            sheet_filter: raw.sheet_filter.into_iter().collect(),
            ..PipelineOptions::default()
        };

        Ok(Self {
            database,
            fields,
            options,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("UDLOAD_DB_HOST") {
            self.database.host = host;
        }
        if let Ok(port) = std::env::var("UDLOAD_DB_PORT") {
            self.database.port = port
                .parse()
                .map_err(|_| UdloadError::config(format!("UDLOAD_DB_PORT is not a port: {port}")))?;
        }
        if let Ok(user) = std::env::var("UDLOAD_DB_USER") {
            self.database.user = user;
        }
        if let Ok(password) = std::env::var("UDLOAD_DB_PASSWORD") {
            self.database.password = password;
        }
        if let Ok(dbname) = std::env::var("UDLOAD_DB_NAME") {
            self.database.dbname = dbname;
        }
        if let Ok(timeout) = std::env::var("UDLOAD_DB_CONNECT_TIMEOUT") {
            self.database.connect_timeout_secs = timeout.parse().map_err(|_| {
                UdloadError::config(format!("UDLOAD_DB_CONNECT_TIMEOUT is not a number of seconds: {timeout}"))
            })?;
        }
        if let Ok(script) = std::env::var("UDLOAD_SQL_SCRIPT") {
            self.options.sql_script = PathBuf::from(script);
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.port == 0 {
            return Err(UdloadError::config("database port must be greater than 0"));
        }

        if self.database.dbname.trim().is_empty() {
            return Err(UdloadError::config("database name cannot be empty"));
        }

        if self.options.batch_size == 0 {
            return Err(UdloadError::config("batch size must be greater than 0"));
        }

        if self.fields.is_empty() {
            tracing::warn!("No field definitions configured - every data file will be rejected");
        }

        // Alias conflicts surface here rather than mid-run
        SchemaMapper::new(&self.fields)?;

        Ok(())
    }
}
