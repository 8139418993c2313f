//! Database connections
//!
//! The loader and the script runner each need a connection they own
//! outright (session state must not leak between callers), so this module
//! opens single connections rather than a pool.

use crate::config::DatabaseConfig;
use crate::discovery::TABLE_SUFFIX;
use crate::error::{IngestError, Result};
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;

/// Connection options for `config`, server defaults otherwise
pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.dbname)
        .application_name("udload-ingest")
}

/// Options for a bulk-load connection: [`connect_options`] plus the
/// configured statement timeout
pub fn load_connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    connect_options(config)
        .options([("statement_timeout", format!("{}s", config.statement_timeout_secs))])
}

/// Open one dedicated connection with server-default timeouts
///
/// Used for report scripts and maintenance commands, whose statements may
/// legitimately run long.
pub async fn connect(config: &DatabaseConfig) -> Result<PgConnection> {
    open(config, connect_options(config)).await
}

/// Open one dedicated connection for loading a table
pub async fn connect_for_load(config: &DatabaseConfig) -> Result<PgConnection> {
    open(config, load_connect_options(config)).await
}

async fn open(config: &DatabaseConfig, options: PgConnectOptions) -> Result<PgConnection> {
    let timeout = Duration::from_secs(config.connect_timeout_secs.max(1));

    let conn = tokio::time::timeout(timeout, options.connect())
        .await
        .map_err(|_| {
            IngestError::ConnectTimeout(format!(
                "{}:{}/{}",
                config.host, config.port, config.dbname
            ))
        })??;

    tracing::debug!(
        host = %config.host,
        port = config.port,
        database = %config.dbname,
        "Database connection opened"
    );
    Ok(conn)
}

/// Connect and run `SELECT 1`
pub async fn test_connection(config: &DatabaseConfig) -> Result<()> {
    let mut conn = connect(config).await?;
    sqlx::query("SELECT 1").execute(&mut conn).await?;
    conn.close().await?;
    Ok(())
}

/// A destination table and its row count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub rows: i64,
}

/// Destination tables (`*_UD`) in the current schema
pub async fn list_tables(conn: &mut PgConnection) -> Result<Vec<TableInfo>> {
    let names: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT table_name::text
        FROM information_schema.tables
        WHERE table_schema = current_schema()
          AND table_type = 'BASE TABLE'
          AND right(table_name::text, $1) = $2
        ORDER BY table_name
        "#,
    )
    .bind(TABLE_SUFFIX.len() as i32)
    .bind(TABLE_SUFFIX)
    .fetch_all(&mut *conn)
    .await?;

    let mut tables = Vec::with_capacity(names.len());
    for (name,) in names {
        let (rows,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", quote_ident(&name)))
            .fetch_one(&mut *conn)
            .await?;
        tables.push(TableInfo { name, rows });
    }
    Ok(tables)
}

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
