//! Shared helpers for the PostgreSQL integration tests
//!
//! Each test starts its own throwaway PostgreSQL container, so tests stay
//! isolated from each other and from any local database.

use anyhow::{Context, Result};
use std::path::Path;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;
use udload_common::types::{DeclaredType, FieldDefinition};
use udload_ingest::config::{AppConfig, DatabaseConfig};

/// PostgreSQL test container wrapper
pub struct TestPostgres {
    // Dropping the handle stops the container
    _container: ContainerAsync<Postgres>,
    database: DatabaseConfig,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let database = DatabaseConfig {
            host: host.to_string(),
            port,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            dbname: "postgres".to_string(),
            ..DatabaseConfig::default()
        };

        Ok(Self {
            _container: container,
            database,
        })
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    /// Configuration with the report field mapping, pointed at this container
    pub fn app_config(&self, sql_script: &Path) -> AppConfig {
        let mut config = AppConfig {
            database: self.database.clone(),
            fields: report_fields(),
            ..AppConfig::default()
        };
        config.options.sql_script = sql_script.to_path_buf();
        config.options.batch_size = 2;
        config
    }
}

/// DATE, CELL, USERS, PRB_UTIL and NOTE
pub fn report_fields() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition::new("DATE", ["Date", "日期"], DeclaredType::Datetime).expect("DATE"),
        FieldDefinition::new("CELL", ["Cell Name"], DeclaredType::String).expect("CELL"),
        FieldDefinition::new("USERS", ["Users"], DeclaredType::Int).expect("USERS"),
        FieldDefinition::new("PRB_UTIL", ["PRB Utilization"], DeclaredType::Float).expect("PRB_UTIL"),
        FieldDefinition::new("NOTE", ["Remark"], DeclaredType::Text).expect("NOTE"),
    ]
}

/// Initialize test tracing once per process
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,udload_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
