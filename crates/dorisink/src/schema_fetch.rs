//! Schema acquisition.
//!
//! The target table's column list comes from one of two places, chosen by
//! `schema.mode`: a live `DESCRIBE` against a Doris frontend over the MySQL
//! protocol, or a column list written out in configuration. Either way the
//! schema is fixed for the life of the process.

use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::Row as SqlxRow;
use tracing::{debug, info};

use dorisink_core::{Column, ColumnType, Result, Schema, SinkError};

use crate::config::{DorisConfig, ManualSchemaConfig};

/// `DESCRIBE` the table through the first frontend's query port and fold
/// the reported Doris types into the internal type set.
pub async fn fetch_from_doris(cfg: &DorisConfig) -> Result<Schema> {
    let fe = cfg
        .fe_hosts
        .first()
        .ok_or_else(|| SinkError::SchemaFetch("no frontend hosts configured".to_string()))?;
    let host = fe.split(':').next().unwrap_or(fe);

    info!(
        host,
        port = cfg.query_port,
        database = %cfg.database,
        table = %cfg.table,
        "connecting to doris to fetch schema"
    );

    let options = MySqlConnectOptions::new()
        .host(host)
        .port(cfg.query_port)
        .username(&cfg.user)
        .password(&cfg.password)
        .database(&cfg.database);

    let pool = MySqlPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .map_err(|e| SinkError::SchemaFetch(format!("failed to connect to doris: {}", e)))?;

    let query = format!("DESCRIBE `{}`.`{}`", cfg.database, cfg.table);
    debug!(query = %query, "executing describe query");

    let rows = sqlx::query(&query)
        .fetch_all(&pool)
        .await
        .map_err(|e| SinkError::SchemaFetch(format!("failed to describe table: {}", e)))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let field: String = row
            .try_get("Field")
            .map_err(|e| SinkError::SchemaFetch(format!("failed to read Field column: {}", e)))?;
        let doris_type: String = row
            .try_get("Type")
            .map_err(|e| SinkError::SchemaFetch(format!("failed to read Type column: {}", e)))?;

        columns.push(Column::new(field, ColumnType::parse_doris(&doris_type)));
    }

    pool.close().await;

    if columns.is_empty() {
        return Err(SinkError::SchemaFetch("no columns found in table".to_string()));
    }

    let schema = Schema::new(columns)?;
    info!(
        column_count = schema.column_count(),
        schema = %schema,
        "schema fetched successfully"
    );

    Ok(schema)
}

/// Build the schema from the configured column list.
pub fn schema_from_config(cfg: &ManualSchemaConfig) -> Result<Schema> {
    if cfg.columns.is_empty() {
        return Err(SinkError::SchemaFetch(
            "no columns in manual schema config".to_string(),
        ));
    }

    let columns = cfg
        .columns
        .iter()
        .map(|c| Column::new(c.name.clone(), ColumnType::parse_doris(&c.column_type)))
        .collect();

    let schema = Schema::new(columns)?;
    info!(column_count = schema.column_count(), "schema loaded from config");

    Ok(schema)
}
