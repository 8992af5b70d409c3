use std::collections::HashMap;

use async_trait::async_trait;
use clickhouse::{Client, Row as ClickHouseRow};
use repl_core::{ColumnMapping, ReplError, Strategy, TableIdent, TargetConfig, Value};
use serde::Deserialize;
use tracing::debug;

use crate::ddl::{build_create_table_sql, standing_columns, EngineChoice};
use crate::insert::{render_insert_sql, PreparedRow};

/// An open ClickHouse connection plus the configuration used to build it
/// (needed for timezone/engine-policy decisions made per-table).
pub struct TargetHandle {
    pub(crate) client: Client,
    pub(crate) config: TargetConfig,
}

/// Operations a replication run needs from the target warehouse. Exists so
/// the pipeline can be tested against a fake without a live ClickHouse.
#[async_trait]
pub trait TargetAdapter: Send {
    async fn open(config: &TargetConfig) -> Result<TargetHandle, ReplError>
    where
        Self: Sized;

    async fn exists_table(&self, table: &TableIdent, prefix: &str) -> Result<bool, ReplError>;

    async fn create_table(
        &self,
        table: &TableIdent,
        prefix: &str,
        mappings: &[ColumnMapping],
        strategy: &Strategy,
        use_replacing_engine: bool,
    ) -> Result<(), ReplError>;

    async fn alter_add_column(&self, table: &TableIdent, prefix: &str, strategy: &Strategy) -> Result<(), ReplError>;

    async fn insert(
        &self,
        table: &TableIdent,
        prefix: &str,
        mappings: &[ColumnMapping],
        rows: &[PreparedRow],
    ) -> Result<(), ReplError>;

    async fn query_max(&self, table: &TableIdent, prefix: &str, column: &str) -> Result<Option<Value>, ReplError>;

    /// Distinct values of `key_column` for rows ingested within the last
    /// `lookback_days`, used to build the identity-strategy lookback set.
    async fn query_recent_keys(
        &self,
        table: &TableIdent,
        prefix: &str,
        key_column: &str,
        lookback_days: i64,
    ) -> Result<std::collections::HashSet<String>, ReplError>;

    async fn query_hashes_by_key(
        &self,
        table: &TableIdent,
        prefix: &str,
        keys: &[String],
    ) -> Result<HashMap<String, String>, ReplError>;
}

/// A dropped connection or a timed-out round trip is worth the pipeline's
/// retry loop; a rejected statement (bad column, type mismatch, duplicate
/// key violation) is not. `clickhouse` surfaces both through the same
/// opaque error type, so the split is made on the rendered message.
fn classify_insert_error(table: String, e: clickhouse::error::Error) -> ReplError {
    let detail = e.to_string();
    let lower = detail.to_ascii_lowercase();
    let transient = ["connection", "timed out", "timeout", "reset by peer", "broken pipe", "network"]
        .iter()
        .any(|kw| lower.contains(kw));
    if transient {
        ReplError::Connectivity { detail }
    } else {
        ReplError::BatchInsertFailure {
            table,
            detail: format!("insert failed, consider dropping and recreating the table: {detail}"),
        }
    }
}

pub struct ClickHouseTarget {
    pub(crate) handle: TargetHandle,
}

impl ClickHouseTarget {
    pub fn new(handle: TargetHandle) -> Self {
        Self { handle }
    }

    fn qualified(&self, table: &TableIdent, prefix: &str) -> String {
        format!(
            "{}.{}{}",
            self.handle.config.target_database,
            prefix,
            repl_core::sanitize_identifier(&table.qualified().replace('.', "_"))
        )
    }
}

#[async_trait]
impl TargetAdapter for ClickHouseTarget {
    async fn open(config: &TargetConfig) -> Result<TargetHandle, ReplError> {
        let scheme = if matches!(config.target_port, 443 | 8443) {
            "https"
        } else {
            "http"
        };
        let url = format!("{scheme}://{}:{}", config.target_host, config.target_port);
        let client = Client::default()
            .with_url(url)
            .with_user(&config.target_user)
            .with_password(config.target_password.expose());

        client
            .query(&format!(
                "CREATE DATABASE IF NOT EXISTS {}",
                config.target_database
            ))
            .execute()
            .await
            .map_err(|e| ReplError::Connectivity {
                detail: format!("failed to ensure target database: {e}"),
            })?;

        let client = client.with_database(&config.target_database);
        Ok(TargetHandle {
            client,
            config: config.clone(),
        })
    }

    async fn exists_table(&self, table: &TableIdent, prefix: &str) -> Result<bool, ReplError> {
        #[derive(ClickHouseRow, Deserialize)]
        struct CountRow {
            n: u64,
        }
        let name = self.qualified(table, prefix);
        let sql = format!(
            "SELECT count() AS n FROM system.tables WHERE database = '{}' AND name = '{}'",
            self.handle.config.target_database,
            name.rsplit('.').next().unwrap_or(&name)
        );
        let mut cursor = self
            .handle
            .client
            .query(&sql)
            .fetch::<CountRow>()
            .map_err(|e| ReplError::Connectivity {
                detail: format!("exists_table query failed: {e}"),
            })?;
        let row = cursor.next().await.map_err(|e| ReplError::Connectivity {
            detail: format!("exists_table fetch failed: {e}"),
        })?;
        Ok(row.map(|r| r.n > 0).unwrap_or(false))
    }

    async fn create_table(
        &self,
        table: &TableIdent,
        prefix: &str,
        mappings: &[ColumnMapping],
        strategy: &Strategy,
        use_replacing_engine: bool,
    ) -> Result<(), ReplError> {
        let name = self.qualified(table, prefix);
        let sql = build_create_table_sql(
            &name,
            mappings,
            strategy,
            EngineChoice::from_config(use_replacing_engine),
            &self.handle.config.target_timezone,
        );
        debug!(%name, "creating target table");
        self.handle
            .client
            .query(&sql)
            .execute()
            .await
            .map_err(|e| ReplError::BatchInsertFailure {
                table: name,
                detail: format!("create_table failed: {e}"),
            })
    }

    async fn alter_add_column(&self, table: &TableIdent, prefix: &str, strategy: &Strategy) -> Result<(), ReplError> {
        let name = self.qualified(table, prefix);
        for col in standing_columns(strategy) {
            let ddl = if col == "ingested_at" {
                format!(
                    "ALTER TABLE {name} ADD COLUMN IF NOT EXISTS `ingested_at` DateTime64(3, '{}') DEFAULT now64(3)",
                    self.handle.config.target_timezone
                )
            } else {
                format!("ALTER TABLE {name} ADD COLUMN IF NOT EXISTS `{col}` String")
            };
            self.handle.client.query(&ddl).execute().await.map_err(|_| ReplError::SchemaDrift {
                table: name.clone(),
                column: col.to_string(),
            })?;
        }
        Ok(())
    }

    async fn insert(
        &self,
        table: &TableIdent,
        prefix: &str,
        mappings: &[ColumnMapping],
        rows: &[PreparedRow],
    ) -> Result<(), ReplError> {
        if rows.is_empty() {
            return Ok(());
        }
        let name = self.qualified(table, prefix);
        let sql = render_insert_sql(&name, mappings, rows);
        self.handle
            .client
            .query(&sql)
            .execute()
            .await
            .map_err(|e| classify_insert_error(name, e))
    }

    async fn query_max(&self, table: &TableIdent, prefix: &str, column: &str) -> Result<Option<Value>, ReplError> {
        #[derive(ClickHouseRow, Deserialize)]
        struct MaxRow {
            m: Option<String>,
        }
        let name = self.qualified(table, prefix);
        let sql = format!("SELECT toString(max(`{column}`)) AS m FROM {name}");
        let mut cursor = match self.handle.client.query(&sql).fetch::<MaxRow>() {
            Ok(c) => c,
            Err(_) => return Ok(None),
        };
        match cursor.next().await {
            Ok(Some(row)) => Ok(row.m.map(Value::Text)),
            _ => Ok(None),
        }
    }

    async fn query_recent_keys(
        &self,
        table: &TableIdent,
        prefix: &str,
        key_column: &str,
        lookback_days: i64,
    ) -> Result<std::collections::HashSet<String>, ReplError> {
        #[derive(ClickHouseRow, Deserialize)]
        struct KeyRow {
            k: String,
        }
        let name = self.qualified(table, prefix);
        let sql = format!(
            "SELECT DISTINCT toString(`{key_column}`) AS k FROM {name} \
             WHERE ingested_at >= now() - INTERVAL {lookback_days} DAY"
        );
        let mut cursor = match self.handle.client.query(&sql).fetch::<KeyRow>() {
            Ok(c) => c,
            Err(_) => return Ok(std::collections::HashSet::new()),
        };
        let mut found = std::collections::HashSet::new();
        while let Ok(Some(row)) = cursor.next().await {
            found.insert(row.k);
        }
        Ok(found)
    }

    async fn query_hashes_by_key(
        &self,
        table: &TableIdent,
        prefix: &str,
        keys: &[String],
    ) -> Result<HashMap<String, String>, ReplError> {
        #[derive(ClickHouseRow, Deserialize)]
        struct HashRow {
            row_key: String,
            row_hash: String,
        }
        let name = self.qualified(table, prefix);
        let mut found = HashMap::new();
        for batch in keys.chunks(1000) {
            let list = batch.iter().map(|k| format!("'{}'", k.replace('\'', "''"))).collect::<Vec<_>>().join(", ");
            let sql = format!(
                "SELECT row_key, argMax(row_hash, ingested_at) AS row_hash FROM {name} \
                 WHERE row_key IN ({list}) GROUP BY row_key"
            );
            let mut cursor = self
                .handle
                .client
                .query(&sql)
                .fetch::<HashRow>()
                .map_err(|e| ReplError::Connectivity { detail: e.to_string() })?;
            while let Some(row) = cursor.next().await.map_err(|e| ReplError::Connectivity { detail: e.to_string() })? {
                found.insert(row.row_key, row.row_hash);
            }
        }
        Ok(found)
    }
}
