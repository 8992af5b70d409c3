//! Replication driver (§4.8): enumerates tables, filters, runs the
//! per-table pipeline, and accumulates a run-wide summary. A single table's
//! failure never aborts the run.

use std::time::Duration;

use repl_core::{ReplConfig, TableIdent};
use repl_source::SourceAdapter;
use repl_target::TargetAdapter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pipeline::{replicate_table, ClassificationCounts};

#[derive(Debug, Clone)]
pub enum TableResult {
    Ok {
        table: TableIdent,
        rows: u64,
        columns: usize,
        strategy: &'static str,
        degraded: bool,
        classification: Option<ClassificationCounts>,
    },
    Err {
        table: TableIdent,
        reason: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tables_ok: u64,
    pub tables_failed: u64,
    pub rows_total: u64,
    pub duration: Duration,
    pub results: Vec<TableResult>,
}

impl RunSummary {
    /// Non-zero exit code is warranted only when nothing succeeded and at
    /// least one table was attempted — the CLI surface's contract from §6.2.
    pub fn is_fatal(&self) -> bool {
        self.tables_ok == 0 && self.tables_failed > 0
    }
}

pub async fn run<S: SourceAdapter, T: TargetAdapter>(
    source: &mut S,
    target: &T,
    config: &ReplConfig,
    cancel: &CancellationToken,
) -> Result<RunSummary, repl_core::ReplError> {
    let started = tokio::time::Instant::now();

    let all_tables = source.list_tables(&config.excluded_table_prefixes).await?;
    let tables = filter_tables(all_tables, config);

    let mut summary = RunSummary::default();
    for table in tables {
        if cancel.is_cancelled() {
            warn!("cancellation requested, stopping before starting further tables");
            break;
        }
        match replicate_table(source, target, &table, config, cancel).await {
            Ok(outcome) => {
                summary.tables_ok += 1;
                summary.rows_total += outcome.rows_inserted;
                info!(
                    table = %table,
                    rows = outcome.rows_inserted,
                    strategy = outcome.strategy,
                    "OK"
                );
                summary.results.push(TableResult::Ok {
                    table,
                    rows: outcome.rows_inserted,
                    columns: outcome.columns,
                    strategy: outcome.strategy,
                    degraded: outcome.degraded,
                    classification: outcome.classification,
                });
            }
            Err(e) => {
                summary.tables_failed += 1;
                warn!(table = %table, error = %e, "ERROR");
                summary.results.push(TableResult::Err {
                    table,
                    reason: e.to_string(),
                });
            }
        }
    }

    summary.duration = started.elapsed();
    if summary.is_fatal() {
        error!(
            tables_ok = summary.tables_ok,
            tables_failed = summary.tables_failed,
            "replication run failed for every attempted table"
        );
    } else {
        info!(
            tables_ok = summary.tables_ok,
            tables_failed = summary.tables_failed,
            rows_total = summary.rows_total,
            duration = ?summary.duration,
            "replication run complete"
        );
    }

    Ok(summary)
}

fn filter_tables(all: Vec<TableIdent>, config: &ReplConfig) -> Vec<TableIdent> {
    match &config.tables_filter {
        Some(include) => all
            .into_iter()
            .filter(|t| include.iter().any(|name| name.eq_ignore_ascii_case(&t.name)))
            .collect(),
        None => all,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_fatal_only_when_nothing_succeeded() {
        let mut summary = RunSummary::default();
        summary.tables_failed = 2;
        assert!(summary.is_fatal());
        summary.tables_ok = 1;
        assert!(!summary.is_fatal());
    }

    #[test]
    fn filter_tables_keeps_only_included_names() {
        let config_tables = vec![TableIdent::new("dbo", "Orders"), TableIdent::new("dbo", "Logs")];
        let mut cfg = test_config();
        cfg.tables_filter = Some(vec!["orders".to_string()]);
        let filtered = filter_tables(config_tables, &cfg);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Orders");
    }

    fn test_config() -> ReplConfig {
        use repl_core::{AuthMode, Secret, SourceConfig, TargetConfig, TlsMode};
        ReplConfig {
            source: SourceConfig {
                source_host: "localhost".to_string(),
                source_database: "db".to_string(),
                source_user: "sa".to_string(),
                source_password: Secret::default(),
                source_auth_mode: AuthMode::Sql,
                source_driver_preference: vec![TlsMode::Required],
            },
            target: TargetConfig {
                target_host: "localhost".to_string(),
                target_port: 8123,
                target_user: "default".to_string(),
                target_password: Secret::default(),
                target_database: "db".to_string(),
                target_timezone: "UTC".to_string(),
            },
            chunk_size: 10_000,
            target_table_prefix: String::new(),
            incremental: true,
            preferred_identity_column: "Id".to_string(),
            lookback_days: 7,
            use_replacing_engine: true,
            excluded_table_prefixes: vec!["TMP_".to_string()],
            tables_filter: None,
            max_rows_per_table: None,
        }
    }
}
