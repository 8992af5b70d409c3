//! The per-table chunk pipeline (§4.7): `Planned → Preparing → Scanning →
//! Completed`, with `Failed` reachable from any state and a bounded retry
//! loop absorbing transient connectivity failures.

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use repl_core::{
    build_column_mappings, ChangeClassification, ColumnType, ReplConfig, ReplError, Strategy, TableIdent, TableSpec,
    Value,
};
use repl_source::{Predicate, SourceAdapter};
use repl_target::{PreparedRow, TargetAdapter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::hash::{classify_batch, row_hash, row_key};
use crate::strategy::select_strategy;
use crate::watermark::{ids_within_lookback, maximum, LookbackPredicate};

const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Planned,
    Preparing,
    Scanning,
    Completed,
    Failed,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClassificationCounts {
    pub new: u64,
    pub updated: u64,
    pub duplicate: u64,
}

#[derive(Debug, Clone)]
pub struct TableOutcome {
    pub rows_inserted: u64,
    pub columns: usize,
    pub strategy: &'static str,
    pub degraded: bool,
    pub classification: Option<ClassificationCounts>,
}

pub async fn replicate_table<S: SourceAdapter, T: TargetAdapter>(
    source: &mut S,
    target: &T,
    table: &TableIdent,
    config: &ReplConfig,
    cancel: &CancellationToken,
) -> Result<TableOutcome, ReplError> {
    let mut state = PipelineState::Planned;

    state = PipelineState::Preparing;
    let columns = with_retry(|| source.describe(table)).await?;
    let spec = TableSpec {
        ident: table.clone(),
        columns,
    };

    let (strategy, cascade) = select_strategy(source, table, config).await?;
    let order_by_source = strategy.watermark_column();
    let mappings = build_column_mappings(&spec, order_by_source);

    let exists = with_retry(|| target.exists_table(table, &config.target_table_prefix)).await?;
    if !exists {
        target
            .create_table(
                table,
                &config.target_table_prefix,
                &mappings,
                &strategy,
                config.use_replacing_engine,
            )
            .await?;
    } else {
        target
            .alter_add_column(table, &config.target_table_prefix, &strategy)
            .await?;
    }

    let predicate = resolve_predicate(target, table, config, &strategy, &spec).await?;
    let order_by = order_by_source
        .map(|c| c.to_string())
        .unwrap_or_else(|| cascade.columns.first().cloned().unwrap_or_else(|| "tuple()".to_string()));

    state = PipelineState::Scanning;
    let mut stream = source.scan(&spec, &predicate, &order_by, config.chunk_size);

    let mut rows_inserted = 0u64;
    let mut classification = matches!(strategy, Strategy::Hash { .. }).then(ClassificationCounts::default);
    let max_rows = config.max_rows_per_table;

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            warn!(table = %table, "cancellation requested, stopping at chunk boundary");
            break;
        }
        let mut chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                state = PipelineState::Failed;
                return Err(e);
            }
        };
        if chunk.is_empty() {
            break;
        }

        if let Some(limit) = max_rows {
            let remaining = limit.saturating_sub(rows_inserted);
            if remaining == 0 {
                break;
            }
            if chunk.len() as u64 > remaining {
                chunk.truncate(remaining as usize);
            }
        }

        let cleansed: Vec<Vec<Value>> = chunk
            .into_iter()
            .map(|row| cleanse_row(row.0, &mappings))
            .collect();

        let prepared = match &strategy {
            Strategy::Hash { logical_key } => {
                let keyed: Vec<(String, String)> = cleansed
                    .iter()
                    .map(|values| {
                        (
                            row_key(values, &spec.columns, logical_key),
                            row_hash(values, &spec.columns),
                        )
                    })
                    .collect();
                let verdicts = classify_batch(target, table, &config.target_table_prefix, &keyed).await?;

                let counts = classification.get_or_insert_with(ClassificationCounts::default);
                let mut prepared = Vec::new();
                for ((values, (key, hash)), verdict) in cleansed.into_iter().zip(keyed.into_iter()).zip(verdicts) {
                    match verdict {
                        ChangeClassification::New => counts.new += 1,
                        ChangeClassification::Updated => counts.updated += 1,
                        ChangeClassification::Duplicate => {
                            counts.duplicate += 1;
                            continue;
                        }
                    }
                    prepared.push(PreparedRow {
                        row: repl_core::Row(values),
                        row_key: Some(key),
                        row_hash: Some(hash),
                    });
                }
                prepared
            }
            _ => cleansed
                .into_iter()
                .map(|values| PreparedRow {
                    row: repl_core::Row(values),
                    row_key: None,
                    row_hash: None,
                })
                .collect(),
        };

        let inserted = prepared.len() as u64;
        if !prepared.is_empty() {
            with_retry(|| target.insert(table, &config.target_table_prefix, &mappings, &prepared)).await?;
        }
        rows_inserted += inserted;
    }

    state = PipelineState::Completed;
    info!(
        table = %table,
        rows = rows_inserted,
        strategy = strategy.name(),
        degraded = cascade.degraded,
        ?state,
        "table replicated"
    );

    Ok(TableOutcome {
        rows_inserted,
        columns: mappings.len(),
        strategy: strategy.name(),
        degraded: cascade.degraded,
        classification,
    })
}

async fn resolve_predicate<T: TargetAdapter>(
    target: &T,
    table: &TableIdent,
    config: &ReplConfig,
    strategy: &Strategy,
    spec: &TableSpec,
) -> Result<Predicate, ReplError> {
    match strategy {
        Strategy::Hash { .. } => Ok(Predicate::always_true()),
        Strategy::RowVersion { column } | Strategy::Timestamp { column } => {
            let watermark = maximum(target, table, &config.target_table_prefix, column).await;
            Ok(watermark_predicate(column, watermark))
        }
        Strategy::Identity { column } => {
            let watermark = maximum(target, table, &config.target_table_prefix, column).await;
            let base = watermark_predicate(column, watermark.clone());
            if !config.incremental {
                return Ok(Predicate::always_true());
            }
            let timestamp_col = spec
                .columns
                .iter()
                .find(|c| c.source_type.family == repl_core::SourceTypeFamily::DateTime)
                .map(|c| c.name.as_str());
            match ids_within_lookback(
                target,
                table,
                &config.target_table_prefix,
                column,
                config.lookback_days,
                timestamp_col,
            )
            .await
            {
                LookbackPredicate::InList(ids) if !ids.is_empty() => {
                    let list = ids.into_iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(", ");
                    Ok(Predicate {
                        where_clause: format!("({}) OR {column} IN ({list})", base.where_clause),
                        description: format!("{} with lookback in-list", base.description),
                    })
                }
                LookbackPredicate::TimestampRange { timestamp_column } => Ok(Predicate {
                    where_clause: format!(
                        "({}) OR {timestamp_column} >= (now() - INTERVAL {} DAY)",
                        base.where_clause, config.lookback_days
                    ),
                    description: format!("{} with lookback range", base.description),
                }),
                _ => Ok(base),
            }
        }
    }
}

fn watermark_predicate(column: &str, watermark: Option<Value>) -> Predicate {
    match watermark {
        None => Predicate {
            where_clause: "1 = 1".to_string(),
            description: format!("full scan ({column} has no watermark)"),
        },
        Some(value) => Predicate {
            where_clause: format!("{column} > {}", sql_literal(&value)),
            description: format!("{column} > watermark"),
        },
    }
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.3f")),
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        other => other.to_string(),
    }
}

/// Clamp out-of-range timestamps to `Null` and promote bare dates to
/// midnight, satisfying the target's representable `DateTime64` range.
fn cleanse_row(mut values: Vec<Value>, mappings: &[repl_core::ColumnMapping]) -> Vec<Value> {
    let lower = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).single().unwrap();
    let upper = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).single().unwrap();

    for (value, mapping) in values.iter_mut().zip(mappings.iter()) {
        if mapping.target_type != ColumnType::DateTime64Tz {
            continue;
        }
        match value {
            Value::Timestamp(ts) => {
                if *ts < lower || *ts >= upper {
                    *value = Value::Null;
                }
            }
            Value::Date(d) => {
                let midnight = d.and_hms_opt(0, 0, 0).unwrap();
                let ts = Utc.from_utc_datetime(&midnight);
                *value = if ts < lower || ts >= upper {
                    Value::Null
                } else {
                    Value::Timestamp(ts)
                };
            }
            _ => {}
        }
    }
    values
}

async fn with_retry<F, Fut, Out>(mut op: F) -> Result<Out, ReplError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Out, ReplError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(attempt, error = %e, "transient failure, retrying");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_predicate_full_scan_when_none() {
        let p = watermark_predicate("Id", None);
        assert_eq!(p.where_clause, "1 = 1");
    }

    #[test]
    fn watermark_predicate_uses_greater_than() {
        let p = watermark_predicate("Id", Some(Value::Int64(42)));
        assert_eq!(p.where_clause, "Id > 42");
    }
}
