use std::pin::Pin;

use chrono::{NaiveDate, Utc};
use futures::{Stream, StreamExt};
use repl_core::{ReplError, Row, SourceTypeFamily, TableSpec, Value};
use rust_decimal::Decimal;
use tiberius::Row as TiberiusRow;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::adapter::{Predicate, SourceHandle};

pub type RowChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<Row>, ReplError>> + Send>>;

const MAX_RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_BACKOFF: std::time::Duration = std::time::Duration::from_secs(2);

/// Drive a chunked scan of `spec`, pushing `chunk_size`-row batches into an
/// `mpsc` channel the way the teacher's `KafkaSource::stream` spawns a task
/// feeding a `ReceiverStream`. Reconnect-on-transient-error happens inside
/// the spawned task: the caller sees one unbroken stream of chunks.
pub fn scan(
    handle: &mut SourceHandle,
    spec: &TableSpec,
    predicate: &Predicate,
    order_by: &str,
    chunk_size: usize,
) -> RowChunkStream {
    let sql = format!(
        "SELECT {} FROM {}.{} WHERE {} ORDER BY {}",
        spec.column_names().join(", "),
        spec.ident.schema,
        spec.ident.name,
        predicate.where_clause,
        order_by,
    );

    // `handle` is reborrowed for the duration of the spawned task by moving
    // its connection config; the live client is taken by value so the
    // caller's handle is untouched until the scan completes.
    let config = handle.config.clone();
    let spec = spec.clone();
    let (tx, rx) = mpsc::channel::<Result<Vec<Row>, ReplError>>(4);

    tokio::spawn(async move {
        let mut client = match crate::adapter::connect(&config).await {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        let mut attempt = 0u32;
        loop {
            match run_scan(&mut client, &sql, &spec, chunk_size, &tx).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < MAX_RECONNECT_ATTEMPTS => {
                    attempt += 1;
                    warn!(attempt, error = %e, "source scan failed, reconnecting");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    match crate::adapter::connect(&config).await {
                        Ok(c) => client = c,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

async fn run_scan(
    client: &mut tiberius::Client<tokio_util::compat::Compat<tokio::net::TcpStream>>,
    sql: &str,
    spec: &TableSpec,
    chunk_size: usize,
    tx: &mpsc::Sender<Result<Vec<Row>, ReplError>>,
) -> Result<(), ReplError> {
    let stream = client.simple_query(sql).await.map_err(|e| ReplError::Connectivity {
        detail: format!("scan query failed: {e}"),
    })?;
    tokio::pin!(stream);

    let mut buf = Vec::with_capacity(chunk_size);
    while let Some(item) = stream.next().await {
        let row = item.map_err(|e| ReplError::Connectivity {
            detail: format!("scan row fetch failed: {e}"),
        })?;
        if let tiberius::QueryItem::Row(row) = row {
            buf.push(row_to_values(&row, spec));
            if buf.len() >= chunk_size {
                let chunk = std::mem::replace(&mut buf, Vec::with_capacity(chunk_size));
                if tx.send(Ok(chunk.into_iter().map(Row).collect())).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
    if !buf.is_empty() {
        let _ = tx.send(Ok(buf.into_iter().map(Row).collect())).await;
    }
    Ok(())
}

fn row_to_values(row: &TiberiusRow, spec: &TableSpec) -> Vec<Value> {
    spec.columns
        .iter()
        .enumerate()
        .map(|(i, col)| extract_value(row, i, col.source_type.family))
        .collect()
}

fn extract_value(row: &TiberiusRow, idx: usize, family: SourceTypeFamily) -> Value {
    match family {
        SourceTypeFamily::Int | SourceTypeFamily::SmallInt | SourceTypeFamily::TinyInt => row
            .get::<i32, _>(idx)
            .map(|v| Value::Int64(v as i64))
            .unwrap_or(Value::Null),
        SourceTypeFamily::BigInt => row.get::<i64, _>(idx).map(Value::Int64).unwrap_or(Value::Null),
        SourceTypeFamily::Bit => row.get::<bool, _>(idx).map(Value::Bool).unwrap_or(Value::Null),
        SourceTypeFamily::Float => row
            .get::<f32, _>(idx)
            .map(|v| Value::Float64(v as f64))
            .unwrap_or(Value::Null),
        SourceTypeFamily::Double => row.get::<f64, _>(idx).map(Value::Float64).unwrap_or(Value::Null),
        SourceTypeFamily::Decimal => row
            .get::<Decimal, _>(idx)
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        SourceTypeFamily::Date => row.get::<NaiveDate, _>(idx).map(Value::Date).unwrap_or(Value::Null),
        SourceTypeFamily::DateTime => row
            .get::<chrono::NaiveDateTime, _>(idx)
            .map(|v| Value::Timestamp(chrono::DateTime::from_naive_utc_and_offset(v, Utc)))
            .unwrap_or(Value::Null),
        SourceTypeFamily::Time | SourceTypeFamily::VarChar | SourceTypeFamily::Unknown => row
            .get::<&str, _>(idx)
            .map(|v| Value::Text(v.to_string()))
            .unwrap_or(Value::Null),
    }
}
