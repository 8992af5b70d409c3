//! Watermark resolution and the identity-strategy lookback window (§4.5).
//! Errors from the target (missing column, empty table) are caught here and
//! mapped to `Ok(None)`/an empty set — never propagated — so a fresh table
//! triggers a full scan rather than failing the run.

use std::collections::HashSet;

use repl_core::{ReplError, TableIdent, Value};
use repl_target::TargetAdapter;
use tracing::warn;

/// Below this many in-window ids, an `IN (...)` predicate is cheap enough
/// to build directly; at or above it we fall back to a range predicate (or
/// drop the window entirely) per §4.5.
pub const LOOKBACK_SET_SIZE_THRESHOLD: usize = 1000;

pub async fn maximum<T: TargetAdapter>(
    target: &T,
    table: &TableIdent,
    prefix: &str,
    column: &str,
) -> Option<Value> {
    match target.query_max(table, prefix, column).await {
        Ok(v) => v,
        Err(e) => {
            warn!(table = %table, column, error = %e, "watermark lookup failed, scanning from the beginning");
            None
        }
    }
}

/// The resolved lookback predicate strategy, decided by the set size of
/// recently-ingested ids and whether a modification timestamp exists.
pub enum LookbackPredicate {
    /// `WHERE key > watermark OR key IN (...)`.
    InList(HashSet<String>),
    /// `WHERE key > watermark OR updated_at >= (now() - D days)`.
    TimestampRange { timestamp_column: String },
    /// `WHERE key > watermark`; in-window updates will not be captured.
    NewOnly,
}

pub async fn ids_within_lookback<T: TargetAdapter>(
    target: &T,
    table: &TableIdent,
    prefix: &str,
    key_column: &str,
    lookback_days: i64,
    timestamp_column: Option<&str>,
) -> LookbackPredicate {
    let ids = target
        .query_recent_keys(table, prefix, key_column, lookback_days)
        .await
        .unwrap_or_default();

    if ids.len() < LOOKBACK_SET_SIZE_THRESHOLD {
        LookbackPredicate::InList(ids)
    } else if let Some(ts) = timestamp_column {
        LookbackPredicate::TimestampRange {
            timestamp_column: ts.to_string(),
        }
    } else {
        warn!(
            table = %table,
            set_size = ids.len(),
            "lookback set too large and no timestamp column available, in-window updates will not be captured this run"
        );
        LookbackPredicate::NewOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_one_thousand() {
        assert_eq!(LOOKBACK_SET_SIZE_THRESHOLD, 1000);
    }
}
