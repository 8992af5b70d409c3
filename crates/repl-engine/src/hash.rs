//! Change detection for tables with no monotonic column (§4.6): `row_key`
//! identifies a logical row across reloads, `row_hash` detects whether its
//! content changed.

use std::collections::HashMap;

use md5::{Digest, Md5};
use repl_core::{ChangeClassification, Column, TableIdent, Value};
use repl_target::TargetAdapter;

/// MD5 hex digest of `"col:value|col:value|..."` over the logical-key
/// columns, in declared order. Falls back to hashing the row's full
/// normalized content when the logical key is empty (degraded mode), so two
/// degraded rows with identical content still collide into one key — the
/// least-bad outcome available without a real identity.
pub fn row_key(values: &[Value], columns: &[Column], logical_key: &[String]) -> String {
    if logical_key.is_empty() {
        return row_hash(values, columns);
    }
    let parts: Vec<String> = logical_key
        .iter()
        .map(|key_col| {
            let idx = columns.iter().position(|c| c.name == *key_col);
            let value = idx.map(|i| values[i].normalize_for_hash()).unwrap_or_else(|| "NULL".to_string());
            format!("{key_col}:{value}")
        })
        .collect();
    hex_md5(&parts.join("|"))
}

/// MD5 hex digest of the column-name-sorted list of `"col:normalized_value"`
/// over every source column, so reordering source columns doesn't change
/// the hash.
pub fn row_hash(values: &[Value], columns: &[Column]) -> String {
    let mut parts: Vec<(String, String)> = columns
        .iter()
        .zip(values.iter())
        .map(|(c, v)| (c.name.clone(), v.normalize_for_hash()))
        .collect();
    parts.sort_by(|a, b| a.0.cmp(&b.0));
    let joined = parts
        .into_iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join("|");
    hex_md5(&joined)
}

fn hex_md5(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Classify a chunk's rows against the target's existing `row_key`/`row_hash`
/// pairs, batching lookups at 1000 keys per `query_hashes_by_key` call.
pub async fn classify_batch<T: TargetAdapter>(
    target: &T,
    table: &TableIdent,
    prefix: &str,
    keyed: &[(String, String)],
) -> Result<Vec<ChangeClassification>, repl_core::ReplError> {
    let keys: Vec<String> = keyed.iter().map(|(k, _)| k.clone()).collect();
    let existing: HashMap<String, String> = target.query_hashes_by_key(table, prefix, &keys).await?;

    Ok(keyed
        .iter()
        .map(|(key, hash)| match existing.get(key) {
            None => ChangeClassification::New,
            Some(existing_hash) if existing_hash == hash => ChangeClassification::Duplicate,
            Some(_) => ChangeClassification::Updated,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use repl_core::{SourceType, SourceTypeFamily};

    fn col(name: &str) -> Column {
        Column {
            name: name.to_string(),
            source_type: SourceType {
                family: SourceTypeFamily::VarChar,
                raw_name: "varchar".to_string(),
            },
            max_length: None,
            nullable: true,
            ordinal: 0,
        }
    }

    #[test]
    fn row_hash_is_order_independent() {
        let cols_a = vec![col("a"), col("b")];
        let cols_b = vec![col("b"), col("a")];
        let vals_a = vec![Value::Text("1".to_string()), Value::Text("2".to_string())];
        let vals_b = vec![Value::Text("2".to_string()), Value::Text("1".to_string())];
        assert_eq!(row_hash(&vals_a, &cols_a), row_hash(&vals_b, &cols_b));
    }

    #[test]
    fn row_key_differs_for_different_logical_keys() {
        let cols = vec![col("Id"), col("Name")];
        let vals = vec![Value::Int64(1), Value::Text("Alice".to_string())];
        let k1 = row_key(&vals, &cols, &["Id".to_string()]);
        let k2 = row_key(&vals, &cols, &["Name".to_string()]);
        assert_ne!(k1, k2);
    }

    #[test]
    fn degraded_row_key_falls_back_to_row_hash() {
        let cols = vec![col("Id")];
        let vals = vec![Value::Int64(1)];
        assert_eq!(row_key(&vals, &cols, &[]), row_hash(&vals, &cols));
    }
}
