use repl_core::{ColumnMapping, Row, Value};

/// A row ready for insertion, carrying the `row_key`/`row_hash` computed by
/// the engine's change detector (empty outside hash mode).
pub struct PreparedRow {
    pub row: Row,
    pub row_key: Option<String>,
    pub row_hash: Option<String>,
}

/// Render one `INSERT INTO ... VALUES (...), (...), ...` statement for a
/// chunk. `ingested_at` is left to its `DEFAULT now64(3)` by omitting it
/// from the column list.
pub fn render_insert_sql(qualified_name: &str, mappings: &[ColumnMapping], rows: &[PreparedRow]) -> String {
    let mut columns: Vec<String> = mappings.iter().map(|m| format!("`{}`", m.target_name)).collect();
    let hash_mode = rows.first().map(|r| r.row_key.is_some()).unwrap_or(false);
    if hash_mode {
        columns.push("`row_key`".to_string());
        columns.push("`row_hash`".to_string());
    }

    let mut values = Vec::with_capacity(rows.len());
    for prepared in rows {
        let mut literals: Vec<String> = prepared
            .row
            .0
            .iter()
            .map(render_value_literal)
            .collect();
        if hash_mode {
            literals.push(quote_string(prepared.row_key.as_deref().unwrap_or("")));
            literals.push(quote_string(prepared.row_hash.as_deref().unwrap_or("")));
        }
        values.push(format!("({})", literals.join(", ")));
    }

    format!(
        "INSERT INTO {qualified_name} ({}) VALUES {}",
        columns.join(", "),
        values.join(", ")
    )
}

fn render_value_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int64(i) => i.to_string(),
        Value::Float64(f) => f.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Text(s) => quote_string(s),
        Value::Timestamp(ts) => quote_string(&ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        Value::Date(d) => quote_string(&d.format("%Y-%m-%d").to_string()),
        Value::Bytes(b) => quote_string(&base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)),
    }
}

fn quote_string(raw: &str) -> String {
    format!("'{}'", raw.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use repl_core::ColumnType;

    fn mapping(name: &str) -> ColumnMapping {
        ColumnMapping {
            source_name: name.to_string(),
            target_name: name.to_string(),
            target_type: ColumnType::String,
            nullable: true,
        }
    }

    #[test]
    fn quotes_and_escapes_strings() {
        assert_eq!(quote_string("O'Brien"), "'O\\'Brien'");
    }

    #[test]
    fn null_renders_literally() {
        assert_eq!(render_value_literal(&Value::Null), "NULL");
    }

    #[test]
    fn insert_sql_includes_row_key_columns_in_hash_mode() {
        let mappings = vec![mapping("Name")];
        let rows = vec![PreparedRow {
            row: Row(vec![Value::Text("Alice".to_string())]),
            row_key: Some("abc123".to_string()),
            row_hash: Some("def456".to_string()),
        }];
        let sql = render_insert_sql("db.t", &mappings, &rows);
        assert!(sql.contains("row_key"));
        assert!(sql.contains("'abc123'"));
    }
}
