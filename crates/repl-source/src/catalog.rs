use repl_core::{Column, ReplError, SourceType, SourceTypeFamily, TableIdent};
use tiberius::Row as TiberiusRow;

use crate::adapter::SourceHandle;

const SYSTEM_SCHEMAS: &[&str] = &["sys", "INFORMATION_SCHEMA", "guest"];

/// Well-known modification-timestamp column names, tried in order before
/// falling back to the first `DATETIME`-family column.
const WELL_KNOWN_TIMESTAMP_NAMES: &[&str] = &[
    "updated_at",
    "modified_on",
    "modified_at",
    "FechaModificacion",
    "FechaActualizacion",
    "LastModified",
    "LastUpdated",
];

pub async fn list_tables(
    handle: &mut SourceHandle,
    excluded_prefixes: &[String],
) -> Result<Vec<TableIdent>, ReplError> {
    let query = "SELECT TABLE_SCHEMA, TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE'";
    let rows = query_rows(handle, query).await?;

    let mut tables = Vec::new();
    for row in rows {
        let schema: &str = row.get(0).unwrap_or_default();
        let name: &str = row.get(1).unwrap_or_default();
        if SYSTEM_SCHEMAS.contains(&schema) {
            continue;
        }
        if excluded_prefixes.iter().any(|p| name.starts_with(p.as_str())) {
            continue;
        }
        tables.push(TableIdent::new(schema, name));
    }
    Ok(tables)
}

pub async fn describe(handle: &mut SourceHandle, table: &TableIdent) -> Result<Vec<Column>, ReplError> {
    let query = format!(
        "SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, IS_NULLABLE, ORDINAL_POSITION \
         FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' \
         ORDER BY ORDINAL_POSITION",
        escape_literal(&table.schema),
        escape_literal(&table.name)
    );
    let rows = query_rows(handle, &query).await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: &str = row.get(0).unwrap_or_default();
        let raw_type: &str = row.get(1).unwrap_or_default();
        let max_length: Option<i32> = row.get(2);
        let nullable: &str = row.get(3).unwrap_or("YES");
        let ordinal: i32 = row.get(4).unwrap_or(0);

        columns.push(Column {
            name: name.to_string(),
            source_type: SourceType {
                family: SourceTypeFamily::from_sql_type_name(raw_type),
                raw_name: raw_type.to_string(),
            },
            max_length,
            nullable: nullable.eq_ignore_ascii_case("YES"),
            ordinal,
        });
    }
    Ok(columns)
}

pub async fn detect_identity(handle: &mut SourceHandle, table: &TableIdent) -> Result<Option<String>, ReplError> {
    let query = format!(
        "SELECT c.name FROM sys.identity_columns c \
         JOIN sys.tables t ON c.object_id = t.object_id \
         JOIN sys.schemas s ON t.schema_id = s.schema_id \
         WHERE s.name = '{}' AND t.name = '{}'",
        escape_literal(&table.schema),
        escape_literal(&table.name)
    );
    let rows = query_rows(handle, &query).await?;
    Ok(rows.first().and_then(|r| r.get::<&str, _>(0)).map(str::to_string))
}

pub async fn detect_primary_key(handle: &mut SourceHandle, table: &TableIdent) -> Result<Vec<String>, ReplError> {
    let query = format!(
        "SELECT kcu.COLUMN_NAME \
         FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
         JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
           ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
         WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND tc.TABLE_SCHEMA = '{}' AND tc.TABLE_NAME = '{}' \
         ORDER BY kcu.ORDINAL_POSITION",
        escape_literal(&table.schema),
        escape_literal(&table.name)
    );
    let rows = query_rows(handle, &query).await?;
    Ok(rows
        .iter()
        .filter_map(|r| r.get::<&str, _>(0))
        .map(str::to_string)
        .collect())
}

pub async fn detect_timestamp_column(
    handle: &mut SourceHandle,
    table: &TableIdent,
) -> Result<Option<String>, ReplError> {
    let columns = describe(handle, table).await?;

    for candidate in WELL_KNOWN_TIMESTAMP_NAMES {
        if let Some(col) = columns.iter().find(|c| c.name.eq_ignore_ascii_case(candidate)) {
            return Ok(Some(col.name.clone()));
        }
    }

    Ok(columns
        .iter()
        .find(|c| c.source_type.family == SourceTypeFamily::DateTime)
        .map(|c| c.name.clone()))
}

pub async fn detect_row_version_column(
    handle: &mut SourceHandle,
    table: &TableIdent,
) -> Result<Option<String>, ReplError> {
    let query = format!(
        "SELECT c.name FROM sys.columns c \
         JOIN sys.types ty ON c.user_type_id = ty.user_type_id \
         JOIN sys.tables t ON c.object_id = t.object_id \
         JOIN sys.schemas s ON t.schema_id = s.schema_id \
         WHERE ty.name IN ('rowversion', 'timestamp') \
           AND s.name = '{}' AND t.name = '{}'",
        escape_literal(&table.schema),
        escape_literal(&table.name)
    );
    let rows = query_rows(handle, &query).await?;
    Ok(rows.first().and_then(|r| r.get::<&str, _>(0)).map(str::to_string))
}

async fn query_rows(handle: &mut SourceHandle, sql: &str) -> Result<Vec<TiberiusRow>, ReplError> {
    let stream = handle
        .client
        .simple_query(sql)
        .await
        .map_err(|e| ReplError::Connectivity {
            detail: format!("catalog query failed: {e}"),
        })?;
    stream
        .into_first_result()
        .await
        .map_err(|e| ReplError::Connectivity {
            detail: format!("catalog query failed to materialize: {e}"),
        })
}

/// Catalog identifiers (schema/table names already round-tripped through
/// `INFORMATION_SCHEMA`) still get a defensive quote-doubling before being
/// spliced into a literal, since `simple_query` has no parameter binding.
fn escape_literal(raw: &str) -> String {
    raw.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_literal_doubles_single_quotes() {
        assert_eq!(escape_literal("O'Brien"), "O''Brien");
        assert_eq!(escape_literal("plain"), "plain");
    }
}
