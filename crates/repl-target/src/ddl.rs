use repl_core::{ColumnMapping, Strategy};

/// `ReplacingMergeTree(ingested_at)` unless the config disables it, per the
/// table-creation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineChoice {
    ReplacingMergeTree,
    MergeTree,
}

impl EngineChoice {
    pub fn from_config(use_replacing_engine: bool) -> Self {
        if use_replacing_engine {
            EngineChoice::ReplacingMergeTree
        } else {
            EngineChoice::MergeTree
        }
    }

    pub fn ddl(&self) -> &'static str {
        match self {
            EngineChoice::ReplacingMergeTree => "ReplacingMergeTree(ingested_at)",
            EngineChoice::MergeTree => "MergeTree",
        }
    }
}

/// The resolved `ORDER BY` target, evaluated top to bottom per the
/// table-creation policy: hash beats row-version/identity beats timestamp
/// beats the degenerate `ingested_at` fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderByChoice {
    RowKey,
    Column(String),
    IngestedAt,
}

impl OrderByChoice {
    pub fn resolve(strategy: &Strategy, mappings: &[ColumnMapping]) -> Self {
        match strategy {
            Strategy::Hash { .. } => OrderByChoice::RowKey,
            Strategy::RowVersion { column } | Strategy::Identity { column } => {
                let non_nullable = mappings
                    .iter()
                    .any(|m| m.source_name == *column && !m.nullable);
                if non_nullable {
                    OrderByChoice::Column(column.clone())
                } else {
                    OrderByChoice::IngestedAt
                }
            }
            Strategy::Timestamp { column } => OrderByChoice::Column(column.clone()),
        }
    }

    pub fn sql_column(&self, target_name_of: impl Fn(&str) -> String) -> String {
        match self {
            OrderByChoice::RowKey => "row_key".to_string(),
            OrderByChoice::Column(c) => target_name_of(c),
            OrderByChoice::IngestedAt => "ingested_at".to_string(),
        }
    }
}

/// Build the full `CREATE TABLE IF NOT EXISTS` statement for a table,
/// including the injected `ingested_at` column and, in hash mode,
/// `row_key`/`row_hash`.
pub fn build_create_table_sql(
    qualified_name: &str,
    mappings: &[ColumnMapping],
    strategy: &Strategy,
    engine: EngineChoice,
    timezone: &str,
) -> String {
    let mut cols = Vec::with_capacity(mappings.len() + 3);
    for m in mappings {
        let ty = if m.nullable {
            format!("Nullable({})", m.target_type.ddl(timezone))
        } else {
            m.target_type.ddl(timezone)
        };
        cols.push(format!("`{}` {}", m.target_name, ty));
    }
    cols.push(format!("`ingested_at` DateTime64(3, '{timezone}') DEFAULT now64(3)"));
    if matches!(strategy, Strategy::Hash { .. }) {
        cols.push("`row_key` String".to_string());
        cols.push("`row_hash` String".to_string());
    }

    let order_by = OrderByChoice::resolve(strategy, mappings);
    let order_column = order_by.sql_column(|source| {
        mappings
            .iter()
            .find(|m| m.source_name == source)
            .map(|m| m.target_name.clone())
            .unwrap_or_else(|| source.to_string())
    });

    format!(
        "CREATE TABLE IF NOT EXISTS {qualified_name} (\n  {}\n) ENGINE = {} ORDER BY ({order_column})",
        cols.join(",\n  "),
        engine.ddl(),
    )
}

/// Three standing columns every table carries; `alter_add_column` closes the
/// gap when appending to a table created before a policy change.
pub fn standing_columns(strategy: &Strategy) -> Vec<&'static str> {
    let mut cols = vec!["ingested_at"];
    if matches!(strategy, Strategy::Hash { .. }) {
        cols.push("row_key");
        cols.push("row_hash");
    }
    cols
}

#[cfg(test)]
mod tests {
    use super::*;
    use repl_core::ColumnType;

    fn mapping(name: &str, nullable: bool) -> ColumnMapping {
        ColumnMapping {
            source_name: name.to_string(),
            target_name: name.to_string(),
            target_type: ColumnType::Int64,
            nullable,
        }
    }

    #[test]
    fn hash_strategy_orders_by_row_key() {
        let strategy = Strategy::Hash {
            logical_key: vec!["Id".to_string()],
        };
        let mappings = vec![mapping("Id", true)];
        assert_eq!(OrderByChoice::resolve(&strategy, &mappings), OrderByChoice::RowKey);
    }

    #[test]
    fn identity_with_non_nullable_column_orders_by_it() {
        let strategy = Strategy::Identity {
            column: "Id".to_string(),
        };
        let mappings = vec![mapping("Id", false)];
        assert_eq!(
            OrderByChoice::resolve(&strategy, &mappings),
            OrderByChoice::Column("Id".to_string())
        );
    }

    #[test]
    fn identity_with_nullable_column_degrades_to_ingested_at() {
        let strategy = Strategy::Identity {
            column: "Id".to_string(),
        };
        let mappings = vec![mapping("Id", true)];
        assert_eq!(OrderByChoice::resolve(&strategy, &mappings), OrderByChoice::IngestedAt);
    }

    #[test]
    fn create_table_sql_includes_row_key_and_row_hash_in_hash_mode() {
        let strategy = Strategy::Hash {
            logical_key: vec!["Id".to_string()],
        };
        let mappings = vec![mapping("Id", true)];
        let sql = build_create_table_sql("db.t", &mappings, &strategy, EngineChoice::ReplacingMergeTree, "UTC");
        assert!(sql.contains("row_key"));
        assert!(sql.contains("row_hash"));
        assert!(sql.contains("ORDER BY (row_key)"));
    }
}
