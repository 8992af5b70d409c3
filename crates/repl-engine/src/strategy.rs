//! Per-table strategy selection (§4.4): first match wins, row-version
//! beating identity beating timestamp beating the hash fallback.

use repl_core::{ReplConfig, ReplError, SourceTypeFamily, Strategy, TableIdent};
use repl_source::SourceAdapter;
use tracing::warn;

/// Well-known business-key column names tried, in order, when a table has
/// no primary key and no identity column.
const WELL_KNOWN_KEY_NAMES: &[&str] = &["Codigo", "Numero", "Code", "Key", "Clave", "Cod", "Num"];

/// The logical key backing `row_key` in hash mode, and whether it had to
/// fall back to the degraded (empty) case.
#[derive(Debug, Clone)]
pub struct LogicalKeyCascade {
    pub columns: Vec<String>,
    pub degraded: bool,
}

pub async fn select_strategy<S: SourceAdapter>(
    source: &mut S,
    table: &TableIdent,
    config: &ReplConfig,
) -> Result<(Strategy, LogicalKeyCascade), ReplError> {
    if let Some(column) = source.detect_row_version_column(table).await? {
        let cascade = logical_key_cascade(source, table, config).await?;
        return Ok((Strategy::RowVersion { column }, cascade));
    }

    if let Some(column) = source.detect_identity(table).await? {
        let cascade = logical_key_cascade(source, table, config).await?;
        return Ok((Strategy::Identity { column }, cascade));
    }

    if let Some(column) = source.detect_timestamp_column(table).await? {
        let cascade = logical_key_cascade(source, table, config).await?;
        return Ok((Strategy::Timestamp { column }, cascade));
    }

    let cascade = logical_key_cascade(source, table, config).await?;
    Ok((
        Strategy::Hash {
            logical_key: cascade.columns.clone(),
        },
        cascade,
    ))
}

/// PK (simple or composite) → identity column → first well-known
/// business-key name of a plausible type → empty (degraded).
async fn logical_key_cascade<S: SourceAdapter>(
    source: &mut S,
    table: &TableIdent,
    config: &ReplConfig,
) -> Result<LogicalKeyCascade, ReplError> {
    let pk = source.detect_primary_key(table).await?;
    if !pk.is_empty() {
        return Ok(LogicalKeyCascade {
            columns: pk,
            degraded: false,
        });
    }

    if let Some(identity) = source.detect_identity(table).await? {
        return Ok(LogicalKeyCascade {
            columns: vec![identity],
            degraded: false,
        });
    }

    let columns = source.describe(table).await?;
    if let Some(preferred) = columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(&config.preferred_identity_column))
    {
        return Ok(LogicalKeyCascade {
            columns: vec![preferred.name.clone()],
            degraded: false,
        });
    }

    for candidate in WELL_KNOWN_KEY_NAMES {
        if let Some(col) = columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(candidate) && is_numeric_or_string(&c.source_type.family))
        {
            return Ok(LogicalKeyCascade {
                columns: vec![col.name.clone()],
                degraded: false,
            });
        }
    }

    warn!(table = %table, "no usable logical key found, degrading to empty row_key");
    Ok(LogicalKeyCascade {
        columns: Vec::new(),
        degraded: true,
    })
}

fn is_numeric_or_string(family: &SourceTypeFamily) -> bool {
    matches!(
        family,
        SourceTypeFamily::VarChar
            | SourceTypeFamily::Int
            | SourceTypeFamily::BigInt
            | SourceTypeFamily::SmallInt
            | SourceTypeFamily::TinyInt
            | SourceTypeFamily::Decimal
            | SourceTypeFamily::Float
            | SourceTypeFamily::Double
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_names_cover_common_spanish_and_english_keys() {
        assert!(WELL_KNOWN_KEY_NAMES.contains(&"Codigo"));
        assert!(WELL_KNOWN_KEY_NAMES.contains(&"Key"));
    }

    #[test]
    fn date_and_bool_columns_are_not_numeric_or_string() {
        assert!(!is_numeric_or_string(&SourceTypeFamily::DateTime));
        assert!(!is_numeric_or_string(&SourceTypeFamily::Bit));
    }

    #[test]
    fn int_and_varchar_are_numeric_or_string() {
        assert!(is_numeric_or_string(&SourceTypeFamily::Int));
        assert!(is_numeric_or_string(&SourceTypeFamily::VarChar));
    }
}
