//! Identifier sanitization shared by the source and target adapters.
//!
//! A single deterministic function turns an arbitrary source identifier
//! (table or column name) into something safe to quote on both sides of the
//! pipe. It must be idempotent: sanitizing an already-sanitized name is a
//! no-op.

const MAX_IDENTIFIER_LEN: usize = 120;

/// Sanitize a table or column name to `[A-Za-z0-9_.-]`, collapsing
/// underscore runs and trimming leading/trailing underscores.
///
/// Empty output (e.g. the input was entirely punctuation) becomes `"NA"`.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;

    for ch in raw.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' {
            Some(ch)
        } else if ch == '_' {
            Some('_')
        } else {
            Some('_')
        };

        if let Some(c) = mapped {
            if c == '_' {
                if last_was_underscore {
                    continue;
                }
                last_was_underscore = true;
            } else {
                last_was_underscore = false;
            }
            out.push(c);
        }
    }

    let trimmed = out.trim_matches('_');
    let truncated = if trimmed.len() > MAX_IDENTIFIER_LEN {
        // Truncate on a char boundary.
        let mut end = MAX_IDENTIFIER_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        &trimmed[..end]
    } else {
        trimmed
    };
    let truncated = truncated.trim_matches('_');

    if truncated.is_empty() {
        "NA".to_string()
    } else {
        truncated.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent() {
        let cases = ["Orden de Compra #123", "dbo.__Weird__Name__", "", "---", "a"];
        for c in cases {
            let once = sanitize_identifier(c);
            let twice = sanitize_identifier(&once);
            assert_eq!(once, twice, "not idempotent for {c:?}");
        }
    }

    #[test]
    fn collapses_runs_and_trims() {
        assert_eq!(sanitize_identifier("foo   bar"), "foo_bar");
        assert_eq!(sanitize_identifier("__leading_trailing__"), "leading_trailing");
    }

    #[test]
    fn empty_becomes_na() {
        assert_eq!(sanitize_identifier(""), "NA");
        assert_eq!(sanitize_identifier("###"), "NA");
    }

    #[test]
    fn truncates_to_120_chars() {
        let long = "a".repeat(200);
        let result = sanitize_identifier(&long);
        assert!(result.len() <= MAX_IDENTIFIER_LEN);
        assert!(!result.is_empty());
    }

    #[test]
    fn within_allowed_alphabet() {
        let result = sanitize_identifier("Código Cliente! (v2)");
        assert!(result
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'));
    }
}
