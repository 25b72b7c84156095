//! Column extraction helpers that surface malformed rows as
//! `StoreError::CorruptRow` instead of panicking mid-query.

use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Extract a required column value.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Extract a nullable column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a JSON TEXT column into a typed value.
pub fn parse_json<T: DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse an enum stored as TEXT via its `FromStr` impl.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::messages::{Part, Role};

    #[test]
    fn parse_json_typed() {
        let parts: Vec<Part> =
            parse_json(r#"[{"type": "text", "text": "hi"}]"#, "messages", "parts").unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn parse_json_invalid_is_corrupt_row() {
        let result: Result<Vec<Part>, _> = parse_json("not json", "messages", "parts");
        match result {
            Err(StoreError::CorruptRow { table, column, .. }) => {
                assert_eq!(table, "messages");
                assert_eq!(column, "parts");
            }
            other => panic!("expected CorruptRow, got {other:?}"),
        }
    }

    #[test]
    fn parse_enum_role() {
        let role: Role = parse_enum("model", "messages", "role").unwrap();
        assert_eq!(role, Role::Model);
    }

    #[test]
    fn parse_enum_unknown_is_corrupt_row() {
        let result: Result<Role, _> = parse_enum("assistant", "messages", "role");
        assert!(matches!(result, Err(StoreError::CorruptRow { .. })));
    }
}
