use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
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

/// Get an optional column value.
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

/// Parse a JSON string column into a typed value, returning CorruptRow on
/// parse failure.
pub fn parse_json<T: serde::de::DeserializeOwned>(
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

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::ContentRecord;

    #[test]
    fn parse_json_success() {
        let record: ContentRecord =
            parse_json(r#"{"slots":[null,null,null]}"#, "containers", "contents").unwrap();
        assert_eq!(record.len(), 3);
        assert!(record.is_empty());
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<ContentRecord, _> =
            parse_json("not valid json", "containers", "contents");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "containers", column: "contents", .. })
        ));
    }
}
