//! JSON parsing helpers for rows returned by the `rem_*` SQL functions.

use rem_core::{StoreError, Timestamp};
use serde_json::Value as JsonValue;
use uuid::Uuid;

fn missing(table: &str, field: &str) -> StoreError {
    StoreError::Conversion {
        table: table.to_string(),
        reason: format!("missing or invalid field: {field}"),
    }
}

pub fn parse_uuid(json: &JsonValue, table: &str, field: &str) -> Result<Uuid, StoreError> {
    json.get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| missing(table, field))
}

pub fn parse_optional_uuid(json: &JsonValue, field: &str) -> Option<Uuid> {
    json.get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

pub fn parse_string(json: &JsonValue, table: &str, field: &str) -> Result<String, StoreError> {
    json.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| missing(table, field))
}

pub fn parse_optional_string(json: &JsonValue, field: &str) -> Option<String> {
    json.get(field)
        .and_then(|v| if v.is_null() { None } else { v.as_str() })
        .map(str::to_string)
}

pub fn parse_i64(json: &JsonValue, table: &str, field: &str) -> Result<i64, StoreError> {
    json.get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| missing(table, field))
}

pub fn parse_f64(json: &JsonValue, table: &str, field: &str) -> Result<f64, StoreError> {
    json.get(field)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| missing(table, field))
}

pub fn parse_timestamp(json: &JsonValue, table: &str, field: &str) -> Result<Timestamp, StoreError> {
    let raw = json
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| missing(table, field))?;
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|_| missing(table, field))
}

pub fn parse_optional_timestamp(json: &JsonValue, field: &str) -> Option<Timestamp> {
    json.get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_timestamps_from_postgres_jsonb() {
        let row = json!({"created_at": "2026-08-01T09:15:00.123456+00:00"});
        let ts = parse_timestamp(&row, "t", "created_at").unwrap();
        assert_eq!(ts.timezone(), chrono::Utc);
    }

    #[test]
    fn missing_fields_name_the_table_and_field() {
        let err = parse_uuid(&json!({}), "sessions", "id").unwrap_err();
        assert!(err.to_string().contains("sessions"));
        assert!(err.to_string().contains("id"));
    }
}
