//! Response shaping by declared response kind

use serde_json::Value;

use crate::config::ResponseKind;
use crate::engine::ResultSet;

/// Build the success payload for a result set
///
/// - `table`: every row
/// - `row`: the first row, or null
/// - `value`: the first column of the first row, or null
/// - `void`: null
#[must_use]
pub fn format_response(kind: ResponseKind, rows: ResultSet) -> Value {
    match kind {
        ResponseKind::Void => Value::Null,
        ResponseKind::Table => match rows {
            ResultSet::Records(records) => Value::Array(records.into_iter().map(Value::Object).collect()),
            ResultSet::Arrays(arrays) => Value::Array(arrays.into_iter().map(Value::Array).collect()),
        },
        ResponseKind::Row => match rows {
            ResultSet::Records(records) => records.into_iter().next().map_or(Value::Null, Value::Object),
            ResultSet::Arrays(arrays) => arrays.into_iter().next().map_or(Value::Null, Value::Array),
        },
        ResponseKind::Value => match rows {
            ResultSet::Arrays(arrays) => arrays
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or(Value::Null),
            ResultSet::Records(records) => records
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next().map(|(_, value)| value))
                .unwrap_or(Value::Null),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn records(value: Value) -> ResultSet {
        let Value::Array(rows) = value else { panic!("expected an array") };
        ResultSet::Records(
            rows.into_iter()
                .map(|row| match row {
                    Value::Object(map) => map,
                    _ => Map::new(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_table() {
        let rows = records(json!([{"id": 1}, {"id": 2}]));
        assert_eq!(format_response(ResponseKind::Table, rows), json!([{"id": 1}, {"id": 2}]));
        assert_eq!(format_response(ResponseKind::Table, records(json!([]))), json!([]));
    }

    #[test]
    fn test_row() {
        let rows = records(json!([{"id": 1}, {"id": 2}]));
        assert_eq!(format_response(ResponseKind::Row, rows), json!({"id": 1}));
        assert_eq!(format_response(ResponseKind::Row, records(json!([]))), Value::Null);
    }

    #[test]
    fn test_value() {
        let rows = ResultSet::Arrays(vec![vec![json!(42), json!("ignored")], vec![json!(7)]]);
        assert_eq!(format_response(ResponseKind::Value, rows), json!(42));
        assert_eq!(format_response(ResponseKind::Value, ResultSet::Arrays(vec![])), Value::Null);
        assert_eq!(format_response(ResponseKind::Value, ResultSet::Arrays(vec![vec![]])), Value::Null);
    }

    #[test]
    fn test_void_ignores_rows() {
        let rows = records(json!([{"id": 1}]));
        assert_eq!(format_response(ResponseKind::Void, rows), Value::Null);
    }
}
