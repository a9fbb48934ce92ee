//! Decoding of the string-encoded column map carried by row mutations.

use crate::error::{BrokerError, BrokerResult};
use crate::models::{ColumnValue, MutationValues, OrderedColumns};
use serde_json::Value as JsonValue;

/// Decode a flat JSON object into typed column values for `columns`' table.
///
/// Scalars map to their column value; arrays and objects are stored as their
/// JSON text. Keys that are not user columns of the table are rejected. An
/// absent payload decodes to an empty map.
pub fn decode_mutation_payload(
    columns: &OrderedColumns,
    payload: Option<&str>,
) -> BrokerResult<MutationValues> {
    let Some(raw) = payload.filter(|p| !p.trim().is_empty()) else {
        return Ok(MutationValues::new());
    };

    let parsed: JsonValue = serde_json::from_str(raw)
        .map_err(|e| BrokerError::payload_decode(format!("not valid JSON: {}", e)))?;
    let JsonValue::Object(fields) = parsed else {
        return Err(BrokerError::payload_decode("expected a JSON object"));
    };

    let mut values = MutationValues::new();
    for (key, value) in fields {
        if !columns.contains(&key) {
            return Err(BrokerError::payload_decode(format!(
                "'{}' is not a column of {}",
                key,
                columns.table_id()
            )));
        }
        let decoded = match value {
            JsonValue::Null => ColumnValue::Null,
            JsonValue::Bool(b) => ColumnValue::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => ColumnValue::Integer(i),
                None => match n.as_f64() {
                    Some(f) => ColumnValue::Real(f),
                    None => {
                        return Err(BrokerError::payload_decode(format!(
                            "number out of range for '{}'",
                            key
                        )));
                    }
                },
            },
            JsonValue::String(s) => ColumnValue::Text(s),
            nested @ (JsonValue::Array(_) | JsonValue::Object(_)) => {
                ColumnValue::Text(nested.to_string())
            }
        };
        values.insert(key, decoded);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDefinition, ElementDataType};

    fn columns() -> OrderedColumns {
        OrderedColumns::new(
            "visits",
            vec![
                ColumnDefinition::new("name", ElementDataType::String),
                ColumnDefinition::new("age", ElementDataType::Integer),
                ColumnDefinition::new("weight", ElementDataType::Number),
                ColumnDefinition::new("seen", ElementDataType::Bool),
                ColumnDefinition::new("tags", ElementDataType::Array),
                ColumnDefinition::new("geo", ElementDataType::Object),
            ],
        )
    }

    #[test]
    fn test_decode_scalars_and_nested() {
        let values = decode_mutation_payload(
            &columns(),
            Some(r#"{"name":"Ann","age":7,"weight":21.5,"seen":true,"tags":["a","b"],"geo":{"lat":1}}"#),
        )
        .unwrap();
        assert_eq!(values["name"], ColumnValue::Text("Ann".to_string()));
        assert_eq!(values["age"], ColumnValue::Integer(7));
        assert_eq!(values["weight"], ColumnValue::Real(21.5));
        assert_eq!(values["seen"], ColumnValue::Bool(true));
        assert_eq!(values["tags"], ColumnValue::Text(r#"["a","b"]"#.to_string()));
        assert_eq!(values["geo"], ColumnValue::Text(r#"{"lat":1}"#.to_string()));
    }

    #[test]
    fn test_null_and_absent_payload() {
        let values = decode_mutation_payload(&columns(), Some(r#"{"name":null}"#)).unwrap();
        assert_eq!(values["name"], ColumnValue::Null);
        assert!(decode_mutation_payload(&columns(), None).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_column_rejected() {
        let err = decode_mutation_payload(&columns(), Some(r#"{"_id":"x"}"#)).unwrap_err();
        assert!(matches!(err, BrokerError::PayloadDecode { .. }));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(decode_mutation_payload(&columns(), Some("[1,2]")).is_err());
        assert!(decode_mutation_payload(&columns(), Some("{broken")).is_err());
    }
}
