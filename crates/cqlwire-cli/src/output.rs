//! JSON rendering of query results.
//!
//! Each row becomes one JSON object keyed by column name. Scalars map to
//! their natural JSON form; blobs and arbitrary-precision numbers are
//! written as `0x` hex strings so that no precision is lost.

use cqlwire_client::RowView;
use cqlwire_common::CqlValue;
use serde_json::{Map, Number, Value};

/// Converts a single cell. Nulls and empty values become `null`.
pub fn value_to_json(value: Option<&CqlValue>) -> Value {
    let Some(value) = value else {
        return Value::Null;
    };
    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::String(s.clone()),
        CqlValue::Bigint(n) | CqlValue::Counter(n) | CqlValue::Timestamp(n) | CqlValue::Time(n) => {
            Value::from(*n)
        }
        CqlValue::Int(n) => Value::from(*n),
        CqlValue::Smallint(n) => Value::from(*n),
        CqlValue::Tinyint(n) => Value::from(*n),
        CqlValue::Date(days) => Value::from(*days),
        CqlValue::Boolean(b) => Value::Bool(*b),
        // NaN and infinities have no JSON form
        CqlValue::Double(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        CqlValue::Float(f) => Number::from_f64(f64::from(*f))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CqlValue::Uuid(id) | CqlValue::Timeuuid(id) => Value::String(id.to_string()),
        CqlValue::Inet(addr) => Value::String(addr.to_string()),
        CqlValue::Blob(bytes) | CqlValue::Varint(bytes) | CqlValue::Custom(bytes) => {
            Value::String(to_hex(bytes))
        }
        CqlValue::Decimal { scale, unscaled } => {
            let mut object = Map::new();
            object.insert("scale".to_string(), Value::from(*scale));
            object.insert("unscaled".to_string(), Value::String(to_hex(unscaled)));
            Value::Object(object)
        }
        CqlValue::List(items) | CqlValue::Set(items) => {
            Value::Array(items.iter().map(|item| value_to_json(Some(item))).collect())
        }
        CqlValue::Map(entries) => map_to_json(entries),
        CqlValue::Tuple(items) => {
            Value::Array(items.iter().map(|item| value_to_json(item.as_ref())).collect())
        }
        CqlValue::Udt { fields, .. } => Value::Object(
            fields
                .iter()
                .map(|(name, field)| (name.clone(), value_to_json(field.as_ref())))
                .collect(),
        ),
        CqlValue::Empty => Value::Null,
    }
}

/// Maps with text keys become objects, any other map an array of pairs.
fn map_to_json(entries: &[(CqlValue, CqlValue)]) -> Value {
    let text_keys = entries
        .iter()
        .all(|(key, _)| matches!(key, CqlValue::Text(_) | CqlValue::Ascii(_)));
    if text_keys {
        Value::Object(
            entries
                .iter()
                .filter_map(|(key, value)| match key {
                    CqlValue::Text(k) | CqlValue::Ascii(k) => {
                        Some((k.clone(), value_to_json(Some(value))))
                    }
                    _ => None,
                })
                .collect(),
        )
    } else {
        Value::Array(
            entries
                .iter()
                .map(|(key, value)| {
                    Value::Array(vec![value_to_json(Some(key)), value_to_json(Some(value))])
                })
                .collect(),
        )
    }
}

/// Renders a row as a JSON object in column order.
pub fn row_to_json(row: &RowView<'_>) -> Value {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = row.value_at(index).ok().flatten();
        object.insert(column.name.clone(), value_to_json(value));
    }
    Value::Object(object)
}

fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cqlwire_common::{ColumnSpec, ColumnType, Row};
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(value_to_json(None), Value::Null);
        assert_eq!(value_to_json(Some(&CqlValue::Empty)), Value::Null);
        assert_eq!(value_to_json(Some(&CqlValue::Int(7))), json!(7));
        assert_eq!(value_to_json(Some(&CqlValue::Boolean(true))), json!(true));
        assert_eq!(
            value_to_json(Some(&CqlValue::Text("cassandra".to_string()))),
            json!("cassandra")
        );
        assert_eq!(
            value_to_json(Some(&CqlValue::Inet("127.0.0.1".parse().unwrap()))),
            json!("127.0.0.1")
        );
        assert_eq!(
            value_to_json(Some(&CqlValue::Blob(Bytes::from_static(&[0xca, 0xfe])))),
            json!("0xcafe")
        );
        assert_eq!(value_to_json(Some(&CqlValue::Double(f64::NAN))), Value::Null);
    }

    #[test]
    fn test_collections() {
        let list = CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]);
        assert_eq!(value_to_json(Some(&list)), json!([1, 2]));

        let text_map = CqlValue::Map(vec![(
            CqlValue::Text("class".to_string()),
            CqlValue::Text("SimpleStrategy".to_string()),
        )]);
        assert_eq!(value_to_json(Some(&text_map)), json!({"class": "SimpleStrategy"}));

        let int_map = CqlValue::Map(vec![(CqlValue::Int(1), CqlValue::Boolean(false))]);
        assert_eq!(value_to_json(Some(&int_map)), json!([[1, false]]));

        let tuple = CqlValue::Tuple(vec![Some(CqlValue::Int(1)), None]);
        assert_eq!(value_to_json(Some(&tuple)), json!([1, null]));
    }

    #[test]
    fn test_row_to_json() {
        let columns = vec![
            ColumnSpec::new("system", "roles", "role", ColumnType::Text),
            ColumnSpec::new("system", "roles", "salted_hash", ColumnType::Text),
        ];
        let row = Row::new(vec![Some(CqlValue::Text("cassandra".to_string())), None]);
        let rendered = row_to_json(&RowView::new(&columns, &row));
        assert_eq!(rendered, json!({"role": "cassandra", "salted_hash": null}));
        assert_eq!(
            serde_json::to_string(&rendered).unwrap(),
            r#"{"role":"cassandra","salted_hash":null}"#
        );
    }
}
