//! Runtime values and the value map a schema resolves against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::schema::ValueKind;
use crate::error::{StorageError, StorageResult};

/// Value map keyed by reference name, e.g. `general/user`.
pub type ValueMap = BTreeMap<String, Value>;

/// A single runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Text.
    Text(String),
    /// Signed integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::DateTime(_) => "date_time",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(text) => write!(f, "text {text:?}"),
            Value::Int(v) => write!(f, "int {v}"),
            Value::Float(v) => write!(f, "float {v}"),
            Value::DateTime(dt) => write!(f, "date_time {}", dt.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

/// A value as it lands in the container after coercion to a node's kind.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StoredValue {
    Text(String),
    Int(i64),
    Float(f64),
}

/// Coerce `value` to `kind` for the node at `node`.
///
/// Text kinds take text; date-time also takes a timestamp, stored as
/// RFC 3339. Numeric kinds take exactly their own representation.
pub(crate) fn coerce(node: &str, kind: ValueKind, value: &Value) -> StorageResult<StoredValue> {
    match (kind, value) {
        (ValueKind::Text | ValueKind::Note | ValueKind::DateTime, Value::Text(text)) => {
            Ok(StoredValue::Text(text.clone()))
        }
        (ValueKind::DateTime, Value::DateTime(dt)) => Ok(StoredValue::Text(dt.to_rfc3339())),
        (ValueKind::Int, Value::Int(v)) => Ok(StoredValue::Int(*v)),
        (ValueKind::Float | ValueKind::Number, Value::Float(v)) => Ok(StoredValue::Float(*v)),
        (kind, other) => Err(StorageError::TypeCoercion {
            node: node.to_string(),
            kind: kind.to_string(),
            value: other.type_name().to_string(),
        }),
    }
}

/// Values derived from other values after inputs are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CalculatedValue {
    /// Current UTC time.
    Timestamp {
        /// Target value name.
        name: String,
    },
    /// Copy of another value.
    Alias {
        /// Target value name.
        name: String,
        /// Source value name.
        from: String,
    },
}

impl CalculatedValue {
    /// Name of the value this rule produces.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            CalculatedValue::Timestamp { name } | CalculatedValue::Alias { name, .. } => name,
        }
    }

    fn apply(&self, values: &mut ValueMap) -> StorageResult<()> {
        let value = match self {
            CalculatedValue::Timestamp { .. } => Value::DateTime(Utc::now()),
            CalculatedValue::Alias { name, from } => {
                values
                    .get(from)
                    .cloned()
                    .ok_or_else(|| StorageError::UndefinedReference {
                        node: name.clone(),
                        reference: from.clone(),
                    })?
            }
        };
        values.insert(self.name().to_string(), value);
        Ok(())
    }

    pub(crate) fn map_strings(&mut self, f: &impl Fn(&str) -> String) {
        match self {
            CalculatedValue::Timestamp { name } => *name = f(name),
            CalculatedValue::Alias { name, from } => {
                *name = f(name);
                *from = f(from);
            }
        }
    }
}

/// Merge the value layers: defaults, then caller inputs, then calculated
/// values in declaration order. Later layers win.
pub fn merge_values(
    defaults: &ValueMap,
    inputs: &ValueMap,
    calculated: &[CalculatedValue],
) -> StorageResult<ValueMap> {
    let mut values = defaults.clone();
    values.extend(inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
    for rule in calculated {
        rule.apply(&mut values)?;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_coercion_rules() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert_eq!(
            coerce("n", ValueKind::Note, &"hi".into()).unwrap(),
            StoredValue::Text("hi".into())
        );
        assert_eq!(
            coerce("n", ValueKind::DateTime, &dt.into()).unwrap(),
            StoredValue::Text("2024-05-01T12:00:00+00:00".into())
        );
        assert_eq!(
            coerce("n", ValueKind::Int, &7i64.into()).unwrap(),
            StoredValue::Int(7)
        );
        assert_eq!(
            coerce("n", ValueKind::Number, &1.5f64.into()).unwrap(),
            StoredValue::Float(1.5)
        );

        let err = coerce("general/n", ValueKind::Float, &7i64.into()).unwrap_err();
        match err {
            StorageError::TypeCoercion { node, kind, value } => {
                assert_eq!(node, "general/n");
                assert_eq!(kind, "float");
                assert_eq!(value, "int");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(coerce("n", ValueKind::Text, &3i64.into()).is_err());
    }

    #[test]
    fn test_merge_layers() {
        let defaults = ValueMap::from([
            ("a".to_string(), Value::from(1i64)),
            ("b".to_string(), Value::from("default")),
        ]);
        let inputs = ValueMap::from([("b".to_string(), Value::from("input"))]);
        let calculated = vec![
            CalculatedValue::Alias {
                name: "c".into(),
                from: "b".into(),
            },
            CalculatedValue::Timestamp { name: "t".into() },
        ];

        let values = merge_values(&defaults, &inputs, &calculated).unwrap();
        assert_eq!(values["a"], Value::Int(1));
        assert_eq!(values["b"], Value::from("input"));
        assert_eq!(values["c"], Value::from("input"));
        assert!(matches!(values["t"], Value::DateTime(_)));
    }

    #[test]
    fn test_alias_of_missing_value() {
        let calculated = vec![CalculatedValue::Alias {
            name: "c".into(),
            from: "missing".into(),
        }];
        let err = merge_values(&ValueMap::new(), &ValueMap::new(), &calculated).unwrap_err();
        assert!(matches!(err, StorageError::UndefinedReference { .. }));
    }

    #[test]
    fn test_value_serde_shape() {
        let value: Value = serde_json::from_str(r#"{"int": 4}"#).unwrap();
        assert_eq!(value, Value::Int(4));
        let value: Value =
            serde_json::from_str(r#"{"date_time": "2024-05-01T12:00:00Z"}"#).unwrap();
        assert!(matches!(value, Value::DateTime(_)));
    }
}
