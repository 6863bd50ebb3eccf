//! Format definitions: schema, value layers and relocations as one unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::schema::{SchemaNode, ValueKind};
use super::values::{merge_values, CalculatedValue, Value, ValueMap};
use crate::error::{StorageError, StorageResult};

/// Placeholder replaced by [`FormatDefinition::instantiate`].
pub const DATASET_NAME_PLACEHOLDER: &str = "{dataset_name}";

/// Move of an already-written object to its final place in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    /// Current path, relative to the file root.
    pub from: String,
    /// Destination path; its parent group must exist.
    pub to: String,
}

impl Relocation {
    /// Relocation from `from` to `to`.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Everything needed to lay out and finish one output file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatDefinition {
    /// Descriptive name, only used in logs.
    pub name: String,
    /// Top-level schema nodes, materialized under the file root.
    pub root: Vec<SchemaNode>,
    /// Lowest-precedence values.
    pub defaults: ValueMap,
    /// Kinds of the values a caller may supply.
    pub input_kinds: BTreeMap<String, ValueKind>,
    /// Derived values, applied after inputs.
    pub calculated: Vec<CalculatedValue>,
    /// Moves applied after the schema is written, in order.
    pub relocations: Vec<Relocation>,
}

impl FormatDefinition {
    /// Parse a JSON definition.
    pub fn from_json_str(text: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a TOML definition.
    pub fn from_toml_str(text: &str) -> StorageResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a definition, choosing the parser by file extension
    /// (`.json` or `.toml`).
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Format(format!("cannot read {}: {e}", path.display())))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("toml") => Self::from_toml_str(&text),
            _ => Err(StorageError::Format(format!(
                "unsupported format file extension: {}",
                path.display()
            ))),
        }
    }

    /// Copy of this definition with every `{dataset_name}` replaced in node
    /// names, references, literal text, value names and relocation paths.
    #[must_use]
    pub fn instantiate(&self, dataset_name: &str) -> Self {
        let substitute = |s: &str| s.replace(DATASET_NAME_PLACEHOLDER, dataset_name);

        let mut format = self.clone();
        format
            .root
            .iter_mut()
            .for_each(|node| node.map_strings(&substitute));
        format.defaults = self
            .defaults
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::Text(text) => Value::Text(substitute(text)),
                    other => other.clone(),
                };
                (substitute(name), value)
            })
            .collect();
        format.input_kinds = self
            .input_kinds
            .iter()
            .map(|(name, kind)| (substitute(name), *kind))
            .collect();
        format
            .calculated
            .iter_mut()
            .for_each(|rule| rule.map_strings(&substitute));
        for relocation in &mut format.relocations {
            relocation.from = substitute(&relocation.from);
            relocation.to = substitute(&relocation.to);
        }
        format
    }

    /// Final value map for `inputs`: defaults, then inputs, then calculated.
    pub fn build_values(&self, inputs: &ValueMap) -> StorageResult<ValueMap> {
        merge_values(&self.defaults, inputs, &self.calculated)
    }

    /// Convert loosely typed caller input to typed values using
    /// `input_kinds`. Names the format does not declare are rejected.
    pub fn parse_inputs(
        &self,
        raw: &serde_json::Map<String, serde_json::Value>,
    ) -> StorageResult<ValueMap> {
        raw.iter()
            .map(|(name, json)| {
                let kind = self
                    .input_kinds
                    .get(name)
                    .copied()
                    .ok_or_else(|| StorageError::UnknownInput { name: name.clone() })?;
                Ok((name.clone(), parse_input(name, kind, json)?))
            })
            .collect()
    }
}

fn parse_input(name: &str, kind: ValueKind, json: &serde_json::Value) -> StorageResult<Value> {
    let invalid = |reason: String| StorageError::InvalidInput {
        name: name.to_string(),
        kind: kind.to_string(),
        reason,
    };

    match kind {
        ValueKind::Text | ValueKind::Note => json
            .as_str()
            .map(Value::from)
            .ok_or_else(|| invalid(format!("expected a string, got {json}"))),
        ValueKind::DateTime => {
            let text = json
                .as_str()
                .ok_or_else(|| invalid(format!("expected a string, got {json}")))?;
            DateTime::parse_from_rfc3339(text)
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|e| invalid(e.to_string()))
        }
        ValueKind::Int => json
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| invalid(format!("expected an integer, got {json}"))),
        ValueKind::Float | ValueKind::Number => json
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| invalid(format!("expected a number, got {json}"))),
    }
}
