//! Schema tree types.
//!
//! A schema is a tree of [`SchemaNode`]s. Groups nest freely; datasets may
//! only carry attributes. Nodes are plain data, usually deserialized from a
//! format definition file:
//!
//! ```json
//! { "node": "dataset", "name": "user", "kind": "text",
//!   "source": { "reference": "general/user" },
//!   "children": [
//!     { "node": "attribute", "name": "units", "kind": "text",
//!       "source": { "literal": { "text": "none" } } }
//!   ] }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::values::Value;

/// Declared value kind of an attribute or dataset node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Plain text.
    #[serde(alias = "NX_CHAR")]
    Text,
    /// Date-time, stored as RFC 3339 text.
    #[serde(alias = "NX_DATE_TIME")]
    DateTime,
    /// Long-form note, stored as text.
    #[serde(alias = "NXnote")]
    Note,
    /// Signed 64-bit integer.
    #[serde(alias = "NX_INT")]
    Int,
    /// 64-bit float.
    #[serde(alias = "NX_FLOAT")]
    Float,
    /// Generic number, stored as a 64-bit float.
    #[serde(alias = "NX_NUMBER")]
    Number,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Text => "text",
            ValueKind::DateTime => "date_time",
            ValueKind::Note => "note",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Number => "number",
        };
        f.write_str(name)
    }
}

/// Where a node's value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// A value fixed in the schema.
    Literal(Value),
    /// A name looked up in the runtime value map.
    Reference(String),
}

/// One node of the schema tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum SchemaNode {
    /// A group; children are materialized inside it.
    Group {
        /// Group name.
        name: String,
        /// Nested nodes.
        #[serde(default)]
        children: Vec<SchemaNode>,
    },
    /// A scalar attribute on the enclosing group or dataset.
    Attribute {
        /// Attribute name.
        name: String,
        /// Declared kind.
        kind: ValueKind,
        /// Value source.
        source: ValueSource,
    },
    /// A scalar dataset; children must be attributes.
    Dataset {
        /// Dataset name.
        name: String,
        /// Declared kind.
        kind: ValueKind,
        /// Value source.
        source: ValueSource,
        /// Attributes attached to the dataset.
        #[serde(default)]
        children: Vec<SchemaNode>,
    },
}

impl SchemaNode {
    /// Group node.
    pub fn group(name: impl Into<String>, children: Vec<SchemaNode>) -> Self {
        SchemaNode::Group {
            name: name.into(),
            children,
        }
    }

    /// Attribute node.
    pub fn attribute(name: impl Into<String>, kind: ValueKind, source: ValueSource) -> Self {
        SchemaNode::Attribute {
            name: name.into(),
            kind,
            source,
        }
    }

    /// Dataset node.
    pub fn dataset(
        name: impl Into<String>,
        kind: ValueKind,
        source: ValueSource,
        children: Vec<SchemaNode>,
    ) -> Self {
        SchemaNode::Dataset {
            name: name.into(),
            kind,
            source,
            children,
        }
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            SchemaNode::Group { name, .. }
            | SchemaNode::Attribute { name, .. }
            | SchemaNode::Dataset { name, .. } => name,
        }
    }

    /// Whether this is an attribute node.
    #[must_use]
    pub fn is_attribute(&self) -> bool {
        matches!(self, SchemaNode::Attribute { .. })
    }

    /// Apply `f` to every string in the tree that can carry a template:
    /// names, references and literal text.
    pub(crate) fn map_strings(&mut self, f: &impl Fn(&str) -> String) {
        match self {
            SchemaNode::Group { name, children } => {
                *name = f(name);
                children.iter_mut().for_each(|child| child.map_strings(f));
            }
            SchemaNode::Attribute { name, source, .. } => {
                *name = f(name);
                source.map_strings(f);
            }
            SchemaNode::Dataset {
                name,
                source,
                children,
                ..
            } => {
                *name = f(name);
                source.map_strings(f);
                children.iter_mut().for_each(|child| child.map_strings(f));
            }
        }
    }
}

impl ValueSource {
    /// Literal value.
    pub fn literal(value: impl Into<Value>) -> Self {
        ValueSource::Literal(value.into())
    }

    /// Reference into the value map.
    pub fn reference(name: impl Into<String>) -> Self {
        ValueSource::Reference(name.into())
    }

    fn map_strings(&mut self, f: &impl Fn(&str) -> String) {
        match self {
            ValueSource::Reference(name) => *name = f(name),
            ValueSource::Literal(Value::Text(text)) => *text = f(text),
            ValueSource::Literal(_) => {}
        }
    }
}
