//! Schema materialization and relocation.

use hdf5::{Group, Location};
use tracing::{debug, info, warn};

use super::definition::{FormatDefinition, Relocation};
use super::schema::{SchemaNode, ValueKind, ValueSource};
use super::values::{coerce, StoredValue, ValueMap};
use crate::error::{StorageError, StorageResult};
use crate::h5_util;

/// Write `format` into `root` using `inputs`, then apply its relocations.
///
/// Materialization is depth-first in declaration order and stops at the
/// first error; nodes already written stay in the file. Relocations never
/// fail the call.
pub fn write_format(
    root: &Group,
    format: &FormatDefinition,
    inputs: &ValueMap,
) -> StorageResult<()> {
    let values = format.build_values(inputs)?;
    debug!(
        format = %format.name,
        nodes = format.root.len(),
        values = values.len(),
        "Writing format"
    );

    for node in &format.root {
        materialize(root, "", node, &values)?;
    }
    relocate(root, &format.relocations);

    info!(format = %format.name, "Format written");
    Ok(())
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn materialize(
    parent: &Group,
    parent_path: &str,
    node: &SchemaNode,
    values: &ValueMap,
) -> StorageResult<()> {
    let path = join(parent_path, node.name());
    match node {
        SchemaNode::Group { name, children } => {
            let group = if parent.link_exists(name) {
                debug!(group = %path, "Group exists, entering");
                parent.group(name)
            } else {
                parent.create_group(name)
            }
            .map_err(|e| StorageError::hdf5(format!("group '{path}'"), e))?;

            for child in children {
                materialize(&group, &path, child, values)?;
            }
        }
        SchemaNode::Attribute { name, kind, source } => {
            write_attribute(parent, &path, name, *kind, source, values)?;
        }
        SchemaNode::Dataset {
            name,
            kind,
            source,
            children,
        } => {
            if let Some(child) = children.iter().find(|child| !child.is_attribute()) {
                return Err(StorageError::InvalidSchema {
                    node: join(&path, child.name()),
                    parent: path,
                });
            }
            let value = resolve(&path, *kind, source, values)?;
            if parent.link_exists(name) {
                return Err(StorageError::DatasetExists { path });
            }

            let dataset = match &value {
                StoredValue::Text(text) => h5_util::to_varlen(text)
                    .and_then(|text| h5_util::create_scalar_dataset(parent, name, &text)),
                StoredValue::Int(v) => h5_util::create_scalar_dataset(parent, name, v),
                StoredValue::Float(v) => h5_util::create_scalar_dataset(parent, name, v),
            }
            .map_err(|e| StorageError::hdf5(format!("dataset '{path}'"), e))?;

            for child in children {
                if let SchemaNode::Attribute { name, kind, source } = child {
                    write_attribute(&dataset, &join(&path, name), name, *kind, source, values)?;
                }
            }
        }
    }
    Ok(())
}

fn resolve(
    path: &str,
    kind: ValueKind,
    source: &ValueSource,
    values: &ValueMap,
) -> StorageResult<StoredValue> {
    let value = match source {
        ValueSource::Literal(value) => value,
        ValueSource::Reference(reference) => {
            values
                .get(reference)
                .ok_or_else(|| StorageError::UndefinedReference {
                    node: path.to_string(),
                    reference: reference.clone(),
                })?
        }
    };
    coerce(path, kind, value)
}

fn write_attribute(
    loc: &Location,
    path: &str,
    name: &str,
    kind: ValueKind,
    source: &ValueSource,
    values: &ValueMap,
) -> StorageResult<()> {
    let written = match resolve(path, kind, source, values)? {
        StoredValue::Text(text) => {
            h5_util::to_varlen(&text).and_then(|text| h5_util::write_attr(loc, name, &text))
        }
        StoredValue::Int(v) => h5_util::write_attr(loc, name, &v),
        StoredValue::Float(v) => h5_util::write_attr(loc, name, &v),
    };
    written.map_err(|e| StorageError::hdf5(format!("attribute '{path}'"), e))
}

/// Apply relocations in order. A missing source is skipped and a failed
/// move is logged; neither stops the remaining relocations.
pub fn relocate(root: &Group, relocations: &[Relocation]) {
    for relocation in relocations {
        if !h5_util::path_exists(root, &relocation.from) {
            warn!(
                from = %relocation.from,
                to = %relocation.to,
                "Relocation source missing, skipping"
            );
            continue;
        }
        match root.relink(&relocation.from, &relocation.to) {
            Ok(()) => debug!(from = %relocation.from, to = %relocation.to, "Relocated"),
            Err(e) => warn!(
                from = %relocation.from,
                to = %relocation.to,
                error = %e,
                "Relocation failed"
            ),
        }
    }
}
