//! Format tree engine.
//!
//! A [`FormatDefinition`] describes the metadata layout of an output file:
//! a tree of groups, scalar datasets and attributes whose values are either
//! literals or references into a [`ValueMap`], plus a list of relocations
//! that move already-written objects (typically the frame datasets) into
//! their final place.
//!
//! The value map is built in three layers, later layers winning:
//!
//! 1. the format's defaults
//! 2. caller inputs, typed with [`FormatDefinition::parse_inputs`]
//! 3. calculated values, in declaration order
//!
//! # Example
//!
//! ```no_run
//! use daq_storage::format::{write_format, FormatDefinition, ValueMap};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let format = FormatDefinition::load("formats/detector.json")?.instantiate("JF07");
//! let file = hdf5::File::open_rw("run_0001.h5")?;
//! write_format(&file, &format, &ValueMap::new())?;
//! # Ok(())
//! # }
//! ```

mod definition;
mod engine;
mod schema;
mod values;

pub use definition::{FormatDefinition, Relocation, DATASET_NAME_PLACEHOLDER};
pub use engine::{relocate, write_format};
pub use schema::{SchemaNode, ValueKind, ValueSource};
pub use values::{merge_values, CalculatedValue, Value, ValueMap};
