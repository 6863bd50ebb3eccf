//! Storage error taxonomy.
//!
//! Every variant is fatal for the call that raised it. Tolerated conditions
//! (existing groups, stale links, relocation misses) never surface here;
//! they are logged and the call continues.

use std::path::PathBuf;
use thiserror::Error;

use daq_core::ElementType;

/// Convenience alias for storage results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised by the chunked writer and the format engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The output file could not be created.
    #[error("failed to create output file {path}: {source}")]
    FileCreate {
        /// Target path.
        path: PathBuf,
        /// Backend error.
        source: hdf5::Error,
    },

    /// An existing output file could not be reopened for writing.
    #[error("failed to open output file {path}: {source}")]
    FileOpen {
        /// Target path.
        path: PathBuf,
        /// Backend error.
        source: hdf5::Error,
    },

    /// A frame dataset could not be created, even after stale-link recovery.
    #[error("failed to create dataset '{dataset}': {source}")]
    DatasetCreate {
        /// Dataset name.
        dataset: String,
        /// Backend error.
        source: hdf5::Error,
    },

    /// The backend rejected a frame write.
    #[error("failed to write frame to dataset '{dataset}' at offset {offset}: {source}")]
    ChunkWrite {
        /// Dataset name.
        dataset: String,
        /// In-file frame offset.
        offset: u64,
        /// Backend error.
        source: hdf5::Error,
    },

    /// The frame's byte count does not match its shape and element type.
    #[error("frame for dataset '{dataset}' has {actual} bytes, shape and type require {expected}")]
    FrameSizeMismatch {
        /// Dataset name.
        dataset: String,
        /// `product(shape) * element size`.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },

    /// The frame's shape or type differs from the one the dataset was created with.
    #[error(
        "frame for dataset '{dataset}' is {actual_type} {actual:?}, dataset holds {expected_type} {expected:?}"
    )]
    FrameShapeMismatch {
        /// Dataset name.
        dataset: String,
        /// Frame shape the dataset was created with.
        expected: Vec<usize>,
        /// Element type the dataset was created with.
        expected_type: ElementType,
        /// Frame shape supplied.
        actual: Vec<usize>,
        /// Element type supplied.
        actual_type: ElementType,
    },

    /// The frame has more dimensions than the writer supports.
    #[error("frame for dataset '{dataset}' has rank {rank}, at most {max} is supported")]
    UnsupportedRank {
        /// Dataset name.
        dataset: String,
        /// Frame rank.
        rank: usize,
        /// Largest supported frame rank.
        max: usize,
    },

    /// An operation needed an open file and there was none.
    #[error("no output file is open")]
    NoOpenFile,

    /// The output path template could not be formatted.
    #[error("invalid output path template '{template}': {reason}")]
    FilenameTemplate {
        /// Configured template.
        template: String,
        /// Formatter message.
        reason: String,
    },

    /// A schema node referenced a name missing from the value map.
    #[error("node '{node}' references undefined value '{reference}'")]
    UndefinedReference {
        /// Schema node path.
        node: String,
        /// Missing value name.
        reference: String,
    },

    /// A resolved value does not fit the node's declared kind.
    #[error("node '{node}' declares kind {kind} but resolved to {value}")]
    TypeCoercion {
        /// Schema node path.
        node: String,
        /// Declared kind.
        kind: String,
        /// Description of the offending value.
        value: String,
    },

    /// A dataset node has a non-attribute child.
    #[error("dataset node '{parent}' may only contain attributes, found '{node}'")]
    InvalidSchema {
        /// Offending child node.
        node: String,
        /// Dataset node path.
        parent: String,
    },

    /// A schema dataset would overwrite an existing dataset.
    #[error("dataset '{path}' already exists")]
    DatasetExists {
        /// Dataset path in the container.
        path: String,
    },

    /// An input value name is not declared by the format.
    #[error("input value '{name}' is not declared by the format")]
    UnknownInput {
        /// Input name.
        name: String,
    },

    /// An input value could not be converted to its declared kind.
    #[error("input value '{name}' cannot be read as {kind}: {reason}")]
    InvalidInput {
        /// Input name.
        name: String,
        /// Declared kind.
        kind: String,
        /// Conversion failure.
        reason: String,
    },

    /// Any other backend failure, with what was being attempted.
    #[error("{context}: {source}")]
    Hdf5 {
        /// Operation in progress.
        context: String,
        /// Backend error.
        source: hdf5::Error,
    },

    /// A format definition could not be parsed.
    #[error("invalid format definition: {0}")]
    Format(String),
}

impl StorageError {
    pub(crate) fn hdf5(context: impl Into<String>, source: hdf5::Error) -> Self {
        StorageError::Hdf5 {
            context: context.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Format(err.to_string())
    }
}

impl From<toml::de::Error> for StorageError {
    fn from(err: toml::de::Error) -> Self {
        StorageError::Format(err.to_string())
    }
}
