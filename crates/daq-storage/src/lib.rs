//! HDF5 storage for detector frames.
//!
//! Two engines share one container:
//!
//! - [`chunked_writer`]: appends frames to extensible chunked datasets,
//!   rolling over to a new file every `frames_per_file` frames and stamping
//!   each closed file with the global frame range it holds.
//! - [`format`]: writes a declarative metadata tree (groups, scalar datasets,
//!   attributes) into an open file and relocates already-written datasets.
//!
//! A storage loop typically drains a `daq_pool::SlotArena`, feeds every frame
//! to a [`DatasetSink`] and, before the last file closes, writes the format
//! into [`DatasetSink::file`].
//!
//! ```no_run
//! use daq_core::{ElementType, FrameDescriptor, WriterSettings};
//! use daq_storage::ChunkedDatasetWriter;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = WriterSettings {
//!     output_path: "run_{chunk:0>4}.h5".into(),
//!     frames_per_file: 1000,
//!     ..WriterSettings::default()
//! };
//! let mut writer = ChunkedDatasetWriter::new(settings);
//! let frame = FrameDescriptor::new(0, ElementType::U16, vec![512, 1024]);
//! writer.write_frame("data", &frame, &vec![0u8; frame.expected_byte_size()])?;
//! writer.close_file()?;
//! # Ok(())
//! # }
//! ```

pub mod chunked_writer;
pub mod error;
pub mod format;
mod h5_util;

pub use chunked_writer::{
    open_writer, ChunkedDatasetWriter, DatasetSink, NullDatasetWriter, ACQUISITION_GROUP,
    IMAGE_NR_HIGH, IMAGE_NR_LOW,
};
pub use error::{StorageError, StorageResult};
pub use format::{write_format, FormatDefinition, ValueMap};
