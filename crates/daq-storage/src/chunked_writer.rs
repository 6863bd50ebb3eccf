//! Chunked frame writer with file rollover.
//!
//! [`ChunkedDatasetWriter`] maps a global, monotonically increasing frame
//! index onto `(file chunk, in-file offset)`:
//!
//! ```text
//! frames_per_file = 0:  chunk = 1,                      offset = index
//! frames_per_file = N:  chunk = index / N + 1,          offset = index % N
//! ```
//!
//! Datasets are created lazily on first reference with one extra leading
//! frame axis (unlimited, chunked as one frame) and grown by
//! `dataset_increase_step` frames when an offset falls past the allocated
//! capacity. Closing a file compacts every dataset to the highest written
//! offset and stamps `image_nr_low` / `image_nr_high` with the 1-based global
//! frame range the file holds.
//!
//! The writer is driven by a single storage thread and is not meant to be
//! shared.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use hdf5::{Dataset, File};
use strfmt::strfmt;
use tracing::{debug, error, info, warn};

use daq_core::config::{CHUNK_PLACEHOLDER, WriterSettings};
use daq_core::{ElementType, Endianness, FrameDescriptor};

use crate::error::{StorageError, StorageResult};
use crate::h5_util;

/// Group under which each detector registers itself in an appended file.
pub const ACQUISITION_GROUP: &str = "measurement/acquisition";

/// First 1-based global frame index held by a file.
pub const IMAGE_NR_LOW: &str = "image_nr_low";

/// Last 1-based global frame index held by a file.
pub const IMAGE_NR_HIGH: &str = "image_nr_high";

/// The writer boundary used by the storage loop.
///
/// Implemented by [`ChunkedDatasetWriter`] and the discarding
/// [`NullDatasetWriter`].
pub trait DatasetSink {
    /// Persist one frame. See [`ChunkedDatasetWriter::write_data`].
    fn write_data(
        &mut self,
        dataset_name: &str,
        frame_index: u64,
        data: &[u8],
        shape: &[usize],
        element_type: ElementType,
        endianness: Endianness,
    ) -> StorageResult<()>;

    /// Persist one frame described by a buffer descriptor.
    fn write_frame(
        &mut self,
        dataset_name: &str,
        descriptor: &FrameDescriptor,
        data: &[u8],
    ) -> StorageResult<()> {
        self.write_data(
            dataset_name,
            descriptor.frame_index,
            data,
            &descriptor.shape,
            descriptor.element_type,
            descriptor.endianness,
        )
    }

    /// Compact, stamp and close the current file, if any.
    fn close_file(&mut self) -> StorageResult<()>;

    /// Open (or create) the file for `chunk`, closing the current one first.
    fn create_file(&mut self, chunk: u64) -> StorageResult<()>;

    /// Whether an output file is open.
    fn is_file_open(&self) -> bool;

    /// Whether `frame_index` belongs to the currently open file.
    fn is_data_for_current_file(&self, frame_index: u64) -> bool;

    /// Whether an appended file already held this detector's acquisition group.
    fn dataset_name_taken(&self) -> bool;

    /// The open container, for writing format metadata into it.
    fn file(&self) -> Option<&File>;
}

/// Registry entry for a dataset in the open file.
#[derive(Debug)]
struct DatasetEntry {
    dataset: Dataset,
    frame_shape: Vec<usize>,
    element_type: ElementType,
    capacity: u64,
}

/// Writes frames into extensible chunked datasets, rolling over to a new file
/// every `frames_per_file` frames.
#[derive(Debug)]
pub struct ChunkedDatasetWriter {
    settings: WriterSettings,
    file: Option<File>,
    current_path: Option<PathBuf>,
    datasets: HashMap<String, DatasetEntry>,
    /// 1-based chunk of the open file; 0 when closed.
    current_chunk: u64,
    /// Highest in-file offset written to the open file.
    max_offset: u64,
    dataset_name_taken: bool,
}

impl ChunkedDatasetWriter {
    /// Create a writer. No file is opened until the first write.
    #[must_use]
    pub fn new(settings: WriterSettings) -> Self {
        debug!(
            output_path = %settings.output_path,
            dataset_name = %settings.dataset_name,
            frames_per_file = settings.frames_per_file,
            initial_dataset_size = settings.initial_dataset_size,
            "Creating chunked writer"
        );
        Self {
            settings,
            file: None,
            current_path: None,
            datasets: HashMap::new(),
            current_chunk: 0,
            max_offset: 0,
            dataset_name_taken: false,
        }
    }

    /// Create a writer from its settings section.
    #[must_use]
    pub fn from_settings(settings: &WriterSettings) -> Self {
        Self::new(settings.clone())
    }

    /// Writer configuration.
    #[must_use]
    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    /// 1-based chunk of the open file, or 0 when no file is open.
    #[must_use]
    pub fn current_chunk(&self) -> u64 {
        self.current_chunk
    }

    /// Path of the open file.
    #[must_use]
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Allocated frame capacity of a dataset in the open file.
    #[must_use]
    pub fn dataset_capacity(&self, dataset_name: &str) -> Option<u64> {
        self.datasets.get(dataset_name).map(|entry| entry.capacity)
    }

    /// Highest in-file offset written to the open file.
    #[must_use]
    pub fn max_written_offset(&self) -> u64 {
        self.max_offset
    }

    /// File chunk a global frame index belongs to.
    #[must_use]
    pub fn chunk_for(&self, frame_index: u64) -> u64 {
        match self.settings.frames_per_file {
            0 => 1,
            per_file => frame_index / per_file + 1,
        }
    }

    /// In-file offset of a global frame index.
    #[must_use]
    pub fn relative_offset(&self, frame_index: u64) -> u64 {
        match self.settings.frames_per_file {
            0 => frame_index,
            per_file => frame_index % per_file,
        }
    }

    /// Output path for `chunk`: the template formatted with `{chunk}` when
    /// rolling over, the configured path otherwise.
    pub fn path_for_chunk(&self, chunk: u64) -> StorageResult<PathBuf> {
        let template = &self.settings.output_path;
        if !self.settings.rollover_enabled() {
            return Ok(PathBuf::from(template));
        }
        let vars = HashMap::from([(CHUNK_PLACEHOLDER.to_string(), chunk.to_string())]);
        strfmt(template, &vars)
            .map(PathBuf::from)
            .map_err(|e| StorageError::FilenameTemplate {
                template: template.clone(),
                reason: e.to_string(),
            })
    }

    /// Persist one frame.
    ///
    /// Opens or rolls over the output file as needed, creates the dataset on
    /// first reference, grows it when `frame_index` falls past its capacity
    /// and writes the frame as one chunk. `data` is in `endianness` order and
    /// is stored in host order.
    pub fn write_data(
        &mut self,
        dataset_name: &str,
        frame_index: u64,
        data: &[u8],
        shape: &[usize],
        element_type: ElementType,
        endianness: Endianness,
    ) -> StorageResult<()> {
        let expected = shape.iter().product::<usize>() * element_type.size();
        if data.len() != expected {
            return Err(StorageError::FrameSizeMismatch {
                dataset: dataset_name.to_string(),
                expected,
                actual: data.len(),
            });
        }
        if shape.len() > h5_util::MAX_FRAME_RANK {
            return Err(StorageError::UnsupportedRank {
                dataset: dataset_name.to_string(),
                rank: shape.len(),
                max: h5_util::MAX_FRAME_RANK,
            });
        }

        if !self.is_data_for_current_file(frame_index) || !self.is_file_open() {
            let chunk = self.chunk_for(frame_index);
            debug!(frame_index, chunk, current_chunk = self.current_chunk, "Frame needs new file");
            self.create_file(chunk)?;
        }

        let offset = self.relative_offset(frame_index);
        self.ensure_dataset(dataset_name, shape, element_type)?;
        self.expand_if_needed(dataset_name, offset)?;

        let entry = self
            .datasets
            .get(dataset_name)
            .ok_or(StorageError::NoOpenFile)?;
        h5_util::write_frame(
            &entry.dataset,
            element_type,
            endianness,
            shape,
            offset as usize,
            data,
        )
        .map_err(|source| StorageError::ChunkWrite {
            dataset: dataset_name.to_string(),
            offset,
            source,
        })?;

        if offset > self.max_offset {
            self.max_offset = offset;
        }
        Ok(())
    }

    /// Persist one frame described by a buffer descriptor.
    pub fn write_frame(
        &mut self,
        dataset_name: &str,
        descriptor: &FrameDescriptor,
        data: &[u8],
    ) -> StorageResult<()> {
        self.write_data(
            dataset_name,
            descriptor.frame_index,
            data,
            &descriptor.shape,
            descriptor.element_type,
            descriptor.endianness,
        )
    }

    fn ensure_dataset(
        &mut self,
        dataset_name: &str,
        shape: &[usize],
        element_type: ElementType,
    ) -> StorageResult<()> {
        if let Some(entry) = self.datasets.get(dataset_name) {
            if entry.frame_shape != shape || entry.element_type != element_type {
                return Err(StorageError::FrameShapeMismatch {
                    dataset: dataset_name.to_string(),
                    expected: entry.frame_shape.clone(),
                    expected_type: entry.element_type,
                    actual: shape.to_vec(),
                    actual_type: element_type,
                });
            }
            return Ok(());
        }

        let file = self.file.as_ref().ok_or(StorageError::NoOpenFile)?;
        let capacity = self.settings.initial_dataset_size;
        let dataset = create_dataset_with_recovery(file, dataset_name, element_type, shape, capacity)?;
        debug!(
            dataset = dataset_name,
            ?shape,
            %element_type,
            capacity,
            "Created frame dataset"
        );
        self.datasets.insert(
            dataset_name.to_string(),
            DatasetEntry {
                dataset,
                frame_shape: shape.to_vec(),
                element_type,
                capacity,
            },
        );
        Ok(())
    }

    /// Grow the dataset when `offset` is past its allocated frames.
    fn expand_if_needed(&mut self, dataset_name: &str, offset: u64) -> StorageResult<()> {
        let step = self.settings.dataset_increase_step;
        let Some(entry) = self.datasets.get_mut(dataset_name) else {
            return Err(StorageError::NoOpenFile);
        };
        if offset < entry.capacity {
            return Ok(());
        }
        let new_capacity = (offset + step).saturating_sub(1).max(offset + 1);
        h5_util::set_frame_capacity(&entry.dataset, new_capacity as usize).map_err(|source| {
            StorageError::hdf5(format!("failed to expand dataset '{dataset_name}'"), source)
        })?;
        debug!(
            dataset = dataset_name,
            offset,
            old_capacity = entry.capacity,
            new_capacity,
            "Expanded dataset"
        );
        entry.capacity = new_capacity;
        Ok(())
    }

    /// Compact and stamp every dataset, close the file and reset the
    /// per-file state. A no-op when no file is open.
    pub fn close_file(&mut self) -> StorageResult<()> {
        let Some(file) = self.file.take() else {
            debug!("File already closed");
            self.reset_file_state();
            return Ok(());
        };

        let per_file = self.settings.frames_per_file;
        let first_index = if per_file > 0 {
            (self.current_chunk - 1) * per_file
        } else {
            0
        };
        let image_nr_low = first_index + 1;
        let image_nr_high = first_index + self.max_offset + 1;
        info!(
            path = ?self.current_path,
            chunk = self.current_chunk,
            image_nr_low,
            image_nr_high,
            "Closing file"
        );

        let result = self.finalize_datasets(image_nr_low, image_nr_high);
        self.reset_file_state();
        result?;
        file.close()
            .map_err(|source| StorageError::hdf5("failed to close output file", source))
    }

    fn finalize_datasets(&self, image_nr_low: u64, image_nr_high: u64) -> StorageResult<()> {
        let frames = (self.max_offset + 1) as usize;
        for (name, entry) in &self.datasets {
            if entry.dataset.is_chunked() && h5_util::frame_capacity(&entry.dataset) != frames {
                h5_util::set_frame_capacity(&entry.dataset, frames).map_err(|source| {
                    StorageError::hdf5(format!("failed to compact dataset '{name}'"), source)
                })?;
                debug!(dataset = %name, frames, "Compacted dataset");
            }
            h5_util::write_attr(&entry.dataset, IMAGE_NR_LOW, &image_nr_low)
                .and_then(|()| h5_util::write_attr(&entry.dataset, IMAGE_NR_HIGH, &image_nr_high))
                .map_err(|source| {
                    StorageError::hdf5(format!("failed to stamp dataset '{name}'"), source)
                })?;
        }
        Ok(())
    }

    fn reset_file_state(&mut self) {
        self.datasets.clear();
        self.current_chunk = 0;
        self.max_offset = 0;
        self.current_path = None;
    }

    /// Open the output file for `chunk`, closing the current one first.
    ///
    /// An existing file is reopened read/write. If it already holds
    /// `measurement/acquisition/<dataset_name>` the writer flags
    /// [`dataset_name_taken`](Self::dataset_name_taken) instead of failing;
    /// otherwise that group is created. A missing file is created fresh.
    pub fn create_file(&mut self, chunk: u64) -> StorageResult<()> {
        if self.file.is_some() {
            self.close_file()?;
        }

        let path = self.path_for_chunk(chunk)?;
        let file = if path.exists() {
            info!(path = %path.display(), chunk, "Appending to existing file");
            let file = File::open_rw(&path).map_err(|source| StorageError::FileOpen {
                path: path.clone(),
                source,
            })?;
            let group = format!("{}/{}", ACQUISITION_GROUP, self.settings.dataset_name);
            if h5_util::path_exists(&file, &group) {
                warn!(
                    path = %path.display(),
                    dataset_name = %self.settings.dataset_name,
                    "Dataset name already taken in output file"
                );
                self.dataset_name_taken = true;
            } else {
                h5_util::ensure_group_path(&file, &group).map_err(|source| {
                    StorageError::hdf5(format!("failed to create group '{group}'"), source)
                })?;
            }
            file
        } else {
            info!(path = %path.display(), chunk, "Creating file");
            File::create(&path).map_err(|source| StorageError::FileCreate {
                path: path.clone(),
                source,
            })?
        };

        self.file = Some(file);
        self.current_path = Some(path);
        self.current_chunk = chunk;
        Ok(())
    }

    /// Whether an output file is open.
    #[must_use]
    pub fn is_file_open(&self) -> bool {
        self.file.is_some()
    }

    /// Whether `frame_index` belongs to the open file. Always true without
    /// rollover.
    #[must_use]
    pub fn is_data_for_current_file(&self, frame_index: u64) -> bool {
        !self.settings.rollover_enabled() || self.chunk_for(frame_index) == self.current_chunk
    }

    /// Whether an appended file already held this detector's acquisition
    /// group. Stays set once raised.
    #[must_use]
    pub fn dataset_name_taken(&self) -> bool {
        self.dataset_name_taken
    }

    /// The open container.
    #[must_use]
    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }
}

/// Create a frame dataset; if a stale link blocks the name, unlink it and
/// retry once. Unlink failures are only logged.
fn create_dataset_with_recovery(
    file: &File,
    name: &str,
    element_type: ElementType,
    shape: &[usize],
    capacity: u64,
) -> StorageResult<Dataset> {
    let (parent_path, leaf) = h5_util::split_parent(name);
    let parent = h5_util::ensure_group_path(file, parent_path).map_err(|source| {
        StorageError::DatasetCreate {
            dataset: name.to_string(),
            source,
        }
    })?;

    let capacity = capacity as usize;
    match h5_util::create_frame_dataset(&parent, leaf, element_type, shape, capacity) {
        Ok(dataset) => Ok(dataset),
        Err(first) => {
            warn!(dataset = name, error = %first, "Dataset creation failed, unlinking stale entry");
            if let Err(e) = parent.unlink(leaf) {
                warn!(dataset = name, error = %e, "Failed to unlink stale entry");
            }
            h5_util::create_frame_dataset(&parent, leaf, element_type, shape, capacity).map_err(
                |source| StorageError::DatasetCreate {
                    dataset: name.to_string(),
                    source,
                },
            )
        }
    }
}

impl DatasetSink for ChunkedDatasetWriter {
    fn write_data(
        &mut self,
        dataset_name: &str,
        frame_index: u64,
        data: &[u8],
        shape: &[usize],
        element_type: ElementType,
        endianness: Endianness,
    ) -> StorageResult<()> {
        ChunkedDatasetWriter::write_data(
            self,
            dataset_name,
            frame_index,
            data,
            shape,
            element_type,
            endianness,
        )
    }

    fn close_file(&mut self) -> StorageResult<()> {
        ChunkedDatasetWriter::close_file(self)
    }

    fn create_file(&mut self, chunk: u64) -> StorageResult<()> {
        ChunkedDatasetWriter::create_file(self, chunk)
    }

    fn is_file_open(&self) -> bool {
        ChunkedDatasetWriter::is_file_open(self)
    }

    fn is_data_for_current_file(&self, frame_index: u64) -> bool {
        ChunkedDatasetWriter::is_data_for_current_file(self, frame_index)
    }

    fn dataset_name_taken(&self) -> bool {
        ChunkedDatasetWriter::dataset_name_taken(self)
    }

    fn file(&self) -> Option<&File> {
        ChunkedDatasetWriter::file(self)
    }
}

impl Drop for ChunkedDatasetWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.close_file() {
                error!(error = %e, "Failed to close output file on drop");
            }
        }
    }
}

/// Sink that discards every frame. Selected by the `/dev/null` output path.
#[derive(Debug, Default)]
pub struct NullDatasetWriter;

impl DatasetSink for NullDatasetWriter {
    fn write_data(
        &mut self,
        _dataset_name: &str,
        _frame_index: u64,
        _data: &[u8],
        _shape: &[usize],
        _element_type: ElementType,
        _endianness: Endianness,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn close_file(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn create_file(&mut self, _chunk: u64) -> StorageResult<()> {
        Ok(())
    }

    fn is_file_open(&self) -> bool {
        false
    }

    fn is_data_for_current_file(&self, _frame_index: u64) -> bool {
        true
    }

    fn dataset_name_taken(&self) -> bool {
        false
    }

    fn file(&self) -> Option<&File> {
        None
    }
}

/// Pick the sink for the configured output path.
#[must_use]
pub fn open_writer(settings: &WriterSettings) -> Box<dyn DatasetSink> {
    if settings.is_null_output() {
        info!("Output path is {}, frames will be discarded", settings.output_path);
        Box::new(NullDatasetWriter)
    } else {
        Box::new(ChunkedDatasetWriter::from_settings(settings))
    }
}
