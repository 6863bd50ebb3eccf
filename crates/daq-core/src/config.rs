//! Configuration for the frame buffer and the chunked writer.
//!
//! Settings are layered with `figment`, lowest priority first:
//!
//! 1. Library defaults ([`Settings::default`])
//! 2. A TOML file (usually `config/writer.toml`)
//! 3. Environment variables prefixed with `DAQ_WRITER_`, nested keys split
//!    on `__` (e.g. `DAQ_WRITER_WRITER__FRAMES_PER_FILE=1000`)
//!
//! ## Schema
//!
//! ```toml
//! log_level = "info"
//!
//! [arena]
//! n_slots = 100
//! read_retry_interval = "5ms"
//!
//! [writer]
//! output_path = "/data/run_042_{chunk:0>6}.h5"
//! dataset_name = "JF07T32V01"
//! frames_per_file = 10000
//! initial_dataset_size = 1000
//! dataset_increase_step = 1000
//! raw_image_dataset_name = "raw_data"
//! ```
//!
//! When `frames_per_file` is non-zero the output path is a template and the
//! `{chunk}` placeholder receives the 1-based file number.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AppResult, DaqError};

/// Placeholder substituted with the 1-based file chunk number.
pub const CHUNK_PLACEHOLDER: &str = "chunk";

/// Output path that selects the discarding writer.
pub const NULL_OUTPUT_PATH: &str = "/dev/null";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging verbosity: trace, debug, info, warn or error.
    pub log_level: String,
    /// Frame buffer settings.
    pub arena: ArenaSettings,
    /// Chunked writer settings.
    pub writer: WriterSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            arena: ArenaSettings::default(),
            writer: WriterSettings::default(),
        }
    }
}

/// Slot arena configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaSettings {
    /// Number of fixed-size slots.
    pub n_slots: usize,
    /// Slot size in bytes. `None` lets the receiver size the arena from the
    /// first frame it sees.
    pub slot_size: Option<usize>,
    /// Delay between attempts when the arena is full (producer) or empty
    /// (consumer).
    #[serde(with = "humantime_serde")]
    pub read_retry_interval: Duration,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            n_slots: 100,
            slot_size: None,
            read_retry_interval: Duration::from_millis(5),
        }
    }
}

/// Chunked dataset writer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    /// Output file path, or a `{chunk}` template when rolling over.
    pub output_path: String,
    /// Detector/dataset name used for the acquisition group conflict check.
    pub dataset_name: String,
    /// Frames per output file; 0 disables rollover.
    pub frames_per_file: u64,
    /// Frame capacity allocated when a dataset is first created.
    pub initial_dataset_size: u64,
    /// Frames added each time a dataset has to grow.
    pub dataset_increase_step: u64,
    /// Name of the dataset raw frames are streamed into.
    pub raw_image_dataset_name: String,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            output_path: "output.h5".to_string(),
            dataset_name: "detector".to_string(),
            frames_per_file: 0,
            initial_dataset_size: 1000,
            dataset_increase_step: 1000,
            raw_image_dataset_name: "raw_data".to_string(),
        }
    }
}

impl WriterSettings {
    /// Whether output rolls over into multiple files.
    #[must_use]
    pub fn rollover_enabled(&self) -> bool {
        self.frames_per_file > 0
    }

    /// Whether the output path selects the discarding writer.
    #[must_use]
    pub fn is_null_output(&self) -> bool {
        self.output_path == NULL_OUTPUT_PATH
    }
}

impl Settings {
    /// Load settings from `config/writer.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/writer.toml")
    }

    /// Load settings from a specific TOML file and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_WRITER_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation of loaded values.
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.arena.n_slots == 0 {
            return Err(DaqError::Configuration(
                "arena.n_slots must be greater than 0".into(),
            ));
        }

        if self.arena.slot_size == Some(0) {
            return Err(DaqError::Configuration(
                "arena.slot_size must be greater than 0 when set".into(),
            ));
        }

        let writer = &self.writer;
        if writer.initial_dataset_size == 0 {
            return Err(DaqError::Configuration(
                "writer.initial_dataset_size must be greater than 0".into(),
            ));
        }

        if writer.dataset_increase_step == 0 {
            return Err(DaqError::Configuration(
                "writer.dataset_increase_step must be greater than 0".into(),
            ));
        }

        if writer.dataset_name.is_empty() {
            return Err(DaqError::Configuration(
                "writer.dataset_name must not be empty".into(),
            ));
        }

        let placeholder = format!("{{{}", CHUNK_PLACEHOLDER);
        if writer.rollover_enabled()
            && !writer.is_null_output()
            && !writer.output_path.contains(&placeholder)
        {
            return Err(DaqError::Configuration(format!(
                "writer.output_path '{}' must contain a {{{}}} placeholder when frames_per_file > 0",
                writer.output_path, CHUNK_PLACEHOLDER
            )));
        }

        Ok(())
    }
}
