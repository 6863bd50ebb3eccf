//! Error types shared by the frame writer crates.
//!
//! `DaqError` covers the failures that can happen before any frame is
//! buffered or written: loading and validating configuration, and parsing
//! the textual frame header fields (element type, endianness) that arrive
//! from the transport.
//!
//! - **`Config`**: wraps `figment::Error`, raised when the TOML file or the
//!   environment overrides cannot be deserialized into [`crate::config::Settings`].
//! - **`Configuration`**: semantic validation failures on values that parsed
//!   correctly (zero slot count, missing `{chunk}` placeholder, ...).
//! - **`Io`**: wraps `std::io::Error`.
//! - **`UnsupportedElementType`** / **`UnsupportedEndianness`**: a frame header
//!   named a type or byte order the output container cannot represent.
//!
//! The buffering and storage crates define their own error enums for their
//! hot paths; this one is for the edges.

use thiserror::Error;

/// Convenience alias for results using the core error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for configuration and frame header handling.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file or environment parsing failed.
    ///
    /// **Error Type**: Permanent - requires fixing the configuration source.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration validation failed.
    ///
    /// Occurs when values parse correctly but are logically invalid, e.g.
    /// `frames_per_file > 0` with an output path lacking a `{chunk}` placeholder.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame header named an element type that has no container mapping.
    #[error("Unsupported element type '{0}' (expected one of uint8/16/32/64, int8/16/32/64)")]
    UnsupportedElementType(String),

    /// A frame header named an unknown byte order.
    #[error("Unsupported endianness '{0}' (expected 'little' or 'big')")]
    UnsupportedEndianness(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}
