//! `daq-core`
//!
//! Shared types for the detector frame writer.
//!
//! This crate holds what both the buffering crate (`daq-pool`) and the
//! storage crate (`daq-storage`) need to agree on:
//!
//! - [`FrameDescriptor`]: metadata for one frame held in a buffer slot
//! - [`ElementType`] / [`Endianness`]: pixel layout carried in frame headers
//! - [`Settings`]: layered configuration (defaults, TOML, environment)
//! - [`DaqError`]: errors raised while loading configuration or parsing headers
//! - [`tracing_init`]: subscriber setup for binaries and tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use daq_core::{ElementType, FrameDescriptor, Settings};
//!
//! # fn main() -> daq_core::AppResult<()> {
//! let settings = Settings::load()?;
//! daq_core::tracing_init::init_from_settings(&settings)?;
//!
//! let desc = FrameDescriptor::new(0, ElementType::U16, vec![512, 1024]);
//! assert_eq!(desc.byte_size, 512 * 1024 * 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod tracing_init;

pub use config::{ArenaSettings, Settings, WriterSettings};
pub use error::{AppResult, DaqError};
pub use frame::{ElementType, Endianness, FrameDescriptor};
