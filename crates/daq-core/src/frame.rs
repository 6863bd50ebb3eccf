//! Frame descriptors and element layout.
//!
//! A [`FrameDescriptor`] is the metadata half of one detector frame: which
//! buffer slot holds its bytes, how many bytes are valid, its global index
//! and the layout needed to persist it. The receiver fills one in when it
//! reserves a slot; the storage loop consumes it exactly once.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DaqError;

/// Element type of a frame's pixels.
///
/// Only fixed-width integers are representable in the output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Unsigned 8-bit integer.
    #[serde(rename = "uint8")]
    U8,
    /// Unsigned 16-bit integer.
    #[serde(rename = "uint16")]
    U16,
    /// Unsigned 32-bit integer.
    #[serde(rename = "uint32")]
    U32,
    /// Unsigned 64-bit integer.
    #[serde(rename = "uint64")]
    U64,
    /// Signed 8-bit integer.
    #[serde(rename = "int8")]
    I8,
    /// Signed 16-bit integer.
    #[serde(rename = "int16")]
    I16,
    /// Signed 32-bit integer.
    #[serde(rename = "int32")]
    I32,
    /// Signed 64-bit integer.
    #[serde(rename = "int64")]
    I64,
}

impl ElementType {
    /// Size of one element in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::U32 | ElementType::I32 => 4,
            ElementType::U64 | ElementType::I64 => 8,
        }
    }

    /// Canonical name as it appears in frame headers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::U8 => "uint8",
            ElementType::U16 => "uint16",
            ElementType::U32 => "uint32",
            ElementType::U64 => "uint64",
            ElementType::I8 => "int8",
            ElementType::I16 => "int16",
            ElementType::I32 => "int32",
            ElementType::I64 => "int64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementType {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uint8" => Ok(ElementType::U8),
            "uint16" => Ok(ElementType::U16),
            "uint32" => Ok(ElementType::U32),
            "uint64" => Ok(ElementType::U64),
            "int8" => Ok(ElementType::I8),
            "int16" => Ok(ElementType::I16),
            "int32" => Ok(ElementType::I32),
            "int64" => Ok(ElementType::I64),
            other => Err(DaqError::UnsupportedElementType(other.to_string())),
        }
    }
}

/// Byte order of a frame's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl Endianness {
    /// Byte order of the running host.
    #[must_use]
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    /// Whether this byte order matches the host's.
    #[must_use]
    pub fn is_native(self) -> bool {
        self == Self::native()
    }
}

impl FromStr for Endianness {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "little" => Ok(Endianness::Little),
            "big" => Ok(Endianness::Big),
            other => Err(DaqError::UnsupportedEndianness(other.to_string())),
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => f.write_str("little"),
            Endianness::Big => f.write_str("big"),
        }
    }
}

/// Metadata for one frame held in a buffer slot.
///
/// `slot_index` is assigned by the arena on commit; whatever the producer
/// put there beforehand is overwritten. After commit the descriptor is
/// immutable and travels through the committed queue to the single reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Index of the buffer slot holding the frame bytes.
    pub slot_index: usize,
    /// Number of valid bytes in the slot.
    pub byte_size: usize,
    /// Global, monotonically increasing frame index.
    pub frame_index: u64,
    /// Pixel element type.
    pub element_type: ElementType,
    /// Pixel byte order.
    pub endianness: Endianness,
    /// Frame dimensions, slowest-varying first.
    pub shape: Vec<usize>,
    /// Auxiliary header values passed through untouched (pulse id, flags, ...).
    pub header_values: BTreeMap<String, Bytes>,
}

impl FrameDescriptor {
    /// Create a descriptor whose byte size is derived from shape and type.
    #[must_use]
    pub fn new(frame_index: u64, element_type: ElementType, shape: Vec<usize>) -> Self {
        let byte_size = shape.iter().product::<usize>() * element_type.size();
        Self {
            slot_index: 0,
            byte_size,
            frame_index,
            element_type,
            endianness: Endianness::native(),
            shape,
            header_values: BTreeMap::new(),
        }
    }

    /// Set the byte order.
    #[must_use]
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Attach an auxiliary header value.
    #[must_use]
    pub fn with_header_value(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.header_values.insert(name.into(), value.into());
        self
    }

    /// Number of bytes the shape and element type call for.
    #[must_use]
    pub fn expected_byte_size(&self) -> usize {
        self.shape.iter().product::<usize>() * self.element_type.size()
    }
}
