//! Helpers over the `hdf5` crate shared by the chunked writer and the format
//! engine: group paths, attributes, extensible frame datasets, scalar datasets.

use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, Extent, Group, H5Type, Location, SimpleExtents};
use ndarray::{s, ArrayView, IxDyn};

use daq_core::{ElementType, Endianness};

/// Largest frame rank the writer accepts (dataset rank is one more).
pub const MAX_FRAME_RANK: usize = 4;

fn path_parts(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// Whether every component of `path` exists below `root`.
///
/// Checked one prefix at a time; the backend errors on a missing
/// intermediate group instead of answering "no".
pub fn path_exists(root: &Group, path: &str) -> bool {
    let mut prefix = String::with_capacity(path.len());
    for part in path_parts(path) {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        if !root.link_exists(&prefix) {
            return false;
        }
    }
    !prefix.is_empty()
}

/// Open the group at `path`, creating any missing component.
pub fn ensure_group_path(root: &Group, path: &str) -> hdf5::Result<Group> {
    let mut current = root.clone();
    for part in path_parts(path) {
        current = if current.link_exists(part) {
            current.group(part)?
        } else {
            current.create_group(part)?
        };
    }
    Ok(current)
}

/// Split `a/b/c` into (`a/b`, `c`).
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    }
}

/// Write a scalar attribute, overwriting an existing one of the same name.
pub fn write_attr<T: H5Type>(loc: &Location, name: &str, value: &T) -> hdf5::Result<()> {
    if let Ok(attr) = loc.attr(name) {
        attr.write_scalar(value)
    } else {
        loc.new_attr::<T>().create(name)?.write_scalar(value)
    }
}

/// Convert text to the container's variable-length string type.
pub fn to_varlen(text: &str) -> hdf5::Result<VarLenUnicode> {
    text.parse::<VarLenUnicode>()
        .map_err(|e| hdf5::Error::from(format!("cannot store text {text:?}: {e}")))
}

/// Create a scalar dataset holding `value`.
pub fn create_scalar_dataset<T: H5Type>(group: &Group, name: &str, value: &T) -> hdf5::Result<Dataset> {
    let dataset = group.new_dataset::<T>().shape(()).create(name)?;
    dataset.write_scalar(value)?;
    Ok(dataset)
}

/// Create an extensible frame dataset: axis 0 counts frames and is
/// unlimited, the remaining axes are the frame shape. Chunked as one frame,
/// no filters.
pub fn create_frame_dataset(
    group: &Group,
    name: &str,
    element_type: ElementType,
    frame_shape: &[usize],
    capacity: usize,
) -> hdf5::Result<Dataset> {
    match element_type {
        ElementType::U8 => create_typed::<u8>(group, name, frame_shape, capacity),
        ElementType::U16 => create_typed::<u16>(group, name, frame_shape, capacity),
        ElementType::U32 => create_typed::<u32>(group, name, frame_shape, capacity),
        ElementType::U64 => create_typed::<u64>(group, name, frame_shape, capacity),
        ElementType::I8 => create_typed::<i8>(group, name, frame_shape, capacity),
        ElementType::I16 => create_typed::<i16>(group, name, frame_shape, capacity),
        ElementType::I32 => create_typed::<i32>(group, name, frame_shape, capacity),
        ElementType::I64 => create_typed::<i64>(group, name, frame_shape, capacity),
    }
}

fn create_typed<T: H5Type>(
    group: &Group,
    name: &str,
    frame_shape: &[usize],
    capacity: usize,
) -> hdf5::Result<Dataset> {
    let chunk: Vec<usize> = std::iter::once(1).chain(frame_shape.iter().copied()).collect();
    let extents: Vec<Extent> = std::iter::once(Extent::resizable(capacity))
        .chain(frame_shape.iter().map(|&dim| Extent::fixed(dim)))
        .collect();
    group
        .new_dataset::<T>()
        .chunk(chunk)
        .shape(SimpleExtents::from_vec(extents))
        .create(name)
}

/// Number of frames the dataset currently has room for.
pub fn frame_capacity(dataset: &Dataset) -> usize {
    dataset.shape().first().copied().unwrap_or(0)
}

/// Resize axis 0 to `frames`, keeping the frame shape.
pub fn set_frame_capacity(dataset: &Dataset, frames: usize) -> hdf5::Result<()> {
    let mut shape = dataset.shape();
    match shape.first_mut() {
        Some(axis0) => *axis0 = frames,
        None => return Err(hdf5::Error::from("cannot resize a scalar dataset")),
    }
    dataset.resize(shape)
}

/// Write one frame at `offset` along axis 0, converting from the frame's
/// byte order to the host's.
pub fn write_frame(
    dataset: &Dataset,
    element_type: ElementType,
    endianness: Endianness,
    frame_shape: &[usize],
    offset: usize,
    bytes: &[u8],
) -> hdf5::Result<()> {
    match element_type {
        ElementType::U8 => write_typed::<u8>(dataset, endianness, frame_shape, offset, bytes),
        ElementType::U16 => write_typed::<u16>(dataset, endianness, frame_shape, offset, bytes),
        ElementType::U32 => write_typed::<u32>(dataset, endianness, frame_shape, offset, bytes),
        ElementType::U64 => write_typed::<u64>(dataset, endianness, frame_shape, offset, bytes),
        ElementType::I8 => write_typed::<i8>(dataset, endianness, frame_shape, offset, bytes),
        ElementType::I16 => write_typed::<i16>(dataset, endianness, frame_shape, offset, bytes),
        ElementType::I32 => write_typed::<i32>(dataset, endianness, frame_shape, offset, bytes),
        ElementType::I64 => write_typed::<i64>(dataset, endianness, frame_shape, offset, bytes),
    }
}

fn write_typed<T: Pixel>(
    dataset: &Dataset,
    endianness: Endianness,
    frame_shape: &[usize],
    offset: usize,
    bytes: &[u8],
) -> hdf5::Result<()> {
    let values: Vec<T> = bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(|raw| T::decode(raw, endianness))
        .collect();
    let dims: Vec<usize> = std::iter::once(1).chain(frame_shape.iter().copied()).collect();
    let view = ArrayView::from_shape(IxDyn(&dims), &values)
        .map_err(|e| hdf5::Error::from(e.to_string()))?;

    // One frame along axis 0 is exactly one chunk.
    let end = offset + 1;
    match frame_shape.len() {
        0 => dataset.write_slice(&view, s![offset..end]),
        1 => dataset.write_slice(&view, s![offset..end, ..]),
        2 => dataset.write_slice(&view, s![offset..end, .., ..]),
        3 => dataset.write_slice(&view, s![offset..end, .., .., ..]),
        4 => dataset.write_slice(&view, s![offset..end, .., .., .., ..]),
        rank => Err(hdf5::Error::from(format!(
            "frame rank {rank} exceeds {MAX_FRAME_RANK}"
        ))),
    }
}

/// Integer pixel types the writer stores.
trait Pixel: H5Type + Copy {
    fn decode(raw: &[u8], endianness: Endianness) -> Self;
}

macro_rules! impl_pixel {
    ($($ty:ty),*) => {
        $(
            impl Pixel for $ty {
                fn decode(raw: &[u8], endianness: Endianness) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(raw);
                    match endianness {
                        Endianness::Little => <$ty>::from_le_bytes(buf),
                        Endianness::Big => <$ty>::from_be_bytes(buf),
                    }
                }
            }
        )*
    };
}

impl_pixel!(u8, u16, u32, u64, i8, i16, i32, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("a/b/c"), ("a/b", "c"));
        assert_eq!(split_parent("/a/b/"), ("/a", "b"));
        assert_eq!(split_parent("c"), ("", "c"));
    }

    #[test]
    fn test_decode_respects_byte_order() {
        assert_eq!(u16::decode(&[0x01, 0x02], Endianness::Little), 0x0201);
        assert_eq!(u16::decode(&[0x01, 0x02], Endianness::Big), 0x0102);
        assert_eq!(i32::decode(&[0xff, 0xff, 0xff, 0xfe], Endianness::Big), -2);
        assert_eq!(u8::decode(&[7], Endianness::Big), 7);
    }

    #[test]
    fn test_group_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = hdf5::File::create(dir.path().join("paths.h5")).unwrap();

        assert!(!path_exists(&file, "a/b/c"));
        ensure_group_path(&file, "a/b/c").unwrap();
        assert!(path_exists(&file, "a/b/c"));
        assert!(path_exists(&file, "/a/b"));
        assert!(!path_exists(&file, "a/x/c"));
        assert!(!path_exists(&file, ""));

        // Idempotent
        ensure_group_path(&file, "a/b/c").unwrap();
    }

    #[test]
    fn test_attribute_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let file = hdf5::File::create(dir.path().join("attrs.h5")).unwrap();

        write_attr(&file, "count", &1u64).unwrap();
        write_attr(&file, "count", &2u64).unwrap();
        assert_eq!(file.attr("count").unwrap().read_scalar::<u64>().unwrap(), 2);

        write_attr(&file, "label", &to_varlen("first").unwrap()).unwrap();
        write_attr(&file, "label", &to_varlen("second").unwrap()).unwrap();
        let label: VarLenUnicode = file.attr("label").unwrap().read_scalar().unwrap();
        assert_eq!(label.as_str(), "second");
    }

    #[test]
    fn test_frame_dataset_resize_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let file = hdf5::File::create(dir.path().join("frames.h5")).unwrap();

        let ds = create_frame_dataset(&file, "data", ElementType::U16, &[2, 3], 4).unwrap();
        assert_eq!(ds.shape(), vec![4, 2, 3]);
        assert!(ds.is_chunked());

        let frame: Vec<u8> = (0u16..6).flat_map(u16::to_be_bytes).collect();
        write_frame(&ds, ElementType::U16, Endianness::Big, &[2, 3], 1, &frame).unwrap();

        set_frame_capacity(&ds, 2).unwrap();
        assert_eq!(frame_capacity(&ds), 2);

        let values = ds.read_raw::<u16>().unwrap();
        assert_eq!(&values[6..], &[0, 1, 2, 3, 4, 5]);
    }
}
