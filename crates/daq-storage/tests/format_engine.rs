//! Format tree materialization and relocation against real HDF5 files.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use daq_core::{ElementType, Endianness, WriterSettings};
use daq_storage::format::{
    relocate, write_format, CalculatedValue, FormatDefinition, Relocation, SchemaNode, Value,
    ValueKind, ValueMap, ValueSource,
};
use daq_storage::{ChunkedDatasetWriter, StorageError, IMAGE_NR_HIGH};
use hdf5::types::VarLenUnicode;
use serde_json::json;

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/detector_format.json");

fn scratch() -> Result<(tempfile::TempDir, hdf5::File)> {
    let dir = tempfile::tempdir()?;
    let file = hdf5::File::create(dir.path().join("format.h5"))?;
    Ok((dir, file))
}

fn read_text(file: &hdf5::File, path: &str) -> Result<String> {
    Ok(file.dataset(path)?.read_scalar::<VarLenUnicode>()?.as_str().to_string())
}

fn format(root: Vec<SchemaNode>) -> FormatDefinition {
    FormatDefinition {
        name: "test".into(),
        root,
        ..FormatDefinition::default()
    }
}

#[test]
fn test_detector_format_after_frames() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("run.h5");
    let mut writer = ChunkedDatasetWriter::new(WriterSettings {
        output_path: path.to_string_lossy().into_owned(),
        dataset_name: "JF07".into(),
        ..WriterSettings::default()
    });

    for index in 0..3u64 {
        writer.write_data("raw_data", index, &[index as u8; 4], &[2, 2], ElementType::U8, Endianness::Little)?;
        writer.write_data("pulse_id", index, &(100 + index).to_le_bytes(), &[1], ElementType::U64, Endianness::Little)?;
    }

    let format = FormatDefinition::load(FIXTURE)?.instantiate("JF07");
    let raw = json!({
        "general/created": "2024-05-01T08:30:00Z",
        "general/user": "p12345",
        "general/process": "sf_writer",
        "general/instrument": "Alvra",
    });
    let inputs = format.parse_inputs(raw.as_object().unwrap())?;
    write_format(writer.file().unwrap(), &format, &inputs)?;
    writer.close_file()?;

    let file = hdf5::File::open(&path)?;
    assert_eq!(read_text(&file, "general/user")?, "p12345");
    assert_eq!(read_text(&file, "general/detector_name")?, "JF07");
    assert_eq!(read_text(&file, "general/created")?, "2024-05-01T08:30:00+00:00");
    assert!(file.dataset("general/written").is_ok());

    let n_bad = file.dataset("general/n_bad_modules")?;
    assert_eq!(n_bad.read_scalar::<i64>()?, 0);
    let units: VarLenUnicode = n_bad.attr("units")?.read_scalar()?;
    assert_eq!(units.as_str(), "modules");

    let det = file.group("data/JF07")?;
    let class: VarLenUnicode = det.attr("NX_class")?.read_scalar()?;
    assert_eq!(class.as_str(), "NXdetector");

    // Relocated datasets keep their contents and close-time bookkeeping.
    assert!(!file.link_exists("raw_data"));
    let data = file.dataset("data/JF07/data")?;
    assert_eq!(data.shape(), vec![3, 2, 2]);
    assert_eq!(data.attr(IMAGE_NR_HIGH)?.read_scalar::<u64>()?, 3);
    assert_eq!(file.dataset("data/JF07/pulse_id")?.read_raw::<u64>()?, vec![100, 101, 102]);
    assert!(!file.link_exists("data/JF07/frame"));
    Ok(())
}

#[test]
fn test_undefined_reference_aborts_call() -> Result<()> {
    let (_dir, file) = scratch()?;
    let schema = format(vec![
        SchemaNode::dataset(
            "d",
            ValueKind::Int,
            ValueSource::literal(1i64),
            vec![
                SchemaNode::attribute("first", ValueKind::Text, ValueSource::literal("ok")),
                SchemaNode::attribute("second", ValueKind::Text, ValueSource::reference("nope")),
                SchemaNode::attribute("third", ValueKind::Text, ValueSource::literal("never")),
            ],
        ),
        SchemaNode::group("after", vec![]),
    ]);

    let err = write_format(&file, &schema, &ValueMap::new()).unwrap_err();
    match err {
        StorageError::UndefinedReference { node, reference } => {
            assert_eq!(node, "d/second");
            assert_eq!(reference, "nope");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Partial output stays, nothing past the failure is written.
    let ds = file.dataset("d")?;
    assert!(ds.attr("first").is_ok());
    assert!(ds.attr("third").is_err());
    assert!(!file.link_exists("after"));
    Ok(())
}

#[test]
fn test_values_round_trip() -> Result<()> {
    let (_dir, file) = scratch()?;
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 15).unwrap()
        + chrono::Duration::microseconds(123_456);
    let schema = format(vec![SchemaNode::group(
        "values",
        vec![
            SchemaNode::dataset("text", ValueKind::Text, ValueSource::reference("text"), vec![]),
            SchemaNode::dataset("created", ValueKind::DateTime, ValueSource::reference("created"), vec![]),
            SchemaNode::dataset("count", ValueKind::Int, ValueSource::reference("count"), vec![]),
            SchemaNode::dataset("ratio", ValueKind::Float, ValueSource::reference("ratio"), vec![]),
        ],
    )]);
    let inputs = ValueMap::from([
        ("text".to_string(), Value::from("Grüße, detector")),
        ("created".to_string(), Value::from(created)),
        ("count".to_string(), Value::from(-42i64)),
        ("ratio".to_string(), Value::from(0.1f64)),
    ]);

    write_format(&file, &schema, &inputs)?;

    assert_eq!(read_text(&file, "values/text")?, "Grüße, detector");
    let stored = read_text(&file, "values/created")?;
    let parsed = chrono::DateTime::parse_from_rfc3339(&stored)?.with_timezone(&Utc);
    assert_eq!(parsed, created);
    assert_eq!(file.dataset("values/count")?.read_scalar::<i64>()?, -42);
    assert_eq!(file.dataset("values/ratio")?.read_scalar::<f64>()?, 0.1);
    Ok(())
}

#[test]
fn test_values_rebuilt_for_every_call() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let format = FormatDefinition {
        name: "run".into(),
        root: vec![SchemaNode::group(
            "general",
            vec![
                SchemaNode::dataset("user", ValueKind::Text, ValueSource::reference("general/user"), vec![]),
                SchemaNode::dataset("written", ValueKind::DateTime, ValueSource::reference("general/written"), vec![]),
            ],
        )],
        defaults: ValueMap::from([("general/user".to_string(), Value::from("nobody"))]),
        calculated: vec![CalculatedValue::Timestamp {
            name: "general/written".into(),
        }],
        ..FormatDefinition::default()
    };

    let write = |file_name: &str, user: &str| -> Result<(String, chrono::DateTime<Utc>)> {
        let file = hdf5::File::create(dir.path().join(file_name))?;
        let inputs = ValueMap::from([("general/user".to_string(), Value::from(user))]);
        write_format(&file, &format, &inputs)?;
        let written = chrono::DateTime::parse_from_rfc3339(&read_text(&file, "general/written")?)?;
        Ok((read_text(&file, "general/user")?, written.with_timezone(&Utc)))
    };

    let (first_user, first_written) = write("first.h5", "alice")?;
    std::thread::sleep(std::time::Duration::from_millis(5));
    let (second_user, second_written) = write("second.h5", "bob")?;

    assert_eq!(first_user, "alice");
    assert_eq!(second_user, "bob");
    assert!(second_written > first_written);
    // The definition's own defaults are untouched by either call.
    assert_eq!(format.defaults["general/user"], Value::from("nobody"));
    assert!(!format.defaults.contains_key("general/written"));
    Ok(())
}

#[test]
fn test_type_coercion_names_node() -> Result<()> {
    let (_dir, file) = scratch()?;
    let schema = format(vec![SchemaNode::group(
        "general",
        vec![SchemaNode::dataset(
            "n_bad_modules",
            ValueKind::Int,
            ValueSource::literal("three"),
            vec![],
        )],
    )]);

    let err = write_format(&file, &schema, &ValueMap::new()).unwrap_err();
    assert!(matches!(
        err,
        StorageError::TypeCoercion { ref node, .. } if node == "general/n_bad_modules"
    ));
    assert!(!file.link_exists("general/n_bad_modules"));
    Ok(())
}

#[test]
fn test_rerun_tolerates_groups_not_datasets() -> Result<()> {
    let (_dir, file) = scratch()?;
    let groups_only = format(vec![SchemaNode::group(
        "entry",
        vec![
            SchemaNode::attribute("NX_class", ValueKind::Text, ValueSource::literal("NXentry")),
            SchemaNode::group("instrument", vec![]),
        ],
    )]);
    write_format(&file, &groups_only, &ValueMap::new())?;
    write_format(&file, &groups_only, &ValueMap::new())?;

    let with_dataset = format(vec![SchemaNode::group(
        "entry",
        vec![SchemaNode::dataset("title", ValueKind::Text, ValueSource::literal("run"), vec![])],
    )]);
    write_format(&file, &with_dataset, &ValueMap::new())?;
    let err = write_format(&file, &with_dataset, &ValueMap::new()).unwrap_err();
    assert!(matches!(err, StorageError::DatasetExists { ref path } if path == "entry/title"));
    Ok(())
}

#[test]
fn test_dataset_with_group_child_is_invalid() -> Result<()> {
    let (_dir, file) = scratch()?;
    let schema = format(vec![SchemaNode::dataset(
        "d",
        ValueKind::Int,
        ValueSource::literal(1i64),
        vec![SchemaNode::group("g", vec![])],
    )]);

    let err = write_format(&file, &schema, &ValueMap::new()).unwrap_err();
    assert!(matches!(
        err,
        StorageError::InvalidSchema { ref node, ref parent } if node == "d/g" && parent == "d"
    ));
    assert!(!file.link_exists("d"));
    Ok(())
}

#[test]
fn test_relocation_skips_missing_sources() -> Result<()> {
    let (_dir, file) = scratch()?;
    file.new_dataset::<u8>().shape(3usize).create("written")?;
    file.create_group("dest")?;
    file.new_dataset::<u8>().shape(1usize).create("blocked")?;
    file.new_dataset::<u8>().shape(1usize).create("dest/taken")?;

    relocate(
        &file,
        &[
            Relocation::new("never_written", "dest/never_written"),
            Relocation::new("blocked", "dest/taken"),
            Relocation::new("written", "dest/written"),
        ],
    );

    assert!(!file.link_exists("written"));
    assert_eq!(file.dataset("dest/written")?.shape(), vec![3]);
    // Collision is logged and left alone.
    assert!(file.link_exists("blocked"));
    assert!(!file.link_exists("dest/never_written"));
    Ok(())
}
