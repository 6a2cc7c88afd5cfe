//! End-to-end tests over the container surface: write/read round-trips
//! across codecs, schema resolution through the file header, sync-point
//! behavior, and corruption handling during plain iteration.

use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom, Write};

use crate::container::format::SYNC_SIZE;
use crate::container::reader::FileReader;
use crate::container::writer::{FileWriter, WriterOptions};
use crate::error::CaskError;
use crate::schema::Schema;
use crate::value::Value;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn record_schema() -> Schema {
    Schema::parse_str(
        r#"{
            "type": "record",
            "name": "Event",
            "namespace": "com.example",
            "fields": [
                {"name": "id", "type": "long"},
                {"name": "kind", "type": {"type": "enum", "name": "Kind", "symbols": ["CREATE", "DELETE"]}},
                {"name": "payload", "type": ["null", "string"], "default": null},
                {"name": "attrs", "type": {"type": "map", "values": "long"}}
            ]
        }"#,
    )
    .unwrap()
}

fn sample_event(id: i64) -> Value {
    let mut attrs = HashMap::new();
    attrs.insert("weight".to_string(), Value::Long(id * 10));
    Value::Record(vec![
        ("id".to_string(), Value::Long(id)),
        ("kind".to_string(), Value::Enum(0, "CREATE".to_string())),
        (
            "payload".to_string(),
            Value::Union(1, Box::new(Value::String(format!("payload-{}", id)))),
        ),
        ("attrs".to_string(), Value::Map(attrs)),
    ])
}

fn roundtrip_with_codec(codec: &str) {
    init_logging();
    let schema = record_schema();
    let options = WriterOptions {
        codec: codec.to_string(),
        ..WriterOptions::default()
    };
    let mut writer = FileWriter::create(schema, Vec::new(), options).unwrap();
    let originals: Vec<Value> = (0..50).map(sample_event).collect();
    for value in &originals {
        writer.append(value).unwrap();
    }
    let bytes = writer.close().unwrap();

    let reader = FileReader::new(Cursor::new(bytes)).unwrap();
    let restored: Vec<Value> = reader.map(Result::unwrap).collect();
    assert_eq!(restored, originals, "codec {} round-trip", codec);
}

#[test]
fn test_roundtrip_null_codec() {
    roundtrip_with_codec("null");
}

#[test]
fn test_roundtrip_deflate_codec() {
    roundtrip_with_codec("deflate");
}

#[test]
fn test_roundtrip_zstandard_codec() {
    roundtrip_with_codec("zstandard");
}

#[cfg(feature = "snappy")]
#[test]
fn test_roundtrip_snappy_codec() {
    roundtrip_with_codec("snappy");
}

#[cfg(feature = "bzip")]
#[test]
fn test_roundtrip_bzip2_codec() {
    roundtrip_with_codec("bzip2");
}

#[cfg(feature = "xz")]
#[test]
fn test_roundtrip_xz_codec() {
    roundtrip_with_codec("xz");
}

#[test]
fn test_small_sync_interval_produces_many_blocks() {
    init_logging();
    let options = WriterOptions {
        sync_interval: 64,
        ..WriterOptions::default()
    };
    let mut writer = FileWriter::create(Schema::String, Vec::new(), options).unwrap();
    let originals: Vec<Value> = (0..200)
        .map(|i| Value::String(format!("row-{:04}", i)))
        .collect();
    for value in &originals {
        writer.append(value).unwrap();
    }
    let bytes = writer.close().unwrap();

    let restored: Vec<Value> = FileReader::new(Cursor::new(bytes))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(restored, originals);
}

#[test]
fn test_explicit_sync_and_previous_sync_agree() {
    // Write "apple", "banana", an explicit sync, then "celery". After the
    // second read the reader must report exactly the offset the writer's
    // sync call returned.
    init_logging();
    let mut writer =
        FileWriter::create(Schema::String, Vec::new(), WriterOptions::default()).unwrap();
    writer.append(&Value::String("apple".to_string())).unwrap();
    writer.append(&Value::String("banana".to_string())).unwrap();
    let sync_offset = writer.sync().unwrap();
    writer.append(&Value::String("celery".to_string())).unwrap();
    let bytes = writer.close().unwrap();

    let mut reader = FileReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(
        reader.next_value().unwrap(),
        Value::String("apple".to_string())
    );
    assert_eq!(
        reader.next_value().unwrap(),
        Value::String("banana".to_string())
    );
    assert_eq!(reader.previous_sync(), sync_offset);
    assert_eq!(
        reader.next_value().unwrap(),
        Value::String("celery".to_string())
    );
    assert!(!reader.has_next().unwrap());
}

#[test]
fn test_sync_seeks_to_the_requested_split() {
    init_logging();
    let mut writer =
        FileWriter::create(Schema::String, Vec::new(), WriterOptions::default()).unwrap();
    writer.append(&Value::String("first".to_string())).unwrap();
    let resume = writer.sync().unwrap();
    writer.append(&Value::String("second".to_string())).unwrap();
    let bytes = writer.close().unwrap();

    let mut reader = FileReader::new(Cursor::new(bytes)).unwrap();
    // Jump straight to the second block without touching the first value.
    reader.sync(resume - SYNC_SIZE as u64).unwrap();
    assert_eq!(
        reader.next_value().unwrap(),
        Value::String("second".to_string())
    );
    assert!(!reader.has_next().unwrap());
}

#[test]
fn test_past_sync_bounds_a_split() {
    init_logging();
    let mut writer =
        FileWriter::create(Schema::String, Vec::new(), WriterOptions::default()).unwrap();
    writer.append(&Value::String("a".to_string())).unwrap();
    let split_end = writer.sync().unwrap();
    writer.append(&Value::String("b".to_string())).unwrap();
    let bytes = writer.close().unwrap();

    let mut reader = FileReader::new(Cursor::new(bytes)).unwrap();
    assert!(!reader.past_sync(split_end).unwrap());
    reader.next_value().unwrap();
    // The reader has crossed into the block at `split_end`.
    assert!(reader.past_sync(split_end - SYNC_SIZE as u64).unwrap());
}

#[test]
fn test_reader_resolves_against_an_evolved_schema() {
    init_logging();
    let writer_schema = Schema::parse_str(
        r#"{"type":"record","name":"Row","fields":[
            {"name":"n","type":"int"},
            {"name":"junk","type":"string"}]}"#,
    )
    .unwrap();
    let reader_schema = Schema::parse_str(
        r#"{"type":"record","name":"Row","fields":[
            {"name":"n","type":"long"},
            {"name":"note","type":"string","default":"none"}]}"#,
    )
    .unwrap();

    let mut writer = FileWriter::create(writer_schema, Vec::new(), WriterOptions::default())
        .unwrap();
    for i in 0..3 {
        writer
            .append(&Value::Record(vec![
                ("n".to_string(), Value::Int(i)),
                ("junk".to_string(), Value::String("drop me".to_string())),
            ]))
            .unwrap();
    }
    let bytes = writer.close().unwrap();

    let reader = FileReader::with_schema(reader_schema, Cursor::new(bytes)).unwrap();
    let restored: Vec<Value> = reader.map(Result::unwrap).collect();
    assert_eq!(
        restored[2],
        Value::Record(vec![
            ("n".to_string(), Value::Long(2)),
            ("note".to_string(), Value::String("none".to_string())),
        ])
    );
}

#[test]
fn test_incompatible_reader_schema_is_rejected_at_open() {
    init_logging();
    let mut writer =
        FileWriter::create(Schema::String, Vec::new(), WriterOptions::default()).unwrap();
    writer.append(&Value::String("x".to_string())).unwrap();
    let bytes = writer.close().unwrap();

    let result = FileReader::with_schema(Schema::Boolean, Cursor::new(bytes));
    assert!(matches!(result, Err(CaskError::SchemaResolution(_))));
}

#[test]
fn test_corruption_surfaces_during_plain_iteration() {
    init_logging();
    let mut writer =
        FileWriter::create(Schema::String, Vec::new(), WriterOptions::default()).unwrap();
    writer.append(&Value::String("alpha".to_string())).unwrap();
    writer.append(&Value::String("beta".to_string())).unwrap();
    let mut bytes = writer.close().unwrap();

    // Flip a byte in the middle of the block's trailing sync marker.
    let tail = bytes.len() - SYNC_SIZE / 2;
    bytes[tail] ^= 0xFF;

    let mut reader = FileReader::new(Cursor::new(bytes)).unwrap();
    let result = reader.has_next();
    assert!(matches!(
        result,
        Err(CaskError::BlockCorruption { .. })
    ));
}

#[test]
fn test_on_disk_file_roundtrip() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.cask");

    let file = std::fs::File::create(&path).unwrap();
    let mut writer =
        FileWriter::create(record_schema(), file, WriterOptions::default()).unwrap();
    for i in 0..10 {
        writer.append(&sample_event(i)).unwrap();
    }
    let mut file = writer.close().unwrap();
    file.flush().unwrap();
    drop(file);

    let file = std::fs::File::open(&path).unwrap();
    let reader = FileReader::new(file).unwrap();
    let restored: Vec<Value> = reader.map(Result::unwrap).collect();
    assert_eq!(restored.len(), 10);
    assert_eq!(restored[3], sample_event(3));
}

#[test]
fn test_open_failure_releases_the_file_handle() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-a-container");
    std::fs::write(&path, b"Zz").unwrap();

    {
        let file = std::fs::File::open(&path).unwrap();
        let result = FileReader::new(file);
        assert!(matches!(result, Err(CaskError::Format(_))));
        // The handle died with the failed constructor.
    }

    // The file is untouched and reopenable.
    let mut file = std::fs::File::open(&path).unwrap();
    let mut contents = Vec::new();
    std::io::Read::read_to_end(&mut file, &mut contents).unwrap();
    assert_eq!(contents, b"Zz");
    file.seek(SeekFrom::Start(0)).unwrap();
}
