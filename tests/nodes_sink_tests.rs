use crossbeam_channel::unbounded;
use serde_json::json;
use sigmf_blocks::core::{MetaValue, SampleSink, Tag, TimeMode, TimeSpec};
use sigmf_blocks::engine::SinkState;
use sigmf_blocks::hal::GpsFix;
use sigmf_blocks::meta::MetadataFile;
use sigmf_blocks::nodes::{SigmfSink, SinkConfig};
use sigmf_blocks::storage::orphaned_temp_files;
use sigmf_blocks::Error;
use std::fs;
use std::path::{Path, PathBuf};

fn data_file(base: &Path) -> PathBuf {
    base.with_extension("sigmf-data")
}

fn meta_file(base: &Path) -> MetadataFile {
    MetadataFile::load_path(base.with_extension("sigmf-meta")).unwrap()
}

fn ri8_sink(base: &Path) -> SigmfSink {
    SigmfSink::new(SinkConfig::new("ri8").with_filename(base.to_str().unwrap())).unwrap()
}

#[test]
fn test_rotation_splits_samples_between_files() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");

    let mut sink = ri8_sink(&a);
    let handle = sink.handle();
    assert_eq!(handle.state(), SinkState::Opening);

    let first: Vec<u8> = (0..10).collect();
    assert_eq!(sink.work(&[&first], 10, &[]).unwrap(), 10);
    assert_eq!(handle.state(), SinkState::Active);

    handle.open(&b).unwrap();
    assert_eq!(handle.state(), SinkState::Rotating);
    assert!(handle.last_finalized().is_none());

    let second: Vec<u8> = (10..17).collect();
    sink.work(&[&second], 7, &[]).unwrap();
    assert_eq!(
        handle.last_finalized(),
        Some((data_file(&a), a.with_extension("sigmf-meta")))
    );

    sink.stop().unwrap();
    assert_eq!(fs::read(data_file(&a)).unwrap(), first);
    assert_eq!(fs::read(data_file(&b)).unwrap(), second);
    assert!(orphaned_temp_files(dir.path()).unwrap().is_empty());

    // Both files start their own capture timeline at zero
    assert_eq!(meta_file(&a).captures[0].sample_start().unwrap(), 0);
    assert_eq!(meta_file(&b).captures[0].sample_start().unwrap(), 0);
}

#[test]
fn test_datatype_carries_host_endianness() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = SigmfSink::new(SinkConfig::new("cf32").with_filename(base.to_str().unwrap())).unwrap();
    sink.work(&[&[0u8; 16]], 2, &[]).unwrap();
    sink.stop().unwrap();

    let expected = if cfg!(target_endian = "little") { "cf32_le" } else { "cf32_be" };
    assert_eq!(meta_file(&base).global.get_str("core:datatype").unwrap(), expected);
}

#[test]
fn test_foreign_endianness_rejected() {
    let foreign = if cfg!(target_endian = "little") { "cf32_be" } else { "cf32_le" };
    let result = SigmfSink::new(SinkConfig::new(foreign));
    assert!(matches!(result, Err(Error::InvalidFormat(_))));
}

#[test]
fn test_packet_len_becomes_annotation_count() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = ri8_sink(&base);

    let samples = vec![0u8; 2000];
    let tags = vec![
        Tag::new(1000, "packet_len", 128u64),
        Tag::new(1000, "test:label", "burst"),
    ];
    sink.work(&[&samples], 2000, &tags).unwrap();
    sink.stop().unwrap();

    let meta = meta_file(&base);
    assert_eq!(meta.annotations.len(), 1);
    let annotation = &meta.annotations[0];
    assert_eq!(annotation.sample_start().unwrap(), 1000);
    assert_eq!(annotation.sample_count().unwrap(), 128);
    assert_eq!(annotation.get_str("test:label").unwrap(), "burst");
}

#[test]
fn test_unvalidated_tag_keys_get_unknown_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = ri8_sink(&base);

    sink.work(&[&[0u8; 4]], 4, &[Tag::new(2, "burst", true)]).unwrap();
    let annotations = sink.handle().annotations();
    assert_eq!(annotations[0].get("unknown:burst"), Some(&MetaValue::Bool(true)));
    assert_eq!(annotations[0].sample_count().unwrap(), 0);
}

#[test]
fn test_annotation_offsets_are_file_relative_after_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let mut sink = ri8_sink(&a);
    let handle = sink.handle();

    sink.work(&[&[0u8; 10]], 10, &[]).unwrap();
    handle.open(&b).unwrap();
    sink.work(&[&[0u8; 10]], 10, &[Tag::new(12, "packet_len", 3u64)]).unwrap();
    sink.stop().unwrap();

    let meta = meta_file(&b);
    assert_eq!(meta.annotations[0].sample_start().unwrap(), 2);
    assert_eq!(meta.annotations[0].sample_count().unwrap(), 3);
    assert!(meta_file(&a).annotations.is_empty());
}

#[test]
fn test_close_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = ri8_sink(&base);
    let handle = sink.handle();

    sink.work(&[&[1u8, 2, 3]], 3, &[]).unwrap();
    handle.close();
    assert_eq!(handle.state(), SinkState::Active);
    sink.work(&[&[4u8, 5]], 2, &[]).unwrap();
    assert_eq!(handle.state(), SinkState::Idle);
    let written = fs::read(base.with_extension("sigmf-meta")).unwrap();

    handle.close();
    handle.close();
    sink.work(&[&[6u8]], 1, &[Tag::new(5, "packet_len", 1u64)]).unwrap();
    assert_eq!(handle.state(), SinkState::Idle);
    sink.stop().unwrap();
    sink.stop().unwrap();

    assert_eq!(fs::read(data_file(&base)).unwrap(), vec![1, 2, 3]);
    // Later closes never rewrite the sidecar
    assert_eq!(fs::read(base.with_extension("sigmf-meta")).unwrap(), written);
    assert!(handle.metadata_written());
    assert_eq!(handle.nitems_read(), 6);
}

#[test]
fn test_idle_metadata_lands_in_first_capture() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = SigmfSink::new(SinkConfig::new("ri8")).unwrap();
    let handle = sink.handle();
    assert_eq!(handle.state(), SinkState::Idle);

    let tags = vec![
        Tag::new(0, "rx_rate", 1000.0),
        Tag::new(0, "rx_time", TimeSpec::new(100, 0.0).to_value()),
        Tag::new(0, "rx_freq", 915e6),
    ];
    sink.work(&[&[0u8; 100]], 100, &tags).unwrap();
    handle.set_capture_meta(0, "test:antenna", "A").unwrap();

    handle.open(&base).unwrap();
    sink.work(&[&[0u8; 10]], 10, &[]).unwrap();
    sink.stop().unwrap();

    let meta = meta_file(&base);
    let capture = &meta.captures[0];
    // 100 samples at 1 kHz elapsed between the time tag and the open
    assert_eq!(capture.get_str("core:datetime").unwrap(), "1970-01-01T00:01:40.100Z");
    assert_eq!(capture.get("core:frequency"), Some(&MetaValue::Float64(915e6)));
    assert_eq!(capture.get_str("test:antenna").unwrap(), "A");
    assert_eq!(meta.sample_rate(), Some(1000.0));
    assert_eq!(fs::read(data_file(&base)).unwrap().len(), 10);
}

#[test]
fn test_host_time_used_without_datetime() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = ri8_sink(&base);
    sink.work(&[&[0u8; 4]], 4, &[]).unwrap();
    sink.stop().unwrap();

    let datetime = meta_file(&base).captures[0]
        .get_str("core:datetime")
        .unwrap()
        .to_string();
    assert!(datetime.ends_with('Z'));
    let parsed = TimeSpec::parse_iso8601(&datetime).unwrap();
    assert!(TimeSpec::now().seconds_since(&parsed).abs() < 60.0);
}

#[test]
fn test_relative_mode_keeps_device_deltas() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = SigmfSink::new(
        SinkConfig::new("ri8")
            .with_filename(base.to_str().unwrap())
            .with_time_mode(TimeMode::Relative),
    )
    .unwrap();

    let tags = vec![
        Tag::new(0, "rx_rate", 100.0),
        Tag::new(0, "rx_time", TimeSpec::new(5, 0.0).to_value()),
        Tag::new(100, "rx_time", TimeSpec::new(6, 0.0).to_value()),
    ];
    sink.work(&[&[0u8; 200]], 200, &tags).unwrap();
    sink.stop().unwrap();

    let meta = meta_file(&base);
    assert_eq!(meta.captures.len(), 2);
    assert_eq!(meta.captures[1].sample_start().unwrap(), 100);
    let t0 = TimeSpec::parse_iso8601(meta.captures[0].get_str("core:datetime").unwrap()).unwrap();
    let t1 = TimeSpec::parse_iso8601(meta.captures[1].get_str("core:datetime").unwrap()).unwrap();
    assert!((t1.seconds_since(&t0) - 1.0).abs() < 1e-6);
    // Host clock, not the device's 1970 timestamps
    assert!(t0.secs > 1_000_000_000);
}

#[test]
fn test_capture_index_and_key_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = ri8_sink(&dir.path().join("rec"));
    let handle = sink.handle();
    sink.work(&[&[0u8; 2]], 2, &[]).unwrap();

    assert!(matches!(
        handle.set_capture_meta(5, "test:x", 1u64),
        Err(Error::InvalidCaptureIndex { index: 5, len: 1 })
    ));
    assert!(matches!(
        handle.set_global_meta("no_namespace", 1u64),
        Err(Error::InvalidKey(_))
    ));

    handle.handle_message(&json!({
        "command": "set_capture_meta", "index": 9, "key": "test:x", "val": 1
    }));
    handle.handle_message(&json!({"command": "explode"}));
    assert_eq!(sink.metrics().commands_dropped(), 2);

    // The stream keeps flowing
    assert_eq!(sink.work(&[&[0u8; 2]], 2, &[]).unwrap(), 2);
}

#[test]
fn test_command_messages() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = SigmfSink::new(SinkConfig::new("ri8")).unwrap();
    let handle = sink.handle();

    handle.handle_message(&json!({"command": "open", "filename": base.to_str().unwrap()}));
    handle.handle_message(&json!({"command": "set_global_meta", "key": "core:author", "val": "tester"}));
    sink.work(&[&[0u8; 8]], 8, &[]).unwrap();
    handle.handle_message(&json!({
        "command": "set_annotation_meta",
        "sample_start": 2, "sample_count": 4, "key": "test:label", "val": "a"
    }));
    handle.handle_message(&json!({
        "command": "set_annotation_meta",
        "sample_start": 2, "sample_count": 4, "key": "test:extra", "val": 7
    }));
    handle.handle_message(&json!({"command": "close"}));
    sink.work(&[&[0u8; 8]], 8, &[]).unwrap();

    let meta = meta_file(&base);
    assert_eq!(meta.global.get_str("core:author").unwrap(), "tester");
    assert_eq!(meta.annotations.len(), 1);
    assert_eq!(meta.annotations[0].get_str("test:label").unwrap(), "a");
    assert_eq!(meta.annotations[0].get("test:extra"), Some(&MetaValue::UInt64(7)));
    assert_eq!(sink.metrics().commands_dropped(), 0);
    assert_eq!(sink.metrics().files_finalized(), 1);
}

#[test]
fn test_multi_channel_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = SigmfSink::new(
        SinkConfig::new("ri8")
            .with_filename(base.to_str().unwrap())
            .with_channels(2),
    )
    .unwrap();

    sink.work(&[&[1u8, 2, 3], &[10u8, 20, 30]], 3, &[]).unwrap();
    sink.stop().unwrap();

    assert_eq!(fs::read(data_file(&base)).unwrap(), vec![1, 10, 2, 20, 3, 30]);
    assert_eq!(meta_file(&base).num_channels().unwrap(), 2);
}

#[test]
fn test_gps_fixes_become_annotations() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let (tx, rx) = unbounded();
    let mut sink = ri8_sink(&base).with_gps(rx);

    let fix = GpsFix {
        latitude: 45.5,
        longitude: -122.6,
        altitude: None,
        gps_time: None,
    };
    sink.work(&[&[0u8; 5]], 5, &[]).unwrap();
    tx.send(fix).unwrap();
    sink.work(&[&[0u8; 5]], 5, &[]).unwrap();
    sink.stop().unwrap();

    let meta = meta_file(&base);
    let annotation = &meta.annotations[0];
    assert_eq!(annotation.sample_start().unwrap(), 5);
    assert_eq!(annotation.sample_count().unwrap(), 0);
    assert_eq!(annotation.get("core:latitude"), Some(&MetaValue::Float64(45.5)));
    assert_eq!(annotation.get_str("core:generator").unwrap(), "USRP GPS Message");
}

#[test]
fn test_drop_finalizes_open_file() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    {
        let mut sink = ri8_sink(&base);
        sink.work(&[&[9u8; 3]], 3, &[]).unwrap();
    }
    assert_eq!(fs::read(data_file(&base)).unwrap(), vec![9, 9, 9]);
    assert!(base.with_extension("sigmf-meta").exists());
}

#[test]
fn test_failed_open_leaves_sink_idle() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = SigmfSink::new(SinkConfig::new("ri8")).unwrap();
    let handle = sink.handle();

    assert!(handle.open(dir.path().join("missing").join("rec")).is_err());
    assert_eq!(handle.state(), SinkState::Idle);
    assert!(orphaned_temp_files(dir.path()).unwrap().is_empty());

    // Still collecting metadata while idle
    sink.work(&[&[0u8; 8]], 8, &[Tag::new(0, "rx_freq", 433e6)]).unwrap();
    assert_eq!(handle.state(), SinkState::Idle);

    handle.open(&base).unwrap();
    sink.work(&[&[7u8; 4]], 4, &[]).unwrap();
    sink.stop().unwrap();

    let meta = meta_file(&base);
    assert_eq!(meta.captures[0].get("core:frequency"), Some(&MetaValue::Float64(433e6)));
    assert_eq!(fs::read(data_file(&base)).unwrap(), vec![7u8; 4]);
}

#[test]
fn test_stop_keeps_samples_when_sidecar_fails() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = ri8_sink(&base);
    let handle = sink.handle();
    fs::create_dir(base.with_extension("sigmf-meta")).unwrap();

    let samples: Vec<u8> = (0..64).collect();
    sink.work(&[&samples], 64, &[]).unwrap();

    match sink.stop() {
        Err(Error::Unfinalized { temp, source }) => {
            assert!(source.is_io());
            assert_eq!(fs::read(&temp).unwrap(), samples);
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(handle.state(), SinkState::Idle);
    assert!(!handle.metadata_written());
    assert!(!data_file(&base).exists());
    assert_eq!(orphaned_temp_files(dir.path()).unwrap().len(), 1);

    // Nothing left to finalize
    sink.stop().unwrap();
}

#[test]
fn test_rotation_survives_failed_finalize() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let mut sink = ri8_sink(&a);
    let handle = sink.handle();

    sink.work(&[&[1u8, 2, 3]], 3, &[]).unwrap();
    fs::create_dir(a.with_extension("sigmf-meta")).unwrap();
    handle.open(&b).unwrap();

    let err = sink.work(&[&[4u8, 5]], 2, &[]).unwrap_err();
    assert!(matches!(err, Error::Unfinalized { .. }), "{err:?}");
    assert_eq!(handle.state(), SinkState::Opening);

    // The staged file is installed on the next call
    sink.work(&[&[6u8, 7]], 2, &[]).unwrap();
    assert_eq!(handle.state(), SinkState::Active);
    sink.stop().unwrap();

    assert_eq!(fs::read(data_file(&b)).unwrap(), vec![6, 7]);
    assert_eq!(meta_file(&b).captures[0].sample_start().unwrap(), 0);
    assert!(!data_file(&a).exists());
    let kept = orphaned_temp_files(dir.path()).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(fs::read(&kept[0]).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_short_input_rejected_before_tags() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = ri8_sink(&base);
    let handle = sink.handle();

    let err = sink
        .work(&[&[0u8; 4]], 10, &[Tag::new(2, "packet_len", 3u64)])
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }), "{err:?}");
    assert!(handle.annotations().is_empty());
    assert_eq!(handle.nitems_read(), 0);
    // A rejected call does not install the pending file
    assert_eq!(handle.state(), SinkState::Opening);

    sink.work(&[&[0u8; 4]], 4, &[]).unwrap();
    sink.stop().unwrap();
    assert!(meta_file(&base).annotations.is_empty());
    assert_eq!(fs::read(data_file(&base)).unwrap().len(), 4);
}
