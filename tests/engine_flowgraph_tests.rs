use serde_json::{json, Value};
use sigmf_blocks::engine::{crop, CropRange, Flowgraph, FlowgraphConfig};
use sigmf_blocks::meta::MetadataFile;
use sigmf_blocks::storage::orphaned_temp_files;
use std::fs;
use std::path::{Path, PathBuf};

fn write_recording(dir: &Path, name: &str, meta: Value, data: &[u8]) -> PathBuf {
    let base = dir.join(name);
    fs::write(base.with_extension("sigmf-data"), data).unwrap();
    fs::write(base.with_extension("sigmf-meta"), meta.to_string()).unwrap();
    base
}

fn source_recording(dir: &Path) -> PathBuf {
    let data: Vec<u8> = (0..200u32).map(|v| v as u8).collect();
    write_recording(
        dir,
        "input",
        json!({
            "global": {
                "core:datatype": "ri8",
                "core:sample_rate": 100.0,
                "core:author": "tester",
                "core:sha512": "deadbeef",
                "core:offset": 7
            },
            "captures": [{"core:sample_start": 0, "core:datetime": "2020-01-01T00:00:00Z"}],
            "annotations": [
                {"core:sample_start": 20, "core:sample_count": 5, "test:label": "early"},
                {"core:sample_start": 60, "core:sample_count": 10, "test:label": "inside"}
            ]
        }),
        &data,
    )
}

#[tokio::test]
async fn test_copy_flowgraph_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let input = source_recording(dir.path());
    let output = dir.path().join("output");

    let config = FlowgraphConfig::from_json(json!({
        "source": {"filename": input.to_str().unwrap()},
        "sink": {"datatype": "ri8", "filename": output.to_str().unwrap()},
        "chunk_size": 64
    }))
    .unwrap();

    let (graph, sink) = Flowgraph::from_config(&config).unwrap();
    let stats = graph.run().await.unwrap();
    assert_eq!(stats.items_read, 200);
    assert_eq!(stats.items_written, 200);
    assert_eq!(sink.last_finalized().unwrap().0, output.with_extension("sigmf-data"));

    let copied = MetadataFile::load_path(output.with_extension("sigmf-meta")).unwrap();
    assert_eq!(copied.sample_rate(), Some(100.0));
    assert_eq!(copied.annotations.len(), 2);
    assert_eq!(
        copied.captures[0].get_str("core:datetime").unwrap(),
        "2020-01-01T00:00:00Z"
    );
    assert_eq!(
        fs::read(output.with_extension("sigmf-data")).unwrap(),
        fs::read(input.with_extension("sigmf-data")).unwrap()
    );
}

#[tokio::test]
async fn test_crop_by_duration() {
    let dir = tempfile::tempdir().unwrap();
    let input = source_recording(dir.path());
    let output = dir.path().join("cropped");

    // 0.5 s at 100 Hz starts at sample 50; one second is 100 samples
    let stats = crop(&input, &output, &CropRange::start_length("0.5s", "1s"))
        .await
        .unwrap();
    assert_eq!(stats.items_written, 100);

    let data = fs::read(output.with_extension("sigmf-data")).unwrap();
    assert_eq!(data, (50..150u32).map(|v| v as u8).collect::<Vec<_>>());

    let meta = MetadataFile::load_path(output.with_extension("sigmf-meta")).unwrap();
    assert_eq!(meta.global.get_str("core:author").unwrap(), "tester");
    assert!(!meta.global.has("core:sha512"));
    assert!(!meta.global.has("core:offset"));
    assert_eq!(meta.sample_rate(), Some(100.0));

    // Only the annotation inside the window survives, shifted to the new start
    assert_eq!(meta.annotations.len(), 1);
    assert_eq!(meta.annotations[0].sample_start().unwrap(), 10);
    assert_eq!(meta.annotations[0].sample_count().unwrap(), 10);
    assert_eq!(meta.annotations[0].get_str("test:label").unwrap(), "inside");
    assert!(orphaned_temp_files(dir.path()).unwrap().is_empty());
}

#[tokio::test]
async fn test_crop_past_end_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let input = source_recording(dir.path());
    let output = dir.path().join("tail");

    let stats = crop(&input, &output, &CropRange::start_end("150", "400")).await.unwrap();
    assert_eq!(stats.items_written, 50);
}

#[tokio::test]
async fn test_crop_rejects_start_outside_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = source_recording(dir.path());
    let output = dir.path().join("never");

    let result = crop(&input, &output, &CropRange::start_length("200", "1")).await;
    assert!(result.is_err());
    assert!(!output.with_extension("sigmf-data").exists());
}
