use sigmf_blocks::core::{SampleSink, Tag};
use sigmf_blocks::nodes::{SigmfSink, SinkConfig};
use sigmf_blocks::observability::BlockMetrics;
use std::sync::Arc;

#[test]
fn test_metrics_creation() {
    let metrics = BlockMetrics::new("test_block");
    assert_eq!(metrics.block_id(), "test_block");
    assert_eq!(metrics.items_processed(), 0);
    assert_eq!(metrics.commands_dropped(), 0);
}

#[test]
fn test_metrics_shared_across_threads() {
    let metrics = Arc::new(BlockMetrics::new("test_block"));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let metrics = metrics.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    metrics.record_items(2);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(metrics.items_processed(), 800);
}

#[test]
fn test_sink_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("rec");
    let mut sink = SigmfSink::new(SinkConfig::new("ri8").with_filename(base.to_str().unwrap())).unwrap();
    let metrics = sink.metrics();

    sink.work(&[&[0u8; 10]], 10, &[Tag::new(3, "test:mark", 1u64)]).unwrap();
    sink.handle().close();
    sink.work(&[&[0u8; 5]], 5, &[]).unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.block_id, "sigmf_sink");
    assert_eq!(snapshot.items_processed, 15);
    assert_eq!(snapshot.tags_handled, 1);
    assert_eq!(snapshot.files_finalized, 1);
}
