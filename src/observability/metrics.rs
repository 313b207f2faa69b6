use std::sync::atomic::{AtomicU64, Ordering};

/// Per-block counters, shared between the work thread and observers.
#[derive(Debug)]
pub struct BlockMetrics {
    block_id: String,
    items_processed: AtomicU64,
    tags_handled: AtomicU64,
    files_finalized: AtomicU64,
    commands_dropped: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub block_id: String,
    pub items_processed: u64,
    pub tags_handled: u64,
    pub files_finalized: u64,
    pub commands_dropped: u64,
}

impl BlockMetrics {
    pub fn new(block_id: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            items_processed: AtomicU64::new(0),
            tags_handled: AtomicU64::new(0),
            files_finalized: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
        }
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    pub fn items_processed(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    pub fn tags_handled(&self) -> u64 {
        self.tags_handled.load(Ordering::Relaxed)
    }

    pub fn files_finalized(&self) -> u64 {
        self.files_finalized.load(Ordering::Relaxed)
    }

    pub fn commands_dropped(&self) -> u64 {
        self.commands_dropped.load(Ordering::Relaxed)
    }

    pub fn record_items(&self, count: u64) {
        self.items_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_tags(&self, count: u64) {
        self.tags_handled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_file_finalized(&self) {
        self.files_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            block_id: self.block_id.clone(),
            items_processed: self.items_processed(),
            tags_handled: self.tags_handled(),
            files_finalized: self.files_finalized(),
            commands_dropped: self.commands_dropped(),
        }
    }
}
