use crate::core::MetaValue;
use anyhow::Result;
use async_trait::async_trait;

/// Narrow view of a radio device: sensor reads and parameter writes.
///
/// Tuning, gain and the streaming driver itself live behind this facade.
#[async_trait]
pub trait DeviceFacade: Send + Sync {
    /// Read a named sensor (e.g. "gps_locked", "gps_time", "latitude")
    async fn read_sensor(&self, name: &str) -> Result<MetaValue>;

    /// Set a named parameter (e.g. "sample_rate", "center_freq", "gain")
    async fn set_param(&self, name: &str, value: MetaValue) -> Result<()>;
}
