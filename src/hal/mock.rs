use super::traits::DeviceFacade;
use crate::core::MetaValue;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory device with settable sensors, for tests and demos.
#[derive(Debug, Default)]
pub struct MockDevice {
    sensors: Mutex<HashMap<String, MetaValue>>,
    params: Mutex<HashMap<String, MetaValue>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device reporting a GPS lock at the given position
    pub fn with_gps_fix(latitude: f64, longitude: f64) -> Self {
        let device = Self::new();
        device.set_sensor("gps_locked", true);
        device.set_sensor("latitude", latitude);
        device.set_sensor("longitude", longitude);
        device
    }

    pub fn set_sensor(&self, name: &str, value: impl Into<MetaValue>) {
        self.sensors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), value.into());
    }

    pub fn param(&self, name: &str) -> Option<MetaValue> {
        self.params
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl DeviceFacade for MockDevice {
    async fn read_sensor(&self, name: &str) -> Result<MetaValue> {
        self.sensors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown sensor: {}", name))
    }

    async fn set_param(&self, name: &str, value: MetaValue) -> Result<()> {
        self.params
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), value);
        Ok(())
    }
}
