use super::traits::DeviceFacade;
use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

/// A position report from a locked GPS receiver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Whole seconds reported by the `gps_time` sensor
    pub gps_time: Option<u64>,
}

/// Read one fix. Returns `None` while the receiver has no lock.
pub async fn poll_fix(device: &dyn DeviceFacade) -> Result<Option<GpsFix>> {
    let locked = device.read_sensor("gps_locked").await?.as_bool()?;
    if !locked {
        return Ok(None);
    }

    let latitude = device.read_sensor("latitude").await?.as_number()?;
    let longitude = device.read_sensor("longitude").await?.as_number()?;
    let altitude = match device.read_sensor("altitude").await {
        Ok(v) => Some(v.as_number()?),
        Err(_) => None,
    };
    let gps_time = match device.read_sensor("gps_time").await {
        Ok(v) => Some(v.as_u64()?),
        Err(_) => None,
    };

    Ok(Some(GpsFix {
        latitude,
        longitude,
        altitude,
        gps_time,
    }))
}

/// Background task polling a device for GPS fixes and forwarding them to a
/// sink's GPS channel.
pub struct GpsPoller {
    shutdown_tx: Option<broadcast::Sender<()>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl GpsPoller {
    /// Spawn the polling task on the current tokio runtime
    pub fn start(device: Arc<dyn DeviceFacade>, period: Duration, fixes: Sender<GpsFix>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        match poll_fix(device.as_ref()).await {
                            Ok(Some(fix)) => {
                                if fixes.send(fix).is_err() {
                                    debug!("GPS receiver dropped, stopping poller");
                                    break;
                                }
                            }
                            Ok(None) => debug!("no GPS lock"),
                            Err(e) => warn!(error = %e, "GPS poll failed"),
                        }
                    }
                }
            }
            Ok(())
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Signal the task and wait for it to finish
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await.map_err(|e| anyhow!("GPS poller task failed: {}", e))??;
        }
        Ok(())
    }
}
