//! Device registry
//!
//! Maps logical device identifiers to the port each controller answered
//! on. The registry is written only by scans, which rebuild it wholesale,
//! and read by the dispatcher on every job.

use std::collections::BTreeMap;
use std::sync::Arc;

use relay_detect::DiscoveredDevice;
use relay_protocol::DeviceId;
use tokio::sync::RwLock;
use tracing::debug;

/// Shared handle to the device registry
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<BTreeMap<DeviceId, String>>>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a logical identifier to its port
    pub async fn resolve(&self, id: &DeviceId) -> Option<String> {
        self.inner.read().await.get(id).cloned()
    }

    /// Resolve a registry key as given by an external caller
    ///
    /// Keys that are not even well-formed identifiers resolve to `None`.
    pub async fn resolve_key(&self, key: &str) -> Option<String> {
        let id = key.parse::<DeviceId>().ok()?;
        self.resolve(&id).await
    }

    /// Copy of the current mapping
    pub async fn snapshot(&self) -> BTreeMap<DeviceId, String> {
        self.inner.read().await.clone()
    }

    /// Identifiers currently registered
    pub async fn ids(&self) -> Vec<DeviceId> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Number of registered devices
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if no device is registered
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Replace the whole mapping with the result of a scan
    ///
    /// Devices are applied in order, so the last port reporting a given
    /// identity wins.
    pub async fn replace(&self, devices: &[DiscoveredDevice]) {
        let mut map = BTreeMap::new();
        for device in devices {
            if let Some(previous) = map.insert(device.id.clone(), device.port.clone()) {
                debug!(
                    "{} seen on both {} and {}, keeping {}",
                    device.id, previous, device.port, device.port
                );
            }
        }

        *self.inner.write().await = map;
    }
}
