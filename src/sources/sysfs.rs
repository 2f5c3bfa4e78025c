//! PCI Config-Space Identity Source
//!
//! Reads the vendor/device identification the kernel exposes under
//! `/sys/bus/pci/devices`. Display-class devices only: the inventory is about
//! GPUs, and everything else on the bus would just be noise the projector has
//! to throw away again.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::FactSource;
use crate::error::Result;
use crate::inventory::{DeviceKey, PartialRecord};

const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// PCI class prefix for display controllers (VGA, 3D, other display).
const DISPLAY_CLASS_PREFIX: &str = "0x03";

/// Kernel sysfs reader for PCI identity attributes.
#[derive(Debug)]
pub struct SysfsPciSource {
    root: PathBuf,
}

impl Default for SysfsPciSource {
    fn default() -> Self {
        Self {
            root: PathBuf::from(SYSFS_PCI_DEVICES),
        }
    }
}

impl SysfsPciSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the source at an alternate device tree root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_attribute(dir: &Path, attribute: &str) -> Option<String> {
        let path = dir.join(attribute);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text.trim().to_string()),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "attribute unreadable");
                None
            }
        }
    }

    async fn device_entry(&self, key: DeviceKey) -> Option<serde_json::Value> {
        let dir = self.root.join(key.to_string());

        // Non-display devices are out of scope for the inventory.
        let class = Self::read_attribute(&dir, "class").await?;
        if !class.starts_with(DISPLAY_CLASS_PREFIX) {
            return None;
        }

        let vendor = Self::read_attribute(&dir, "vendor").await?;
        let device = Self::read_attribute(&dir, "device").await?;
        let subsystem_vendor = Self::read_attribute(&dir, "subsystem_vendor").await?;
        let subsystem_device = Self::read_attribute(&dir, "subsystem_device").await?;

        Some(json!({
            "hardwareId": {
                "vendor": vendor,
                "device": device,
                "subsystemVendor": subsystem_vendor,
                "subsystemDevice": subsystem_device,
            }
        }))
    }
}

#[async_trait]
impl FactSource for SysfsPciSource {
    fn name(&self) -> &'static str {
        "sysfs-pci"
    }

    async fn collect(&self, selector: Option<&DeviceKey>) -> Result<PartialRecord> {
        let mut record = PartialRecord::new();

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let key = match DeviceKey::parse(&name.to_string_lossy()) {
                Ok(key) => key,
                Err(err) => {
                    debug!(entry = %name.to_string_lossy(), error = %err, "skipping non-device entry");
                    continue;
                }
            };

            if let Some(selector) = selector {
                if key != *selector {
                    continue;
                }
            }

            if let Some(tree) = self.device_entry(key).await {
                record.insert(key, tree);
            }
        }

        Ok(record)
    }
}
