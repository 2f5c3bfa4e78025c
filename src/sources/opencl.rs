//! Compute API Enumerator Source
//!
//! Enumerates GPU devices through the OpenCL platform layer by scraping
//! `clinfo`. The AMD topology extension in its report carries the PCI bus
//! address, which is what lets compute-layer facts land in the same record as
//! the firmware and driver facts.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use super::{run_command, FactSource};
use crate::error::Result;
use crate::inventory::{DeviceKey, PartialRecord};

const CLINFO: &str = "/usr/bin/clinfo";

// clinfo aligns values in a column: two-plus spaces split field from value.
static FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s+(\S.*?\S)\s{2,}(\S.*?)\s*$").unwrap());

// "Device Topology (AMD)    PCI-E, 0e:00.0"
static TOPOLOGY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PCI-E,\s*([0-9A-Fa-f]{2}:[0-9A-Fa-f]{2}\.\d)").unwrap());

/// OpenCL device enumerator.
#[derive(Debug, Default)]
pub struct ComputeApiSource;

impl ComputeApiSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FactSource for ComputeApiSource {
    fn name(&self) -> &'static str {
        "opencl-devices"
    }

    async fn collect(&self, _selector: Option<&DeviceKey>) -> Result<PartialRecord> {
        let output = run_command(CLINFO, &[]).await?;
        Ok(parse_platform_listing(&output))
    }
}

#[derive(Debug, Default)]
struct DeviceFields {
    device_name: String,
    vendor_name: Option<String>,
    vendor_id: Option<String>,
    device_type: Option<String>,
    available: Option<String>,
    topology: Option<String>,
}

fn parse_platform_listing(output: &str) -> PartialRecord {
    let mut record = PartialRecord::new();
    let mut current: Option<DeviceFields> = None;

    for caps in FIELD_RE.captures_iter(output) {
        let field = &caps[1];
        let value = caps[2].to_string();

        if field == "Device Name" {
            flush_device(&mut record, current.take());
            current = Some(DeviceFields {
                device_name: value,
                ..DeviceFields::default()
            });
            continue;
        }

        let Some(device) = current.as_mut() else {
            continue;
        };
        match field {
            "Device Vendor" => device.vendor_name = Some(value),
            "Device Vendor ID" => device.vendor_id = Some(value),
            "Device Type" => device.device_type = Some(value),
            "Device Available" => device.available = Some(value),
            "Device Topology (AMD)" => device.topology = Some(value),
            _ => {}
        }
    }
    flush_device(&mut record, current.take());

    record
}

/// Keep GPU devices whose topology resolves; everything else (CPU devices,
/// platforms without the AMD extension) contributes nothing.
fn flush_device(record: &mut PartialRecord, device: Option<DeviceFields>) {
    let Some(device) = device else {
        return;
    };

    let is_gpu = device
        .device_type
        .as_deref()
        .is_some_and(|t| t.contains("GPU"));
    if !is_gpu {
        return;
    }

    let Some(address) = device
        .topology
        .as_deref()
        .and_then(|t| TOPOLOGY_RE.captures(t))
        .map(|caps| caps[1].to_string())
    else {
        debug!(device = %device.device_name, "GPU device without PCI topology");
        return;
    };
    let Ok(key) = DeviceKey::parse(&address) else {
        debug!(%address, "unresolvable compute device address");
        return;
    };

    record.insert(
        key,
        json!({
            "opencl": {
                "device_name": device.device_name,
                "vendor_name": device.vendor_name,
                "vendor_id": device.vendor_id,
                "device_type": device.device_type,
                "available": device.available,
                "topology": {
                    "bus": key.bus(),
                    "device": key.device(),
                },
            }
        }),
    );
}
