//! Vendor GPU Utility Sources
//!
//! Three scrapes of the `agi` vendor utility: the instance-id listing, the
//! per-device usage status, and the board serial number. These are the slow
//! diagnostics (the utility talks to the hardware), so they run with a
//! longer budget and are skipped entirely in abridged mode.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{run_command, FactSource};
use crate::error::Result;
use crate::inventory::{DeviceKey, PartialRecord};

const AGI: &str = "/usr/bin/agi";

// Instance listing, one adapter per line:
// "       0  VendorID: 0x1002 DeviceID: 0x67a0 SSID: 0x00 (0a:00.0) (C68103-FGL HAWAII)"
static INSTANCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(\d+)\s+VendorID:.*?\(([0-9A-Fa-f]{2}:[0-9A-Fa-f]{2}\.\d)\)").unwrap()
});

// Status/serial reports are block-shaped: a bracketed header carrying the bus
// address, an 80-dash rule, a blank line, then the payload.
static STATUS_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\[\d+\][^\n]*?\(([0-9A-Fa-f]{2}:[0-9A-Fa-f]{2}\.\d)\) \([^)]*\)\n-{80}\n\n(.*?)\n\n")
        .unwrap()
});

static SERIAL_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)\[\d+\][^\n]*?\(([0-9A-Fa-f]{2}:[0-9A-Fa-f]{2}\.\d)\) \([^)]*\)\n-{80}\n\nSerialID Data = ([0-9a-z]*)\n",
    )
    .unwrap()
});

// Selector runs print a single payload without the per-device header.
static SERIAL_SINGLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SerialID Data = ([0-9a-z]+)").unwrap());

/// `-i=*` enumerates every adapter; a selector narrows to one bus address.
fn instance_arg(selector: Option<&DeviceKey>) -> String {
    match selector {
        Some(key) => format!("-i=PCI:{key}"),
        None => "-i=*".to_string(),
    }
}

// =============================================================================
// Instance IDs
// =============================================================================

/// Maps each adapter's bus address to the utility's instance id, which the
/// other `agi` invocations accept as a device argument.
#[derive(Debug, Default)]
pub struct AgiInstanceSource;

impl AgiInstanceSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FactSource for AgiInstanceSource {
    fn name(&self) -> &'static str {
        "agi-instances"
    }

    async fn collect(&self, _selector: Option<&DeviceKey>) -> Result<PartialRecord> {
        let output = run_command(AGI, &["-i"]).await?;
        Ok(parse_instance_list(&output))
    }
}

fn parse_instance_list(output: &str) -> PartialRecord {
    let mut record = PartialRecord::new();

    for caps in INSTANCE_RE.captures_iter(output) {
        let instance: u64 = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let Ok(key) = DeviceKey::parse(&caps[2]) else {
            debug!(address = &caps[2], "skipping instance with unresolvable bus address");
            continue;
        };

        record.insert(key, json!({"instanceId": instance}));
    }

    record
}

// =============================================================================
// GPU Status
// =============================================================================

/// Usage status (temperature, power draw, activity, link state) per device.
#[derive(Debug, Default)]
pub struct AgiStatusSource;

impl AgiStatusSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FactSource for AgiStatusSource {
    fn name(&self) -> &'static str {
        "agi-gpustatus"
    }

    async fn collect(&self, selector: Option<&DeviceKey>) -> Result<PartialRecord> {
        let arg = instance_arg(selector);
        let output = run_command(AGI, &[&arg, "-gpustatus"]).await?;
        Ok(parse_gpu_status(&output))
    }
}

fn parse_gpu_status(output: &str) -> PartialRecord {
    let mut record = PartialRecord::new();

    for caps in STATUS_BLOCK_RE.captures_iter(output) {
        let Ok(key) = DeviceKey::parse(&caps[1]) else {
            debug!(address = &caps[1], "skipping status block with unresolvable bus address");
            continue;
        };

        let mut usage = Map::new();
        for line in caps[2].lines() {
            if let Some((name, value)) = line.split_once(':') {
                usage.insert(name.trim().to_string(), Value::from(value.trim()));
            }
        }

        record.insert(key, json!({"status": {"usage": usage}}));
    }

    record
}

// =============================================================================
// Serial Numbers
// =============================================================================

/// Board serial number per device.
#[derive(Debug, Default)]
pub struct AgiSerialSource;

impl AgiSerialSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FactSource for AgiSerialSource {
    fn name(&self) -> &'static str {
        "agi-serial"
    }

    async fn collect(&self, selector: Option<&DeviceKey>) -> Result<PartialRecord> {
        let arg = instance_arg(selector);
        let output = run_command(AGI, &[&arg, "-sid"]).await?;
        Ok(parse_serial_ids(&output, selector))
    }
}

fn parse_serial_ids(output: &str, selector: Option<&DeviceKey>) -> PartialRecord {
    let mut record = PartialRecord::new();

    match selector {
        // Single-device runs omit the per-device header, so the serial is
        // keyed to the device that was asked for.
        Some(key) => {
            if let Some(caps) = SERIAL_SINGLE_RE.captures(output) {
                record.insert(*key, json!({"product": {"serialNumber": &caps[1]}}));
            }
        }
        None => {
            for caps in SERIAL_BLOCK_RE.captures_iter(output) {
                let Ok(key) = DeviceKey::parse(&caps[1]) else {
                    continue;
                };
                record.insert(key, json!({"product": {"serialNumber": &caps[2]}}));
            }
        }
    }

    record
}
