//! GPU Driver Procfs Sources
//!
//! The display driver publishes one node per GPU under `/proc/ati/<n>`,
//! carrying the device's interrupt routing (and with it the bus address, in
//! decimal), the attached client processes, and the video BIOS build data.
//! Two sources read it: one for the client list, one for the VBIOS part
//! number.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::FactSource;
use crate::error::Result;
use crate::inventory::{DeviceKey, PartialRecord};

const DEFAULT_PROC_ROOT: &str = "/proc/ati";
const DEFAULT_PID_ROOT: &str = "/proc";

/// Driver node numbers to probe; the driver never registers more.
const MAX_DEVICE_NODES: u32 = 16;

// interrupt_info reports the address in decimal: "PCI:13:0:0".
static INTERRUPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PCI:(\d{1,3}):(\d{1,3}):(\d{1,2})").unwrap());

// biosversion rows are shell-style assignments: BIOS_PN="113-C6810300-102".
static BIOS_ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(.+)="(.*)""#).unwrap());

/// Resolve a driver node's bus address from its interrupt_info file.
///
/// The components are decimal there, unlike every other source.
async fn node_bus_address(node_dir: &Path) -> Option<DeviceKey> {
    let path = node_dir.join("interrupt_info");
    let text = tokio::fs::read_to_string(&path).await.ok()?;
    let caps = INTERRUPT_RE.captures(&text)?;

    let bus: u8 = caps[1].parse().ok()?;
    let device: u8 = caps[2].parse().ok()?;
    let function: u8 = caps[3].parse().ok()?;
    Some(DeviceKey::new(0, bus, device, function))
}

/// Driver node directories that exist, paired with their bus address.
async fn scan_nodes(root: &Path) -> Vec<(DeviceKey, PathBuf)> {
    let mut nodes = Vec::new();

    for node in 0..MAX_DEVICE_NODES {
        let dir = root.join(node.to_string());
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => continue,
        }
        match node_bus_address(&dir).await {
            Some(key) => nodes.push((key, dir)),
            None => {
                debug!(node, "driver node without resolvable bus address");
            }
        }
    }

    nodes
}

// =============================================================================
// Client Processes
// =============================================================================

/// Lists the processes attached to each GPU through the driver.
#[derive(Debug)]
pub struct DriverClientsSource {
    proc_root: PathBuf,
    pid_root: PathBuf,
}

impl Default for DriverClientsSource {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            pid_root: PathBuf::from(DEFAULT_PID_ROOT),
        }
    }
}

impl DriverClientsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the source at alternate procfs roots.
    pub fn with_roots(proc_root: impl Into<PathBuf>, pid_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            pid_root: pid_root.into(),
        }
    }

    async fn node_clients(&self, node_dir: &Path) -> Result<Vec<Value>> {
        let text = tokio::fs::read_to_string(node_dir.join("clients")).await?;
        let own_pid = std::process::id();
        let mut clients = Vec::new();

        // Two header rows precede the client table.
        for row in text.lines().skip(2) {
            let Some(pid) = row.split_whitespace().nth(2) else {
                continue;
            };
            let Ok(pid) = pid.parse::<u32>() else {
                continue;
            };
            if pid == own_pid {
                // The collector itself holds the device open while reading.
                continue;
            }

            let exe_link = self.pid_root.join(pid.to_string()).join("exe");
            match tokio::fs::read_link(&exe_link).await {
                Ok(executable) => clients.push(json!({
                    "pid": pid,
                    "filename": executable.to_string_lossy(),
                })),
                Err(err) => {
                    debug!(pid, error = %err, "client process vanished before resolution");
                }
            }
        }

        Ok(clients)
    }
}

#[async_trait]
impl FactSource for DriverClientsSource {
    fn name(&self) -> &'static str {
        "driver-clients"
    }

    async fn collect(&self, _selector: Option<&DeviceKey>) -> Result<PartialRecord> {
        let mut record = PartialRecord::new();

        for (key, dir) in scan_nodes(&self.proc_root).await {
            let clients = self.node_clients(&dir).await?;
            record.insert(key, json!({"status": {"clients": clients}}));
        }

        Ok(record)
    }
}

// =============================================================================
// VBIOS Version
// =============================================================================

/// Reads the video BIOS part number for each GPU.
#[derive(Debug)]
pub struct VbiosVersionSource {
    proc_root: PathBuf,
}

impl Default for VbiosVersionSource {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
        }
    }
}

impl VbiosVersionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

#[async_trait]
impl FactSource for VbiosVersionSource {
    fn name(&self) -> &'static str {
        "vbios-version"
    }

    async fn collect(&self, _selector: Option<&DeviceKey>) -> Result<PartialRecord> {
        let mut record = PartialRecord::new();

        for (key, dir) in scan_nodes(&self.proc_root).await {
            let path = dir.join("biosversion");
            let text = tokio::fs::read_to_string(&path).await?;

            match parse_bios_part_number(&text) {
                Some(part_number) => {
                    record.insert(key, json!({"product": {"biosPartNumber": part_number}}));
                }
                None => {
                    warn!(path = %path.display(), "unable to retrieve vbios version");
                }
            }
        }

        Ok(record)
    }
}

/// Pull BIOS_PN out of the biosversion attribute rows (first row is a title).
fn parse_bios_part_number(text: &str) -> Option<String> {
    for row in text.lines().skip(1) {
        if let Some(caps) = BIOS_ATTR_RE.captures(row) {
            if caps[1].trim() == "BIOS_PN" {
                return Some(caps[2].trim().to_string());
            }
        }
    }
    None
}
