//! SMBIOS Slot Table Source
//!
//! Scrapes `dmidecode -t slot` for the physical slot designation and bus
//! address of every PCI slot the firmware knows about. This is the only
//! source that can say *where* a card sits in the chassis, so its `location`
//! subtree is the sort key for the final report.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use super::{run_command, FactSource};
use crate::error::Result;
use crate::inventory::{DeviceKey, PartialRecord};

const DMIDECODE: &str = "/usr/sbin/dmidecode";

static DESIGNATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Designation:\s*(.+)").unwrap());
static BUS_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Bus Address:\s*([0-9A-Fa-f]+:[0-9A-Fa-f]+:[0-9A-Fa-f]+\.[0-9A-Fa-f]+)").unwrap()
});

/// Firmware slot-table reader.
#[derive(Debug, Default)]
pub struct SmbiosSlotSource;

impl SmbiosSlotSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FactSource for SmbiosSlotSource {
    fn name(&self) -> &'static str {
        "smbios-slots"
    }

    async fn collect(&self, _selector: Option<&DeviceKey>) -> Result<PartialRecord> {
        let output = run_command(DMIDECODE, &["-t", "slot"]).await?;
        Ok(parse_slot_table(&output))
    }
}

/// Parse the dmidecode slot table into per-device location facts.
///
/// Each `Handle …` paragraph describes one slot; paragraphs without both a
/// designation and a resolvable bus address contribute nothing.
fn parse_slot_table(output: &str) -> PartialRecord {
    let mut record = PartialRecord::new();

    for block in output.split("\n\n") {
        let Some(designation) = DESIGNATION_RE
            .captures(block)
            .map(|caps| caps[1].trim().to_string())
        else {
            continue;
        };
        let Some(address) = BUS_ADDRESS_RE.captures(block).map(|caps| caps[1].to_string())
        else {
            continue;
        };

        let key = match DeviceKey::parse(&address) {
            Ok(key) => key,
            Err(err) => {
                debug!(%address, error = %err, "skipping slot with unresolvable bus address");
                continue;
            }
        };

        record.insert(
            key,
            json!({
                "location": {
                    "slot": designation,
                    "bus": key.to_string(),
                }
            }),
        );
        debug!(slot = %designation, device = %key, "slot mapped");
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# dmidecode 2.12
SMBIOS 2.8 present.

Handle 0x0901, DMI type 9, 17 bytes
System Slot Information
\tDesignation: PCI-E Slot 1
\tType: x16 PCI Express 3 x16
\tCurrent Usage: In Use
\tLength: Long
\tID: 1
\tCharacteristics:
\t\t3.3 V is provided
\t\tPME signal is supported
\tBus Address: 0000:0D:00.0

Handle 0x0903, DMI type 9, 17 bytes
System Slot Information
\tDesignation: PCI-E Slot 3
\tType: x16 PCI Express 3 x16
\tCurrent Usage: In Use
\tLength: Long
\tID: 3
\tCharacteristics:
\t\t3.3 V is provided
\tBus Address: 0000:09:00.0

";

    #[test]
    fn test_parses_all_slots() {
        let record = parse_slot_table(SAMPLE);
        assert_eq!(record.len(), 2);

        let key = DeviceKey::parse("0000:0d:00.0").unwrap();
        let tree = record.get(&key).unwrap();
        assert_eq!(tree["location"]["slot"], "PCI-E Slot 1");
        assert_eq!(tree["location"]["bus"], "0000:0d:00.0");
    }

    #[test]
    fn test_bus_address_is_canonicalized() {
        // The firmware reports uppercase hex; keys must come out canonical.
        let record = parse_slot_table(SAMPLE);
        assert!(record.contains_key(&DeviceKey::parse("0000:0d:00.0").unwrap()));
    }

    #[test]
    fn test_blocks_without_bus_address_are_skipped() {
        let partial = "\
Handle 0x0902, DMI type 9, 17 bytes
System Slot Information
\tDesignation: PCI-E Slot 2
\tCurrent Usage: Available

";
        assert!(parse_slot_table(partial).is_empty());
    }

    #[test]
    fn test_empty_output_yields_empty_record() {
        assert!(parse_slot_table("").is_empty());
    }
}
