//! Display Driver Adapter List Source
//!
//! Scrapes `aticonfig --list-adapters` for the product name of every adapter
//! the display driver claims. Product information is what promotes a bare
//! platform slot into a recognized device in the final report.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use super::{run_command, FactSource};
use crate::error::Result;
use crate::inventory::{DeviceKey, PartialRecord};

const ATICONFIG: &str = "/usr/bin/aticonfig";

// One adapter per line: " * 0. 0e:00.0 AMD FirePro S9150 (FireGL V)".
// The leading '*' marks the default adapter; the bus address carries no
// domain, which defaults to 0000 during resolution.
static ADAPTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\*?\s*(\d+)\.\s+([0-9A-Fa-f]{2}:[0-9A-Fa-f]{2}\.\d)\s+(.+?)\s*$")
        .unwrap()
});

/// Vendor display-driver adapter enumerator.
#[derive(Debug, Default)]
pub struct AdapterListSource;

impl AdapterListSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FactSource for AdapterListSource {
    fn name(&self) -> &'static str {
        "aticonfig-adapters"
    }

    async fn collect(&self, _selector: Option<&DeviceKey>) -> Result<PartialRecord> {
        let output = run_command(ATICONFIG, &["--list-adapters"]).await?;
        Ok(parse_adapter_list(&output))
    }
}

fn parse_adapter_list(output: &str) -> PartialRecord {
    let mut record = PartialRecord::new();

    for caps in ADAPTER_RE.captures_iter(output) {
        let address = &caps[2];
        let product = caps[3].to_string();

        let key = match DeviceKey::parse(address) {
            Ok(key) => key,
            Err(err) => {
                debug!(%address, error = %err, "skipping adapter with unresolvable bus address");
                continue;
            }
        };

        debug!(adapter = &caps[1], device = %key, product = %product, "adapter mapped");
        record.insert(key, json!({"product": {"name": product}}));
    }

    record
}
