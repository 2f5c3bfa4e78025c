//! Canonical Device Key Resolver
//!
//! Every fact source addresses a GPU by its PCI bus address, but each source
//! spells that address differently: with or without the domain field, upper or
//! lower hex, decimal driver-node notation. Partial records can only merge if
//! all of them land on one canonical key, so every address is normalized to
//! `dddd:bb:dd.f` (lowercase, fixed-width hex) before it enters the aggregate.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Domain value assumed when a source reports a bare `bus:device.function`.
const DEFAULT_DOMAIN: u16 = 0;

/// Canonical PCI bus address identifying one physical device.
///
/// Renders as `dddd:bb:dd.f`: domain zero-padded to 4 hex digits, bus and
/// device to 2, function to 1, all lowercase. Two differently-cased or
/// differently-padded spellings of the same address compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    domain: u16,
    bus: u8,
    device: u8,
    function: u8,
}

impl DeviceKey {
    /// Create a key from already-numeric components.
    ///
    /// Sources that report decimal components (e.g. the driver procfs nodes)
    /// convert here instead of round-tripping through a string.
    pub fn new(domain: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            function,
        }
    }

    /// Parse a raw bus address into its canonical form.
    ///
    /// Accepts the full `dddd:bb:dd.f` form and the 2-field `bb:dd.f` form
    /// (domain defaults to `0000`), hex fields in any case. Anything else is
    /// a resolution failure; the caller drops the record and moves on.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let fields: Vec<&str> = raw.split(':').collect();

        let (domain, bus, rest) = match fields.as_slice() {
            [domain, bus, rest] => (parse_hex_u16(raw, domain)?, *bus, *rest),
            [bus, rest] => (DEFAULT_DOMAIN, *bus, *rest),
            _ => return Err(Error::KeyResolution(raw.to_string())),
        };

        let (device, function) = rest
            .split_once('.')
            .ok_or_else(|| Error::KeyResolution(raw.to_string()))?;

        Ok(Self {
            domain,
            bus: parse_hex_u8(raw, bus)?,
            device: parse_hex_u8(raw, device)?,
            function: parse_hex_u8(raw, function)?,
        })
    }

    pub fn domain(&self) -> u16 {
        self.domain
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn device(&self) -> u8 {
        self.device
    }

    pub fn function(&self) -> u8 {
        self.function
    }

    /// The `bb:dd.f` short form some vendor utilities expect as an argument.
    pub fn short_form(&self) -> String {
        format!("{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

fn parse_hex_u16(raw: &str, field: &str) -> Result<u16> {
    u16::from_str_radix(field.trim(), 16).map_err(|_| Error::KeyResolution(raw.to_string()))
}

fn parse_hex_u8(raw: &str, field: &str) -> Result<u8> {
    u8::from_str_radix(field.trim(), 16).map_err(|_| Error::KeyResolution(raw.to_string()))
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl FromStr for DeviceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for DeviceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = DeviceKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a PCI bus address like '0000:0e:00.0'")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<DeviceKey, E> {
                DeviceKey::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}
