use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::errors::InventoryError;

// PCI bus location normalized to the "BB:DD.F" form.
// The sysfs device directory, lspci and clinfo all spell it differently,
// this type is the single place where those spellings are reconciled
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BusAddress(String);

impl BusAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BusAddress {
    type Err = InventoryError;

    // Accepts "BB:DD.F" and "DDDD:BB:DD.F", the PCI domain is dropped
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            InventoryError::parse("bus address", s.trim(), reason)
        };

        let parts: Vec<&str> = s.trim().split(':').collect();
        let (bus, slot) = match parts.as_slice() {
            [bus, slot] => (*bus, *slot),
            [domain, bus, slot] => {
                u32::from_str_radix(domain, 16)
                    .map_err(|_| invalid("invalid PCI domain"))?;
                (*bus, *slot)
            }
            _ => return Err(invalid("expected BB:DD.F")),
        };

        let (device, function) = slot
            .split_once('.')
            .ok_or_else(|| invalid("missing function number"))?;

        let bus = u8::from_str_radix(bus, 16)
            .map_err(|_| invalid("invalid bus number"))?;
        let device = u8::from_str_radix(device, 16)
            .map_err(|_| invalid("invalid device number"))?;
        let function = u8::from_str_radix(function, 16)
            .map_err(|_| invalid("invalid function number"))?;

        if device > 0x1f || function > 7 {
            return Err(invalid("device or function out of range"));
        }

        Ok(Self(format!("{bus:02x}:{device:02x}.{function:x}")))
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
