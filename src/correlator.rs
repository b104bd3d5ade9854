// Merging of data keyed by bus address into records discovered by card
// index.
//
// Records are indexed by bus address in a lookup map instead of being
// scanned for every entry. The bus topology pass resolves each record's
// sysfs device link to find its address, the capability pass matches
// OpenCL blocks against the address stored by that first pass.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::{
    errors::InventoryError,
    gpu_device::{
        DeviceRecord,
        attributes::Field,
        bus_address::BusAddress,
        gpu_info::{
            Capability, CapabilitySet, DEVICE_END_MARKER, DEVICE_START_MARKER,
        },
    },
};

pub const BUS_TOPOLOGY_SOURCE: &str = "bus topology";
pub const CAPABILITY_SOURCE: &str = "OpenCL capabilities";

const VENDOR_MARKER: &str = "Radeon";

// One GPU reported by bus enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusDevice {
    pub bus_address: BusAddress,
    pub model: String,
    pub driver: String,
}

impl BusDevice {
    pub fn new(bus_address: BusAddress, model: &str, driver: &str) -> Self {
        Self {
            bus_address,
            model: model.to_string(),
            driver: driver.to_string(),
        }
    }
}

// Model name with everything up to the vendor brand stripped,
// "Ellesmere [Radeon RX 470/480]" gives "RX 470/480"
pub fn short_model(model: &str) -> String {
    let tail = match model.rfind(VENDOR_MARKER) {
        Some(start) => &model[start + VENDOR_MARKER.len()..],
        None => model,
    };

    tail.replace(']', "").trim().to_string()
}

// Capabilities buffered for one device of the raw stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityBlock {
    pub device_index: String,
    pub values: CapabilitySet,
}

// Split the raw `clinfo --raw` stream into per device blocks.
// A block opens on the device name and closes on the extensions field,
// fields outside of an open block are dropped
pub fn parse_capability_stream(
    raw: &str,
) -> (Vec<CapabilityBlock>, Vec<InventoryError>) {
    let mut blocks = Vec::new();
    let mut errors = Vec::new();
    let mut pending: Option<CapabilityBlock> = None;

    for (number, line) in raw.lines().enumerate() {
        let line = line.trim();
        let Some(line) = line.strip_prefix('[') else {
            continue;
        };

        let Some((key, rest)) = line.split_once(']') else {
            errors.push(InventoryError::parse(
                format!("capability line {}", number + 1),
                CAPABILITY_SOURCE,
                "unterminated device index",
            ));
            continue;
        };

        let device_index = key.split_once('/').map_or(key, |(_, d)| d).trim();
        let rest = rest.trim();
        let (marker, value) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(m, v)| (m, v.trim()));

        if marker == DEVICE_START_MARKER {
            if let Some(block) = pending.take() {
                errors.push(InventoryError::parse(
                    format!("capabilities of device {}", block.device_index),
                    CAPABILITY_SOURCE,
                    format!("block ended without {DEVICE_END_MARKER}"),
                ));
            }

            let mut values = CapabilitySet::new();
            values.insert(Capability::DeviceName, value.to_string());
            pending = Some(CapabilityBlock {
                device_index: device_index.to_string(),
                values,
            });
            continue;
        }

        if marker == DEVICE_END_MARKER {
            match pending.take() {
                Some(block) => blocks.push(block),
                None => {
                    debug!(
                        "Capability block of device {device_index} has no device name"
                    );
                    errors.push(InventoryError::miss(
                        CAPABILITY_SOURCE,
                        format!("unnamed device {device_index}"),
                    ));
                }
            }
            continue;
        }

        let Some(capability) = Capability::from_marker(marker) else {
            continue;
        };

        let Some(block) = pending.as_mut() else {
            trace!("Dropping {marker} outside of a device block");
            continue;
        };
        if block.device_index != device_index {
            trace!(
                "Dropping {marker} of device {device_index} inside block of device {}",
                block.device_index
            );
            continue;
        }

        if capability == Capability::BusAddress {
            // "PCI-E, 0000:03:00.0", the address is the last token
            let address = value
                .split_whitespace()
                .last()
                .unwrap_or_default()
                .parse::<BusAddress>();

            match address {
                Ok(address) => {
                    block.values.insert(capability, address.to_string());
                }
                Err(err) => errors.push(err),
            }
        } else {
            block.values.insert(capability, value.to_string());
        }
    }

    if let Some(block) = pending {
        errors.push(InventoryError::parse(
            format!("capabilities of device {}", block.device_index),
            CAPABILITY_SOURCE,
            format!("stream ended without {DEVICE_END_MARKER}"),
        ));
    }

    (blocks, errors)
}

#[derive(Debug, Default)]
pub struct Correlator {
    // Position of each record in the fleet, keyed by bus address
    by_bus: HashMap<BusAddress, usize>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, bus_address: &BusAddress) -> Option<usize> {
        self.by_bus.get(bus_address).copied()
    }

    // Rebuild the index from the bus address stored in each record
    pub fn index_records(&mut self, records: &[DeviceRecord]) {
        self.by_bus = records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| Some((record.bus_address()?, i)))
            .collect();
    }

    // Attach bus enumeration data to the record whose sysfs device
    // resolves to the same bus address
    pub fn correlate_bus_topology(
        &mut self,
        records: &mut [DeviceRecord],
        entries: &[BusDevice],
    ) -> Vec<InventoryError> {
        let mut errors = Vec::new();

        let mut resolved = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            match record.resolve_bus_address() {
                Ok(address) => {
                    resolved.insert(address, i);
                }
                Err(err) => debug!(
                    "Couldn't resolve bus address of card{}: {err}",
                    record.card_index()
                ),
            }
        }

        for entry in entries {
            let Some(&i) = resolved.get(&entry.bus_address) else {
                debug!(
                    "Bus device {} ({}) matches no card",
                    entry.bus_address, entry.model
                );
                errors.push(InventoryError::miss(
                    BUS_TOPOLOGY_SOURCE,
                    entry.bus_address.to_string(),
                ));
                continue;
            };

            let attributes = records[i].attributes_mut();
            let result = attributes
                .set(Field::BusAddress, entry.bus_address.to_string())
                .and_then(|_| attributes.set(Field::Driver, entry.driver.as_str()))
                .and_then(|_| attributes.set(Field::Model, entry.model.as_str()))
                .and_then(|_| {
                    attributes.set(Field::ModelShort, short_model(&entry.model))
                });

            match result {
                Ok(()) => {
                    debug!(
                        "card{} is {} ({})",
                        records[i].card_index(),
                        entry.bus_address,
                        entry.model
                    );
                    self.by_bus.insert(entry.bus_address.clone(), i);
                }
                Err(err) => errors.push(err.into()),
            }
        }

        errors
    }

    // Copy each OpenCL capability block into the record with the same
    // bus address
    pub fn correlate_capabilities(
        &mut self,
        records: &mut [DeviceRecord],
        raw: &str,
    ) -> Vec<InventoryError> {
        self.index_records(records);

        let (blocks, mut errors) = parse_capability_stream(raw);

        for block in blocks {
            let address = block
                .values
                .get(&Capability::BusAddress)
                .and_then(|address| address.parse::<BusAddress>().ok());

            let target = address.as_ref().and_then(|a| self.lookup(a));
            let Some(i) = target else {
                let key = address.map_or_else(
                    || format!("device {} without bus address", block.device_index),
                    |a| a.to_string(),
                );
                debug!("OpenCL device {key} matches no card");
                errors.push(InventoryError::miss(CAPABILITY_SOURCE, key));
                continue;
            };

            debug!(
                "card{} runs OpenCL device {}",
                records[i].card_index(),
                block.device_index
            );
            records[i].set_capabilities(block.values);
        }

        errors
    }
}
