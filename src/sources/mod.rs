// External tools feeding the fleet with data keyed by bus address

use crate::{correlator::BusDevice, errors::InventoryError};

pub mod clinfo;
pub mod command;
pub mod dpkg;
pub mod lspci;

// Bus enumeration, one entry per AMD display controller.
// Entries the source could not parse come back next to the devices
pub trait BusTopologySource {
    fn bus_devices(
        &self,
    ) -> impl Future<Output = Result<(Vec<BusDevice>, Vec<InventoryError>), InventoryError>>
    + Send;
}

// Raw OpenCL device report, parsed by the correlator
pub trait CapabilitySource {
    fn capability_stream(
        &self,
    ) -> impl Future<Output = Result<String, InventoryError>> + Send;
}
