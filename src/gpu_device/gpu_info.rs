// GPU info are static capabilities reported once by the OpenCL runtime

use std::collections::BTreeMap;

use serde::Serialize;

// Marker of the first field of a device block in `clinfo --raw`
pub const DEVICE_START_MARKER: &str = "CL_DEVICE_NAME";
// Marker of the last field of a device block
pub const DEVICE_END_MARKER: &str = "CL_DEVICE_EXTENSIONS";

pub type CapabilitySet = BTreeMap<Capability, String>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DeviceName,
    DeviceVersion,
    DriverVersion,
    OpenclVersion,
    BusAddress,
    MaxComputeUnits,
    SimdPerCu,
    SimdWidth,
    SimdInstructionWidth,
    MaxMemAllocation,
    MaxWorkItemDimensions,
    MaxWorkItemSizes,
    MaxWorkGroupSize,
    PreferredWorkGroupMultiple,
}

impl Capability {
    pub const ALL: [Capability; 14] = [
        Capability::DeviceName,
        Capability::DeviceVersion,
        Capability::DriverVersion,
        Capability::OpenclVersion,
        Capability::BusAddress,
        Capability::MaxComputeUnits,
        Capability::SimdPerCu,
        Capability::SimdWidth,
        Capability::SimdInstructionWidth,
        Capability::MaxMemAllocation,
        Capability::MaxWorkItemDimensions,
        Capability::MaxWorkItemSizes,
        Capability::MaxWorkGroupSize,
        Capability::PreferredWorkGroupMultiple,
    ];

    // Raw clinfo field name feeding this capability
    pub fn marker(self) -> &'static str {
        match self {
            Capability::DeviceName => DEVICE_START_MARKER,
            Capability::DeviceVersion => "CL_DEVICE_VERSION",
            Capability::DriverVersion => "CL_DRIVER_VERSION",
            Capability::OpenclVersion => "CL_DEVICE_OPENCL_C_VERSION",
            Capability::BusAddress => "CL_DEVICE_TOPOLOGY_AMD",
            Capability::MaxComputeUnits => "CL_DEVICE_MAX_COMPUTE_UNITS",
            Capability::SimdPerCu => "CL_DEVICE_SIMD_PER_COMPUTE_UNIT_AMD",
            Capability::SimdWidth => "CL_DEVICE_SIMD_WIDTH_AMD",
            Capability::SimdInstructionWidth => {
                "CL_DEVICE_SIMD_INSTRUCTION_WIDTH_AMD"
            }
            Capability::MaxMemAllocation => "CL_DEVICE_MAX_MEM_ALLOC_SIZE",
            Capability::MaxWorkItemDimensions => {
                "CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS"
            }
            Capability::MaxWorkItemSizes => "CL_DEVICE_MAX_WORK_ITEM_SIZES",
            Capability::MaxWorkGroupSize => "CL_DEVICE_MAX_WORK_GROUP_SIZE",
            Capability::PreferredWorkGroupMultiple => {
                "CL_KERNEL_PREFERRED_WORK_GROUP_SIZE_MULTIPLE"
            }
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.marker() == marker)
    }

    pub fn label(self) -> &'static str {
        match self {
            Capability::DeviceName => "Device Name",
            Capability::DeviceVersion => "Device Version",
            Capability::DriverVersion => "Driver Version",
            Capability::OpenclVersion => "Device OpenCL C Version",
            Capability::BusAddress => "CL PCIe ID",
            Capability::MaxComputeUnits => "Max Compute Units",
            Capability::SimdPerCu => "SIMD per CU",
            Capability::SimdWidth => "SIMD Width",
            Capability::SimdInstructionWidth => "SIMD Instruction Width",
            Capability::MaxMemAllocation => "CL Max Memory Allocation",
            Capability::MaxWorkItemDimensions => "Max Work Item Dimensions",
            Capability::MaxWorkItemSizes => "Max Work Item Sizes",
            Capability::MaxWorkGroupSize => "Max Work Group Size",
            Capability::PreferredWorkGroupMultiple => {
                "Preferred Work Group Multiple"
            }
        }
    }
}
