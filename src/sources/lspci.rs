use tracing::debug;

use crate::{
    config_manager::InventoryConfig,
    correlator::BusDevice,
    errors::InventoryError,
    gpu_device::bus_address::BusAddress,
    sources::{BusTopologySource, command::run_command},
};

const VENDOR_MARKER: &str = "[AMD/ATI]";
const SUBSYSTEM_PREFIX: &str = "Subsystem:";
const DRIVER_PREFIX: &str = "Kernel driver in use:";

// Bus enumeration through `lspci -k`
#[derive(Debug, Clone)]
pub struct LspciSource {
    command: String,
}

impl LspciSource {
    pub fn new(config: &InventoryConfig) -> Self {
        Self {
            command: config.lspci_command.clone(),
        }
    }
}

impl BusTopologySource for LspciSource {
    fn bus_devices(
        &self,
    ) -> impl Future<Output = Result<(Vec<BusDevice>, Vec<InventoryError>), InventoryError>>
    + Send {
        let command = self.command.clone();

        async move {
            let output = run_command(&command, &["-k"]).await?;
            let (devices, errors) = parse_lspci_output(&output);
            debug!("{} AMD display controllers on the bus", devices.len());

            Ok((devices, errors))
        }
    }
}

// Device block being collected
struct PendingDevice {
    address: BusAddress,
    description: String,
    subsystem: Option<String>,
    driver: Option<String>,
}

impl PendingDevice {
    fn finish(self) -> BusDevice {
        // The subsystem line names the board, the description only the chip
        let model = self
            .subsystem
            .as_deref()
            .and_then(|s| s.split_once(VENDOR_MARKER))
            .or_else(|| self.description.split_once(VENDOR_MARKER))
            .map_or("", |(_, model)| model);

        BusDevice::new(
            self.address,
            strip_revision(model),
            self.driver.as_deref().unwrap_or_default(),
        )
    }
}

// Drop a trailing "(rev e7)"
fn strip_revision(model: &str) -> &str {
    let model = model.trim();

    match model.rfind(" (rev ") {
        Some(start) if model.ends_with(')') => model[..start].trim_end(),
        _ => model,
    }
}

// Parse `lspci -k` into the AMD display controllers it lists.
// A block starts with an unindented "BB:DD.F class: description" line,
// the indented lines after it belong to the same device
pub fn parse_lspci_output(text: &str) -> (Vec<BusDevice>, Vec<InventoryError>) {
    let mut devices = Vec::new();
    let mut errors = Vec::new();
    let mut pending: Option<PendingDevice> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            let Some(device) = pending.as_mut() else {
                continue;
            };

            let line = line.trim();
            if let Some(subsystem) = line.strip_prefix(SUBSYSTEM_PREFIX) {
                device.subsystem = Some(subsystem.trim().to_string());
            } else if let Some(driver) = line.strip_prefix(DRIVER_PREFIX) {
                device.driver = Some(driver.trim().to_string());
            }
            continue;
        }

        if let Some(device) = pending.take() {
            devices.push(device.finish());
        }

        let Some((address, rest)) = line.split_once(' ') else {
            continue;
        };
        let Some((class, description)) = rest.split_once(": ") else {
            continue;
        };

        let is_display = class.contains("VGA") || class.contains("Display");
        if !is_display || !description.contains(VENDOR_MARKER) {
            continue;
        }

        match address.parse::<BusAddress>() {
            Ok(address) => {
                pending = Some(PendingDevice {
                    address,
                    description: description.to_string(),
                    subsystem: None,
                    driver: None,
                })
            }
            Err(err) => errors.push(err),
        }
    }

    if let Some(device) = pending {
        devices.push(device.finish());
    }

    (devices, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSPCI: &str = "\
00:02.0 VGA compatible controller: Intel Corporation HD Graphics 630 (rev 04)
	Subsystem: Dell HD Graphics 630
	Kernel driver in use: i915
	Kernel modules: i915
03:00.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Ellesmere [Radeon RX 470/480/570/570X/580/580X/590] (rev e7)
	Subsystem: Advanced Micro Devices, Inc. [AMD/ATI] Radeon RX 480
	Kernel driver in use: amdgpu
	Kernel modules: amdgpu
03:00.1 Audio device: Advanced Micro Devices, Inc. [AMD/ATI] Ellesmere HDMI Audio [Radeon RX 470/480 / 570/580/590]
	Subsystem: Advanced Micro Devices, Inc. [AMD/ATI] Ellesmere HDMI Audio
	Kernel driver in use: snd_hda_intel
0a:00.0 Display controller: Advanced Micro Devices, Inc. [AMD/ATI] Vega 10 XT [Radeon RX Vega 64] (rev c1)
	Subsystem: Sapphire Technology Limited Vega 10 XT
";

    #[test]
    fn keeps_only_amd_display_controllers() {
        let (devices, errors) = parse_lspci_output(LSPCI);
        assert!(errors.is_empty());

        assert_eq!(
            devices,
            vec![
                BusDevice::new(
                    "03:00.0".parse().unwrap(),
                    "Radeon RX 480",
                    "amdgpu"
                ),
                BusDevice::new(
                    "0a:00.0".parse().unwrap(),
                    "Vega 10 XT [Radeon RX Vega 64]",
                    ""
                ),
            ]
        );
    }

    #[test]
    fn revision_suffix_is_dropped() {
        assert_eq!(strip_revision(" Polaris 10 (rev e7)"), "Polaris 10");
        assert_eq!(strip_revision("Polaris 10"), "Polaris 10");
    }

    #[test]
    fn bad_address_is_reported_and_skipped() {
        let text = "\
zz:00.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Polaris 10
	Kernel driver in use: amdgpu
03:00.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Polaris 10
";
        let (devices, errors) = parse_lspci_output(text);

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].bus_address, "03:00.0".parse().unwrap());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], InventoryError::Parse { .. }));
    }

    #[test]
    fn empty_output_has_no_devices() {
        let (devices, errors) = parse_lspci_output("");
        assert!(devices.is_empty());
        assert!(errors.is_empty());
    }
}
