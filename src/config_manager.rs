use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};

// Paths, tool names and polling settings used by discovery, the external
// sources and the environment check.
// Every field falls back to its default when absent from the Json file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    // Directory holding the cardN entries
    pub card_root: PathBuf,
    // Path below cardN/device of the hwmon node, the card number is appended
    pub hwmon_sub: String,

    pub featuremask_path: PathBuf,
    pub osrelease_path: PathBuf,

    // Kernel module a card must use to be counted as compatible
    pub compatible_driver: String,

    pub lspci_command: String,
    pub clinfo_command: String,
    pub dpkg_command: String,
    // Package queried for the installed driver version
    pub driver_package: String,

    pub refresh_interval_secs: u64,
    pub debug: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            card_root: PathBuf::from("/sys/class/drm/"),
            hwmon_sub: "hwmon/hwmon".to_string(),
            featuremask_path: PathBuf::from(
                "/sys/module/amdgpu/parameters/ppfeaturemask",
            ),
            osrelease_path: PathBuf::from("/proc/sys/kernel/osrelease"),
            compatible_driver: "amdgpu".to_string(),
            lspci_command: "lspci".to_string(),
            clinfo_command: "clinfo".to_string(),
            dpkg_command: "dpkg".to_string(),
            driver_package: "amdgpu-pro".to_string(),
            refresh_interval_secs: 2,
            debug: false,
        }
    }
}

impl InventoryConfig {
    // Load the configuration from a Json file,
    // no path means the built in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let file = File::open(path).with_context(|| {
            format!("Failed to open configuration file {}", path.display())
        })?;

        let buf = BufReader::new(file);

        let config: Self = serde_json::from_reader(buf).with_context(|| {
            format!("Failed to parse configuration file {}", path.display())
        })?;

        Ok(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        // A zero interval would spin the watch loop
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}
