use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Serialize, Serializer};
use tracing::trace;
use uuid::Uuid;

use crate::{
    errors::InventoryError,
    gpu_device::{
        attributes::{AttributeStore, Field},
        bus_address::BusAddress,
        gpu_info::{Capability, CapabilitySet},
        power_profile::{PowerProfileCatalog, parse_power_profile_modes},
        pstates::{ClockDomain, PState, PStateLadder, parse_od_clk_voltage},
    },
};

pub mod attributes;
pub mod bus_address;
pub mod gpu_data;
pub mod gpu_info;
pub mod power_profile;
pub mod pstates;

// Mandatory per-card control files
pub const OD_CLK_VOLTAGE_FILE: &str = "pp_od_clk_voltage";
pub const POWER_PROFILE_FILE: &str = "pp_power_profile_mode";

// Aggregated state of one discovered GPU
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    identity: Uuid,
    card_index: u32,

    // Set once at discovery
    sysfs_path: PathBuf,
    hwmon_path: PathBuf,

    attributes: AttributeStore,
    // Empty until the OpenCL reader correlated this record
    capabilities: CapabilitySet,

    pstates: PStateLadder,
    power_profiles: PowerProfileCatalog,

    // Set when a mandatory source of this card is missing
    #[serde(serialize_with = "serialize_fault")]
    fault: Option<InventoryError>,
}

fn serialize_fault<S: Serializer>(
    fault: &Option<InventoryError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match fault {
        Some(fault) => serializer.serialize_some(&fault.to_string()),
        None => serializer.serialize_none(),
    }
}

// Read a mandatory table. The outer error is the fatal one, a table that
// is present but not text is returned as a parse error for the caller
fn read_table(path: &Path) -> Result<Result<String, InventoryError>, InventoryError> {
    let bytes = fs::read(path).map_err(|e| InventoryError::fatal(path, e))?;

    Ok(gpu_data::decode_text(path, bytes))
}

impl DeviceRecord {
    pub fn new(card_index: u32, sysfs_path: PathBuf, hwmon_path: PathBuf) -> Self {
        let attributes =
            AttributeStore::with_identity(card_index, &sysfs_path, &hwmon_path);

        Self {
            identity: Uuid::new_v4(),
            card_index,
            sysfs_path,
            hwmon_path,
            attributes,
            capabilities: CapabilitySet::new(),
            pstates: PStateLadder::default(),
            power_profiles: PowerProfileCatalog::default(),
            fault: None,
        }
    }

    pub fn identity(&self) -> Uuid {
        self.identity
    }

    pub fn card_index(&self) -> u32 {
        self.card_index
    }

    pub fn sysfs_path(&self) -> &Path {
        &self.sysfs_path
    }

    pub fn hwmon_path(&self) -> &Path {
        &self.hwmon_path
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeStore {
        &mut self.attributes
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn capability(&self, capability: Capability) -> Option<&str> {
        self.capabilities.get(&capability).map(String::as_str)
    }

    // Replace the capability map wholesale with a correlated block
    pub fn set_capabilities(&mut self, capabilities: CapabilitySet) {
        self.capabilities = capabilities;
    }

    pub fn pstates(&self) -> &PStateLadder {
        &self.pstates
    }

    pub fn power_profiles(&self) -> &PowerProfileCatalog {
        &self.power_profiles
    }

    pub fn fault(&self) -> Option<&InventoryError> {
        self.fault.as_ref()
    }

    pub fn set_fault(&mut self, fault: InventoryError) {
        self.fault = Some(fault);
    }

    // Bus address set by the bus topology correlation
    pub fn bus_address(&self) -> Option<BusAddress> {
        self.attributes.text(Field::BusAddress)?.parse().ok()
    }

    pub fn is_compatible(&self, driver: &str) -> bool {
        self.attributes.text(Field::Driver) == Some(driver)
    }

    // Resolve the sysfs device link to the PCI directory it points to,
    // the last path component is the bus address of the card
    pub fn resolve_bus_address(&self) -> Result<BusAddress, InventoryError> {
        let resolved = fs::canonicalize(&self.sysfs_path).map_err(|e| {
            InventoryError::unavailable(self.sysfs_path.display().to_string(), e)
        })?;

        let name = resolved
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                InventoryError::parse(
                    "bus address",
                    resolved.display().to_string(),
                    "device path has no final component",
                )
            })?;

        name.parse()
    }

    // Read the overdrive table into the ladders and the range fields.
    // A missing table is fatal for this card, malformed lines are returned
    pub fn read_pstates(&mut self) -> Result<Vec<InventoryError>, InventoryError> {
        let path = self.sysfs_path.join(OD_CLK_VOLTAGE_FILE);
        let text = match read_table(&path)? {
            Ok(text) => text,
            Err(err) => return Ok(vec![err]),
        };

        let table = parse_od_clk_voltage(&text, &path.display().to_string());

        for field in [Field::SclkRange, Field::MclkRange, Field::VddcRange] {
            self.attributes.reset(field);
        }
        for (field, range) in table.ranges {
            self.attributes.set(field, range)?;
        }

        trace!(
            "card{}: {} SCLK and {} MCLK P-states",
            self.card_index,
            table.ladder.core.len(),
            table.ladder.memory.len()
        );
        self.pstates = table.ladder;

        Ok(table.errors)
    }

    // Read the power profile catalog and the forced performance level.
    // A missing catalog is fatal for this card
    pub fn read_power_profiles(&mut self) -> Result<Vec<InventoryError>, InventoryError> {
        let path = self.sysfs_path.join(POWER_PROFILE_FILE);
        let text = match read_table(&path)? {
            Ok(text) => text,
            Err(err) => return Ok(vec![err]),
        };

        self.power_profiles = parse_power_profile_modes(&text);

        let mut errors = Vec::new();
        self.update_forced_level(&mut errors);

        Ok(errors)
    }

    pub fn is_valid_pstate(&self, pstate: &PState, domain: ClockDomain) -> bool {
        pstates::is_valid_pstate(&self.attributes, pstate, domain)
    }

    pub fn is_valid_power_cap(&self, watts: f64) -> bool {
        self.attributes.is_valid_power_cap(watts)
    }

    pub fn current_power_profile(&self) -> Result<(i32, String), InventoryError> {
        power_profile::current_power_profile(&self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    use crate::gpu_device::attributes::Measure;

    const OD_TABLE: &str = "\
OD_SCLK:
0: 300Mhz 750mV
1: 900Mhz 900mV
OD_MCLK:
0: 300Mhz 800mV
OD_RANGE:
SCLK: 300Mhz 1000Mhz
MCLK: 300Mhz 2000Mhz
VDDC: 700mV 1000mV
";

    fn card(dir: &TempDir) -> DeviceRecord {
        let sysfs = dir.path().join("card0/device");
        fs::create_dir_all(&sysfs).unwrap();
        let hwmon = sysfs.join("hwmon/hwmon0");

        DeviceRecord::new(0, sysfs, hwmon)
    }

    #[test]
    fn new_record_knows_its_paths() {
        let record = DeviceRecord::new(
            3,
            PathBuf::from("/sys/class/drm/card3/device"),
            PathBuf::from("/sys/class/drm/card3/device/hwmon/hwmon3"),
        );

        assert_eq!(record.card_index(), 3);
        assert_eq!(record.attributes().int(Field::CardNum), Some(3));
        assert_eq!(
            record.attributes().text(Field::CardPath),
            Some("/sys/class/drm/card3/device")
        );
        assert_eq!(
            record.attributes().text(Field::HwmonPath),
            Some("/sys/class/drm/card3/device/hwmon/hwmon3")
        );
        assert!(record.capabilities().is_empty());
        assert!(record.pstates().is_empty());
        assert!(record.fault().is_none());
    }

    #[test]
    fn identities_are_unique() {
        let a = DeviceRecord::new(0, PathBuf::new(), PathBuf::new());
        let b = DeviceRecord::new(0, PathBuf::new(), PathBuf::new());
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn reads_pstates_and_validates() {
        let dir = TempDir::new().unwrap();
        let mut record = card(&dir);
        fs::write(record.sysfs_path().join(OD_CLK_VOLTAGE_FILE), OD_TABLE)
            .unwrap();

        let errors = record.read_pstates().unwrap();
        assert!(errors.is_empty());

        let pstate = record.pstates().core[&1].clone();
        assert!(record.is_valid_pstate(&pstate, ClockDomain::Core));

        let memory = record.pstates().memory[&0].clone();
        assert!(record.is_valid_pstate(&memory, ClockDomain::Memory));

        let too_fast =
            PState::new(Measure::new(2100., "Mhz"), Measure::new(800., "mV"));
        assert!(!record.is_valid_pstate(&too_fast, ClockDomain::Memory));
    }

    #[test]
    fn missing_mandatory_files_are_fatal() {
        let dir = TempDir::new().unwrap();
        let mut record = card(&dir);

        assert!(record.read_pstates().unwrap_err().is_fatal());
        assert!(record.read_power_profiles().unwrap_err().is_fatal());
    }

    #[test]
    fn binary_tables_are_parse_errors() {
        let dir = TempDir::new().unwrap();
        let mut record = card(&dir);
        fs::write(record.sysfs_path().join(OD_CLK_VOLTAGE_FILE), OD_TABLE)
            .unwrap();
        record.read_pstates().unwrap();

        let garbage = [0xff, 0xfe, b'\n'];
        fs::write(record.sysfs_path().join(OD_CLK_VOLTAGE_FILE), garbage)
            .unwrap();
        fs::write(record.sysfs_path().join(POWER_PROFILE_FILE), garbage)
            .unwrap();

        let errors = record.read_pstates().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], InventoryError::Parse { .. }));
        // The previous ladder is kept
        assert_eq!(record.pstates().core.len(), 2);

        let errors = record.read_power_profiles().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], InventoryError::Parse { .. }));
    }

    #[test]
    fn reads_power_profiles() {
        let dir = TempDir::new().unwrap();
        let mut record = card(&dir);
        fs::write(
            record.sysfs_path().join(POWER_PROFILE_FILE),
            "NUM MODE_NAME\n 0 BOOTUP_DEFAULT:\n 1 COMPUTE *:\n",
        )
        .unwrap();
        fs::write(
            record.sysfs_path().join("power_dpm_force_performance_level"),
            "auto\n",
        )
        .unwrap();

        let errors = record.read_power_profiles().unwrap();
        assert!(errors.is_empty());
        assert_eq!(record.power_profiles().len(), 3);
        assert_eq!(record.power_profiles().active, Some(1));
        assert_eq!(
            record.current_power_profile(),
            Ok((-1, "AUTO".to_string()))
        );
    }

    #[test]
    fn resolves_bus_address_through_symlink() {
        let dir = TempDir::new().unwrap();
        let pci = dir.path().join("devices/pci0000:00/0000:03:00.0");
        fs::create_dir_all(&pci).unwrap();
        fs::create_dir_all(dir.path().join("card0")).unwrap();
        let sysfs = dir.path().join("card0/device");
        symlink(&pci, &sysfs).unwrap();

        let record = DeviceRecord::new(0, sysfs, PathBuf::new());
        assert_eq!(
            record.resolve_bus_address().unwrap(),
            "03:00.0".parse().unwrap()
        );
    }
}
