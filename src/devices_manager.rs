use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config_manager::InventoryConfig,
    correlator::Correlator,
    errors::InventoryError,
    gpu_device::{
        DeviceRecord, OD_CLK_VOLTAGE_FILE, attributes::Field,
        bus_address::BusAddress,
    },
    sources::{BusTopologySource, CapabilitySource},
};

const CARD_PREFIX: &str = "card";
const DEVICE_DIR: &str = "device";

// Fields shown in the summary table, in row order
pub const TABLE_PARAMETERS: [Field; 11] = [
    Field::ModelShort,
    Field::Loading,
    Field::Power,
    Field::PowerCap,
    Field::Temperature,
    Field::VddGfx,
    Field::SclkFrequency,
    Field::SclkPState,
    Field::MclkFrequency,
    Field::MclkPState,
    Field::PowerProfileMode,
];

// Every diagnostic of a refresh, sorted by kind
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RefreshReport {
    pub unavailable: Vec<InventoryError>,
    pub parse_errors: Vec<InventoryError>,
    pub misses: Vec<InventoryError>,
    pub fatal: Vec<InventoryError>,
    pub configuration: Vec<InventoryError>,
}

impl RefreshReport {
    // Log an error at the level of its kind and keep it
    pub fn push(&mut self, err: InventoryError) {
        match err {
            InventoryError::SourceUnavailable { .. } => {
                debug!("{err}");
                self.unavailable.push(err);
            }
            InventoryError::Parse { .. } => {
                warn!("{err}");
                self.parse_errors.push(err);
            }
            InventoryError::CorrelationMiss { .. } => {
                warn!("{err}");
                self.misses.push(err);
            }
            InventoryError::PreconditionFatal { .. } => {
                error!("{err}");
                self.fatal.push(err);
            }
            InventoryError::Configuration(_) => {
                error!("{err}");
                self.configuration.push(err);
            }
        }
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = InventoryError>) {
        errors.into_iter().for_each(|err| self.push(err));
    }

    pub fn len(&self) -> usize {
        self.unavailable.len()
            + self.parse_errors.len()
            + self.misses.len()
            + self.fatal.len()
            + self.configuration.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// The fleet of discovered GPUs, kept in discovery order
pub struct DevicesManager {
    config: InventoryConfig,

    records: Vec<DeviceRecord>,
    correlator: Correlator,
}

impl DevicesManager {
    pub fn new(config: InventoryConfig) -> Self {
        Self {
            config,
            records: Vec::new(),
            correlator: Correlator::new(),
        }
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    // Scan the card root for cards exposing an overdrive table and create a
    // fresh record for each of them. Returns the number of cards found
    pub fn discover(&mut self) -> Result<usize, InventoryError> {
        let root = &self.config.card_root;
        let entries = fs::read_dir(root).map_err(|e| {
            error!("Cannot scan {}: {e}", root.display());
            InventoryError::fatal(root, e)
        })?;

        let mut cards: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| card_index(&entry.file_name().to_string_lossy()))
            .filter(|index| {
                card_device_path(root, *index)
                    .join(OD_CLK_VOLTAGE_FILE)
                    .is_file()
            })
            .collect();
        cards.sort_unstable();

        self.records = cards
            .into_iter()
            .map(|index| {
                let sysfs_path = card_device_path(root, index);
                let hwmon_path =
                    sysfs_path.join(format!("{}{index}", self.config.hwmon_sub));

                debug!("Found card{index} at {}", sysfs_path.display());
                DeviceRecord::new(index, sysfs_path, hwmon_path)
            })
            .collect();
        self.correlator = Correlator::new();

        info!("Discovered {} GPU(s) in {}", self.records.len(), root.display());

        Ok(self.records.len())
    }

    // Read the live metrics of every card in parallel.
    // Results are collected in discovery order whatever the completion order
    pub async fn read_live_metrics(&mut self) -> Vec<InventoryError> {
        let handles: Vec<_> = std::mem::take(&mut self.records)
            .into_iter()
            .map(|mut record| {
                let fallback = record.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let errors = record.read_live_metrics();
                    (record, errors)
                });

                (fallback, handle)
            })
            .collect();

        let mut errors = Vec::new();
        for (mut fallback, handle) in handles {
            match handle.await {
                Ok((record, mut record_errors)) => {
                    self.records.push(record);
                    errors.append(&mut record_errors);
                }
                Err(join_err) => {
                    // Keep the card with its previous values
                    let fault =
                        InventoryError::fatal(fallback.sysfs_path(), join_err);
                    fallback.set_fault(fault.clone());
                    self.records.push(fallback);
                    errors.push(fault);
                }
            }
        }

        errors
    }

    // Read the P-state ladders and the power profile catalog of every card.
    // A missing mandatory table marks that card as faulted and skips the
    // rest of its tables, the other cards are still read
    pub fn read_tables(&mut self) -> Vec<InventoryError> {
        let mut errors = Vec::new();

        for record in &mut self.records {
            let result = record.read_pstates().and_then(|mut pstate_errors| {
                let mut profile_errors = record.read_power_profiles()?;
                pstate_errors.append(&mut profile_errors);
                Ok(pstate_errors)
            });

            match result {
                Ok(mut record_errors) => errors.append(&mut record_errors),
                Err(fault) => {
                    record.set_fault(fault.clone());
                    errors.push(fault);
                }
            }
        }

        errors
    }

    pub async fn correlate_bus<B: BusTopologySource>(
        &mut self,
        source: &B,
    ) -> Vec<InventoryError> {
        match source.bus_devices().await {
            Ok((entries, mut errors)) => {
                errors.extend(
                    self.correlator
                        .correlate_bus_topology(&mut self.records, &entries),
                );
                errors
            }
            Err(err) => vec![err],
        }
    }

    pub async fn correlate_capabilities<C: CapabilitySource>(
        &mut self,
        source: &C,
    ) -> Vec<InventoryError> {
        match source.capability_stream().await {
            Ok(raw) => self
                .correlator
                .correlate_capabilities(&mut self.records, &raw),
            Err(err) => vec![err],
        }
    }

    // Full pipeline in its fixed order. Each stage completes for every card
    // before the next one starts
    pub async fn refresh<B, C>(
        &mut self,
        bus_source: &B,
        capability_source: &C,
    ) -> Result<RefreshReport, InventoryError>
    where
        B: BusTopologySource,
        C: CapabilitySource,
    {
        let mut report = RefreshReport::default();

        self.discover()?;

        report.extend(self.read_live_metrics().await);
        report.extend(self.read_tables());
        report.extend(self.correlate_bus(bus_source).await);
        report.extend(self.correlate_capabilities(capability_source).await);

        info!(
            "Refreshed {} GPU(s), {} compatible, {} diagnostic(s)",
            self.count(),
            self.compatible_count(),
            report.len()
        );

        Ok(report)
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn compatible_count(&self) -> usize {
        let driver = &self.config.compatible_driver;
        self.records.iter().filter(|r| r.is_compatible(driver)).count()
    }

    pub fn compatible(&self) -> impl Iterator<Item = &DeviceRecord> {
        let driver = &self.config.compatible_driver;
        self.records.iter().filter(move |r| r.is_compatible(driver))
    }

    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    pub fn record(&self, identity: Uuid) -> Option<&DeviceRecord> {
        self.records.iter().find(|r| r.identity() == identity)
    }

    pub fn find_by_bus_address(
        &self,
        bus_address: &BusAddress,
    ) -> Option<&DeviceRecord> {
        self.correlator
            .lookup(bus_address)
            .and_then(|i| self.records.get(i))
            .filter(|r| r.bus_address().as_ref() == Some(bus_address))
    }
}

fn card_device_path(root: &Path, index: u32) -> PathBuf {
    root.join(format!("{CARD_PREFIX}{index}")).join(DEVICE_DIR)
}

// "card12" gives 12, connector entries like "card0-DP-1" give nothing
fn card_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(CARD_PREFIX)?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}
