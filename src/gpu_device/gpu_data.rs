// GPU data is information that is updated in real time from sysfs

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, trace};

use crate::{
    errors::InventoryError,
    gpu_device::{
        DeviceRecord,
        attributes::{AttributeValue, Field, Measure, RangePair},
        power_profile::parse_active_profile,
    },
};

// Fields owned by the live ingest, reset before every pass
const LIVE_FIELDS: [Field; 15] = [
    Field::Power,
    Field::PowerCap,
    Field::PowerCapRange,
    Field::Temperature,
    Field::VddGfx,
    Field::Loading,
    Field::LinkSpeed,
    Field::LinkWidth,
    Field::Vbios,
    Field::SclkPState,
    Field::SclkFrequency,
    Field::MclkPState,
    Field::MclkFrequency,
    Field::PowerProfileMode,
    Field::PowerDpmForce,
];

// Marker expected in in0_label before in0_input is trusted as VddGFX
const VDDGFX_LABEL: &str = "vddgfx";

// Content that is not UTF-8 is malformed, not unreadable
pub(crate) fn decode_text(
    path: &Path,
    bytes: Vec<u8>,
) -> Result<String, InventoryError> {
    String::from_utf8(bytes).map_err(|e| {
        InventoryError::parse("text", path.display().to_string(), e)
    })
}

// Read a whole sysfs file, a missing file is not an error
pub(crate) fn read_optional(
    path: &Path,
) -> Result<Option<String>, InventoryError> {
    match fs::read(path) {
        Ok(bytes) => decode_text(path, bytes).map(Some),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            trace!("{} not present", path.display());
            Ok(None)
        }
        Err(err) => Err(InventoryError::unavailable(
            path.display().to_string(),
            err,
        )),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

fn parse_int(text: &str) -> Result<i64, String> {
    let line = first_line(text);
    line.parse::<i64>()
        .map_err(|e| format!("\"{line}\" is not an integer: {e}"))
}

// Convert a micro unit reading (µW) to its base unit
fn micro(text: &str) -> Result<f64, String> {
    Ok(parse_int(text)? as f64 / 1_000_000.)
}

fn milli(text: &str) -> Result<f64, String> {
    Ok(parse_int(text)? as f64 / 1_000.)
}

// Parse the line flagged '*' of a pp_dpm_* file as (index, frequency)
fn parse_active_level(text: &str) -> Result<Option<(i64, String)>, String> {
    let Some(line) = text.lines().map(str::trim).find(|l| l.ends_with('*'))
    else {
        return Ok(None);
    };

    let (index, frequency) = line
        .split_once(':')
        .ok_or_else(|| format!("\"{line}\" has no level index"))?;
    let index = index
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid level index in \"{line}\": {e}"))?;
    let frequency = frequency.trim().trim_end_matches('*').trim();

    Ok(Some((index, frequency.to_string())))
}

impl DeviceRecord {
    // Read every live metric file of the card.
    // Absent files leave their field unset, unreadable or malformed
    // content is reported for that field only
    pub fn read_live_metrics(&mut self) -> Vec<InventoryError> {
        for field in LIVE_FIELDS {
            self.attributes.reset(field);
        }

        let mut errors = Vec::new();

        self.update_power(&mut errors);
        self.update_temp(&mut errors);
        self.update_voltage(&mut errors);
        self.update_device_info(&mut errors);
        self.update_clocks(&mut errors);
        self.update_power_profile(&mut errors);

        errors
    }

    fn hwmon_file(&self, name: &str) -> PathBuf {
        self.hwmon_path.join(name)
    }

    fn card_file(&self, name: &str) -> PathBuf {
        self.sysfs_path.join(name)
    }

    // Read one file and store the converted value in the given field
    fn ingest<F>(
        &mut self,
        errors: &mut Vec<InventoryError>,
        path: PathBuf,
        field: Field,
        convert: F,
    ) where
        F: FnOnce(&str) -> Result<AttributeValue, String>,
    {
        let text = match read_optional(&path) {
            Ok(Some(text)) => text,
            Ok(None) => return,
            Err(err) => {
                debug!("{err}");
                errors.push(err);
                return;
            }
        };

        let result = convert(&text)
            .map_err(|reason| {
                InventoryError::parse(field.name(), path.display().to_string(), reason)
            })
            .and_then(|value| Ok(self.attributes.set(field, value)?));

        if let Err(err) = result {
            errors.push(err);
        }
    }

    // Read an optional numeric bound, errors are collected
    fn read_bound(
        &self,
        errors: &mut Vec<InventoryError>,
        name: &str,
    ) -> Option<Measure> {
        let path = self.hwmon_file(name);

        match read_optional(&path) {
            Ok(Some(text)) => match micro(&text) {
                Ok(watts) => Some(Measure::new(watts, "")),
                Err(reason) => {
                    errors.push(InventoryError::parse(
                        Field::PowerCapRange.name(),
                        path.display().to_string(),
                        reason,
                    ));
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                errors.push(err);
                None
            }
        }
    }

    fn update_power(&mut self, errors: &mut Vec<InventoryError>) {
        let min = self.read_bound(errors, "power1_cap_min");
        let max = self.read_bound(errors, "power1_cap_max");
        if min.is_some() || max.is_some() {
            let range = RangePair { min, max };
            if let Err(err) = self.attributes.set(Field::PowerCapRange, range) {
                errors.push(err.into());
            }
        }

        let path = self.hwmon_file("power1_cap");
        self.ingest(errors, path, Field::PowerCap, |t| Ok(micro(t)?.into()));

        let path = self.hwmon_file("power1_average");
        self.ingest(errors, path, Field::Power, |t| Ok(micro(t)?.into()));
    }

    fn update_temp(&mut self, errors: &mut Vec<InventoryError>) {
        let path = self.hwmon_file("temp1_input");
        self.ingest(errors, path, Field::Temperature, |t| {
            Ok(milli(t)?.into())
        });
    }

    // The voltage channel is only trusted when its label names VddGFX
    fn update_voltage(&mut self, errors: &mut Vec<InventoryError>) {
        let label = match read_optional(&self.hwmon_file("in0_label")) {
            Ok(Some(label)) => label,
            Ok(None) => return,
            Err(err) => {
                errors.push(err);
                return;
            }
        };

        if first_line(&label) != VDDGFX_LABEL {
            debug!(
                "Voltage channel of card{} is \"{}\", not {VDDGFX_LABEL}",
                self.card_index,
                first_line(&label)
            );
            return;
        }

        let path = self.hwmon_file("in0_input");
        self.ingest(errors, path, Field::VddGfx, |t| Ok(parse_int(t)?.into()));
    }

    fn update_device_info(&mut self, errors: &mut Vec<InventoryError>) {
        let path = self.card_file("gpu_busy_percent");
        self.ingest(errors, path, Field::Loading, |t| Ok(parse_int(t)?.into()));

        let text_files = [
            ("current_link_speed", Field::LinkSpeed),
            ("current_link_width", Field::LinkWidth),
            ("vbios_version", Field::Vbios),
        ];
        for (name, field) in text_files {
            let path = self.card_file(name);
            self.ingest(errors, path, field, |t| Ok(first_line(t).into()));
        }
    }

    fn update_clocks(&mut self, errors: &mut Vec<InventoryError>) {
        let domains = [
            ("pp_dpm_sclk", Field::SclkPState, Field::SclkFrequency),
            ("pp_dpm_mclk", Field::MclkPState, Field::MclkFrequency),
        ];

        for (name, pstate_field, frequency_field) in domains {
            let path = self.card_file(name);

            let level = match read_optional(&path) {
                Ok(Some(text)) => parse_active_level(&text),
                Ok(None) => continue,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };

            match level {
                Ok(Some((index, frequency))) => {
                    let result = self
                        .attributes
                        .set(pstate_field, index)
                        .and_then(|_| {
                            self.attributes.set(frequency_field, frequency)
                        });
                    if let Err(err) = result {
                        errors.push(err.into());
                    }
                }
                Ok(None) => {
                    debug!("No active level in {}", path.display());
                }
                Err(reason) => errors.push(InventoryError::parse(
                    pstate_field.name(),
                    path.display().to_string(),
                    reason,
                )),
            }
        }
    }

    fn update_power_profile(&mut self, errors: &mut Vec<InventoryError>) {
        let path = self.card_file("pp_power_profile_mode");
        match read_optional(&path) {
            Ok(Some(text)) => match parse_active_profile(&text) {
                Some(mode) => {
                    if let Err(err) =
                        self.attributes.set(Field::PowerProfileMode, mode)
                    {
                        errors.push(err.into());
                    }
                }
                None => debug!("No active profile in {}", path.display()),
            },
            Ok(None) => {}
            Err(err) => errors.push(err),
        }

        self.update_forced_level(errors);
    }

    pub(crate) fn update_forced_level(
        &mut self,
        errors: &mut Vec<InventoryError>,
    ) {
        let path = self.card_file("power_dpm_force_performance_level");
        self.ingest(errors, path, Field::PowerDpmForce, |t| {
            Ok(first_line(t).into())
        });
    }
}
