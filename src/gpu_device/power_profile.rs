use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    errors::InventoryError,
    gpu_device::attributes::{AttributeStore, Field},
};

// Index of the synthetic profile used when the driver picks the mode itself
pub const AUTO_PROFILE_INDEX: i32 = -1;
const AUTO_PROFILE_NAME: &str = "AUTO";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerProfile {
    pub name: String,
    pub description: String,
}

// Catalog of the power profile modes a card offers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerProfileCatalog {
    pub profiles: BTreeMap<i32, PowerProfile>,
    // Index flagged with '*' by the driver when the table was read
    pub active: Option<i32>,
}

impl Default for PowerProfileCatalog {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            AUTO_PROFILE_INDEX,
            PowerProfile {
                name: AUTO_PROFILE_NAME.to_string(),
                description: "Auto".to_string(),
            },
        );

        Self {
            profiles,
            active: None,
        }
    }
}

impl PowerProfileCatalog {
    pub fn get(&self, index: i32) -> Option<&PowerProfile> {
        self.profiles.get(&index)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// Parse pp_power_profile_mode.
// Only "<index> <NAME>[ ][*]: <columns...>" lines are entries, headers and
// the per clock continuation lines of newer tables are skipped
pub fn parse_power_profile_modes(text: &str) -> PowerProfileCatalog {
    let mut catalog = PowerProfileCatalog::default();

    for line in text.lines() {
        let Some((head, columns)) = line.split_once(':') else {
            continue;
        };

        let head = head.trim_end();
        let active = head.ends_with('*');
        let head = head.trim_end_matches('*');

        let mut tokens = head.split_whitespace();
        let (Some(index), Some(name)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let Ok(index) = index.parse::<i32>() else {
            continue;
        };

        let description = columns.split_whitespace().collect::<Vec<_>>().join(" ");

        if active {
            catalog.active = Some(index);
        }
        catalog.profiles.insert(
            index,
            PowerProfile {
                name: name.to_string(),
                description,
            },
        );
    }

    catalog
}

// Extract the "N-NAME" label of the active mode from pp_power_profile_mode
pub fn parse_active_profile(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (mode, _) = line.trim().split_once("*:")?;

        Some(mode.split_whitespace().collect::<Vec<_>>().join("-"))
    })
}

// Return the current power profile as (index, name),
// a forced "auto" performance level maps to the synthetic AUTO profile
pub fn current_power_profile(
    attributes: &AttributeStore,
) -> Result<(i32, String), InventoryError> {
    let forced = attributes.text(Field::PowerDpmForce).unwrap_or_default();
    if forced.eq_ignore_ascii_case("auto") {
        return Ok((AUTO_PROFILE_INDEX, AUTO_PROFILE_NAME.to_string()));
    }

    let mode = attributes.text(Field::PowerProfileMode).ok_or_else(|| {
        InventoryError::parse(
            "power profile",
            Field::PowerProfileMode.name(),
            "no active profile",
        )
    })?;

    let (index, name) = mode.split_once('-').ok_or_else(|| {
        InventoryError::parse(
            "power profile",
            Field::PowerProfileMode.name(),
            format!("\"{mode}\" is not INDEX-NAME"),
        )
    })?;

    let index = index.parse::<i32>().map_err(|e| {
        InventoryError::parse("power profile", Field::PowerProfileMode.name(), e)
    })?;

    Ok((index, name.to_string()))
}
