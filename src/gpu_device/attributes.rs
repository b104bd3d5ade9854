// Fixed-schema storage for the normalized metrics of one GPU.
//
// Every field is declared up front in `Field` with its value kind,
// its "unset" sentinel and its presentation label. The store is created
// with every field at its sentinel, so consumers can always enumerate the
// complete field set.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::errors::AttributeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Text,
    Range,
}

impl ValueKind {
    fn name(self) -> &'static str {
        match self {
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::Range => "range",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    CardNum,
    BusAddress,
    Driver,
    Model,
    ModelShort,
    CardPath,
    HwmonPath,
    Power,
    PowerCap,
    PowerCapRange,
    Temperature,
    VddGfx,
    VddcRange,
    Loading,
    LinkSpeed,
    LinkWidth,
    Vbios,
    SclkPState,
    SclkFrequency,
    SclkRange,
    MclkPState,
    MclkFrequency,
    MclkRange,
    PowerProfileMode,
    PowerDpmForce,
}

impl Field {
    // Declaration order, also the order of the detail dump
    pub const ALL: [Field; 25] = [
        Field::CardNum,
        Field::BusAddress,
        Field::Driver,
        Field::Model,
        Field::ModelShort,
        Field::CardPath,
        Field::HwmonPath,
        Field::Power,
        Field::PowerCap,
        Field::PowerCapRange,
        Field::Temperature,
        Field::VddGfx,
        Field::VddcRange,
        Field::Loading,
        Field::LinkSpeed,
        Field::LinkWidth,
        Field::Vbios,
        Field::SclkPState,
        Field::SclkFrequency,
        Field::SclkRange,
        Field::MclkPState,
        Field::MclkFrequency,
        Field::MclkRange,
        Field::PowerProfileMode,
        Field::PowerDpmForce,
    ];

    // Stable machine name, used by the name based API and the JSON output
    pub fn name(self) -> &'static str {
        match self {
            Field::CardNum => "card_num",
            Field::BusAddress => "pcie_id",
            Field::Driver => "driver",
            Field::Model => "model",
            Field::ModelShort => "model_short",
            Field::CardPath => "card_path",
            Field::HwmonPath => "hwmon_path",
            Field::Power => "power",
            Field::PowerCap => "power_cap",
            Field::PowerCapRange => "power_cap_range",
            Field::Temperature => "temp",
            Field::VddGfx => "vddgfx",
            Field::VddcRange => "vddc_range",
            Field::Loading => "loading",
            Field::LinkSpeed => "link_spd",
            Field::LinkWidth => "link_wth",
            Field::Vbios => "vbios",
            Field::SclkPState => "sclk_ps",
            Field::SclkFrequency => "sclk_f",
            Field::SclkRange => "sclk_f_range",
            Field::MclkPState => "mclk_ps",
            Field::MclkFrequency => "mclk_f",
            Field::MclkRange => "mclk_f_range",
            Field::PowerProfileMode => "ppm",
            Field::PowerDpmForce => "power_dpm_force",
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            Field::CardNum
            | Field::VddGfx
            | Field::Loading
            | Field::SclkPState
            | Field::MclkPState => ValueKind::Int,

            Field::Power | Field::PowerCap | Field::Temperature => {
                ValueKind::Float
            }

            Field::PowerCapRange
            | Field::VddcRange
            | Field::SclkRange
            | Field::MclkRange => ValueKind::Range,

            Field::BusAddress
            | Field::Driver
            | Field::Model
            | Field::ModelShort
            | Field::CardPath
            | Field::HwmonPath
            | Field::LinkSpeed
            | Field::LinkWidth
            | Field::Vbios
            | Field::SclkFrequency
            | Field::MclkFrequency
            | Field::PowerProfileMode
            | Field::PowerDpmForce => ValueKind::Text,
        }
    }

    // Human friendly label used by the detail dump
    pub fn label(self) -> &'static str {
        match self {
            Field::CardNum => "Card Number",
            Field::BusAddress => "PCIe ID",
            Field::Driver => "Driver",
            Field::Model => "Card Model",
            Field::ModelShort => "Short Card Model",
            Field::CardPath => "Card Path",
            Field::HwmonPath => "HWmon",
            Field::Power => "Current Power (W)",
            Field::PowerCap => "Power Cap (W)",
            Field::PowerCapRange => "Power Cap Range (W)",
            Field::Temperature => "Current Temp (C)",
            Field::VddGfx => "Current VddGFX (mV)",
            Field::VddcRange => "Vddc Range",
            Field::Loading => "Current Loading (%)",
            Field::LinkSpeed => "Link Speed",
            Field::LinkWidth => "Link Width",
            Field::Vbios => "vBIOS Version",
            Field::SclkPState => "Current SCLK P-State",
            Field::SclkFrequency => "Current SCLK",
            Field::SclkRange => "SCLK Range",
            Field::MclkPState => "Current MCLK P-State",
            Field::MclkFrequency => "Current MCLK",
            Field::MclkRange => "MCLK Range",
            Field::PowerProfileMode => "Power Performance Mode",
            Field::PowerDpmForce => "Power Force Performance Level",
        }
    }

    // Compact label for the table column header
    pub fn short_label(self) -> &'static str {
        match self {
            Field::ModelShort => "Model",
            Field::Loading => "Load %",
            Field::Power => "Power (W)",
            Field::PowerCap => "Power Cap (W)",
            Field::Temperature => "T (C)",
            Field::VddGfx => "VddGFX (mV)",
            Field::SclkFrequency => "Sclk (MHz)",
            Field::SclkPState => "Sclk Pstate",
            Field::MclkFrequency => "Mclk (MHz)",
            Field::MclkPState => "Mclk Pstate",
            Field::PowerProfileMode => "Perf Mode",
            other => other.label(),
        }
    }

    pub fn sentinel(self) -> AttributeValue {
        match self.kind() {
            ValueKind::Int => AttributeValue::Int(-1),
            ValueKind::Float => AttributeValue::Float(-1.),
            ValueKind::Text => AttributeValue::Text(String::new()),
            ValueKind::Range => AttributeValue::Range(RangePair::unset()),
        }
    }
}

impl FromStr for Field {
    type Err = AttributeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.name() == name)
            .ok_or_else(|| AttributeError::UnknownField(name.to_string()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// A number with an optional unit suffix as printed by the driver,
// e.g. "300Mhz" or "750mV"
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measure {
    pub value: f64,
    pub unit: String,
}

impl Measure {
    pub fn new(value: f64, unit: &str) -> Self {
        Self {
            value,
            unit: unit.to_string(),
        }
    }
}

impl FromStr for Measure {
    type Err = String;

    // Split the leading numeric part from the unit suffix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);

        let value = number
            .parse::<f64>()
            .map_err(|_| format!("\"{s}\" has no numeric value"))?;

        Ok(Self::new(value, unit.trim()))
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}

// Ordered (min, max) pair, a bound is None until a reader populates it
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RangePair {
    pub min: Option<Measure>,
    pub max: Option<Measure>,
}

impl RangePair {
    pub fn new(min: Measure, max: Measure) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn unset() -> Self {
        Self::default()
    }

    // Numeric bounds with units stripped, only when both are populated
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => Some((min.value, max.value)),
            _ => None,
        }
    }

    pub fn contains(&self, candidate: f64) -> bool {
        self.bounds()
            .is_some_and(|(min, max)| min <= candidate && candidate <= max)
    }
}

impl fmt::Display for RangePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |bound: &Option<Measure>| {
            bound.as_ref().map(Measure::to_string).unwrap_or_default()
        };

        write!(f, "[{}, {}]", show(&self.min), show(&self.max))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Text(String),
    Range(RangePair),
}

impl AttributeValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            AttributeValue::Int(_) => ValueKind::Int,
            AttributeValue::Float(_) => ValueKind::Float,
            AttributeValue::Text(_) => ValueKind::Text,
            AttributeValue::Range(_) => ValueKind::Range,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Text(v) => f.write_str(v),
            AttributeValue::Range(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<RangePair> for AttributeValue {
    fn from(value: RangePair) -> Self {
        AttributeValue::Range(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeStore {
    values: BTreeMap<Field, AttributeValue>,
}

impl Default for AttributeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeStore {
    // Create a store with every declared field at its sentinel
    pub fn new() -> Self {
        let values = Field::ALL
            .iter()
            .map(|field| (*field, field.sentinel()))
            .collect();

        Self { values }
    }

    // Fresh store holding the identity fields fixed at discovery
    pub fn with_identity(card_index: u32, card_path: &Path, hwmon_path: &Path) -> Self {
        let mut store = Self::new();

        store
            .values
            .insert(Field::CardNum, AttributeValue::Int(i64::from(card_index)));
        store.values.insert(
            Field::CardPath,
            AttributeValue::Text(card_path.display().to_string()),
        );
        store.values.insert(
            Field::HwmonPath,
            AttributeValue::Text(hwmon_path.display().to_string()),
        );

        store
    }

    // Overwrite a field, the value must match the declared kind
    pub fn set(
        &mut self,
        field: Field,
        value: impl Into<AttributeValue>,
    ) -> Result<(), AttributeError> {
        let value = value.into();

        if value.kind() != field.kind() {
            return Err(AttributeError::KindMismatch {
                field: field.name(),
                expected: field.kind().name(),
            });
        }

        self.values.insert(field, value);

        Ok(())
    }

    pub fn set_by_name(
        &mut self,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<(), AttributeError> {
        self.set(name.parse()?, value)
    }

    pub fn get(&self, field: Field) -> AttributeValue {
        self.values
            .get(&field)
            .cloned()
            .unwrap_or_else(|| field.sentinel())
    }

    pub fn get_by_name(
        &self,
        name: &str,
    ) -> Result<AttributeValue, AttributeError> {
        Ok(self.get(name.parse()?))
    }

    pub fn reset(&mut self, field: Field) {
        self.values.insert(field, field.sentinel());
    }

    pub fn is_set(&self, field: Field) -> bool {
        self.get(field) != field.sentinel()
    }

    // Typed accessors, None while the field holds its sentinel

    pub fn int(&self, field: Field) -> Option<i64> {
        match self.values.get(&field) {
            Some(AttributeValue::Int(v)) if *v != -1 => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, field: Field) -> Option<f64> {
        match self.values.get(&field) {
            Some(AttributeValue::Float(v)) if *v != -1. => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        match self.values.get(&field) {
            Some(AttributeValue::Text(v)) if !v.is_empty() => Some(v),
            _ => None,
        }
    }

    pub fn range(&self, field: Field) -> Option<&RangePair> {
        match self.values.get(&field) {
            Some(AttributeValue::Range(v)) => Some(v),
            _ => None,
        }
    }

    // True iff both bounds of the range field are populated
    // and the candidate lies between them
    pub fn is_valid_range(&self, candidate: f64, range_field: Field) -> bool {
        self.range(range_field)
            .is_some_and(|range| range.contains(candidate))
    }

    pub fn is_valid_power_cap(&self, watts: f64) -> bool {
        self.is_valid_range(watts, Field::PowerCapRange)
    }

    // Iterate over every field in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (Field, &AttributeValue)> {
        Field::ALL
            .iter()
            .filter_map(|field| self.values.get(field).map(|v| (*field, v)))
    }
}

impl Serialize for AttributeStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field.name(), value)?;
        }
        map.end()
    }
}

// Fixed human readable label of a field
pub fn field_label(field: Field) -> &'static str {
    field.label()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_field_has_a_label() {
        for field in Field::ALL {
            assert!(!field_label(field).is_empty(), "{field} has no label");
            assert!(!field.short_label().is_empty());
        }
    }

    #[test]
    fn field_names_round_trip_and_are_unique() {
        for field in Field::ALL {
            assert_eq!(field.name().parse::<Field>(), Ok(field));
        }

        let mut names: Vec<_> = Field::ALL.iter().map(|f| f.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Field::ALL.len());
    }

    #[test]
    fn unknown_field_is_a_configuration_error() {
        let mut store = AttributeStore::new();

        for name in ["", "powr", "uuid", "POWER", "clinfo"] {
            assert_eq!(
                store.set_by_name(name, 1_i64),
                Err(AttributeError::UnknownField(name.to_string()))
            );
            assert!(store.get_by_name(name).is_err());
        }
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let mut store = AttributeStore::new();

        let err = store.set(Field::Power, "150").unwrap_err();
        assert_eq!(
            err,
            AttributeError::KindMismatch {
                field: "power",
                expected: "float"
            }
        );
        assert_eq!(store.get(Field::Power), AttributeValue::Float(-1.));
    }

    #[test]
    fn unset_fields_return_their_sentinel() {
        let store = AttributeStore::new();

        for field in Field::ALL {
            assert_eq!(store.get(field), field.sentinel());
            assert!(!store.is_set(field));
        }
        assert_eq!(store.get(Field::Loading), AttributeValue::Int(-1));
        assert_eq!(
            store.get(Field::Driver),
            AttributeValue::Text(String::new())
        );
        assert_eq!(store.int(Field::Loading), None);
        assert_eq!(store.text(Field::Driver), None);
    }

    #[test]
    fn set_overwrites_unconditionally() {
        let mut store = AttributeStore::new();

        store.set_by_name("loading", 10_i64).unwrap();
        store.set(Field::Loading, 55_i64).unwrap();
        assert_eq!(store.int(Field::Loading), Some(55));

        store.reset(Field::Loading);
        assert_eq!(store.get(Field::Loading), AttributeValue::Int(-1));
    }

    #[test]
    fn measure_parsing_strips_units() {
        assert_eq!("300Mhz".parse::<Measure>(), Ok(Measure::new(300., "Mhz")));
        assert_eq!(" 750mV ".parse::<Measure>(), Ok(Measure::new(750., "mV")));
        assert_eq!("1000".parse::<Measure>(), Ok(Measure::new(1000., "")));
        assert!("Mhz".parse::<Measure>().is_err());
        assert_eq!(Measure::new(300., "Mhz").to_string(), "300Mhz");
    }

    #[test]
    fn range_validation_requires_both_bounds() {
        let mut store = AttributeStore::new();
        assert!(!store.is_valid_range(500., Field::SclkRange));

        let half = RangePair {
            min: Some(Measure::new(300., "Mhz")),
            max: None,
        };
        store.set(Field::SclkRange, half).unwrap();
        assert!(!store.is_valid_range(500., Field::SclkRange));

        let half = RangePair {
            min: None,
            max: Some(Measure::new(1000., "Mhz")),
        };
        store.set(Field::SclkRange, half).unwrap();
        assert!(!store.is_valid_range(500., Field::SclkRange));
    }

    #[test]
    fn range_validation_is_inclusive() {
        let cases = [
            (300., 1000., 300., true),
            (300., 1000., 1000., true),
            (300., 1000., 650., true),
            (300., 1000., 299.9, false),
            (300., 1000., 1000.5, false),
            (0., 0., 0., true),
            (500., 100., 300., false),
        ];

        for (min, max, candidate, expected) in cases {
            let mut store = AttributeStore::new();
            store
                .set(
                    Field::MclkRange,
                    RangePair::new(
                        Measure::new(min, "Mhz"),
                        Measure::new(max, "Mhz"),
                    ),
                )
                .unwrap();

            assert_eq!(
                store.is_valid_range(candidate, Field::MclkRange),
                expected,
                "{candidate} in [{min}, {max}]"
            );
        }
    }

    #[test]
    fn non_range_field_is_never_a_valid_range() {
        let mut store = AttributeStore::new();
        store.set(Field::Power, 100.).unwrap();
        assert!(!store.is_valid_range(100., Field::Power));
    }

    #[test]
    fn power_cap_uses_its_range() {
        let mut store = AttributeStore::new();
        store
            .set(
                Field::PowerCapRange,
                RangePair::new(Measure::new(0., ""), Measure::new(180., "")),
            )
            .unwrap();

        assert!(store.is_valid_power_cap(150.));
        assert!(!store.is_valid_power_cap(200.));
    }

    #[test]
    fn sentinels_display_as_is() {
        let store = AttributeStore::new();
        assert_eq!(store.get(Field::Power).to_string(), "-1");
        assert_eq!(store.get(Field::SclkPState).to_string(), "-1");
        assert_eq!(store.get(Field::VddcRange).to_string(), "[, ]");
        assert_eq!(store.get(Field::Model).to_string(), "");
    }

    #[test]
    fn serializes_every_field_by_name() {
        let mut store = AttributeStore::new();
        store.set(Field::Driver, "amdgpu").unwrap();

        let json = serde_json::to_value(&store).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), Field::ALL.len());
        assert_eq!(object["driver"], "amdgpu");
        assert_eq!(object["loading"], -1);
    }
}
