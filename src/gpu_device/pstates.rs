use std::collections::BTreeMap;

use serde::Serialize;
use tracing::trace;

use crate::{
    errors::InventoryError,
    gpu_device::attributes::{AttributeStore, Field, Measure, RangePair},
};

const SCLK_HEADER: &str = "OD_SCLK:";
const MCLK_HEADER: &str = "OD_MCLK:";
const RANGE_HEADER: &str = "OD_RANGE:";
const VDDC_CURVE_HEADER: &str = "OD_VDDC_CURVE:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ClockDomain {
    Core,
    Memory,
}

impl ClockDomain {
    // Attribute field holding the tunable range of this domain
    pub fn range_field(self) -> Field {
        match self {
            ClockDomain::Core => Field::SclkRange,
            ClockDomain::Memory => Field::MclkRange,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ClockDomain::Core => "SCLK",
            ClockDomain::Memory => "MCLK",
        }
    }
}

// One operating point of a clock domain ladder.
// Newer tables list the clock alone and keep voltages in a separate curve
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PState {
    pub frequency: Measure,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<Measure>,
}

impl PState {
    pub fn new(frequency: Measure, voltage: Measure) -> Self {
        Self {
            frequency,
            voltage: Some(voltage),
        }
    }

    pub fn frequency_only(frequency: Measure) -> Self {
        Self {
            frequency,
            voltage: None,
        }
    }
}

// Full tunable ladder reported by the driver, one map per clock domain
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PStateLadder {
    pub core: BTreeMap<u32, PState>,
    pub memory: BTreeMap<u32, PState>,
}

impl PStateLadder {
    pub fn domain(&self, domain: ClockDomain) -> &BTreeMap<u32, PState> {
        match domain {
            ClockDomain::Core => &self.core,
            ClockDomain::Memory => &self.memory,
        }
    }

    fn domain_mut(&mut self, domain: ClockDomain) -> &mut BTreeMap<u32, PState> {
        match domain {
            ClockDomain::Core => &mut self.core,
            ClockDomain::Memory => &mut self.memory,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty() && self.memory.is_empty()
    }
}

// Result of parsing a pp_od_clk_voltage dump
#[derive(Debug, Default)]
pub struct OdClockTable {
    pub ladder: PStateLadder,
    pub ranges: Vec<(Field, RangePair)>,
    pub errors: Vec<InventoryError>,
}

// Part of the table the parser is in
#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Start,
    Ladder(ClockDomain),
    // Voltage curve points, not P-states
    Curve,
    Range,
}

// Parse the overdrive clock/voltage table.
// Section headers switch the current clock domain, the voltage curve or
// the range section, unknown headers leave the section untouched.
// Malformed lines are reported and skipped
pub fn parse_od_clk_voltage(text: &str, origin: &str) -> OdClockTable {
    let mut table = OdClockTable::default();

    let mut section = Section::Start;

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("OD_") && line.ends_with(':') {
            match line {
                SCLK_HEADER => section = Section::Ladder(ClockDomain::Core),
                MCLK_HEADER => section = Section::Ladder(ClockDomain::Memory),
                VDDC_CURVE_HEADER => section = Section::Curve,
                RANGE_HEADER => section = Section::Range,
                other => trace!("Ignoring section header {other} in {origin}"),
            }

            continue;
        }

        let what = format!("clock table line {}", number + 1);
        let tokens: Vec<&str> = line.split_whitespace().collect();

        let domain = match section {
            Section::Ladder(domain) => domain,
            Section::Curve => {
                trace!("Skipping voltage curve point \"{line}\" in {origin}");
                continue;
            }
            Section::Start => {
                table.errors.push(InventoryError::parse(
                    what,
                    origin,
                    "ladder entry outside of a clock section",
                ));
                continue;
            }
            Section::Range => {
                parse_range_line(&mut table, &tokens, what, origin);
                continue;
            }
        };

        let index = tokens[0].trim_end_matches(':').parse::<u32>();

        match (index, parse_ladder_entry(&tokens)) {
            (Ok(index), Ok((frequency, voltage))) => {
                table
                    .ladder
                    .domain_mut(domain)
                    .insert(index, PState { frequency, voltage });
            }
            (Err(_), _) => table.errors.push(InventoryError::parse(
                what,
                origin,
                format!("invalid P-state index \"{}\"", tokens[0]),
            )),
            (_, Err(reason)) => {
                table.errors.push(InventoryError::parse(what, origin, reason))
            }
        }
    }

    table
}

fn parse_range_line(
    table: &mut OdClockTable,
    tokens: &[&str],
    what: String,
    origin: &str,
) {
    let field = match tokens[0] {
        "SCLK:" => Field::SclkRange,
        "MCLK:" => Field::MclkRange,
        "VDDC:" => Field::VddcRange,
        other => {
            trace!("Ignoring range entry {other} in {origin}");
            return;
        }
    };

    match parse_pair(tokens) {
        Ok((min, max)) => table.ranges.push((field, RangePair::new(min, max))),
        Err(reason) => {
            table.errors.push(InventoryError::parse(what, origin, reason))
        }
    }
}

// Parse the two values following the leading key of a table line
fn parse_pair(tokens: &[&str]) -> Result<(Measure, Measure), String> {
    if tokens.len() < 3 {
        return Err(format!("expected 3 columns, found {}", tokens.len()));
    }

    Ok((tokens[1].parse()?, tokens[2].parse()?))
}

// "N: <clock>" or "N: <clock> <voltage>"
fn parse_ladder_entry(tokens: &[&str]) -> Result<(Measure, Option<Measure>), String> {
    match tokens {
        [_, frequency] => Ok((frequency.parse()?, None)),
        [_, frequency, voltage] => Ok((frequency.parse()?, Some(voltage.parse()?))),
        _ => Err(format!("expected 2 or 3 columns, found {}", tokens.len())),
    }
}

// A P-state is valid when its frequency lies within the range of its
// clock domain and its voltage, when it has one, within the VDDC range
pub fn is_valid_pstate(
    attributes: &AttributeStore,
    pstate: &PState,
    domain: ClockDomain,
) -> bool {
    attributes.is_valid_range(pstate.frequency.value, domain.range_field())
        && pstate.voltage.as_ref().is_none_or(|voltage| {
            attributes.is_valid_range(voltage.value, Field::VddcRange)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLARIS: &str = "\
OD_SCLK:
0:        300Mhz        750mV
1:        900Mhz        900mV
OD_MCLK:
0:        300Mhz        800mV
1:       1750Mhz        950mV
OD_RANGE:
SCLK:     300Mhz       1000Mhz
MCLK:     300Mhz       2000Mhz
VDDC:     700mV        1000mV
";

    fn attributes_from(table: &OdClockTable) -> AttributeStore {
        let mut attributes = AttributeStore::new();
        for (field, range) in &table.ranges {
            attributes.set(*field, range.clone()).unwrap();
        }
        attributes
    }

    #[test]
    fn parses_ladders_and_ranges() {
        let table = parse_od_clk_voltage(POLARIS, "test");

        assert!(table.errors.is_empty(), "{:?}", table.errors);
        assert_eq!(table.ladder.core.len(), 2);
        assert_eq!(table.ladder.memory.len(), 2);
        assert_eq!(
            table.ladder.core[&1],
            PState::new(Measure::new(900., "Mhz"), Measure::new(900., "mV"))
        );
        assert_eq!(
            table.ladder.memory[&1].frequency,
            Measure::new(1750., "Mhz")
        );

        let attributes = attributes_from(&table);
        assert_eq!(
            attributes.range(Field::VddcRange).unwrap().bounds(),
            Some((700., 1000.))
        );
        assert_eq!(
            attributes.get(Field::SclkRange).to_string(),
            "[300Mhz, 1000Mhz]"
        );
    }

    #[test]
    fn validates_pstates_against_ranges() {
        let text = "\
OD_SCLK:
0: 300Mhz 750mV
1: 900Mhz 900mV
OD_RANGE:
SCLK: 300Mhz 1000Mhz
VDDC: 700mV 1000mV
";
        let table = parse_od_clk_voltage(text, "test");
        let attributes = attributes_from(&table);

        let pstate = &table.ladder.core[&1];
        assert!(is_valid_pstate(&attributes, pstate, ClockDomain::Core));

        let over_volted =
            PState::new(Measure::new(950., "Mhz"), Measure::new(1100., "mV"));
        assert!(!is_valid_pstate(&attributes, &over_volted, ClockDomain::Core));

        let over_clocked =
            PState::new(Measure::new(1050., "Mhz"), Measure::new(900., "mV"));
        assert!(!is_valid_pstate(
            &attributes,
            &over_clocked,
            ClockDomain::Core
        ));

        // No MCLK range was reported
        assert!(!is_valid_pstate(&attributes, pstate, ClockDomain::Memory));
    }

    #[test]
    fn malformed_lines_are_reported_and_skipped() {
        let text = "\
0: 200Mhz 700mV
OD_SCLK:
0: 300Mhz 750mV
x: 400Mhz 800mV
2:
3: fastMhz 900mV
";
        let table = parse_od_clk_voltage(text, "test");

        assert_eq!(table.ladder.core.len(), 1);
        assert_eq!(table.errors.len(), 4);
        assert!(
            table
                .errors
                .iter()
                .all(|e| matches!(e, InventoryError::Parse { .. }))
        );
    }

    #[test]
    fn unknown_headers_keep_the_current_section() {
        let text = "\
OD_MCLK:
0: 300Mhz 800mV
OD_EXTRA:
1: 900Mhz 900mV
OD_RANGE:
VDDC: 700mV 1000mV
OD_SCLK:
0: 300Mhz 750mV
";
        let table = parse_od_clk_voltage(text, "test");

        assert!(table.errors.is_empty());
        assert_eq!(table.ladder.memory.len(), 2);
        assert_eq!(table.ladder.core.len(), 1);
        assert_eq!(table.ranges.len(), 1);
    }

    #[test]
    fn clock_only_ladders_skip_the_voltage_curve() {
        let text = "\
OD_SCLK:
0: 800Mhz
1: 2100Mhz
OD_MCLK:
1: 875MHz
OD_VDDC_CURVE:
0: 800MHz 711mV
1: 1450MHz 730mV
2: 2100MHz 1037mV
OD_RANGE:
SCLK:     800Mhz       2150Mhz
MCLK:     625Mhz        950Mhz
VDDC_CURVE_SCLK[0]:     800Mhz       2150Mhz
VDDC_CURVE_VOLT[0]:     750mV        1200mV
";
        let table = parse_od_clk_voltage(text, "test");

        assert!(table.errors.is_empty(), "{:?}", table.errors);
        assert_eq!(table.ladder.core.len(), 2);
        assert_eq!(
            table.ladder.core[&1],
            PState::frequency_only(Measure::new(2100., "Mhz"))
        );
        assert_eq!(table.ladder.memory.len(), 1);
        assert_eq!(
            table.ladder.memory[&1].frequency,
            Measure::new(875., "MHz")
        );

        // Without a VDDC range only the clock is checked
        let attributes = attributes_from(&table);
        assert!(is_valid_pstate(
            &attributes,
            &table.ladder.core[&1],
            ClockDomain::Core
        ));
        let over_clocked = PState::frequency_only(Measure::new(2200., "Mhz"));
        assert!(!is_valid_pstate(
            &attributes,
            &over_clocked,
            ClockDomain::Core
        ));
    }
}
