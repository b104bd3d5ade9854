// Console rendering of the fleet. Values are printed as stored, an unset
// field shows its sentinel

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    devices_manager::TABLE_PARAMETERS,
    env_check::EnvReport,
    gpu_device::{
        DeviceRecord,
        attributes::{Field, Measure},
        gpu_info::Capability,
        pstates::{ClockDomain, PState},
    },
};

const CELL_WIDTH: usize = 12;

fn cell(text: &str) -> String {
    format!("{text:<CELL_WIDTH$.CELL_WIDTH$}")
}

fn rule(records: usize, left: &str, middle: &str, right: &str) -> String {
    let line = "─".repeat(CELL_WIDTH);
    let mut rule = format!("{left}{line}");
    for _ in 0..records {
        rule.push_str(middle);
        rule.push_str(&line);
    }
    rule.push_str(right);

    rule
}

fn row<'a>(label: &str, cells: impl Iterator<Item = &'a str>) -> String {
    let mut row = format!("│{}", cell(label));
    for text in cells {
        row.push('│');
        row.push_str(&cell(text));
    }
    row.push('│');

    row
}

// One column per card, one row per table field
pub fn write_table<W: Write>(out: &mut W, records: &[DeviceRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let count = records.len();
    let names: Vec<String> =
        records.iter().map(|r| format!("card{}", r.card_index())).collect();

    let mut lines = vec![
        rule(count, "┌", "┬", "┐"),
        row("Card #", names.iter().map(String::as_str)),
        rule(count, "├", "┼", "┤"),
    ];

    for field in TABLE_PARAMETERS {
        let values: Vec<String> = records
            .iter()
            .map(|r| r.attributes().get(field).to_string())
            .collect();
        lines.push(row(field.short_label(), values.iter().map(String::as_str)));
    }
    lines.push(rule(count, "└", "┴", "┘"));

    for line in lines {
        writeln!(out, "{line}").with_context(|| "Failed to write the table")?;
    }

    Ok(())
}

// Every field of a card with its label, optionally its OpenCL capabilities
pub fn write_details<W: Write>(
    out: &mut W,
    record: &DeviceRecord,
    with_capabilities: bool,
) -> Result<()> {
    writeln!(out, "UUID: {}", record.identity().simple())?;

    for (field, value) in record.attributes().iter() {
        writeln!(out, "{}: {value}", field.label())?;
    }

    if with_capabilities {
        for capability in Capability::ALL {
            writeln!(
                out,
                "{}: {}",
                capability.label(),
                record.capability(capability).unwrap_or_default()
            )?;
        }
    }

    if let Some(fault) = record.fault() {
        writeln!(out, "Fault: {fault}")?;
    }
    writeln!(out)?;

    Ok(())
}

// Core and memory ladders side by side, joined on the P-state index
pub fn write_pstates<W: Write>(out: &mut W, record: &DeviceRecord) -> Result<()> {
    let ladder = record.pstates();
    let memory = ladder.domain(ClockDomain::Memory);

    writeln!(out, "Card: {}", record.sysfs_path().display())?;
    writeln!(out, "SCLK:{:19}MCLK:", "")?;

    for (index, pstate) in ladder.domain(ClockDomain::Core) {
        write!(
            out,
            "{index}:  {:<8}  {:<8}",
            pstate.frequency.to_string(),
            voltage_cell(pstate)
        )?;

        match memory.get(index) {
            Some(mclk) => writeln!(
                out,
                "  {index}:  {:<8}  {:<8}",
                mclk.frequency.to_string(),
                voltage_cell(mclk)
            )?,
            None => writeln!(out)?,
        }
    }
    writeln!(out)?;

    Ok(())
}

// Clock-only P-states leave the voltage column blank
fn voltage_cell(pstate: &PState) -> String {
    pstate
        .voltage
        .as_ref()
        .map(Measure::to_string)
        .unwrap_or_default()
}

pub fn write_power_profiles<W: Write>(
    out: &mut W,
    record: &DeviceRecord,
) -> Result<()> {
    writeln!(out, "Card: {}", record.sysfs_path().display())?;
    writeln!(
        out,
        "Power Performance Mode: {}",
        record.attributes().get(Field::PowerDpmForce)
    )?;

    for (index, profile) in &record.power_profiles().profiles {
        write!(out, "{index:>3}: {:>15}", profile.name)?;
        for column in profile.description.split_whitespace() {
            write!(out, "{column:>18}")?;
        }
        writeln!(out)?;
    }
    writeln!(out)?;

    Ok(())
}

#[derive(Serialize)]
struct Snapshot<'a> {
    version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<&'a EnvReport>,
    gpus: &'a [DeviceRecord],
}

pub fn write_json<W: Write>(
    out: &mut W,
    records: &[DeviceRecord],
    environment: Option<&EnvReport>,
) -> Result<()> {
    let snapshot = Snapshot {
        version: env!("CARGO_PKG_VERSION"),
        environment,
        gpus: records,
    };

    serde_json::to_writer_pretty(&mut *out, &snapshot)
        .with_context(|| "Failed to write the Json snapshot")?;
    writeln!(out)?;

    Ok(())
}
