//! Analytics commands: temperature difference between two devices and peak
//! total power consumption.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use shome_core::{DeviceId, Period, Quantity, ReadingRepository, ReadingService, SensorCatalog};

use super::util::{format_timestamp, parse_period};

#[derive(Debug, Args)]
pub struct TempDiffArgs {
    /// First device.
    #[arg(long)]
    pub device_a: String,

    /// Second device.
    #[arg(long)]
    pub device_b: String,

    /// Period start (RFC 3339, naive ISO 8601 in UTC, or e.g. "2 hours ago").
    #[arg(long)]
    pub start: String,

    /// Period end, inclusive.
    #[arg(long)]
    pub end: String,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct PeakPowerArgs {
    /// Period start (RFC 3339, naive ISO 8601 in UTC, or e.g. "2 hours ago").
    #[arg(long)]
    pub start: String,

    /// Period end, inclusive.
    #[arg(long)]
    pub end: String,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// JSON output structure.
#[derive(Debug, Serialize)]
struct JsonResult<'a> {
    query: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_a: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_b: Option<&'a str>,
    start: String,
    end: String,
    result: Option<Quantity>,
}

pub fn run_temp_diff<W, R, C>(
    writer: &mut W,
    service: &ReadingService<'_, R, C>,
    args: &TempDiffArgs,
) -> Result<Option<Quantity>>
where
    W: Write,
    R: ReadingRepository + ?Sized,
    C: SensorCatalog + ?Sized,
{
    let device_a = DeviceId::new(args.device_a.as_str()).context("invalid --device-a")?;
    let device_b = DeviceId::new(args.device_b.as_str()).context("invalid --device-b")?;
    let period = parse_period(&args.start, &args.end)?;

    let result = service
        .get_max_instant_temperature_difference_in_period(&device_a, &device_b, &period)
        .with_context(|| format!("temperature difference query failed for {device_a} and {device_b}"))?;

    if args.json {
        write_json(writer, &JsonResult {
            query: "max_temperature_difference",
            device_a: Some(device_a.as_str()),
            device_b: Some(device_b.as_str()),
            start: format_timestamp(period.start),
            end: format_timestamp(period.end),
            result,
        })?;
    } else {
        write_result(writer, result)?;
    }
    Ok(result)
}

pub fn run_peak_power<W, R, C>(
    writer: &mut W,
    service: &ReadingService<'_, R, C>,
    args: &PeakPowerArgs,
) -> Result<Option<Quantity>>
where
    W: Write,
    R: ReadingRepository + ?Sized,
    C: SensorCatalog + ?Sized,
{
    let period: Period = parse_period(&args.start, &args.end)?;

    let result = service
        .get_peak_power_consumption_in_period(&period)
        .context("peak power query failed")?;

    if args.json {
        write_json(writer, &JsonResult {
            query: "peak_power_consumption",
            device_a: None,
            device_b: None,
            start: format_timestamp(period.start),
            end: format_timestamp(period.end),
            result,
        })?;
    } else {
        write_result(writer, result)?;
    }
    Ok(result)
}

fn write_result<W: Write>(writer: &mut W, result: Option<Quantity>) -> Result<()> {
    match result {
        Some(quantity) => writeln!(writer, "{quantity}")?,
        None => writeln!(writer, "no data")?,
    }
    Ok(())
}

fn write_json<W: Write>(writer: &mut W, output: &JsonResult<'_>) -> Result<()> {
    writeln!(writer, "{}", serde_json::to_string_pretty(output)?)?;
    Ok(())
}
