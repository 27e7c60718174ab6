//! Readings command: every reading of a device within a period.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use shome_core::{DeviceId, Reading, ReadingRepository, ReadingService, SensorCatalog};

use super::util::{display_value, format_timestamp, parse_period};

#[derive(Debug, Args)]
pub struct ReadingsArgs {
    /// Device whose sensors are queried.
    #[arg(long)]
    pub device: String,

    /// Period start (RFC 3339, naive ISO 8601 in UTC, or e.g. "2 hours ago").
    #[arg(long)]
    pub start: String,

    /// Period end, inclusive.
    #[arg(long)]
    pub end: String,

    /// Print reading IDs only.
    #[arg(long)]
    pub ids: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct JsonReading<'a> {
    id: &'a str,
    sensor_id: &'a str,
    timestamp: String,
    value: &'a shome_core::Value,
}

pub fn run<W, R, C>(writer: &mut W, service: &ReadingService<'_, R, C>, args: &ReadingsArgs) -> Result<()>
where
    W: Write,
    R: ReadingRepository + ?Sized,
    C: SensorCatalog + ?Sized,
{
    let device_id = DeviceId::new(args.device.as_str()).context("invalid --device")?;
    let period = parse_period(&args.start, &args.end)?;
    let readings = service
        .get_readings_from_device_in_period(&device_id, &period)
        .with_context(|| format!("failed to query readings for {device_id}"))?;

    if args.json {
        write_json(writer, &readings, args.ids)?;
    } else if args.ids {
        for reading in &readings {
            writeln!(writer, "{}", reading.id)?;
        }
    } else {
        write_table(writer, &device_id, &readings)?;
    }
    Ok(())
}

fn write_json<W: Write>(writer: &mut W, readings: &[Reading], ids_only: bool) -> Result<()> {
    let output = if ids_only {
        let ids: Vec<&str> = readings.iter().map(|r| r.id.as_str()).collect();
        serde_json::to_string_pretty(&ids)?
    } else {
        let rows: Vec<JsonReading<'_>> = readings
            .iter()
            .map(|r| JsonReading {
                id: r.id.as_str(),
                sensor_id: r.sensor_id.as_str(),
                timestamp: format_timestamp(r.timestamp),
                value: &r.value,
            })
            .collect();
        serde_json::to_string_pretty(&rows)?
    };
    writeln!(writer, "{output}")?;
    Ok(())
}

fn write_table<W: Write>(writer: &mut W, device_id: &DeviceId, readings: &[Reading]) -> Result<()> {
    if readings.is_empty() {
        writeln!(writer, "No readings for {device_id} in this period.")?;
        return Ok(());
    }

    let sensor_width = readings
        .iter()
        .map(|r| r.sensor_id.as_str().chars().count())
        .max()
        .unwrap_or(0)
        .max("Sensor".len());

    writeln!(writer, "{:<24}  {:<sensor_width$}  Value", "Timestamp", "Sensor")?;
    for reading in readings {
        writeln!(
            writer,
            "{:<24}  {:<sensor_width$}  {}",
            format_timestamp(reading.timestamp),
            reading.sensor_id,
            display_value(&reading.value)
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone, Utc};
    use insta::assert_snapshot;
    use shome_core::{
        Capability, InMemoryCatalog, InMemoryReadingStore, ReadingId, SensorId, SensorRegistration,
        Unit, Value,
    };

    fn fixture() -> (InMemoryReadingStore, InMemoryCatalog) {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().unwrap();
        let store = InMemoryReadingStore::new();
        let mut catalog = InMemoryCatalog::new();
        for (sensor, capability) in [("hub-temp", Capability::Temperature), ("hub-switch", Capability::OnOff)] {
            catalog.register_sensor(SensorRegistration {
                sensor_id: SensorId::new(sensor).unwrap(),
                device_id: DeviceId::new("hub").unwrap(),
                capability,
            });
        }
        let readings = [
            ("r-1", "hub-temp", 0, Value::quantity(Unit::Celsius, 20.0)),
            ("r-2", "hub-switch", 5, Value::Switch { on: true }),
            ("r-3", "hub-temp", 5, Value::quantity(Unit::Celsius, 21.5)),
            ("r-4", "hub-temp", 60, Value::quantity(Unit::Celsius, 23.0)),
        ];
        for (id, sensor, minutes, value) in readings {
            store
                .save(Reading::new(
                    ReadingId::new(id).unwrap(),
                    SensorId::new(sensor).unwrap(),
                    value,
                    base + Duration::minutes(minutes),
                ))
                .unwrap();
        }
        (store, catalog)
    }

    fn args(ids: bool, json: bool) -> ReadingsArgs {
        ReadingsArgs {
            device: "hub".to_string(),
            start: "2024-03-01T10:00:00Z".to_string(),
            end: "2024-03-01T10:30:00Z".to_string(),
            ids,
            json,
        }
    }

    fn render(args: &ReadingsArgs) -> String {
        let (store, catalog) = fixture();
        let service = ReadingService::new(&store, &catalog);
        let mut output = Vec::new();
        run(&mut output, &service, args).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn readings_table_output() {
        assert_snapshot!(render(&args(false, false)), @r"
        Timestamp                 Sensor      Value
        2024-03-01T10:00:00.000Z  hub-temp    20.0 °C
        2024-03-01T10:05:00.000Z  hub-switch  true
        2024-03-01T10:05:00.000Z  hub-temp    21.5 °C
        ");
    }

    #[test]
    fn readings_ids_output() {
        assert_snapshot!(render(&args(true, false)), @r"
        r-1
        r-2
        r-3
        ");
    }

    #[test]
    fn readings_json_output() {
        assert_snapshot!(render(&args(false, true)), @r#"
        [
          {
            "id": "r-1",
            "sensor_id": "hub-temp",
            "timestamp": "2024-03-01T10:00:00.000Z",
            "value": {
              "kind": "quantity",
              "unit": "celsius",
              "magnitude": 20.0
            }
          },
          {
            "id": "r-2",
            "sensor_id": "hub-switch",
            "timestamp": "2024-03-01T10:05:00.000Z",
            "value": {
              "kind": "switch",
              "on": true
            }
          },
          {
            "id": "r-3",
            "sensor_id": "hub-temp",
            "timestamp": "2024-03-01T10:05:00.000Z",
            "value": {
              "kind": "quantity",
              "unit": "celsius",
              "magnitude": 21.5
            }
          }
        ]
        "#);
    }

    #[test]
    fn readings_empty_period() {
        let args = ReadingsArgs {
            start: "2024-03-02T00:00:00Z".to_string(),
            end: "2024-03-02T01:00:00Z".to_string(),
            ..args(false, false)
        };
        assert_snapshot!(render(&args), @"No readings for hub in this period.");
    }

    #[test]
    fn readings_reject_empty_device() {
        let (store, catalog) = fixture();
        let service = ReadingService::new(&store, &catalog);
        let args = ReadingsArgs {
            device: String::new(),
            ..args(false, false)
        };
        let err = run(&mut Vec::new(), &service, &args).unwrap_err();
        assert_eq!(err.to_string(), "invalid --device");
    }
}
