//! Import command for loading devices, sensors and readings into the local
//! `SQLite` store.
//!
//! Input is JSONL, one record per line, tagged by `type`:
//!
//! ```text
//! {"type":"device","id":"living-room","name":"Living room"}
//! {"type":"sensor","id":"lr-temp","device_id":"living-room","capability":"temperature"}
//! {"type":"reading","sensor_id":"lr-temp","timestamp":"2024-03-01T10:00:00Z","value":{"kind":"quantity","unit":"celsius","magnitude":21.5}}
//! ```
//!
//! Readings without an `id` get a random one.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use shome_core::{Capability, DeviceId, Reading, ReadingId, SensorId, SensorRegistration, Value};
use shome_db::{Database, DeviceRecord, ImportStats};

use super::util::parse_timestamp;

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// JSONL file to import, or `-` for stdin.
    pub file: PathBuf,
}

/// Parsed contents of an import file.
#[derive(Debug, Default)]
pub struct ImportBatch {
    pub devices: Vec<DeviceRecord>,
    pub sensors: Vec<SensorRegistration>,
    pub readings: Vec<Reading>,
}

pub fn run<W: Write>(writer: &mut W, db: &Database, args: &ImportArgs) -> Result<ImportStats> {
    let batch = if args.file.as_os_str() == "-" {
        parse_records(io::stdin().lock())?
    } else {
        let file = File::open(&args.file)
            .with_context(|| format!("failed to open {}", args.file.display()))?;
        parse_records(BufReader::new(file))?
    };

    let stats = db
        .import(&batch.devices, &batch.sensors, &batch.readings)
        .context("failed to import records")?;
    write_summary(writer, &stats)?;
    Ok(stats)
}

fn write_summary<W: Write>(writer: &mut W, stats: &ImportStats) -> Result<()> {
    writeln!(
        writer,
        "Imported {} readings ({} duplicate), {} devices, {} sensors",
        stats.readings_inserted, stats.readings_duplicate, stats.devices, stats.sensors
    )?;
    Ok(())
}

fn parse_records<R: BufRead>(reader: R) -> Result<ImportBatch> {
    let mut batch = ImportBatch::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid record on line {}", idx + 1))?;
        record
            .apply(&mut batch)
            .with_context(|| format!("invalid record on line {}", idx + 1))?;
    }
    Ok(batch)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ImportRecord {
    Device {
        id: DeviceId,
        #[serde(default)]
        name: Option<String>,
    },
    Sensor {
        id: SensorId,
        device_id: DeviceId,
        capability: Capability,
    },
    Reading {
        #[serde(default)]
        id: Option<ReadingId>,
        sensor_id: SensorId,
        timestamp: String,
        value: Value,
    },
}

impl ImportRecord {
    fn apply(self, batch: &mut ImportBatch) -> Result<()> {
        match self {
            Self::Device { id, name } => {
                let name = name.filter(|name| !name.trim().is_empty());
                batch.devices.push(DeviceRecord { id, name });
            }
            Self::Sensor {
                id,
                device_id,
                capability,
            } => batch.sensors.push(SensorRegistration {
                sensor_id: id,
                device_id,
                capability,
            }),
            Self::Reading {
                id,
                sensor_id,
                timestamp,
                value,
            } => {
                let timestamp = parse_timestamp(&timestamp)?;
                let reading = match id {
                    Some(id) => Reading::new(id, sensor_id, value, timestamp),
                    None => Reading::with_generated_id(sensor_id, value, timestamp),
                };
                batch.readings.push(reading);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use insta::assert_snapshot;
    use shome_core::{ReadingRepository, Unit};

    const FIXTURE: &str = r#"
{"type":"device","id":"living-room","name":"Living room"}
{"type":"sensor","id":"lr-temp","device_id":"living-room","capability":"SensorOfTemperature"}
{"type":"reading","id":"r-1","sensor_id":"lr-temp","timestamp":"2024-03-01T10:00:00Z","value":{"kind":"quantity","unit":"celsius","magnitude":21.5}}

{"type":"reading","sensor_id":"lr-temp","timestamp":"2024-03-01T10:05:00","value":{"kind":"quantity","unit":"celsius","magnitude":22.0}}
"#;

    #[test]
    fn parse_records_collects_each_kind() {
        let batch = parse_records(Cursor::new(FIXTURE)).unwrap();

        assert_eq!(batch.devices.len(), 1);
        assert_eq!(batch.devices[0].name.as_deref(), Some("Living room"));
        assert_eq!(batch.sensors[0].capability, Capability::Temperature);
        assert_eq!(batch.readings.len(), 2);
        assert_eq!(batch.readings[0].id.as_str(), "r-1");
        assert_eq!(
            batch.readings[1].value,
            Value::quantity(Unit::Celsius, 22.0)
        );
    }

    #[test]
    fn parse_records_generates_missing_reading_ids() {
        let batch = parse_records(Cursor::new(FIXTURE)).unwrap();
        let generated = batch.readings[1].id.as_str();
        assert_eq!(generated.len(), 36);
        assert_ne!(generated, "r-1");
    }

    #[test]
    fn parse_records_reports_line_numbers() {
        let input = "{\"type\":\"device\",\"id\":\"a\"}\n{\"type\":\"gadget\",\"id\":\"b\"}\n";
        let err = parse_records(Cursor::new(input)).unwrap_err();
        assert_eq!(err.to_string(), "invalid record on line 2");
    }

    #[test]
    fn parse_records_rejects_bad_timestamps() {
        let input = r#"{"type":"reading","sensor_id":"s","timestamp":"soon","value":{"kind":"switch","on":true}}"#;
        let err = parse_records(Cursor::new(input)).unwrap_err();
        assert_eq!(err.to_string(), "invalid record on line 1");
        assert!(format!("{err:#}").contains("Invalid timestamp: soon"));
    }

    #[test]
    fn parse_records_rejects_empty_ids() {
        let input = r#"{"type":"sensor","id":"","device_id":"d","capability":"power"}"#;
        assert!(parse_records(Cursor::new(input)).is_err());
    }

    #[test]
    fn import_command_reports_duplicates() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("fixture.jsonl");
        std::fs::write(&file, FIXTURE).unwrap();

        let db = Database::open_in_memory().unwrap();
        let args = ImportArgs { file };

        let mut first = Vec::new();
        run(&mut first, &db, &args).unwrap();
        let mut second = Vec::new();
        let stats = run(&mut second, &db, &args).unwrap();

        // The reading without an ID gets a new one on every import.
        assert_eq!(stats.readings_inserted, 1);
        assert_eq!(stats.readings_duplicate, 1);
        assert_eq!(db.find_all().unwrap().len(), 3);

        assert_snapshot!(String::from_utf8(first).unwrap(), @"Imported 2 readings (0 duplicate), 1 devices, 1 sensors");
        assert_snapshot!(String::from_utf8(second).unwrap(), @"Imported 1 readings (1 duplicate), 1 devices, 1 sensors");
    }
}
