//! Status command for showing store contents and the freshest reading per sensor.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use shome_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, database_path: &Path) -> Result<()> {
    let counts = db.counts()?;
    let sensors = db.last_reading_times_by_sensor()?;

    writeln!(writer, "Smart-home store status")?;
    writeln!(writer, "Database: {}", database_path.display())?;
    writeln!(
        writer,
        "Devices: {}, sensors: {}, readings: {}",
        counts.devices, counts.sensors, counts.readings
    )?;

    if sensors.is_empty() {
        writeln!(writer, "No readings recorded.")?;
        return Ok(());
    }

    writeln!(writer, "Last reading by sensor:")?;
    for sensor in sensors {
        writeln!(writer, "- {}: {}", sensor.sensor_id, sensor.last_reading)?;
    }

    Ok(())
}
