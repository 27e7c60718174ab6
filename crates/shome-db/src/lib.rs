//! Storage layer for smart-home readings.
//!
//! Provides a SQLite-backed [`ReadingRepository`] and [`SensorCatalog`] using
//! `rusqlite`.
//!
//! # Thread Safety
//!
//! A `rusqlite::Connection` is `Send` but not `Sync`. [`Database`] keeps its
//! connection behind a `Mutex`, so one `Database` can be shared by reference
//! across threads; statements are serialized on that lock. A multi-sensor
//! [`snapshot_series`](ReadingRepository::snapshot_series) runs under a single
//! lock acquisition and therefore sees one consistent view of the table.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 with nanosecond precision and a
//! `Z` suffix (e.g., `2024-03-01T10:00:00.000000000Z`). Readings are limited to
//! years 0000-9999 by [`validate_reading`], so every value has the same width,
//! lexicographic ordering matches chronological ordering, and range queries
//! can use the `(sensor_id, timestamp)` index directly.
//!
//! ## Value Storage
//!
//! The `value` column stores the reading's [`Value`](shome_core::Value) as
//! tagged JSON (e.g., `{"kind":"quantity","unit":"celsius","magnitude":21.5}`).
//!
//! ## Ordering
//!
//! Readings sharing a timestamp are returned in insertion order (`rowid`).
//! Rows are never deleted, so `rowid` grows monotonically.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Params, params};
use shome_core::{
    Capability, DeviceId, Period, Reading, ReadingId, ReadingRepository, SensorCatalog, SensorId,
    SensorRegistration, SeriesSnapshot, StoreError, ValidationError, validate_reading,
};
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A thread panicked while holding the connection.
    #[error("database connection lock poisoned")]
    LockPoisoned,
    /// Failed to encode a reading value as JSON.
    #[error("failed to encode reading value: {0}")]
    Encode(#[from] serde_json::Error),
    /// Failed to parse a stored reading timestamp.
    #[error("invalid timestamp for reading {reading_id}: {timestamp}")]
    TimestampParse {
        reading_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// Failed to parse a stored reading value.
    #[error("invalid value for reading {reading_id}")]
    InvalidValue {
        reading_id: String,
        #[source]
        source: serde_json::Error,
    },
    /// A stored identifier or capability failed validation.
    #[error("invalid {table} row {id}")]
    InvalidRow {
        table: &'static str,
        id: String,
        #[source]
        source: ValidationError,
    },
    /// A reading failed store validation.
    #[error(transparent)]
    Rejected(StoreError),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::LockPoisoned => Self::LockPoisoned,
            DbError::TimestampParse { ref reading_id, .. }
            | DbError::InvalidValue { ref reading_id, .. } => Self::Corrupt {
                reading_id: reading_id.clone(),
                message: error_chain(&err),
            },
            DbError::Rejected(err) => err,
            other => Self::Backend(Box::new(other)),
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// A device row to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: Option<String>,
}

/// Summary of an import pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub devices: usize,
    pub sensors: usize,
    pub readings_inserted: usize,
    pub readings_duplicate: usize,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub devices: usize,
    pub sensors: usize,
    pub readings: usize,
}

/// Latest reading timestamp for one sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorLastReading {
    pub sensor_id: String,
    pub last_reading: String,
}

struct ReadingRow {
    id: String,
    sensor_id: String,
    timestamp: String,
    value: String,
    rowid: i64,
}

impl ReadingRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sensor_id: row.get(1)?,
            timestamp: row.get(2)?,
            value: row.get(3)?,
            rowid: row.get(4)?,
        })
    }

    fn decode(self) -> Result<Reading, DbError> {
        let timestamp = parse_timestamp(&self.timestamp, &self.id)?;
        let value = serde_json::from_str(&self.value).map_err(|source| DbError::InvalidValue {
            reading_id: self.id.clone(),
            source,
        })?;
        let sensor_id = SensorId::new(self.sensor_id).map_err(|source| DbError::InvalidRow {
            table: "readings",
            id: self.id.clone(),
            source,
        })?;
        let id = ReadingId::new(self.id).map_err(|source| DbError::InvalidRow {
            table: "readings",
            id: format!("#{}", self.rowid),
            source,
        })?;
        Ok(Reading::new(id, sensor_id, value, timestamp))
    }
}

const READING_COLUMNS: &str = "id, sensor_id, timestamp, value, rowid";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                name TEXT
            );

            -- capability: snake_case capability name (e.g., 'temperature', 'power')
            CREATE TABLE IF NOT EXISTS sensors (
                id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL,
                capability TEXT NOT NULL,
                FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_sensors_device ON sensors(device_id, capability);

            -- Readings table: immutable sensor measurements
            -- sensor_id: not constrained, readings may arrive before their sensor is registered
            -- timestamp: RFC 3339, nanosecond precision, UTC
            -- value: tagged JSON value
            CREATE TABLE IF NOT EXISTS readings (
                id TEXT PRIMARY KEY,
                sensor_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_readings_sensor_time ON readings(sensor_id, timestamp);
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Registers a device, keeping its existing name when `name` is `None`.
    pub fn register_device(&self, device: &DeviceRecord) -> Result<(), DbError> {
        let conn = self.conn()?;
        upsert_device(&conn, device)?;
        Ok(())
    }

    /// Registers a sensor, creating its device if needed. Re-registering a
    /// sensor ID moves it to the new device and capability.
    pub fn register_sensor(&self, sensor: &SensorRegistration) -> Result<(), DbError> {
        let conn = self.conn()?;
        upsert_sensor(&conn, sensor)?;
        Ok(())
    }

    /// Imports devices, sensors and readings in one transaction.
    ///
    /// Readings whose ID is already stored are counted as duplicates and left
    /// untouched. A reading that fails validation aborts the whole import.
    pub fn import(
        &self,
        devices: &[DeviceRecord],
        sensors: &[SensorRegistration],
        readings: &[Reading],
    ) -> Result<ImportStats, DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut stats = ImportStats::default();

        for device in devices {
            upsert_device(&tx, device)?;
            stats.devices += 1;
        }
        for sensor in sensors {
            upsert_sensor(&tx, sensor)?;
            stats.sensors += 1;
        }
        for reading in readings {
            validate_reading(reading).map_err(DbError::Rejected)?;
            if insert_reading(&tx, reading)? {
                stats.readings_inserted += 1;
            } else {
                stats.readings_duplicate += 1;
            }
        }

        tx.commit()?;
        tracing::debug!(
            devices = stats.devices,
            sensors = stats.sensors,
            inserted = stats.readings_inserted,
            duplicate = stats.readings_duplicate,
            "imported batch"
        );
        Ok(stats)
    }

    /// Counts rows in each table.
    pub fn counts(&self) -> Result<StoreCounts, DbError> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<usize, DbError> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(usize::try_from(n).unwrap_or_default())
        };
        Ok(StoreCounts {
            devices: count("devices")?,
            sensors: count("sensors")?,
            readings: count("readings")?,
        })
    }

    /// Lists the last reading timestamp per sensor, ordered by most recent.
    pub fn last_reading_times_by_sensor(&self) -> Result<Vec<SensorLastReading>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT sensor_id, MAX(timestamp) AS last_reading
            FROM readings
            GROUP BY sensor_id
            ORDER BY last_reading DESC, sensor_id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SensorLastReading {
                sensor_id: row.get(0)?,
                last_reading: row.get(1)?,
            })
        })?;
        let mut sensors = Vec::new();
        for row in rows {
            sensors.push(row?);
        }
        Ok(sensors)
    }

    fn find_sensor_ids<P: Params>(&self, sql: &str, params: P) -> Result<BTreeSet<SensorId>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut sensors = BTreeSet::new();
        for row in rows {
            let id = row?;
            let sensor_id = SensorId::new(id.clone()).map_err(|source| DbError::InvalidRow {
                table: "sensors",
                id,
                source,
            })?;
            sensors.insert(sensor_id);
        }
        Ok(sensors)
    }
}

fn upsert_device(conn: &Connection, device: &DeviceRecord) -> Result<(), DbError> {
    conn.execute(
        "
        INSERT INTO devices (id, name) VALUES (?, ?)
        ON CONFLICT(id) DO UPDATE SET name = COALESCE(excluded.name, devices.name)
        ",
        params![device.id.as_str(), device.name],
    )?;
    Ok(())
}

fn upsert_sensor(conn: &Connection, sensor: &SensorRegistration) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO devices (id) VALUES (?)",
        [sensor.device_id.as_str()],
    )?;
    conn.execute(
        "
        INSERT INTO sensors (id, device_id, capability) VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            device_id = excluded.device_id,
            capability = excluded.capability
        ",
        params![
            sensor.sensor_id.as_str(),
            sensor.device_id.as_str(),
            sensor.capability.as_str()
        ],
    )?;
    Ok(())
}

/// Inserts a reading unless its ID is taken. Returns whether a row was written.
fn insert_reading(conn: &Connection, reading: &Reading) -> Result<bool, DbError> {
    let value = serde_json::to_string(&reading.value)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO readings (id, sensor_id, timestamp, value) VALUES (?, ?, ?, ?)",
        params![
            reading.id.as_str(),
            reading.sensor_id.as_str(),
            format_timestamp(reading.timestamp),
            value
        ],
    )?;
    Ok(inserted == 1)
}

fn query_readings<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Reading>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, ReadingRow::from_row)?;
    let mut readings = Vec::new();
    for row in rows {
        readings.push(row?.decode()?);
    }
    Ok(readings)
}

fn query_reading<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<Reading>, DbError> {
    conn.query_row(sql, params, ReadingRow::from_row)
        .optional()?
        .map(ReadingRow::decode)
        .transpose()
}

fn readings_in_period(
    conn: &Connection,
    sensor_id: &SensorId,
    period: &Period,
) -> Result<Vec<Reading>, DbError> {
    if period.is_empty() {
        return Ok(Vec::new());
    }
    query_readings(
        conn,
        &format!(
            "
            SELECT {READING_COLUMNS}
            FROM readings
            WHERE sensor_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC, rowid ASC
            "
        ),
        params![
            sensor_id.as_str(),
            format_timestamp(period.start),
            format_timestamp(period.end)
        ],
    )
}

fn last_reading_before(
    conn: &Connection,
    sensor_id: &SensorId,
    before: DateTime<Utc>,
) -> Result<Option<Reading>, DbError> {
    query_reading(
        conn,
        &format!(
            "
            SELECT {READING_COLUMNS}
            FROM readings
            WHERE sensor_id = ? AND timestamp < ?
            ORDER BY timestamp DESC, rowid DESC
            LIMIT 1
            "
        ),
        params![sensor_id.as_str(), format_timestamp(before)],
    )
}

fn parse_timestamp(timestamp: &str, reading_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            reading_id: reading_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl ReadingRepository for Database {
    fn save(&self, reading: Reading) -> Result<Reading, StoreError> {
        validate_reading(&reading)?;
        let conn = self.conn()?;
        if !insert_reading(&conn, &reading)? {
            return Err(StoreError::DuplicateIdentity(reading.id));
        }
        tracing::debug!(reading_id = %reading.id, sensor_id = %reading.sensor_id, "saved reading");
        Ok(reading)
    }

    fn find_all(&self) -> Result<Vec<Reading>, StoreError> {
        let conn = self.conn()?;
        Ok(query_readings(
            &conn,
            &format!("SELECT {READING_COLUMNS} FROM readings"),
            [],
        )?)
    }

    fn find_by_identity(&self, id: &ReadingId) -> Result<Option<Reading>, StoreError> {
        let conn = self.conn()?;
        Ok(query_reading(
            &conn,
            &format!("SELECT {READING_COLUMNS} FROM readings WHERE id = ?"),
            [id.as_str()],
        )?)
    }

    fn contains_identity(&self, id: &ReadingId) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let exists = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM readings WHERE id = ?)",
                [id.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .map_err(DbError::from)?;
        Ok(exists)
    }

    fn find_readings_by_sensor_id_in_period(
        &self,
        sensor_id: &SensorId,
        period: &Period,
    ) -> Result<Vec<Reading>, StoreError> {
        let conn = self.conn()?;
        Ok(readings_in_period(&conn, sensor_id, period)?)
    }

    fn find_last_reading_by_sensor_id(
        &self,
        sensor_id: &SensorId,
    ) -> Result<Option<Reading>, StoreError> {
        let conn = self.conn()?;
        Ok(query_reading(
            &conn,
            &format!(
                "
                SELECT {READING_COLUMNS}
                FROM readings
                WHERE sensor_id = ?
                ORDER BY timestamp DESC, rowid DESC
                LIMIT 1
                "
            ),
            [sensor_id.as_str()],
        )?)
    }

    fn find_last_reading_before(
        &self,
        sensor_id: &SensorId,
        before: DateTime<Utc>,
    ) -> Result<Option<Reading>, StoreError> {
        let conn = self.conn()?;
        Ok(last_reading_before(&conn, sensor_id, before)?)
    }

    fn snapshot_series(
        &self,
        sensor_ids: &[SensorId],
        period: &Period,
    ) -> Result<Vec<SeriesSnapshot>, StoreError> {
        let conn = self.conn()?;
        let mut snapshots = Vec::with_capacity(sensor_ids.len());
        for sensor_id in sensor_ids {
            let (carried, readings) = if period.is_empty() {
                (None, Vec::new())
            } else {
                (
                    last_reading_before(&conn, sensor_id, period.start)?,
                    readings_in_period(&conn, sensor_id, period)?,
                )
            };
            snapshots.push(SeriesSnapshot {
                sensor_id: sensor_id.clone(),
                carried,
                readings,
            });
        }
        tracing::debug!(sensors = sensor_ids.len(), "snapshot series");
        Ok(snapshots)
    }
}

impl SensorCatalog for Database {
    fn resolve_sensors_for_device(
        &self,
        device_id: &DeviceId,
        capability: Capability,
    ) -> Result<BTreeSet<SensorId>, StoreError> {
        Ok(self.find_sensor_ids(
            "SELECT id FROM sensors WHERE device_id = ? AND capability = ? ORDER BY id ASC",
            params![device_id.as_str(), capability.as_str()],
        )?)
    }

    fn sensors_for_device(&self, device_id: &DeviceId) -> Result<BTreeSet<SensorId>, StoreError> {
        Ok(self.find_sensor_ids(
            "SELECT id FROM sensors WHERE device_id = ? ORDER BY id ASC",
            [device_id.as_str()],
        )?)
    }

    fn device_ids(&self) -> Result<Vec<DeviceId>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM devices ORDER BY id ASC")
            .map_err(DbError::from)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(DbError::from)?;
        let mut devices = Vec::new();
        for row in rows {
            let id = row.map_err(DbError::from)?;
            let device_id = DeviceId::new(id.clone()).map_err(|source| DbError::InvalidRow {
                table: "devices",
                id,
                source,
            })?;
            devices.push(device_id);
        }
        Ok(devices)
    }
}
