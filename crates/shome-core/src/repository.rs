//! Reading store contract.
//!
//! [`ReadingRepository`] is the seam between the analytics engine and
//! whatever holds the readings: [`InMemoryReadingStore`](crate::InMemoryReadingStore)
//! in this crate, or the SQLite backend in `shome-db`.
//!
//! # Ordering
//!
//! Every per-sensor query returns readings ascending by timestamp. Readings
//! sharing a timestamp keep insertion order, so "last" always means
//! last-inserted among equal timestamps.

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;

use crate::reading::{Period, Reading};
use crate::types::{ReadingId, SensorId, ValidationError};

/// Reading store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input passed to a store primitive.
    #[error("invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    /// A reading with this identity is already stored.
    #[error("reading {0} already exists")]
    DuplicateIdentity(ReadingId),

    /// A writer panicked while holding the store lock.
    #[error("reading store lock poisoned")]
    LockPoisoned,

    /// A stored row could not be decoded back into a reading.
    #[error("corrupt stored reading {reading_id}: {message}")]
    Corrupt { reading_id: String, message: String },

    /// The storage engine failed.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        let field = match &err {
            ValidationError::Empty { field } => *field,
            ValidationError::UnknownCapability { .. } => "capability",
            ValidationError::UnknownUnit { .. } => "unit",
        };
        Self::InvalidArgument {
            field,
            message: err.to_string(),
        }
    }
}

/// Readings of one sensor as seen by one analytics query.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub sensor_id: SensorId,
    /// Latest reading strictly before the period start, if any.
    pub carried: Option<Reading>,
    /// Readings inside the period, ascending by timestamp.
    pub readings: Vec<Reading>,
}

/// Append-only store of immutable readings, indexed by sensor and time.
pub trait ReadingRepository {
    /// Stores a reading. Fails with [`StoreError::DuplicateIdentity`] if the
    /// identity is taken; the check and the insert are one atomic step.
    fn save(&self, reading: Reading) -> Result<Reading, StoreError>;

    /// All stored readings, in no particular order.
    fn find_all(&self) -> Result<Vec<Reading>, StoreError>;

    fn find_by_identity(&self, id: &ReadingId) -> Result<Option<Reading>, StoreError>;

    fn contains_identity(&self, id: &ReadingId) -> Result<bool, StoreError>;

    /// Readings of `sensor_id` with `start <= t <= end`.
    fn find_readings_by_sensor_id_in_period(
        &self,
        sensor_id: &SensorId,
        period: &Period,
    ) -> Result<Vec<Reading>, StoreError>;

    /// Identities of the readings selected by
    /// [`find_readings_by_sensor_id_in_period`](Self::find_readings_by_sensor_id_in_period).
    fn find_reading_ids_by_sensor_id_in_period(
        &self,
        sensor_id: &SensorId,
        period: &Period,
    ) -> Result<Vec<ReadingId>, StoreError> {
        Ok(self
            .find_readings_by_sensor_id_in_period(sensor_id, period)?
            .into_iter()
            .map(|reading| reading.id)
            .collect())
    }

    /// The reading with the greatest timestamp for `sensor_id`.
    fn find_last_reading_by_sensor_id(
        &self,
        sensor_id: &SensorId,
    ) -> Result<Option<Reading>, StoreError>;

    /// The latest reading of `sensor_id` strictly before `before`.
    fn find_last_reading_before(
        &self,
        sensor_id: &SensorId,
        before: DateTime<Utc>,
    ) -> Result<Option<Reading>, StoreError>;

    /// Carried and in-period readings for several sensors.
    ///
    /// The default implementation issues one query per sensor and is only as
    /// consistent as the underlying store; implementations that can serve all
    /// sensors from one view should override it.
    fn snapshot_series(
        &self,
        sensor_ids: &[SensorId],
        period: &Period,
    ) -> Result<Vec<SeriesSnapshot>, StoreError> {
        sensor_ids
            .iter()
            .map(|sensor_id| {
                if period.is_empty() {
                    return Ok(SeriesSnapshot {
                        sensor_id: sensor_id.clone(),
                        carried: None,
                        readings: Vec::new(),
                    });
                }
                Ok(SeriesSnapshot {
                    sensor_id: sensor_id.clone(),
                    carried: self.find_last_reading_before(sensor_id, period.start)?,
                    readings: self.find_readings_by_sensor_id_in_period(sensor_id, period)?,
                })
            })
            .collect()
    }
}

/// Years a store accepts. Fixed-width RFC 3339 text only covers these.
const SUPPORTED_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

/// Rejects readings whose numeric payload cannot be ordered or summed, or
/// whose timestamp falls outside years 0000 to 9999.
pub fn validate_reading(reading: &Reading) -> Result<(), StoreError> {
    if !reading.value.is_finite() {
        return Err(StoreError::InvalidArgument {
            field: "value",
            message: format!("reading {} has a non-finite value", reading.id),
        });
    }
    if !SUPPORTED_YEARS.contains(&reading.timestamp.year()) {
        return Err(StoreError::InvalidArgument {
            field: "timestamp",
            message: format!(
                "reading {} is dated {}, outside years 0000-9999",
                reading.id, reading.timestamp
            ),
        });
    }
    Ok(())
}
