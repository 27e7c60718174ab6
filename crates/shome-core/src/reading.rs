//! Sensor readings and query periods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ReadingId, SensorId};
use crate::value::Value;

/// One immutable timestamped measurement from one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Unique identifier for this reading.
    pub id: ReadingId,
    /// The sensor that produced the reading. Not owned by the reading.
    pub sensor_id: SensorId,
    /// The measured value.
    pub value: Value,
    /// When the measurement was taken.
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Creates a reading with an explicit identity.
    pub const fn new(
        id: ReadingId,
        sensor_id: SensorId,
        value: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sensor_id,
            value,
            timestamp,
        }
    }

    /// Creates a reading with a freshly generated identity.
    pub fn with_generated_id(sensor_id: SensorId, value: Value, timestamp: DateTime<Utc>) -> Self {
        Self::new(ReadingId::generate(), sensor_id, value, timestamp)
    }
}

/// A closed interval `[start, end]` of timestamps.
///
/// `start <= end` is the caller's responsibility. A period with
/// `start > end` is well-typed but empty: every query over it yields nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// True when the period contains no instant at all (`start > end`).
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Inclusive containment on both ends.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}
