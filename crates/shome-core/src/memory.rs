//! In-memory reading store.
//!
//! # Thread Safety
//!
//! [`InMemoryReadingStore`] is `Send + Sync`. Writers take an exclusive lock
//! for the duplicate check and the insert together; readers share the lock and
//! copy out what they need, so a query never sees a half-inserted reading and
//! analytics run on their own snapshot once the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::reading::{Period, Reading};
use crate::repository::{ReadingRepository, SeriesSnapshot, StoreError, validate_reading};
use crate::types::{ReadingId, SensorId};

/// Append-only reading store backed by hash maps.
#[derive(Debug, Default)]
pub struct InMemoryReadingStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    by_id: HashMap<ReadingId, Arc<Reading>>,
    /// Per-sensor readings kept sorted by timestamp; equal timestamps in insertion order.
    by_sensor: HashMap<SensorId, Vec<Arc<Reading>>>,
}

impl StoreInner {
    fn insert(&mut self, reading: Reading) -> Result<Reading, StoreError> {
        if self.by_id.contains_key(&reading.id) {
            return Err(StoreError::DuplicateIdentity(reading.id));
        }
        let reading = Arc::new(reading);
        let series = self.by_sensor.entry(reading.sensor_id.clone()).or_default();
        let at = series.partition_point(|r| r.timestamp <= reading.timestamp);
        series.insert(at, Arc::clone(&reading));
        self.by_id.insert(reading.id.clone(), Arc::clone(&reading));
        Ok(Reading::clone(&reading))
    }

    fn series(&self, sensor_id: &SensorId) -> &[Arc<Reading>] {
        self.by_sensor.get(sensor_id).map_or(&[], Vec::as_slice)
    }

    fn in_period(&self, sensor_id: &SensorId, period: &Period) -> &[Arc<Reading>] {
        if period.is_empty() {
            return &[];
        }
        let series = self.series(sensor_id);
        let lo = series.partition_point(|r| r.timestamp < period.start);
        let hi = series.partition_point(|r| r.timestamp <= period.end);
        &series[lo..hi]
    }

    fn last_before(&self, sensor_id: &SensorId, before: DateTime<Utc>) -> Option<&Arc<Reading>> {
        let series = self.series(sensor_id);
        let idx = series.partition_point(|r| r.timestamp < before);
        idx.checked_sub(1).map(|i| &series[i])
    }
}

impl InMemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored readings.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.by_id.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }
}

fn cloned(readings: &[Arc<Reading>]) -> Vec<Reading> {
    readings.iter().map(|r| Reading::clone(r)).collect()
}

impl ReadingRepository for InMemoryReadingStore {
    fn save(&self, reading: Reading) -> Result<Reading, StoreError> {
        validate_reading(&reading)?;
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let saved = inner.insert(reading)?;
        tracing::debug!(reading_id = %saved.id, sensor_id = %saved.sensor_id, "stored reading");
        Ok(saved)
    }

    fn find_all(&self) -> Result<Vec<Reading>, StoreError> {
        Ok(self
            .read()?
            .by_id
            .values()
            .map(|r| Reading::clone(r))
            .collect())
    }

    fn find_by_identity(&self, id: &ReadingId) -> Result<Option<Reading>, StoreError> {
        Ok(self.read()?.by_id.get(id).map(|r| Reading::clone(r)))
    }

    fn contains_identity(&self, id: &ReadingId) -> Result<bool, StoreError> {
        Ok(self.read()?.by_id.contains_key(id))
    }

    fn find_readings_by_sensor_id_in_period(
        &self,
        sensor_id: &SensorId,
        period: &Period,
    ) -> Result<Vec<Reading>, StoreError> {
        Ok(cloned(self.read()?.in_period(sensor_id, period)))
    }

    fn find_last_reading_by_sensor_id(
        &self,
        sensor_id: &SensorId,
    ) -> Result<Option<Reading>, StoreError> {
        Ok(self
            .read()?
            .series(sensor_id)
            .last()
            .map(|r| Reading::clone(r)))
    }

    fn find_last_reading_before(
        &self,
        sensor_id: &SensorId,
        before: DateTime<Utc>,
    ) -> Result<Option<Reading>, StoreError> {
        Ok(self
            .read()?
            .last_before(sensor_id, before)
            .map(|r| Reading::clone(r)))
    }

    fn snapshot_series(
        &self,
        sensor_ids: &[SensorId],
        period: &Period,
    ) -> Result<Vec<SeriesSnapshot>, StoreError> {
        let guard = self.read()?;
        let inner = &*guard;
        let snapshots = sensor_ids
            .par_iter()
            .map(|sensor_id| SeriesSnapshot {
                sensor_id: sensor_id.clone(),
                carried: if period.is_empty() {
                    None
                } else {
                    inner
                        .last_before(sensor_id, period.start)
                        .map(|r| Reading::clone(r))
                },
                readings: cloned(inner.in_period(sensor_id, period)),
            })
            .collect();
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::value::{Unit, Value};

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::minutes(minutes)
    }

    fn reading(id: &str, sensor: &str, minutes: i64, celsius: f64) -> Reading {
        Reading::new(
            ReadingId::new(id).unwrap(),
            SensorId::new(sensor).unwrap(),
            Value::quantity(Unit::Celsius, celsius),
            ts(minutes),
        )
    }

    fn sensor(id: &str) -> SensorId {
        SensorId::new(id).unwrap()
    }

    fn ids(readings: &[Reading]) -> Vec<&str> {
        readings.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn save_distinct_readings() {
        let store = InMemoryReadingStore::new();
        store.save(reading("r-1", "s-1", 0, 20.0)).unwrap();
        store.save(reading("r-2", "s-1", 0, 20.0)).unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert!(store.contains_identity(&ReadingId::new("r-1").unwrap()).unwrap());
        assert!(store.contains_identity(&ReadingId::new("r-2").unwrap()).unwrap());
    }

    #[test]
    fn duplicate_save_fails_and_leaves_store_unchanged() {
        let store = InMemoryReadingStore::new();
        store.save(reading("r-1", "s-1", 0, 20.0)).unwrap();

        let err = store.save(reading("r-1", "s-2", 5, 99.0)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentity(id) if id.as_str() == "r-1"));

        assert_eq!(store.len().unwrap(), 1);
        let stored = store
            .find_by_identity(&ReadingId::new("r-1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.sensor_id.as_str(), "s-1");
        assert!(
            store
                .find_last_reading_by_sensor_id(&sensor("s-2"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let store = InMemoryReadingStore::new();
        let err = store.save(reading("r-1", "s-1", 0, f64::NAN)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument { field: "value", .. }));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn five_digit_year_is_rejected() {
        let store = InMemoryReadingStore::new();
        let mut late = reading("r-1", "s-1", 0, 20.0);
        late.timestamp = Utc
            .with_ymd_and_hms(10_000, 6, 1, 0, 0, 0)
            .single()
            .expect("valid test timestamp");

        let err = store.save(late).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument { field: "timestamp", .. }));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn find_by_identity_absent_is_none() {
        let store = InMemoryReadingStore::new();
        assert!(
            store
                .find_by_identity(&ReadingId::new("missing").unwrap())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn period_query_is_inclusive_and_sorted() {
        let store = InMemoryReadingStore::new();
        store.save(reading("r-late", "s-1", 20, 1.0)).unwrap();
        store.save(reading("r-end", "s-1", 10, 1.0)).unwrap();
        store.save(reading("r-start", "s-1", 0, 1.0)).unwrap();
        store.save(reading("r-before", "s-1", -1, 1.0)).unwrap();
        store.save(reading("r-mid", "s-1", 5, 1.0)).unwrap();
        store.save(reading("r-other", "s-2", 5, 1.0)).unwrap();

        let found = store
            .find_readings_by_sensor_id_in_period(&sensor("s-1"), &Period::new(ts(0), ts(10)))
            .unwrap();
        assert_eq!(ids(&found), ["r-start", "r-mid", "r-end"]);

        let found_ids = store
            .find_reading_ids_by_sensor_id_in_period(&sensor("s-1"), &Period::new(ts(0), ts(10)))
            .unwrap();
        let found_ids: Vec<&str> = found_ids.iter().map(ReadingId::as_str).collect();
        assert_eq!(found_ids, ["r-start", "r-mid", "r-end"]);
    }

    #[test]
    fn reversed_period_returns_empty() {
        let store = InMemoryReadingStore::new();
        store.save(reading("r-1", "s-1", 5, 1.0)).unwrap();

        let found = store
            .find_readings_by_sensor_id_in_period(&sensor("s-1"), &Period::new(ts(10), ts(0)))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn unknown_sensor_returns_empty() {
        let store = InMemoryReadingStore::new();
        let found = store
            .find_readings_by_sensor_id_in_period(&sensor("nope"), &Period::new(ts(0), ts(10)))
            .unwrap();
        assert!(found.is_empty());
        assert!(store.find_last_reading_by_sensor_id(&sensor("nope")).unwrap().is_none());
    }

    #[test]
    fn last_reading_is_independent_of_insertion_order() {
        let store = InMemoryReadingStore::new();
        store.save(reading("r-mid", "s-1", 5, 1.0)).unwrap();
        store.save(reading("r-max", "s-1", 30, 2.0)).unwrap();
        store.save(reading("r-min", "s-1", -30, 3.0)).unwrap();

        let last = store.find_last_reading_by_sensor_id(&sensor("s-1")).unwrap().unwrap();
        assert_eq!(last.id.as_str(), "r-max");
    }

    #[test]
    fn last_reading_tie_goes_to_last_inserted() {
        let store = InMemoryReadingStore::new();
        store.save(reading("r-first", "s-1", 5, 1.0)).unwrap();
        store.save(reading("r-second", "s-1", 5, 2.0)).unwrap();

        let last = store.find_last_reading_by_sensor_id(&sensor("s-1")).unwrap().unwrap();
        assert_eq!(last.id.as_str(), "r-second");

        let before = store
            .find_last_reading_before(&sensor("s-1"), ts(6))
            .unwrap()
            .unwrap();
        assert_eq!(before.id.as_str(), "r-second");
    }

    #[test]
    fn last_reading_before_is_strict() {
        let store = InMemoryReadingStore::new();
        store.save(reading("r-0", "s-1", 0, 1.0)).unwrap();
        store.save(reading("r-5", "s-1", 5, 1.0)).unwrap();

        let before = store.find_last_reading_before(&sensor("s-1"), ts(5)).unwrap();
        assert_eq!(before.unwrap().id.as_str(), "r-0");
        assert!(store.find_last_reading_before(&sensor("s-1"), ts(0)).unwrap().is_none());
    }

    #[test]
    fn snapshot_series_splits_carried_and_in_period() {
        let store = InMemoryReadingStore::new();
        store.save(reading("a-early", "s-a", -20, 1.0)).unwrap();
        store.save(reading("a-carry", "s-a", -5, 2.0)).unwrap();
        store.save(reading("a-in", "s-a", 3, 3.0)).unwrap();
        store.save(reading("b-in", "s-b", 4, 4.0)).unwrap();

        let snapshots = store
            .snapshot_series(
                &[sensor("s-a"), sensor("s-b"), sensor("s-c")],
                &Period::new(ts(0), ts(10)),
            )
            .unwrap();

        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].carried.as_ref().unwrap().id.as_str(), "a-carry");
        assert_eq!(ids(&snapshots[0].readings), ["a-in"]);
        assert!(snapshots[1].carried.is_none());
        assert_eq!(ids(&snapshots[1].readings), ["b-in"]);
        assert!(snapshots[2].carried.is_none());
        assert!(snapshots[2].readings.is_empty());
    }

    #[test]
    fn read_path_is_idempotent() {
        let store = InMemoryReadingStore::new();
        for minute in [7, 1, 4] {
            store
                .save(reading(&format!("r-{minute}"), "s-1", minute, 1.0))
                .unwrap();
        }
        let period = Period::new(ts(0), ts(10));

        let first = store
            .find_readings_by_sensor_id_in_period(&sensor("s-1"), &period)
            .unwrap();
        let second = store
            .find_readings_by_sensor_id_in_period(&sensor("s-1"), &period)
            .unwrap();
        assert_eq!(first, second);

        let snap_a = store.snapshot_series(&[sensor("s-1")], &period).unwrap();
        let snap_b = store.snapshot_series(&[sensor("s-1")], &period).unwrap();
        assert_eq!(snap_a, snap_b);
    }

    #[test]
    fn concurrent_saves_of_same_identity_admit_exactly_one() {
        let store = InMemoryReadingStore::new();

        let successes: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = &store;
                    scope.spawn(move || store.save(reading("shared", "s-1", i, 1.0)).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().expect("thread panicked")))
                .sum()
        });

        assert_eq!(successes, 1);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.find_all().unwrap().len(), 1);
    }
}
