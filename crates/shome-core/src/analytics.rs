//! Cross-device analytics over the reading store.
//!
//! [`ReadingService`] borrows a [`ReadingRepository`] and a [`SensorCatalog`]
//! and answers the device-level queries of the backend:
//!
//! - readings (or reading IDs) of every sensor of a device within a period
//! - maximum instantaneous temperature difference between two devices
//! - peak instantaneous total power consumption across all devices
//!
//! "Instantaneous" is defined by carry-forward: at any instant a source's
//! value is its most recent reading, so devices that never report at the
//! same timestamp can still be compared. "No data" is `Ok(None)`; only store
//! failures, cancellation and deadlines are errors.

use std::collections::BTreeSet;

use chrono::Duration;
use thiserror::Error;

use crate::capability::Capability;
use crate::catalog::SensorCatalog;
use crate::context::QueryContext;
use crate::reading::{Period, Reading};
use crate::repository::{ReadingRepository, StoreError};
use crate::timeline::{InstantState, SourceValue, Timeline, TimelineConfig};
use crate::types::{DeviceId, ReadingId, SensorId};
use crate::value::{Quantity, Unit};

/// Analytics errors.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// The reading store or catalog failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The query was cancelled through its [`QueryContext`].
    #[error("query cancelled")]
    Cancelled,

    /// The query ran past its deadline.
    #[error("query deadline exceeded")]
    DeadlineExceeded,
}

/// Configuration for analytics queries.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsConfig {
    /// Carried values older than this count as undefined. Default: unlimited.
    pub staleness_limit: Option<Duration>,

    /// Deadline applied by the entry points that do not take a context.
    pub query_timeout: Option<std::time::Duration>,
}

/// Device-level reading queries and analytics.
#[derive(Debug)]
pub struct ReadingService<'a, R: ?Sized, C: ?Sized> {
    readings: &'a R,
    catalog: &'a C,
    config: AnalyticsConfig,
}

impl<R: ?Sized, C: ?Sized> Clone for ReadingService<'_, R, C> {
    fn clone(&self) -> Self {
        Self {
            readings: self.readings,
            catalog: self.catalog,
            config: self.config.clone(),
        }
    }
}

impl<'a, R, C> ReadingService<'a, R, C>
where
    R: ReadingRepository + ?Sized,
    C: SensorCatalog + ?Sized,
{
    pub fn new(readings: &'a R, catalog: &'a C) -> Self {
        Self {
            readings,
            catalog,
            config: AnalyticsConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: AnalyticsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn get_reading(&self, id: &ReadingId) -> Result<Option<Reading>, StoreError> {
        self.readings.find_by_identity(id)
    }

    /// Readings of all sensors of `device_id` within `period`, ordered by
    /// timestamp then sensor ID.
    pub fn get_readings_from_device_in_period(
        &self,
        device_id: &DeviceId,
        period: &Period,
    ) -> Result<Vec<Reading>, StoreError> {
        if period.is_empty() {
            return Ok(Vec::new());
        }
        let mut readings = Vec::new();
        for sensor_id in self.catalog.sensors_for_device(device_id)? {
            readings.extend(
                self.readings
                    .find_readings_by_sensor_id_in_period(&sensor_id, period)?,
            );
        }
        // Stable sort: equal (timestamp, sensor) pairs keep store order.
        readings.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.sensor_id.cmp(&b.sensor_id))
        });
        tracing::debug!(device_id = %device_id, count = readings.len(), "device readings in period");
        Ok(readings)
    }

    pub fn get_reading_ids_from_device_in_period(
        &self,
        device_id: &DeviceId,
        period: &Period,
    ) -> Result<Vec<ReadingId>, StoreError> {
        Ok(self
            .get_readings_from_device_in_period(device_id, period)?
            .into_iter()
            .map(|reading| reading.id)
            .collect())
    }

    /// Maximum instantaneous temperature difference between two devices.
    pub fn get_max_instant_temperature_difference_in_period(
        &self,
        device_a: &DeviceId,
        device_b: &DeviceId,
        period: &Period,
    ) -> Result<Option<Quantity>, AnalyticsError> {
        self.get_max_instant_temperature_difference_in_period_with_context(
            device_a,
            device_b,
            period,
            &self.default_context(),
        )
    }

    pub fn get_max_instant_temperature_difference_in_period_with_context(
        &self,
        device_a: &DeviceId,
        device_b: &DeviceId,
        period: &Period,
        ctx: &QueryContext,
    ) -> Result<Option<Quantity>, AnalyticsError> {
        max_temperature_difference(
            self.readings,
            self.catalog,
            device_a,
            device_b,
            period,
            &self.timeline_config(),
            ctx,
        )
    }

    /// Peak instantaneous total power consumption across every device with a
    /// power sensor.
    pub fn get_peak_power_consumption_in_period(
        &self,
        period: &Period,
    ) -> Result<Option<Quantity>, AnalyticsError> {
        self.get_peak_power_consumption_in_period_with_context(period, &self.default_context())
    }

    pub fn get_peak_power_consumption_in_period_with_context(
        &self,
        period: &Period,
        ctx: &QueryContext,
    ) -> Result<Option<Quantity>, AnalyticsError> {
        peak_power_consumption(
            self.readings,
            self.catalog,
            period,
            &self.timeline_config(),
            ctx,
        )
    }

    fn timeline_config(&self) -> TimelineConfig {
        TimelineConfig {
            staleness_limit: self.config.staleness_limit,
        }
    }

    fn default_context(&self) -> QueryContext {
        self.config
            .query_timeout
            .map_or_else(QueryContext::background, QueryContext::with_timeout)
    }
}

/// Maximum over the period of `|T_a(t) - T_b(t)|`, evaluated at every instant
/// where both devices have a defined temperature.
///
/// A device with several temperature sensors contributes the value of the
/// sensor observed most recently.
pub fn max_temperature_difference<R, C>(
    readings: &R,
    catalog: &C,
    device_a: &DeviceId,
    device_b: &DeviceId,
    period: &Period,
    config: &TimelineConfig,
    ctx: &QueryContext,
) -> Result<Option<Quantity>, AnalyticsError>
where
    R: ReadingRepository + ?Sized,
    C: SensorCatalog + ?Sized,
{
    if period.is_empty() {
        return Ok(None);
    }
    ctx.check()?;

    let sensors_a = catalog.resolve_sensors_for_device(device_a, Capability::Temperature)?;
    let sensors_b = catalog.resolve_sensors_for_device(device_b, Capability::Temperature)?;
    if sensors_a.is_empty() || sensors_b.is_empty() {
        tracing::debug!(
            device_a = %device_a,
            device_b = %device_b,
            sensors_a = sensors_a.len(),
            sensors_b = sensors_b.len(),
            "device without temperature sensor"
        );
        return Ok(None);
    }

    let timeline = build_timeline(
        readings,
        sensors_a.union(&sensors_b).cloned().collect(),
        period,
        Unit::Celsius,
        config,
        ctx,
    )?;
    let side_a = membership(&timeline, &sensors_a);
    let side_b = membership(&timeline, &sensors_b);

    let mut max_difference: Option<f64> = None;
    timeline.walk(ctx, |state| {
        if let (Some(a), Some(b)) = (freshest(state, &side_a), freshest(state, &side_b)) {
            let difference = (a.value - b.value).abs();
            max_difference = Some(max_difference.map_or(difference, |m| m.max(difference)));
        }
    })?;

    Ok(max_difference.map(Quantity::celsius))
}

/// Maximum over the period of the summed defined power values of every power
/// sensor in the catalog.
pub fn peak_power_consumption<R, C>(
    readings: &R,
    catalog: &C,
    period: &Period,
    config: &TimelineConfig,
    ctx: &QueryContext,
) -> Result<Option<Quantity>, AnalyticsError>
where
    R: ReadingRepository + ?Sized,
    C: SensorCatalog + ?Sized,
{
    if period.is_empty() {
        return Ok(None);
    }
    ctx.check()?;

    let mut sensors = BTreeSet::new();
    for device_id in catalog.device_ids()? {
        sensors.extend(catalog.resolve_sensors_for_device(&device_id, Capability::Power)?);
    }
    if sensors.is_empty() {
        tracing::debug!("no power sensors registered");
        return Ok(None);
    }

    let timeline = build_timeline(
        readings,
        sensors.into_iter().collect(),
        period,
        Unit::Watt,
        config,
        ctx,
    )?;

    let mut peak: Option<f64> = None;
    timeline.walk(ctx, |state| {
        let mut defined = state.defined().peekable();
        if defined.peek().is_none() {
            return;
        }
        let total: f64 = defined.map(|(_, v)| v.value).sum();
        peak = Some(peak.map_or(total, |p| p.max(total)));
    })?;

    Ok(peak.map(Quantity::watts))
}

fn build_timeline<R: ReadingRepository + ?Sized>(
    readings: &R,
    sensors: Vec<SensorId>,
    period: &Period,
    unit: Unit,
    config: &TimelineConfig,
    ctx: &QueryContext,
) -> Result<Timeline, AnalyticsError> {
    let series = readings.snapshot_series(&sensors, period)?;
    ctx.check()?;
    Ok(Timeline::build(series, period, unit, config))
}

/// Per-source flags marking which timeline sources belong to `sensors`.
fn membership(timeline: &Timeline, sensors: &BTreeSet<SensorId>) -> Vec<bool> {
    timeline
        .sources()
        .iter()
        .map(|sensor_id| sensors.contains(sensor_id))
        .collect()
}

/// The most recently observed defined value among the flagged sources.
fn freshest(state: &InstantState<'_>, side: &[bool]) -> Option<SourceValue> {
    state
        .defined()
        .filter(|(source, _)| side[*source])
        .max_by_key(|(source, value)| (value.observed_at, *source))
        .map(|(_, value)| value)
}
