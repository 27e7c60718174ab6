//! Timeline merge engine.
//!
//! Merges independent, irregularly sampled per-sensor series into one
//! chronologically ordered event stream and replays it while tracking the
//! current value of every source.
//!
//! # Algorithm Summary
//!
//! 1. Each source contributes its in-period readings. If it reported before
//!    the period, its last earlier reading is re-emitted at the period start
//!    (carry-forward), keeping the instant it was actually observed.
//! 2. Per-source lists are merged with a min-heap keyed by
//!    `(timestamp, source index, position)`. Sources are indexed in lexical
//!    sensor-ID order, so ties across sources are deterministic.
//! 3. The walk applies every event sharing a timestamp, then hands the
//!    combined state for that instant to the caller. A source with no
//!    reading yet is `None`, never zero.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Duration, Utc};

use crate::analytics::AnalyticsError;
use crate::context::QueryContext;
use crate::reading::{Period, Reading};
use crate::repository::SeriesSnapshot;
use crate::types::SensorId;
use crate::value::Unit;

/// How many events are applied between cancellation checks.
const CHECK_INTERVAL: usize = 256;

/// Configuration for timeline replay.
#[derive(Debug, Clone, Default)]
pub struct TimelineConfig {
    /// A carried value older than this (relative to the instant being
    /// evaluated) counts as undefined. `None` carries values indefinitely.
    pub staleness_limit: Option<Duration>,
}

/// The latest known value of one source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceValue {
    pub value: f64,
    /// When the value was actually measured.
    pub observed_at: DateTime<Utc>,
}

/// One update point of the merged timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    /// Index into [`Timeline::sources`].
    pub source: usize,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    /// True for events synthesized at the period start from an earlier reading.
    pub carried: bool,
}

/// Merged, ordered events for a set of sources over one period.
#[derive(Debug, Clone)]
pub struct Timeline {
    sources: Vec<SensorId>,
    events: Vec<TimelineEvent>,
    skipped: usize,
    staleness_limit: Option<Duration>,
}

/// Combined state of all sources right after one instant was applied.
#[derive(Debug)]
pub struct InstantState<'a> {
    pub at: DateTime<Utc>,
    slots: &'a [Option<SourceValue>],
    staleness_limit: Option<Duration>,
}

impl InstantState<'_> {
    /// Current value of `source`, or `None` if it has not reported or its
    /// value is older than the staleness limit.
    pub fn value(&self, source: usize) -> Option<SourceValue> {
        let current = self.slots.get(source).copied().flatten()?;
        match self.staleness_limit {
            Some(limit) if self.at - current.observed_at > limit => None,
            _ => Some(current),
        }
    }

    /// All sources with a defined value, in source order.
    pub fn defined(&self) -> impl Iterator<Item = (usize, SourceValue)> + '_ {
        (0..self.slots.len()).filter_map(|source| self.value(source).map(|v| (source, v)))
    }
}

impl Timeline {
    /// Builds the timeline for `series` over `period`.
    ///
    /// Readings that are not quantities in `unit` are skipped and counted in
    /// [`skipped`](Self::skipped).
    pub fn build(
        mut series: Vec<SeriesSnapshot>,
        period: &Period,
        unit: Unit,
        config: &TimelineConfig,
    ) -> Self {
        series.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));

        let mut skipped = 0;
        let mut sources = Vec::with_capacity(series.len());
        let mut per_source: Vec<Vec<TimelineEvent>> = Vec::with_capacity(series.len());

        for (source, snapshot) in series.into_iter().enumerate() {
            let mut events = Vec::with_capacity(snapshot.readings.len() + 1);

            if !period.is_empty() {
                if let Some(carried) = snapshot.carried.as_ref().filter(|r| r.timestamp < period.start) {
                    match to_event(carried, source, unit) {
                        Some(mut event) => {
                            event.timestamp = period.start;
                            event.carried = true;
                            events.push(event);
                        }
                        None => skipped += skip(carried, unit),
                    }
                }
            }

            let mut readings = snapshot.readings;
            readings.retain(|r| period.contains(r.timestamp));
            readings.sort_by_key(|r| r.timestamp);
            for reading in &readings {
                match to_event(reading, source, unit) {
                    Some(event) => events.push(event),
                    None => skipped += skip(reading, unit),
                }
            }

            sources.push(snapshot.sensor_id);
            per_source.push(events);
        }

        let events = merge(per_source);
        tracing::debug!(
            sources = sources.len(),
            events = events.len(),
            skipped,
            "built timeline"
        );

        Self {
            sources,
            events,
            skipped,
            staleness_limit: config.staleness_limit,
        }
    }

    /// Source sensor IDs; event `source` fields index into this slice.
    pub fn sources(&self) -> &[SensorId] {
        &self.sources
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Number of readings dropped for having the wrong kind of value.
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Replays the timeline, calling `visit` once per distinct timestamp after
    /// all events at that timestamp have been applied.
    pub fn walk<F>(&self, ctx: &QueryContext, mut visit: F) -> Result<(), AnalyticsError>
    where
        F: FnMut(&InstantState<'_>),
    {
        ctx.check()?;
        let mut slots: Vec<Option<SourceValue>> = vec![None; self.sources.len()];
        let mut applied = 0;
        let mut i = 0;

        while i < self.events.len() {
            let at = self.events[i].timestamp;
            while let Some(event) = self.events.get(i).filter(|e| e.timestamp == at) {
                slots[event.source] = Some(SourceValue {
                    value: event.value,
                    observed_at: event.observed_at,
                });
                i += 1;
                applied += 1;
                if applied % CHECK_INTERVAL == 0 {
                    ctx.check()?;
                }
            }
            visit(&InstantState {
                at,
                slots: &slots,
                staleness_limit: self.staleness_limit,
            });
        }

        Ok(())
    }
}

fn to_event(reading: &Reading, source: usize, unit: Unit) -> Option<TimelineEvent> {
    let value = reading.value.magnitude_in(unit)?;
    Some(TimelineEvent {
        timestamp: reading.timestamp,
        source,
        value,
        observed_at: reading.timestamp,
        carried: false,
    })
}

fn skip(reading: &Reading, unit: Unit) -> usize {
    tracing::warn!(
        reading_id = %reading.id,
        sensor_id = %reading.sensor_id,
        expected = %unit,
        value = ?reading.value,
        "skipping reading with incompatible value"
    );
    1
}

/// K-way merge of per-source event lists, each already in timestamp order.
fn merge(per_source: Vec<Vec<TimelineEvent>>) -> Vec<TimelineEvent> {
    let total = per_source.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);
    let mut heap = BinaryHeap::with_capacity(per_source.len());

    for (source, events) in per_source.iter().enumerate() {
        if let Some(first) = events.first() {
            heap.push(Reverse((first.timestamp, source, 0usize)));
        }
    }

    while let Some(Reverse((_, source, position))) = heap.pop() {
        let events = &per_source[source];
        merged.push(events[position].clone());
        if let Some(next) = events.get(position + 1) {
            heap.push(Reverse((next.timestamp, source, position + 1)));
        }
    }

    merged
}
