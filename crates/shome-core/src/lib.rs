//! Core domain logic for the smart-home backend.
//!
//! This crate contains:
//! - Readings: immutable timestamped sensor measurements and their values
//! - Reading stores: the [`ReadingRepository`] contract and an in-memory store
//! - Sensor catalog: mapping devices to sensors by capability
//! - Timeline merge: carry-forward replay of irregular per-sensor series
//! - Analytics: temperature difference and peak power across devices

pub mod analytics;
pub mod capability;
pub mod catalog;
pub mod context;
mod memory;
pub mod reading;
pub mod repository;
pub mod timeline;
pub mod types;
pub mod value;

pub use analytics::{
    AnalyticsConfig, AnalyticsError, ReadingService, max_temperature_difference,
    peak_power_consumption,
};
pub use capability::Capability;
pub use catalog::{InMemoryCatalog, SensorCatalog, SensorRegistration};
pub use context::{CancelHandle, QueryContext};
pub use memory::InMemoryReadingStore;
pub use reading::{Period, Reading};
pub use repository::{ReadingRepository, SeriesSnapshot, StoreError, validate_reading};
pub use timeline::{Timeline, TimelineConfig};
pub use types::{DeviceId, ReadingId, SensorId, ValidationError};
pub use value::{Quantity, Unit, Value, format_decimal};
