//! Sensor catalog: which sensors a device carries and what they measure.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::repository::StoreError;
use crate::types::{DeviceId, SensorId};

/// One sensor attached to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRegistration {
    pub sensor_id: SensorId,
    pub device_id: DeviceId,
    pub capability: Capability,
}

/// Lookup from devices to the sensors that produce a capability.
///
/// Analytics never resolve sensors themselves; they ask the catalog.
pub trait SensorCatalog {
    /// Sensors of `device_id` producing `capability`, in lexical order.
    fn resolve_sensors_for_device(
        &self,
        device_id: &DeviceId,
        capability: Capability,
    ) -> Result<BTreeSet<SensorId>, StoreError>;

    /// Every sensor of `device_id`, regardless of capability.
    fn sensors_for_device(&self, device_id: &DeviceId) -> Result<BTreeSet<SensorId>, StoreError>;

    /// Every known device, in lexical order.
    fn device_ids(&self) -> Result<Vec<DeviceId>, StoreError>;
}

/// Catalog held in memory, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    devices: BTreeSet<DeviceId>,
    sensors: BTreeMap<SensorId, SensorRegistration>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device that may not have sensors yet.
    pub fn register_device(&mut self, device_id: DeviceId) {
        self.devices.insert(device_id);
    }

    /// Registers a sensor and its device. Re-registering a sensor ID replaces it.
    pub fn register_sensor(&mut self, registration: SensorRegistration) {
        self.devices.insert(registration.device_id.clone());
        self.sensors
            .insert(registration.sensor_id.clone(), registration);
    }

    pub fn sensor(&self, sensor_id: &SensorId) -> Option<&SensorRegistration> {
        self.sensors.get(sensor_id)
    }

    fn sensors_matching<'a>(
        &'a self,
        device_id: &'a DeviceId,
        capability: Option<Capability>,
    ) -> impl Iterator<Item = SensorId> + 'a {
        self.sensors
            .values()
            .filter(move |s| &s.device_id == device_id)
            .filter(move |s| capability.is_none_or(|c| s.capability == c))
            .map(|s| s.sensor_id.clone())
    }
}

impl FromIterator<SensorRegistration> for InMemoryCatalog {
    fn from_iter<I: IntoIterator<Item = SensorRegistration>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for registration in iter {
            catalog.register_sensor(registration);
        }
        catalog
    }
}

impl SensorCatalog for InMemoryCatalog {
    fn resolve_sensors_for_device(
        &self,
        device_id: &DeviceId,
        capability: Capability,
    ) -> Result<BTreeSet<SensorId>, StoreError> {
        Ok(self.sensors_matching(device_id, Some(capability)).collect())
    }

    fn sensors_for_device(&self, device_id: &DeviceId) -> Result<BTreeSet<SensorId>, StoreError> {
        Ok(self.sensors_matching(device_id, None).collect())
    }

    fn device_ids(&self) -> Result<Vec<DeviceId>, StoreError> {
        Ok(self.devices.iter().cloned().collect())
    }
}
