//! Sensor capability enum as the single source of truth for capability strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::ValidationError;
use crate::value::Unit;

/// Semantic category of what a sensor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Temperature,
    Power,
    AveragePower,
    Energy,
    Humidity,
    DewPoint,
    SolarIrradiance,
    ScalePercentage,
    Wind,
    OnOff,
    Sunrise,
    Sunset,
}

impl Capability {
    /// The unit scalar readings of this capability are expected in.
    ///
    /// Returns `None` for capabilities that do not produce quantities.
    #[must_use]
    pub const fn expected_unit(&self) -> Option<Unit> {
        match self {
            Self::Temperature | Self::DewPoint => Some(Unit::Celsius),
            Self::Power | Self::AveragePower => Some(Unit::Watt),
            Self::Energy => Some(Unit::WattHour),
            Self::Humidity | Self::ScalePercentage => Some(Unit::Percent),
            Self::SolarIrradiance => Some(Unit::WattPerSquareMetre),
            Self::Wind | Self::OnOff | Self::Sunrise | Self::Sunset => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Power => "power",
            Self::AveragePower => "average_power",
            Self::Energy => "energy",
            Self::Humidity => "humidity",
            Self::DewPoint => "dew_point",
            Self::SolarIrradiance => "solar_irradiance",
            Self::ScalePercentage => "scale_percentage",
            Self::Wind => "wind",
            Self::OnOff => "on_off",
            Self::Sunrise => "sunrise",
            Self::Sunset => "sunset",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Sensor model names from the device catalog are accepted as aliases.
        match s {
            "temperature" | "SensorOfTemperature" => Ok(Self::Temperature),
            "power" | "SensorOfPowerConsumption" => Ok(Self::Power),
            "average_power" | "SensorOfAveragePowerConsumption" => Ok(Self::AveragePower),
            "energy" | "SensorOfElectricEnergyConsumption" => Ok(Self::Energy),
            "humidity" | "SensorOfHumidity" => Ok(Self::Humidity),
            "dew_point" | "SensorOfDewPoint" => Ok(Self::DewPoint),
            "solar_irradiance" | "SensorOfSolarIrradiance" => Ok(Self::SolarIrradiance),
            "scale_percentage" | "SensorOfScalePercentage" => Ok(Self::ScalePercentage),
            "wind" | "SensorOfWind" => Ok(Self::Wind),
            "on_off" | "SensorOfOnOff" => Ok(Self::OnOff),
            "sunrise" | "SensorOfSunrise" => Ok(Self::Sunrise),
            "sunset" | "SensorOfSunset" => Ok(Self::Sunset),
            _ => Err(ValidationError::UnknownCapability {
                value: s.to_string(),
            }),
        }
    }
}

impl Serialize for Capability {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_variants() {
        let variants = [
            Capability::Temperature,
            Capability::Power,
            Capability::AveragePower,
            Capability::Energy,
            Capability::Humidity,
            Capability::DewPoint,
            Capability::SolarIrradiance,
            Capability::ScalePercentage,
            Capability::Wind,
            Capability::OnOff,
            Capability::Sunrise,
            Capability::Sunset,
        ];

        for variant in &variants {
            let s = variant.to_string();
            let parsed: Capability = s.parse().expect("should parse");
            assert_eq!(parsed, *variant, "roundtrip failed for {variant:?}");
        }
    }

    #[test]
    fn sensor_model_aliases_parse() {
        let temperature: Capability = "SensorOfTemperature".parse().expect("should parse");
        assert_eq!(temperature, Capability::Temperature);

        let power: Capability = "SensorOfPowerConsumption".parse().expect("should parse");
        assert_eq!(power, Capability::Power);
    }

    #[test]
    fn unknown_capability_errors() {
        let err = "radiation".parse::<Capability>().unwrap_err();
        assert_eq!(err.to_string(), "unknown capability: radiation");
    }

    #[test]
    fn analytic_capabilities_have_expected_units() {
        assert_eq!(Capability::Temperature.expected_unit(), Some(Unit::Celsius));
        assert_eq!(Capability::Power.expected_unit(), Some(Unit::Watt));
        assert_eq!(Capability::OnOff.expected_unit(), None);
    }
}
