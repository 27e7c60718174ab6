//! Measured values carried by readings.
//!
//! A [`Value`] is a tagged union: scalar measurements are a [`Quantity`]
//! (unit + magnitude) and take part in analytics, everything else (switch
//! states, wind vectors, sunrise/sunset instants) is carried verbatim.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::types::ValidationError;

/// Unit of a scalar measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Celsius,
    Percent,
    Watt,
    WattHour,
    WattPerSquareMetre,
}

impl Unit {
    /// String representation used in storage and on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Celsius => "celsius",
            Self::Percent => "percent",
            Self::Watt => "watt",
            Self::WattHour => "watt_hour",
            Self::WattPerSquareMetre => "watt_per_square_metre",
        }
    }

    /// Short symbol for human-readable output.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Percent => "%",
            Self::Watt => "W",
            Self::WattHour => "Wh",
            Self::WattPerSquareMetre => "W/m²",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Unit {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "celsius" | "C" | "°C" => Ok(Self::Celsius),
            "percent" | "%" => Ok(Self::Percent),
            "watt" | "W" => Ok(Self::Watt),
            "watt_hour" | "Wh" => Ok(Self::WattHour),
            "watt_per_square_metre" | "W/m2" => Ok(Self::WattPerSquareMetre),
            _ => Err(ValidationError::UnknownUnit {
                value: s.to_string(),
            }),
        }
    }
}

/// A scalar measurement: magnitude in a fixed unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub unit: Unit,
    pub magnitude: f64,
}

impl Quantity {
    pub const fn new(unit: Unit, magnitude: f64) -> Self {
        Self { unit, magnitude }
    }

    pub const fn celsius(magnitude: f64) -> Self {
        Self::new(Unit::Celsius, magnitude)
    }

    pub const fn watts(magnitude: f64) -> Self {
        Self::new(Unit::Watt, magnitude)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_decimal(self.magnitude), self.unit.symbol())
    }
}

/// The value recorded by a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Value {
    /// A scalar measurement (temperature, power, humidity, ...).
    Quantity(Quantity),
    /// An on/off state.
    Switch { on: bool },
    /// Wind direction in radians and speed.
    Wind { direction_rad: f64, speed: f64 },
    /// A wall-clock instant, e.g. sunrise or sunset.
    Moment { at: NaiveDateTime },
}

impl Value {
    pub const fn quantity(unit: Unit, magnitude: f64) -> Self {
        Self::Quantity(Quantity::new(unit, magnitude))
    }

    /// Returns the scalar measurement, if this value has one.
    pub const fn as_quantity(&self) -> Option<Quantity> {
        match self {
            Self::Quantity(q) => Some(*q),
            _ => None,
        }
    }

    /// Returns the magnitude only when the value is a quantity in `unit`.
    pub fn magnitude_in(&self, unit: Unit) -> Option<f64> {
        self.as_quantity()
            .filter(|q| q.unit == unit)
            .map(|q| q.magnitude)
    }

    /// Returns false if any numeric component is NaN or infinite.
    pub const fn is_finite(&self) -> bool {
        match self {
            Self::Quantity(q) => q.magnitude.is_finite(),
            Self::Wind {
                direction_rad,
                speed,
            } => direction_rad.is_finite() && speed.is_finite(),
            Self::Switch { .. } | Self::Moment { .. } => true,
        }
    }

    /// Stable string serialization of the measured value, without its unit.
    pub fn value_to_string(&self) -> String {
        match self {
            Self::Quantity(q) => format_decimal(q.magnitude),
            Self::Switch { on } => on.to_string(),
            Self::Wind {
                direction_rad,
                speed,
            } => format!(
                "{}::{}",
                format_decimal(*direction_rad),
                format_decimal(*speed)
            ),
            Self::Moment { at } => at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

/// Formats a decimal so that whole numbers keep one fractional digit (`20.0`).
pub fn format_decimal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn value_to_string_keeps_fraction_for_whole_numbers() {
        assert_eq!(Value::quantity(Unit::Celsius, 20.0).value_to_string(), "20.0");
        assert_eq!(Value::quantity(Unit::Celsius, 1.5).value_to_string(), "1.5");
        assert_eq!(Value::quantity(Unit::Watt, -3.0).value_to_string(), "-3.0");
    }

    #[test]
    fn value_to_string_for_non_scalar_values() {
        assert_eq!(Value::Switch { on: true }.value_to_string(), "true");
        assert_eq!(
            Value::Wind {
                direction_rad: 1.5,
                speed: 10.0
            }
            .value_to_string(),
            "1.5::10.0"
        );
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(6, 45, 0)
            .unwrap();
        assert_eq!(Value::Moment { at }.value_to_string(), "2024-03-01T06:45:00");
    }

    #[test]
    fn magnitude_in_requires_matching_unit() {
        let value = Value::quantity(Unit::Watt, 100.0);
        assert_eq!(value.magnitude_in(Unit::Watt), Some(100.0));
        assert_eq!(value.magnitude_in(Unit::Celsius), None);
        assert_eq!(Value::Switch { on: false }.magnitude_in(Unit::Watt), None);
    }

    #[test]
    fn non_finite_values_are_detected() {
        assert!(Value::quantity(Unit::Celsius, 21.0).is_finite());
        assert!(!Value::quantity(Unit::Celsius, f64::NAN).is_finite());
        assert!(
            !Value::Wind {
                direction_rad: f64::INFINITY,
                speed: 1.0
            }
            .is_finite()
        );
    }

    #[test]
    fn value_serializes_as_tagged_union() {
        let json = serde_json::to_string(&Value::quantity(Unit::Celsius, 21.5)).unwrap();
        assert_eq!(json, r#"{"kind":"quantity","unit":"celsius","magnitude":21.5}"#);

        let parsed: Value = serde_json::from_str(r#"{"kind":"switch","on":true}"#).unwrap();
        assert_eq!(parsed, Value::Switch { on: true });
    }

    #[test]
    fn unit_parses_symbols_and_names() {
        assert_eq!("celsius".parse::<Unit>().unwrap(), Unit::Celsius);
        assert_eq!("W".parse::<Unit>().unwrap(), Unit::Watt);
        assert!("kelvin".parse::<Unit>().is_err());
    }

    #[test]
    fn quantity_display_includes_symbol() {
        assert_eq!(Quantity::celsius(1.5).to_string(), "1.5 °C");
        assert_eq!(Quantity::watts(150.0).to_string(), "150.0 W");
    }
}
