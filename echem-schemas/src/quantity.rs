use serde::{Deserialize, Serialize};

/// A value together with the unit it was recorded in.
///
/// Every physical number in the schema is stored this way; a bare `f64` never carries a
/// physical meaning on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity<T> {
    pub value: T,
    pub unit: String,
}

/// A sampled signal (time-indexed, swept or frequency-indexed) with a single unit.
pub type Signal = Quantity<Vec<f64>>;

impl<T> Quantity<T> {
    pub fn new(value: T, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

impl Quantity<f64> {
    /// Converts into `unit`, if both units share a dimension known to [`convert`].
    pub fn to(&self, unit: &str) -> Option<Quantity<f64>> {
        convert(self.value, &self.unit, unit).map(|value| Quantity::new(value, unit))
    }

    /// The value expressed in `unit`, or `None` if the units are incompatible.
    pub fn value_in(&self, unit: &str) -> Option<f64> {
        convert(self.value, &self.unit, unit)
    }
}

impl Signal {
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn first(&self) -> Option<f64> {
        self.value.first().copied()
    }

    /// Converts every sample into `unit`.
    pub fn to(&self, unit: &str) -> Option<Signal> {
        let factor = convert(1.0, &self.unit, unit)?;
        let offset = convert(0.0, &self.unit, unit)?;
        Some(Quantity::new(
            self.value.iter().map(|v| v * (factor - offset) + offset).collect(),
            unit,
        ))
    }
}

/// Serde adapter for an optional signal with gaps: a missing sample is written as `null`
/// and read back as NaN.
pub mod gaps {
    use super::Signal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Stored {
        value: Vec<Option<f64>>,
        unit: String,
    }

    pub fn serialize<S: Serializer>(signal: &Option<Signal>, serializer: S) -> Result<S::Ok, S::Error> {
        signal
            .as_ref()
            .map(|s| Stored {
                value: s.value.iter().map(|v| v.is_finite().then_some(*v)).collect(),
                unit: s.unit.clone(),
            })
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Signal>, D::Error> {
        let stored = Option::<Stored>::deserialize(deserializer)?;
        Ok(stored.map(|s| Signal::new(s.value.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect(), s.unit)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Dimension {
    Voltage,
    Current,
    Resistance,
    Time,
    Frequency,
    Pressure,
    Charge,
    Power,
    Mass,
    Volume,
    Length,
    Area,
    Temperature,
    ScanRate,
    CurrentDensity,
    ChargeDensity,
    FlowRate,
    Concentration,
    Energy,
    Angle,
    Ratio,
}

/// Scale factor into the base unit of the dimension, plus an additive offset for
/// temperature scales.
struct UnitDef {
    dimension: Dimension,
    scale: f64,
    offset: f64,
}

const PREFIXES: &[(&str, f64)] = &[
    ("p", 1e-12),
    ("n", 1e-9),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("μ", 1e-6),
    ("m", 1e-3),
    ("c", 1e-2),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
];

const BASE_UNITS: &[(&str, Dimension)] = &[
    ("V", Dimension::Voltage),
    ("A", Dimension::Current),
    ("Ohm", Dimension::Resistance),
    ("ohm", Dimension::Resistance),
    ("Ω", Dimension::Resistance),
    ("s", Dimension::Time),
    ("Hz", Dimension::Frequency),
    ("Pa", Dimension::Pressure),
    ("C", Dimension::Charge),
    ("W", Dimension::Power),
    ("g", Dimension::Mass),
    ("L", Dimension::Volume),
    ("l", Dimension::Volume),
    ("m", Dimension::Length),
    ("J", Dimension::Energy),
    ("M", Dimension::Concentration),
];

fn lookup(unit: &str) -> Option<UnitDef> {
    let unit = unit.trim();
    let fixed = match unit {
        "°C" | "degC" | "deg C" | "C°" => Some((Dimension::Temperature, 1.0, 273.15)),
        "K" => Some((Dimension::Temperature, 1.0, 0.0)),
        "min" => Some((Dimension::Time, 60.0, 0.0)),
        "h" | "hr" => Some((Dimension::Time, 3600.0, 0.0)),
        "bar" => Some((Dimension::Pressure, 1e5, 0.0)),
        "mbar" => Some((Dimension::Pressure, 1e2, 0.0)),
        "Torr" | "torr" => Some((Dimension::Pressure, 133.322_368, 0.0)),
        "atm" => Some((Dimension::Pressure, 101_325.0, 0.0)),
        "m^2" | "m²" => Some((Dimension::Area, 1.0, 0.0)),
        "cm^2" | "cm²" | "cm2" => Some((Dimension::Area, 1e-4, 0.0)),
        "mm^2" | "mm²" | "mm2" => Some((Dimension::Area, 1e-6, 0.0)),
        "V/s" => Some((Dimension::ScanRate, 1.0, 0.0)),
        "mV/s" => Some((Dimension::ScanRate, 1e-3, 0.0)),
        "A/cm^2" | "A/cm²" => Some((Dimension::CurrentDensity, 1.0, 0.0)),
        "mA/cm^2" | "mA/cm²" => Some((Dimension::CurrentDensity, 1e-3, 0.0)),
        "uA/cm^2" | "µA/cm^2" | "µA/cm²" => Some((Dimension::CurrentDensity, 1e-6, 0.0)),
        "C/cm^2" | "C/cm²" => Some((Dimension::ChargeDensity, 1.0, 0.0)),
        "mC/cm^2" | "mC/cm²" => Some((Dimension::ChargeDensity, 1e-3, 0.0)),
        "mA.h" | "mAh" => Some((Dimension::Charge, 3.6, 0.0)),
        "W.h" | "Wh" => Some((Dimension::Energy, 3600.0, 0.0)),
        "ml/min" | "mL/min" => Some((Dimension::FlowRate, 1.0, 0.0)),
        "l/min" | "L/min" => Some((Dimension::FlowRate, 1e3, 0.0)),
        "ml/h" | "mL/h" => Some((Dimension::FlowRate, 1.0 / 60.0, 0.0)),
        "mol/L" | "mol/l" => Some((Dimension::Concentration, 1.0, 0.0)),
        "mmol/L" | "mmol/l" => Some((Dimension::Concentration, 1e-3, 0.0)),
        "deg" | "°" => Some((Dimension::Angle, 1.0, 0.0)),
        "rad" => Some((Dimension::Angle, 180.0 / std::f64::consts::PI, 0.0)),
        "%" => Some((Dimension::Ratio, 1e-2, 0.0)),
        "ppm" => Some((Dimension::Ratio, 1e-6, 0.0)),
        "" | "1" => Some((Dimension::Ratio, 1.0, 0.0)),
        _ => None,
    };
    if let Some((dimension, scale, offset)) = fixed {
        return Some(UnitDef {
            dimension,
            scale,
            offset,
        });
    }

    if let Some(&(_, dimension)) = BASE_UNITS.iter().find(|(name, _)| *name == unit) {
        return Some(UnitDef {
            dimension,
            scale: 1.0,
            offset: 0.0,
        });
    }

    for (prefix, factor) in PREFIXES {
        if let Some(rest) = unit.strip_prefix(prefix) {
            if let Some(&(_, dimension)) = BASE_UNITS.iter().find(|(name, _)| *name == rest) {
                return Some(UnitDef {
                    dimension,
                    scale: *factor,
                    offset: 0.0,
                });
            }
        }
    }
    None
}

/// Converts `value` from one unit to another of the same dimension.
///
/// Returns `None` when either unit is unknown or the dimensions differ.
pub fn convert(value: f64, from: &str, to: &str) -> Option<f64> {
    if from.trim() == to.trim() {
        return Some(value);
    }
    let from = lookup(from)?;
    let to = lookup(to)?;
    if from.dimension != to.dimension {
        return None;
    }
    let base = value * from.scale + from.offset;
    Some((base - to.offset) / to.scale)
}
