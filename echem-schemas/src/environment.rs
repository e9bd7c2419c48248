use crate::{quantity::Quantity, sample::Substance};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Purging {
    pub gas: Option<String>,
    pub time: Option<Quantity<f64>>,
    pub temperature: Option<Quantity<f64>>,
}

/// The electrolyte and atmosphere surrounding an experiment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Environment {
    pub lab_id: Option<String>,
    pub name: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    pub ph: Option<f64>,
    pub solvent: Option<String>,
    pub substances: Vec<Substance>,
    pub purging: Option<Purging>,
    pub description: Option<String>,
}

/// Ambient conditions recorded alongside a measurement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Atmosphere {
    pub temperature: Option<Quantity<f64>>,
    pub relative_humidity: Option<f64>,
    pub ambient_pressure: Option<Quantity<f64>>,
}
