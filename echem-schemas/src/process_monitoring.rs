//! Auxiliary process records: pumps, oxygen sensors, electrolyser test benches, sputter
//! deposition runs and images.

use crate::quantity::{Quantity, Signal};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PumpRate {
    pub datetime: Vec<NaiveDateTime>,
    pub pump_rate: Option<Signal>,
    pub pressure: Option<Signal>,
    pub extra_columns: IndexMap<String, Signal>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseFluorometry {
    pub datetime: Vec<NaiveDateTime>,
    pub oxygen: Option<Signal>,
    pub temperature: Option<Signal>,
    pub phase: Option<Signal>,
    pub amplitude: Option<Signal>,
    pub extra_columns: IndexMap<String, Signal>,
}

/// A LabVIEW TDMS test-bench recording.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElectrolyserPerformance {
    pub name: Option<String>,
    pub time: Option<Signal>,
    pub channels: IndexMap<String, Signal>,
    pub properties: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SputterTarget {
    pub name: String,
    pub material: Option<String>,
    pub power: Option<Quantity<f64>>,
    pub power_supply: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SputterProcessStep {
    pub name: Option<String>,
    pub sputter_pressure: Option<Quantity<f64>>,
    pub gas_flow: Option<Quantity<f64>>,
    pub gas: Option<String>,
    pub duration: Option<Quantity<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SputterObservable {
    pub temperature: Option<Quantity<f64>>,
    pub base_pressure: Option<Quantity<f64>>,
}

/// A multi-target (co-)sputtering run sheet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiTargetSputtering {
    pub holder: Option<String>,
    pub substrate: Option<String>,
    pub targets: Vec<SputterTarget>,
    pub process_properties: Vec<SputterProcessStep>,
    pub observables: Vec<SputterObservable>,
    pub notes: Option<String>,
}

/// A raster image plus its derived PNG preview.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageData {
    pub image_file: Option<String>,
    pub preview_file: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// SEM/TEM images.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElectronMicroscopy {
    pub images: Vec<ImageData>,
    pub accelerating_voltage: Option<Quantity<f64>>,
    pub magnification: Option<f64>,
}
