use crate::quantity::{Quantity, Signal};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// NeXus-style `sample` group of an XAS scan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct XasSample {
    pub name: Option<String>,
    pub lab_id: Option<String>,
}

/// NeXus-style `instrument` group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct XasInstrument {
    pub beamline: Option<String>,
    pub monochromator: Option<String>,
    pub fluorescence_channels: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedSignal {
    pub name: String,
    pub signal: Signal,
}

/// NeXus-style `data` group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct XasData {
    pub energy: Option<Signal>,
    pub i0: Option<Signal>,
    pub i1: Option<Signal>,
    pub channels: Vec<NamedSignal>,
    /// Fluorescence yield (sum of channels over I0) or transmission absorbance ln(I0/I1).
    pub absorption: Option<Signal>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Xas {
    pub sample: XasSample,
    pub instrument: XasInstrument,
    pub data: XasData,
    pub header: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UvVis {
    pub wavelength: Option<Signal>,
    pub intensity: Option<Signal>,
    /// User-entered search window for the peak.
    pub peak_search_lower: Option<Quantity<f64>>,
    pub peak_search_upper: Option<Quantity<f64>>,
    pub peak_wavelength: Option<Quantity<f64>>,
    pub peak_value: Option<f64>,
    /// User-entered linear calibration `value = slope * concentration + intercept`.
    pub calibration_slope: Option<f64>,
    pub calibration_intercept: Option<f64>,
    pub concentration_unit: Option<String>,
    pub concentration: Option<Quantity<f64>>,
}

/// A mass-spectrometer channel; `None` marks a skipped scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassChannel {
    pub name: String,
    pub unit: String,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MassSpectrometry {
    pub datetime: Vec<Option<NaiveDateTime>>,
    pub channels: Vec<MassChannel>,
    pub header: IndexMap<String, String>,
}

/// Any two-column spectrum: XRD (2θ vs counts), Raman and IR (wavenumber vs intensity).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spectrum {
    pub x: Option<Signal>,
    pub y: Option<Signal>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrfLayer {
    pub layer: String,
    pub thickness: Option<Quantity<f64>>,
    pub composition: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Xrf {
    pub layers: Vec<XrfLayer>,
}
