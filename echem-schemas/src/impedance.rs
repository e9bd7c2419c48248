use crate::quantity::{Quantity, Signal};
use serde::{Deserialize, Serialize};

/// The acquisition flavor of an impedance measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EisFlavor {
    /// A single spectrum without further qualification.
    #[default]
    Single,
    /// Potentiostatic EIS.
    Peis,
    /// Galvanostatic EIS.
    Geis,
    /// Impedance at zero current, used for iR determination.
    Zir,
}

/// Frequency-domain arrays of one spectrum. All five have identical length.
///
/// `z_imaginary` stores `-Im(Z)`; Nyquist plots negate it once more for display.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EisData {
    pub frequency: Option<Signal>,
    pub z_real: Option<Signal>,
    pub z_imaginary: Option<Signal>,
    pub z_modulus: Option<Signal>,
    pub z_angle: Option<Signal>,
}

impl EisData {
    pub fn len(&self) -> usize {
        self.frequency.as_ref().map_or(0, Signal::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One spectrum of a (possibly multi-segment) impedance acquisition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EisCycle {
    pub dc_voltage: Option<Quantity<f64>>,
    pub dc_current: Option<Quantity<f64>>,
    pub ac_amplitude: Option<Quantity<f64>>,
    pub data: EisData,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EisProperties {
    pub dc_voltage: Option<Quantity<f64>>,
    pub dc_current: Option<Quantity<f64>>,
    pub ac_voltage: Option<Quantity<f64>>,
    pub ac_current: Option<Quantity<f64>>,
    pub initial_frequency: Option<Quantity<f64>>,
    pub final_frequency: Option<Quantity<f64>>,
    pub points_per_decade: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Impedance {
    pub flavor: EisFlavor,
    pub properties: Option<EisProperties>,
    pub measurements: Vec<EisCycle>,
}
