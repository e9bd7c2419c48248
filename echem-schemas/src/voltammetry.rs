//! Potentiostatic and galvanostatic DC techniques: voltammetry, chrono methods and open circuit.

use crate::quantity::{Quantity, Signal};
use serde::{Deserialize, Serialize};

/// One sweep or one cycle of a DC measurement. All signals share the same length.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VoltammetryCycle {
    pub time: Option<Signal>,
    pub voltage: Option<Signal>,
    pub current: Option<Signal>,
    /// `current / sample_area`; only present when the parent's sample area is known.
    pub current_density: Option<Signal>,
    pub charge: Option<Signal>,
    pub charge_density: Option<Signal>,
    /// `voltage + voltage_shift - resistance * current`.
    pub voltage_rhe_compensated: Option<Signal>,
}

impl VoltammetryCycle {
    pub fn len(&self) -> usize {
        [&self.time, &self.voltage, &self.current]
            .iter()
            .filter_map(|s| s.as_ref().map(Signal::len))
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a chrono measurement holds the current or the voltage constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    ConstantCurrent,
    ConstantVoltage,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CvProperties {
    pub initial_potential: Option<Quantity<f64>>,
    pub limit_potential_1: Option<Quantity<f64>>,
    pub limit_potential_2: Option<Quantity<f64>>,
    pub final_potential: Option<Quantity<f64>>,
    pub scan_rate: Option<Quantity<f64>>,
    pub step_size: Option<Quantity<f64>>,
    pub cycles: Option<u32>,
    pub open_circuit_reference: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LsvProperties {
    pub initial_potential: Option<Quantity<f64>>,
    pub final_potential: Option<Quantity<f64>>,
    pub scan_rate: Option<Quantity<f64>>,
    pub step_size: Option<Quantity<f64>>,
}

/// Galvanodynamic sweep settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LsgProperties {
    pub initial_current: Option<Quantity<f64>>,
    pub final_current: Option<Quantity<f64>>,
    pub scan_rate: Option<Quantity<f64>>,
    pub step_size: Option<Quantity<f64>>,
}

/// Shared by chronoamperometry, chronopotentiometry and chronocoulometry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChronoProperties {
    pub mode: Option<ControlMode>,
    pub pre_step_potential: Option<Quantity<f64>>,
    pub pre_step_current: Option<Quantity<f64>>,
    pub pre_step_delay_time: Option<Quantity<f64>>,
    pub step_1_potential: Option<Quantity<f64>>,
    pub step_1_current: Option<Quantity<f64>>,
    pub step_1_time: Option<Quantity<f64>>,
    pub step_2_potential: Option<Quantity<f64>>,
    pub step_2_current: Option<Quantity<f64>>,
    pub step_2_time: Option<Quantity<f64>>,
    pub sample_period: Option<Quantity<f64>>,
    pub voltage_limit: Option<Quantity<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcvProperties {
    pub total_time: Option<Quantity<f64>>,
    pub sample_period: Option<Quantity<f64>>,
    pub stability: Option<Quantity<f64>>,
}

/// A DC measurement: the flat sweep as recorded plus its cycle decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voltammetry<P> {
    pub properties: Option<P>,
    pub sample_area: Option<Quantity<f64>>,
    pub voltage_shift: Option<Quantity<f64>>,
    pub resistance: Option<Quantity<f64>>,
    /// The full trace in recording order.
    pub curve: Option<VoltammetryCycle>,
    /// Cycle decomposition; empty for single-sweep techniques.
    pub cycles: Vec<VoltammetryCycle>,
}

impl<P> Default for Voltammetry<P> {
    fn default() -> Self {
        Self {
            properties: None,
            sample_area: None,
            voltage_shift: None,
            resistance: None,
            curve: None,
            cycles: Vec::new(),
        }
    }
}

impl<P> Voltammetry<P> {
    /// The cycles when split, otherwise the flat curve as the single sweep.
    pub fn sweeps(&self) -> Vec<&VoltammetryCycle> {
        if self.cycles.is_empty() {
            self.curve.iter().collect()
        } else {
            self.cycles.iter().collect()
        }
    }

    pub fn has_data(&self) -> bool {
        self.curve.as_ref().is_some_and(|c| !c.is_empty())
    }
}
