//! Records of the NECC flow-cell experiments: potentiostat, thermocouple and gas chromatography
//! traces plus the faradaic-efficiency results derived from them.

use crate::quantity::{Quantity, Signal};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Gases the GC method quantifies. Anything else in the worksheet is ignored.
pub const RECOGNIZED_GASES: [&str; 6] = ["CO", "CH4", "C2H4", "C2H6", "H2", "N2"];

/// Instrument index of a recognized gas: the first four run on the FID channel (0), the rest on
/// the TCD channel (1).
pub fn instrument_index(gas: &str) -> Option<u8> {
    RECOGNIZED_GASES
        .iter()
        .position(|g| *g == gas)
        .map(|i| if i < 4 { 0 } else { 1 })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedGas {
    pub name: String,
    pub flow_rate: Option<Quantity<f64>>,
}

/// Experimental details as entered on the workbook's first sheet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NeccProperties {
    pub cell_type: Option<String>,
    pub has_reference_electrode: Option<bool>,
    pub reference_electrode_type: Option<String>,
    pub membrane_type: Option<String>,
    pub membrane_name: Option<String>,
    pub membrane_thickness: Option<Quantity<f64>>,
    pub gasket_thickness: Option<Quantity<f64>>,
    pub anolyte_type: Option<String>,
    pub anolyte_concentration: Option<Quantity<f64>>,
    pub anolyte_flow_rate: Option<Quantity<f64>>,
    pub anolyte_volume: Option<Quantity<f64>>,
    pub has_humidifier: Option<bool>,
    pub humidifier_temperature: Option<Quantity<f64>>,
    pub water_trap_volume: Option<Quantity<f64>>,
    pub bleedline_flow_rate: Option<Quantity<f64>>,
    pub nitrogen_start_value: Option<Quantity<f64>>,
    pub chronoanalysis_method: Option<String>,
    pub feed_gases: Vec<FeedGas>,
    pub anode_lab_id: Option<String>,
    pub cathode_lab_id: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PotentiometryTrace {
    pub datetime: Vec<NaiveDateTime>,
    pub current: Option<Signal>,
    pub working_electrode_potential: Option<Signal>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThermocoupleTrace {
    /// Window starts of the three-minute resampling grid.
    pub datetime: Vec<NaiveDateTime>,
    pub temperature_cathode: Option<Signal>,
    pub temperature_anode: Option<Signal>,
    pub pressure: Option<Signal>,
}

/// One detected gas across all GC injections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasChromatographyMeasurement {
    pub instrument_file_name: Option<String>,
    pub gas_type: String,
    pub instrument_index: u8,
    /// Every injection with a timestamp; samples without a reading are NaN.
    pub datetime: Vec<NaiveDateTime>,
    #[serde(default, with = "crate::quantity::gaps")]
    pub retention_time: Option<Signal>,
    #[serde(default, with = "crate::quantity::gaps")]
    pub area: Option<Signal>,
    #[serde(default, with = "crate::quantity::gaps")]
    pub ppm: Option<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasFeResults {
    pub gas_type: String,
    pub current: Option<Signal>,
    /// Flipped to positive only when every value in the workbook is non-positive.
    pub faradaic_efficiency: Option<Signal>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeResults {
    pub datetime: Vec<NaiveDateTime>,
    pub total_flow_rate: Option<Signal>,
    pub total_fe: Option<Signal>,
    pub cell_current: Option<Signal>,
    pub cell_voltage: Option<Signal>,
    pub gas_results: Vec<GasFeResults>,
}

/// CE_NECC_EC_GC: a bundled potentiostat + thermocouple + GC experiment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NeccExperiment {
    pub properties: Option<NeccProperties>,
    pub potentiometry: Option<PotentiometryTrace>,
    pub thermocouple: Option<ThermocoupleTrace>,
    pub gas_chromatography: Vec<GasChromatographyMeasurement>,
    pub fe_results: Option<FeResults>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_index_split() {
        assert_eq!(instrument_index("CO"), Some(0));
        assert_eq!(instrument_index("C2H6"), Some(0));
        assert_eq!(instrument_index("H2"), Some(1));
        assert_eq!(instrument_index("N2"), Some(1));
        assert_eq!(instrument_index("O2"), None);
    }
}
