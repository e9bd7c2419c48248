use crate::{quantity::Quantity, reference::EntityReference};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The electrochemical cell configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Setup {
    pub lab_id: Option<String>,
    pub name: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    /// Free-form cell geometry tag, e.g. "H-cell" or "flow cell".
    pub cell_geometry: Option<String>,
    pub reference_electrode: Option<EntityReference>,
    pub counter_electrode: Option<EntityReference>,
    pub equipment: Vec<EntityReference>,
    /// Fraction of the uncompensated resistance corrected by the potentiostat (0..=1).
    pub ir_compensation: Option<f64>,
    pub description: Option<String>,
}

/// A synthesis prescription.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Recipe {
    pub lab_id: Option<String>,
    pub name: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    pub deposition_method: Option<String>,
    pub temperature: Option<Quantity<f64>>,
    pub pressure: Option<Quantity<f64>>,
    pub mass_loading: Option<Quantity<f64>>,
    pub description: Option<String>,
}
