use crate::{quantity::Quantity, reference::EntityReference};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub cycle_index: usize,
    pub max_current_density: Option<Quantity<f64>>,
    pub min_current_density: Option<Quantity<f64>>,
    /// First potential at which the anodic current density reaches the threshold.
    pub potential_at_threshold: Option<Quantity<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMetrics {
    pub input: EntityReference,
    pub cycles: Vec<CycleMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OerResult {
    pub input: EntityReference,
    pub potential_at_threshold: Option<Quantity<f64>>,
    /// `potential_at_threshold - 1.23 V` when the potential is in the RHE frame.
    pub overpotential: Option<Quantity<f64>>,
    pub tafel_slope: Option<Quantity<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisKind {
    CvMetrics {
        threshold: Quantity<f64>,
        results: Vec<InputMetrics>,
    },
    OerAnalysis {
        threshold: Quantity<f64>,
        results: Vec<OerResult>,
    },
    Reproducibility {
        metric: String,
        values: Vec<Quantity<f64>>,
        mean: Option<Quantity<f64>>,
        standard_deviation: Option<Quantity<f64>>,
    },
}

/// A derived record whose inputs are other measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub lab_id: Option<String>,
    pub name: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    pub inputs: Vec<EntityReference>,
    pub kind: AnalysisKind,
}
