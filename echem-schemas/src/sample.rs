//! Physical specimens: catalyst electrodes, diamond samples and thin-film library pixels.
//!
//! A sample exclusively owns its synthesis steps, and every step owns its substance list.
//! Measurements refer to samples only through [`EntityReference`](crate::reference::EntityReference).

use crate::quantity::Quantity;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A chemical used in a synthesis step or an electrolyte.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Substance {
    pub name: Option<String>,
    /// Hill or free-form formula, e.g. `NiFe2O4` or `CuSO4·5H2O`.
    pub formula: Option<String>,
    pub concentration: Option<Quantity<f64>>,
    pub amount: Option<Quantity<f64>>,
}

/// One ordered step of a synthesis route.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SynthesisStep {
    /// The method used, e.g. "electrodeposition" or "drop casting".
    pub method: Option<String>,
    pub description: Option<String>,
    pub substances: Vec<Substance>,
}

/// Support material carrying the active layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Substrate {
    pub substrate_type: Option<String>,
    /// Free-form dimension, e.g. "1 cm x 1 cm".
    pub dimension: Option<String>,
}

/// Atomic fraction of one element in the sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementFraction {
    pub element: String,
    pub atomic_fraction: f64,
}

/// Distinguishes stand-alone specimens from pixels on a combinatorial library.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SampleVariant {
    #[default]
    Single,
    LibraryPixel {
        x: Quantity<f64>,
        y: Quantity<f64>,
        thickness: Option<Quantity<f64>>,
    },
}

/// The etching route used for an MXene sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MxeneMethod {
    /// Molten salt etching.
    MS,
    /// Hydrofluoric acid etching.
    HF,
}

impl MxeneMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MS => "MS",
            Self::HF => "HF",
        }
    }
}

/// MXene-specific identity used to compose `{yyyymmdd}_{owner}_{formula}_{method}` lab ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MxeneIdentity {
    pub formula: String,
    pub method: MxeneMethod,
}

/// The top-level sample record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    pub lab_id: Option<String>,
    pub name: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    /// Institute prefix used when minting lab ids, e.g. "CE-NOME".
    pub institute: Option<String>,
    /// Four-letter owner initials, e.g. "AbCd".
    pub owner: Option<String>,
    pub chemical_formulas: Vec<String>,
    pub substrate: Option<Substrate>,
    pub active_area: Option<Quantity<f64>>,
    pub synthesis: Vec<SynthesisStep>,
    /// Derived from the formulas; recomputed by the normalizer when empty.
    pub elemental_composition: Vec<ElementFraction>,
    pub producer: Option<String>,
    pub origin: Option<String>,
    pub disposal_date: Option<NaiveDateTime>,
    pub description: Option<String>,
    pub variant: SampleVariant,
    pub mxene: Option<MxeneIdentity>,
}

impl Sample {
    /// All formulas attached to the sample and its synthesis substances, in declaration order.
    pub fn all_formulas(&self) -> Vec<&str> {
        let mut formulas: Vec<&str> = self.chemical_formulas.iter().map(String::as_str).collect();
        for step in &self.synthesis {
            for substance in &step.substances {
                if let Some(formula) = substance.formula.as_deref() {
                    formulas.push(formula);
                }
            }
        }
        formulas
    }
}
