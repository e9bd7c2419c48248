use crate::{
    environment::Atmosphere,
    impedance::Impedance,
    necc::NeccExperiment,
    process_monitoring::{
        ElectrolyserPerformance, ElectronMicroscopy, ImageData, MultiTargetSputtering,
        PhaseFluorometry, PumpRate,
    },
    reference::EntityReference,
    spectroscopy::{MassSpectrometry, Spectrum, UvVis, Xas, Xrf},
    voltammetry::{
        ChronoProperties, CvProperties, LsgProperties, LsvProperties, OcvProperties, Voltammetry,
    },
};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Role of a measurement inside a coupled multi-method run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentFunction {
    Generator,
    Detector,
}

/// One named x/y series of a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// A chart-ready set of series attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub label: String,
    pub x_label: String,
    pub y_label: String,
    pub traces: Vec<Trace>,
}

/// Attributes every measurement carries regardless of its technique.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasurementHeader {
    pub name: Option<String>,
    pub lab_id: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    /// Raw file in the same upload; `None` for manual entries.
    pub data_file: Option<String>,
    /// Position of this record's method inside a multi-method raw file.
    pub method_position: Option<usize>,
    pub station: Option<String>,
    pub method: Option<String>,
    pub description: Option<String>,
    pub samples: Vec<EntityReference>,
    pub environment: Option<EntityReference>,
    pub setup: Option<EntityReference>,
    pub connected_experiments: Vec<EntityReference>,
    pub function: Option<ExperimentFunction>,
    pub atmosphere: Vec<Atmosphere>,
    pub figures: Vec<Figure>,
    /// SHA-256 of the raw file name and content the derived fields were computed from.
    pub raw_digest: Option<String>,
}

/// Fallback for techniques no builder understands.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenericData {
    pub technique: Option<String>,
    pub metadata: IndexMap<String, serde_json::Value>,
}

/// The technique-specific part of a measurement. Consumers dispatch on the `variant` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant")]
pub enum MeasurementKind {
    CyclicVoltammetry(Voltammetry<CvProperties>),
    LinearSweepVoltammetry(Voltammetry<LsvProperties>),
    GalvanodynamicSweep(Voltammetry<LsgProperties>),
    Chronoamperometry(Voltammetry<ChronoProperties>),
    Chronopotentiometry(Voltammetry<ChronoProperties>),
    Chronocoulometry(Voltammetry<ChronoProperties>),
    OpenCircuitVoltage(Voltammetry<OcvProperties>),
    ElectrochemicalImpedanceSpectroscopy(Impedance),
    NeccElectrocatalysis(NeccExperiment),
    XasFluorescence(Xas),
    XasTransmission(Xas),
    UvVis(UvVis),
    PumpRate(PumpRate),
    PhaseFluorometryOxygen(PhaseFluorometry),
    MassSpectrometry(MassSpectrometry),
    ElectrolyserPerformance(ElectrolyserPerformance),
    TifImage(ImageData),
    MultiTargetSputtering(MultiTargetSputtering),
    Xrd(Spectrum),
    Raman(Spectrum),
    Infrared(Spectrum),
    Xrf(Xrf),
    ElectronMicroscopy(ElectronMicroscopy),
    Generic(GenericData),
}

impl MeasurementKind {
    /// The human-readable method tag stored in `MeasurementHeader::method`.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::CyclicVoltammetry(_) => "Cyclic Voltammetry",
            Self::LinearSweepVoltammetry(_) => "Linear Sweep Voltammetry",
            Self::GalvanodynamicSweep(_) => "Galvanodynamic Sweep",
            Self::Chronoamperometry(_) => "Chronoamperometry",
            Self::Chronopotentiometry(_) => "Chronopotentiometry",
            Self::Chronocoulometry(_) => "Chronocoulometry",
            Self::OpenCircuitVoltage(_) => "Open Circuit Voltage",
            Self::ElectrochemicalImpedanceSpectroscopy(_) => "Electrochemical Impedance Spectroscopy",
            Self::NeccElectrocatalysis(_) => "CE_NECC_EC_GC",
            Self::XasFluorescence(_) => "XAS Fluorescence",
            Self::XasTransmission(_) => "XAS Transmission",
            Self::UvVis(_) => "UV-vis",
            Self::PumpRate(_) => "Pump Rate",
            Self::PhaseFluorometryOxygen(_) => "Phase Fluorometry Oxygen",
            Self::MassSpectrometry(_) => "Mass Spectrometry",
            Self::ElectrolyserPerformance(_) => "Electrolyser Performance Evaluation",
            Self::TifImage(_) => "TIF Image",
            Self::MultiTargetSputtering(_) => "Multi-Target Sputtering",
            Self::Xrd(_) => "XRD",
            Self::Raman(_) => "Raman",
            Self::Infrared(_) => "Infrared",
            Self::Xrf(_) => "XRF",
            Self::ElectronMicroscopy(_) => "Electron Microscopy",
            Self::Generic(_) => "Measurement",
        }
    }

    /// The serialized variant tag.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::CyclicVoltammetry(_) => "CyclicVoltammetry",
            Self::LinearSweepVoltammetry(_) => "LinearSweepVoltammetry",
            Self::GalvanodynamicSweep(_) => "GalvanodynamicSweep",
            Self::Chronoamperometry(_) => "Chronoamperometry",
            Self::Chronopotentiometry(_) => "Chronopotentiometry",
            Self::Chronocoulometry(_) => "Chronocoulometry",
            Self::OpenCircuitVoltage(_) => "OpenCircuitVoltage",
            Self::ElectrochemicalImpedanceSpectroscopy(_) => "ElectrochemicalImpedanceSpectroscopy",
            Self::NeccElectrocatalysis(_) => "NeccElectrocatalysis",
            Self::XasFluorescence(_) => "XasFluorescence",
            Self::XasTransmission(_) => "XasTransmission",
            Self::UvVis(_) => "UvVis",
            Self::PumpRate(_) => "PumpRate",
            Self::PhaseFluorometryOxygen(_) => "PhaseFluorometryOxygen",
            Self::MassSpectrometry(_) => "MassSpectrometry",
            Self::ElectrolyserPerformance(_) => "ElectrolyserPerformance",
            Self::TifImage(_) => "TifImage",
            Self::MultiTargetSputtering(_) => "MultiTargetSputtering",
            Self::Xrd(_) => "Xrd",
            Self::Raman(_) => "Raman",
            Self::Infrared(_) => "Infrared",
            Self::Xrf(_) => "Xrf",
            Self::ElectronMicroscopy(_) => "ElectronMicroscopy",
            Self::Generic(_) => "Generic",
        }
    }

    pub fn is_electrochemical(&self) -> bool {
        matches!(
            self,
            Self::CyclicVoltammetry(_)
                | Self::LinearSweepVoltammetry(_)
                | Self::GalvanodynamicSweep(_)
                | Self::Chronoamperometry(_)
                | Self::Chronopotentiometry(_)
                | Self::Chronocoulometry(_)
                | Self::OpenCircuitVoltage(_)
                | Self::ElectrochemicalImpedanceSpectroscopy(_)
        )
    }
}

/// One experimental run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub header: MeasurementHeader,
    pub details: MeasurementKind,
}

impl Measurement {
    pub fn new(details: MeasurementKind) -> Self {
        Self {
            header: MeasurementHeader {
                method: Some(details.method_name().to_string()),
                ..MeasurementHeader::default()
            },
            details,
        }
    }

    pub fn from_file(data_file: impl Into<String>, details: MeasurementKind) -> Self {
        let mut measurement = Self::new(details);
        measurement.header.data_file = Some(data_file.into());
        measurement
    }
}
