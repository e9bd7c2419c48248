//! Maps decoded dictionaries onto typed measurement records.
//!
//! Builders are pure: they read a [`Decoded`] and return a fresh [`Measurement`]. Values that
//! depend on user-entered fields (current density, RHE compensation, UV-vis peaks) are filled
//! by [`derive`], which the normalizer runs again after merging user input.

pub mod eis;
pub mod figures;
pub mod necc;
pub mod process;
pub mod properties;
pub mod spectroscopy;
pub mod voltammetry;

use crate::{
    decoders::{Decoded, Scalar, Table},
    error::EchemError,
    settings::IngestSettings,
};
use chrono::NaiveDateTime;
use echem_schemas::{
    environment::Atmosphere,
    impedance::EisFlavor,
    measurement::{GenericData, Measurement, MeasurementKind},
    voltammetry::ControlMode,
    Quantity, Signal,
};

/// Where the decoded dictionary came from and which method of a chain to build.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub file: &'a str,
    pub position: usize,
    pub settings: &'a IngestSettings,
}

impl<'a> BuildContext<'a> {
    pub fn new(file: &'a str, settings: &'a IngestSettings) -> Self {
        Self {
            file,
            position: 0,
            settings,
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    /// The file name without directories.
    pub fn file_name(&self) -> &str {
        self.file.rsplit(['/', '\\']).next().unwrap_or(self.file)
    }

    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        name.split_once('.').map_or(name, |(stem, _)| stem)
    }
}

/// Technique code of the method at `position`, falling back to the file's technique.
pub fn method_at(decoded: &Decoded, position: usize) -> Option<&str> {
    decoded
        .methods
        .get(position)
        .or(decoded.technique.as_ref())
        .map(String::as_str)
}

/// Builds the record for one method of a decoded file.
pub fn build(decoded: &Decoded, ctx: &BuildContext) -> Result<Measurement, EchemError> {
    let technique = method_at(decoded, ctx.position).unwrap_or("");
    let details = match technique {
        "CV" => MeasurementKind::CyclicVoltammetry(voltammetry::build(
            decoded,
            ctx,
            properties::cv(decoded),
            true,
        )),
        "LSV" => MeasurementKind::LinearSweepVoltammetry(voltammetry::build(
            decoded,
            ctx,
            properties::lsv(decoded),
            false,
        )),
        "LSG" => MeasurementKind::GalvanodynamicSweep(voltammetry::build(
            decoded,
            ctx,
            properties::lsg(decoded),
            false,
        )),
        "CA" | "coV" => MeasurementKind::Chronoamperometry(voltammetry::build(
            decoded,
            ctx,
            properties::chrono(decoded, ControlMode::ConstantVoltage),
            false,
        )),
        "CP" | "coC" => MeasurementKind::Chronopotentiometry(voltammetry::build(
            decoded,
            ctx,
            properties::chrono(decoded, ControlMode::ConstantCurrent),
            false,
        )),
        "CC" => MeasurementKind::Chronocoulometry(voltammetry::build(
            decoded,
            ctx,
            properties::chrono(decoded, ControlMode::ConstantVoltage),
            false,
        )),
        "OCV" => MeasurementKind::OpenCircuitVoltage(voltammetry::build(
            decoded,
            ctx,
            properties::ocv(decoded),
            false,
        )),
        "EIS" => MeasurementKind::ElectrochemicalImpedanceSpectroscopy(eis::build(decoded, ctx, EisFlavor::Single)),
        "PEIS" => MeasurementKind::ElectrochemicalImpedanceSpectroscopy(eis::build(decoded, ctx, EisFlavor::Peis)),
        "GEIS" => MeasurementKind::ElectrochemicalImpedanceSpectroscopy(eis::build(decoded, ctx, EisFlavor::Geis)),
        "ZIR" => MeasurementKind::ElectrochemicalImpedanceSpectroscopy(eis::build(decoded, ctx, EisFlavor::Zir)),
        "CE_NECC_EC_GC" => MeasurementKind::NeccElectrocatalysis(necc::build(decoded)),
        "XAS" => {
            let xas = spectroscopy::xas(decoded, ctx);
            if spectroscopy::is_transmission(ctx.file_name()) {
                MeasurementKind::XasTransmission(xas)
            } else {
                MeasurementKind::XasFluorescence(xas)
            }
        }
        "UV-vis" => MeasurementKind::UvVis(spectroscopy::uvvis(decoded)),
        "MS" => MeasurementKind::MassSpectrometry(spectroscopy::mass_spec(decoded)),
        "XRD" => MeasurementKind::Xrd(spectroscopy::spectrum(decoded, "2θ", "Intensity")),
        "Raman" => MeasurementKind::Raman(spectroscopy::spectrum(decoded, "Raman shift", "Intensity")),
        "IR" => MeasurementKind::Infrared(spectroscopy::spectrum(decoded, "Wavenumber", "Absorbance")),
        "PUMP" => MeasurementKind::PumpRate(process::pump_rate(decoded)),
        "PFO" => MeasurementKind::PhaseFluorometryOxygen(process::phase_fluorometry(decoded)),
        "TDMS" => MeasurementKind::ElectrolyserPerformance(process::electrolyser(decoded, ctx)),
        "TIF" => MeasurementKind::TifImage(process::image(decoded, ctx)),
        "sputtering" => MeasurementKind::MultiTargetSputtering(process::sputtering(decoded)),
        other => {
            if !other.is_empty() {
                log::info!("'{}': no builder for technique '{}', storing it as generic", ctx.file, other);
            }
            MeasurementKind::Generic(generic(decoded))
        }
    };

    let mut measurement = Measurement::from_file(ctx.file, details);
    let header = &mut measurement.header;
    header.name = Some(ctx.file_stem().to_string());
    header.datetime = decoded.start_datetime();
    header.station = station(decoded);
    if decoded.methods.len() > 1 {
        header.method_position = Some(ctx.position);
    }
    if measurement.details.is_electrochemical() || matches!(measurement.details, MeasurementKind::NeccElectrocatalysis(_)) {
        header.atmosphere = atmosphere(ctx.settings);
    }
    derive(&mut measurement);
    Ok(measurement)
}

/// Recomputes every field that depends on user-entered inputs, plus the figures.
pub fn derive(measurement: &mut Measurement) {
    match &mut measurement.details {
        MeasurementKind::CyclicVoltammetry(v) => voltammetry::derive(v),
        MeasurementKind::LinearSweepVoltammetry(v) => voltammetry::derive(v),
        MeasurementKind::GalvanodynamicSweep(v) => voltammetry::derive(v),
        MeasurementKind::Chronoamperometry(v)
        | MeasurementKind::Chronopotentiometry(v)
        | MeasurementKind::Chronocoulometry(v) => voltammetry::derive(v),
        MeasurementKind::OpenCircuitVoltage(v) => voltammetry::derive(v),
        MeasurementKind::UvVis(u) => spectroscopy::derive_uvvis(u),
        _ => {}
    }
    measurement.header.figures = figures::for_kind(&measurement.details);
}

fn generic(decoded: &Decoded) -> GenericData {
    GenericData {
        technique: decoded.technique.clone(),
        metadata: decoded
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    }
}

/// The instrument the file was recorded on, under whichever key the format uses.
pub fn station(decoded: &Decoded) -> Option<String> {
    ["PSTAT", "Device", "Instrument", "Run on channel", "instrument"]
        .iter()
        .find_map(|k| decoded.meta(k).map(Scalar::display))
        .filter(|s| !s.is_empty())
}

pub fn atmosphere(settings: &IngestSettings) -> Vec<Atmosphere> {
    match settings.ambient_temperature_celsius {
        Some(t) => vec![Atmosphere {
            temperature: Some(Quantity::new(t, "°C")),
            ..Atmosphere::default()
        }],
        None => Vec::new(),
    }
}

/// Strips reference annotations and normalizes symbols, e.g. `V vs. Ref.` → `V`.
pub(crate) fn clean_unit(unit: &str) -> String {
    let first = unit.split_whitespace().next().unwrap_or("");
    match first {
        "Ω" | "ohm" => "Ohm".to_string(),
        "kΩ" => "kOhm".to_string(),
        other => other.to_string(),
    }
}

/// The first alias present as a numeric column, tried exactly and then case-insensitively.
pub(crate) fn column<'t>(table: &'t Table, aliases: &[&str]) -> Option<(&'t str, &'t [f64])> {
    table.first_numbers(aliases).or_else(|| {
        aliases.iter().find_map(|alias| {
            table
                .columns
                .iter()
                .find(|(name, c)| name.eq_ignore_ascii_case(alias) && c.numbers().is_some())
                .and_then(|(name, c)| c.numbers().map(|v| (name.as_str(), v)))
        })
    })
}

/// The first column whose lowercase name contains any of `needles`.
pub(crate) fn column_containing<'t>(table: &'t Table, needles: &[&str]) -> Option<(&'t str, &'t [f64])> {
    table.columns.iter().find_map(|(name, c)| {
        let lower = name.to_lowercase();
        let values = c.numbers()?;
        needles
            .iter()
            .any(|n| lower.contains(n))
            .then_some((name.as_str(), values))
    })
}

/// Multiplier from `unit` into `target`. Unknown or missing units are taken as `target`.
pub(crate) fn factor(unit: Option<&str>, target: &str) -> f64 {
    let Some(unit) = unit.map(clean_unit).filter(|u| !u.is_empty()) else {
        return 1.0;
    };
    match echem_schemas::convert(1.0, &unit, target) {
        Some(f) => f,
        None => {
            log::debug!("Unit '{}' is not convertible to '{}', keeping values", unit, target);
            1.0
        }
    }
}

pub(crate) fn scaled(values: &[f64], scale: f64) -> Vec<f64> {
    values.iter().map(|v| v * scale).collect()
}

/// Indices of the rows where every listed column holds a finite number.
pub(crate) fn finite_rows(columns: &[&[f64]]) -> Vec<usize> {
    let len = columns.iter().map(|c| c.len()).min().unwrap_or(0);
    (0..len)
        .filter(|&i| columns.iter().all(|c| c[i].is_finite()))
        .collect()
}

pub(crate) fn pick<T: Copy>(values: &[T], rows: &[usize]) -> Vec<T> {
    rows.iter().filter_map(|&i| values.get(i).copied()).collect()
}

pub(crate) fn signal(values: Vec<f64>, unit: &str) -> Signal {
    Quantity::new(values, unit)
}

pub(crate) fn non_empty(values: Vec<f64>, unit: &str) -> Option<Signal> {
    (!values.is_empty()).then(|| signal(values, unit))
}

/// Timestamped rows of a table: rows without a timestamp are dropped, as are rows where any
/// of the columns that hold data is missing a value.
pub(crate) fn timed_rows(stamps: &[Option<NaiveDateTime>], columns: &[&[f64]]) -> Vec<usize> {
    let used: Vec<&[f64]> = columns
        .iter()
        .copied()
        .filter(|c| c.iter().any(|v| v.is_finite()))
        .collect();
    (0..stamps.len())
        .filter(|&i| stamps[i].is_some() && used.iter().all(|c| c.get(i).is_some_and(|v| v.is_finite())))
        .collect()
}

pub(crate) fn dense_stamps(stamps: &[Option<NaiveDateTime>], rows: &[usize]) -> Vec<NaiveDateTime> {
    rows.iter().filter_map(|&i| stamps.get(i).copied().flatten()).collect()
}

/// Reads a numeric setting from the metadata, then from the first parameter block.
pub(crate) fn setting(decoded: &Decoded, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| {
        decoded
            .meta_f64(key)
            .or_else(|| decoded.parameters.first().and_then(|p| p.get(*key)).and_then(Scalar::as_f64))
            .filter(|v| v.is_finite())
    })
}

pub(crate) fn setting_text<'d>(decoded: &'d Decoded, keys: &[&str]) -> Option<&'d str> {
    keys.iter().find_map(|key| {
        decoded
            .meta_str(key)
            .or_else(|| decoded.parameters.first().and_then(|p| p.get(*key)).and_then(Scalar::as_str))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::{Column, DecoderKind};

    #[test]
    fn test_clean_unit_drops_reference_annotation() {
        assert_eq!(clean_unit("V vs. Ref."), "V");
        assert_eq!(clean_unit("Ω"), "Ohm");
        assert_eq!(factor(Some("mA"), "A"), 1e-3);
        assert_eq!(factor(None, "A"), 1.0);
    }

    #[test]
    fn test_column_falls_back_to_case_insensitive() {
        let mut table = Table::new("data");
        table.push("current", Some("A"), Column::Numbers(vec![1.0]));
        let (name, _) = column(&table, &["Im", "Current"]).unwrap();
        assert_eq!(name, "current");
    }

    #[test]
    fn test_timed_rows_ignore_empty_columns() {
        let t = chrono::NaiveDate::from_ymd_opt(2023, 3, 14)
            .and_then(|d| d.and_hms_opt(10, 0, 0));
        let stamps = vec![t, None, t];
        let a = [1.0, 2.0, f64::NAN];
        let empty = [f64::NAN, f64::NAN, f64::NAN];
        assert_eq!(timed_rows(&stamps, &[&a, &empty]), vec![0]);
    }

    #[test]
    fn test_unknown_technique_is_generic() {
        let mut decoded = Decoded::new(DecoderKind::Gamry);
        decoded.technique = Some("GCPL".to_string());
        decoded.metadata.insert("NOTE".to_string(), Scalar::Text("x".to_string()));
        let settings = IngestSettings::default();
        let m = build(&decoded, &BuildContext::new("run.DTA", &settings)).unwrap();
        match m.details {
            MeasurementKind::Generic(g) => {
                assert_eq!(g.technique.as_deref(), Some("GCPL"));
                assert_eq!(g.metadata["NOTE"], serde_json::json!("x"));
            }
            other => panic!("unexpected {}", other.variant_name()),
        }
        assert_eq!(m.header.data_file.as_deref(), Some("run.DTA"));
        assert!(m.header.atmosphere.is_empty());
    }
}
