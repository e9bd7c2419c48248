//! XAS, UV-vis, mass spectrometry and two-column spectra.

use super::{column, finite_rows, non_empty, pick, signal, BuildContext};
use crate::decoders::{Column, Decoded};
use echem_schemas::{
    spectroscopy::{MassChannel, MassSpectrometry, NamedSignal, Spectrum, UvVis, Xas, XasData, XasInstrument, XasSample},
    Quantity,
};
use indexmap::IndexMap;

pub const DEFAULT_BEAMLINE: &str = "KMC-2";
const FLUORESCENCE_PREFIX: &str = "fluo.";

/// Transmission scans carry `tm` in their file name; everything else is fluorescence.
pub fn is_transmission(file_name: &str) -> bool {
    file_name.to_ascii_lowercase().contains("tm")
}

fn header(decoded: &Decoded) -> IndexMap<String, String> {
    decoded
        .metadata
        .iter()
        .filter(|(k, _)| k.as_str() != "datetime")
        .map(|(k, v)| (k.clone(), v.display()))
        .collect()
}

pub fn xas(decoded: &Decoded, ctx: &BuildContext) -> Xas {
    let Some(table) = decoded.table("data") else {
        return Xas::default();
    };
    let energy = column(table, &["Energy", "energy", "E"]).map(|(_, v)| v);
    let i0 = table.numbers("I0");
    let i1 = table.numbers("I1");
    let fluorescence: Vec<(&str, &[f64])> = table
        .columns
        .iter()
        .filter(|(name, _)| name.starts_with(FLUORESCENCE_PREFIX))
        .filter_map(|(name, c)| c.numbers().map(|v| (name.as_str(), v)))
        .collect();

    let mut present: Vec<&[f64]> = energy.into_iter().chain(i0).chain(i1).collect();
    present.extend(fluorescence.iter().map(|(_, v)| *v));
    let rows = finite_rows(&present);
    let select = |v: Option<&[f64]>| v.map(|v| pick(v, &rows));

    let energy = select(energy);
    let i0 = select(i0);
    let i1 = select(i1);
    let channels: Vec<NamedSignal> = fluorescence
        .iter()
        .map(|(name, v)| NamedSignal {
            name: name.to_string(),
            signal: signal(pick(v, &rows), "counts"),
        })
        .collect();

    let absorption = match (&i0, &i1) {
        (Some(i0), Some(i1)) if is_transmission(ctx.file_name()) => {
            Some(i0.iter().zip(i1).map(|(a, b)| (a / b).ln()).collect::<Vec<f64>>())
        }
        (Some(i0), _) if !channels.is_empty() => Some(
            (0..i0.len())
                .map(|i| channels.iter().map(|c| c.signal.value[i]).sum::<f64>() / i0[i])
                .collect(),
        ),
        _ => None,
    };

    let name = ["Sample", "sample", "Name"]
        .iter()
        .find_map(|k| decoded.meta_str(k))
        .map(str::to_string)
        .unwrap_or_else(|| ctx.file_stem().to_string());
    Xas {
        sample: XasSample {
            name: Some(name),
            lab_id: None,
        },
        instrument: XasInstrument {
            beamline: Some(
                decoded
                    .meta_str("Beamline")
                    .unwrap_or(DEFAULT_BEAMLINE)
                    .to_string(),
            ),
            monochromator: ["Monochromator", "Mono", "Crystal"]
                .iter()
                .find_map(|k| decoded.meta_str(k))
                .map(str::to_string),
            fluorescence_channels: channels.len(),
        },
        data: XasData {
            energy: energy.and_then(|v| non_empty(v, "eV")),
            i0: i0.and_then(|v| non_empty(v, "counts")),
            i1: i1.and_then(|v| non_empty(v, "counts")),
            channels,
            absorption: absorption.and_then(|v| non_empty(v, "")),
        },
        header: header(decoded),
    }
}

pub fn uvvis(decoded: &Decoded) -> UvVis {
    let Some(table) = decoded.table("data") else {
        return UvVis::default();
    };
    let wavelength = table.numbers("wavelength").unwrap_or(&[]);
    let intensity = table.numbers("absorbance").unwrap_or(&[]);
    let rows = finite_rows(&[wavelength, intensity]);
    UvVis {
        wavelength: non_empty(pick(wavelength, &rows), "nm"),
        intensity: non_empty(pick(intensity, &rows), ""),
        ..UvVis::default()
    }
}

/// Peak search within the user's window and the concentration from the linear calibration.
pub fn derive_uvvis(record: &mut UvVis) {
    record.peak_wavelength = None;
    record.peak_value = None;
    record.concentration = None;
    let (Some(wavelength), Some(intensity)) = (&record.wavelength, &record.intensity) else {
        return;
    };
    let lower = record
        .peak_search_lower
        .as_ref()
        .and_then(|q| q.value_in("nm"))
        .unwrap_or(f64::NEG_INFINITY);
    let upper = record
        .peak_search_upper
        .as_ref()
        .and_then(|q| q.value_in("nm"))
        .unwrap_or(f64::INFINITY);
    let peak = wavelength
        .value
        .iter()
        .zip(&intensity.value)
        .filter(|(w, y)| **w >= lower && **w <= upper && y.is_finite())
        .fold(None::<(f64, f64)>, |best, (w, y)| match best {
            Some((_, best_y)) if best_y >= *y => best,
            _ => Some((*w, *y)),
        });
    let Some((w, y)) = peak else {
        log::debug!("No UV-vis points inside the peak search window");
        return;
    };
    record.peak_wavelength = Some(Quantity::new(w, "nm"));
    record.peak_value = Some(y);
    if let Some(slope) = record.calibration_slope.filter(|s| *s != 0.0) {
        let intercept = record.calibration_intercept.unwrap_or(0.0);
        let unit = record.concentration_unit.clone().unwrap_or_else(|| "mol/L".to_string());
        record.concentration = Some(Quantity::new((y - intercept) / slope, unit));
    }
}

pub fn mass_spec(decoded: &Decoded) -> MassSpectrometry {
    let Some(table) = decoded.table("data") else {
        return MassSpectrometry::default();
    };
    let datetime = table
        .columns
        .get("datetime")
        .and_then(Column::timestamps)
        .map(<[_]>::to_vec)
        .unwrap_or_default();
    let channels = table
        .columns
        .iter()
        .filter_map(|(name, c)| c.numbers().map(|v| (name, v)))
        .map(|(name, values)| MassChannel {
            name: name.clone(),
            unit: table.unit(name).unwrap_or("Torr").to_string(),
            values: values.iter().map(|v| v.is_finite().then_some(*v)).collect(),
        })
        .collect();
    MassSpectrometry {
        datetime,
        channels,
        header: header(decoded),
    }
}

pub fn spectrum(decoded: &Decoded, x_label: &str, y_label: &str) -> Spectrum {
    let Some(table) = decoded.table("data") else {
        return Spectrum::default();
    };
    let x = table.numbers("x").unwrap_or(&[]);
    let y = table.numbers("y").unwrap_or(&[]);
    let rows = finite_rows(&[x, y]);
    Spectrum {
        x: non_empty(pick(x, &rows), table.unit("x").unwrap_or("")),
        y: non_empty(pick(y, &rows), table.unit("y").unwrap_or("")),
        x_label: Some(x_label.to_string()),
        y_label: Some(y_label.to_string()),
    }
}
