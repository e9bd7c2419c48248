//! Impedance spectra.

use super::{column, factor, finite_rows, pick, properties, scaled, signal, BuildContext};
use crate::decoders::{gamry, Decoded, DecoderKind, Table};
use echem_schemas::{
    impedance::{EisCycle, EisData, EisFlavor, EisProperties, Impedance},
    Quantity,
};
use num_complex::Complex64;
use std::ops::Range;

const FREQUENCY: [&str; 4] = ["Freq", "freq/Hz", "Freq/Hz", "Frequency"];
const REAL: [&str; 5] = ["Zreal", "Re(Z)/Ohm", "Z'/ohm", "ZRe", "Z'"];
/// Columns that already hold `-Im(Z)`.
const NEGATED_IMAGINARY: [&str; 2] = ["-Im(Z)/Ohm", "-Z\"/ohm"];
/// Columns holding `Im(Z)` as is.
const IMAGINARY: [&str; 5] = ["Zimag", "Z\"/ohm", "ZIm", "Im(Z)/Ohm", "Z\""];
const SEGMENT_LABELS: [&str; 2] = ["cycle number", "z cycle"];
const DC_VOLTAGE: [&str; 3] = ["<Ewe>/V", "Vdc", "<Ewe/V>"];
const DC_CURRENT: [&str; 3] = ["<I>/mA", "Idc", "<I/mA>"];

/// One spectrum's columns in Hz and Ohm, `imaginary` holding `-Im(Z)`.
struct Spectrum {
    frequency: Vec<f64>,
    real: Vec<f64>,
    imaginary: Vec<f64>,
    labels: Option<Vec<f64>>,
    dc_voltage: Option<Vec<f64>>,
    dc_current: Option<Vec<f64>>,
}

fn read(table: &Table) -> Option<Spectrum> {
    let (f_name, frequency) = column(table, &FREQUENCY)?;
    let (re_name, real) = column(table, &REAL)?;
    let (imaginary, sign, im_name) = match column(table, &NEGATED_IMAGINARY) {
        Some((name, values)) => (values, 1.0, name),
        None => {
            let (name, values) = column(table, &IMAGINARY)?;
            (values, -1.0, name)
        }
    };
    let frequency = scaled(frequency, factor(table.unit(f_name), "Hz"));
    let real = scaled(real, factor(table.unit(re_name), "Ohm"));
    let imaginary = scaled(imaginary, sign * factor(table.unit(im_name), "Ohm"));
    let labels = SEGMENT_LABELS
        .iter()
        .find_map(|l| column(table, &[l]))
        .map(|(_, v)| v.to_vec());
    let dc_voltage = column(table, &DC_VOLTAGE).map(|(n, v)| scaled(v, factor(table.unit(n), "V")));
    let dc_current = column(table, &DC_CURRENT).map(|(n, v)| scaled(v, factor(table.unit(n), "A")));

    let rows = finite_rows(&[&frequency, &real, &imaginary]);
    Some(Spectrum {
        frequency: pick(&frequency, &rows),
        real: pick(&real, &rows),
        imaginary: pick(&imaginary, &rows),
        labels: labels.map(|l| pick(&l, &rows)),
        dc_voltage: dc_voltage.map(|v| pick(&v, &rows)),
        dc_current: dc_current.map(|v| pick(&v, &rows)),
    })
}

/// Splits a multi-spectrum table on segment label changes, or where the frequency sweep
/// restarts.
fn segments(spectrum: &Spectrum) -> Vec<Range<usize>> {
    if let Some(labels) = spectrum.labels.as_deref() {
        let runs = super::voltammetry::runs(labels);
        if runs.len() > 1 {
            return runs;
        }
    }
    let f = &spectrum.frequency;
    if f.is_empty() {
        return Vec::new();
    }
    let direction = f
        .windows(2)
        .map(|w| w[1] - w[0])
        .find(|d| *d != 0.0)
        .map_or(0.0, f64::signum);
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..f.len() {
        let step = (f[i] - f[i - 1]).signum();
        if direction != 0.0 && step == -direction && i - start > 1 {
            ranges.push(start..i);
            start = i;
        }
    }
    ranges.push(start..f.len());
    ranges
}

fn mean(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    (!finite.is_empty()).then(|| finite.iter().sum::<f64>() / finite.len() as f64)
}

/// Modulus and phase in degrees of `re - j * neg_im`.
pub fn polar(re: f64, neg_im: f64) -> (f64, f64) {
    let z = Complex64::new(re, -neg_im);
    (z.norm(), z.arg().to_degrees())
}

fn cycle(spectrum: &Spectrum, range: Range<usize>, properties: &EisProperties) -> EisCycle {
    let frequency = spectrum.frequency[range.clone()].to_vec();
    let real = spectrum.real[range.clone()].to_vec();
    let imaginary = spectrum.imaginary[range.clone()].to_vec();
    let (modulus, angle): (Vec<f64>, Vec<f64>) = real.iter().zip(&imaginary).map(|(r, i)| polar(*r, *i)).unzip();

    let dc_voltage = spectrum
        .dc_voltage
        .as_ref()
        .and_then(|v| mean(&v[range.clone()]))
        .map(|v| Quantity::new(v, "V"))
        .or_else(|| properties.dc_voltage.clone());
    let dc_current = spectrum
        .dc_current
        .as_ref()
        .and_then(|v| mean(&v[range.clone()]))
        .map(|v| Quantity::new(v, "A"))
        .or_else(|| properties.dc_current.clone());
    EisCycle {
        dc_voltage,
        dc_current,
        ac_amplitude: properties.ac_voltage.clone().or_else(|| properties.ac_current.clone()),
        data: EisData {
            frequency: Some(signal(frequency, "Hz")),
            z_real: Some(signal(real, "Ohm")),
            z_imaginary: Some(signal(imaginary, "Ohm")),
            z_modulus: Some(signal(modulus, "Ohm")),
            z_angle: Some(signal(angle, "deg")),
        },
    }
}

pub fn build(decoded: &Decoded, ctx: &BuildContext, flavor: EisFlavor) -> Impedance {
    let props = properties::eis(decoded);
    let mut measurements = Vec::new();
    if decoded.format == DecoderKind::Gamry {
        // Each ZCURVE table of the method is one spectrum.
        for table in gamry::curves_for_method(decoded, ctx.position) {
            if let Some(spectrum) = read(table) {
                let len = spectrum.frequency.len();
                if len > 0 {
                    measurements.push(cycle(&spectrum, 0..len, &props));
                }
            }
        }
    } else {
        let table = decoded.table("data").or_else(|| decoded.tables.first());
        if let Some(spectrum) = table.and_then(read) {
            for range in segments(&spectrum) {
                measurements.push(cycle(&spectrum, range, &props));
            }
        }
    }
    if measurements.is_empty() {
        log::warn!("'{}': no impedance spectrum found", ctx.file);
    }
    Impedance {
        flavor,
        properties: Some(props),
        measurements,
    }
}
