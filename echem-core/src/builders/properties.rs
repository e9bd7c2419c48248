//! Instrument settings of each technique, read from whichever keys the file format uses.
//!
//! Gamry stores settings as upper-case tags, EC-Lab as padded parameter lines with a unit in
//! parentheses, CHI as `Label (unit) = value` lines. Missing settings stay `None`.

use super::{clean_unit, setting, setting_text};
use crate::decoders::{text, Decoded, Scalar};
use echem_schemas::{
    impedance::EisProperties,
    voltammetry::{ChronoProperties, ControlMode, CvProperties, LsgProperties, LsvProperties, OcvProperties},
    Quantity,
};

fn quantity(decoded: &Decoded, keys: &[&str], unit: &str) -> Option<Quantity<f64>> {
    setting(decoded, keys).map(|v| Quantity::new(v, unit))
}

/// A numeric setting whose unit is stored under a companion key, e.g. EC-Lab's
/// `dE/dt` + `dE/dt unit`.
fn with_unit_key(decoded: &Decoded, key: &str, unit_key: &str, fallback: &str) -> Option<Quantity<f64>> {
    let value = setting(decoded, &[key])?;
    let unit = setting_text(decoded, &[unit_key]).map_or_else(|| fallback.to_string(), clean_unit);
    Some(Quantity::new(value, unit))
}

/// A `"<number> <unit>"` text value such as EC-Lab's `0.196 cm²`.
fn text_quantity(scalar: &Scalar) -> Option<Quantity<f64>> {
    if let Some(value) = scalar.as_f64() {
        return Some(Quantity::new(value, ""));
    }
    let raw = scalar.as_str()?.trim();
    let (number, unit) = raw.split_once(char::is_whitespace).unwrap_or((raw, ""));
    let value = text::parse_number(number)?;
    let unit = unit.trim().replace('²', "^2");
    Some(Quantity::new(value, unit))
}

/// The electrode area the file records, in cm^2.
pub fn sample_area(decoded: &Decoded) -> Option<Quantity<f64>> {
    ["AREA", "Electrode surface area", "Sample Area"]
        .iter()
        .find_map(|key| decoded.meta(key).and_then(text_quantity))
        .and_then(|q| {
            if q.unit.is_empty() {
                Some(Quantity::new(q.value, "cm^2"))
            } else {
                q.to("cm^2")
            }
        })
        .filter(|q| q.value.is_finite() && q.value > 0.0)
}

fn scan_rate(decoded: &Decoded) -> Option<Quantity<f64>> {
    quantity(decoded, &["SCANRATE"], "mV/s")
        .or_else(|| with_unit_key(decoded, "dE/dt", "dE/dt unit", "mV/s"))
        .or_else(|| quantity(decoded, &["Scan Rate (V/s)", "Scan Rate"], "V/s"))
}

fn step_size(decoded: &Decoded) -> Option<Quantity<f64>> {
    quantity(decoded, &["STEPSIZE"], "mV").or_else(|| quantity(decoded, &["Sample Interval (V)"], "V"))
}

pub fn cv(decoded: &Decoded) -> CvProperties {
    let cycles = setting(decoded, &["CYCLES", "nc cycles", "Segment"])
        .filter(|c| *c >= 0.0)
        .map(|c| c.round() as u32);
    CvProperties {
        initial_potential: quantity(decoded, &["VINIT", "Ei (V)", "Init E (V)"], "V"),
        limit_potential_1: quantity(decoded, &["VLIMIT1", "E1 (V)", "High E (V)"], "V"),
        limit_potential_2: quantity(decoded, &["VLIMIT2", "E2 (V)", "Low E (V)"], "V"),
        final_potential: quantity(decoded, &["VFINAL", "Ef (V)", "Final E (V)"], "V"),
        scan_rate: scan_rate(decoded),
        step_size: step_size(decoded),
        cycles,
        open_circuit_reference: setting_text(decoded, &["vs."]).map(|r| r.contains("Eoc")),
    }
}

pub fn lsv(decoded: &Decoded) -> LsvProperties {
    LsvProperties {
        initial_potential: quantity(decoded, &["VINIT", "Ei (V)", "Init E (V)"], "V"),
        final_potential: quantity(decoded, &["VFINAL", "EL (V)", "Ef (V)", "Final E (V)"], "V"),
        scan_rate: scan_rate(decoded),
        step_size: step_size(decoded),
    }
}

pub fn lsg(decoded: &Decoded) -> LsgProperties {
    LsgProperties {
        initial_current: quantity(decoded, &["IINIT"], "A"),
        final_current: quantity(decoded, &["IFINAL"], "A"),
        scan_rate: quantity(decoded, &["SCANRATE"], "A/s"),
        step_size: quantity(decoded, &["STEPSIZE"], "A"),
    }
}

pub fn chrono(decoded: &Decoded, mode: ControlMode) -> ChronoProperties {
    ChronoProperties {
        mode: Some(mode),
        pre_step_potential: quantity(decoded, &["VPRESTEP"], "V"),
        pre_step_current: quantity(decoded, &["IPRESTEP"], "A"),
        pre_step_delay_time: quantity(decoded, &["TPRESTEP"], "s"),
        step_1_potential: quantity(decoded, &["VSTEP1", "Ei (V)", "Init E (V)"], "V"),
        step_1_current: quantity(decoded, &["ISTEP1"], "A")
            .or_else(|| with_unit_key(decoded, "Is", "unit Is", "A")),
        step_1_time: quantity(decoded, &["TSTEP1", "ti (h:m:s)", "ts (h:m:s)", "Pulse Width (sec)"], "s"),
        step_2_potential: quantity(decoded, &["VSTEP2"], "V"),
        step_2_current: quantity(decoded, &["ISTEP2"], "A"),
        step_2_time: quantity(decoded, &["TSTEP2"], "s"),
        sample_period: quantity(decoded, &["SAMPLETIME", "dtR (s)", "Sample Interval (s)"], "s"),
        voltage_limit: quantity(decoded, &["VLIMIT"], "V"),
    }
}

pub fn ocv(decoded: &Decoded) -> OcvProperties {
    OcvProperties {
        total_time: quantity(decoded, &["TOTALTIME", "tR (h:m:s)", "Run Time (sec)"], "s"),
        sample_period: quantity(decoded, &["SAMPLETIME", "dtR (s)", "Sample Interval (s)"], "s"),
        stability: quantity(decoded, &["STABILITY"], "mV/s"),
    }
}

pub fn eis(decoded: &Decoded) -> EisProperties {
    EisProperties {
        dc_voltage: quantity(decoded, &["VDC", "E (V)", "Init E (V)"], "V"),
        dc_current: quantity(decoded, &["IDC"], "A").or_else(|| with_unit_key(decoded, "Is", "unit Is", "A")),
        ac_voltage: quantity(decoded, &["VACREQ", "Va (mV)"], "mV")
            .or_else(|| quantity(decoded, &["Amplitude (V)"], "V")),
        ac_current: quantity(decoded, &["IACREQ"], "A").or_else(|| with_unit_key(decoded, "Ia", "unit Ia", "mA")),
        initial_frequency: quantity(decoded, &["FREQINIT", "High Frequency (Hz)"], "Hz")
            .or_else(|| with_unit_key(decoded, "fi", "unit fi", "Hz")),
        final_frequency: quantity(decoded, &["FREQFINAL", "Low Frequency (Hz)"], "Hz")
            .or_else(|| with_unit_key(decoded, "ff", "unit ff", "Hz")),
        points_per_decade: setting(decoded, &["PTSPERDEC", "Nd"]),
    }
}
