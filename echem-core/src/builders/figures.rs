//! Chart-ready traces attached to each record.

use chrono::NaiveDateTime;
use echem_schemas::{
    measurement::{Figure, MeasurementKind, Trace},
    necc::NeccExperiment,
    voltammetry::{Voltammetry, VoltammetryCycle},
    Signal,
};

fn figure(label: &str, x_label: &str, y_label: &str, traces: Vec<Trace>) -> Option<Figure> {
    (!traces.is_empty()).then(|| Figure {
        label: label.to_string(),
        x_label: x_label.to_string(),
        y_label: y_label.to_string(),
        traces,
    })
}

fn axis(name: &str, signal: &Signal) -> String {
    if signal.unit.is_empty() {
        name.to_string()
    } else {
        format!("{name} ({})", signal.unit)
    }
}

fn trace(name: impl Into<String>, x: &[f64], y: &[f64]) -> Option<Trace> {
    let n = x.len().min(y.len());
    (n > 0).then(|| Trace {
        name: name.into(),
        x: x[..n].to_vec(),
        y: y[..n].to_vec(),
    })
}

/// Minutes elapsed since the first timestamp.
fn minutes(stamps: &[NaiveDateTime]) -> Vec<f64> {
    let Some(start) = stamps.first() else {
        return Vec::new();
    };
    stamps
        .iter()
        .map(|s| (*s - *start).num_milliseconds() as f64 / 60_000.0)
        .collect()
}

fn sweep_axes(cycle: &VoltammetryCycle) -> Option<(&Signal, &str, &Signal, &str)> {
    let (x, x_name) = match &cycle.voltage_rhe_compensated {
        Some(v) => (v, "Potential vs RHE"),
        None => (cycle.voltage.as_ref()?, "Potential"),
    };
    let (y, y_name) = match &cycle.current_density {
        Some(j) => (j, "Current density"),
        None => (cycle.current.as_ref()?, "Current"),
    };
    Some((x, x_name, y, y_name))
}

fn sweeps<P>(record: &Voltammetry<P>) -> Option<Figure> {
    let sweeps = record.sweeps();
    let (x, x_name, y, y_name) = sweeps.first().and_then(|c| sweep_axes(c))?;
    let (x_label, y_label) = (axis(x_name, x), axis(y_name, y));
    let traces = sweeps
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            let (x, _, y, _) = sweep_axes(c)?;
            trace(format!("Cycle {}", i + 1), &x.value, &y.value)
        })
        .collect();
    figure("Voltammogram", &x_label, &y_label, traces)
}

fn transient<P>(record: &Voltammetry<P>, plot_voltage: bool) -> Option<Figure> {
    let curve = record.curve.as_ref()?;
    let time = curve.time.as_ref()?;
    let (y, name) = if plot_voltage {
        (curve.voltage.as_ref()?, "Potential")
    } else {
        match &curve.current_density {
            Some(j) => (j, "Current density"),
            None => (curve.current.as_ref()?, "Current"),
        }
    };
    let traces = trace(name, &time.value, &y.value).into_iter().collect();
    figure("Transient", &axis("Time", time), &axis(name, y), traces)
}

fn necc(record: &NeccExperiment) -> Option<Figure> {
    let fe = record.fe_results.as_ref()?;
    let (x, x_label) = match &fe.cell_voltage {
        Some(v) => (v.value.clone(), axis("Cell voltage", v)),
        None => (minutes(&fe.datetime), "Time (min)".to_string()),
    };
    let traces = fe
        .gas_results
        .iter()
        .filter_map(|g| {
            let y = g.faradaic_efficiency.as_ref()?;
            trace(g.gas_type.clone(), &x, &y.value)
        })
        .collect();
    figure("Faradaic efficiency", &x_label, "Faradaic efficiency (%)", traces)
}

/// The figures of a record; empty when it holds no plottable data.
pub fn for_kind(kind: &MeasurementKind) -> Vec<Figure> {
    use MeasurementKind as K;
    let figures: Vec<Option<Figure>> = match kind {
        K::CyclicVoltammetry(v) => vec![sweeps(v)],
        K::LinearSweepVoltammetry(v) => vec![sweeps(v)],
        K::GalvanodynamicSweep(v) => vec![sweeps(v)],
        K::Chronoamperometry(v) | K::Chronocoulometry(v) => vec![transient(v, false)],
        K::Chronopotentiometry(v) => vec![transient(v, true)],
        K::OpenCircuitVoltage(v) => vec![transient(v, true)],
        K::ElectrochemicalImpedanceSpectroscopy(eis) => {
            let mut nyquist = Vec::new();
            let mut bode = Vec::new();
            for (i, cycle) in eis.measurements.iter().enumerate() {
                let data = &cycle.data;
                let name = format!("Spectrum {}", i + 1);
                if let (Some(re), Some(im)) = (&data.z_real, &data.z_imaginary) {
                    nyquist.extend(trace(name.clone(), &re.value, &im.value));
                }
                if let (Some(f), Some(m)) = (&data.frequency, &data.z_modulus) {
                    let log_f: Vec<f64> = f.value.iter().map(|v| v.log10()).collect();
                    bode.extend(trace(name, &log_f, &m.value));
                }
            }
            vec![
                figure("Nyquist", "Z' (Ohm)", "-Z'' (Ohm)", nyquist),
                figure("Bode", "log10 Frequency (Hz)", "|Z| (Ohm)", bode),
            ]
        }
        K::NeccElectrocatalysis(record) => vec![necc(record)],
        K::XasFluorescence(xas) | K::XasTransmission(xas) => {
            let traces = match (&xas.data.energy, &xas.data.absorption) {
                (Some(e), Some(a)) => trace("Absorption", &e.value, &a.value).into_iter().collect(),
                _ => Vec::new(),
            };
            vec![figure("XAS", "Energy (eV)", "Absorption", traces)]
        }
        K::UvVis(u) => {
            let traces = match (&u.wavelength, &u.intensity) {
                (Some(w), Some(i)) => trace("Spectrum", &w.value, &i.value).into_iter().collect(),
                _ => Vec::new(),
            };
            vec![figure("UV-vis", "Wavelength (nm)", "Absorbance", traces)]
        }
        K::Xrd(s) | K::Raman(s) | K::Infrared(s) => {
            let traces = match (&s.x, &s.y) {
                (Some(x), Some(y)) => trace("Spectrum", &x.value, &y.value).into_iter().collect(),
                _ => Vec::new(),
            };
            let x_label = s.x.as_ref().map_or_else(String::new, |x| axis(s.x_label.as_deref().unwrap_or("x"), x));
            let y_label = s.y.as_ref().map_or_else(String::new, |y| axis(s.y_label.as_deref().unwrap_or("y"), y));
            vec![figure(kind.method_name(), &x_label, &y_label, traces)]
        }
        K::ElectrolyserPerformance(e) => {
            let traces = match &e.time {
                Some(time) => e
                    .channels
                    .iter()
                    .filter_map(|(name, s)| trace(name.clone(), &time.value, &s.value))
                    .collect(),
                None => Vec::new(),
            };
            let x_label = e.time.as_ref().map_or_else(|| "Time".to_string(), |t| axis("Time", t));
            vec![figure("Channels", &x_label, "Value", traces)]
        }
        K::PumpRate(p) => {
            let x = minutes(&p.datetime);
            let traces = p
                .pump_rate
                .iter()
                .filter_map(|s| trace("Pump rate", &x, &s.value))
                .collect();
            let y_label = p.pump_rate.as_ref().map_or_else(String::new, |s| axis("Pump rate", s));
            vec![figure("Pump rate", "Time (min)", &y_label, traces)]
        }
        K::PhaseFluorometryOxygen(p) => {
            let x = minutes(&p.datetime);
            let traces = p.oxygen.iter().filter_map(|s| trace("Oxygen", &x, &s.value)).collect();
            let y_label = p.oxygen.as_ref().map_or_else(String::new, |s| axis("Oxygen", s));
            vec![figure("Oxygen", "Time (min)", &y_label, traces)]
        }
        K::MassSpectrometry(ms) => {
            let start = ms.datetime.iter().flatten().next().copied();
            let traces = ms
                .channels
                .iter()
                .filter_map(|c| {
                    let start = start?;
                    let (x, y): (Vec<f64>, Vec<f64>) = ms
                        .datetime
                        .iter()
                        .zip(&c.values)
                        .filter_map(|(t, v)| Some(((*t)? - start, (*v)?)))
                        .map(|(d, v)| (d.num_milliseconds() as f64 / 60_000.0, v))
                        .unzip();
                    trace(c.name.clone(), &x, &y)
                })
                .collect();
            vec![figure("Partial pressures", "Time (min)", "Pressure", traces)]
        }
        K::TifImage(_)
        | K::MultiTargetSputtering(_)
        | K::Xrf(_)
        | K::ElectronMicroscopy(_)
        | K::Generic(_) => Vec::new(),
    };
    figures.into_iter().flatten().collect()
}
