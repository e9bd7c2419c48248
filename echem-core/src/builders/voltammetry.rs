//! DC techniques: cyclic and linear sweeps, chrono methods and open circuit.

use super::{column, factor, pick, scaled, signal, BuildContext};
use crate::decoders::{gamry, Decoded, DecoderKind, Table};
use echem_schemas::{
    voltammetry::{Voltammetry, VoltammetryCycle},
    Signal,
};
use std::ops::Range;

pub const TIME: [&str; 6] = ["T", "time/s", "Time/s", "T(Seconds)", "Time", "time"];
pub const VOLTAGE: [&str; 9] = [
    "Vf", "Ewe/V", "<Ewe>/V", "<Ewe/V>", "E(Volts)", "Potential/V", "Voltage", "Potential", "potential",
];
pub const CURRENT: [&str; 8] = ["Im", "I/mA", "<I>/mA", "<I/mA>", "I(Amps)", "Current/A", "Current", "current"];
pub const CHARGE: [&str; 6] = ["Q", "(Q-Qo)/C", "(Q-Qo)/mA.h", "Charge/C", "Charge", "charge"];
const CYCLE_NUMBER: [&str; 1] = ["cycle number"];

/// Turning points closer to the start potential than this share of the span end a cycle.
const RETURN_TOLERANCE: f64 = 0.1;

/// Time, voltage, current and charge in s, V, A and C, with incomplete rows removed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Trace {
    pub time: Option<Vec<f64>>,
    pub voltage: Option<Vec<f64>>,
    pub current: Option<Vec<f64>>,
    pub charge: Option<Vec<f64>>,
    pub cycle_number: Option<Vec<f64>>,
}

fn converted(table: &Table, aliases: &[&str], target: &str) -> Option<Vec<f64>> {
    column(table, aliases).map(|(name, values)| scaled(values, factor(table.unit(name), target)))
}

impl Trace {
    pub fn from_table(table: &Table) -> Self {
        let raw = [
            converted(table, &TIME, "s"),
            converted(table, &VOLTAGE, "V"),
            converted(table, &CURRENT, "A"),
            converted(table, &CHARGE, "C"),
            column(table, &CYCLE_NUMBER).map(|(_, v)| v.to_vec()),
        ];
        let present: Vec<&[f64]> = raw.iter().flatten().map(Vec::as_slice).collect();
        let rows = super::finite_rows(&present);
        let [time, voltage, current, charge, cycle_number] = raw.map(|c| c.map(|v| pick(&v, &rows)));
        Self {
            time,
            voltage,
            current,
            charge,
            cycle_number,
        }
    }

    pub fn len(&self) -> usize {
        [&self.time, &self.voltage, &self.current]
            .iter()
            .filter_map(|c| c.as_ref().map(Vec::len))
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&mut self, other: Trace) {
        fn join(a: &mut Option<Vec<f64>>, b: Option<Vec<f64>>) {
            match (a.as_mut(), b) {
                (Some(a), Some(b)) => a.extend(b),
                (None, Some(b)) => *a = Some(b),
                _ => {}
            }
        }
        join(&mut self.time, other.time);
        join(&mut self.voltage, other.voltage);
        join(&mut self.current, other.current);
        join(&mut self.charge, other.charge);
        join(&mut self.cycle_number, other.cycle_number);
    }

    pub fn cycle(&self, range: Range<usize>) -> VoltammetryCycle {
        let slice = |values: &Option<Vec<f64>>, unit: &str| -> Option<Signal> {
            values
                .as_ref()
                .and_then(|v| v.get(range.clone()))
                .map(|v| signal(v.to_vec(), unit))
        };
        VoltammetryCycle {
            time: slice(&self.time, "s"),
            voltage: slice(&self.voltage, "V"),
            current: slice(&self.current, "A"),
            charge: slice(&self.charge, "C"),
            ..VoltammetryCycle::default()
        }
    }
}

/// Splits a cyclic sweep where the potential returns to its start.
///
/// Boundaries are strict local minima of `|v - v0|` reached while moving in the initial scan
/// direction and within a tenth of the scanned span of the start potential.
pub fn split_cycles(voltage: &[f64]) -> Vec<Range<usize>> {
    let n = voltage.len();
    if n < 3 {
        return if n == 0 { Vec::new() } else { vec![0..n] };
    }
    let v0 = voltage[0];
    let distance: Vec<f64> = voltage.iter().map(|v| (v - v0).abs()).collect();
    let span = distance.iter().copied().fold(0.0, f64::max);
    let direction = voltage
        .windows(2)
        .map(|w| w[1] - w[0])
        .find(|d| *d != 0.0)
        .map_or(0.0, f64::signum);

    let mut boundaries = vec![0];
    for i in 1..n - 1 {
        let is_minimum = distance[i] < distance[i - 1] && distance[i] < distance[i + 1];
        let heading = (voltage[i + 1] - voltage[i - 1]).signum();
        if is_minimum && heading == direction && distance[i] <= RETURN_TOLERANCE * span {
            boundaries.push(i);
        }
    }
    boundaries.push(n);
    boundaries.windows(2).map(|w| w[0]..w[1]).collect()
}

/// Ranges of equal consecutive values, e.g. EC-Lab's `cycle number` column.
pub fn runs(labels: &[f64]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=labels.len() {
        if i == labels.len() || labels[i] != labels[i - 1] {
            if i > start {
                ranges.push(start..i);
            }
            start = i;
        }
    }
    ranges
}

/// The curve tables this record reads: Gamry tables of its method, the `data` table otherwise.
fn curve_tables<'d>(decoded: &'d Decoded, ctx: &BuildContext) -> Vec<&'d Table> {
    if decoded.format == DecoderKind::Gamry {
        return gamry::curves_for_method(decoded, ctx.position)
            .into_iter()
            .filter(|t| t.name != "ZCURVE")
            .collect();
    }
    decoded
        .table("data")
        .or_else(|| decoded.tables.first())
        .into_iter()
        .collect()
}

pub fn build<P>(decoded: &Decoded, ctx: &BuildContext, properties: P, multiple: bool) -> Voltammetry<P> {
    let tables = curve_tables(decoded, ctx);
    let mut trace = Trace::default();
    let mut table_ranges = Vec::new();
    for table in &tables {
        let part = Trace::from_table(table);
        let start = trace.len();
        let len = part.len();
        trace.append(part);
        if len > 0 {
            table_ranges.push(start..start + len);
        }
    }

    let mut record = Voltammetry {
        properties: Some(properties),
        sample_area: super::properties::sample_area(decoded),
        ..Voltammetry::default()
    };
    if trace.is_empty() {
        log::warn!("'{}': no voltage or current column found", ctx.file);
        return record;
    }
    if multiple {
        let ranges = if table_ranges.len() > 1 {
            table_ranges
        } else if let Some(labels) = trace.cycle_number.as_deref().filter(|l| runs(l).len() > 1) {
            runs(labels)
        } else {
            split_cycles(trace.voltage.as_deref().unwrap_or(&[]))
        };
        if ranges.is_empty() {
            log::warn!("'{}': cycle split produced no cycles", ctx.file);
        }
        record.cycles = ranges.into_iter().map(|r| trace.cycle(r)).collect();
    }
    record.curve = Some(trace.cycle(0..trace.len()));
    record
}

fn density(values: &Option<Signal>, area_cm2: f64, unit: &str) -> Option<Signal> {
    values
        .as_ref()
        .map(|s| signal(s.value.iter().map(|v| v / area_cm2).collect(), unit))
}

fn compensate(cycle: &mut VoltammetryCycle, shift: Option<f64>, resistance: Option<f64>) {
    cycle.voltage_rhe_compensated = None;
    if shift.is_none() && resistance.is_none() {
        return;
    }
    let Some(voltage) = cycle.voltage.as_ref() else {
        return;
    };
    let shift = shift.unwrap_or(0.0);
    let resistance = resistance.unwrap_or(0.0);
    let current = cycle.current.as_ref().map(|c| c.value.as_slice()).unwrap_or(&[]);
    let values = voltage
        .value
        .iter()
        .enumerate()
        .map(|(i, v)| v + shift - resistance * current.get(i).copied().unwrap_or(0.0))
        .collect();
    cycle.voltage_rhe_compensated = Some(signal(values, "V"));
}

/// Current and charge densities from the sample area, and the iR-corrected RHE potential.
/// Densities are always recomputed from `current / sample_area` and dropped without an area.
pub fn derive<P>(record: &mut Voltammetry<P>) {
    let area = record
        .sample_area
        .as_ref()
        .and_then(|a| a.value_in("cm^2"))
        .filter(|a| *a > 0.0);
    let shift = record.voltage_shift.as_ref().and_then(|q| q.value_in("V"));
    let resistance = record.resistance.as_ref().and_then(|q| q.value_in("Ohm"));
    for cycle in record.curve.iter_mut().chain(record.cycles.iter_mut()) {
        match area {
            Some(area) => {
                cycle.current_density = density(&cycle.current, area, "A/cm^2");
                cycle.charge_density = density(&cycle.charge, area, "C/cm^2");
            }
            None => {
                cycle.current_density = None;
                cycle.charge_density = None;
            }
        }
        compensate(cycle, shift, resistance);
    }
}
