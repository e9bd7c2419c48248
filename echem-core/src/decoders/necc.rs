//! NECC flow-cell workbooks: potentiostat, thermocouple and gas chromatography logs of one
//! CO2-reduction run plus the faradaic-efficiency results computed in the workbook.
//!
//! Two layouts exist. Layout A has exactly four sheets (`Experimental details`, `Raw Data`,
//! `Results` and a plot sheet); `Raw Data` holds the potentiometry, thermocouple and GC
//! blocks side by side, separated by an empty header column. Layout B keeps every log on its
//! own sheet: `Pot Data`, `Thermo Data`, `FID Data`, `TCD Data` and `GC Calc`.

use super::{
    workbook::{date_time, Cell, Sheet, Workbook},
    Column, Decoded, DecoderKind, Scalar, Segment, Table,
};
use crate::error::EchemError;
use chrono::{Duration, NaiveDateTime};
use indexmap::IndexMap;
use std::ops::Range;

pub const CURRENT_ALIASES: [&str; 3] = ["I/mA", "<I/mA>", "<I>/mA"];
pub const VOLTAGE_ALIASES: [&str; 3] = ["Ewe/V", "<Ewe/V>", "<Ewe>/V"];
pub const RESAMPLE_MINUTES: i64 = 3;

const DETAILS: &str = "Experimental details";
const LAYOUT_A: [&str; 3] = ["Raw Data", "Results", DETAILS];
const LAYOUT_B: [&str; 5] = ["Pot Data", "Thermo Data", "FID Data", "TCD Data", "GC Calc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Four sheets with a combined `Raw Data` sheet.
    Combined,
    /// One sheet per log.
    Split,
}

fn has_sheet(workbook: &Workbook, name: &str) -> bool {
    workbook.sheet_any(&[name]).is_some()
}

/// Recognizes the layout from the sheet names; `None` for any other workbook.
pub fn layout(workbook: &Workbook) -> Option<Layout> {
    let count = workbook.sheets.len();
    if count == 4 && LAYOUT_A.iter().all(|n| has_sheet(workbook, n)) {
        Some(Layout::Combined)
    } else if count > 4 && LAYOUT_B.iter().all(|n| has_sheet(workbook, n)) {
        Some(Layout::Split)
    } else {
        None
    }
}

fn is_time_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("date") || lower.contains("time")
}

/// Column ranges of the blocks in `row`, split at empty header cells.
fn blocks(sheet: &Sheet, row: usize) -> Vec<Range<usize>> {
    let header = sheet.header(row);
    let mut out = Vec::new();
    let mut start = None;
    for (k, name) in header.iter().enumerate() {
        match (name.is_empty(), start) {
            (false, None) => start = Some(k),
            (true, Some(s)) => {
                out.push(s..k);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(s..header.len());
    }
    out
}

fn header_at(header: &[String], k: usize) -> &str {
    header.get(k).map_or("", String::as_str)
}

/// Reads a timestamped block. Rows without a parsable timestamp are dropped.
fn timed_block(sheet: &Sheet, columns: Range<usize>, name: &str) -> Table {
    let header = sheet.header(0);
    let time_col = columns.clone().find(|&k| is_time_header(header_at(&header, k)));
    let mut rows = Vec::new();
    let mut stamps = Vec::new();
    for r in 1..sheet.height() {
        let stamp = time_col.and_then(|k| date_time(sheet.cell(r, k), None));
        if let Some(stamp) = stamp {
            rows.push(r);
            stamps.push(Some(stamp));
        }
    }
    let mut table = Table::new(name);
    table.push("datetime", None, Column::Timestamps(stamps));
    for k in columns {
        let name = header_at(&header, k);
        if Some(k) == time_col || name.is_empty() {
            continue;
        }
        let values = rows
            .iter()
            .map(|&r| sheet.cell(r, k).as_f64().unwrap_or(f64::NAN))
            .collect();
        table.push(name, None, Column::Numbers(values));
    }
    table
}

/// Adds canonical `current`/`voltage` columns from the first alias that holds values.
fn potentiometry(mut table: Table) -> Table {
    let current = table.first_numbers(&CURRENT_ALIASES).map(|(_, v)| v.to_vec());
    let voltage = table.first_numbers(&VOLTAGE_ALIASES).map(|(_, v)| v.to_vec());
    if let Some(current) = current {
        table.push("current", Some("mA"), Column::Numbers(current));
    }
    if let Some(voltage) = voltage {
        table.push("voltage", Some("V"), Column::Numbers(voltage));
    }
    table.name = "potentiometry".to_string();
    table
}

/// Means over consecutive windows of `RESAMPLE_MINUTES`, starting at `start` and ending with
/// the window containing `end`. Windows without samples are dropped.
pub fn resample(table: &Table, start: NaiveDateTime, end: NaiveDateTime) -> Table {
    let stamps = table
        .columns
        .get("datetime")
        .and_then(Column::timestamps)
        .unwrap_or(&[]);
    let step = Duration::minutes(RESAMPLE_MINUTES);
    let mut windows: Vec<(NaiveDateTime, Vec<usize>)> = Vec::new();
    let mut window_start = start;
    while window_start <= end {
        let members = stamps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some_and(|s| s >= window_start && s < window_start + step && s <= end))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        if !members.is_empty() {
            windows.push((window_start, members));
        }
        window_start += step;
    }

    let mut out = Table::new(table.name.clone());
    out.push(
        "datetime",
        None,
        Column::Timestamps(windows.iter().map(|(t, _)| Some(*t)).collect()),
    );
    for (name, column) in &table.columns {
        let Some(values) = column.numbers() else {
            continue;
        };
        let means = windows
            .iter()
            .map(|(_, members)| {
                let picked: Vec<f64> = members
                    .iter()
                    .map(|&i| values[i])
                    .filter(|v| !v.is_nan())
                    .collect();
                if picked.is_empty() {
                    f64::NAN
                } else {
                    picked.iter().sum::<f64>() / picked.len() as f64
                }
            })
            .collect();
        out.push(name, table.unit(name), Column::Numbers(means));
    }
    out
}

/// Splits a wide GC table into one segment per gas group. Groups start at every
/// `Gas type` column and hold `RT`, `area` and `ppm value`.
fn gc_segments(sheet: &Sheet, columns: Range<usize>, first_index: usize) -> Vec<Segment> {
    let header = sheet.header(0);
    let find = |label: &str| {
        columns
            .clone()
            .find(|&k| header_at(&header, k).eq_ignore_ascii_case(label))
    };
    let date_col = find("Date");
    let time_col = find("Time");
    let name_col = find("Experiment name");

    let rows: Vec<usize> = (1..sheet.height())
        .filter(|&r| date_col.is_some_and(|k| !sheet.cell(r, k).is_empty()))
        .collect();
    let stamps: Vec<Option<NaiveDateTime>> = rows
        .iter()
        .map(|&r| date_col.and_then(|k| date_time(sheet.cell(r, k), time_col.map(|t| sheet.cell(r, t)))))
        .collect();
    let names: Vec<String> = rows
        .iter()
        .map(|&r| name_col.and_then(|k| sheet.cell(r, k).display()).unwrap_or_default())
        .collect();

    let group_starts: Vec<usize> = columns
        .clone()
        .filter(|&k| header_at(&header, k).to_ascii_lowercase().starts_with("gas type"))
        .collect();
    group_starts
        .iter()
        .enumerate()
        .map(|(g, &start)| {
            let gas = rows
                .iter()
                .find_map(|&r| sheet.cell(r, start).display())
                .unwrap_or_default();
            let mut data = Table::new("gc");
            data.push("datetime", None, Column::Timestamps(stamps.clone()));
            data.push("experiment", None, Column::Text(names.clone()));
            for (offset, (name, unit)) in [("RT", Some("min")), ("area", None), ("ppm", Some("ppm"))]
                .into_iter()
                .enumerate()
            {
                let k = start + 1 + offset;
                let values = rows
                    .iter()
                    .map(|&r| sheet.cell(r, k).as_f64().unwrap_or(f64::NAN))
                    .collect();
                data.push(name, unit, Column::Numbers(values));
            }
            let mut metadata = IndexMap::new();
            metadata.insert("gas_type".to_string(), Scalar::Text(gas));
            metadata.insert("gas_index".to_string(), Scalar::Int((first_index + g) as i64));
            Segment { metadata, data }
        })
        .collect()
}

fn gc_bounds(segments: &[Segment]) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let stamps: Vec<NaiveDateTime> = segments
        .iter()
        .filter_map(|s| s.data.columns.get("datetime").and_then(Column::timestamps))
        .flat_map(|c| c.iter().flatten().copied())
        .collect();
    Some((*stamps.iter().min()?, *stamps.iter().max()?))
}

/// Reads the results sheet; FE columns stored with a negative sign convention are flipped.
fn results(sheet: &Sheet) -> Table {
    let columns = 0..sheet.header(0).len();
    let mut table = timed_block(sheet, columns, "results");
    for (name, column) in table.columns.iter_mut() {
        if !name.ends_with(" FE (%)") {
            continue;
        }
        if let Column::Numbers(values) = column {
            let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
            if !finite.is_empty() && finite.iter().all(|v| *v <= 0.0) {
                values.iter_mut().for_each(|v| *v = v.abs());
            }
        }
    }
    table
}

fn details(decoded: &mut Decoded, sheet: &Sheet) {
    for r in 0..sheet.height() {
        let Some(key) = sheet.cell(r, 0).display() else {
            continue;
        };
        let value = sheet.cell(r, 1);
        let scalar = match value {
            Cell::Number(v) => Scalar::Number(*v),
            Cell::Bool(b) => Scalar::Bool(*b),
            Cell::DateTime(dt) => Scalar::DateTime(*dt),
            other => match other.display() {
                Some(text) => Scalar::Text(text),
                None => continue,
            },
        };
        if key.to_ascii_lowercase().starts_with("feed gas") {
            if let Some(flow) = sheet.cell(r, 2).as_f64() {
                decoded
                    .metadata
                    .insert(format!("{key} flow rate"), Scalar::Number(flow));
            }
        }
        decoded.metadata.insert(key, scalar);
    }
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let workbook = Workbook::from_xlsx_bytes(file, bytes)?;
    decode_workbook(file, &workbook)
}

pub fn decode_workbook(file: &str, workbook: &Workbook) -> Result<Decoded, EchemError> {
    let layout = layout(workbook)
        .ok_or_else(|| EchemError::decode(file, "sheet names match neither NECC layout"))?;
    let sheet = |name: &str| {
        workbook
            .sheet_any(&[name])
            .ok_or_else(|| EchemError::decode(file, format!("missing sheet '{name}'")))
    };

    let mut decoded = Decoded::new(DecoderKind::NeccWorkbook);
    decoded.technique = Some("CE_NECC_EC_GC".to_string());
    if let Ok(details_sheet) = sheet(DETAILS) {
        details(&mut decoded, details_sheet);
    }

    let (pot, thermo, segments, results_sheet) = match layout {
        Layout::Combined => {
            let raw = sheet("Raw Data")?;
            let parts = blocks(raw, 0);
            if parts.len() < 3 {
                return Err(EchemError::decode(
                    file,
                    format!("'Raw Data' has {} column blocks, expected 3", parts.len()),
                ));
            }
            let pot = timed_block(raw, parts[0].clone(), "potentiometry");
            let thermo = timed_block(raw, parts[1].clone(), "thermocouple");
            let segments = gc_segments(raw, parts[2].clone(), 0);
            (pot, thermo, segments, sheet("Results")?)
        }
        Layout::Split => {
            let pot_sheet = sheet("Pot Data")?;
            let thermo_sheet = sheet("Thermo Data")?;
            let pot = timed_block(pot_sheet, 0..pot_sheet.width(), "potentiometry");
            let thermo = timed_block(thermo_sheet, 0..thermo_sheet.width(), "thermocouple");
            let fid = sheet("FID Data")?;
            let tcd = sheet("TCD Data")?;
            let mut segments = gc_segments(fid, 0..fid.width(), 0);
            let tcd_segments = gc_segments(tcd, 0..tcd.width(), segments.len());
            segments.extend(tcd_segments);
            (pot, thermo, segments, sheet("GC Calc")?)
        }
    };

    let pot = potentiometry(pot);
    if let Some(first) = pot
        .columns
        .get("datetime")
        .and_then(Column::timestamps)
        .and_then(|s| s.iter().flatten().next().copied())
    {
        decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(first));
    }
    let thermo = match gc_bounds(&segments) {
        Some((start, end)) => resample(&thermo, start, end),
        None => thermo,
    };
    decoded.tables.push(pot);
    decoded.tables.push(thermo);
    decoded.tables.push(results(results_sheet));
    decoded.segments = segments;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combined() -> Workbook {
        let details = Sheet::new("Experimental Details")
            .with_text_row(&["Cell type", "Flow cell"])
            .with_text_row(&["Membrane name", "Sustainion X37-50"])
            .with_text_row(&["Feed gas 1", "CO2", "20"]);
        let raw = Sheet::new("Raw Data")
            .with_text_row(&[
                "Date Time", "I/mA", "<I>/mA", "Ewe/V", "", "Date Time", "Temperature Cathode", "",
                "Experiment name", "Date", "Time", "Gas type", "RT", "area", "ppm value", "Gas type",
                "RT", "area", "ppm value",
            ])
            .with_text_row(&[
                "2023-03-14 10:00:00", "", "-100", "-3.1", "", "2023-03-14 10:00:30", "24", "",
                "run1", "14.03.2023", "10:01:00", "CO", "1.2", "500", "1000", "H2", "0.5", "800",
                "2000",
            ])
            .with_text_row(&[
                "not a date", "", "-101", "-3.1", "", "2023-03-14 10:02:00", "26", "", "run1",
                "14.03.2023", "10:07:30", "CO", "1.2", "510", "1100", "H2", "0.5", "810", "2100",
            ])
            .with_text_row(&[
                "2023-03-14 10:03:00", "", "-102", "-3.2", "", "2023-03-14 10:05:00", "30",
            ]);
        let results = Sheet::new("Results")
            .with_text_row(&["Time", "CO I (mA)", "CO FE (%)", "H2 I (mA)", "H2 FE (%)", "Total FE (%)"])
            .with_text_row(&["2023-03-14 10:01:00", "-60", "-60", "-30", "30", "90"]);
        Workbook::default()
            .with_sheet(details)
            .with_sheet(raw)
            .with_sheet(results)
            .with_sheet(Sheet::new("Plots"))
    }

    #[test]
    fn test_layout_detection() {
        assert_eq!(layout(&combined()), Some(Layout::Combined));
        let other = Workbook::default().with_sheet(Sheet::new("Sheet1"));
        assert_eq!(layout(&other), None);
        assert!(decode_workbook("x.xlsx", &other).is_err());
    }

    #[test]
    fn test_combined_layout() {
        let decoded = decode_workbook("necc.xlsx", &combined()).unwrap();
        assert_eq!(decoded.meta_str("Membrane name"), Some("Sustainion X37-50"));
        assert_eq!(decoded.meta_f64("Feed gas 1 flow rate"), Some(20.0));

        let pot = decoded.table("potentiometry").unwrap();
        // The row without a timestamp is dropped; the empty I/mA alias is skipped.
        assert_eq!(pot.numbers("current").unwrap(), &[-100.0, -102.0]);

        let thermo = decoded.table("thermocouple").unwrap();
        let stamps = thermo.columns["datetime"].timestamps().unwrap();
        assert_eq!(stamps.len(), 2);
        assert_eq!(stamps[0].unwrap().to_string(), "2023-03-14 10:01:00");
        assert_eq!(thermo.numbers("Temperature Cathode").unwrap(), &[26.0, 30.0]);

        assert_eq!(decoded.segments.len(), 2);
        assert_eq!(decoded.segments[1].metadata["gas_type"], Scalar::Text("H2".to_string()));
        assert_eq!(decoded.segments[0].data.numbers("ppm").unwrap(), &[1000.0, 1100.0]);

        let results = decoded.table("results").unwrap();
        assert_eq!(results.numbers("CO FE (%)").unwrap(), &[60.0]);
        assert_eq!(results.numbers("CO I (mA)").unwrap(), &[-60.0]);
    }
}
