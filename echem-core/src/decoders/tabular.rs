//! Logger exports of the pump-rate controller and the phase-fluorometry oxygen sensor.
//!
//! Both devices write either CSV or XLSX with a free-form preamble followed by a table whose
//! header row starts with `Date [mm/dd/yyyy]`. Everything above that row is read as
//! `key, value` metadata.

use super::{
    text,
    workbook::{date_time, Cell, Sheet, Workbook},
    Column, Decoded, DecoderKind, Scalar, Table,
};
use crate::error::EchemError;
use chrono::NaiveDateTime;

pub const DATE_HEADER: &str = "Date [mm/dd/yyyy]";

fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
}

/// The first sheet of an XLSX export or the whole CSV export.
fn load_sheet(file: &str, bytes: &[u8]) -> Result<Sheet, EchemError> {
    if is_zip(bytes) {
        let workbook = Workbook::from_xlsx_bytes(file, bytes)?;
        return workbook
            .sheets
            .into_iter()
            .find(|s| s.find_row(DATE_HEADER).is_some())
            .ok_or_else(|| EchemError::decode(file, format!("no sheet has a '{DATE_HEADER}' row")));
    }
    Sheet::from_delimited("data", file, &text::normalize(bytes))
}

fn decode_logger(
    file: &str,
    bytes: &[u8],
    kind: DecoderKind,
    technique: &str,
) -> Result<Decoded, EchemError> {
    let sheet = load_sheet(file, bytes)?;
    let header_row = sheet
        .find_row(DATE_HEADER)
        .ok_or_else(|| EchemError::decode(file, format!("no '{DATE_HEADER}' row")))?;

    let mut decoded = Decoded::new(kind);
    decoded.technique = Some(technique.to_string());
    for r in 0..header_row {
        if let (Some(key), value) = (sheet.cell(r, 0).display(), sheet.cell(r, 1)) {
            let scalar = match value {
                Cell::Number(v) => Scalar::Number(*v),
                Cell::DateTime(dt) => Scalar::DateTime(*dt),
                other => match other.display() {
                    Some(text) => Scalar::Text(text),
                    None => continue,
                },
            };
            decoded.metadata.insert(key.trim_end_matches(':').to_string(), scalar);
        }
    }

    let header = sheet.header(header_row);
    let time_column = header.iter().position(|h| h.starts_with("Time"));
    let rows: Vec<usize> = (header_row + 1..sheet.height())
        .filter(|&r| !sheet.cell(r, 0).is_empty())
        .collect();

    let mut table = Table::new("data");
    let stamps: Vec<Option<NaiveDateTime>> = rows
        .iter()
        .map(|&r| date_time(sheet.cell(r, 0), time_column.map(|k| sheet.cell(r, k))))
        .collect();
    if let Some(first) = stamps.iter().flatten().next() {
        decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(*first));
    }
    table.push("datetime", None, Column::Timestamps(stamps));
    for (k, name) in header.iter().enumerate().skip(1) {
        if name.is_empty() || Some(k) == time_column {
            continue;
        }
        let (label, unit) = text::split_unit(name);
        let values = rows
            .iter()
            .map(|&r| sheet.cell(r, k).as_f64().unwrap_or(f64::NAN))
            .collect();
        table.push(&label, unit.as_deref(), Column::Numbers(values));
    }
    decoded.tables.push(table);
    Ok(decoded)
}

pub fn decode_pump_rate(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    decode_logger(file, bytes, DecoderKind::PumpRate, "PUMP")
}

pub fn decode_phase_fluorometry(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    decode_logger(file, bytes, DecoderKind::PhaseFluorometry, "PFO")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pump_csv_reads_from_date_row() {
        let raw = "Device,Pump 3\nOperator,AbCd\n\n\
                   Date [mm/dd/yyyy],Time [hh:mm:ss],Pump rate [ml/min],Pressure [bar]\n\
                   03/14/2023,14:03:11,1.5,1.01\n03/14/2023,14:03:41,1.6,1.02\n";
        let decoded = decode_pump_rate("run.pump.csv", raw.as_bytes()).unwrap();
        assert_eq!(decoded.meta_str("Operator"), Some("AbCd"));
        let table = &decoded.tables[0];
        assert_eq!(table.numbers("Pump rate").unwrap(), &[1.5, 1.6]);
        assert_eq!(table.unit("Pressure"), Some("bar"));
        let stamps = table.columns["datetime"].timestamps().unwrap();
        assert_eq!(stamps[1].unwrap().to_string(), "2023-03-14 14:03:41");
        assert!(decoded.start_datetime().is_some());
    }

    #[test]
    fn test_missing_date_row() {
        let err = decode_phase_fluorometry("x.oxy.csv", b"a,b\n1,2\n").unwrap_err();
        assert!(matches!(err, EchemError::DecodeFailed { .. }));
    }
}
