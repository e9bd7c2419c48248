//! Spectra International residual gas analyser exports (`.txt`).
//!
//! A free-form header ends at the `Scan Data` line; the next line names the tab-separated
//! columns. The first column is the scan timestamp. Cells reading `Skipped` mark scans the
//! instrument did not record and become missing values.

use super::{text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;

pub const MAGIC: &str = "Spectra International Data File";
const DELIMITER: &str = "Scan Data";
const SKIPPED: &str = "Skipped";

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let content = text::normalize(bytes);
    let lines: Vec<&str> = content.lines().collect();
    let delimiter = lines
        .iter()
        .position(|l| l.trim() == DELIMITER)
        .ok_or_else(|| EchemError::decode(file, "no 'Scan Data' line"))?;
    let header_line = lines
        .get(delimiter + 1)
        .ok_or_else(|| EchemError::decode(file, "no column line after 'Scan Data'"))?;

    let mut decoded = Decoded::new(DecoderKind::MassSpec);
    decoded.technique = Some("MS".to_string());
    for line in &lines[..delimiter] {
        let pair = line.split_once('\t').or_else(|| line.split_once(':'));
        if let Some((key, value)) = pair {
            let key = key.trim().trim_end_matches(':');
            if !key.is_empty() {
                decoded
                    .metadata
                    .insert(key.to_string(), Scalar::Text(value.trim().to_string()));
            }
        }
    }

    let headers = text::split_fields(header_line, '\t');
    let rows: Vec<Vec<String>> = lines[delimiter + 2..]
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| text::split_fields(l, '\t'))
        .collect();

    let mut table = Table::new("data");
    let stamps: Vec<_> = rows
        .iter()
        .map(|r| r.first().and_then(|v| text::parse_datetime(v)))
        .collect();
    if let Some(first) = stamps.iter().flatten().next() {
        decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(*first));
    }
    table.push("datetime", None, Column::Timestamps(stamps));
    for (k, name) in headers.iter().enumerate().skip(1) {
        if name.is_empty() {
            continue;
        }
        let values = rows
            .iter()
            .map(|r| match r.get(k).map(String::as_str) {
                Some(SKIPPED) | None => f64::NAN,
                Some(v) => text::number_or_nan(v),
            })
            .collect();
        let (label, unit) = text::split_unit(name);
        table.push(&label, unit.as_deref(), Column::Numbers(values));
    }
    decoded.tables.push(table);
    Ok(decoded)
}
