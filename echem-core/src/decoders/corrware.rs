//! Scribner CorrWare exports (`.cor`): a `key: value` header closed by `End Comments`,
//! followed by whitespace-separated E, I, T rows.

use super::{text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;

const COLUMNS: [(&str, &str); 3] = [("E(Volts)", "V"), ("I(Amps)", "A"), ("T(Seconds)", "s")];

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let content = text::normalize(bytes);
    let mut lines = content.lines();
    let mut decoded = Decoded::new(DecoderKind::CorrWare);
    let mut closed = false;
    for line in lines.by_ref() {
        let line = line.trim();
        if line.eq_ignore_ascii_case("End Comments") {
            closed = true;
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            let value = value.trim();
            let scalar = match text::parse_number(value) {
                Some(v) => Scalar::Number(v),
                None => Scalar::Text(value.to_string()),
            };
            decoded.metadata.insert(key, scalar);
        }
    }
    if !closed {
        return Err(EchemError::decode(file, "no 'End Comments' line"));
    }

    let rows: Vec<Vec<f64>> = lines
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split_whitespace().map(text::number_or_nan).collect())
        .collect();
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut table = Table::new("data");
    for k in 0..width {
        let (name, unit) = match COLUMNS.get(k) {
            Some((name, unit)) => (name.to_string(), Some(*unit)),
            None => (format!("column {k}"), None),
        };
        let values = rows.iter().map(|r| r.get(k).copied().unwrap_or(f64::NAN)).collect();
        table.push(&name, unit, Column::Numbers(values));
    }

    let date = decoded.meta_str("Date").map(str::to_string);
    let time = decoded.meta_str("Time").map(str::to_string);
    if let (Some(date), Some(time)) = (date, time) {
        if let Some(dt) = text::parse_date_time(&date, &time) {
            decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(dt));
        }
    }
    decoded.technique = Some("CV".to_string());
    decoded.methods = vec!["CV".to_string()];
    decoded.tables.push(table);
    Ok(decoded)
}
