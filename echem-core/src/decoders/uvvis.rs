//! UV-vis absorbance spectra.
//!
//! Two exports are understood: a CSV whose header line is `WL/nm,Abs`, and the spectrometer's
//! `.ABS` text where a `  ABSOR-> Wave:` line separates the `key: value` header from the
//! whitespace-separated wavelength/absorbance pairs.

use super::{text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;

pub const CSV_HEADER: &str = "WL/nm,Abs";
pub const ABS_MARKER: &str = "  ABSOR-> Wave:";

fn pairs<'a>(lines: impl Iterator<Item = &'a str>, separator: Option<char>) -> (Vec<f64>, Vec<f64>) {
    let mut wavelength = Vec::new();
    let mut absorbance = Vec::new();
    for line in lines {
        let fields: Vec<&str> = match separator {
            Some(sep) => line.split(sep).collect(),
            None => line.split_whitespace().collect(),
        };
        if let (Some(x), Some(y)) = (
            fields.first().and_then(|f| text::parse_number(f)),
            fields.get(1).and_then(|f| text::parse_number(f)),
        ) {
            wavelength.push(x);
            absorbance.push(y);
        }
    }
    (wavelength, absorbance)
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let content = text::normalize(bytes);
    let lines: Vec<&str> = content.lines().collect();
    let mut decoded = Decoded::new(DecoderKind::UvVis);
    decoded.technique = Some("UV-vis".to_string());

    let (wavelength, absorbance) =
        if let Some(at) = lines.iter().position(|l| l.trim() == CSV_HEADER) {
            pairs(lines[at + 1..].iter().copied(), Some(','))
        } else if let Some(at) = lines.iter().position(|l| l.starts_with(ABS_MARKER)) {
            for line in &lines[..at] {
                if let Some((key, value)) = line.split_once(':') {
                    decoded
                        .metadata
                        .insert(key.trim().to_string(), Scalar::Text(value.trim().to_string()));
                }
            }
            pairs(lines[at + 1..].iter().copied(), None)
        } else {
            return Err(EchemError::decode(file, "neither a 'WL/nm,Abs' nor an 'ABSOR->' spectrum"));
        };
    if let Some(dt) = decoded
        .meta_str("Date")
        .zip(decoded.meta_str("Time"))
        .and_then(|(d, t)| text::parse_date_time(d, t))
    {
        decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(dt));
    }

    let mut table = Table::new("data");
    table.push("wavelength", Some("nm"), Column::Numbers(wavelength));
    table.push("absorbance", None, Column::Numbers(absorbance));
    decoded.tables.push(table);
    Ok(decoded)
}
