//! Two-column spectra: diffractograms (`.xy`, `.xye`), Raman and IR exports.
//!
//! Lines that do not start with two numbers are header or comment lines; `key: value` or
//! `key=value` comments are kept as metadata.

use super::{text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;

/// Technique tag and axis units derived from the file name.
pub fn spectrum_kind(file: &str) -> Option<(&'static str, &'static str, &'static str)> {
    let lower = file.to_ascii_lowercase();
    if lower.ends_with(".xy") || lower.ends_with(".xye") {
        Some(("XRD", "deg", "counts"))
    } else if lower.contains("raman") {
        Some(("Raman", "1/cm", "counts"))
    } else if lower.ends_with(".dpt") || lower.contains("_ir") {
        Some(("IR", "1/cm", "a.u."))
    } else {
        None
    }
}

fn numbers(line: &str) -> Option<(f64, f64)> {
    let mut fields: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() < 2 {
        fields = line.split(',').map(str::trim).filter(|f| !f.is_empty()).collect();
    }
    let x = text::parse_number(fields.first()?)?;
    let y = text::parse_number(fields.get(1)?)?;
    Some((x, y))
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let content = text::normalize(bytes);
    let (technique, x_unit, y_unit) = spectrum_kind(file).unwrap_or(("XRD", "deg", "counts"));
    let mut decoded = Decoded::new(DecoderKind::XySpectrum);
    let (mut x, mut y) = (Vec::new(), Vec::new());
    for line in content.lines() {
        match numbers(line) {
            Some((a, b)) => {
                x.push(a);
                y.push(b);
            }
            None => {
                let comment = line.trim().trim_start_matches(['#', '\'', ';']).trim();
                if let Some((key, value)) = comment.split_once(':').or_else(|| comment.split_once('=')) {
                    if !key.trim().is_empty() {
                        decoded
                            .metadata
                            .insert(key.trim().to_string(), Scalar::Text(value.trim().to_string()));
                    }
                }
            }
        }
    }
    if x.is_empty() {
        return Err(EchemError::decode(file, "no two-column numeric rows"));
    }
    decoded.technique = Some(technique.to_string());
    let mut table = Table::new("data");
    table.push("x", Some(x_unit), Column::Numbers(x));
    table.push("y", Some(y_unit), Column::Numbers(y));
    decoded.tables.push(table);
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diffractogram_with_comments() {
        let raw = "# Sample: NiFe\n'Wavelength=1.5406\n10.00 120\n10.02\t125\n";
        let decoded = decode("scan.xy", raw.as_bytes()).unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("XRD"));
        assert_eq!(decoded.meta_str("Sample"), Some("NiFe"));
        assert_eq!(decoded.tables[0].numbers("y").unwrap(), &[120.0, 125.0]);
    }

    #[test]
    fn test_comma_separated_ir() {
        let decoded = decode("sample_IR.dpt", b"4000.5,0.12\n3999.0,0.13\n").unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("IR"));
        assert_eq!(decoded.tables[0].numbers("x").unwrap(), &[4000.5, 3999.0]);
    }

    #[test]
    fn test_raman_detected_by_name() {
        assert_eq!(spectrum_kind("NiFe_raman_532nm.txt").map(|k| k.0), Some("Raman"));
        assert!(spectrum_kind("notes.txt").is_none());
    }

    #[test]
    fn test_empty_spectrum() {
        assert!(decode("x.xy", b"# nothing\n").is_err());
    }
}
