//! CH Instruments text exports.
//!
//! The first line is the acquisition date, the second the technique name. Parameter lines
//! `Name (unit) = value` follow until the column header line, which contains `Potential/V`
//! or `Freq/Hz`. Data rows use a comma or a tab.

use super::{text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;

const TECHNIQUES: [(&str, &str); 7] = [
    ("Cyclic Voltammetry", "CV"),
    ("Linear Sweep Voltammetry", "LSV"),
    ("A.C. Impedance", "EIS"),
    ("Amperometric i-t Curve", "CA"),
    ("Chronoamperometry", "CA"),
    ("Chronopotentiometry", "CP"),
    ("Open Circuit Potential - Time", "OCV"),
];

fn is_column_line(line: &str) -> bool {
    line.contains("Potential/V") || line.contains("Freq/Hz") || line.starts_with("Time/s")
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let content = text::normalize(bytes);
    let lines: Vec<&str> = content.lines().collect();
    let header_at = lines
        .iter()
        .position(|l| is_column_line(l))
        .ok_or_else(|| EchemError::decode(file, "no Potential/V or Freq/Hz column line"))?;

    let mut decoded = Decoded::new(DecoderKind::Chi);
    if let Some(dt) = lines.first().and_then(|l| text::parse_datetime(l)) {
        decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(dt));
    }
    for line in &lines[..header_at] {
        let line = line.trim();
        if decoded.technique.is_none() {
            if let Some((name, code)) = TECHNIQUES.iter().find(|(name, _)| line.starts_with(name)) {
                decoded.technique = Some(code.to_string());
                decoded
                    .metadata
                    .insert("technique_name".to_string(), Scalar::Text(name.to_string()));
                continue;
            }
        }
        let pair = line.split_once(" = ").or_else(|| line.split_once(": "));
        if let Some((key, value)) = pair {
            let scalar = match text::parse_number(value) {
                Some(v) => Scalar::Number(v),
                None => Scalar::Text(value.trim().to_string()),
            };
            decoded.metadata.insert(key.trim().to_string(), scalar);
        }
    }

    let separator = text::detect_separator(lines[header_at]);
    let headers = text::split_fields(lines[header_at], separator);
    let rows: Vec<Vec<String>> = lines[header_at + 1..]
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| text::split_fields(l, separator))
        .collect();
    let mut table = Table::new("data");
    for (k, name) in headers.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let values = rows
            .iter()
            .map(|r| r.get(k).map_or(f64::NAN, |v| text::number_or_nan(v)))
            .collect();
        let unit = name.rsplit_once('/').map(|(_, u)| u);
        table.push(name, unit, Column::Numbers(values));
    }
    decoded.methods = decoded.technique.iter().cloned().collect();
    decoded.tables.push(table);
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cv_export() {
        let raw = "Mar. 14, 2023   14:03:11\nCyclic Voltammetry\nFile: C:\\cv.bin\n\
                   Init E (V) = 0.2\nHigh E (V) = 1.0\nScan Rate (V/s) = 0.05\n\n\
                   Potential/V, Current/A\n\n0.200, 1.0e-6\n0.201, 1.1e-6\n";
        let decoded = decode("cv.txt", raw.as_bytes()).unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("CV"));
        assert_eq!(decoded.meta_f64("High E (V)"), Some(1.0));
        assert!(decoded.start_datetime().is_some());
        let table = &decoded.tables[0];
        assert_eq!(table.numbers("Current/A").unwrap(), &[1.0e-6, 1.1e-6]);
    }

    #[test]
    fn test_tab_separated_impedance() {
        let raw = "A.C. Impedance\nFreq/Hz\tZ'/ohm\tZ\"/ohm\n1000\t10\t-2\n";
        let decoded = decode("eis.txt", raw.as_bytes()).unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("EIS"));
        assert_eq!(decoded.tables[0].numbers("Z\"/ohm").unwrap(), &[-2.0]);
    }
}
