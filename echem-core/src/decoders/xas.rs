//! KMC-2 beamline scans (`.dat`).
//!
//! Leading `#` lines form the header. The line starting with `#D` or `# start_time:` carries
//! the scan timestamp, and the header line directly above the first data row names the
//! columns. Detector channels that repeat per element (`fluo`, `ICR`, `OCR`, `TLT`, `LT`,
//! `RT`) are renumbered `name.0`, `name.1`, … in column order.

use super::{text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;
use std::collections::HashMap;

pub const CHANNEL_COLUMNS: [&str; 6] = ["fluo", "ICR", "OCR", "TLT", "LT", "RT"];

/// Renumbers repeated detector channels so every column name is unique.
pub fn renumber_columns(names: &[&str]) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    names
        .iter()
        .map(|name| {
            if CHANNEL_COLUMNS.contains(name) {
                let index = seen.entry(*name).or_insert(0);
                let renamed = format!("{name}.{index}");
                *index += 1;
                renamed
            } else {
                name.to_string()
            }
        })
        .collect()
}

fn is_data_line(line: &str) -> bool {
    let mut fields = line.split_whitespace();
    fields.next().and_then(text::parse_number).is_some()
}

fn timestamp_line(line: &str) -> Option<&str> {
    line.strip_prefix("#D")
        .or_else(|| line.strip_prefix("# start_time:"))
        .map(str::trim)
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let content = text::normalize(bytes);
    let lines: Vec<&str> = content.lines().collect();
    let first_data = lines
        .iter()
        .position(|l| !l.starts_with('#') && is_data_line(l))
        .ok_or_else(|| EchemError::decode(file, "no numeric data rows"))?;
    let column_at = lines[..first_data]
        .iter()
        .rposition(|l| !l.trim().trim_start_matches('#').trim().is_empty())
        .ok_or_else(|| EchemError::decode(file, "no column header above the data"))?;

    let mut decoded = Decoded::new(DecoderKind::XasKmc2);
    decoded.technique = Some("XAS".to_string());
    let mut free_lines = Vec::new();
    for (i, line) in lines[..first_data].iter().enumerate() {
        if i == column_at {
            continue;
        }
        if let Some(stamp) = timestamp_line(line) {
            decoded
                .metadata
                .insert("dateline".to_string(), Scalar::Text(stamp.to_string()));
            if let Some(dt) = text::parse_datetime(stamp) {
                decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(dt));
            }
            continue;
        }
        let body = line.trim_start_matches('#').trim();
        match body.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                decoded
                    .metadata
                    .insert(key.trim().to_string(), Scalar::Text(value.trim().to_string()));
            }
            _ if !body.is_empty() => free_lines.push(body.to_string()),
            _ => {}
        }
    }
    if !free_lines.is_empty() {
        decoded.metadata.insert("comments".to_string(), Scalar::Lines(free_lines));
    }

    let raw_names: Vec<&str> = lines[column_at]
        .trim_start_matches('#')
        .split_whitespace()
        .collect();
    let names = renumber_columns(&raw_names);
    let rows: Vec<Vec<f64>> = lines[first_data..]
        .iter()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .map(|l| l.split_whitespace().map(text::number_or_nan).collect())
        .collect();
    let mut table = Table::new("data");
    for (k, name) in names.iter().enumerate() {
        let values = rows.iter().map(|r| r.get(k).copied().unwrap_or(f64::NAN)).collect();
        table.push(name, None, Column::Numbers(values));
    }
    decoded.tables.push(table);
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan() -> &'static str {
        "#S 12 escan\n#D Tue Mar 14 14:03:11 2023\n# Element: Ni K\n#\n\
         # Energy I0 I1 fluo ICR fluo ICR\n\
         8300.0 1.0e5 5.0e4 120 1000 130 1100\n8301.0 1.1e5 5.1e4 125 1010 135 1110\n"
    }

    #[test]
    fn test_columns_are_renumbered() {
        let decoded = decode("/home/kmc2/data/ni_fluo.dat", scan().as_bytes()).unwrap();
        let table = &decoded.tables[0];
        assert_eq!(table.numbers("fluo.1").unwrap(), &[130.0, 135.0]);
        assert_eq!(table.numbers("ICR.0").unwrap(), &[1000.0, 1010.0]);
        assert_eq!(table.numbers("Energy").unwrap()[1], 8301.0);
        assert_eq!(decoded.meta_str("Element"), Some("Ni K"));
        assert!(decoded.start_datetime().is_some());
    }

    #[test]
    fn test_start_time_line() {
        let raw = "# start_time: 2023-03-14 14:03:11\n# E I0\n1 2\n";
        let decoded = decode("x.dat", raw.as_bytes()).unwrap();
        assert_eq!(decoded.start_datetime().unwrap().to_string(), "2023-03-14 14:03:11");
    }

    #[test]
    fn test_renumber_leaves_other_columns() {
        assert_eq!(renumber_columns(&["E", "LT", "LT", "x"]), vec!["E", "LT.0", "LT.1", "x"]);
    }
}
