//! EC-Lab text exports (`.mpt`).

use super::{text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;
use indexmap::IndexMap;

const MAGIC: &str = "EC-Lab ASCII FILE";

/// Technique long names as printed in the header, mapped to technique codes.
const TECHNIQUES: [(&str, &str); 10] = [
    ("Cyclic Voltammetry", "CV"),
    ("Linear Sweep Voltammetry", "LSV"),
    ("Potentio Electrochemical Impedance Spectroscopy", "PEIS"),
    ("Galvano Electrochemical Impedance Spectroscopy", "GEIS"),
    ("Open Circuit Voltage", "OCV"),
    ("Chronoamperometry", "CA"),
    ("Chronopotentiometry", "CP"),
    ("Constant Current", "coC"),
    ("Constant Voltage", "coV"),
    ("IR compensation (PEIS)", "ZIR"),
];

fn technique_code(line: &str) -> Option<&'static str> {
    let line = line.trim();
    TECHNIQUES
        .iter()
        .find(|(name, _)| line.starts_with(name))
        .map(|(_, code)| *code)
}

fn scalar(value: &str) -> Scalar {
    match text::parse_number(value) {
        Some(v) => Scalar::Number(v),
        None => Scalar::Text(value.trim().to_string()),
    }
}

/// Parameter lines are a padded key followed by one padded field per sequence; fields are
/// separated by runs of at least two spaces.
fn parameter_line(line: &str) -> Option<(String, Vec<String>)> {
    if line.contains(" : ") {
        return None;
    }
    let mut parts = line
        .split("  ")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let key = parts.next()?;
    let values: Vec<String> = parts.collect();
    (!values.is_empty()).then_some((key, values))
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let content = text::normalize(bytes);
    let lines: Vec<&str> = content.lines().collect();
    if !lines.first().is_some_and(|l| l.trim().starts_with(MAGIC)) {
        return Err(EchemError::decode(file, "missing EC-Lab ASCII FILE header"));
    }
    let header_count = lines
        .get(1)
        .and_then(|l| l.split(':').nth(1))
        .and_then(|n| n.trim().parse::<usize>().ok())
        .ok_or_else(|| EchemError::decode(file, "missing 'Nb header lines' count"))?;
    if header_count < 2 || header_count > lines.len() {
        return Err(EchemError::decode(file, "header line count out of range"));
    }

    let mut decoded = Decoded::new(DecoderKind::BiologicMpt);
    let header = &lines[..header_count - 1];
    let mut after_technique = false;
    let mut parameters: Vec<IndexMap<String, Scalar>> = Vec::new();
    for line in header.iter().skip(2) {
        if decoded.technique.is_none() {
            if let Some(code) = technique_code(line) {
                decoded.technique = Some(code.to_string());
                decoded
                    .metadata
                    .insert("technique_name".to_string(), Scalar::Text(line.trim().to_string()));
                after_technique = true;
                continue;
            }
        }
        if let Some((key, value)) = line.split_once(" : ") {
            let key = key.trim().to_string();
            if key == "Acquisition started on" || key == "Technique started on" {
                if let Some(dt) = text::parse_datetime(value) {
                    decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(dt));
                }
            }
            decoded.metadata.insert(key, scalar(value));
            continue;
        }
        if after_technique {
            if let Some((key, values)) = parameter_line(line) {
                if parameters.len() < values.len() {
                    parameters.resize_with(values.len(), IndexMap::new);
                }
                for (sequence, value) in values.iter().enumerate() {
                    parameters[sequence].insert(key.clone(), scalar(value));
                }
            }
        }
    }
    decoded.parameters = parameters;

    let columns_line = lines[header_count - 1];
    let headers: Vec<&str> = columns_line.split('\t').map(str::trim).collect();
    let rows: Vec<Vec<&str>> = lines[header_count..]
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split('\t').collect())
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

    fn sample() -> String {
        [
            "EC-Lab ASCII FILE",
            "Nb header lines : 9",
            "",
            "Potentio Electrochemical Impedance Spectroscopy",
            "",
            "Acquisition started on : 03/14/2023 14:03:11.000",
            "E (V)               0,2500              0,5000",
            "Va (mV)             10,000              10,000",
            "freq/Hz\tRe(Z)/Ohm\t-Im(Z)/Ohm\t<Ewe>/V\tcycle number",
            "1,0E5\t10,5\t0,1\t0,25\t1",
            "1,0E4\t11,5\t0,7\t0,25\t1",
            "1,0E5\t10,4\t0,1\t0,50\t2",
            "",
        ]
        .join("\r\n")
    }

    #[test]
    fn test_reads_header_parameters_and_data() {
        let decoded = decode("eis.mpt", sample().as_bytes()).unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("PEIS"));
        assert!(decoded.start_datetime().is_some());
        assert_eq!(decoded.parameters.len(), 2);
        assert_eq!(decoded.parameters[1].get("E (V)").and_then(Scalar::as_f64), Some(0.5));
        let table = &decoded.tables[0];
        assert_eq!(table.len(), 3);
        assert_eq!(table.numbers("Re(Z)/Ohm").unwrap()[1], 11.5);
        assert_eq!(table.unit("freq/Hz"), Some("Hz"));
    }

    #[test]
    fn test_missing_magic() {
        assert!(decode("x.mpt", b"hello\nworld").is_err());
    }
}
