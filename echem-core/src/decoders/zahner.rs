//! Zahner Thales binary files.
//!
//! Both flavors are big-endian: an `i16` version, an `i16` holding the point count minus one,
//! the sample arrays as `f64`, the acquisition start as an OLE date and a Latin-1 text
//! trailer with the measurement notes.
//!
//! * `.ism` impedance spectra: frequency, |Z|, phase (rad), time, then `i16` significance.
//! * `.isw` transients: time, voltage, current.

use super::{biologic_mpr::ole_to_datetime, text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

struct Reader<'a> {
    file: &'a str,
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    fn truncated(&self) -> EchemError {
        EchemError::decode(self.file, "file ends before its declared point count")
    }

    fn i16(&mut self) -> Result<i16, EchemError> {
        self.cursor.read_i16::<BigEndian>().map_err(|_| self.truncated())
    }

    fn f64(&mut self) -> Result<f64, EchemError> {
        self.cursor.read_f64::<BigEndian>().map_err(|_| self.truncated())
    }

    fn f64s(&mut self, count: usize) -> Result<Vec<f64>, EchemError> {
        (0..count).map(|_| self.f64()).collect()
    }

    fn i16s(&mut self, count: usize) -> Result<Vec<f64>, EchemError> {
        (0..count).map(|_| self.i16().map(f64::from)).collect()
    }

    fn trailer(&mut self) -> String {
        let mut rest = Vec::new();
        // Reading the remainder of an in-memory cursor cannot fail.
        let _ = self.cursor.read_to_end(&mut rest);
        text::normalize(&rest)
    }
}

/// Spread of `values` relative to their magnitude; zero for a perfectly constant signal.
fn relative_spread(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.is_empty() {
        return f64::INFINITY;
    }
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let scale = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if scale == 0.0 {
        0.0
    } else {
        std / scale
    }
}

/// Chooses between chronoamperometry and chronopotentiometry: whichever signal is held
/// constant is the controlled one. Notes decide when neither signal is clearly flatter.
pub fn infer_transient_method(voltage: &[f64], current: &[f64], notes: &str) -> &'static str {
    let v = relative_spread(voltage);
    let i = relative_spread(current);
    if v < 0.5 * i {
        return "CA";
    }
    if i < 0.5 * v {
        return "CP";
    }
    let notes = notes.to_ascii_lowercase();
    if notes.contains("galvanostatic") {
        "CP"
    } else {
        "CA"
    }
}

fn read_notes(decoded: &mut Decoded, trailer: &str) {
    for line in trailer.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.split_once('=') {
            Some((key, value)) => {
                decoded
                    .metadata
                    .insert(key.trim().to_string(), Scalar::Text(value.trim().to_string()));
            }
            None => {
                let notes = decoded
                    .metadata
                    .entry("notes".to_string())
                    .or_insert_with(|| Scalar::Lines(Vec::new()));
                if let Scalar::Lines(lines) = notes {
                    lines.push(line.to_string());
                }
            }
        }
    }
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let lower = file.to_ascii_lowercase();
    let impedance = if lower.ends_with(".ism") {
        true
    } else if lower.ends_with(".isw") {
        false
    } else {
        return Err(EchemError::decode(file, "expected an .ism or .isw file"));
    };

    let mut reader = Reader {
        file,
        cursor: Cursor::new(bytes),
    };
    let version = reader.i16()?;
    let count = usize::try_from(reader.i16()?)
        .map_err(|_| EchemError::decode(file, "negative point count"))?
        + 1;

    let mut decoded = Decoded::new(DecoderKind::Zahner);
    decoded
        .metadata
        .insert("version".to_string(), Scalar::Int(version as i64));
    let mut table = Table::new("data");
    if impedance {
        let frequency = reader.f64s(count)?;
        let modulus = reader.f64s(count)?;
        let phase = reader.f64s(count)?;
        let time = reader.f64s(count)?;
        let significance = reader.i16s(count)?;
        let z_real = modulus.iter().zip(&phase).map(|(m, p)| m * p.cos()).collect();
        let z_imag = modulus.iter().zip(&phase).map(|(m, p)| m * p.sin()).collect();
        table.push("Frequency", Some("Hz"), Column::Numbers(frequency));
        table.push("Zreal", Some("Ohm"), Column::Numbers(z_real));
        table.push("Zimag", Some("Ohm"), Column::Numbers(z_imag));
        table.push("|Z|", Some("Ohm"), Column::Numbers(modulus));
        table.push("Phase", Some("rad"), Column::Numbers(phase));
        table.push("Time", Some("s"), Column::Numbers(time));
        table.push("Significance", None, Column::Numbers(significance));
        decoded.technique = Some("EIS".to_string());
    } else {
        let time = reader.f64s(count)?;
        let voltage = reader.f64s(count)?;
        let current = reader.f64s(count)?;
        table.push("Time", Some("s"), Column::Numbers(time));
        table.push("Voltage", Some("V"), Column::Numbers(voltage));
        table.push("Current", Some("A"), Column::Numbers(current));
    }
    if let Ok(days) = reader.f64() {
        if let Some(start) = ole_to_datetime(days) {
            decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(start));
        }
    }
    let trailer = reader.trailer();
    read_notes(&mut decoded, &trailer);

    if !impedance {
        let method = infer_transient_method(
            table.numbers("Voltage").unwrap_or(&[]),
            table.numbers("Current").unwrap_or(&[]),
            &trailer,
        );
        decoded.technique = Some(method.to_string());
    }
    decoded.methods = decoded.technique.iter().cloned().collect();
    decoded.tables.push(table);
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient(voltage: &[f64], current: &[f64], notes: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(1i16.to_be_bytes());
        out.extend((voltage.len() as i16 - 1).to_be_bytes());
        for i in 0..voltage.len() {
            out.extend((i as f64).to_be_bytes());
        }
        for v in voltage {
            out.extend(v.to_be_bytes());
        }
        for c in current {
            out.extend(c.to_be_bytes());
        }
        out.extend(45_000.0f64.to_be_bytes());
        out.extend(notes.as_bytes());
        out
    }

    #[test]
    fn test_constant_voltage_is_chronoamperometry() {
        let bytes = transient(&[0.5, 0.5, 0.5], &[1e-3, 2e-3, 4e-3], "");
        let decoded = decode("step.isw", &bytes).unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("CA"));
        assert_eq!(decoded.tables[0].numbers("Current").unwrap().len(), 3);
        assert!(decoded.start_datetime().is_some());
    }

    #[test]
    fn test_constant_current_is_chronopotentiometry() {
        let bytes = transient(&[0.1, 0.3, 0.9], &[1e-3, 1e-3, 1e-3], "mode=galvanostatic\n");
        let decoded = decode("step.isw", &bytes).unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("CP"));
        assert_eq!(decoded.meta_str("mode"), Some("galvanostatic"));
    }

    #[test]
    fn test_notes_break_ties() {
        assert_eq!(infer_transient_method(&[1.0, 2.0], &[1.0, 2.0], "Galvanostatic run"), "CP");
        assert_eq!(infer_transient_method(&[1.0, 2.0], &[1.0, 2.0], ""), "CA");
    }

    #[test]
    fn test_impedance_spectrum() {
        let mut out = Vec::new();
        out.extend(1i16.to_be_bytes());
        out.extend(0i16.to_be_bytes());
        for v in [1000.0f64, 10.0, 0.0, 0.5] {
            out.extend(v.to_be_bytes());
        }
        out.extend(1i16.to_be_bytes());
        let decoded = decode("spec.ism", &out).unwrap();
        let table = &decoded.tables[0];
        assert_eq!(table.numbers("Zreal").unwrap(), &[10.0]);
        assert_eq!(decoded.technique.as_deref(), Some("EIS"));
    }

    #[test]
    fn test_truncated_file() {
        assert!(decode("x.ism", &[0, 1, 0, 5]).is_err());
    }
}
