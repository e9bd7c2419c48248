//! Gamry EXPLAIN (`.DTA`) files.
//!
//! A header of tab-separated `KEY TYPE VALUE...` lines is followed by one or more tables
//! introduced by `NAME TABLE <rows>`, a column line, a unit line and tab-indented data rows.

use super::{text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;
use indexmap::IndexMap;

/// Keys whose values stay text even when they look numeric.
const STRING_KEYS: [&str; 7] = [
    "NICK",
    "SAMPLEID",
    "ENVIRONMENTID",
    "ECSETUPID",
    "DCCALDATE",
    "ACCALDATE",
    "PSTATSERIALNO",
];

const KNOWN_TYPES: [&str; 11] = [
    "LABEL", "PSTAT", "QUANT", "IQUANT", "POTEN", "TOGGLE", "ONEPARAM", "TWOPARAM", "SELECTOR",
    "NOTES", "TABLE",
];

/// Tables that carry a method's data; other tables are ancillary.
fn is_primary_curve(name: &str) -> bool {
    name == "ZCURVE"
        || name
            .strip_prefix("CURVE")
            .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
}

/// Maps a raw method token onto the technique code used throughout the crate.
///
/// This is the single table every decoder with method chains consults.
pub fn method_token(raw: &str) -> String {
    let token = raw.trim().to_ascii_uppercase();
    let mapped = match token.as_str() {
        "CV" | "CYCLICVOLTAMMETRY" => "CV",
        "CA" | "CHRONOA" | "CHRONOAMPEROMETRY" => "CA",
        "CP" | "CHRONOP" | "CHRONOPOTENTIOMETRY" => "CP",
        "CC" | "CHRONOC" | "CHRONOCOULOMETRY" => "CC",
        "LSV" | "LINEARSWEEP" => "LSV",
        "LSG" | "GALVANODYNAMIC" => "LSG",
        "OCV" | "OCP" | "CORPOT" => "OCV",
        "EIS" | "EISPOT" | "PEIS" => "EIS",
        "EISGALV" | "GEIS" => "GEIS",
        _ => return token,
    };
    mapped.to_string()
}

/// Splits a `CV-CA-LSV` style chain into technique codes.
pub fn method_chain(raw: &str) -> Vec<String> {
    raw.split(['-', ','])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(method_token)
        .collect()
}

fn header_value(key: &str, kind: &str, values: &[&str]) -> Scalar {
    let first = values.first().copied().unwrap_or("").trim();
    if STRING_KEYS.contains(&key) {
        return Scalar::Text(first.to_string());
    }
    match kind {
        "LABEL" | "PSTAT" => Scalar::Text(first.to_string()),
        "QUANT" | "POTEN" => text::parse_number(first)
            .map(Scalar::Number)
            .unwrap_or_else(|| Scalar::Text(first.to_string())),
        "IQUANT" | "SELECTOR" => match first.parse::<i64>() {
            Ok(v) => Scalar::Int(v),
            Err(_) => text::parse_number(first)
                .map(Scalar::Number)
                .unwrap_or_else(|| Scalar::Text(first.to_string())),
        },
        "TOGGLE" => Scalar::Bool(first == "T"),
        "ONEPARAM" => Scalar::Param {
            enabled: first == "T",
            value: values.get(1).map_or(f64::NAN, |v| text::number_or_nan(v)),
        },
        "TWOPARAM" => Scalar::Range {
            enabled: first == "T",
            start: values.get(1).map_or(f64::NAN, |v| text::number_or_nan(v)),
            finish: values.get(2).map_or(f64::NAN, |v| text::number_or_nan(v)),
        },
        _ => Scalar::Text(first.to_string()),
    }
}

fn read_table<'a>(
    name: &str,
    declared_rows: Option<usize>,
    lines: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
) -> Table {
    let mut table = Table::new(name);
    let headers: Vec<String> = match lines.next() {
        Some(line) => line.split('\t').skip(1).map(|h| h.trim().to_string()).collect(),
        None => return table,
    };
    let units: Vec<String> = match lines.next() {
        Some(line) => line.split('\t').skip(1).map(|u| u.trim().to_string()).collect(),
        None => Vec::new(),
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    while let Some(line) = lines.peek() {
        if !line.starts_with('\t') || declared_rows.is_some_and(|n| rows.len() >= n) {
            break;
        }
        rows.push(line.split('\t').skip(1).map(|f| f.trim().to_string()).collect());
        lines.next();
    }
    if rows.is_empty() {
        return table;
    }

    for (k, header) in headers.iter().enumerate() {
        if header.is_empty() {
            continue;
        }
        let unit = units.get(k).map(String::as_str).filter(|u| !u.is_empty() && *u != "#");
        let cells = rows.iter().map(|r| r.get(k).map(String::as_str).unwrap_or(""));
        let column = if header.eq_ignore_ascii_case("OVER") {
            Column::Text(cells.map(str::to_string).collect())
        } else {
            Column::Numbers(cells.map(text::number_or_nan).collect())
        };
        table.push(header, unit, column);
    }
    table
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let content = text::normalize(bytes);
    let mut lines = content.lines().peekable();
    match lines.next() {
        Some(first) if first.trim() == "EXPLAIN" => {}
        _ => return Err(EchemError::decode(file, "missing EXPLAIN header line")),
    }

    let mut decoded = Decoded::new(DecoderKind::Gamry);
    let mut metadata: IndexMap<String, Scalar> = IndexMap::new();
    while let Some(line) = lines.next() {
        let fields: Vec<&str> = line.split('\t').collect();
        let key = fields[0].trim();
        if key.is_empty() {
            continue;
        }
        if key == "EXPERIMENTABORTED" {
            metadata.insert(key.to_string(), Scalar::Bool(true));
            continue;
        }
        let Some(kind) = fields.get(1).map(|k| k.trim()) else {
            continue;
        };
        if fields.len() == 2 && !KNOWN_TYPES.contains(&kind) {
            // `TAG<TAB>CV`: a bare value without a type column.
            metadata.insert(key.to_string(), Scalar::Text(kind.to_string()));
            continue;
        }
        match kind {
            "TABLE" => {
                let declared = fields.get(2).and_then(|n| n.trim().parse::<usize>().ok());
                let table = read_table(key, declared, &mut lines);
                if !table.is_empty() {
                    decoded.tables.push(table);
                }
            }
            "NOTES" => {
                let count = fields.get(2).and_then(|n| n.trim().parse::<usize>().ok()).unwrap_or(0);
                let notes: Vec<String> = lines.by_ref().take(count).map(str::to_string).collect();
                metadata.insert(key.to_string(), Scalar::Lines(notes));
            }
            _ => {
                metadata.insert(key.to_string(), header_value(key, kind, &fields[2..]));
            }
        }
    }

    let start = match (
        metadata.get("DATE").and_then(Scalar::as_str),
        metadata.get("TIME").and_then(Scalar::as_str),
    ) {
        (Some(date), Some(time)) => text::parse_date_time(date, time),
        _ => None,
    };
    if let Some(dt) = start {
        metadata.insert("datetime".to_string(), Scalar::DateTime(dt));
    }

    let chain = metadata
        .get("METHOD")
        .or_else(|| metadata.get("TAG"))
        .map(Scalar::display)
        .unwrap_or_default();
    decoded.methods = method_chain(&chain);
    decoded.technique = decoded.methods.first().cloned();
    decoded.metadata = metadata;
    assign_methods(&mut decoded);
    Ok(decoded)
}

/// Techniques that write one curve per cycle.
fn repeats_curves(method: &str) -> bool {
    method == "CV"
}

/// Chain position of every primary curve, in file order. Each method owns one curve; the
/// surplus belongs to the first cycling method of the chain, or to the last method when none
/// cycles.
fn curve_positions(methods: &[String], curves: usize) -> Vec<usize> {
    let Some(last) = methods.len().checked_sub(1) else {
        return Vec::new();
    };
    let surplus = curves.saturating_sub(methods.len());
    let absorber = methods.iter().position(|m| repeats_curves(m)).unwrap_or(last);
    let mut positions: Vec<usize> = (0..methods.len())
        .flat_map(|position| {
            let owned = if position == absorber { 1 + surplus } else { 1 };
            std::iter::repeat(position).take(owned)
        })
        .collect();
    positions.truncate(curves);
    positions
}

fn assign_methods(decoded: &mut Decoded) {
    let curves = decoded.tables.iter().filter(|t| is_primary_curve(&t.name)).count();
    let positions = curve_positions(&decoded.methods, curves);
    let methods = decoded.methods.clone();
    for (table, position) in decoded
        .tables
        .iter_mut()
        .filter(|t| is_primary_curve(&t.name))
        .zip(positions)
    {
        table.method = Some(methods[position].clone());
    }
}

/// Primary curve tables of the method at `position` in the chain; every curve when the file
/// names no method.
pub fn curves_for_method(decoded: &Decoded, position: usize) -> Vec<&Table> {
    let curves: Vec<&Table> = decoded.tables.iter().filter(|t| is_primary_curve(&t.name)).collect();
    if decoded.methods.is_empty() {
        return curves;
    }
    let positions = curve_positions(&decoded.methods, curves.len());
    curves
        .into_iter()
        .zip(positions)
        .filter(|(_, p)| *p == position)
        .map(|(table, _)| table)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cv_file(rows: usize) -> String {
        let mut s = String::from("EXPLAIN\r\nTAG\tCV\r\nTITLE\tLABEL\tCyclic Voltammetry\tTest &Identifier\r\n");
        s.push_str("DATE\tLABEL\t3/14/2023\tDate\r\nTIME\tLABEL\t14:03:11\tTime\r\n");
        s.push_str("PSTAT\tPSTAT\tREF600-12345\tPotentiostat\r\n");
        s.push_str("SAMPLEID\tLABEL\t0001\tSample ID\r\n");
        s.push_str("VLIMIT1\tONEPARAM\tT\t0,5\tLimit 1 (V)\r\n");
        s.push_str("SCANRATE\tQUANT\t100\tScan Rate (mV/s)\r\n");
        s.push_str("AREA\tQUANT\t0.5\tSample Area (cm^2)\r\n");
        s.push_str("IRCOMP\tTOGGLE\tF\tIR Comp\r\n");
        s.push_str("NOTES\tNOTES\t2\tNotes...\r\nfirst note\r\nsecond note\r\n");
        s.push_str(&format!("CURVE\tTABLE\t{rows}\r\n"));
        s.push_str("\tPt\tT\tVf\tIm\tVu\tSig\tAch\tIERange\tOver\r\n");
        s.push_str("\t#\ts\tV vs. Ref.\tA\tV\tV\tV\t#\tbits\r\n");
        for i in 0..rows {
            s.push_str(&format!(
                "\t{i}\t{:.3}\t{:.4}\t{:.6E}\t0\t0\t0\t5\t...........\r\n",
                i as f64 * 0.01,
                0.1 + i as f64 * 0.001,
                1e-6 * i as f64
            ));
        }
        s
    }

    #[test]
    fn test_header_types() {
        let decoded = decode("CV.DTA", cv_file(3).as_bytes()).unwrap();
        assert_eq!(decoded.technique.as_deref(), Some("CV"));
        assert_eq!(
            decoded.meta("VLIMIT1"),
            Some(&Scalar::Param {
                enabled: true,
                value: 0.5
            })
        );
        assert_eq!(decoded.meta("SAMPLEID"), Some(&Scalar::Text("0001".into())));
        assert_eq!(decoded.meta("IRCOMP"), Some(&Scalar::Bool(false)));
        assert_eq!(decoded.meta_f64("SCANRATE"), Some(100.0));
        assert_eq!(
            decoded.meta("NOTES"),
            Some(&Scalar::Lines(vec!["first note".into(), "second note".into()]))
        );
        assert!(decoded.start_datetime().is_some());
    }

    #[test]
    fn test_curve_table() {
        let decoded = decode("CV.DTA", cv_file(5).as_bytes()).unwrap();
        let curve = decoded.table("CURVE").unwrap();
        assert_eq!(curve.len(), 5);
        assert_eq!(curve.numbers("Vf").unwrap()[0], 0.1);
        assert_eq!(curve.unit("Vf"), Some("V vs. Ref."));
        assert_eq!(curve.method.as_deref(), Some("CV"));
    }

    #[test]
    fn test_over_column_stays_text() {
        let text = "EXPLAIN\nTAG\tLABEL\tCA\nCURVE\tTABLE\t1\n\tPt\tT\tOVER\n\t#\ts\tbits\n\t0\t0.1\t..x..\n";
        let decoded = decode("CA.DTA", text.as_bytes()).unwrap();
        let curve = decoded.table("CURVE").unwrap();
        assert_eq!(
            curve.columns.get("OVER"),
            Some(&Column::Text(vec!["..x..".to_string()]))
        );
    }

    #[test]
    fn test_empty_curve_produces_no_table() {
        let text = "EXPLAIN\nTAG\tLABEL\tCV\nCURVE\tTABLE\t0\n\tPt\tVf\n\t#\tV\n";
        let decoded = decode("CV.DTA", text.as_bytes()).unwrap();
        assert!(decoded.tables.is_empty());
    }

    #[test]
    fn test_method_chain_assigns_curves_in_order() {
        let text = "EXPLAIN\nMETHOD\tLABEL\tCV-CHRONOA\n\
            CURVE1\tTABLE\t1\n\tPt\tVf\n\t#\tV\n\t0\t0.1\n\
            CURVE2\tTABLE\t1\n\tPt\tVf\n\t#\tV\n\t0\t0.2\n\
            EXPERIMENTABORTED\tTOGGLE\tT\n";
        let decoded = decode("chain.DTA", text.as_bytes()).unwrap();
        assert_eq!(decoded.methods, vec!["CV", "CA"]);
        assert_eq!(decoded.tables[1].method.as_deref(), Some("CA"));
        assert_eq!(curves_for_method(&decoded, 1)[0].numbers("Vf").unwrap(), &[0.2]);
        assert_eq!(decoded.meta("EXPERIMENTABORTED"), Some(&Scalar::Bool(true)));
    }

    #[test]
    fn test_extra_cv_cycles_stay_with_cv() {
        let text = "EXPLAIN\nMETHOD\tLABEL\tCV-CHRONOA\n\
            CURVE1\tTABLE\t1\n\tPt\tVf\n\t#\tV\n\t0\t0.1\n\
            CURVE2\tTABLE\t1\n\tPt\tVf\n\t#\tV\n\t0\t0.2\n\
            CURVE3\tTABLE\t1\n\tPt\tVf\n\t#\tV\n\t0\t0.3\n";
        let decoded = decode("chain.DTA", text.as_bytes()).unwrap();
        let owners: Vec<Option<&str>> = decoded.tables.iter().map(|t| t.method.as_deref()).collect();
        assert_eq!(owners, vec![Some("CV"), Some("CV"), Some("CA")]);
        assert_eq!(curves_for_method(&decoded, 0).len(), 2);
        assert_eq!(curves_for_method(&decoded, 1)[0].numbers("Vf").unwrap(), &[0.3]);
    }

    #[test]
    fn test_curve_positions() {
        assert_eq!(curve_positions(&method_chain("CHRONOA-CV"), 4), vec![0, 1, 1, 1]);
        assert_eq!(curve_positions(&method_chain("CHRONOA-CHRONOP"), 3), vec![0, 1, 1]);
        assert_eq!(curve_positions(&method_chain("CV-CHRONOA-EIS"), 2), vec![0, 1]);
        assert_eq!(curve_positions(&method_chain("EIS"), 2), vec![0, 0]);
        assert!(curve_positions(&[], 2).is_empty());
    }

    #[test]
    fn test_unified_method_tokens() {
        assert_eq!(method_token("CORPOT"), "OCV");
        assert_eq!(method_token("EISPOT"), "EIS");
        assert_eq!(method_token("EISGALV"), "GEIS");
        assert_eq!(method_token("chronop"), "CP");
        assert_eq!(method_token("XYZ"), "XYZ");
    }

    #[test]
    fn test_not_explain_is_decode_failure() {
        assert!(matches!(
            decode("x.DTA", b"hello"),
            Err(EchemError::DecodeFailed { .. })
        ));
    }
}
