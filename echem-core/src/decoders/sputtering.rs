//! Thin-film combinatorial (TFC) sputtering run sheets.
//!
//! The first worksheet holds `Holder`, `Substrate` and `Notes` as key/value rows plus three
//! sections, each introduced by a title row (`Targets`, `Process`, `Observables`) followed by a
//! header row with `Name [unit]` columns and data rows up to the next blank row.

use super::{
    text,
    workbook::{Sheet, Workbook},
    Column, Decoded, DecoderKind, Scalar, Table,
};
use crate::error::EchemError;

pub const SECTIONS: [&str; 3] = ["Targets", "Process", "Observables"];
const KEYS: [&str; 3] = ["Holder", "Substrate", "Notes"];

/// True when `sheet` carries the `Targets` section title.
pub fn is_run_sheet(sheet: &Sheet) -> bool {
    sheet.find_row(SECTIONS[0]).is_some()
}

fn read_section(sheet: &Sheet, title_row: usize, name: &str) -> Table {
    let header_row = title_row + 1;
    let header = sheet.header(header_row);
    let rows: Vec<usize> = (header_row + 1..sheet.height())
        .take_while(|&r| !sheet.cell(r, 0).is_empty())
        .collect();
    let mut table = Table::new(name.to_ascii_lowercase());
    for (k, column_name) in header.iter().enumerate() {
        if column_name.is_empty() {
            continue;
        }
        let (label, unit) = text::split_unit(column_name);
        let cells: Vec<_> = rows.iter().map(|&r| sheet.cell(r, k)).collect();
        let numeric = cells.iter().all(|c| c.is_empty() || c.as_f64().is_some())
            && cells.iter().any(|c| !c.is_empty());
        let column = if numeric {
            Column::Numbers(cells.iter().map(|c| c.as_f64().unwrap_or(f64::NAN)).collect())
        } else {
            Column::Text(cells.iter().map(|c| c.display().unwrap_or_default()).collect())
        };
        table.push(&label, unit.as_deref(), column);
    }
    table
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let workbook = Workbook::from_xlsx_bytes(file, bytes)?;
    decode_workbook(file, &workbook)
}

pub fn decode_workbook(file: &str, workbook: &Workbook) -> Result<Decoded, EchemError> {
    let sheet = workbook
        .sheets
        .iter()
        .find(|s| is_run_sheet(s))
        .ok_or_else(|| EchemError::decode(file, "no worksheet with a 'Targets' section"))?;

    let mut decoded = Decoded::new(DecoderKind::Sputtering);
    decoded.technique = Some("sputtering".to_string());
    for key in KEYS {
        if let Some(row) = sheet.find_row(key) {
            if let Some(value) = sheet.cell(row, 1).display() {
                decoded
                    .metadata
                    .insert(key.to_ascii_lowercase(), Scalar::Text(value));
            }
        }
    }
    if let Some(dt) = sheet.find_row("Date").and_then(|r| sheet.cell(r, 1).as_datetime()) {
        decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(dt));
    }
    for section in SECTIONS {
        if let Some(row) = sheet.find_row(section) {
            decoded.tables.push(read_section(sheet, row, section));
        }
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_sheet() -> Workbook {
        let sheet = Sheet::new("Run")
            .with_text_row(&["Holder", "6\" Wafer"])
            .with_text_row(&["Substrate", "Si/SiO2"])
            .with_text_row(&[""])
            .with_text_row(&["Targets"])
            .with_text_row(&["Target", "Material", "Power [W]", "Power supply"])
            .with_text_row(&["1) Al", "Al", "150", "DC1"])
            .with_text_row(&["2) Ni", "Ni", "80", "RF1"])
            .with_text_row(&[""])
            .with_text_row(&["Process"])
            .with_text_row(&["Step", "Sputter pressure [mbar]", "Gas flow [sccm]", "Gas", "Duration [s]"])
            .with_text_row(&["Deposition", "0.0167", "20", "Ar", "3600"])
            .with_text_row(&[""])
            .with_text_row(&["Observables"])
            .with_text_row(&["Temperature [°C]", "Base pressure [mbar]"])
            .with_text_row(&["25", "1e-7"]);
        Workbook::default().with_sheet(sheet)
    }

    #[test]
    fn test_sections_and_keys() {
        let decoded = decode_workbook("run.xlsx", &run_sheet()).unwrap();
        assert_eq!(decoded.meta_str("holder"), Some("6\" Wafer"));
        let targets = decoded.table("targets").unwrap();
        assert_eq!(targets.columns["Target"].texts().unwrap()[0], "1) Al");
        assert_eq!(targets.numbers("Power").unwrap(), &[150.0, 80.0]);
        let process = decoded.table("process").unwrap();
        assert_eq!(process.numbers("Sputter pressure").unwrap(), &[0.0167]);
        assert_eq!(process.unit("Sputter pressure"), Some("mbar"));
        let observables = decoded.table("observables").unwrap();
        assert_eq!(observables.numbers("Temperature").unwrap(), &[25.0]);
    }

    #[test]
    fn test_rejects_sheet_without_targets() {
        let workbook = Workbook::default().with_sheet(Sheet::new("x").with_text_row(&["a"]));
        assert!(decode_workbook("x.xlsx", &workbook).is_err());
    }
}
