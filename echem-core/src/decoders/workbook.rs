//! In-memory spreadsheet shared by the workbook-based decoders and the batch importer.
//!
//! `.xlsx` files are read with `calamine` and written back with `rust_xlsxwriter`; delimited
//! text is read with `csv` into the same [`Sheet`] shape so CSV and XLSX exports of one
//! instrument share a decoder.

use super::text;
use crate::error::EchemError;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use rust_xlsxwriter::Workbook as XlsxWorkbook;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn text(value: &str) -> Self {
        Self::Text(value.to_string())
    }

    /// Text that looks like a number becomes a number; blank text becomes empty.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        match text::parse_number(trimmed) {
            Some(v) => Self::Number(v),
            None => Self::Text(trimmed.to_string()),
        }
    }

    /// Empty cells, blank strings and NaN all count as missing.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty() || s.trim().eq_ignore_ascii_case("nan"),
            Self::Number(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) if !v.is_nan() => Some(*v),
            Self::Text(s) => text::parse_number(s),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(v) if !v.is_nan() => Some(*v != 0.0),
            Self::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "t" | "1" | "x" => Some(true),
                "no" | "n" | "false" | "f" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::Text(s) => text::parse_datetime(s),
            _ => None,
        }
    }

    /// The cell rendered as text, with integral numbers printed without a fraction.
    pub fn display(&self) -> Option<String> {
        match self {
            _ if self.is_empty() => None,
            Self::Text(s) => Some(s.trim().to_string()),
            Self::Number(v) if v.fract() == 0.0 && v.abs() < 1e15 => Some(format!("{}", *v as i64)),
            Self::Number(v) => Some(v.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::DateTime(dt) => Some(dt.to_string()),
            Self::Empty => None,
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Int(v) => Cell::Number(*v as f64),
            Data::Float(v) => Cell::Number(*v),
            Data::String(s) => Cell::Text(s.clone()),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => dt.as_datetime().map_or(Cell::Empty, Cell::DateTime),
            Data::DateTimeIso(s) => text::parse_datetime(s).map_or_else(|| Cell::Text(s.clone()), Cell::DateTime),
            Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(_) | Data::Empty => Cell::Empty,
        }
    }
}

fn parse_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::DateTime(dt) => Some(dt.date()),
        Cell::Text(s) => ["%m/%d/%Y", "%d.%m.%Y", "%Y-%m-%d"]
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(s.trim(), fmt).ok()),
        _ => None,
    }
}

fn parse_time(cell: &Cell) -> Option<NaiveTime> {
    match cell {
        Cell::DateTime(dt) => Some(dt.time()),
        // Spreadsheet times are fractions of a day.
        Cell::Number(fraction) if (0.0..1.0).contains(fraction) => {
            let seconds = (fraction * 86_400.0).round() as i64;
            NaiveTime::from_hms_opt(0, 0, 0).map(|t| t + Duration::seconds(seconds))
        }
        Cell::Text(s) => ["%H:%M:%S%.f", "%I:%M:%S %p", "%H:%M"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(s.trim(), fmt).ok()),
        _ => None,
    }
}

/// Combines a date cell with an optional separate time cell. A date cell that already holds a
/// full timestamp is used as is unless a time cell overrides its clock.
pub fn date_time(date: &Cell, time: Option<&Cell>) -> Option<NaiveDateTime> {
    if let Cell::Text(s) = date {
        if let Some(dt) = text::parse_datetime(s) {
            return Some(dt);
        }
    }
    let day = parse_date(date)?;
    let clock = match (time.and_then(parse_time), date) {
        (Some(clock), _) => clock,
        (None, Cell::DateTime(dt)) => dt.time(),
        (None, _) => NaiveTime::from_hms_opt(0, 0, 0)?,
    };
    Some(day.and_time(clock))
}

/// A rectangular-ish grid of cells; rows may be ragged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<Cell>) -> Self {
        self.rows.push(row);
        self
    }

    /// Appends a row of text cells, parsing numbers.
    pub fn with_text_row(self, row: &[&str]) -> Self {
        self.with_row(row.iter().map(|v| Cell::parse(v)).collect())
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        const EMPTY: &Cell = &Cell::Empty;
        self.rows.get(row).and_then(|r| r.get(column)).unwrap_or(EMPTY)
    }

    pub fn set(&mut self, row: usize, column: usize, cell: Cell) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= column {
            cells.resize_with(column + 1, Cell::default);
        }
        cells[column] = cell;
    }

    /// Index of the first row whose first cell reads `label` (trimmed, exact).
    pub fn find_row(&self, label: &str) -> Option<usize> {
        (0..self.height()).find(|&r| self.cell(r, 0).as_str() == Some(label))
    }

    /// Header names of `row`, trimmed; empty cells become empty strings.
    pub fn header(&self, row: usize) -> Vec<String> {
        self.rows
            .get(row)
            .map(|cells| cells.iter().map(|c| c.display().unwrap_or_default()).collect())
            .unwrap_or_default()
    }

    /// Rows below `header_row` as header → cell maps. Fully empty rows are skipped.
    pub fn records(&self, header_row: usize) -> Vec<(usize, IndexMap<String, Cell>)> {
        let header = self.header(header_row);
        (header_row + 1..self.height())
            .filter(|&r| self.rows[r].iter().any(|c| !c.is_empty()))
            .map(|r| {
                let record = header
                    .iter()
                    .enumerate()
                    .filter(|(_, name)| !name.is_empty())
                    .map(|(k, name)| (name.clone(), self.cell(r, k).clone()))
                    .collect();
                (r, record)
            })
            .collect()
    }

    /// The column below `header_row` named `name`, as numbers with NaN for missing cells.
    pub fn numeric_column(&self, header_row: usize, name: &str) -> Option<Vec<f64>> {
        let k = self.header(header_row).iter().position(|h| h == name)?;
        Some(
            (header_row + 1..self.height())
                .map(|r| self.cell(r, k).as_f64().unwrap_or(f64::NAN))
                .collect(),
        )
    }

    /// Parses delimited text into a sheet; the separator is detected from the first line.
    pub fn from_delimited(name: &str, file: &str, content: &str) -> Result<Self, EchemError> {
        let first = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let separator = text::detect_separator(first);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(separator as u8)
            .from_reader(content.as_bytes());
        let mut sheet = Sheet::new(name);
        for record in reader.records() {
            let record = record.map_err(|e| EchemError::CsvError(file.to_string(), e))?;
            sheet.rows.push(record.iter().map(Cell::parse).collect());
        }
        Ok(sheet)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn with_sheet(mut self, sheet: Sheet) -> Self {
        self.sheets.push(sheet);
        self
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    /// First sheet whose name matches any of `names`, ignoring ASCII case.
    pub fn sheet_any(&self, names: &[&str]) -> Option<&Sheet> {
        self.sheets
            .iter()
            .find(|s| names.iter().any(|n| s.name.trim().eq_ignore_ascii_case(n)))
    }

    /// Reads every worksheet of an `.xlsx`/`.xls`/`.ods` file. Cells are placed at their
    /// absolute positions, so a sheet starting at `C3` keeps two empty leading rows.
    pub fn from_xlsx_bytes(file: &str, bytes: &[u8]) -> Result<Self, EchemError> {
        let mut source = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| EchemError::Workbook(file.to_string(), e.to_string()))?;
        let mut workbook = Workbook::default();
        for name in source.sheet_names() {
            let range = source
                .worksheet_range(&name)
                .map_err(|e| EchemError::Workbook(file.to_string(), e.to_string()))?;
            let mut sheet = Sheet::new(&name);
            if let Some((row0, col0)) = range.start() {
                sheet.rows.resize_with(row0 as usize, Vec::new);
                for row in range.rows() {
                    let mut cells = vec![Cell::Empty; col0 as usize];
                    cells.extend(row.iter().map(Cell::from));
                    sheet.rows.push(cells);
                }
            }
            workbook.sheets.push(sheet);
        }
        Ok(workbook)
    }

    /// Serializes the workbook to `.xlsx`. Timestamps are written as ISO text.
    pub fn to_xlsx_bytes(&self, file: &str) -> Result<Vec<u8>, EchemError> {
        let xlsx_err = |e: rust_xlsxwriter::XlsxError| EchemError::Workbook(file.to_string(), e.to_string());
        let mut out = XlsxWorkbook::new();
        for sheet in &self.sheets {
            let worksheet = out.add_worksheet();
            worksheet.set_name(&sheet.name).map_err(xlsx_err)?;
            for (r, row) in sheet.rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    let (r, c) = (r as u32, c as u16);
                    match cell {
                        Cell::Empty => {}
                        Cell::Text(s) => {
                            worksheet.write_string(r, c, s).map_err(xlsx_err)?;
                        }
                        Cell::Number(v) if v.is_nan() => {}
                        Cell::Number(v) => {
                            worksheet.write_number(r, c, *v).map_err(xlsx_err)?;
                        }
                        Cell::Bool(b) => {
                            worksheet.write_boolean(r, c, *b).map_err(xlsx_err)?;
                        }
                        Cell::DateTime(dt) => {
                            let iso = dt.format("%Y-%m-%d %H:%M:%S").to_string();
                            worksheet.write_string(r, c, &iso).map_err(xlsx_err)?;
                        }
                    }
                }
            }
        }
        out.save_to_buffer().map_err(xlsx_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_skip_blank_rows_and_headers() {
        let sheet = Sheet::new("samples")
            .with_text_row(&["lab_id", "", "area"])
            .with_text_row(&["", "", ""])
            .with_text_row(&["AbCd_230314_0001", "x", "0,5"]);
        let records = sheet.records(0);
        assert_eq!(records.len(), 1);
        let (row, record) = &records[0];
        assert_eq!(*row, 2);
        assert_eq!(record.len(), 2);
        assert_eq!(record["area"].as_f64(), Some(0.5));
    }

    #[test]
    fn test_set_grows_ragged_rows() {
        let mut sheet = Sheet::new("s");
        sheet.set(2, 3, Cell::text("id"));
        assert_eq!(sheet.height(), 3);
        assert_eq!(sheet.cell(2, 3).as_str(), Some("id"));
        assert!(sheet.cell(0, 0).is_empty());
        assert!(sheet.cell(10, 10).is_empty());
    }

    #[test]
    fn test_delimited_text() {
        let sheet = Sheet::from_delimited("data", "a.csv", "a;b\n1;x\n2;\n").unwrap();
        assert_eq!(sheet.numeric_column(0, "a").unwrap(), vec![1.0, 2.0]);
        assert!(sheet.cell(2, 1).is_empty());
    }

    #[test]
    fn test_display_integral_number() {
        assert_eq!(Cell::Number(3.0).display().as_deref(), Some("3"));
        assert_eq!(Cell::Number(0.25).display().as_deref(), Some("0.25"));
        assert_eq!(Cell::Number(f64::NAN).display(), None);
    }

    #[test]
    fn test_spreadsheet_time_fraction() {
        let date = Cell::DateTime(
            NaiveDate::from_ymd_opt(2023, 3, 14)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
        );
        let time = Cell::Number(0.5);
        assert_eq!(date_time(&date, Some(&time)).unwrap().to_string(), "2023-03-14 12:00:00");
        assert_eq!(
            date_time(&Cell::text("14.03.2023"), Some(&Cell::text("14:03:11"))).unwrap().to_string(),
            "2023-03-14 14:03:11"
        );
    }

    #[test]
    fn test_xlsx_round_trip() {
        let workbook = Workbook::default().with_sheet(
            Sheet::new("samples")
                .with_text_row(&["lab_id", "area"])
                .with_text_row(&["AbCd_230314_0001", "0.5"]),
        );
        let bytes = workbook.to_xlsx_bytes("batch.xlsx").unwrap();
        let back = Workbook::from_xlsx_bytes("batch.xlsx", &bytes).unwrap();
        let sheet = back.sheet("samples").unwrap();
        assert_eq!(sheet.cell(1, 0).as_str(), Some("AbCd_230314_0001"));
        assert_eq!(sheet.cell(1, 1).as_f64(), Some(0.5));
    }
}
