//! Batch import of samples, environments and setups from one user-authored workbook.
//!
//! Each sheet has a header row followed by one row per record. The first column holds the lab
//! id: a cell starting with the batch's base id edits that record, anything else creates a new
//! one under a freshly minted id. Rows are mapped onto records through the column tables below,
//! applied by [`apply_row`]. Unknown columns are ignored and empty or NaN cells become null.

use crate::{
    decoders::workbook::{Cell, Sheet, Workbook},
    error::EchemError,
    host::{Pagination, SearchQuery, UploadContext},
    ids, normalize,
    settings::IngestSettings,
};
use echem_schemas::{
    archive::{ArchiveFile, Record},
    environment::Environment,
    sample::{Sample, Substance, SynthesisStep},
    setup::Setup,
};
use indexmap::IndexMap;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};

pub const SAMPLES_SHEET: &str = "samples";
pub const ENVIRONMENTS_SHEET: &str = "environments";
pub const SETUPS_SHEET: &str = "setups";
const REQUIRED_COLUMN: &str = "name";

/// How a cell turns into a JSON value of the record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kind {
    Text,
    Number,
    /// A number with the unit read from a `<column>_unit` column, or this default.
    Quantity(&'static str),
    DateTime,
    /// Comma or semicolon separated text.
    TextList,
    /// The lab id of another record.
    Reference,
    ReferenceList,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub header: &'static str,
    pub path: &'static [&'static str],
    pub kind: Kind,
}

const fn column(header: &'static str, path: &'static [&'static str], kind: Kind) -> Column {
    Column { header, path, kind }
}

pub const SAMPLE_COLUMNS: &[Column] = &[
    column("name", &["name"], Kind::Text),
    column("datetime", &["datetime"], Kind::DateTime),
    column("owner", &["owner"], Kind::Text),
    column("institute", &["institute"], Kind::Text),
    column("chemical_formula", &["chemical_formulas"], Kind::TextList),
    column("substrate_type", &["substrate", "substrate_type"], Kind::Text),
    column("substrate_dimension", &["substrate", "dimension"], Kind::Text),
    column("active_area", &["active_area"], Kind::Quantity("cm^2")),
    column("producer", &["producer"], Kind::Text),
    column("origin", &["origin"], Kind::Text),
    column("description", &["description"], Kind::Text),
];

pub const ENVIRONMENT_COLUMNS: &[Column] = &[
    column("name", &["name"], Kind::Text),
    column("datetime", &["datetime"], Kind::DateTime),
    column("ph", &["ph"], Kind::Number),
    column("solvent", &["solvent"], Kind::Text),
    column("purging_gas", &["purging", "gas"], Kind::Text),
    column("purging_time", &["purging", "time"], Kind::Quantity("min")),
    column("purging_temperature", &["purging", "temperature"], Kind::Quantity("°C")),
    column("description", &["description"], Kind::Text),
];

pub const SETUP_COLUMNS: &[Column] = &[
    column("name", &["name"], Kind::Text),
    column("datetime", &["datetime"], Kind::DateTime),
    column("cell_geometry", &["cell_geometry"], Kind::Text),
    column("reference_electrode", &["reference_electrode"], Kind::Reference),
    column("counter_electrode", &["counter_electrode"], Kind::Reference),
    column("equipment", &["equipment"], Kind::ReferenceList),
    column("ir_compensation", &["ir_compensation"], Kind::Number),
    column("description", &["description"], Kind::Text),
];

/// Columns of one substance, read under the `substance_<n>_` prefix.
pub const SUBSTANCE_COLUMNS: &[Column] = &[
    column("name", &["name"], Kind::Text),
    column("formula", &["formula"], Kind::Text),
    column("concentration", &["concentration"], Kind::Quantity("mol/L")),
    column("amount", &["amount"], Kind::Quantity("g")),
];

/// Header cell → lookup key: trimmed, lower case, spaces as `_`.
pub fn column_key(header: &str) -> String {
    header.trim().to_ascii_lowercase().split_whitespace().collect::<Vec<_>>().join("_")
}

pub type Row = IndexMap<String, Cell>;

fn split_list(text: &str) -> Vec<&str> {
    text.split([',', ';']).map(str::trim).filter(|s| !s.is_empty()).collect()
}

fn cell_value(row: &Row, key: &str, kind: Kind) -> Value {
    let Some(cell) = row.get(key).filter(|c| !c.is_empty()) else {
        return Value::Null;
    };
    match kind {
        Kind::Text => cell.display().map_or(Value::Null, Value::String),
        Kind::Number => cell.as_f64().map_or(Value::Null, Value::from),
        Kind::Quantity(default_unit) => {
            let unit = row
                .get(&format!("{key}_unit"))
                .and_then(Cell::display)
                .unwrap_or_else(|| default_unit.to_string());
            cell.as_f64()
                .map_or(Value::Null, |v| json!({ "value": v, "unit": unit }))
        }
        Kind::DateTime => cell
            .as_datetime()
            .map_or(Value::Null, |dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string())),
        Kind::TextList => {
            let text = cell.display().unwrap_or_default();
            Value::from(split_list(&text))
        }
        Kind::Reference => cell.display().map_or(Value::Null, |id| json!({ "lab_id": id })),
        Kind::ReferenceList => {
            let text = cell.display().unwrap_or_default();
            Value::Array(split_list(&text).into_iter().map(|id| json!({ "lab_id": id })).collect())
        }
    }
}

/// Sets `path` inside `target`, creating intermediate objects only for non-null values.
fn set_path(target: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut node = target;
    for key in parents {
        node = match node {
            Value::Object(map) => {
                if value.is_null() && map.get(*key).map_or(true, Value::is_null) {
                    return;
                }
                let child = map.entry(key.to_string()).or_insert(Value::Null);
                if child.is_null() {
                    *child = Value::Object(Map::new());
                }
                child
            }
            _ => return,
        };
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), value);
    }
}

/// Applies the columns present in `row` (looked up as `{prefix}{header}`) onto `record`.
pub fn apply_row<T: Serialize + DeserializeOwned>(
    record: &T,
    columns: &[Column],
    row: &Row,
    prefix: &str,
) -> Result<T, EchemError> {
    let mut value = serde_json::to_value(record)?;
    for column in columns {
        let key = format!("{prefix}{}", column.header);
        if row.contains_key(&key) {
            set_path(&mut value, column.path, cell_value(row, &key, column.kind));
        }
    }
    serde_json::from_value(value).map_err(|e| EchemError::schema(prefix.trim_end_matches('_'), e.to_string()))
}

fn substance_count(header: &[String]) -> Result<usize, EchemError> {
    let pattern = r"^substance_(\d+)_";
    let re = Regex::new(pattern).map_err(|e| EchemError::Pattern(pattern.to_string(), e))?;
    Ok(header
        .iter()
        .filter_map(|h| re.captures(h)?.get(1)?.as_str().parse::<usize>().ok())
        .max()
        .unwrap_or(0))
}

/// The substances of a row; `None` when the sheet has no substance columns.
fn substances(row: &Row, count: usize) -> Result<Option<Vec<Substance>>, EchemError> {
    if count == 0 {
        return Ok(None);
    }
    let mut list = Vec::new();
    for n in 1..=count {
        let prefix = format!("substance_{n}_");
        let present = row
            .iter()
            .any(|(k, c)| k.starts_with(&prefix) && !k.ends_with("_unit") && !c.is_empty());
        if present {
            list.push(apply_row(&Substance::default(), SUBSTANCE_COLUMNS, row, &prefix)?);
        }
    }
    Ok(Some(list))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    Created,
    Edited,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedRow {
    pub sheet: String,
    pub row: usize,
    pub lab_id: String,
    pub action: RowAction,
}

pub struct BatchImporter<'a> {
    context: &'a dyn UploadContext,
    settings: &'a IngestSettings,
    base: String,
}

impl<'a> BatchImporter<'a> {
    /// `base` is the lab id root new records are minted under, e.g. `CE-NOME_AbCd_230314`.
    pub fn new(context: &'a dyn UploadContext, settings: &'a IngestSettings, base: &str) -> Self {
        Self {
            context,
            settings,
            base: base.trim().to_string(),
        }
    }

    /// Imports every row of the three sheets and writes the assigned lab ids into the first
    /// column. Stops at the first failing row.
    pub fn import(&self, workbook: &mut Workbook) -> Result<Vec<ImportedRow>, EchemError> {
        let mut imported = Vec::new();
        for name in [SAMPLES_SHEET, ENVIRONMENTS_SHEET, SETUPS_SHEET] {
            let Some(sheet) = workbook.sheet_mut(name) else {
                log::debug!("Batch workbook has no '{}' sheet", name);
                continue;
            };
            imported.extend(self.import_sheet(sheet)?);
        }
        Ok(imported)
    }

    /// Reads `file` from the upload, imports it and writes the updated workbook back.
    pub fn import_file(&self, file: &str) -> Result<Vec<ImportedRow>, EchemError> {
        let bytes = self.context.read_raw_file(file)?;
        let mut workbook = Workbook::from_xlsx_bytes(file, &bytes)?;
        let result = self.import(&mut workbook);
        // Ids assigned before a failure are still written back.
        self.context.write_raw_file(file, &workbook.to_xlsx_bytes(file)?)?;
        result
    }

    fn import_sheet(&self, sheet: &mut Sheet) -> Result<Vec<ImportedRow>, EchemError> {
        let header: Vec<String> = sheet.header(0).iter().map(|h| column_key(h)).collect();
        let count = substance_count(&header)?;
        let mut imported = Vec::new();
        for (index, cells) in sheet.records(0) {
            if self.context.is_cancelled() {
                return Err(EchemError::Cancelled);
            }
            let row: Row = cells.into_iter().map(|(k, v)| (column_key(&k), v)).collect();
            let first = sheet.cell(index, 0).display();
            match self.import_row(&sheet.name, index, first.as_deref(), &row, count) {
                Ok(done) => {
                    sheet.set(index, 0, Cell::text(&done.lab_id));
                    log::info!("Row {} of '{}': {:?} {}", index, sheet.name, done.action, done.lab_id);
                    imported.push(done);
                }
                Err(e) => {
                    log::error!("Row {} of '{}' failed: {}", index, sheet.name, e);
                    return Err(e);
                }
            }
        }
        Ok(imported)
    }

    fn import_row(
        &self,
        sheet: &str,
        index: usize,
        first: Option<&str>,
        row: &Row,
        substance_count: usize,
    ) -> Result<ImportedRow, EchemError> {
        let existing = match first.filter(|id| !self.base.is_empty() && id.starts_with(&self.base)) {
            Some(lab_id) => Some((lab_id.to_string(), self.find(lab_id)?)),
            None => None,
        };
        let stored = existing.as_ref().and_then(|(_, found)| found.clone());
        if stored.is_none() && row.get(REQUIRED_COLUMN).map_or(true, Cell::is_empty) {
            return Err(EchemError::UserInputMissing {
                sheet: sheet.to_string(),
                row: index,
                column: REQUIRED_COLUMN.to_string(),
            });
        }
        let lab_id = match &existing {
            Some((lab_id, _)) => lab_id.clone(),
            None => ids::mint(self.context, &self.base, self.settings.search_page_size)?,
        };

        let stored_record = stored.as_ref().map(|a| &a.data);
        let mut record = match sheet {
            SAMPLES_SHEET => {
                let base = match stored_record {
                    Some(Record::Sample(s)) => s.clone(),
                    _ => Sample::default(),
                };
                let mut sample = apply_row(&base, SAMPLE_COLUMNS, row, "")?;
                if let Some(list) = substances(row, substance_count)? {
                    let method = row.get("synthesis_method").and_then(Cell::display);
                    sample.synthesis = if list.is_empty() && method.is_none() {
                        Vec::new()
                    } else {
                        vec![SynthesisStep {
                            method,
                            description: None,
                            substances: list,
                        }]
                    };
                }
                sample.lab_id = Some(lab_id.clone());
                Record::Sample(sample)
            }
            ENVIRONMENTS_SHEET => {
                let base = match stored_record {
                    Some(Record::Environment(e)) => e.clone(),
                    _ => Environment::default(),
                };
                let mut environment = apply_row(&base, ENVIRONMENT_COLUMNS, row, "")?;
                if let Some(list) = substances(row, substance_count)? {
                    environment.substances = list;
                }
                environment.lab_id = Some(lab_id.clone());
                Record::Environment(environment)
            }
            _ => {
                let base = match stored_record {
                    Some(Record::Setup(s)) => s.clone(),
                    _ => Setup::default(),
                };
                let mut setup = apply_row(&base, SETUP_COLUMNS, row, "")?;
                setup.lab_id = Some(lab_id.clone());
                Record::Setup(setup)
            }
        };
        if let Record::Sample(sample) = &mut record {
            if sample.institute.is_none() {
                sample.institute.clone_from(&self.settings.institute);
            }
        }

        let name = stored
            .as_ref()
            .map_or_else(|| format!("{lab_id}.archive.json"), |a| a.metadata.entry_name.clone());
        let mut archive = ArchiveFile::new(&name, record);
        normalize::index(&mut archive, self.context.upload_id());
        self.context.write_archive(&name, &archive, true)?;
        Ok(ImportedRow {
            sheet: sheet.to_string(),
            row: index,
            lab_id,
            action: if stored.is_some() { RowAction::Edited } else { RowAction::Created },
        })
    }

    /// The stored archive carrying `lab_id` in this upload.
    fn find(&self, lab_id: &str) -> Result<Option<ArchiveFile>, EchemError> {
        let query = SearchQuery::by_lab_id(lab_id).within_upload(self.context.upload_id());
        let hits = self.context.search(&query, &Pagination::first(1))?;
        match hits.first() {
            Some(hit) => self.context.read_archive(&hit.entry_name),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryUpload;
    use echem_schemas::Quantity;

    fn row(pairs: &[(&str, Cell)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_apply_row_maps_and_nulls() {
        let base = Sample {
            description: Some("old".to_string()),
            ..Sample::default()
        };
        let r = row(&[
            ("name", Cell::text("Pellet")),
            ("active_area", Cell::Number(0.5)),
            ("substrate_type", Cell::text("FTO")),
            ("chemical_formula", Cell::text("NiO; Fe2O3")),
            ("description", Cell::Number(f64::NAN)),
            ("colour", Cell::text("green")),
        ]);
        let sample = apply_row(&base, SAMPLE_COLUMNS, &r, "").unwrap();
        assert_eq!(sample.name.as_deref(), Some("Pellet"));
        assert_eq!(sample.active_area, Some(Quantity::new(0.5, "cm^2")));
        assert_eq!(sample.substrate.unwrap().substrate_type.as_deref(), Some("FTO"));
        assert_eq!(sample.chemical_formulas, vec!["NiO", "Fe2O3"]);
        assert_eq!(sample.description, None);
    }

    #[test]
    fn test_quantity_unit_column_and_empty_parent() {
        let r = row(&[
            ("purging_time", Cell::Number(30.0)),
            ("purging_time_unit", Cell::text("s")),
        ]);
        let env = apply_row(&Environment::default(), ENVIRONMENT_COLUMNS, &r, "").unwrap();
        assert_eq!(env.purging.unwrap().time, Some(Quantity::new(30.0, "s")));

        let r = row(&[("purging_gas", Cell::Empty)]);
        let env = apply_row(&Environment::default(), ENVIRONMENT_COLUMNS, &r, "").unwrap();
        assert!(env.purging.is_none());
    }

    #[test]
    fn test_substance_columns_are_counted() {
        let header: Vec<String> = ["name", "substance_1_name", "substance_3_formula", "substance_x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(substance_count(&header).unwrap(), 3);
        assert_eq!(column_key(" Substance 2  Name "), "substance_2_name");
    }

    fn workbook() -> Workbook {
        Workbook::default()
            .with_sheet(
                Sheet::new(SAMPLES_SHEET)
                    .with_text_row(&["lab_id", "Name", "owner", "substance_1_name", "substance_1_formula", "synthesis_method"])
                    .with_text_row(&["", "Film A", "AbCd", "nickel nitrate", "Ni(NO3)2", "spin coating"])
                    .with_text_row(&["", "Film B", "AbCd", "", "", ""]),
            )
            .with_sheet(
                Sheet::new(ENVIRONMENTS_SHEET)
                    .with_text_row(&["lab_id", "name", "ph", "substance_1_name", "substance_1_concentration"])
                    .with_text_row(&["", "1 M KOH", "14", "potassium hydroxide", "1"]),
            )
            .with_sheet(
                Sheet::new(SETUPS_SHEET)
                    .with_text_row(&["lab_id", "name", "reference_electrode"])
                    .with_text_row(&["", "H-cell", "CE-NOME_AbCd_230314_0000"]),
            )
    }

    #[test]
    fn test_import_creates_and_writes_back_ids() {
        let upload = InMemoryUpload::new("up1");
        let settings = IngestSettings::default();
        let importer = BatchImporter::new(&upload, &settings, "CE-NOME_AbCd_230314");
        let mut book = workbook();
        let rows = importer.import(&mut book).unwrap();

        let ids: Vec<&str> = rows.iter().map(|r| r.lab_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "CE-NOME_AbCd_230314_0000",
                "CE-NOME_AbCd_230314_0001",
                "CE-NOME_AbCd_230314_0002",
                "CE-NOME_AbCd_230314_0003"
            ]
        );
        let samples = book.sheet(SAMPLES_SHEET).unwrap();
        assert_eq!(samples.cell(2, 0).as_str(), Some("CE-NOME_AbCd_230314_0001"));

        let Some(Record::Sample(a)) = upload.archive("CE-NOME_AbCd_230314_0000.archive.json").map(|a| a.data) else {
            panic!("sample not written")
        };
        assert_eq!(a.synthesis[0].method.as_deref(), Some("spin coating"));
        assert_eq!(a.synthesis[0].substances[0].formula.as_deref(), Some("Ni(NO3)2"));
        let Some(Record::Sample(b)) = upload.archive("CE-NOME_AbCd_230314_0001.archive.json").map(|a| a.data) else {
            panic!("sample not written")
        };
        assert!(b.synthesis.is_empty());

        let Some(Record::Environment(env)) = upload.archive("CE-NOME_AbCd_230314_0002.archive.json").map(|a| a.data)
        else {
            panic!("environment not written")
        };
        assert_eq!(env.ph, Some(14.0));
        assert_eq!(env.substances[0].concentration, Some(Quantity::new(1.0, "mol/L")));
        assert!(rows.iter().all(|r| r.action == RowAction::Created));
    }

    #[test]
    fn test_second_import_edits_in_place() {
        let upload = InMemoryUpload::new("up1");
        let settings = IngestSettings::default();
        let importer = BatchImporter::new(&upload, &settings, "CE-NOME_AbCd_230314");
        let mut book = workbook();
        importer.import(&mut book).unwrap();

        book.sheet_mut(SAMPLES_SHEET).unwrap().set(1, 1, Cell::text("Film A2"));
        let rows = importer.import(&mut book).unwrap();
        assert!(rows.iter().all(|r| r.action == RowAction::Edited));
        assert_eq!(upload.archive_names().len(), 4);
        let Some(Record::Sample(a)) = upload.archive("CE-NOME_AbCd_230314_0000.archive.json").map(|a| a.data) else {
            panic!("sample missing")
        };
        assert_eq!(a.name.as_deref(), Some("Film A2"));
    }

    #[test]
    fn test_missing_name_aborts_batch() {
        let upload = InMemoryUpload::new("up1");
        let settings = IngestSettings::default();
        let importer = BatchImporter::new(&upload, &settings, "CE-NOME_AbCd_230314");
        let mut book = Workbook::default().with_sheet(
            Sheet::new(SAMPLES_SHEET)
                .with_text_row(&["lab_id", "name", "owner"])
                .with_text_row(&["", "ok", "AbCd"])
                .with_text_row(&["", "", "AbCd"])
                .with_text_row(&["", "never", "AbCd"]),
        );
        let err = importer.import(&mut book).unwrap_err();
        assert!(matches!(err, EchemError::UserInputMissing { row: 2, .. }));
        assert_eq!(upload.archive_names().len(), 1);
    }
}
