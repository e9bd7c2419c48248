//! Byte-level readers for every supported instrument format.
//!
//! A decoder turns one raw file into a [`Decoded`] dictionary and nothing more: no typed
//! records, no units attached to records, no side effects besides reading its input slice.
//! Decoders are looked up through the [`DecoderRegistry`] so callers only pay for the
//! formats they actually touch.

pub mod biologic_mpr;
pub mod biologic_mpt;
pub mod chi;
pub mod corrware;
pub mod gamry;
pub mod mass_spec;
pub mod necc;
pub mod palmsens;
pub mod sputtering;
pub mod tabular;
pub mod tdms;
pub mod text;
pub mod tiff;
pub mod uvvis;
pub mod workbook;
pub mod xas;
pub mod xy;
pub mod zahner;

use crate::error::EchemError;
use chrono::NaiveDateTime;
use indexmap::IndexMap;

/// A single metadata value as the instrument wrote it.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Number(f64),
    Int(i64),
    Bool(bool),
    DateTime(NaiveDateTime),
    /// Gamry `ONEPARAM`: an optional setting with an enable flag.
    Param { enabled: bool, value: f64 },
    /// Gamry `TWOPARAM`.
    Range { enabled: bool, start: f64, finish: f64 },
    /// Free text spanning several lines.
    Lines(Vec<String>),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Param { value, .. } => Some(*value),
            Self::Text(s) => text::parse_number(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Param { enabled, .. } | Self::Range { enabled, .. } => Some(*enabled),
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

    /// The value rendered as text, for free-form string attributes.
    pub fn display(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::DateTime(dt) => dt.to_string(),
            Self::Param { value, .. } => value.to_string(),
            Self::Range { start, finish, .. } => format!("{start} - {finish}"),
            Self::Lines(lines) => lines.join("\n"),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::Text(s) => json!(s),
            Self::Number(v) => json!(v),
            Self::Int(v) => json!(v),
            Self::Bool(b) => json!(b),
            Self::DateTime(dt) => json!(dt.to_string()),
            Self::Param { enabled, value } => json!({ "enabled": enabled, "value": value }),
            Self::Range {
                enabled,
                start,
                finish,
            } => json!({ "enabled": enabled, "start": start, "finish": finish }),
            Self::Lines(lines) => json!(lines.join("\n")),
        }
    }
}

/// One data column. Missing numeric cells are NaN.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numbers(Vec<f64>),
    Text(Vec<String>),
    Timestamps(Vec<Option<NaiveDateTime>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Numbers(v) => v.len(),
            Self::Text(v) => v.len(),
            Self::Timestamps(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn numbers(&self) -> Option<&[f64]> {
        match self {
            Self::Numbers(v) => Some(v),
            _ => None,
        }
    }

    pub fn timestamps(&self) -> Option<&[Option<NaiveDateTime>]> {
        match self {
            Self::Timestamps(v) => Some(v),
            _ => None,
        }
    }

    pub fn texts(&self) -> Option<&[String]> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Keeps the rows whose index is listed in `rows`.
    pub fn select(&self, rows: &[usize]) -> Column {
        match self {
            Self::Numbers(v) => Self::Numbers(rows.iter().filter_map(|&i| v.get(i).copied()).collect()),
            Self::Text(v) => Self::Text(rows.iter().filter_map(|&i| v.get(i).cloned()).collect()),
            Self::Timestamps(v) => {
                Self::Timestamps(rows.iter().filter_map(|&i| v.get(i).copied()).collect())
            }
        }
    }
}

/// A named table of equally long columns, optionally tied to one method of a chain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub name: String,
    pub method: Option<String>,
    pub columns: IndexMap<String, Column>,
    pub units: IndexMap<String, String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, name: &str, unit: Option<&str>, column: Column) {
        if let Some(unit) = unit {
            self.units.insert(name.to_string(), unit.to_string());
        }
        self.columns.insert(name.to_string(), column);
    }

    pub fn len(&self) -> usize {
        self.columns.values().map(Column::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn numbers(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).and_then(Column::numbers)
    }

    pub fn unit(&self, name: &str) -> Option<&str> {
        self.units.get(name).map(String::as_str)
    }

    /// The first of `aliases` that exists as a numeric column holding at least one value.
    pub fn first_numbers(&self, aliases: &[&str]) -> Option<(&str, &[f64])> {
        aliases.iter().find_map(|alias| {
            let (name, column) = self.columns.get_key_value(*alias)?;
            let values = column.numbers()?;
            values
                .iter()
                .any(|v| !v.is_nan())
                .then_some((name.as_str(), values))
        })
    }

    /// The table restricted to the listed rows.
    pub fn select(&self, rows: &[usize]) -> Table {
        Table {
            name: self.name.clone(),
            method: self.method.clone(),
            columns: self
                .columns
                .iter()
                .map(|(k, c)| (k.clone(), c.select(rows)))
                .collect(),
            units: self.units.clone(),
        }
    }

    /// Appends the rows of `other` for every column both tables share.
    pub fn extend(&mut self, other: &Table) {
        for (name, column) in self.columns.iter_mut() {
            match (column, other.columns.get(name)) {
                (Column::Numbers(a), Some(Column::Numbers(b))) => a.extend_from_slice(b),
                (Column::Text(a), Some(Column::Text(b))) => a.extend(b.iter().cloned()),
                (Column::Timestamps(a), Some(Column::Timestamps(b))) => a.extend_from_slice(b),
                _ => {}
            }
        }
    }
}

/// A slice of an acquisition with its own metadata, e.g. one EIS frequency sweep or one gas of
/// a GC worksheet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segment {
    pub metadata: IndexMap<String, Scalar>,
    pub data: Table,
}

/// The neutral dictionary every decoder produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub format: DecoderKind,
    /// Technique code, e.g. `CV` or `PEIS`; `None` for a generic dictionary.
    pub technique: Option<String>,
    /// Method chain of a multi-method file, in file order.
    pub methods: Vec<String>,
    pub metadata: IndexMap<String, Scalar>,
    /// Per-sequence parameter blocks.
    pub parameters: Vec<IndexMap<String, Scalar>>,
    pub tables: Vec<Table>,
    pub segments: Vec<Segment>,
}

impl Decoded {
    pub fn new(format: DecoderKind) -> Self {
        Self {
            format,
            technique: None,
            methods: Vec::new(),
            metadata: IndexMap::new(),
            parameters: Vec::new(),
            tables: Vec::new(),
            segments: Vec::new(),
        }
    }

    pub fn meta(&self, key: &str) -> Option<&Scalar> {
        self.metadata.get(key)
    }

    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Scalar::as_f64)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Scalar::as_str)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Start of the acquisition, under whichever key the decoder stored it.
    pub fn start_datetime(&self) -> Option<NaiveDateTime> {
        self.metadata.get("datetime").and_then(Scalar::as_datetime)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    Gamry,
    BiologicMpr,
    BiologicMpt,
    CorrWare,
    Chi,
    Zahner,
    PalmSens,
    NeccWorkbook,
    Tdms,
    XasKmc2,
    MassSpec,
    UvVis,
    PumpRate,
    PhaseFluorometry,
    Sputtering,
    XySpectrum,
    Tiff,
}

pub type DecodeFn = fn(&str, &[u8]) -> Result<Decoded, EchemError>;

/// Maps decoder kinds to their entry points.
pub struct DecoderRegistry {
    decoders: IndexMap<DecoderKind, DecodeFn>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl DecoderRegistry {
    pub fn empty() -> Self {
        Self {
            decoders: IndexMap::new(),
        }
    }

    /// A registry with every built-in decoder.
    pub fn standard() -> Self {
        Self::empty()
            .with(DecoderKind::Gamry, gamry::decode)
            .with(DecoderKind::BiologicMpr, biologic_mpr::decode)
            .with(DecoderKind::BiologicMpt, biologic_mpt::decode)
            .with(DecoderKind::CorrWare, corrware::decode)
            .with(DecoderKind::Chi, chi::decode)
            .with(DecoderKind::Zahner, zahner::decode)
            .with(DecoderKind::PalmSens, palmsens::decode)
            .with(DecoderKind::NeccWorkbook, necc::decode)
            .with(DecoderKind::Tdms, tdms::decode)
            .with(DecoderKind::XasKmc2, xas::decode)
            .with(DecoderKind::MassSpec, mass_spec::decode)
            .with(DecoderKind::UvVis, uvvis::decode)
            .with(DecoderKind::PumpRate, tabular::decode_pump_rate)
            .with(DecoderKind::PhaseFluorometry, tabular::decode_phase_fluorometry)
            .with(DecoderKind::Sputtering, sputtering::decode)
            .with(DecoderKind::XySpectrum, xy::decode)
            .with(DecoderKind::Tiff, tiff::decode)
    }

    pub fn with(mut self, kind: DecoderKind, decoder: DecodeFn) -> Self {
        self.decoders.insert(kind, decoder);
        self
    }

    pub fn decode(&self, kind: DecoderKind, file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
        let decoder = self
            .decoders
            .get(&kind)
            .ok_or_else(|| EchemError::decode(file, format!("no decoder registered for {kind:?}")))?;
        log::debug!("Decoding '{}' with the {:?} decoder", file, kind);
        decoder(file, bytes)
    }
}
