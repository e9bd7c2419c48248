use crate::{
    analysis::AnalysisResult,
    environment::Environment,
    measurement::Measurement,
    reference::EntityReference,
    sample::Sample,
    setup::{Recipe, Setup},
};
use serde::{Deserialize, Serialize};

/// Bookkeeping record the dispatcher emits for every upload it handles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedFile {
    /// The record created from the upload; `None` when dispatching failed.
    pub activity: Option<EntityReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "m_def")]
pub enum Record {
    Sample(Sample),
    Environment(Environment),
    Setup(Setup),
    Recipe(Recipe),
    Measurement(Measurement),
    Analysis(AnalysisResult),
    ParsedFile(ParsedFile),
}

impl Record {
    pub fn entry_type(&self) -> &'static str {
        match self {
            Self::Sample(_) => "Sample",
            Self::Environment(_) => "Environment",
            Self::Setup(_) => "Setup",
            Self::Recipe(_) => "Recipe",
            Self::Measurement(m) => m.details.variant_name(),
            Self::Analysis(_) => "AnalysisResult",
            Self::ParsedFile(_) => "ParsedFile",
        }
    }

    pub fn lab_id(&self) -> Option<&str> {
        match self {
            Self::Sample(s) => s.lab_id.as_deref(),
            Self::Environment(e) => e.lab_id.as_deref(),
            Self::Setup(s) => s.lab_id.as_deref(),
            Self::Recipe(r) => r.lab_id.as_deref(),
            Self::Measurement(m) => m.header.lab_id.as_deref(),
            Self::Analysis(a) => a.lab_id.as_deref(),
            Self::ParsedFile(_) => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Sample(s) => s.name.as_deref(),
            Self::Environment(e) => e.name.as_deref(),
            Self::Setup(s) => s.name.as_deref(),
            Self::Recipe(r) => r.name.as_deref(),
            Self::Measurement(m) => m.header.name.as_deref(),
            Self::Analysis(a) => a.name.as_deref(),
            Self::ParsedFile(_) => None,
        }
    }

    pub fn is_entity(&self) -> bool {
        matches!(
            self,
            Self::Sample(_) | Self::Environment(_) | Self::Setup(_) | Self::Recipe(_)
        )
    }
}

/// Search-indexable metadata the host stores next to every record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub entry_name: String,
    #[serde(default)]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub lab_ids: Vec<String>,
    /// The lab id without its four-digit suffix; used to allocate project sample numbers.
    #[serde(default)]
    pub lab_id_root: Option<String>,
    #[serde(default)]
    pub elements: Vec<String>,
}

/// The on-disk shape of an `*.archive.json` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveFile {
    pub data: Record,
    pub metadata: ArchiveMetadata,
}

impl ArchiveFile {
    pub fn new(entry_name: impl Into<String>, data: Record) -> Self {
        let metadata = ArchiveMetadata {
            entry_name: entry_name.into(),
            entry_type: Some(data.entry_type().to_string()),
            ..ArchiveMetadata::default()
        };
        Self { data, metadata }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        measurement::MeasurementKind,
        voltammetry::{CvProperties, Voltammetry},
    };

    #[test]
    fn test_archive_json_round_trip_keeps_variant_tag() {
        let measurement = Measurement::from_file(
            "CV.DTA",
            MeasurementKind::CyclicVoltammetry(Voltammetry::<CvProperties>::default()),
        );
        let archive = ArchiveFile::new("CV.archive.json", Record::Measurement(measurement));
        let json = archive.to_json().unwrap();
        assert!(json.contains("\"m_def\": \"Measurement\""));
        assert!(json.contains("\"variant\": \"CyclicVoltammetry\""));

        let back = ArchiveFile::from_json(&json).unwrap();
        assert_eq!(back, archive);
        assert_eq!(back.data.entry_type(), "CyclicVoltammetry");
    }
}
