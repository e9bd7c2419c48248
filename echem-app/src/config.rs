use anyhow::{Context, Result};
use echem_core::{host::RecordHeader, IngestSettings};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::fs_host::{self, FsUpload};

/// Everything a command line run needs: where the upload lives, who owns it and where
/// the run writes its report, plots and log.
/// Stored as YAML; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub upload_dir: PathBuf,
    pub upload_id: String,
    pub main_author: Option<String>,
    pub user: Option<String>,
    /// Roots of other uploads whose records may be referenced by lab id.
    pub index_dirs: Vec<PathBuf>,
    pub report_path: PathBuf,
    pub plot_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    pub settings: IngestSettings,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("upload"),
            upload_id: String::from("local"),
            main_author: None,
            user: None,
            index_dirs: Vec::new(),
            report_path: PathBuf::from("ingest_report.csv"),
            plot_dir: Some(PathBuf::from("plots")),
            log_file: None,
            log_level: String::from("info"),
            settings: IngestSettings::default(),
        }
    }
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_yaml::from_str(&text).with_context(|| format!("Failed to parse YAML from {:?}", path))
    }

    /// Writes the default configuration as a starting point for editing.
    pub fn write_template(path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(&Self::default())?;
        fs::write(path, yaml).with_context(|| format!("Failed to write template to {:?}", path))
    }

    /// Opens the configured upload with the foreign record index attached.
    pub fn open_upload(&self) -> Result<FsUpload> {
        fs::create_dir_all(&self.upload_dir)
            .with_context(|| format!("Failed to create upload directory {:?}", self.upload_dir))?;
        let index = load_index(&self.index_dirs)?;
        log::info!(
            "Opened upload '{}' at {:?} ({} indexed records from other uploads)",
            self.upload_id,
            self.upload_dir,
            index.len()
        );
        Ok(FsUpload::new(&self.upload_dir, &self.upload_id)
            .with_author(self.main_author.clone(), self.user.clone())
            .with_index(index))
    }
}

/// Builds search headers for every archive found in the given upload roots.
/// Each root's directory name is its upload id.
pub fn load_index(dirs: &[PathBuf]) -> Result<Vec<RecordHeader>> {
    let mut headers = Vec::new();
    for dir in dirs {
        let upload_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Index directory {:?} has no name", dir))?;
        let found = fs_host::upload_headers(&upload_id, dir)
            .with_context(|| format!("Failed to index upload {:?}", dir))?;
        log::debug!("Indexed {} records from {:?}", found.len(), dir);
        headers.extend(found);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        IngestConfig::write_template(&path).unwrap();
        assert_eq!(IngestConfig::load(&path).unwrap(), IngestConfig::default());
    }

    #[test]
    fn test_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "upload_id: run-7\nsettings:\n  institute: CE-NOME\n").unwrap();
        let config = IngestConfig::load(&path).unwrap();
        assert_eq!(config.upload_id, "run-7");
        assert_eq!(config.settings.institute.as_deref(), Some("CE-NOME"));
        assert_eq!(config.settings.search_page_size, 9999);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_config_names_path() {
        let err = IngestConfig::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(format!("{:#}", err).contains("config.yaml"));
    }
}
