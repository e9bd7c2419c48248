use anyhow::{Context, Result};
use chrono::NaiveDate;
use echem_core::{
    batch::{BatchImporter, ImportedRow},
    dispatch::DispatchOutcome,
    ids,
    report::IngestReport,
    Dispatcher, Normalizer,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::IngestConfig;
use crate::plotting;

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub files: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub archives: usize,
    pub normalized: usize,
    pub plots: Vec<PathBuf>,
}

impl IngestSummary {
    fn count(&mut self, outcome: &DispatchOutcome) {
        self.files += 1;
        self.archives += outcome.archives.len();
        *self.by_status.entry(outcome.status.as_str()).or_default() += 1;
    }

    pub fn status(&self, status: &str) -> usize {
        self.by_status.get(status).copied().unwrap_or(0)
    }
}

/// Dispatches every raw file of the upload, logs each outcome to the CSV report,
/// normalizes the resulting archives and renders their figures.
pub fn ingest(config: &IngestConfig) -> Result<IngestSummary> {
    log::info!("--- [Workflow] Ingesting upload '{}' ---", config.upload_id);
    let upload = config.open_upload()?;
    let dispatcher = Dispatcher::standard(config.settings.clone())?;

    let outcomes = dispatcher
        .dispatch_upload(&upload)
        .context("Dispatching the upload failed")?;

    if let Some(parent) = config.report_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut report = IngestReport::new(&config.report_path.to_string_lossy())
        .with_context(|| format!("Failed to create report {:?}", config.report_path))?;
    let mut summary = IngestSummary::default();
    for outcome in &outcomes {
        report.log_outcome(outcome)?;
        summary.count(outcome);
    }

    log::info!("--- [Workflow] Normalizing archives ---");
    summary.normalized = Normalizer::new(&upload, &dispatcher)
        .normalize_upload()
        .context("Normalizing the upload failed")?;

    if let Some(dir) = &config.plot_dir {
        summary.plots = plotting::plot_upload(&upload, dir)?;
    }

    print_summary(config, &summary);
    Ok(summary)
}

/// Re-runs normalization over every archive of the upload.
pub fn normalize(config: &IngestConfig) -> Result<usize> {
    let upload = config.open_upload()?;
    let dispatcher = Dispatcher::standard(config.settings.clone())?;
    let changed = Normalizer::new(&upload, &dispatcher).normalize_upload()?;
    log::info!("{} archives changed", changed);
    Ok(changed)
}

/// Imports a batch workbook stored in the upload and writes the assigned ids back into it.
pub fn import_batch(config: &IngestConfig, file: &str, base: &str) -> Result<Vec<ImportedRow>> {
    let upload = config.open_upload()?;
    let rows = BatchImporter::new(&upload, &config.settings, base)
        .import_file(file)
        .with_context(|| format!("Batch import of '{}' failed", file))?;
    log::info!("Imported {} rows from '{}'", rows.len(), file);
    Ok(rows)
}

/// The next free sample id for `owner` on `date`. Nothing is written.
pub fn mint_id(
    config: &IngestConfig,
    owner: &str,
    date: NaiveDate,
    institute: Option<&str>,
) -> Result<String> {
    let upload = config.open_upload()?;
    let institute = institute.or(config.settings.institute.as_deref());
    let root = ids::sample_root(institute, owner, date);
    Ok(ids::mint(&upload, &root, config.settings.search_page_size)?)
}

fn print_summary(config: &IngestConfig, summary: &IngestSummary) {
    println!("\n--- [Ingest Summary] ---");
    println!("========================================");
    println!("Upload: {} ({:?})", config.upload_id, config.upload_dir);
    println!("Files processed: {}", summary.files);
    for (status, count) in &summary.by_status {
        println!("  - {}: {}", status, count);
    }
    println!("Archives produced or kept: {}", summary.archives);
    println!("Archives changed by normalization: {}", summary.normalized);
    println!("Figures rendered: {}", summary.plots.len());
    println!("Report: {:?}", config.report_path);
    println!("========================================");
}
