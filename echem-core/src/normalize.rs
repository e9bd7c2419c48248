//! The per-record normalizer the host runs whenever a record is saved or opened.
//!
//! Raw-derived fields are rebuilt only when the raw file name or content changed, tracked by
//! [`raw_digest`]. Fields a user may have entered are carried over from the stored record, and
//! everything that depends on them is recomputed by [`builders::derive`]. Running the
//! normalizer twice on the same inputs leaves the record unchanged.

use crate::{
    analysis, builders,
    decoders::tiff,
    dispatch::{Candidate, Dispatcher},
    error::EchemError,
    formula,
    host::{SearchQuery, UploadContext},
    ids,
    settings::IngestSettings,
};
use echem_schemas::{
    analysis::AnalysisResult,
    archive::{ArchiveFile, Record},
    measurement::{Measurement, MeasurementHeader, MeasurementKind},
    reference::EntityReference,
    sample::Sample,
    setup::Setup,
    voltammetry::Voltammetry,
    Quantity,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const PREPARATIONS_PREFIX: &str = "list_of_sample_preparations_";

/// SHA-256 over the raw file name and its content, hex encoded.
pub fn raw_digest(name: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Refreshes the search-indexable metadata of an archive: type, upload, lab ids, the lab id
/// root and the elements of any formulas the record carries.
pub fn index(archive: &mut ArchiveFile, upload_id: &str) {
    let lab_id = archive.data.lab_id().map(str::to_string);
    let elements = match &archive.data {
        Record::Sample(sample) => formula::elements(sample.all_formulas()),
        Record::Environment(environment) => {
            formula::elements(environment.substances.iter().filter_map(|s| s.formula.as_deref()))
        }
        _ => Vec::new(),
    };
    let metadata = &mut archive.metadata;
    metadata.entry_type = Some(archive.data.entry_type().to_string());
    metadata.upload_id = Some(upload_id.to_string());
    metadata.lab_id_root = lab_id.as_deref().and_then(ids::root_of);
    metadata.lab_ids = lab_id.into_iter().collect();
    metadata.elements = elements;
}

/// Writes the PNG preview of a TIFF record next to its raw file.
pub fn write_previews(context: &dyn UploadContext, measurement: &Measurement, bytes: &[u8]) {
    let MeasurementKind::TifImage(image) = &measurement.details else {
        return;
    };
    let (Some(source), Some(preview)) = (&measurement.header.data_file, &image.preview_file) else {
        return;
    };
    let written = tiff::png_preview(source, bytes).and_then(|png| context.write_raw_file(preview, &png));
    if let Err(e) = written {
        log::warn!("No preview for '{}': {}", source, e);
    }
}

#[derive(Serialize)]
struct PreparationRow<'a> {
    step: usize,
    method: Option<&'a str>,
    description: Option<&'a str>,
    substance: Option<&'a str>,
    formula: Option<&'a str>,
    concentration: Option<f64>,
    concentration_unit: Option<&'a str>,
    amount: Option<f64>,
    amount_unit: Option<&'a str>,
}

/// One row per substance of every synthesis step; steps without substances get one row.
pub fn preparations_csv(name: &str, sample: &Sample) -> Result<Vec<u8>, EchemError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for (i, step) in sample.synthesis.iter().enumerate() {
        let base = PreparationRow {
            step: i + 1,
            method: step.method.as_deref(),
            description: step.description.as_deref(),
            substance: None,
            formula: None,
            concentration: None,
            concentration_unit: None,
            amount: None,
            amount_unit: None,
        };
        if step.substances.is_empty() {
            writer
                .serialize(base)
                .map_err(|e| EchemError::CsvError(name.to_string(), e))?;
            continue;
        }
        for substance in &step.substances {
            let row = PreparationRow {
                substance: substance.name.as_deref(),
                formula: substance.formula.as_deref(),
                concentration: substance.concentration.as_ref().map(|q| q.value),
                concentration_unit: substance.concentration.as_ref().map(|q| q.unit.as_str()),
                amount: substance.amount.as_ref().map(|q| q.value),
                amount_unit: substance.amount.as_ref().map(|q| q.unit.as_str()),
                ..base
            };
            writer
                .serialize(row)
                .map_err(|e| EchemError::CsvError(name.to_string(), e))?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| EchemError::UploadIO(name.to_string(), e.into_error()))
}

fn keep<T: Clone>(fresh: &mut Option<T>, old: &Option<T>) {
    if old.is_some() {
        fresh.clone_from(old);
    }
}

/// Takes `old` only where the rebuilt record has nothing.
fn fill<T: Clone>(fresh: &mut Option<T>, old: &Option<T>) {
    if fresh.is_none() {
        fresh.clone_from(old);
    }
}

/// File-derived header fields (start time, station, atmosphere) follow the rebuilt record
/// and only fall back to the old values when the file no longer states them.
fn keep_header(fresh: &mut MeasurementHeader, old: &MeasurementHeader) {
    keep(&mut fresh.name, &old.name);
    keep(&mut fresh.lab_id, &old.lab_id);
    keep(&mut fresh.method_position, &old.method_position);
    keep(&mut fresh.description, &old.description);
    keep(&mut fresh.environment, &old.environment);
    keep(&mut fresh.setup, &old.setup);
    keep(&mut fresh.function, &old.function);
    fill(&mut fresh.datetime, &old.datetime);
    fill(&mut fresh.station, &old.station);
    if !old.samples.is_empty() {
        fresh.samples.clone_from(&old.samples);
    }
    if !old.connected_experiments.is_empty() {
        fresh.connected_experiments.clone_from(&old.connected_experiments);
    }
    if fresh.atmosphere.is_empty() {
        fresh.atmosphere.clone_from(&old.atmosphere);
    }
}

fn keep_dc_inputs<P>(fresh: &mut Voltammetry<P>, old: &Voltammetry<P>) {
    keep(&mut fresh.sample_area, &old.sample_area);
    keep(&mut fresh.voltage_shift, &old.voltage_shift);
    keep(&mut fresh.resistance, &old.resistance);
}

/// Carries user-entered values of `old` into a freshly built record of the same file.
pub fn keep_user_fields(fresh: &mut Measurement, old: &Measurement) {
    use MeasurementKind as K;
    keep_header(&mut fresh.header, &old.header);
    match (&mut fresh.details, &old.details) {
        (K::CyclicVoltammetry(f), K::CyclicVoltammetry(o)) => keep_dc_inputs(f, o),
        (K::LinearSweepVoltammetry(f), K::LinearSweepVoltammetry(o)) => keep_dc_inputs(f, o),
        (K::GalvanodynamicSweep(f), K::GalvanodynamicSweep(o)) => keep_dc_inputs(f, o),
        (K::Chronoamperometry(f), K::Chronoamperometry(o))
        | (K::Chronopotentiometry(f), K::Chronopotentiometry(o))
        | (K::Chronocoulometry(f), K::Chronocoulometry(o)) => keep_dc_inputs(f, o),
        (K::OpenCircuitVoltage(f), K::OpenCircuitVoltage(o)) => keep_dc_inputs(f, o),
        (K::UvVis(f), K::UvVis(o)) => {
            keep(&mut f.peak_search_lower, &o.peak_search_lower);
            keep(&mut f.peak_search_upper, &o.peak_search_upper);
            keep(&mut f.calibration_slope, &o.calibration_slope);
            keep(&mut f.calibration_intercept, &o.calibration_intercept);
            keep(&mut f.concentration_unit, &o.concentration_unit);
        }
        _ => {}
    }
}

/// The unset sample area of a DC record, if it is one.
fn missing_sample_area(details: &mut MeasurementKind) -> Option<&mut Option<Quantity<f64>>> {
    use MeasurementKind as K;
    let area = match details {
        K::CyclicVoltammetry(v) => &mut v.sample_area,
        K::LinearSweepVoltammetry(v) => &mut v.sample_area,
        K::GalvanodynamicSweep(v) => &mut v.sample_area,
        K::Chronoamperometry(v) | K::Chronopotentiometry(v) | K::Chronocoulometry(v) => &mut v.sample_area,
        K::OpenCircuitVoltage(v) => &mut v.sample_area,
        _ => return None,
    };
    area.is_none().then_some(area)
}

pub struct Normalizer<'a> {
    context: &'a dyn UploadContext,
    dispatcher: &'a Dispatcher,
}

impl<'a> Normalizer<'a> {
    pub fn new(context: &'a dyn UploadContext, dispatcher: &'a Dispatcher) -> Self {
        Self { context, dispatcher }
    }

    fn settings(&self) -> &IngestSettings {
        self.dispatcher.settings()
    }

    fn checkpoint(&self) -> Result<(), EchemError> {
        if self.context.is_cancelled() {
            Err(EchemError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Normalizes a record in place. Only cancellation and host write failures are errors;
    /// decode problems are logged and leave the record as it was.
    pub fn normalize(&self, archive: &mut ArchiveFile) -> Result<(), EchemError> {
        self.checkpoint()?;
        match &mut archive.data {
            Record::Sample(sample) => self.sample(sample)?,
            Record::Setup(setup) => self.setup(setup),
            Record::Measurement(measurement) => self.measurement(measurement)?,
            Record::Analysis(result) => self.analysis(result),
            Record::Environment(_) | Record::Recipe(_) | Record::ParsedFile(_) => {}
        }
        self.checkpoint()?;
        index(archive, self.context.upload_id());
        Ok(())
    }

    /// Reads, normalizes and writes back one archive. Returns whether it changed.
    pub fn normalize_entry(&self, name: &str) -> Result<bool, EchemError> {
        let Some(mut archive) = self.context.read_archive(name)? else {
            return Err(EchemError::ReferenceUnresolved(name.to_string()));
        };
        let before = archive.to_json()?;
        self.normalize(&mut archive)?;
        // Compared as written so NaN gaps in signals count as unchanged.
        let changed = archive.to_json()? != before;
        if changed {
            self.context.write_archive(name, &archive, true)?;
            log::info!("Normalized '{}'", name);
        }
        Ok(changed)
    }

    /// Normalizes every archive of the upload; returns the number that changed.
    pub fn normalize_upload(&self) -> Result<usize, EchemError> {
        let query = SearchQuery::default().within_upload(self.context.upload_id());
        let hits = ids::search_all(self.context, &query, self.settings().search_page_size)?;
        let mut changed = 0;
        for hit in hits {
            if self.normalize_entry(&hit.entry_name)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn resolve(&self, reference: &mut EntityReference) {
        if let Err(e) = ids::resolve(self.context, reference) {
            log::warn!("Reference resolution failed: {}", e);
        }
    }

    fn resolve_all<'r>(&self, references: impl IntoIterator<Item = &'r mut EntityReference>) {
        for reference in references {
            self.resolve(reference);
        }
    }

    fn sample(&self, sample: &mut Sample) -> Result<(), EchemError> {
        if sample.lab_id.is_none() {
            match self.assign_lab_id(sample) {
                Ok(lab_id) => sample.lab_id = lab_id,
                Err(EchemError::Cancelled) => return Err(EchemError::Cancelled),
                Err(e) => log::warn!("No lab id assigned: {}", e),
            }
        }
        if sample.elemental_composition.is_empty() {
            sample.elemental_composition = formula::elemental_composition(sample.all_formulas());
        }
        self.checkpoint()?;
        if let (Some(_), Some(lab_id)) = (&sample.mxene, &sample.lab_id) {
            let name = format!("{PREPARATIONS_PREFIX}{lab_id}.csv");
            let bytes = preparations_csv(&name, sample)?;
            self.context.write_raw_file(&name, &bytes)?;
        }
        Ok(())
    }

    fn assign_lab_id(&self, sample: &Sample) -> Result<Option<String>, EchemError> {
        let (Some(owner), Some(datetime)) = (&sample.owner, &sample.datetime) else {
            return Ok(None);
        };
        let date = datetime.date();
        if let Some(mxene) = &sample.mxene {
            let lab_id = ids::mxene_id(date, owner, &mxene.formula, mxene.method);
            ids::ensure_free(self.context, &lab_id, false)?;
            return Ok(Some(lab_id));
        }
        let institute = sample.institute.as_deref().or(self.settings().institute.as_deref());
        let root = ids::sample_root(institute, owner, date);
        ids::mint(self.context, &root, self.settings().search_page_size).map(Some)
    }

    fn setup(&self, setup: &mut Setup) {
        self.resolve_all(setup.reference_electrode.iter_mut());
        self.resolve_all(setup.counter_electrode.iter_mut());
        self.resolve_all(setup.equipment.iter_mut());
    }

    fn measurement(&self, measurement: &mut Measurement) -> Result<(), EchemError> {
        if let Some(file) = measurement.header.data_file.clone() {
            match self.context.read_raw_file(&file) {
                Ok(bytes) => {
                    self.refresh(measurement, &file, &bytes);
                    self.checkpoint()?;
                    write_previews(self.context, measurement, &bytes);
                }
                Err(e) => log::error!("Raw file of '{}' is not readable: {}", file, e),
            }
        }
        self.checkpoint()?;

        let header = &mut measurement.header;
        self.resolve_all(header.samples.iter_mut());
        self.resolve_all(header.environment.iter_mut());
        self.resolve_all(header.setup.iter_mut());
        self.resolve_all(header.connected_experiments.iter_mut());
        self.checkpoint()?;

        if let Some(area) = missing_sample_area(&mut measurement.details) {
            *area = measurement
                .header
                .samples
                .iter()
                .find_map(|r| self.sample_record(r))
                .and_then(|s| s.active_area);
        }
        builders::derive(measurement);
        Ok(())
    }

    /// Rebuilds the raw-derived part when the file changed since the last build.
    fn refresh(&self, measurement: &mut Measurement, file: &str, bytes: &[u8]) {
        let digest = raw_digest(file, bytes);
        if measurement.header.raw_digest.as_deref() == Some(digest.as_str()) {
            log::debug!("'{}' is unchanged, keeping derived arrays", file);
            return;
        }
        let Some(matcher) = self.dispatcher.select(&Candidate::new(file, bytes)) else {
            log::warn!("'{}' is no longer recognized, keeping the record as it is", file);
            return;
        };
        let position = measurement.header.method_position.unwrap_or(0);
        match self.dispatcher.build(matcher, file, bytes) {
            Ok((_, mut built)) if position < built.len() => {
                let mut fresh = built.swap_remove(position);
                keep_user_fields(&mut fresh, measurement);
                fresh.header.raw_digest = Some(digest);
                *measurement = fresh;
            }
            Ok(_) => log::warn!("'{}' has no method at position {}", file, position),
            Err(e) => log::warn!("{}; keeping the record as it is", e),
        }
    }

    fn archive_by_reference(&self, reference: &EntityReference) -> Option<ArchiveFile> {
        if reference.upload_id.as_deref() != Some(self.context.upload_id()) {
            return None;
        }
        let query = SearchQuery::by_entry_id(reference.entry_id.as_deref()?);
        let hits = self.context.search(&query, &crate::host::Pagination::first(1)).ok()?;
        self.context.read_archive(&hits.first()?.entry_name).ok().flatten()
    }

    fn sample_record(&self, reference: &EntityReference) -> Option<Sample> {
        match self.archive_by_reference(reference)?.data {
            Record::Sample(sample) => Some(sample),
            _ => None,
        }
    }

    fn measurement_record(&self, reference: &EntityReference) -> Option<Measurement> {
        match self.archive_by_reference(reference)?.data {
            Record::Measurement(measurement) => Some(measurement),
            _ => None,
        }
    }

    /// Resolves the inputs and recomputes the result when every input is readable.
    fn analysis(&self, result: &mut AnalysisResult) {
        self.resolve_all(result.inputs.iter_mut());
        let inputs: Vec<(EntityReference, Measurement)> = result
            .inputs
            .iter()
            .filter_map(|r| self.measurement_record(r).map(|m| (r.clone(), m)))
            .collect();
        if inputs.is_empty() || inputs.len() != result.inputs.len() {
            log::debug!("Analysis inputs not all readable, keeping stored results");
            return;
        }
        analysis::recompute(&mut result.kind, &inputs, self.settings());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryUpload;
    use chrono::NaiveDate;
    use echem_schemas::sample::{MxeneIdentity, MxeneMethod, Substance, SynthesisStep};

    fn dispatcher() -> Dispatcher {
        Dispatcher::standard(IngestSettings::default()).unwrap()
    }

    fn sample() -> Sample {
        Sample {
            owner: Some("AbCd".to_string()),
            datetime: NaiveDate::from_ymd_opt(2023, 3, 14).and_then(|d| d.and_hms_opt(9, 0, 0)),
            institute: Some("CE-NOME".to_string()),
            chemical_formulas: vec!["NiFe2O4".to_string()],
            ..Sample::default()
        }
    }

    #[test]
    fn test_digest_covers_name_and_content() {
        assert_eq!(raw_digest("a", b"x"), raw_digest("a", b"x"));
        assert_ne!(raw_digest("a", b"x"), raw_digest("b", b"x"));
        assert_ne!(raw_digest("a", b"x"), raw_digest("a", b"y"));
        assert_eq!(raw_digest("a", b"x").len(), 64);
    }

    #[test]
    fn test_sample_gets_lab_id_and_composition() {
        let upload = InMemoryUpload::new("up1");
        let dispatcher = dispatcher();
        let normalizer = Normalizer::new(&upload, &dispatcher);
        let mut archive = ArchiveFile::new("s.archive.json", Record::Sample(sample()));
        normalizer.normalize(&mut archive).unwrap();

        let Record::Sample(s) = &archive.data else { unreachable!() };
        assert_eq!(s.lab_id.as_deref(), Some("CE-NOME_AbCd_230314_0000"));
        assert_eq!(s.elemental_composition.len(), 3);
        assert_eq!(archive.metadata.lab_ids, vec!["CE-NOME_AbCd_230314_0000"]);
        assert_eq!(archive.metadata.lab_id_root.as_deref(), Some("CE-NOME_AbCd_230314"));
        assert_eq!(archive.metadata.elements, vec!["Fe", "Ni", "O"]);

        let once = archive.clone();
        normalizer.normalize(&mut archive).unwrap();
        assert_eq!(archive, once);
    }

    #[test]
    fn test_mxene_sample_writes_preparation_overview() {
        let upload = InMemoryUpload::new("up1");
        let dispatcher = dispatcher();
        let mut mxene = sample();
        mxene.mxene = Some(MxeneIdentity {
            formula: "Ti3C2".to_string(),
            method: MxeneMethod::HF,
        });
        mxene.synthesis = vec![SynthesisStep {
            method: Some("etching".to_string()),
            description: None,
            substances: vec![Substance {
                name: Some("hydrofluoric acid".to_string()),
                formula: Some("HF".to_string()),
                concentration: Some(Quantity::new(48.0, "wt%")),
                amount: None,
            }],
        }];
        let mut archive = ArchiveFile::new("m.archive.json", Record::Sample(mxene));
        Normalizer::new(&upload, &dispatcher).normalize(&mut archive).unwrap();

        let csv = upload
            .raw_file("list_of_sample_preparations_20230314_AbCd_Ti3C2_HF.csv")
            .unwrap();
        let text = String::from_utf8(csv).unwrap();
        assert!(text.starts_with("step,method,description,substance,formula"));
        assert!(text.contains("1,etching,,hydrofluoric acid,HF,48.0,wt%,,"));
    }

    #[test]
    fn test_user_fields_survive_rebuild() {
        let mut old = Measurement::new(MeasurementKind::CyclicVoltammetry(Voltammetry::default()));
        old.header.description = Some("by hand".to_string());
        if let MeasurementKind::CyclicVoltammetry(v) = &mut old.details {
            v.sample_area = Some(Quantity::new(0.2, "cm^2"));
        }
        let mut fresh = Measurement::new(MeasurementKind::CyclicVoltammetry(Voltammetry::default()));
        fresh.header.name = Some("CV".to_string());
        keep_user_fields(&mut fresh, &old);
        assert_eq!(fresh.header.description.as_deref(), Some("by hand"));
        assert_eq!(fresh.header.name.as_deref(), Some("CV"));
        let MeasurementKind::CyclicVoltammetry(v) = &fresh.details else { unreachable!() };
        assert_eq!(v.sample_area, Some(Quantity::new(0.2, "cm^2")));
    }

    #[test]
    fn test_rebuilt_header_takes_file_values() {
        let start = |h: u32| NaiveDate::from_ymd_opt(2023, 3, 14).and_then(|d| d.and_hms_opt(h, 0, 0));
        let mut old = Measurement::new(MeasurementKind::CyclicVoltammetry(Voltammetry::default()));
        old.header.datetime = start(9);
        old.header.station = Some("REF600-1".to_string());
        old.header.description = Some("by hand".to_string());
        let mut fresh = Measurement::new(MeasurementKind::CyclicVoltammetry(Voltammetry::default()));
        fresh.header.datetime = start(14);
        fresh.header.station = Some("REF600-2".to_string());
        keep_user_fields(&mut fresh, &old);
        assert_eq!(fresh.header.datetime, start(14));
        assert_eq!(fresh.header.station.as_deref(), Some("REF600-2"));
        assert_eq!(fresh.header.description.as_deref(), Some("by hand"));

        // A file without a start time keeps the one already recorded.
        let mut bare = Measurement::new(MeasurementKind::CyclicVoltammetry(Voltammetry::default()));
        keep_user_fields(&mut bare, &old);
        assert_eq!(bare.header.datetime, start(9));
        assert_eq!(bare.header.station.as_deref(), Some("REF600-1"));
    }

    #[test]
    fn test_cancelled_normalizer_stops() {
        let upload = InMemoryUpload::new("up1");
        upload.cancel();
        let dispatcher = dispatcher();
        let mut archive = ArchiveFile::new("s.archive.json", Record::Sample(sample()));
        let err = Normalizer::new(&upload, &dispatcher).normalize(&mut archive).unwrap_err();
        assert!(matches!(err, EchemError::Cancelled));
    }
}
