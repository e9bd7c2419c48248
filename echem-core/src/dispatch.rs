//! Mainfile dispatcher: picks a decoder for each uploaded file and writes the records it
//! yields, together with the `ParsedFile` bookkeeping entry.
//!
//! Matchers are tried in ascending level, then declaration order; the first match wins.

use crate::{
    builders::{self, BuildContext},
    decoders::{necc, sputtering, tiff, workbook::Workbook, xy, Decoded, DecoderKind, DecoderRegistry},
    error::EchemError,
    host::{Pagination, SearchQuery, UploadContext},
    ids, normalize,
    settings::IngestSettings,
};
use echem_schemas::{
    archive::{ArchiveFile, ParsedFile, Record},
    measurement::{ExperimentFunction, GenericData, Measurement, MeasurementKind, MeasurementHeader},
    reference::EntityReference,
};
use regex::{bytes::Regex as BytesRegex, Regex};

/// Content check run after the cheaper patterns matched.
pub type SniffFn = fn(&str, &[u8]) -> bool;

pub const SAMPLE_PREFIX_LEN: usize = 24;
pub const ENVIRONMENT_PREFIX_LEN: usize = 17;

/// What a matcher hands the file to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Decoder(DecoderKind),
    /// Files named after a sample id; stored as generic measurements without decoding.
    Nome,
}

/// An uploaded file as the matchers see it.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub path: &'a str,
    pub mime: Option<&'a str>,
    pub bytes: &'a [u8],
}

impl<'a> Candidate<'a> {
    pub fn new(path: &'a str, bytes: &'a [u8]) -> Self {
        Self { path, mime: None, bytes }
    }

    pub fn file_name(&self) -> &'a str {
        file_name(self.path)
    }
}

pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn compile(pattern: &str) -> Result<Regex, EchemError> {
    Regex::new(pattern).map_err(|e| EchemError::Pattern(pattern.to_string(), e))
}

pub struct Matcher {
    pub name: &'static str,
    pub family: Family,
    pub level: u8,
    name_regex: Option<Regex>,
    mime_regex: Option<Regex>,
    header_regex: Option<Regex>,
    binary_header_regex: Option<BytesRegex>,
    sniff: Option<SniffFn>,
}

impl Matcher {
    pub fn new(name: &'static str, family: Family) -> Self {
        Self {
            name,
            family,
            level: 0,
            name_regex: None,
            mime_regex: None,
            header_regex: None,
            binary_header_regex: None,
            sniff: None,
        }
    }

    pub fn with_name(mut self, pattern: &str) -> Result<Self, EchemError> {
        self.name_regex = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_mime(mut self, pattern: &str) -> Result<Self, EchemError> {
        self.mime_regex = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_header(mut self, pattern: &str) -> Result<Self, EchemError> {
        self.header_regex = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_binary_header(mut self, pattern: &str) -> Result<Self, EchemError> {
        let regex = BytesRegex::new(pattern).map_err(|e| EchemError::Pattern(pattern.to_string(), e))?;
        self.binary_header_regex = Some(regex);
        Ok(self)
    }

    pub fn with_sniff(mut self, sniff: SniffFn) -> Self {
        self.sniff = Some(sniff);
        self
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    /// Every configured check must pass. The mime check is skipped when the host does not
    /// know the mime type.
    pub fn matches(&self, candidate: &Candidate, window: usize) -> bool {
        if let Some(regex) = &self.name_regex {
            if !regex.is_match(candidate.file_name()) {
                return false;
            }
        }
        if let (Some(regex), Some(mime)) = (&self.mime_regex, candidate.mime) {
            if !regex.is_match(mime) {
                return false;
            }
        }
        let head = &candidate.bytes[..window.min(candidate.bytes.len())];
        if let Some(regex) = &self.binary_header_regex {
            if !regex.is_match(head) {
                return false;
            }
        }
        if let Some(regex) = &self.header_regex {
            if !regex.is_match(&String::from_utf8_lossy(head)) {
                return false;
            }
        }
        self.sniff
            .map_or(true, |sniff| sniff(candidate.file_name(), candidate.bytes))
    }
}

fn is_necc_workbook(file: &str, bytes: &[u8]) -> bool {
    Workbook::from_xlsx_bytes(file, bytes).is_ok_and(|w| necc::layout(&w).is_some())
}

fn is_sputtering_workbook(file: &str, bytes: &[u8]) -> bool {
    Workbook::from_xlsx_bytes(file, bytes).is_ok_and(|w| w.sheets.iter().any(sputtering::is_run_sheet))
}

fn is_xy_spectrum(file: &str, _bytes: &[u8]) -> bool {
    xy::spectrum_kind(file).is_some()
}

/// The built-in matchers in priority order.
pub fn standard_matchers() -> Result<Vec<Matcher>, EchemError> {
    use DecoderKind as D;
    use Family::Decoder;
    Ok(vec![
        Matcher::new("NECC workbook", Decoder(D::NeccWorkbook))
            .with_name(r"\.xlsx$")?
            .with_sniff(is_necc_workbook),
        Matcher::new("Gamry", Decoder(D::Gamry))
            .with_name(r"\.DTA$")?
            .with_header(r"\A\x{FEFF}?EXPLAIN")?,
        Matcher::new("EC-Lab MPT", Decoder(D::BiologicMpt))
            .with_name(r"\.mpt$")?
            .with_header(r"\A\x{FEFF}?EC-Lab ASCII FILE")?,
        Matcher::new("CorrWare", Decoder(D::CorrWare)).with_name(r"\.cor$")?,
        Matcher::new("BioLogic MPR", Decoder(D::BiologicMpr))
            .with_name(r"\.mpr$")?
            .with_binary_header(r"(?-u)\ABIO-LOGIC MODULAR FILE")?,
        Matcher::new("CHI", Decoder(D::Chi))
            .with_name(r"\.txt$")?
            .with_header(r"(?m)^\s*(Freq/Hz|Potential/V)")?,
        Matcher::new("Zahner", Decoder(D::Zahner)).with_name(r"\.(isw|ism)$")?,
        Matcher::new("PalmSens", Decoder(D::PalmSens)).with_name(r"\.pssession$")?,
        Matcher::new("TDMS", Decoder(D::Tdms))
            .with_name(r"\.tdms$")?
            .with_binary_header(r"(?-u)\ATDSm")?,
        Matcher::new("XAS KMC-2", Decoder(D::XasKmc2))
            .with_name(r"\.dat$")?
            .with_header(r"/home/kmc2/data/")?,
        Matcher::new("UV-vis", Decoder(D::UvVis))
            .with_name(r"\.(csv|ABS)$")?
            .with_header(r"WL/nm,Abs|  ABSOR-> Wave:")?,
        Matcher::new("Pump rate", Decoder(D::PumpRate)).with_name(r"\.pump\.csv$")?,
        Matcher::new("Phase fluorometry", Decoder(D::PhaseFluorometry)).with_name(r"\.oxy\.(csv|xlsx)$")?,
        Matcher::new("TIFF image", Decoder(D::Tiff))
            .with_name(r"\.(tif|tiff|TIF|TIFF)$")?
            .with_mime(r"^image/")?,
        Matcher::new("Mass spectra", Decoder(D::MassSpec))
            .with_name(r"\.txt$")?
            .with_header(r"\A\x{FEFF}?Spectra International Data File")?,
        Matcher::new("TFC sputtering", Decoder(D::Sputtering))
            .with_name(r"\.xlsx$")?
            .with_sniff(is_sputtering_workbook),
        Matcher::new("XY spectrum", Decoder(D::XySpectrum)).with_sniff(is_xy_spectrum),
        Matcher::new("General NOME", Family::Nome)
            .with_name(r"^CE-NOME_[A-Z][a-z][A-Z][a-z]_\d{6}_\d{4}")?
            .with_level(1),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// At least one new archive was written.
    Created,
    /// Every archive already existed and was left alone.
    Kept,
    Unmatched,
    Failed,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Kept => "kept",
            Self::Unmatched => "unmatched",
            Self::Failed => "failed",
        }
    }
}

/// What happened to one uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub file: String,
    pub matcher: Option<&'static str>,
    pub variants: Vec<&'static str>,
    pub archives: Vec<String>,
    pub status: DispatchStatus,
    pub message: Option<String>,
}

impl DispatchOutcome {
    fn new(file: &str, matcher: Option<&'static str>, status: DispatchStatus) -> Self {
        Self {
            file: file.to_string(),
            matcher,
            variants: Vec::new(),
            archives: Vec::new(),
            status,
            message: None,
        }
    }

    fn failed(file: &str, matcher: Option<&'static str>, error: &EchemError) -> Self {
        let mut outcome = Self::new(file, matcher, DispatchStatus::Failed);
        outcome.message = Some(error.to_string());
        outcome
    }
}

/// Archive name of the record for one method of `path`.
pub fn archive_name(path: &str, method: Option<(usize, &str)>) -> String {
    match method {
        Some((position, method)) => format!("{path}.{position}-{method}.archive.json"),
        None => format!("{path}.archive.json"),
    }
}

pub fn parsed_file_name(path: &str) -> String {
    format!("{path}.parsed.archive.json")
}

/// Sample, environment and setup references found for a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binding {
    pub samples: Vec<EntityReference>,
    pub environment: Option<EntityReference>,
    pub setup: Option<EntityReference>,
}

impl Binding {
    /// Fills the header's references where the record has none yet.
    pub fn apply(&self, header: &mut MeasurementHeader) {
        if header.samples.is_empty() {
            header.samples = self.samples.clone();
        }
        if header.environment.is_none() {
            header.environment = self.environment.clone();
        }
        if header.setup.is_none() {
            header.setup = self.setup.clone();
        }
    }
}

pub struct Dispatcher {
    matchers: Vec<Matcher>,
    registry: DecoderRegistry,
    settings: IngestSettings,
}

impl Dispatcher {
    pub fn new(mut matchers: Vec<Matcher>, registry: DecoderRegistry, settings: IngestSettings) -> Self {
        matchers.sort_by_key(|m| m.level);
        Self {
            matchers,
            registry,
            settings,
        }
    }

    pub fn standard(settings: IngestSettings) -> Result<Self, EchemError> {
        Ok(Self::new(standard_matchers()?, DecoderRegistry::standard(), settings))
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    pub fn select(&self, candidate: &Candidate) -> Option<&Matcher> {
        let window = self.settings.binary_header_window;
        self.matchers.iter().find(|m| m.matches(candidate, window))
    }

    /// Decodes and builds every record a file yields; `None` for the decoded dictionary of
    /// files that are not decoded.
    pub fn build(&self, matcher: &Matcher, path: &str, bytes: &[u8]) -> Result<(Option<Decoded>, Vec<Measurement>), EchemError> {
        let kind = match matcher.family {
            Family::Decoder(kind) => kind,
            Family::Nome => {
                let mut measurement = Measurement::from_file(path, MeasurementKind::Generic(GenericData::default()));
                measurement.header.name = Some(BuildContext::new(path, &self.settings).file_stem().to_string());
                return Ok((None, vec![measurement]));
            }
        };
        let decoded = self.registry.decode(kind, path, bytes)?;
        let positions = decoded.methods.len().max(1);
        let measurements = (0..positions)
            .map(|position| builders::build(&decoded, &BuildContext::new(path, &self.settings).at(position)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((Some(decoded), measurements))
    }

    /// Resolves a lab id found in the file; unresolved ids stay as dangling references.
    fn lookup(&self, context: &dyn UploadContext, lab_id: &str) -> EntityReference {
        match ids::find_sample_by_id(context, lab_id, false) {
            Ok(Some(reference)) => reference,
            Ok(None) => EntityReference::from_lab_id(lab_id),
            Err(e) => {
                log::warn!("Lookup of '{}' failed: {}", lab_id, e);
                EntityReference::from_lab_id(lab_id)
            }
        }
    }

    fn lookup_existing(&self, context: &dyn UploadContext, lab_id: &str) -> Option<EntityReference> {
        ids::find_sample_by_id(context, lab_id, false).ok().flatten()
    }

    /// Metadata ids first, then file-name prefixes, then any sample in the upload.
    pub fn bind(&self, context: &dyn UploadContext, decoded: Option<&Decoded>, path: &str) -> Binding {
        let mut binding = Binding::default();
        let text = |key: &str| {
            decoded
                .and_then(|d| d.meta(key))
                .map(|v| v.display().trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(id) = text("SAMPLEID") {
            binding.samples.push(self.lookup(context, &id));
        }
        binding.environment = text("ENVIRONMENTID").map(|id| self.lookup(context, &id));
        binding.setup = text("ECSETUPID").map(|id| self.lookup(context, &id));

        let name = file_name(path);
        if binding.samples.is_empty() {
            if let Some(prefix) = name.get(..SAMPLE_PREFIX_LEN).filter(|p| ids::LabId::parse(p).is_some()) {
                binding.samples.push(self.lookup(context, prefix));
            }
        }
        if binding.environment.is_none() {
            binding.environment = name
                .get(..ENVIRONMENT_PREFIX_LEN)
                .and_then(|prefix| self.lookup_existing(context, prefix));
        }
        if binding.samples.is_empty() {
            let query = SearchQuery::by_entry_type("Sample").within_upload(context.upload_id());
            match context.search(&query, &Pagination::first(1)) {
                Ok(hits) => binding.samples.extend(hits.first().map(|h| h.to_reference())),
                Err(e) => log::warn!("Sample search for '{}' failed: {}", path, e),
            }
        }
        binding
    }

    fn write_parsed_file(
        &self,
        context: &dyn UploadContext,
        path: &str,
        activity: Option<EntityReference>,
    ) -> Result<(), EchemError> {
        let name = parsed_file_name(path);
        let mut archive = ArchiveFile::new(name.clone(), Record::ParsedFile(ParsedFile { activity }));
        normalize::index(&mut archive, context.upload_id());
        context.write_archive(&name, &archive, true)?;
        Ok(())
    }

    /// Handles one raw file. Decoder failures are reported in the outcome, not as errors.
    pub fn dispatch_file(&self, context: &dyn UploadContext, path: &str) -> Result<DispatchOutcome, EchemError> {
        let bytes = context.read_raw_file(path)?;
        let Some(matcher) = self.select(&Candidate::new(path, &bytes)) else {
            log::debug!("No matcher for '{}'", path);
            return Ok(DispatchOutcome::new(path, None, DispatchStatus::Unmatched));
        };
        log::info!("'{}' matched {}", path, matcher.name);

        let (decoded, mut measurements) = match self.build(matcher, path, &bytes) {
            Ok(built) => built,
            Err(e) => {
                log::warn!("Could not build records from '{}': {}", path, e);
                self.write_parsed_file(context, path, None)?;
                return Ok(DispatchOutcome::failed(path, Some(matcher.name), &e));
            }
        };

        let multiple = measurements.len() > 1;
        let names: Vec<String> = measurements
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let method = decoded
                    .as_ref()
                    .and_then(|d| builders::method_at(d, i))
                    .unwrap_or(m.details.variant_name());
                archive_name(path, multiple.then_some((i, method)))
            })
            .collect();
        let references: Vec<EntityReference> = names
            .iter()
            .map(|name| {
                let mut reference = context.make_reference(context.upload_id(), &context.entry_id_from_name(name));
                reference.display_name = Some(name.clone());
                reference
            })
            .collect();

        let binding = self.bind(context, decoded.as_ref(), path);
        let digest = normalize::raw_digest(path, &bytes);
        let mut outcome = DispatchOutcome::new(path, Some(matcher.name), DispatchStatus::Kept);
        for (i, measurement) in measurements.iter_mut().enumerate() {
            let header = &mut measurement.header;
            header.raw_digest = Some(digest.clone());
            if multiple {
                header.function = Some(if i == 0 {
                    ExperimentFunction::Generator
                } else {
                    ExperimentFunction::Detector
                });
                header.connected_experiments = references
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, r)| r.clone())
                    .collect();
            }
            binding.apply(header);
        }

        for (measurement, name) in measurements.into_iter().zip(&names) {
            outcome.variants.push(measurement.details.variant_name());
            normalize::write_previews(context, &measurement, &bytes);
            let mut archive = ArchiveFile::new(name.clone(), Record::Measurement(measurement));
            normalize::index(&mut archive, context.upload_id());
            if context.write_archive(name, &archive, false)? {
                outcome.status = DispatchStatus::Created;
            } else {
                log::debug!("Archive '{}' already exists, keeping it", name);
            }
            outcome.archives.push(name.clone());
        }
        self.write_parsed_file(context, path, references.into_iter().next())?;
        Ok(outcome)
    }

    /// Dispatches every raw file of the upload, skipping files the pipeline derived itself.
    /// The cancellation token is checked before each file.
    pub fn dispatch_upload(&self, context: &dyn UploadContext) -> Result<Vec<DispatchOutcome>, EchemError> {
        let names = context.raw_file_names();
        let mut outcomes = Vec::new();
        for path in names.iter().filter(|p| !is_derived(p, &names)) {
            if context.is_cancelled() {
                log::warn!("Upload '{}' cancelled after {} files", context.upload_id(), outcomes.len());
                return Err(EchemError::Cancelled);
            }
            match self.dispatch_file(context, path) {
                Ok(outcome) => outcomes.push(outcome),
                Err(EchemError::Cancelled) => return Err(EchemError::Cancelled),
                Err(e) => {
                    log::error!("Dispatching '{}' failed: {}", path, e);
                    outcomes.push(DispatchOutcome::failed(path, None, &e));
                }
            }
        }
        Ok(outcomes)
    }
}

/// Archives, TIFF previews and preparation overviews are outputs, not uploads.
pub fn is_derived(path: &str, all: &[String]) -> bool {
    let name = file_name(path);
    name.ends_with(".archive.json")
        || name.starts_with(normalize::PREPARATIONS_PREFIX)
        || (name.ends_with(".png")
            && all
                .iter()
                .any(|other| other != path && tiff::preview_name(other) == path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryUpload;

    fn dispatcher() -> Dispatcher {
        Dispatcher::standard(IngestSettings::default()).unwrap()
    }

    fn selected(path: &str, bytes: &[u8]) -> Option<&'static str> {
        dispatcher().select(&Candidate::new(path, bytes)).map(|m| m.name)
    }

    #[test]
    fn test_matcher_selection() {
        assert_eq!(selected("CV.DTA", b"EXPLAIN\r\nTAG\tCV\r\n"), Some("Gamry"));
        assert_eq!(selected("CV.DTA", b"not gamry"), None);
        assert_eq!(selected("a.mpt", b"EC-Lab ASCII FILE\n"), Some("EC-Lab MPT"));
        assert_eq!(selected("a.mpr", b"BIO-LOGIC MODULAR FILE\x1a   "), Some("BioLogic MPR"));
        assert_eq!(selected("a.tdms", b"TDSm\x0e\0\0\0"), Some("TDMS"));
        assert_eq!(selected("ms.txt", b"Spectra International Data File\n"), Some("Mass spectra"));
        assert_eq!(selected("chi.txt", b"Jan 1\nFreq/Hz, Z'/ohm\n"), Some("CHI"));
        assert_eq!(selected("a.pump.csv", b"Date [mm/dd/yyyy]"), Some("Pump rate"));
        assert_eq!(selected("s.csv", b"WL/nm,Abs\n400,0.1\n"), Some("UV-vis"));
        assert_eq!(selected("pattern.xy", b"10 20\n"), Some("XY spectrum"));
        assert_eq!(
            selected("scan.dat", b"#C /home/kmc2/data/2023/ni.dat\n"),
            Some("XAS KMC-2")
        );
        assert_eq!(selected("scan.dat", b"#C elsewhere\n"), None);
        // Matched case-sensitively on the file name.
        assert_eq!(selected("cv.dta", b"EXPLAIN\n"), None);
        assert_eq!(selected("CE-NOME_AbCd_230314_0001_photo.jpg", b""), Some("General NOME"));
    }

    #[test]
    fn test_binary_header_window() {
        let settings = IngestSettings {
            binary_header_window: 8,
            ..IngestSettings::default()
        };
        let dispatcher = Dispatcher::standard(settings).unwrap();
        let bytes = b"#comment line\n/home/kmc2/data/x\n";
        assert!(dispatcher.select(&Candidate::new("scan.dat", bytes)).is_none());
    }

    #[test]
    fn test_archive_names() {
        assert_eq!(archive_name("run/CV.DTA", None), "run/CV.DTA.archive.json");
        assert_eq!(archive_name("CV.DTA", Some((1, "CA"))), "CV.DTA.1-CA.archive.json");
        let names = vec!["img.tif".to_string(), "img.png".to_string(), "other.png".to_string()];
        assert!(is_derived("img.png", &names));
        assert!(!is_derived("other.png", &names));
        assert!(is_derived("x.archive.json", &names));
    }

    #[test]
    fn test_undecodable_file_leaves_empty_parsed_file() {
        let upload = InMemoryUpload::new("up1").with_raw_file("broken.mpr", b"BIO-LOGIC MODULAR FILE\x1a".to_vec());
        let outcome = dispatcher().dispatch_file(&upload, "broken.mpr").unwrap();
        assert_eq!(outcome.status, DispatchStatus::Failed);
        assert!(outcome.message.is_some());
        let parsed = upload.archive(&parsed_file_name("broken.mpr")).unwrap();
        assert_eq!(parsed.data, Record::ParsedFile(ParsedFile { activity: None }));
    }

    #[test]
    fn test_nome_file_binds_sample_by_prefix() {
        let upload = InMemoryUpload::new("up1").with_raw_file("CE-NOME_AbCd_230314_0001_notes.md", b"notes".to_vec());
        let outcome = dispatcher()
            .dispatch_file(&upload, "CE-NOME_AbCd_230314_0001_notes.md")
            .unwrap();
        assert_eq!(outcome.status, DispatchStatus::Created);
        assert_eq!(outcome.variants, vec!["Generic"]);
        let archive = upload.archive(&outcome.archives[0]).unwrap();
        let Record::Measurement(m) = archive.data else {
            panic!("expected a measurement");
        };
        assert_eq!(m.header.samples[0].lab_id.as_deref(), Some("CE-NOME_AbCd_230314_0001"));
        assert!(!m.header.samples[0].is_resolved());
    }

    #[test]
    fn test_unmatched_file_writes_nothing() {
        let upload = InMemoryUpload::new("up1").with_raw_file("readme.md", b"hello".to_vec());
        let outcomes = dispatcher().dispatch_upload(&upload).unwrap();
        assert_eq!(outcomes[0].status, DispatchStatus::Unmatched);
        assert!(upload.archive_names().is_empty());
    }

    #[test]
    fn test_cancellation_stops_before_next_file() {
        let upload = InMemoryUpload::new("up1").with_raw_file("readme.md", b"hello".to_vec());
        upload.cancel();
        assert!(matches!(dispatcher().dispatch_upload(&upload), Err(EchemError::Cancelled)));
    }
}
