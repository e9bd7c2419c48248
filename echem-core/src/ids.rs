//! Readable lab ids, project sample numbers and lab-id lookups.
//!
//! Sample ids follow `[INSTITUTE_]OWNER_DATE_NNNN`, e.g. `CE-NOME_AbCd_230314_0007`. Everything
//! before the four-digit suffix is the identifier root; the next free number under a root is
//! one past the largest suffix the search index knows about.

use crate::{
    error::EchemError,
    host::{Pagination, SearchQuery, UploadContext},
};
use chrono::NaiveDate;
use echem_schemas::{reference::EntityReference, sample::MxeneMethod};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

pub const SUFFIX_DIGITS: usize = 4;

/// A parsed sample lab id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabId {
    pub institute: Option<String>,
    pub owner: String,
    /// `yymmdd` or `yyyymmdd`, as written.
    pub date: String,
    pub number: u32,
}

/// Four-letter initials such as `AbCd`.
pub fn is_owner(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    chars.len() == 4
        && chars[0].is_ascii_uppercase()
        && chars[1].is_ascii_lowercase()
        && chars[2].is_ascii_uppercase()
        && chars[3].is_ascii_lowercase()
}

fn is_date(s: &str) -> bool {
    (s.len() == 6 || s.len() == 8) && s.bytes().all(|b| b.is_ascii_digit())
}

impl LabId {
    pub fn new(institute: Option<&str>, owner: &str, date: NaiveDate, number: u32) -> Self {
        Self {
            institute: institute.map(fold_ascii).filter(|i| !i.is_empty()),
            owner: fold_ascii(owner),
            date: date.format("%y%m%d").to_string(),
            number,
        }
    }

    pub fn parse(id: &str) -> Option<Self> {
        let parts: Vec<&str> = id.split('_').collect();
        let (institute, rest) = match parts.len() {
            3 => (None, &parts[..]),
            4 => (Some(parts[0]), &parts[1..]),
            _ => return None,
        };
        let (owner, date, suffix) = (rest[0], rest[1], rest[2]);
        if !is_owner(owner)
            || !is_date(date)
            || suffix.len() != SUFFIX_DIGITS
            || !suffix.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        if institute.is_some_and(str::is_empty) {
            return None;
        }
        Some(Self {
            institute: institute.map(str::to_string),
            owner: owner.to_string(),
            date: date.to_string(),
            number: suffix.parse().ok()?,
        })
    }

    /// Everything but the numeric suffix.
    pub fn root(&self) -> String {
        match &self.institute {
            Some(institute) => format!("{institute}_{}_{}", self.owner, self.date),
            None => format!("{}_{}", self.owner, self.date),
        }
    }
}

impl fmt::Display for LabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:04}", self.root(), self.number)
    }
}

/// Decomposes to ASCII and replaces whitespace with `-`, e.g. `Jürgen Ä` → `Jurgen-A`.
pub fn fold_ascii(text: &str) -> String {
    text.trim()
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c.is_ascii_whitespace() { '-' } else { c })
        .collect()
}

/// The identifier root of a sample created on `date`.
pub fn sample_root(institute: Option<&str>, owner: &str, date: NaiveDate) -> String {
    LabId::new(institute, owner, date, 0).root()
}

/// The root of `lab_id` when it follows the sample grammar.
pub fn root_of(lab_id: &str) -> Option<String> {
    LabId::parse(lab_id).map(|id| id.root())
}

/// `{yyyymmdd}_{owner}_{formula}_{method}`; MXene ids carry no running number.
pub fn mxene_id(date: NaiveDate, owner: &str, formula: &str, method: MxeneMethod) -> String {
    format!(
        "{}_{}_{}_{}",
        date.format("%Y%m%d"),
        fold_ascii(owner),
        fold_ascii(formula),
        method.as_str()
    )
}

/// Splits an MXene id into date, owner, formula and method.
pub fn parse_mxene_id(id: &str) -> Option<(NaiveDate, String, String, MxeneMethod)> {
    let mut parts = id.splitn(3, '_');
    let date = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
    let owner = parts.next()?;
    let (formula, method) = parts.next()?.rsplit_once('_')?;
    let method = match method {
        "MS" => MxeneMethod::MS,
        "HF" => MxeneMethod::HF,
        _ => return None,
    };
    if !is_owner(owner) || formula.is_empty() {
        return None;
    }
    Some((date, owner.to_string(), formula.to_string(), method))
}

/// Runs `query` over every page of the index.
pub fn search_all(
    context: &dyn UploadContext,
    query: &SearchQuery,
    page_size: usize,
) -> Result<Vec<crate::host::RecordHeader>, EchemError> {
    let mut page = Pagination::first(page_size.max(1));
    let mut hits = Vec::new();
    loop {
        let batch = context.search(query, &page)?;
        let last = batch.len() < page.page_size;
        hits.extend(batch);
        if last {
            return Ok(hits);
        }
        page = page.next();
    }
}

/// One past the largest suffix in use under `root`, or 0 for a fresh root.
pub fn next_number(context: &dyn UploadContext, root: &str, page_size: usize) -> Result<u32, EchemError> {
    let hits = search_all(context, &SearchQuery::by_root(root), page_size)?;
    let highest = hits
        .iter()
        .flat_map(|h| h.lab_ids.iter())
        .filter_map(|id| LabId::parse(id))
        .filter(|id| id.root() == root)
        .map(|id| id.number)
        .max();
    Ok(highest.map_or(0, |n| n + 1))
}

/// Fails with [`EchemError::IdCollision`] when `lab_id` is already indexed and `overwrite` is
/// not set.
pub fn ensure_free(context: &dyn UploadContext, lab_id: &str, overwrite: bool) -> Result<(), EchemError> {
    if overwrite {
        return Ok(());
    }
    let hits = context.search(&SearchQuery::by_lab_id(lab_id), &Pagination::first(1))?;
    if hits.is_empty() {
        Ok(())
    } else {
        Err(EchemError::IdCollision(lab_id.to_string()))
    }
}

/// Allocates the next sample id under `root`.
pub fn mint(context: &dyn UploadContext, root: &str, page_size: usize) -> Result<String, EchemError> {
    let number = next_number(context, root, page_size)?;
    let lab_id = format!("{root}_{number:0width$}", width = SUFFIX_DIGITS);
    ensure_free(context, &lab_id, false)?;
    log::info!("Minted lab id '{}'", lab_id);
    Ok(lab_id)
}

/// Exact match on the indexed lab ids, optionally restricted to the current upload.
pub fn find_sample_by_id(
    context: &dyn UploadContext,
    lab_id: &str,
    within_upload: bool,
) -> Result<Option<EntityReference>, EchemError> {
    let mut query = SearchQuery::by_lab_id(lab_id);
    if within_upload {
        query = query.within_upload(context.upload_id());
    }
    let hits = context.search(&query, &Pagination::first(1))?;
    Ok(hits.first().map(|hit| {
        let mut reference = context.make_reference(&hit.upload_id, &hit.entry_id);
        reference.lab_id = Some(lab_id.to_string());
        reference.display_name = Some(hit.entry_name.clone());
        reference
    }))
}

/// Fills in upload and entry ids of a dangling reference. Returns whether it is resolved.
pub fn resolve(context: &dyn UploadContext, reference: &mut EntityReference) -> Result<bool, EchemError> {
    if reference.is_resolved() {
        return Ok(true);
    }
    let Some(lab_id) = reference.lab_id.clone() else {
        return Ok(false);
    };
    match find_sample_by_id(context, &lab_id, false)? {
        Some(found) => {
            *reference = found;
            Ok(true)
        }
        None => {
            log::debug!("{}", EchemError::ReferenceUnresolved(lab_id));
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryUpload;
    use echem_schemas::{
        archive::{ArchiveFile, Record},
        sample::Sample,
    };

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 3, 14).unwrap()
    }

    fn stored(upload: &InMemoryUpload, lab_id: &str) {
        let sample = Sample {
            lab_id: Some(lab_id.to_string()),
            ..Sample::default()
        };
        let mut archive = ArchiveFile::new(lab_id, Record::Sample(sample));
        archive.metadata.lab_ids = vec![lab_id.to_string()];
        archive.metadata.lab_id_root = root_of(lab_id);
        upload
            .write_archive(&format!("{lab_id}.archive.json"), &archive, false)
            .unwrap();
    }

    #[test]
    fn test_compose_and_parse() {
        let id = LabId::new(Some("CE-NOME"), "AbCd", date(), 7);
        assert_eq!(id.to_string(), "CE-NOME_AbCd_230314_0007");
        assert_eq!(LabId::parse(&id.to_string()), Some(id));

        let plain = LabId::parse("AbCd_20230314_0012").unwrap();
        assert_eq!(plain.institute, None);
        assert_eq!(plain.date, "20230314");
        assert_eq!(plain.number, 12);
        assert_eq!(plain.root(), "AbCd_20230314");
    }

    #[test]
    fn test_rejects_malformed_ids() {
        assert!(LabId::parse("abcd_230314_0001").is_none());
        assert!(LabId::parse("AbCd_2303_0001").is_none());
        assert!(LabId::parse("AbCd_230314_001").is_none());
        assert!(LabId::parse("X_Y_AbCd_230314_0001").is_none());
    }

    #[test]
    fn test_owner_is_folded() {
        assert_eq!(fold_ascii("Ãb Çd"), "Ab-Cd");
        assert_eq!(sample_root(None, "ÄbÇd", date()), "AbCd_230314");
    }

    #[test]
    fn test_mxene_id() {
        let id = mxene_id(date(), "AbCd", "Ti3C2", MxeneMethod::HF);
        assert_eq!(id, "20230314_AbCd_Ti3C2_HF");
        let (d, owner, formula, method) = parse_mxene_id(&id).unwrap();
        assert_eq!((d, owner.as_str(), formula.as_str(), method), (date(), "AbCd", "Ti3C2", MxeneMethod::HF));
        assert!(parse_mxene_id("20230314_AbCd_Ti3C2_XX").is_none());
    }

    #[test]
    fn test_next_number_starts_at_zero_and_counts_up() {
        let upload = InMemoryUpload::new("up1");
        let root = "CE-NOME_AbCd_230314";
        assert_eq!(next_number(&upload, root, 9999).unwrap(), 0);
        stored(&upload, "CE-NOME_AbCd_230314_0000");
        stored(&upload, "CE-NOME_AbCd_230314_0004");
        stored(&upload, "CE-NOME_EfGh_230314_0009");
        assert_eq!(next_number(&upload, root, 9999).unwrap(), 5);
        // Small pages still see every hit.
        assert_eq!(next_number(&upload, root, 1).unwrap(), 5);
        assert_eq!(mint(&upload, root, 9999).unwrap(), "CE-NOME_AbCd_230314_0005");
    }

    #[test]
    fn test_collision_unless_overwrite() {
        let upload = InMemoryUpload::new("up1");
        stored(&upload, "AbCd_230314_0001");
        let err = ensure_free(&upload, "AbCd_230314_0001", false).unwrap_err();
        assert!(matches!(err, EchemError::IdCollision(_)));
        assert!(ensure_free(&upload, "AbCd_230314_0001", true).is_ok());
        assert!(ensure_free(&upload, "AbCd_230314_0002", false).is_ok());
    }

    #[test]
    fn test_find_sample_by_id_and_resolve() {
        let upload = InMemoryUpload::new("up1");
        stored(&upload, "AbCd_230314_0001");
        let found = find_sample_by_id(&upload, "AbCd_230314_0001", true).unwrap().unwrap();
        assert_eq!(found.upload_id.as_deref(), Some("up1"));
        assert!(find_sample_by_id(&upload, "AbCd_230314_0002", false).unwrap().is_none());

        let mut dangling = EntityReference::from_lab_id("AbCd_230314_0001");
        assert!(resolve(&upload, &mut dangling).unwrap());
        assert_eq!(dangling, found);

        let mut missing = EntityReference::from_lab_id("AbCd_230314_0009");
        assert!(!resolve(&upload, &mut missing).unwrap());
        assert_eq!(missing.lab_id.as_deref(), Some("AbCd_230314_0009"));
    }
}
