//! The capabilities the ingestion pipeline needs from its host.
//!
//! The host owns storage, the search index and scheduling. The core only ever talks to it
//! through [`UploadContext`], so the same dispatcher and normalizers run against the
//! in-memory upload used in tests and the directory-backed upload of the command line tool.

use crate::error::EchemError;
use echem_schemas::{archive::ArchiveFile, reference::EntityReference};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Exact-match filter over the indexed archive metadata. `None` fields match anything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchQuery {
    pub lab_id: Option<String>,
    pub lab_id_root: Option<String>,
    pub entry_type: Option<String>,
    pub entry_id: Option<String>,
    pub upload_id: Option<String>,
}

impl SearchQuery {
    pub fn by_lab_id(lab_id: &str) -> Self {
        Self {
            lab_id: Some(lab_id.to_string()),
            ..Self::default()
        }
    }

    pub fn by_root(root: &str) -> Self {
        Self {
            lab_id_root: Some(root.to_string()),
            ..Self::default()
        }
    }

    pub fn by_entry_type(entry_type: &str) -> Self {
        Self {
            entry_type: Some(entry_type.to_string()),
            ..Self::default()
        }
    }

    pub fn by_entry_id(entry_id: &str) -> Self {
        Self {
            entry_id: Some(entry_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_entry_type(mut self, entry_type: &str) -> Self {
        self.entry_type = Some(entry_type.to_string());
        self
    }

    pub fn within_upload(mut self, upload_id: &str) -> Self {
        self.upload_id = Some(upload_id.to_string());
        self
    }

    pub fn matches(&self, header: &RecordHeader) -> bool {
        let lab_id_ok = self
            .lab_id
            .as_ref()
            .map_or(true, |id| header.lab_ids.iter().any(|l| l == id));
        let root_ok = self
            .lab_id_root
            .as_ref()
            .map_or(true, |root| header.lab_id_root.as_ref() == Some(root));
        let type_ok = self
            .entry_type
            .as_ref()
            .map_or(true, |t| header.entry_type.as_ref() == Some(t));
        let entry_ok = self.entry_id.as_ref().map_or(true, |e| &header.entry_id == e);
        let upload_ok = self.upload_id.as_ref().map_or(true, |u| &header.upload_id == u);
        lab_id_ok && root_ok && type_ok && entry_ok && upload_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page_size: usize,
    pub offset: usize,
}

impl Pagination {
    pub fn first(page_size: usize) -> Self {
        Self {
            page_size,
            offset: 0,
        }
    }

    pub fn next(self) -> Self {
        Self {
            page_size: self.page_size,
            offset: self.offset + self.page_size,
        }
    }
}

/// What the search index returns per hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub upload_id: String,
    pub entry_id: String,
    pub entry_name: String,
    pub entry_type: Option<String>,
    pub lab_ids: Vec<String>,
    pub lab_id_root: Option<String>,
}

impl RecordHeader {
    pub fn from_archive(upload_id: &str, entry_id: &str, archive: &ArchiveFile) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            entry_id: entry_id.to_string(),
            entry_name: archive.metadata.entry_name.clone(),
            entry_type: archive.metadata.entry_type.clone(),
            lab_ids: archive.metadata.lab_ids.clone(),
            lab_id_root: archive.metadata.lab_id_root.clone(),
        }
    }

    pub fn to_reference(&self) -> EntityReference {
        EntityReference {
            lab_id: self.lab_ids.first().cloned(),
            upload_id: Some(self.upload_id.clone()),
            entry_id: Some(self.entry_id.clone()),
            display_name: Some(self.entry_name.clone()),
        }
    }
}

/// Stable entry id for an archive written under `name` in `upload_id`.
pub fn derive_entry_id(upload_id: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(upload_id.as_bytes());
    hasher.update(b"/");
    hasher.update(name.as_bytes());
    hasher
        .finalize()
        .iter()
        .take(14)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Applies a query and a page window to an iterator of candidate headers.
pub fn paginate<'a>(
    candidates: impl Iterator<Item = &'a RecordHeader>,
    query: &SearchQuery,
    page: &Pagination,
) -> Vec<RecordHeader> {
    candidates
        .filter(|h| query.matches(h))
        .skip(page.offset)
        .take(page.page_size)
        .cloned()
        .collect()
}

pub trait UploadContext {
    fn upload_id(&self) -> &str;
    fn main_author(&self) -> Option<&str>;
    fn user(&self) -> Option<&str>;

    fn read_raw_file(&self, name: &str) -> Result<Vec<u8>, EchemError>;
    /// Writes a derived raw file, replacing any previous content.
    fn write_raw_file(&self, name: &str, bytes: &[u8]) -> Result<(), EchemError>;
    fn raw_file_names(&self) -> Vec<String>;

    /// Persists `archive` under `name`; returns whether a new file was created.
    /// An existing archive is only replaced when `overwrite` is set.
    fn write_archive(&self, name: &str, archive: &ArchiveFile, overwrite: bool)
        -> Result<bool, EchemError>;
    fn read_archive(&self, name: &str) -> Result<Option<ArchiveFile>, EchemError>;

    fn entry_id_from_name(&self, name: &str) -> String {
        derive_entry_id(self.upload_id(), name)
    }

    fn search(&self, query: &SearchQuery, page: &Pagination)
        -> Result<Vec<RecordHeader>, EchemError>;

    fn make_reference(&self, upload_id: &str, entry_id: &str) -> EntityReference {
        EntityReference::to_entry(upload_id, entry_id)
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An upload held entirely in memory, with an optional index of records from other uploads.
#[derive(Debug, Default)]
pub struct InMemoryUpload {
    upload_id: String,
    main_author: Option<String>,
    user: Option<String>,
    raw_files: Mutex<BTreeMap<String, Vec<u8>>>,
    archives: Mutex<BTreeMap<String, ArchiveFile>>,
    foreign: Mutex<Vec<RecordHeader>>,
    cancelled: AtomicBool,
}

impl InMemoryUpload {
    pub fn new(upload_id: &str) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.main_author = Some(author.to_string());
        self.user = Some(author.to_string());
        self
    }

    pub fn with_raw_file(self, name: &str, bytes: impl Into<Vec<u8>>) -> Self {
        locked(&self.raw_files).insert(name.to_string(), bytes.into());
        self
    }

    /// Registers a record that lives in another upload so searches can find it.
    pub fn with_foreign_record(self, upload_id: &str, name: &str, archive: &ArchiveFile) -> Self {
        let entry_id = derive_entry_id(upload_id, name);
        locked(&self.foreign).push(RecordHeader::from_archive(upload_id, &entry_id, archive));
        self
    }

    pub fn archive(&self, name: &str) -> Option<ArchiveFile> {
        locked(&self.archives).get(name).cloned()
    }

    pub fn archive_names(&self) -> Vec<String> {
        locked(&self.archives).keys().cloned().collect()
    }

    pub fn raw_file(&self, name: &str) -> Option<Vec<u8>> {
        locked(&self.raw_files).get(name).cloned()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl UploadContext for InMemoryUpload {
    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn main_author(&self) -> Option<&str> {
        self.main_author.as_deref()
    }

    fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn read_raw_file(&self, name: &str) -> Result<Vec<u8>, EchemError> {
        locked(&self.raw_files).get(name).cloned().ok_or_else(|| {
            EchemError::UploadIO(
                name.to_string(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such raw file"),
            )
        })
    }

    fn write_raw_file(&self, name: &str, bytes: &[u8]) -> Result<(), EchemError> {
        locked(&self.raw_files).insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn raw_file_names(&self) -> Vec<String> {
        locked(&self.raw_files).keys().cloned().collect()
    }

    fn write_archive(
        &self,
        name: &str,
        archive: &ArchiveFile,
        overwrite: bool,
    ) -> Result<bool, EchemError> {
        let mut archives = locked(&self.archives);
        let exists = archives.contains_key(name);
        if exists && !overwrite {
            return Ok(false);
        }
        archives.insert(name.to_string(), archive.clone());
        Ok(!exists)
    }

    fn read_archive(&self, name: &str) -> Result<Option<ArchiveFile>, EchemError> {
        Ok(locked(&self.archives).get(name).cloned())
    }

    fn search(
        &self,
        query: &SearchQuery,
        page: &Pagination,
    ) -> Result<Vec<RecordHeader>, EchemError> {
        let mut headers: Vec<RecordHeader> = locked(&self.archives)
            .iter()
            .map(|(name, archive)| {
                RecordHeader::from_archive(&self.upload_id, &self.entry_id_from_name(name), archive)
            })
            .collect();
        headers.extend(locked(&self.foreign).iter().cloned());
        Ok(paginate(headers.iter(), query, page))
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
