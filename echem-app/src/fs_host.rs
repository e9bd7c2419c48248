//! A directory-backed upload.
//!
//! Raw files are every regular file below the upload root. Archives live under
//! `<root>/.archives/<name>` as pretty-printed JSON, mirroring the raw file layout.

use echem_core::{
    host::{paginate, derive_entry_id, Pagination, RecordHeader, SearchQuery},
    EchemError, UploadContext,
};
use echem_schemas::archive::ArchiveFile;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

pub const ARCHIVE_DIR: &str = ".archives";

/// Relative, '/'-separated name of `path` below `root`.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn io_error(name: &str) -> impl FnOnce(std::io::Error) -> EchemError + '_ {
    move |e| EchemError::UploadIO(name.to_string(), e)
}

/// Reads every `*.archive.json` below `dir`, keyed by its name relative to `dir`.
/// A missing directory is an empty upload.
pub fn read_archive_dir(dir: &Path) -> Result<BTreeMap<String, ArchiveFile>, EchemError> {
    let mut archives = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(archives);
    }
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let name = e.path().map(|p| p.display().to_string()).unwrap_or_default();
            EchemError::UploadIO(name, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = relative_name(dir, entry.path()) else {
            continue;
        };
        if !name.ends_with(".archive.json") {
            continue;
        }
        let text = fs::read_to_string(entry.path()).map_err(io_error(&name))?;
        archives.insert(name, ArchiveFile::from_json(&text)?);
    }
    Ok(archives)
}

/// Search headers for every archive of the upload rooted at `root`.
pub fn upload_headers(upload_id: &str, root: &Path) -> Result<Vec<RecordHeader>, EchemError> {
    Ok(read_archive_dir(&root.join(ARCHIVE_DIR))?
        .iter()
        .map(|(name, archive)| {
            RecordHeader::from_archive(upload_id, &derive_entry_id(upload_id, name), archive)
        })
        .collect())
}

pub struct FsUpload {
    root: PathBuf,
    upload_id: String,
    main_author: Option<String>,
    user: Option<String>,
    foreign: Vec<RecordHeader>,
    cancelled: AtomicBool,
}

impl FsUpload {
    pub fn new(root: impl Into<PathBuf>, upload_id: &str) -> Self {
        Self {
            root: root.into(),
            upload_id: upload_id.to_string(),
            main_author: None,
            user: None,
            foreign: Vec::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_author(mut self, main_author: Option<String>, user: Option<String>) -> Self {
        self.main_author = main_author;
        self.user = user.or_else(|| self.main_author.clone());
        self
    }

    /// Makes records of other uploads visible to searches.
    pub fn with_index(mut self, headers: Vec<RecordHeader>) -> Self {
        self.foreign = headers;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.archive_dir().join(name)
    }

    pub fn archive_names(&self) -> Result<Vec<String>, EchemError> {
        Ok(read_archive_dir(&self.archive_dir())?.into_keys().collect())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl UploadContext for FsUpload {
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
        fs::read(self.root.join(name)).map_err(io_error(name))
    }

    fn write_raw_file(&self, name: &str, bytes: &[u8]) -> Result<(), EchemError> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(name))?;
        }
        fs::write(&path, bytes).map_err(io_error(name))
    }

    fn raw_file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || e.file_name() != ARCHIVE_DIR)
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping unreadable path in upload: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| relative_name(&self.root, e.path()))
            .collect();
        names.sort();
        names
    }

    fn write_archive(
        &self,
        name: &str,
        archive: &ArchiveFile,
        overwrite: bool,
    ) -> Result<bool, EchemError> {
        let path = self.archive_path(name);
        let exists = path.is_file();
        if exists && !overwrite {
            log::debug!("Archive '{}' exists, leaving it untouched", name);
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(name))?;
        }
        fs::write(&path, archive.to_json()?).map_err(io_error(name))?;
        Ok(!exists)
    }

    fn read_archive(&self, name: &str) -> Result<Option<ArchiveFile>, EchemError> {
        let path = self.archive_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(io_error(name))?;
        Ok(Some(ArchiveFile::from_json(&text)?))
    }

    fn search(
        &self,
        query: &SearchQuery,
        page: &Pagination,
    ) -> Result<Vec<RecordHeader>, EchemError> {
        let mut headers = upload_headers(&self.upload_id, &self.root)?;
        headers.extend(self.foreign.iter().cloned());
        Ok(paginate(headers.iter(), query, page))
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echem_schemas::{archive::Record, sample::Sample};

    fn sample(lab_id: &str) -> ArchiveFile {
        let mut archive = ArchiveFile::new(
            format!("{lab_id}.archive.json"),
            Record::Sample(Sample {
                lab_id: Some(lab_id.to_string()),
                ..Sample::default()
            }),
        );
        archive.metadata.lab_ids = vec![lab_id.to_string()];
        archive
    }

    #[test]
    fn test_archives_are_hidden_from_raw_files() {
        let dir = tempfile::tempdir().unwrap();
        let upload = FsUpload::new(dir.path(), "u1");
        upload.write_raw_file("data/cv.DTA", b"EXPLAIN").unwrap();
        let archive = sample("CE-NOME_AbCd_230314_0000");
        assert!(upload.write_archive("data/cv.DTA.archive.json", &archive, false).unwrap());
        assert!(!upload.write_archive("data/cv.DTA.archive.json", &archive, false).unwrap());

        assert_eq!(upload.raw_file_names(), vec!["data/cv.DTA".to_string()]);
        assert_eq!(upload.archive_names().unwrap(), vec!["data/cv.DTA.archive.json".to_string()]);
        assert_eq!(upload.read_archive("data/cv.DTA.archive.json").unwrap(), Some(archive));
        assert_eq!(upload.read_archive("missing.archive.json").unwrap(), None);
    }

    #[test]
    fn test_search_includes_index() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        FsUpload::new(other.path(), "u0")
            .write_archive("a.archive.json", &sample("HZB_AbCd_230314_0000"), false)
            .unwrap();
        let upload = FsUpload::new(dir.path(), "u1")
            .with_index(upload_headers("u0", other.path()).unwrap());
        upload
            .write_archive("b.archive.json", &sample("HZB_AbCd_230314_0001"), false)
            .unwrap();

        let all = upload.search(&SearchQuery::default(), &Pagination::first(10)).unwrap();
        assert_eq!(all.len(), 2);
        let hit = upload
            .search(&SearchQuery::by_lab_id("HZB_AbCd_230314_0000"), &Pagination::first(10))
            .unwrap();
        assert_eq!(hit[0].upload_id, "u0");
        assert_eq!(hit[0].entry_id, derive_entry_id("u0", "a.archive.json"));
    }
}
