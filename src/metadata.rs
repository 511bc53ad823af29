//! Run-level records: `metadata.json` and `errors.json`.
//!
//! `metadata.json` is the only memory between runs. Each entry describes one
//! folder or one successfully built document; the cache decisions of the next
//! run are made against it alone.
//!
//! ```json
//! [
//!   {"type": "folder", "id": "…", "name": "Work", "parent": null},
//!   {"type": "document", "id": "…", "name": "Notes", "output_dir": "Notes",
//!    "content_hash": "…", "pages": [ … ], "status": "created", …}
//! ]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::MetadataError;

pub const METADATA_FILE: &str = "metadata.json";
pub const ERRORS_FILE: &str = "errors.json";

/// One entry of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemRecord {
    Folder(FolderRecord),
    Document(DocumentRecord),
}

impl ItemRecord {
    pub fn id(&self) -> &str {
        match self {
            ItemRecord::Folder(f) => &f.id,
            ItemRecord::Document(d) => &d.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ItemRecord::Folder(f) => &f.name,
            ItemRecord::Document(d) => &d.name,
        }
    }

    pub fn as_document(&self) -> Option<&DocumentRecord> {
        match self {
            ItemRecord::Document(d) => Some(d),
            ItemRecord::Folder(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

/// Outcome recorded for the build that produced a document record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Created,
    Modified,
    Unchanged,
}

/// Options that change the built artifacts. A flag flip forces a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildFlags {
    pub ocr: bool,
    pub debug_overlay: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Directory name under the output root.
    pub output_dir: String,
    pub content_hash: String,
    #[serde(default)]
    pub build_flags: BuildFlags,
    #[serde(default)]
    pub pages: Vec<PageRecord>,
    #[serde(default = "first_page")]
    pub last_opened_page: usize,
    #[serde(default)]
    pub total_pages: usize,
    pub status: BuildStatus,
    pub built_at: DateTime<Utc>,
}

fn first_page() -> usize {
    1
}

impl DocumentRecord {
    pub fn words_placed(&self) -> usize {
        self.pages.iter().map(|p| p.words_placed).sum()
    }
}

/// Per-page entry. Artifact paths are relative to the document directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_id: String,
    pub index: usize,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub backing_index: Option<u32>,
    #[serde(default)]
    pub render_path: Option<PathBuf>,
    #[serde(default)]
    pub ocr_path: Option<PathBuf>,
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    #[serde(default)]
    pub words_placed: usize,
}

/// One entry of `errors.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub name: String,
    pub id: String,
    pub error: String,
}

/// Read `metadata.json`. A missing file is an empty history.
pub fn load_records(path: &Path) -> Result<Vec<ItemRecord>, MetadataError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path).map_err(|source| MetadataError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| MetadataError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_records(path: &Path, records: &[ItemRecord]) -> Result<(), MetadataError> {
    write_json_atomic(path, records)
}

/// Write `errors.json`, or remove a stale one when the run had no errors.
pub fn write_errors(path: &Path, errors: &[ErrorEntry]) -> Result<(), MetadataError> {
    if errors.is_empty() {
        return match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(MetadataError::Write {
                path: path.to_path_buf(),
                source,
            }),
        };
    }
    write_json_atomic(path, errors)
}

/// Serialize to a sibling temp file, then rename over the target.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), MetadataError> {
    let json = serde_json::to_vec_pretty(value)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| METADATA_FILE.to_string());
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&temp_path, &json).map_err(|source| MetadataError::Write {
        path: temp_path.clone(),
        source,
    })?;
    fs::rename(&temp_path, path).map_err(|source| MetadataError::Write {
        path: path.to_path_buf(),
        source,
    })
}
