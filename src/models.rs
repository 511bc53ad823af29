//! Core data models shared by the scanner, the pipeline and the coordinator.
//!
//! These types describe what was found in the source store for the current
//! run. What was *built* in a previous run lives in [`crate::metadata`].

use std::path::PathBuf;

use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Parent id the source device uses for items in the trash.
pub const TRASH_PARENT: &str = "trash";

/// Whether a source item is a folder or a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    Document,
}

/// One folder or document in the source store, grouped by its id prefix.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Opaque id, stable across renames and moves.
    pub id: String,
    /// Display name (`visibleName`).
    pub name: String,
    pub parent: Option<String>,
    pub kind: ItemKind,
    /// Every raw file or directory whose name starts with the id, sorted.
    pub files: Vec<PathBuf>,
    /// Pages in display order. Empty for folders.
    pub pages: Vec<RawPage>,
    /// The backing reference document (`<id>.pdf`), if present.
    pub backing_pdf: Option<PathBuf>,
    /// Digest over the item's raw files, excluding the `.metadata` file.
    pub content_hash: String,
    /// 1-based index of the page the device last showed.
    pub last_opened_page: usize,
    pub has_metadata: bool,
    pub has_content: bool,
}

impl SourceItem {
    pub fn is_trashed(&self) -> bool {
        self.parent.as_deref() == Some(TRASH_PARENT)
    }

    /// An item with neither a `.metadata` nor a `.content` file carries no
    /// identity beyond its file names and is ignored.
    pub fn is_empty(&self) -> bool {
        !self.has_metadata && !self.has_content
    }
}

/// One page of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    /// Stable page id, unique within the document.
    pub id: String,
    /// 0-based ordinal position in the current run.
    pub index: usize,
    /// Page of the backing document this page overlays; `None` for inserted
    /// pages.
    pub backing_index: Option<u32>,
    /// The `.rm` stroke file, absent when nothing was written on the page.
    pub source: Option<PathBuf>,
    /// Digest of the stroke file's bytes.
    pub content_hash: Option<String>,
}

impl RawPage {
    /// Base file name shared by every artifact of this page.
    pub fn artifact_stem(&self) -> String {
        artifact_stem(self.index, &self.id)
    }
}

/// `"{index} - {page_id}"`, the naming scheme for per-page artifacts.
pub fn artifact_stem(index: usize, page_id: &str) -> String {
    format!("{} - {}", index, page_id)
}

/// Recover the owning page id from an artifact file name produced by
/// [`artifact_stem`] plus an extension (`"3 - abc.ocr.json"` → `"abc"`).
pub fn page_id_from_artifact(file_name: &str) -> Option<&str> {
    let (_, rest) = file_name.split_once(" - ")?;
    let id = rest.split('.').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Word quadrilateral in image pixels.
///
/// Vertex order follows the recognizer: start of text, end of text,
/// bottom near the end, bottom near the start.
#[derive(Debug, Clone, PartialEq)]
pub struct Quad {
    pub vertices: Vec<Point>,
}

/// A recognized word with its bounding quadrilateral.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedWord {
    pub text: String,
    pub quad: Quad,
}
