//! Per-page artifact reuse.
//!
//! Every derived artifact belongs to one page id and is keyed by the page's
//! stroke hash and backing index. The prior run's [`DocumentRecord`] is the
//! only source of truth: an artifact is reused when its record still matches
//! the page and the file it points at is still on disk. Matching is always
//! by page id; ordinals shift when pages are inserted or reordered, so a
//! reused artifact whose name carries a stale ordinal is renamed. Renames
//! and deletions only happen once a build has succeeded, so a failed build
//! leaves every file the retained record points at where it was.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::metadata::{DocumentRecord, PageRecord};
use crate::models::{artifact_stem, page_id_from_artifact, RawPage};

/// Per-page renders and OCR results.
pub const RENDER_DIR: &str = "rm_output";
pub const THUMBNAIL_DIR: &str = "thumbnails";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    PageRender,
    RecognizedText,
    Thumbnail,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::PageRender,
        ArtifactKind::RecognizedText,
        ArtifactKind::Thumbnail,
    ];

    pub fn dir(self) -> &'static str {
        match self {
            ArtifactKind::PageRender | ArtifactKind::RecognizedText => RENDER_DIR,
            ArtifactKind::Thumbnail => THUMBNAIL_DIR,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::PageRender => "pdf",
            ArtifactKind::RecognizedText => "ocr.json",
            ArtifactKind::Thumbnail => "png",
        }
    }

    /// Path of this artifact for `page`, relative to the document directory.
    pub fn relative_path(self, page: &RawPage) -> PathBuf {
        Path::new(self.dir()).join(format!("{}.{}", page.artifact_stem(), self.extension()))
    }

    /// The kind of an artifact file found in `dir`, by its extension.
    pub fn from_file_name(dir: &str, name: &str) -> Option<ArtifactKind> {
        ArtifactKind::ALL.into_iter().find(|k| {
            k.dir() == dir
                && name.ends_with(&format!(".{}", k.extension()))
                && !(*k == ArtifactKind::PageRender && name.ends_with(".ocr.json"))
        })
    }

    /// The path a page record holds for this kind.
    pub fn recorded(self, record: &PageRecord) -> Option<&Path> {
        match self {
            ArtifactKind::PageRender => record.render_path.as_deref(),
            ArtifactKind::RecognizedText => record.ocr_path.as_deref(),
            ArtifactKind::Thumbnail => record.thumbnail_path.as_deref(),
        }
    }
}

/// Reuse decisions for one document directory.
#[derive(Debug)]
pub struct ArtifactCache {
    doc_dir: PathBuf,
    previous: HashMap<String, PageRecord>,
}

impl ArtifactCache {
    pub fn new(doc_dir: impl Into<PathBuf>, prior: Option<&DocumentRecord>) -> Self {
        let previous = prior
            .map(|doc| {
                doc.pages
                    .iter()
                    .map(|p| (p.page_id.clone(), p.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            doc_dir: doc_dir.into(),
            previous,
        }
    }

    pub fn doc_dir(&self) -> &Path {
        &self.doc_dir
    }

    /// The prior record of a page, by id.
    pub fn previous(&self, page_id: &str) -> Option<&PageRecord> {
        self.previous.get(page_id)
    }

    /// Whether the artifact of `kind` recorded in `old` can stand in for a
    /// fresh one. A missing file is a plain miss.
    pub fn is_reusable(
        &self,
        old: Option<&PageRecord>,
        kind: ArtifactKind,
        current_hash: Option<&str>,
        current_backing: Option<u32>,
    ) -> bool {
        let Some(old) = old else {
            return false;
        };
        // Nothing identifies the content of a blank inserted page.
        if current_backing.is_none() && old.content_hash.is_none() {
            return false;
        }
        if old.content_hash.as_deref() != current_hash || old.backing_index != current_backing {
            return false;
        }
        match kind.recorded(old) {
            Some(rel) => self.doc_dir.join(rel).is_file(),
            None => false,
        }
    }

    /// Take over a reusable artifact for `page`. Nothing moves yet: the
    /// returned [`Adoption`] says where the file is now and which name it
    /// takes once the build is committed.
    pub fn adopt(&self, old: &PageRecord, kind: ArtifactKind, page: &RawPage) -> Option<Adoption> {
        let recorded = kind.recorded(old)?;
        Some(Adoption {
            from: recorded.to_path_buf(),
            to: kind.relative_path(page),
        })
    }

    /// Move adopted artifacts to their current names.
    pub fn commit(&self, adoptions: &[Adoption]) -> io::Result<()> {
        for adoption in adoptions.iter().filter(|a| a.is_rename()) {
            let from = self.doc_dir.join(&adoption.from);
            let to = self.doc_dir.join(&adoption.to);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&from, &to)?;
            tracing::debug!(from = %from.display(), to = %to.display(), "renamed reused artifact");
        }
        Ok(())
    }

    /// Delete orphaned artifact files: files whose page id is not in the new
    /// page set, and stale-ordinal copies of a live page once a file under
    /// the page's current name exists. Anything else is left alone, so an
    /// artifact the new records do not reference (an OCR result while
    /// recognition is off) survives for a later build. Returns the removed
    /// paths, relative to the document directory.
    pub fn reconcile(&self, live: &[PageRecord]) -> io::Result<Vec<PathBuf>> {
        let stems: HashMap<&str, String> = live
            .iter()
            .map(|p| (p.page_id.as_str(), artifact_stem(p.index, &p.page_id)))
            .collect();

        let mut removed = Vec::new();
        for dir in [RENDER_DIR, THUMBNAIL_DIR] {
            let abs = self.doc_dir.join(dir);
            if !abs.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&abs)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                let rel = Path::new(dir).join(&name);
                let orphan = match page_id_from_artifact(&name).and_then(|id| stems.get(id)) {
                    None => true,
                    Some(stem) => match ArtifactKind::from_file_name(dir, &name) {
                        Some(kind) => {
                            let current = Path::new(dir).join(format!("{}.{}", stem, kind.extension()));
                            current != rel && self.doc_dir.join(&current).is_file()
                        }
                        None => false,
                    },
                };
                if orphan {
                    fs::remove_file(entry.path())?;
                    removed.push(rel);
                }
            }
        }
        removed.sort();
        Ok(removed)
    }
}

/// A reused artifact: where it is, and the name it takes on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adoption {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl Adoption {
    pub fn is_rename(&self) -> bool {
        self.from != self.to
    }
}

/// Move a renamed document's whole output directory. An existing directory
/// at the destination is replaced.
pub fn relocate_document_dir(output_root: &Path, from: &str, to: &str) -> io::Result<()> {
    if from == to {
        return Ok(());
    }
    let src = output_root.join(from);
    let dst = output_root.join(to);
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("output directory missing: {}", src.display()),
        ));
    }
    if dst.exists() {
        fs::remove_dir_all(&dst)?;
    }
    fs::rename(&src, &dst)
}
