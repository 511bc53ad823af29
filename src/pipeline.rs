//! Builds one document's output directory.
//!
//! ```text
//! <doc>/
//! ├── xochitl/            copy of the raw source files
//! ├── out.pdf             rendered document with the recognized-text layer
//! ├── search_index.json
//! ├── rm_output/          "{i} - {page}.pdf", "{i} - {page}.ocr.json"
//! └── thumbnails/         "{i} - {page}.png"
//! ```
//!
//! Per-page artifacts go through the [`ArtifactCache`]; everything else is
//! rebuilt whenever the document is. Failures below the page level (one
//! page render, one OCR call, one thumbnail) are logged and leave that
//! artifact out; only a missing `out.pdf` or an I/O / PDF error on the
//! document itself aborts the build. An aborted build leaves the previous
//! `out.pdf`, mirror and artifact names untouched.

use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::cache::{Adoption, ArtifactCache, ArtifactKind, RENDER_DIR, THUMBNAIL_DIR};
use crate::config::{Config, ThumbnailConfig};
use crate::error::{BuildError, BuildResult, RenderError};
use crate::metadata::{BuildFlags, BuildStatus, DocumentRecord, PageRecord};
use crate::models::{RawPage, SourceItem};
use crate::ocr::{recognize_page, OcrEngine, OcrOutcome, OcrRecord, OcrRequest};
use crate::overlay::RenderedDocument;
use crate::pdf::{self, MediaBox};
use crate::render::{DocumentSource, PageSize, Renderer};
use crate::search_index::SEARCH_INDEX_FILE;
use crate::thumbnails::write_thumbnail;

pub const MIRROR_DIR: &str = "xochitl";
pub const OUTPUT_PDF: &str = "out.pdf";
/// Name prefix of the per-build staging directory inside a document directory.
pub const STAGING_PREFIX: &str = ".build-";

/// Settings that shape a build.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub flags: BuildFlags,
    pub ocr_language: String,
    pub ocr_dpi: u32,
    pub thumbnails: ThumbnailConfig,
}

impl PipelineOptions {
    pub fn from_config(config: &Config, flags: BuildFlags) -> Self {
        Self {
            flags,
            ocr_language: config.ocr.language.clone(),
            ocr_dpi: config.ocr.dpi,
            thumbnails: config.thumbnails.clone(),
        }
    }
}

/// Counters for one document build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub pages_rendered: usize,
    pub pages_recognized: usize,
    pub thumbnails_written: usize,
    /// Artifacts taken over from the previous build.
    pub artifacts_reused: usize,
    pub ocr_unavailable: usize,
    pub words_placed: usize,
    pub words_rotated: usize,
    pub words_skipped: usize,
    pub artifacts_removed: usize,
}

#[derive(Debug, Clone)]
pub struct DocumentBuild {
    pub record: DocumentRecord,
    pub report: BuildReport,
}

pub struct PageBuildPipeline<'a> {
    renderer: &'a dyn Renderer,
    ocr: Option<&'a dyn OcrEngine>,
    options: &'a PipelineOptions,
}

/// Artifact paths chosen for one page during a build. Paths are the names
/// the artifacts carry once the build is committed.
#[derive(Debug, Default)]
struct PageArtifacts {
    render: Option<PathBuf>,
    ocr: Option<PathBuf>,
    thumbnail: Option<PathBuf>,
    record: Option<OcrRecord>,
    adoptions: Vec<Adoption>,
}

impl<'a> PageBuildPipeline<'a> {
    pub fn new(
        renderer: &'a dyn Renderer,
        ocr: Option<&'a dyn OcrEngine>,
        options: &'a PipelineOptions,
    ) -> Self {
        Self {
            renderer,
            ocr,
            options,
        }
    }

    /// Build `item` into `output_root/output_dir`, reusing what `prior`
    /// describes where it still matches.
    ///
    /// The document and the source mirror are built in a staging directory
    /// and swapped in at the end, and reused artifacts only move to their
    /// new names then. Until that point every file `prior` points at stays
    /// where it is, so a failed build can keep the prior record.
    pub fn build(
        &self,
        item: &SourceItem,
        output_root: &Path,
        output_dir: &str,
        prior: Option<&DocumentRecord>,
        status: BuildStatus,
    ) -> BuildResult<DocumentBuild> {
        let doc_dir = output_root.join(output_dir);
        for dir in [RENDER_DIR, THUMBNAIL_DIR] {
            let path = doc_dir.join(dir);
            fs::create_dir_all(&path).map_err(|e| BuildError::io(&path, e))?;
        }

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&doc_dir)
            .map_err(|e| BuildError::io(&doc_dir, e))?;
        let staged_mirror = staging.path().join(MIRROR_DIR);
        mirror_sources(&item.files, &staged_mirror)?;

        let staged_pdf = staging.path().join(OUTPUT_PDF);
        self.render_document(item, &staged_mirror, &staged_pdf)?;

        let backing_boxes = backing_page_boxes(item);
        let cache = ArtifactCache::new(&doc_dir, prior);
        let mut report = BuildReport::default();

        let mut artifacts = Vec::with_capacity(item.pages.len());
        for page in &item.pages {
            let built = self.build_page(&cache, page, &backing_boxes, &staged_pdf, &mut report)?;
            artifacts.push(built);
        }

        // Index the rendered text before the overlay touches the file.
        let rendered = RenderedDocument::open(&staged_pdf)?;
        if rendered.page_count() != item.pages.len() {
            tracing::warn!(
                document = %item.name,
                rendered = rendered.page_count(),
                expected = item.pages.len(),
                "rendered page count differs from the page list"
            );
        }
        let recognized: BTreeMap<usize, String> = artifacts
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.record.as_ref().map(|r| (i, r.full_text())))
            .collect();
        let (index, indexed) = rendered.index(&recognized);

        let overlays: Vec<(usize, &OcrRecord)> = artifacts
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.record.as_ref().map(|r| (i, r)))
            .collect();
        let stitched = indexed.stitch(&overlays, self.options.flags.debug_overlay)?;
        report.words_placed = stitched.words_placed();
        report.words_rotated = stitched.rotated;
        report.words_skipped = stitched.skipped;

        // Commit.
        let out_pdf = doc_dir.join(OUTPUT_PDF);
        fs::rename(&staged_pdf, &out_pdf).map_err(|e| BuildError::io(&out_pdf, e))?;
        let mirror = doc_dir.join(MIRROR_DIR);
        if mirror.exists() {
            fs::remove_dir_all(&mirror).map_err(|e| BuildError::io(&mirror, e))?;
        }
        fs::rename(&staged_mirror, &mirror).map_err(|e| BuildError::io(&mirror, e))?;
        let adoptions: Vec<Adoption> = artifacts
            .iter_mut()
            .flat_map(|a| std::mem::take(&mut a.adoptions))
            .collect();
        cache
            .commit(&adoptions)
            .map_err(|e| BuildError::io(&doc_dir, e))?;
        index.save(&doc_dir.join(SEARCH_INDEX_FILE))?;

        let pages: Vec<PageRecord> = item
            .pages
            .iter()
            .zip(artifacts)
            .map(|(page, a)| PageRecord {
                page_id: page.id.clone(),
                index: page.index,
                content_hash: page.content_hash.clone(),
                backing_index: page.backing_index,
                render_path: a.render,
                ocr_path: a.ocr,
                thumbnail_path: a.thumbnail,
                words_placed: stitched.placed_on(page.index),
            })
            .collect();

        let removed = cache
            .reconcile(&pages)
            .map_err(|e| BuildError::io(&doc_dir, e))?;
        for path in &removed {
            tracing::debug!(document = %item.name, path = %path.display(), "removed stale artifact");
        }
        report.artifacts_removed = removed.len();

        let record = DocumentRecord {
            id: item.id.clone(),
            name: item.name.clone(),
            parent: item.parent.clone(),
            output_dir: output_dir.to_string(),
            content_hash: item.content_hash.clone(),
            build_flags: self.options.flags,
            total_pages: pages.len(),
            pages,
            last_opened_page: item.last_opened_page,
            status,
            built_at: Utc::now(),
        };
        Ok(DocumentBuild { record, report })
    }

    fn render_document(&self, item: &SourceItem, mirror: &Path, dest: &Path) -> BuildResult<()> {
        let source = DocumentSource {
            item,
            source_dir: mirror,
        };
        let produced = |p: &Path| fs::metadata(p).map(|m| m.is_file() && m.len() > 0).unwrap_or(false);
        match self.renderer.render_document(&source, dest) {
            Ok(()) if produced(dest) => Ok(()),
            Ok(()) | Err(RenderError::NoOutput(_)) => Err(BuildError::NoOutput {
                name: item.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Render, recognize and thumbnail one page. `document_pdf` is the
    /// staged rendering of the whole document.
    fn build_page(
        &self,
        cache: &ArtifactCache,
        page: &RawPage,
        backing_boxes: &[MediaBox],
        document_pdf: &Path,
        report: &mut BuildReport,
    ) -> BuildResult<PageArtifacts> {
        let old = cache.previous(&page.id);
        let doc_dir = cache.doc_dir();
        let mut built = PageArtifacts::default();

        // Page render. `render_at` is where the file is during this build.
        let mut render_at: Option<PathBuf> = None;
        if let Some(stroke) = &page.source {
            if let Some(adoption) = carry(cache, old, ArtifactKind::PageRender, page, &mut built, report) {
                render_at = Some(adoption.from);
                built.render = Some(adoption.to);
            } else {
                let rel = ArtifactKind::PageRender.relative_path(page);
                let size = page
                    .backing_index
                    .and_then(|i| backing_boxes.get(i as usize))
                    .map(|b| PageSize::new(b.width(), b.height()))
                    .unwrap_or(PageSize::DEVICE);
                match self.renderer.render_page(stroke, size, &doc_dir.join(&rel)) {
                    Ok(()) => {
                        report.pages_rendered += 1;
                        render_at = Some(rel.clone());
                        built.render = Some(rel);
                    }
                    Err(e) => tracing::warn!(page = %page.id, error = %e, "page render failed"),
                }
            }
        }

        // Recognition
        let engine = if self.options.flags.ocr { self.ocr } else { None };
        let outcome = match engine {
            Some(engine) => {
                let render_pdf = render_at.as_ref().map(|rel| doc_dir.join(rel));
                self.recognize(cache, old, page, engine, render_pdf.as_deref(), &mut built, report)
            }
            None => OcrOutcome::Skipped,
        };
        match outcome {
            OcrOutcome::Recognized(record) => {
                let rel = ArtifactKind::RecognizedText.relative_path(page);
                record.save(&doc_dir.join(&rel))?;
                report.pages_recognized += 1;
                built.ocr = Some(rel);
                built.record = Some(record);
            }
            OcrOutcome::Reused(record) => {
                built.record = Some(record);
            }
            OcrOutcome::Unavailable(reason) => {
                tracing::warn!(page = %page.id, %reason, "OCR unavailable, page gets no text layer");
                report.ocr_unavailable += 1;
            }
            OcrOutcome::Skipped => {
                // Keep a still-valid result for a later build with recognition on.
                let carried = carry(cache, old, ArtifactKind::RecognizedText, page, &mut built, report);
                built.ocr = carried.map(|a| a.to);
            }
        }

        // Thumbnail
        if let Some(adoption) = carry(cache, old, ArtifactKind::Thumbnail, page, &mut built, report) {
            built.thumbnail = Some(adoption.to);
        } else {
            let rel = ArtifactKind::Thumbnail.relative_path(page);
            match write_thumbnail(
                self.renderer,
                document_pdf,
                page.index,
                &self.options.thumbnails,
                &doc_dir.join(&rel),
            ) {
                Ok(()) => {
                    report.thumbnails_written += 1;
                    built.thumbnail = Some(rel);
                }
                Err(e) => tracing::warn!(page = %page.id, error = %e, "thumbnail failed"),
            }
        }

        Ok(built)
    }

    /// Reuse the page's OCR result when it still matches, otherwise
    /// recognize `render_pdf`. A page without a render is skipped.
    #[allow(clippy::too_many_arguments)]
    fn recognize(
        &self,
        cache: &ArtifactCache,
        old: Option<&PageRecord>,
        page: &RawPage,
        engine: &dyn OcrEngine,
        render_pdf: Option<&Path>,
        built: &mut PageArtifacts,
        report: &mut BuildReport,
    ) -> OcrOutcome {
        let kind = ArtifactKind::RecognizedText;
        if let Some(prev) = reusable(cache, old, kind, page) {
            let cached = kind
                .recorded(prev)
                .map(|rel| OcrRecord::load(&cache.doc_dir().join(rel)));
            match cached {
                Some(Ok(record)) => {
                    let carried = carry(cache, old, kind, page, built, report);
                    built.ocr = carried.map(|a| a.to);
                    return OcrOutcome::Reused(record);
                }
                Some(Err(e)) => {
                    tracing::warn!(page = %page.id, error = %e, "cached OCR record unreadable, recognizing again");
                }
                None => {}
            }
        }
        let Some(render_pdf) = render_pdf else {
            return OcrOutcome::Skipped;
        };
        let request = OcrRequest {
            language: &self.options.ocr_language,
            dpi: self.options.ocr_dpi,
        };
        recognize_page(self.renderer, engine, render_pdf, page, &request)
    }
}

/// The prior record of `page` when its artifact of `kind` can be reused.
fn reusable<'r>(
    cache: &ArtifactCache,
    old: Option<&'r PageRecord>,
    kind: ArtifactKind,
    page: &RawPage,
) -> Option<&'r PageRecord> {
    old.filter(|o| cache.is_reusable(Some(*o), kind, page.content_hash.as_deref(), page.backing_index))
}

/// Take over the prior artifact of `kind` when it is reusable. The rename
/// to the page's current name is queued on `built`.
fn carry(
    cache: &ArtifactCache,
    old: Option<&PageRecord>,
    kind: ArtifactKind,
    page: &RawPage,
    built: &mut PageArtifacts,
    report: &mut BuildReport,
) -> Option<Adoption> {
    let old = reusable(cache, old, kind, page)?;
    let adoption = cache.adopt(old, kind, page)?;
    report.artifacts_reused += 1;
    built.adoptions.push(adoption.clone());
    Some(adoption)
}

/// MediaBoxes of the backing document, empty when there is none or it
/// cannot be read.
fn backing_page_boxes(item: &SourceItem) -> Vec<MediaBox> {
    let Some(backing) = &item.backing_pdf else {
        return Vec::new();
    };
    match pdf::page_boxes(backing) {
        Ok(boxes) => boxes,
        Err(e) => {
            tracing::warn!(document = %item.name, error = %e, "backing document unreadable, using device page size");
            Vec::new()
        }
    }
}

/// Replace `dest` with a copy of the item's raw files and directories.
pub fn mirror_sources(files: &[PathBuf], dest: &Path) -> BuildResult<()> {
    if dest.exists() {
        fs::remove_dir_all(dest).map_err(|e| BuildError::io(dest, e))?;
    }
    fs::create_dir_all(dest).map_err(|e| BuildError::io(dest, e))?;

    for src in files {
        let Some(name) = src.file_name() else {
            continue;
        };
        let target = dest.join(name);
        if src.is_dir() {
            for entry in WalkDir::new(src) {
                let entry = entry.map_err(|e| BuildError::io(src, e.into()))?;
                let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
                let to = target.join(rel);
                if entry.file_type().is_dir() {
                    fs::create_dir_all(&to).map_err(|e| BuildError::io(&to, e))?;
                } else {
                    fs::copy(entry.path(), &to).map_err(|e| BuildError::io(&to, e))?;
                }
            }
        } else if src.is_file() {
            fs::copy(src, &target).map_err(|e| BuildError::io(&target, e))?;
        }
    }
    Ok(())
}
