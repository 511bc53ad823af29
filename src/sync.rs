//! Whole-tree reconciliation.
//!
//! One run compares the source store against the previous run's
//! `metadata.json` and brings the output tree in line:
//!
//! 1. Take the output lock (`.inkmirror.lock`); a second run fails fast.
//! 2. Load the prior records. A missing file is a first run; an unreadable
//!    one is logged and treated as empty.
//! 3. Group the source by id and load each item on its own.
//! 4. Remove the output of every prior item that is gone or trashed.
//! 5. For each document, in id order: move its directory if the display
//!    name changed, then skip, build or rebuild it.
//! 6. Write `metadata.json` (atomically) and `errors.json`.
//!
//! Any error or panic while handling one item is recorded against that item
//! and its previous record is kept, so the next run tries again.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::cache::relocate_document_dir;
use crate::config::Config;
use crate::metadata::{
    self, BuildFlags, BuildStatus, DocumentRecord, ErrorEntry, FolderRecord, ItemRecord,
    ERRORS_FILE, METADATA_FILE,
};
use crate::models::{ItemKind, SourceItem};
use crate::ocr::OcrEngine;
use crate::pipeline::{PageBuildPipeline, PipelineOptions, OUTPUT_PDF};
use crate::render::Renderer;
use crate::scanner;

pub const LOCK_FILE: &str = ".inkmirror.lock";

/// Names under the output root that never belong to a document.
const RESERVED_NAMES: [&str; 3] = [METADATA_FILE, ERRORS_FILE, LOCK_FILE];

/// Where to read and write, and how to build.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub source: PathBuf,
    pub output: PathBuf,
    pub flags: BuildFlags,
}

/// What happened to one item during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemOutcome {
    Created,
    Modified,
    Unchanged,
    Renamed,
    Deleted,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub id: String,
    pub name: String,
    pub outcomes: Vec<ItemOutcome>,
}

/// Result of one run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub items: Vec<ItemReport>,
    pub errors: Vec<ErrorEntry>,
    pub words_placed: usize,
    pub pages_rendered: usize,
    pub pages_recognized: usize,
    pub artifacts_reused: usize,
}

impl SyncReport {
    pub fn count(&self, outcome: ItemOutcome) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcomes.contains(&outcome))
            .count()
    }

    /// Outcomes of one item, by id.
    pub fn outcomes_of(&self, id: &str) -> &[ItemOutcome] {
        self.items
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.outcomes.as_slice())
            .unwrap_or(&[])
    }

    fn push(&mut self, id: &str, name: &str, outcome: ItemOutcome) {
        tracing::info!(%id, %name, ?outcome, "item");
        match self.items.iter_mut().find(|i| i.id == id) {
            Some(existing) => existing.outcomes.push(outcome),
            None => self.items.push(ItemReport {
                id: id.to_string(),
                name: name.to_string(),
                outcomes: vec![outcome],
            }),
        }
    }

    fn fail(&mut self, id: &str, name: &str, error: String) {
        tracing::error!(%id, %name, %error, "item failed");
        self.push(id, name, ItemOutcome::Failed);
        self.errors.push(ErrorEntry {
            name: name.to_string(),
            id: id.to_string(),
            error,
        });
    }
}

/// Holds the exclusive lock on an output root until dropped.
pub struct OutputLock {
    file: File,
}

impl OutputLock {
    pub fn acquire(output: &Path) -> Result<Self> {
        let path = output.join(LOCK_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        file.try_lock_exclusive().with_context(|| {
            format!("Another sync is already running on {}", output.display())
        })?;
        Ok(Self { file })
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Run one sync over `options.source` into `options.output`.
#[tracing::instrument(skip_all, fields(source = %options.source.display(), output = %options.output.display()))]
pub fn run_sync(
    config: &Config,
    options: &SyncOptions,
    renderer: &dyn Renderer,
    ocr: Option<&dyn OcrEngine>,
) -> Result<SyncReport> {
    let output = &options.output;
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory: {}", output.display()))?;
    let _lock = OutputLock::acquire(output)?;

    let metadata_path = output.join(METADATA_FILE);
    let prior: BTreeMap<String, ItemRecord> = match metadata::load_records(&metadata_path) {
        Ok(records) => records.into_iter().map(|r| (r.id().to_string(), r)).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "previous metadata unreadable, rebuilding everything");
            BTreeMap::new()
        }
    };

    let groups = scanner::group_source(&options.source)?;
    let mut report = SyncReport::default();
    let mut records: BTreeMap<String, ItemRecord> = BTreeMap::new();

    // Load every item; failures keep their prior record and stay "present".
    let mut present: HashSet<String> = HashSet::new();
    let mut items: Vec<SourceItem> = Vec::new();
    for (id, files) in &groups {
        let loaded = guarded(|| scanner::load_item(&options.source, id, files));
        match loaded {
            Ok(item) if item.is_empty() => report.push(id, &item.name, ItemOutcome::Skipped),
            Ok(item) if item.is_trashed() => {
                tracing::debug!(%id, name = %item.name, "trashed");
            }
            Ok(item) => {
                present.insert(id.clone());
                items.push(item);
            }
            Err(error) => {
                let name = scanner::try_display_name(files).unwrap_or_default();
                report.fail(id, &name, error);
                present.insert(id.clone());
                if let Some(old) = prior.get(id) {
                    records.insert(id.clone(), old.clone());
                }
            }
        }
    }

    remove_absent(output, &prior, &present, &mut report);

    let mut flags = options.flags;
    flags.ocr = flags.ocr && ocr.is_some();
    let pipeline_options = PipelineOptions::from_config(config, flags);
    let pipeline = PageBuildPipeline::new(renderer, ocr, &pipeline_options);

    let mut claims = DirClaims::new(&prior, &present);

    for item in &items {
        let old = prior.get(&item.id);
        match item.kind {
            ItemKind::Folder => {
                let outcome = if old.is_some() {
                    ItemOutcome::Unchanged
                } else {
                    ItemOutcome::Created
                };
                report.push(&item.id, &item.name, outcome);
                records.insert(
                    item.id.clone(),
                    ItemRecord::Folder(FolderRecord {
                        id: item.id.clone(),
                        name: item.name.clone(),
                        parent: item.parent.clone(),
                    }),
                );
            }
            ItemKind::Document => {
                let old_doc = old.and_then(ItemRecord::as_document);
                let dir = claims.claim(item);
                let result = guarded(|| {
                    sync_document(output, item, &dir, old_doc, flags, &pipeline, &mut report)
                });
                match result {
                    Ok(record) => {
                        report.words_placed += record.words_placed();
                        records.insert(item.id.clone(), ItemRecord::Document(record));
                    }
                    Err(error) => {
                        report.fail(&item.id, &item.name, error);
                        if let Some(old) = old_doc {
                            let mut kept = old.clone();
                            // the directory may already have moved
                            if output.join(&dir).is_dir() && !output.join(&old.output_dir).exists() {
                                kept.output_dir = dir.clone();
                            }
                            records.insert(item.id.clone(), ItemRecord::Document(kept));
                        }
                    }
                }
            }
        }
    }

    let records: Vec<ItemRecord> = records.into_values().collect();
    metadata::save_records(&metadata_path, &records)
        .with_context(|| format!("Failed to write {}", metadata_path.display()))?;
    metadata::write_errors(&output.join(ERRORS_FILE), &report.errors)
        .with_context(|| "Failed to write errors file")?;

    Ok(report)
}

/// Move, skip, build or rebuild one document. Returns its new record.
fn sync_document(
    output: &Path,
    item: &SourceItem,
    dir: &str,
    old: Option<&DocumentRecord>,
    flags: BuildFlags,
    pipeline: &PageBuildPipeline<'_>,
    report: &mut SyncReport,
) -> Result<DocumentRecord> {
    if let Some(old) = old {
        if old.output_dir != dir && output.join(&old.output_dir).is_dir() {
            relocate_document_dir(output, &old.output_dir, dir).with_context(|| {
                format!("Failed to move {} to {}", old.output_dir, dir)
            })?;
            report.push(&item.id, &item.name, ItemOutcome::Renamed);
        }
    }

    let status = match old {
        None => BuildStatus::Created,
        Some(old)
            if old.content_hash == item.content_hash
                && old.build_flags == flags
                && output.join(dir).join(OUTPUT_PDF).is_file() =>
        {
            report.push(&item.id, &item.name, ItemOutcome::Unchanged);
            let mut record = old.clone();
            record.name = item.name.clone();
            record.parent = item.parent.clone();
            record.output_dir = dir.to_string();
            record.last_opened_page = item.last_opened_page;
            record.status = BuildStatus::Unchanged;
            return Ok(record);
        }
        Some(_) => BuildStatus::Modified,
    };

    let build = pipeline.build(item, output, dir, old, status)?;
    let b = &build.report;
    tracing::info!(
        name = %item.name,
        rendered = b.pages_rendered,
        recognized = b.pages_recognized,
        reused = b.artifacts_reused,
        words = b.words_placed,
        rotated = b.words_rotated,
        removed = b.artifacts_removed,
        "built document"
    );
    report.pages_rendered += b.pages_rendered;
    report.pages_recognized += b.pages_recognized;
    report.artifacts_reused += b.artifacts_reused;
    report.push(
        &item.id,
        &item.name,
        match status {
            BuildStatus::Created => ItemOutcome::Created,
            _ => ItemOutcome::Modified,
        },
    );
    Ok(build.record)
}

/// Drop the output of prior items that are no longer present.
fn remove_absent(
    output: &Path,
    prior: &BTreeMap<String, ItemRecord>,
    present: &HashSet<String>,
    report: &mut SyncReport,
) {
    for (id, record) in prior {
        if present.contains(id) {
            continue;
        }
        if let ItemRecord::Document(doc) = record {
            let dir = output.join(&doc.output_dir);
            if dir.is_dir() {
                if let Err(e) = fs::remove_dir_all(&dir) {
                    report.fail(id, &doc.name, format!("Failed to remove {}: {}", dir.display(), e));
                    continue;
                }
            }
        }
        report.push(id, record.name(), ItemOutcome::Deleted);
    }
}

/// Output directory names handed out in this run.
struct DirClaims {
    owners: HashMap<String, String>,
}

impl DirClaims {
    /// Seed with the directories prior documents that are still present
    /// already occupy.
    fn new(prior: &BTreeMap<String, ItemRecord>, present: &HashSet<String>) -> Self {
        let owners = prior
            .values()
            .filter_map(ItemRecord::as_document)
            .filter(|d| present.contains(&d.id))
            .map(|d| (d.output_dir.clone(), d.id.clone()))
            .collect();
        Self { owners }
    }

    fn is_free(&self, dir: &str, id: &str) -> bool {
        !RESERVED_NAMES.contains(&dir) && self.owners.get(dir).map(|o| o == id).unwrap_or(true)
    }

    /// Pick the directory for `item` and record the claim.
    fn claim(&mut self, item: &SourceItem) -> String {
        let base = sanitize_dir_name(&item.name, &item.id);
        let short: String = item.id.chars().take(8).collect();
        let candidates = [
            base.clone(),
            format!("{} ({})", base, short),
            format!("{} ({})", base, item.id),
        ];
        let dir = candidates
            .iter()
            .find(|c| self.is_free(c, &item.id))
            .cloned()
            .unwrap_or_else(|| candidates[2].clone());
        self.owners.retain(|_, owner| owner != &item.id);
        self.owners.insert(dir.clone(), item.id.clone());
        dir
    }
}

/// Turn a display name into a single safe path component.
pub fn sanitize_dir_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_end_matches(['.', ' ']).to_string();
    if cleaned.is_empty() {
        return fallback.to_string();
    }
    if let Some(rest) = cleaned.strip_prefix('.') {
        return format!("_{}", rest);
    }
    cleaned
}

/// Run `f`, turning both errors and panics into a message.
fn guarded<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("panic: {}", msg))
        }
    }
}
