//! End-to-end runs of the coordinator against a fake renderer and a fake
//! recognition service.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use image::RgbImage;
use lopdf::content::Content;
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::{json, Value};
use tempfile::TempDir;

use inkmirror::config::Config;
use inkmirror::error::RenderError;
use inkmirror::metadata::{self, BuildFlags, ItemRecord, ERRORS_FILE, METADATA_FILE};
use inkmirror::ocr::OcrEngine;
use inkmirror::pdf;
use inkmirror::pipeline;
use inkmirror::render::{DocumentSource, PageSize, Renderer};
use inkmirror::search_index::{SearchIndex, SEARCH_INDEX_FILE};
use inkmirror::sync::{self, ItemOutcome, OutputLock, SyncOptions, SyncReport};

// ── Fakes ──

fn write_pdf(path: &Path, pages: usize, size: PageSize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for _ in 0..pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(size.width_pt as f32),
                Object::Real(size.height_pt as f32),
            ],
        });
        kids.push(page_id.into());
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

#[derive(Default)]
struct FakeRenderer {
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    garbled: Mutex<HashSet<String>>,
    document_size: Mutex<Option<PageSize>>,
    documents: AtomicUsize,
    pages: AtomicUsize,
}

impl FakeRenderer {
    fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.garbled.lock().unwrap().clear();
    }

    /// Produce an `out.pdf` that is not a PDF.
    fn garble(&self, name: &str) {
        self.garbled.lock().unwrap().insert(name.to_string());
    }

    fn render_documents_at(&self, size: PageSize) {
        *self.document_size.lock().unwrap() = Some(size);
    }

    fn panic_on(&self, name: &str) {
        self.panicking.lock().unwrap().insert(name.to_string());
    }

    fn page_renders(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }
}

impl Renderer for FakeRenderer {
    fn render_document(&self, doc: &DocumentSource<'_>, dest: &Path) -> Result<(), RenderError> {
        let name = doc.item.name.clone();
        let fails = self.failing.lock().unwrap().contains(&name);
        let panics = self.panicking.lock().unwrap().contains(&name);
        if panics {
            panic!("renderer crashed on {}", name);
        }
        if fails {
            return Err(RenderError::Command {
                command: "fake".into(),
                stderr: "unsupported stroke version".into(),
            });
        }
        self.documents.fetch_add(1, Ordering::SeqCst);
        if self.garbled.lock().unwrap().contains(&name) {
            fs::write(dest, b"not a pdf").unwrap();
            return Ok(());
        }
        let size = self.document_size.lock().unwrap().unwrap_or(PageSize::DEVICE);
        write_pdf(dest, doc.item.pages.len(), size);
        Ok(())
    }

    fn render_page(&self, _stroke_file: &Path, size: PageSize, dest: &Path) -> Result<(), RenderError> {
        self.pages.fetch_add(1, Ordering::SeqCst);
        write_pdf(dest, 1, size);
        Ok(())
    }

    fn rasterize(&self, pdf_path: &Path, page_index: usize, dpi: u32) -> Result<RgbImage, RenderError> {
        let size = pdf::page_size(pdf_path, page_index as u32)
            .ok_or_else(|| RenderError::NoOutput(pdf_path.to_path_buf()))?;
        let px = |pt: f64| ((pt * f64::from(dpi) / 72.0).round() as u32).max(1);
        Ok(RgbImage::from_pixel(px(size.width), px(size.height), image::Rgb([255, 255, 255])))
    }
}

/// Recognizes "Hello" in a 100 × 20 px box on every page.
#[derive(Default)]
struct FakeOcr {
    calls: AtomicUsize,
}

impl FakeOcr {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for FakeOcr {
    fn annotate(&self, _png: &[u8], _language: &str) -> Option<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let poly = json!({"vertices": [
            {"x": 100, "y": 100}, {"x": 200, "y": 100},
            {"x": 200, "y": 120}, {"x": 100, "y": 120}
        ]});
        Some(json!({"responses": [{"textAnnotations": [
            {"description": "Hello\n", "boundingPoly": poly},
            {"description": "Hello", "boundingPoly": poly}
        ]}]}))
    }
}

// ── Source store builders ──

struct Store {
    _tmp: TempDir,
    source: PathBuf,
    output: PathBuf,
}

impl Store {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("xochitl");
        let output = tmp.path().join("out");
        fs::create_dir_all(&source).unwrap();
        Self {
            _tmp: tmp,
            source,
            output,
        }
    }

    fn write(&self, rel: &str, body: &str) {
        let path = self.source.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    fn metadata(&self, id: &str, name: &str, parent: &str) {
        self.write(
            &format!("{id}.metadata"),
            &format!(r#"{{"visibleName": "{name}", "parent": "{parent}", "type": "DocumentType"}}"#),
        );
    }

    fn page_order(&self, id: &str, pages: &[&str]) {
        let entries: Vec<String> = pages.iter().map(|p| format!(r#"{{"id": "{p}"}}"#)).collect();
        self.write(
            &format!("{id}.content"),
            &format!(r#"{{"cPages": {{"pages": [{}]}}}}"#, entries.join(", ")),
        );
    }

    /// A notebook with one stroke file per page.
    fn notebook(&self, id: &str, name: &str, pages: &[&str]) {
        self.metadata(id, name, "");
        self.page_order(id, pages);
        for page in pages {
            self.write(&format!("{id}/{page}.rm"), &format!("strokes of {page}"));
        }
    }

    fn folder(&self, id: &str, name: &str) {
        self.write(
            &format!("{id}.metadata"),
            &format!(r#"{{"visibleName": "{name}", "parent": "", "type": "CollectionType"}}"#),
        );
    }

    fn remove(&self, id: &str) {
        for entry in fs::read_dir(&self.source).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.split('.').next() == Some(id) {
                if path.is_dir() {
                    fs::remove_dir_all(path).unwrap();
                } else {
                    fs::remove_file(path).unwrap();
                }
            }
        }
    }

    fn options(&self, ocr: bool) -> SyncOptions {
        SyncOptions {
            source: self.source.clone(),
            output: self.output.clone(),
            flags: BuildFlags {
                ocr,
                debug_overlay: false,
            },
        }
    }

    fn records(&self) -> Vec<ItemRecord> {
        metadata::load_records(&self.output.join(METADATA_FILE)).unwrap()
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.ocr.dpi = 72;
    config
}

fn run(store: &Store, renderer: &FakeRenderer, ocr: &FakeOcr) -> SyncReport {
    sync::run_sync(&test_config(), &store.options(true), renderer, Some(ocr)).unwrap()
}

fn run_without_ocr(store: &Store, renderer: &FakeRenderer, ocr: &FakeOcr) -> SyncReport {
    sync::run_sync(&test_config(), &store.options(false), renderer, Some(ocr)).unwrap()
}

/// Font size and text matrix of the first overlay word on page `number`.
fn first_word_placement(pdf_path: &Path, number: u32) -> (f32, [f32; 6]) {
    let doc = Document::load(pdf_path).unwrap();
    let page_id = doc.get_pages()[&number];
    let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
    let operands = |name: &str| {
        content
            .operations
            .iter()
            .find(|op| op.operator == name)
            .unwrap_or_else(|| panic!("no {} operator", name))
            .operands
            .clone()
    };
    let font_size = operands("Tf")[1].as_float().unwrap();
    let tm: Vec<f32> = operands("Tm").iter().map(|o| o.as_float().unwrap()).collect();
    (font_size, [tm[0], tm[1], tm[2], tm[3], tm[4], tm[5]])
}

/// Entries of a document directory left over from a staged build.
fn staging_leftovers(doc_dir: &Path) -> Vec<String> {
    fs::read_dir(doc_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(pipeline::STAGING_PREFIX))
        .collect()
}

// ── Tests ──

#[test]
fn first_run_builds_every_artifact() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1", "p2"]);
    store.folder("fold-1", "Courses");
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();

    let report = run(&store, &renderer, &ocr);

    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Created]);
    assert_eq!(report.outcomes_of("fold-1"), &[ItemOutcome::Created]);
    assert!(report.errors.is_empty());
    assert_eq!(report.pages_rendered, 2);
    assert_eq!(report.pages_recognized, 2);
    assert_eq!(report.words_placed, 2);
    assert_eq!(ocr.calls(), 2);

    let doc = store.output.join("Lecture");
    assert!(doc.join("out.pdf").is_file());
    assert!(doc.join("xochitl/doc-1.content").is_file());
    assert!(doc.join("xochitl/doc-1/p1.rm").is_file());
    assert!(doc.join("rm_output/0 - p1.pdf").is_file());
    assert!(doc.join("rm_output/0 - p1.ocr.json").is_file());
    assert!(doc.join("rm_output/1 - p2.pdf").is_file());
    assert!(doc.join("thumbnails/1 - p2.png").is_file());
    assert!(!store.output.join(ERRORS_FILE).exists());

    let index = SearchIndex::load(&doc.join(SEARCH_INDEX_FILE)).unwrap();
    assert_eq!(index.recognized.get(&1).map(String::as_str), Some("Hello"));
    assert_eq!(index.recognized.get(&2).map(String::as_str), Some("Hello"));

    let records = store.records();
    assert_eq!(records.len(), 2);
    let record = records.iter().find_map(ItemRecord::as_document).unwrap();
    assert_eq!(record.output_dir, "Lecture");
    assert_eq!(record.total_pages, 2);
    assert_eq!(record.pages[0].words_placed, 1);
    assert!(record.build_flags.ocr);

    // "Hello" spans x 100..200, y 100..120 of a 72 dpi raster of the page,
    // so it lands at about the same spot on the device-sized page.
    let height = PageSize::DEVICE.height_pt as f32;
    let (font_size, [_, b, c, d, e, f]) = first_word_placement(&doc.join("out.pdf"), 1);
    assert!((font_size - 15.0).abs() < 0.05, "font size {}", font_size);
    assert!(b.abs() < 1e-4 && c.abs() < 1e-4);
    assert!((d - 1.0).abs() < 1e-4);
    assert!((e - 100.0).abs() < 0.2, "x {}", e);
    assert!((f - (height - 115.0)).abs() < 0.2, "y {}", f);
    assert!(staging_leftovers(&doc).is_empty());
}

#[test]
fn words_scale_to_a_larger_document_page() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1"]);
    let renderer = FakeRenderer::default();
    let doubled = PageSize::new(PageSize::DEVICE.width_pt * 2.0, PageSize::DEVICE.height_pt * 2.0);
    renderer.render_documents_at(doubled);
    let ocr = FakeOcr::default();

    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.words_placed, 1);

    let out_pdf = store.output.join("Lecture/out.pdf");
    assert_eq!(pdf::page_size(&out_pdf, 0).map(|s| s.width.round()), Some(1019.0));
    let height = doubled.height_pt as f32;
    let (font_size, [_, _, _, _, e, f]) = first_word_placement(&out_pdf, 1);
    assert!((font_size - 30.0).abs() < 0.1, "font size {}", font_size);
    assert!((e - 200.0).abs() < 0.4, "x {}", e);
    assert!((f - (height - 230.0)).abs() < 0.4, "y {}", f);
}

#[test]
fn second_run_touches_nothing() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1", "p2"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);

    let out_pdf = store.output.join("Lecture/out.pdf");
    let before = fs::metadata(&out_pdf).unwrap().modified().unwrap();

    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Unchanged]);
    assert_eq!(report.pages_rendered, 0);
    assert_eq!(ocr.calls(), 2);
    assert_eq!(renderer.documents.load(Ordering::SeqCst), 1);
    assert_eq!(fs::metadata(&out_pdf).unwrap().modified().unwrap(), before);
    // words of an unchanged document still count
    assert_eq!(report.words_placed, 2);
}

#[test]
fn stroke_edit_rebuilds_only_that_page() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1", "p2"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);

    store.write("doc-1/p2.rm", "strokes of p2, with more ink");
    let report = run(&store, &renderer, &ocr);

    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Modified]);
    assert_eq!(report.pages_rendered, 1);
    assert_eq!(renderer.page_renders(), 3);
    assert_eq!(ocr.calls(), 3);
    // render, recognition and thumbnail of p1
    assert_eq!(report.artifacts_reused, 3);
    assert_eq!(report.words_placed, 2);

    let record = store.records().into_iter().find_map(|r| match r {
        ItemRecord::Document(d) => Some(d),
        _ => None,
    });
    let record = record.unwrap();
    assert_eq!(record.pages[1].content_hash.as_deref().map(str::len), Some(64));
}

#[test]
fn reordered_pages_keep_their_artifacts() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1", "p2"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);

    store.page_order("doc-1", &["p2", "p1"]);
    let report = run(&store, &renderer, &ocr);

    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Modified]);
    assert_eq!(report.pages_rendered, 0);
    assert_eq!(ocr.calls(), 2);

    let rm = store.output.join("Lecture/rm_output");
    assert!(rm.join("0 - p2.pdf").is_file());
    assert!(rm.join("1 - p1.pdf").is_file());
    assert!(rm.join("0 - p2.ocr.json").is_file());
    assert!(!rm.join("0 - p1.pdf").exists());
    assert!(!rm.join("1 - p2.pdf").exists());
    assert!(store.output.join("Lecture/thumbnails/1 - p1.png").is_file());
}

#[test]
fn removed_page_loses_its_artifacts() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1", "p2"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);

    store.page_order("doc-1", &["p1"]);
    fs::remove_file(store.source.join("doc-1/p2.rm")).unwrap();
    run(&store, &renderer, &ocr);

    let doc = store.output.join("Lecture");
    assert!(doc.join("rm_output/0 - p1.pdf").is_file());
    assert!(!doc.join("rm_output/1 - p2.pdf").exists());
    assert!(!doc.join("rm_output/1 - p2.ocr.json").exists());
    assert!(!doc.join("thumbnails/1 - p2.png").exists());
    assert!(!doc.join("xochitl/doc-1/p2.rm").exists());
}

#[test]
fn rename_moves_the_output_directory() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);

    store.metadata("doc-1", "Lecture 1 - Intro", "");
    let report = run(&store, &renderer, &ocr);

    assert_eq!(
        report.outcomes_of("doc-1"),
        &[ItemOutcome::Renamed, ItemOutcome::Unchanged]
    );
    assert!(!store.output.join("Lecture").exists());
    assert!(store.output.join("Lecture 1 - Intro/out.pdf").is_file());
    assert_eq!(ocr.calls(), 1);

    let records = store.records();
    let record = records[0].as_document().unwrap();
    assert_eq!(record.name, "Lecture 1 - Intro");
    assert_eq!(record.output_dir, "Lecture 1 - Intro");
}

#[test]
fn deleted_and_trashed_documents_lose_their_output() {
    let store = Store::new();
    store.notebook("doc-1", "Gone", &["p1"]);
    store.notebook("doc-2", "Binned", &["p1"]);
    store.notebook("doc-3", "Kept", &["p1"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);

    store.remove("doc-1");
    store.metadata("doc-2", "Binned", "trash");
    let report = run(&store, &renderer, &ocr);

    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Deleted]);
    assert_eq!(report.outcomes_of("doc-2"), &[ItemOutcome::Deleted]);
    assert_eq!(report.outcomes_of("doc-3"), &[ItemOutcome::Unchanged]);
    assert!(!store.output.join("Gone").exists());
    assert!(!store.output.join("Binned").exists());
    assert!(store.output.join("Kept/out.pdf").is_file());

    let ids: Vec<String> = store.records().iter().map(|r| r.id().to_string()).collect();
    assert_eq!(ids, vec!["doc-3"]);
}

#[test]
fn same_names_get_distinct_directories() {
    let store = Store::new();
    store.notebook("aaaaaaaa-1", "Notes", &["p1"]);
    store.notebook("bbbbbbbb-2", "Notes", &["p1"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);

    assert!(store.output.join("Notes/out.pdf").is_file());
    assert!(store.output.join("Notes (bbbbbbbb)/out.pdf").is_file());

    // stable on the next run
    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.count(ItemOutcome::Unchanged), 2);
    assert_eq!(report.count(ItemOutcome::Renamed), 0);
}

#[test]
fn render_failure_keeps_the_previous_record() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);
    let built_hash = store.records()[0].as_document().unwrap().content_hash.clone();

    store.write("doc-1/p1.rm", "new strokes");
    renderer.fail_on("Lecture");
    let report = run(&store, &renderer, &ocr);

    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Failed]);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].error.contains("unsupported stroke version"));
    assert!(store.output.join(ERRORS_FILE).is_file());
    assert_eq!(store.records()[0].as_document().unwrap().content_hash, built_hash);

    // the previous build is still on disk
    let doc = store.output.join("Lecture");
    assert!(Document::load(doc.join("out.pdf")).is_ok());
    assert_eq!(fs::read_to_string(doc.join("xochitl/doc-1/p1.rm")).unwrap(), "strokes of p1");
    assert!(staging_leftovers(&doc).is_empty());

    renderer.heal();
    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Modified]);
    assert!(!store.output.join(ERRORS_FILE).exists());
    assert_ne!(store.records()[0].as_document().unwrap().content_hash, built_hash);
}

#[test]
fn failed_reorder_leaves_the_previous_artifacts_in_place() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1", "p2"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);

    store.page_order("doc-1", &["p2", "p1"]);
    renderer.garble("Lecture");
    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Failed]);

    // every path the kept record names still exists
    let doc = store.output.join("Lecture");
    let records = store.records();
    let record = records[0].as_document().unwrap();
    assert_eq!(record.pages[0].page_id, "p1");
    for page in &record.pages {
        for rel in [&page.render_path, &page.ocr_path, &page.thumbnail_path] {
            let rel = rel.as_ref().unwrap();
            assert!(doc.join(rel).is_file(), "{} is gone", rel.display());
        }
    }
    assert!(Document::load(doc.join("out.pdf")).is_ok());

    renderer.heal();
    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Modified]);
    assert_eq!(report.pages_rendered, 0);
    assert_eq!(ocr.calls(), 2);
    assert!(doc.join("rm_output/0 - p2.ocr.json").is_file());
    assert!(doc.join("rm_output/1 - p1.ocr.json").is_file());
}

#[test]
fn panic_in_one_document_spares_the_others() {
    let store = Store::new();
    store.notebook("doc-1", "Cursed", &["p1"]);
    store.notebook("doc-2", "Fine", &["p1"]);
    let renderer = FakeRenderer::default();
    renderer.panic_on("Cursed");
    let ocr = FakeOcr::default();

    let report = run(&store, &renderer, &ocr);

    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Failed]);
    assert_eq!(report.outcomes_of("doc-2"), &[ItemOutcome::Created]);
    assert!(report.errors[0].error.starts_with("panic:"));
    assert!(store.output.join("Fine/out.pdf").is_file());
    let ids: Vec<String> = store.records().iter().map(|r| r.id().to_string()).collect();
    assert_eq!(ids, vec!["doc-2"]);
}

#[test]
fn malformed_item_is_reported_by_name() {
    let store = Store::new();
    store.notebook("doc-1", "Fine", &["p1"]);
    store.metadata("doc-2", "Broken", "");
    store.write("doc-2.content", "{not json");
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();

    let report = run(&store, &renderer, &ocr);

    assert_eq!(report.outcomes_of("doc-2"), &[ItemOutcome::Failed]);
    assert_eq!(report.errors[0].name, "Broken");
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Created]);
}

#[test]
fn toggling_ocr_rebuilds() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();

    let report = run_without_ocr(&store, &renderer, &ocr);
    assert_eq!(report.words_placed, 0);
    assert_eq!(ocr.calls(), 0);
    assert!(!store.output.join("Lecture/rm_output/0 - p1.ocr.json").exists());

    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Modified]);
    assert_eq!(report.pages_rendered, 0);
    assert_eq!(ocr.calls(), 1);
    assert_eq!(report.words_placed, 1);
}

#[test]
fn recognition_survives_a_run_with_ocr_off() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);
    assert_eq!(ocr.calls(), 1);

    let report = run_without_ocr(&store, &renderer, &ocr);
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Modified]);
    assert_eq!(report.words_placed, 0);
    assert!(store.output.join("Lecture/rm_output/0 - p1.ocr.json").is_file());

    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Modified]);
    assert_eq!(ocr.calls(), 1);
    assert_eq!(report.words_placed, 1);
}

#[test]
fn missing_engine_means_no_ocr() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1"]);
    let renderer = FakeRenderer::default();

    let report = sync::run_sync(&test_config(), &store.options(true), &renderer, None).unwrap();
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Created]);
    assert!(!store.records()[0].as_document().unwrap().build_flags.ocr);
}

#[test]
fn concurrent_run_is_refused() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1"]);
    fs::create_dir_all(&store.output).unwrap();
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();

    let lock = OutputLock::acquire(&store.output).unwrap();
    let err = sync::run_sync(&test_config(), &store.options(true), &renderer, Some(&ocr)).unwrap_err();
    assert!(err.to_string().contains("already running"));
    drop(lock);

    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Created]);
}

#[test]
fn unreadable_metadata_rebuilds_everything() {
    let store = Store::new();
    store.notebook("doc-1", "Lecture", &["p1"]);
    let renderer = FakeRenderer::default();
    let ocr = FakeOcr::default();
    run(&store, &renderer, &ocr);

    fs::write(store.output.join(METADATA_FILE), "[{ truncated").unwrap();
    let report = run(&store, &renderer, &ocr);
    assert_eq!(report.outcomes_of("doc-1"), &[ItemOutcome::Created]);
    assert_eq!(store.records().len(), 1);
}
