//! Recognized-text layer.
//!
//! The assembled `out.pdf` goes through two stages that must happen in
//! order: its own text is read into the search index first, then the
//! recognized words are drawn on top. [`RenderedDocument::index`] consumes
//! the freshly rendered file and hands back an [`IndexedDocument`], the only
//! type that can write to it.
//!
//! Every word becomes its own text object, wrapped in `q`/`Q`:
//!
//! ```text
//! q BT /FInk 15 Tf 3 Tr a b c d e f Tm (Hello) Tj ET Q
//! ```
//!
//! Render mode 3 draws nothing but keeps the text selectable. Debug mode uses
//! mode 0 in blue and outlines the word polygon in red.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kurbo::{Affine, Point, Vec2};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{BuildError, BuildResult};
use crate::font_metrics::helvetica_width;
use crate::geometry::{project, Placement, Scale, ScaleChain};
use crate::models::RecognizedWord;
use crate::ocr::OcrRecord;
use crate::pdf::{self, MediaBox};
use crate::search_index::SearchIndex;

/// Resource name of the overlay font on every stitched page.
const FONT_KEY: &str = "FInk";
const OUTLINE_WIDTH: f64 = 0.5;

/// Why a word was left out of the text layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Blank,
    TooFewVertices(usize),
    DegenerateGeometry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordOutcome {
    Placed { rotated: bool },
    Skipped(SkipReason),
}

/// Counts for one stitch pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchReport {
    /// Words placed, by 0-based page index.
    pub placed: BTreeMap<usize, usize>,
    pub rotated: usize,
    pub skipped: usize,
}

impl StitchReport {
    pub fn words_placed(&self) -> usize {
        self.placed.values().sum()
    }

    pub fn placed_on(&self, page_index: usize) -> usize {
        self.placed.get(&page_index).copied().unwrap_or(0)
    }
}

/// A freshly rendered `out.pdf` whose text has not been indexed yet.
pub struct RenderedDocument {
    path: PathBuf,
    doc: Document,
}

/// An `out.pdf` whose pre-overlay text is in the search index.
pub struct IndexedDocument {
    path: PathBuf,
    doc: Document,
}

impl RenderedDocument {
    pub fn open(path: &Path) -> BuildResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            doc: pdf::load(path)?,
        })
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Extract each page's text, merged with the recognized text of each
    /// page (0-based keys).
    pub fn index(self, recognized: &BTreeMap<usize, String>) -> (SearchIndex, IndexedDocument) {
        let backing = pdf::page_texts(&self.doc);
        let index = SearchIndex::from_pages(&backing, recognized);
        (
            index,
            IndexedDocument {
                path: self.path,
                doc: self.doc,
            },
        )
    }
}

impl IndexedDocument {
    /// Draw the recognized words of each listed page (0-based index) and
    /// save the document in place.
    pub fn stitch(mut self, pages: &[(usize, &OcrRecord)], debug: bool) -> BuildResult<StitchReport> {
        let mut report = StitchReport::default();
        if pages.is_empty() {
            return Ok(report);
        }
        let page_ids = pdf::page_ids(&self.doc);
        let mut font: Option<ObjectId> = None;

        for &(index, record) in pages {
            let Some(&page_id) = page_ids.get(index) else {
                tracing::warn!(page = index + 1, "no such page in rendered document");
                continue;
            };
            let Some(media) = pdf::media_box(&self.doc, page_id) else {
                tracing::warn!(page = index + 1, "page has no MediaBox");
                continue;
            };
            let Some(chain) = ScaleChain::new(record.image_size(), record.source_size(), media.dimensions())
            else {
                tracing::warn!(page = index + 1, "OCR record has unusable sizes");
                continue;
            };

            let words = record.words();
            let (operations, outcomes) = layout_page(&words, chain.combined(), &media, debug);
            for (word, outcome) in words.iter().zip(&outcomes) {
                match outcome {
                    WordOutcome::Placed { rotated } => {
                        *report.placed.entry(index).or_insert(0) += 1;
                        if *rotated {
                            report.rotated += 1;
                        }
                    }
                    WordOutcome::Skipped(reason) => {
                        tracing::debug!(page = index + 1, word = %word.text, ?reason, "word skipped");
                        report.skipped += 1;
                    }
                }
            }
            if operations.is_empty() {
                continue;
            }

            let font_id = *font.get_or_insert_with(|| add_font(&mut self.doc));
            install_font(&mut self.doc, page_id, font_id)?;
            append_content(&mut self.doc, page_id, operations)?;
        }

        pdf::save(&mut self.doc, &self.path)?;
        Ok(report)
    }
}

/// Content operations for one page and the outcome of each word.
pub fn layout_page(
    words: &[RecognizedWord],
    scale: Scale,
    media: &MediaBox,
    debug: bool,
) -> (Vec<Operation>, Vec<WordOutcome>) {
    let mut ops = Vec::new();
    let mut outcomes = Vec::with_capacity(words.len());
    for word in words {
        let text = word.text.trim();
        if text.is_empty() {
            outcomes.push(WordOutcome::Skipped(SkipReason::Blank));
            continue;
        }
        let vertices = &word.quad.vertices;
        if vertices.len() < 4 {
            outcomes.push(WordOutcome::Skipped(SkipReason::TooFewVertices(vertices.len())));
            continue;
        }
        let Some(placement) = project(vertices, text, helvetica_width, scale) else {
            outcomes.push(WordOutcome::Skipped(SkipReason::DegenerateGeometry));
            continue;
        };
        ops.push(Operation::new("q", vec![]));
        if debug {
            ops.extend(outline_ops(vertices, scale, media));
        }
        ops.extend(text_ops(text, &placement, media, debug));
        ops.push(Operation::new("Q", vec![]));
        outcomes.push(WordOutcome::Placed {
            rotated: placement.is_rotated(),
        });
    }
    (ops, outcomes)
}

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}

/// Map a point in scaled image space (y down, page origin top-left) into
/// the page's user space.
fn to_user_space(p: Point, media: &MediaBox) -> Point {
    Point::new(media.x0 + p.x, media.y0 + media.height() - p.y)
}

fn outline_ops(vertices: &[Point], scale: Scale, media: &MediaBox) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("RG", vec![real(1.0), real(0.0), real(0.0)]),
        Operation::new("w", vec![real(OUTLINE_WIDTH)]),
    ];
    for (i, v) in vertices.iter().enumerate() {
        let p = to_user_space(Point::new(v.x * scale.x, v.y * scale.y), media);
        let op = if i == 0 { "m" } else { "l" };
        ops.push(Operation::new(op, vec![real(p.x), real(p.y)]));
    }
    ops.push(Operation::new("h", vec![]));
    ops.push(Operation::new("S", vec![]));
    ops
}

fn text_ops(text: &str, placement: &Placement, media: &MediaBox, debug: bool) -> Vec<Operation> {
    let matrix = Affine::translate(Vec2::new(media.x0, media.y0)) * placement.transform(media.height());
    let [a, b, c, d, e, f] = matrix.as_coeffs();

    let mut ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(FONT_KEY.as_bytes().to_vec()), real(placement.font_size)]),
    ];
    if debug {
        ops.push(Operation::new("Tr", vec![Object::Integer(0)]));
        ops.push(Operation::new("rg", vec![real(0.0), real(0.0), real(1.0)]));
    } else {
        ops.push(Operation::new("Tr", vec![Object::Integer(3)]));
    }
    ops.push(Operation::new("Tm", vec![real(a), real(b), real(c), real(d), real(e), real(f)]));
    ops.push(Operation::new("Tj", vec![Object::string_literal(pdf::win_ansi_bytes(text))]));
    ops.push(Operation::new("ET", vec![]));
    ops
}

fn add_font(doc: &mut Document) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    })
}

/// Give the page its own Resources (copied from whatever it inherited) with
/// the overlay font added.
fn install_font(doc: &mut Document, page: ObjectId, font: ObjectId) -> BuildResult<()> {
    let mut resources = match pdf::inherited(doc, page, b"Resources") {
        Some(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    };
    let mut fonts = match resources.get(b"Font").ok().and_then(|f| pdf::resolve(doc, f)) {
        Some(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    };
    fonts.set(FONT_KEY, Object::Reference(font));
    resources.set("Font", Object::Dictionary(fonts));

    page_dict_mut(doc, page)?.set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Isolate the existing content in `q`/`Q` and append the overlay after it.
fn append_content(doc: &mut Document, page: ObjectId, operations: Vec<Operation>) -> BuildResult<()> {
    let existing: Vec<Object> = match doc.get_dictionary(page).map_err(BuildError::pdf)?.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let mut overlay = b"Q\n".to_vec();
    overlay.extend(Content { operations }.encode().map_err(BuildError::pdf)?);

    let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let overlay_id = doc.add_object(Stream::new(dictionary! {}, overlay));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(overlay_id));

    page_dict_mut(doc, page)?.set("Contents", Object::Array(contents));
    Ok(())
}

fn page_dict_mut(doc: &mut Document, page: ObjectId) -> BuildResult<&mut Dictionary> {
    doc.get_object_mut(page)
        .and_then(|o| o.as_dict_mut())
        .map_err(BuildError::pdf)
}
