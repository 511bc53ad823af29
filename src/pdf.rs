//! Small helpers over `lopdf`.

use lopdf::{Document, Object, ObjectId};
use std::path::Path;

use crate::error::{BuildError, BuildResult};
use crate::geometry::Dimensions;

/// A page's MediaBox in PDF units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl MediaBox {
    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).abs()
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width(), self.height())
    }
}

pub fn load(path: &Path) -> BuildResult<Document> {
    Document::load(path)
        .map_err(|e| BuildError::pdf(format!("failed to load {}: {}", path.display(), e)))
}

pub fn save(doc: &mut Document, path: &Path) -> BuildResult<()> {
    doc.save(path)
        .map_err(|e| BuildError::pdf(format!("failed to save {}: {}", path.display(), e)))?;
    Ok(())
}

/// Page object ids in page order.
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// Follow a reference to the object it names.
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Look up a page attribute, walking up the page tree for inheritable keys.
pub fn inherited<'a>(doc: &'a Document, page: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page).ok()?;
    // Guard against cyclic Parent chains.
    for _ in 0..64 {
        if let Ok(value) = current.get(key) {
            return resolve(doc, value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

pub fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

pub fn media_box(doc: &Document, page: ObjectId) -> Option<MediaBox> {
    let values = inherited(doc, page, b"MediaBox")?.as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let mut coords = [0.0; 4];
    for (slot, value) in coords.iter_mut().zip(values) {
        *slot = number(resolve(doc, value)?)?;
    }
    Some(MediaBox {
        x0: coords[0],
        y0: coords[1],
        x1: coords[2],
        y1: coords[3],
    })
}

/// MediaBox of every page of the file at `path`, in page order.
pub fn page_boxes(path: &Path) -> BuildResult<Vec<MediaBox>> {
    let doc = load(path)?;
    page_ids(&doc)
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            media_box(&doc, id)
                .ok_or_else(|| BuildError::pdf(format!("page {} of {} has no MediaBox", i + 1, path.display())))
        })
        .collect()
}

/// Size of one 0-based page, or `None` if the file cannot be read or the
/// page does not exist.
pub fn page_size(path: &Path, index: u32) -> Option<Dimensions> {
    let doc = Document::load(path).ok()?;
    let id = *doc.get_pages().get(&(index + 1))?;
    media_box(&doc, id).map(|b| b.dimensions())
}

/// Extractable text of every page, in page order. Pages whose text cannot
/// be decoded yield an empty string.
pub fn page_texts(doc: &Document) -> Vec<String> {
    doc.get_pages()
        .keys()
        .map(|&number| match doc.extract_text(&[number]) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::debug!(page = number, error = %e, "no extractable text");
                String::new()
            }
        })
        .collect()
}

/// Encode text for a WinAnsi simple font. Characters the encoding lacks
/// become `?`.
pub fn win_ansi_bytes(text: &str) -> Vec<u8> {
    text.chars().map(|c| win_ansi_code(c).unwrap_or(b'?')).collect()
}

fn win_ansi_code(c: char) -> Option<u8> {
    let code = match c {
        ' '..='~' | '\u{A0}'..='\u{FF}' => return u8::try_from(c as u32).ok(),
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '•' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(code)
}
