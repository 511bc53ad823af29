//! Source store scanner.
//!
//! The source is a flat directory in the device's layout: every item owns a
//! set of siblings that share its id as a file-name prefix:
//!
//! ```text
//! <id>.metadata      JSON: visibleName, parent, type
//! <id>.content       JSON: page list (cPages.pages[] or legacy pages[])
//! <id>.pdf           optional backing document
//! <id>/<page>.rm     stroke data, one file per written page
//! <id>.pagedata, <id>.thumbnails/, ...
//! ```
//!
//! [`group_source`] only groups file names; [`load_item`] parses one group
//! and is called per item by the coordinator so that a malformed item fails
//! on its own.

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::{ItemKind, RawPage, SourceItem};

const METADATA_EXT: &str = "metadata";
const CONTENT_EXT: &str = "content";
const STROKE_EXT: &str = "rm";
const BACKING_EXT: &str = "pdf";
const COLLECTION_TYPE: &str = "CollectionType";

/// Raw files of the source store grouped by item id, in id order.
pub type SourceGroups = BTreeMap<String, Vec<PathBuf>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataFile {
    #[serde(default)]
    visible_name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(rename = "type", default)]
    item_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentFile {
    #[serde(rename = "cPages", default)]
    c_pages: Option<CPages>,
    #[serde(default)]
    pages: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct CPages {
    #[serde(default)]
    pages: Vec<CPage>,
    #[serde(rename = "lastOpened", default)]
    last_opened: Option<Versioned<String>>,
}

#[derive(Debug, Deserialize)]
struct CPage {
    id: String,
    #[serde(default)]
    redir: Option<Versioned<i64>>,
    #[serde(default)]
    deleted: Option<Versioned<i64>>,
}

/// The device wraps most scalar fields as `{"timestamp": ..., "value": ...}`.
#[derive(Debug, Deserialize)]
struct Versioned<T> {
    #[serde(default)]
    value: Option<T>,
}

impl CPage {
    fn is_deleted(&self) -> bool {
        self.deleted.as_ref().and_then(|d| d.value) == Some(1)
    }

    fn backing_index(&self) -> Option<u32> {
        self.redir
            .as_ref()
            .and_then(|r| r.value)
            .and_then(|v| u32::try_from(v).ok())
    }
}

/// Group every entry of the source directory by the id prefix of its name.
pub fn group_source(root: &Path) -> Result<SourceGroups> {
    if !root.is_dir() {
        anyhow::bail!("Source directory does not exist: {}", root.display());
    }

    let mut groups: SourceGroups = BTreeMap::new();
    let entries = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read source directory: {}", root.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let id = match name.split('.').next() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => continue,
        };
        groups.entry(id).or_default().push(entry.path());
    }
    for files in groups.values_mut() {
        files.sort();
    }
    Ok(groups)
}

/// Parse one item group into a [`SourceItem`].
pub fn load_item(root: &Path, id: &str, files: &[PathBuf]) -> Result<SourceItem> {
    let metadata_path = find_sibling(files, id, METADATA_EXT);
    let content_path = find_sibling(files, id, CONTENT_EXT);

    let metadata: MetadataFile = match &metadata_path {
        Some(p) => read_json(p)?,
        None => MetadataFile::default(),
    };
    let content: Option<ContentFile> = match &content_path {
        Some(p) => Some(read_json(p)?),
        None => None,
    };

    let kind = if metadata.item_type.as_deref() == Some(COLLECTION_TYPE) || content.is_none() {
        ItemKind::Folder
    } else {
        ItemKind::Document
    };

    let backing_pdf = find_sibling(files, id, BACKING_EXT);

    let (pages, last_opened_page) = match (&content, kind) {
        (Some(content), ItemKind::Document) => {
            let stroke_dir = root.join(id);
            build_pages(content, &stroke_dir, backing_pdf.is_some())?
        }
        _ => (Vec::new(), 1),
    };

    let content_hash = item_content_hash(root, files, metadata_path.as_deref())?;

    let parent = metadata.parent.filter(|p| !p.is_empty());

    Ok(SourceItem {
        id: id.to_string(),
        name: metadata.visible_name,
        parent,
        kind,
        files: files.to_vec(),
        pages,
        backing_pdf,
        content_hash,
        last_opened_page,
        has_metadata: metadata_path.is_some(),
        has_content: content_path.is_some(),
    })
}

/// Best-effort display name for error reports on items that failed to load.
pub fn try_display_name(files: &[PathBuf]) -> Option<String> {
    let path = files
        .iter()
        .find(|p| p.extension().map(|e| e == METADATA_EXT).unwrap_or(false))?;
    let metadata: MetadataFile = read_json(path).ok()?;
    Some(metadata.visible_name)
}

fn build_pages(
    content: &ContentFile,
    stroke_dir: &Path,
    has_backing: bool,
) -> Result<(Vec<RawPage>, usize)> {
    // (page id, backing index) in display order
    let ordered: Vec<(String, Option<u32>)> = if let Some(c_pages) = &content.c_pages {
        c_pages
            .pages
            .iter()
            .filter(|p| !p.is_deleted())
            .map(|p| (p.id.clone(), p.backing_index()))
            .collect()
    } else if let Some(pages) = &content.pages {
        // Legacy format: page i overlays backing page i.
        pages
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), has_backing.then_some(i as u32)))
            .collect()
    } else {
        Vec::new()
    };

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (i, (id, _)) in ordered.iter().enumerate() {
        // Ids become artifact file names.
        if id.is_empty() || id.contains(['/', '\\', '.']) {
            anyhow::bail!("Invalid page id {:?} at position {}", id, i);
        }
        if let Some(first) = seen.insert(id.as_str(), i) {
            anyhow::bail!("Duplicate page id {} at positions {} and {}", id, first, i);
        }
    }

    let mut pages = Vec::with_capacity(ordered.len());
    for (index, (id, backing_index)) in ordered.iter().enumerate() {
        let stroke_file = stroke_dir.join(format!("{}.{}", id, STROKE_EXT));
        let (source, content_hash) = if stroke_file.is_file() {
            let bytes = std::fs::read(&stroke_file)
                .with_context(|| format!("Failed to read page file: {}", stroke_file.display()))?;
            (Some(stroke_file), Some(hash_bytes(&bytes)))
        } else {
            (None, None)
        };
        pages.push(RawPage {
            id: id.clone(),
            index,
            backing_index: *backing_index,
            source,
            content_hash,
        });
    }

    let last_opened_page = content
        .c_pages
        .as_ref()
        .and_then(|c| c.last_opened.as_ref())
        .and_then(|v| v.value.as_deref())
        .and_then(|last| pages.iter().position(|p| p.id == last))
        .map(|i| i + 1)
        .unwrap_or(1);

    Ok((pages, last_opened_page))
}

fn find_sibling(files: &[PathBuf], id: &str, ext: &str) -> Option<PathBuf> {
    let wanted = format!("{}.{}", id, ext);
    files
        .iter()
        .find(|p| p.is_file() && p.file_name().map(|n| n.to_string_lossy() == wanted).unwrap_or(false))
        .cloned()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Hex SHA-256 of a byte slice. Used for change detection only.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest over every file of an item (recursing into directories), keyed by
/// path relative to the source root so renames inside the item register.
///
/// The `.metadata` file is left out: it holds the display name and parent,
/// which change on rename/move without touching the content.
pub fn item_content_hash(root: &Path, files: &[PathBuf], exclude: Option<&Path>) -> Result<String> {
    let mut all: Vec<PathBuf> = Vec::new();
    for path in files {
        if Some(path.as_path()) == exclude {
            continue;
        }
        if path.is_dir() {
            for entry in WalkDir::new(path) {
                let entry = entry?;
                if entry.file_type().is_file() {
                    all.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            all.push(path.clone());
        }
    }
    all.sort();

    let mut hasher = Sha256::new();
    for path in &all {
        let relative = path.strip_prefix(root).unwrap_or(path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}
