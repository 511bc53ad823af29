//! Per-document `search_index.json`.
//!
//! ```json
//! {"backing": {"1": "printed text"}, "recognized": {"1": "handwriting"}}
//! ```
//!
//! Keys are 1-based page numbers of `out.pdf`. Pages without text are left
//! out of either map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{BuildError, BuildResult};

pub const SEARCH_INDEX_FILE: &str = "search_index.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchIndex {
    /// Text the rendered document carried before the overlay.
    #[serde(default)]
    pub backing: BTreeMap<u32, String>,
    /// Recognized handwriting.
    #[serde(default)]
    pub recognized: BTreeMap<u32, String>,
}

impl SearchIndex {
    /// `backing[i]` is the text of page `i`; `recognized` is keyed by
    /// 0-based page index.
    pub fn from_pages(backing: &[String], recognized: &BTreeMap<usize, String>) -> Self {
        let backing = backing
            .iter()
            .enumerate()
            .filter_map(|(i, text)| page_entry(i, text))
            .collect();
        let recognized = recognized
            .iter()
            .filter_map(|(&i, text)| page_entry(i, text))
            .collect();
        Self {
            backing,
            recognized,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backing.is_empty() && self.recognized.is_empty()
    }

    pub fn save(&self, path: &Path) -> BuildResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(|e| BuildError::io(path, e))
    }

    pub fn load(path: &Path) -> BuildResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| BuildError::io(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn page_entry(index: usize, text: &str) -> Option<(u32, String)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let number = u32::try_from(index + 1).ok()?;
    Some((number, text.to_string()))
}
