//! TOML configuration.
//!
//! Every section is optional; a missing config file yields
//! [`Config::default`]. The resolved OCR API key lives on the config value
//! itself and is threaded through the run explicitly.
//!
//! ```toml
//! [ocr]
//! enabled = true
//! language = "en"
//! timeout_secs = 60
//!
//! [render]
//! document_command = ["remarks-pdf", "{source_dir}", "{out}"]
//!
//! [thumbnails]
//! max_width = 280
//! max_height = 374
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Key given inline. Takes precedence over the env var and key file.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_api_key_file")]
    pub api_key_file: PathBuf,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_ocr_dpi")]
    pub dpi: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            api_key_env: default_api_key_env(),
            api_key_file: default_api_key_file(),
            endpoint: default_endpoint(),
            language: default_language(),
            dpi: default_ocr_dpi(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_api_key_env() -> String {
    "GCV_API_KEY".to_string()
}
fn default_api_key_file() -> PathBuf {
    PathBuf::from("./gcv_api_key")
}
fn default_endpoint() -> String {
    "https://vision.googleapis.com/v1/images:annotate".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_ocr_dpi() -> u32 {
    300
}
fn default_timeout_secs() -> u64 {
    60
}

/// External commands used by [`crate::render::CommandRenderer`].
///
/// Placeholders: `{input}`, `{out}`, `{source_dir}`, `{id}`, `{name}`,
/// `{width}`, `{height}` (points), `{dpi}`, `{page}` (1-based).
#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default)]
    pub document_command: Vec<String>,
    #[serde(default = "default_page_command")]
    pub page_command: Vec<String>,
    #[serde(default = "default_raster_command")]
    pub raster_command: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            document_command: Vec::new(),
            page_command: default_page_command(),
            raster_command: default_raster_command(),
        }
    }
}

fn default_page_command() -> Vec<String> {
    ["rmc", "-t", "pdf", "-o", "{out}", "{input}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_raster_command() -> Vec<String> {
    ["mutool", "draw", "-r", "{dpi}", "-o", "{out}", "{input}", "{page}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumb_width")]
    pub max_width: u32,
    #[serde(default = "default_thumb_height")]
    pub max_height: u32,
    #[serde(default = "default_thumb_dpi")]
    pub dpi: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: default_thumb_width(),
            max_height: default_thumb_height(),
            dpi: default_thumb_dpi(),
        }
    }
}

fn default_thumb_width() -> u32 {
    280
}
fn default_thumb_height() -> u32 {
    374
}
fn default_thumb_dpi() -> u32 {
    72
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OverlayConfig {
    /// Draw recognized text visibly, with word outlines.
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    /// Resolve the OCR API key: inline value, then the configured env var,
    /// then the key file. Blank values count as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = non_blank(self.ocr.api_key.as_deref()) {
            return Some(key);
        }
        if let Some(key) = non_blank(std::env::var(&self.ocr.api_key_env).ok().as_deref()) {
            return Some(key);
        }
        let from_file = std::fs::read_to_string(&self.ocr.api_key_file).ok();
        non_blank(from_file.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Load the config file, or defaults when the file does not exist.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.ocr.dpi == 0 {
        anyhow::bail!("ocr.dpi must be > 0");
    }
    if config.ocr.timeout_secs == 0 {
        anyhow::bail!("ocr.timeout_secs must be > 0");
    }
    if config.ocr.language.trim().is_empty() {
        anyhow::bail!("ocr.language must not be empty");
    }
    if config.thumbnails.max_width == 0 || config.thumbnails.max_height == 0 {
        anyhow::bail!("thumbnails.max_width and thumbnails.max_height must be > 0");
    }
    if config.thumbnails.dpi == 0 {
        anyhow::bail!("thumbnails.dpi must be > 0");
    }
    if config.render.page_command.is_empty() {
        anyhow::bail!("render.page_command must not be empty");
    }
    if config.render.raster_command.is_empty() {
        anyhow::bail!("render.raster_command must not be empty");
    }
    Ok(())
}
