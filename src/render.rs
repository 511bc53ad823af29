//! Rendering collaborator.
//!
//! The stroke format is opaque to this crate. Turning strokes into PDF pages
//! and PDF pages into pixels is delegated to a [`Renderer`]; the shipped
//! [`CommandRenderer`] drives external tools configured in `[render]`.

use std::path::Path;
use std::process::Command;

use image::RgbImage;

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::models::SourceItem;

/// Page size in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f64,
    pub height_pt: f64,
}

impl PageSize {
    /// The device's native page: 1620 × 2160 px at 229 DPI.
    pub const DEVICE: PageSize = PageSize {
        width_pt: 1620.0 * 72.0 / 229.0,
        height_pt: 2160.0 * 72.0 / 229.0,
    };

    pub fn new(width_pt: f64, height_pt: f64) -> Self {
        Self {
            width_pt,
            height_pt,
        }
    }
}

/// Everything a document renderer needs to know about one item.
#[derive(Debug, Clone, Copy)]
pub struct DocumentSource<'a> {
    pub item: &'a SourceItem,
    /// Directory holding a copy of the item's raw files.
    pub source_dir: &'a Path,
}

pub trait Renderer {
    /// Render the whole document, backing pages included, to `dest`.
    fn render_document(&self, doc: &DocumentSource<'_>, dest: &Path) -> Result<(), RenderError>;

    /// Render one stroke file to a single-page PDF of `size` at `dest`.
    fn render_page(&self, stroke_file: &Path, size: PageSize, dest: &Path) -> Result<(), RenderError>;

    /// Rasterize one 0-based page of `pdf` at `dpi`.
    fn rasterize(&self, pdf: &Path, page_index: usize, dpi: u32) -> Result<RgbImage, RenderError>;
}

/// Runs the commands of a [`RenderConfig`].
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    config: RenderConfig,
}

impl CommandRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }
}

impl Renderer for CommandRenderer {
    fn render_document(&self, doc: &DocumentSource<'_>, dest: &Path) -> Result<(), RenderError> {
        if self.config.document_command.is_empty() {
            return Err(RenderError::NotConfigured("render.document_command".into()));
        }
        let vars = [
            ("source_dir", doc.source_dir.display().to_string()),
            ("out", dest.display().to_string()),
            ("id", doc.item.id.clone()),
            ("name", doc.item.name.clone()),
        ];
        run(&expand(&self.config.document_command, &vars), dest)
    }

    fn render_page(&self, stroke_file: &Path, size: PageSize, dest: &Path) -> Result<(), RenderError> {
        let vars = [
            ("input", stroke_file.display().to_string()),
            ("out", dest.display().to_string()),
            ("width", format!("{:.2}", size.width_pt)),
            ("height", format!("{:.2}", size.height_pt)),
        ];
        run(&expand(&self.config.page_command, &vars), dest)
    }

    fn rasterize(&self, pdf: &Path, page_index: usize, dpi: u32) -> Result<RgbImage, RenderError> {
        let scratch = tempfile::Builder::new()
            .prefix("inkmirror-raster-")
            .suffix(".png")
            .tempfile()?;
        let vars = [
            ("input", pdf.display().to_string()),
            ("out", scratch.path().display().to_string()),
            ("dpi", dpi.to_string()),
            ("page", (page_index + 1).to_string()),
        ];
        run(&expand(&self.config.raster_command, &vars), scratch.path())?;
        Ok(image::open(scratch.path())?.to_rgb8())
    }
}

/// Substitute `{key}` placeholders in every argument.
fn expand(template: &[String], vars: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}

fn run(argv: &[String], expected: &Path) -> Result<(), RenderError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| RenderError::NotConfigured("empty command".into()))?;

    tracing::debug!(command = %argv.join(" "), "running renderer");
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Err(RenderError::Command {
            command: argv.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    let produced = std::fs::metadata(expected)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);
    if !produced {
        return Err(RenderError::NoOutput(expected.to_path_buf()));
    }
    Ok(())
}
