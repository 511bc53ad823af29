//! Handwriting recognition.
//!
//! A page render is rasterized, PNG-encoded and sent to an [`OcrEngine`].
//! The raw response is persisted unmodified in an [`OcrRecord`] together
//! with the sizes needed later to map its pixel coordinates back onto a PDF
//! page.
//!
//! Responses follow the Cloud Vision `TEXT_DETECTION` shape:
//! `responses[0].textAnnotations[0]` is the whole-image transcription, every
//! following annotation is one word with `boundingPoly.vertices`.

use chrono::{DateTime, Utc};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use base64::Engine as _;

use crate::error::{BuildError, BuildResult};
use crate::geometry::Dimensions;
use crate::models::{Quad, RawPage, RecognizedWord};
use crate::pdf;
use crate::render::Renderer;

/// Text recognition service.
pub trait OcrEngine {
    /// Recognize text in a PNG image. `None` means the service was
    /// unavailable or answered with an error.
    fn annotate(&self, png: &[u8], language: &str) -> Option<Value>;
}

/// Google Cloud Vision `images:annotate` client.
pub struct GoogleVisionClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl GoogleVisionClient {
    pub fn new(endpoint: &str, api_key: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

/// Request body for one image.
pub fn annotate_request(png: &[u8], language: &str) -> Value {
    serde_json::json!({
        "requests": [{
            "image": { "content": base64::engine::general_purpose::STANDARD.encode(png) },
            "features": { "type": "TEXT_DETECTION" },
            "imageContext": { "languageHints": [language] }
        }]
    })
}

impl OcrEngine for GoogleVisionClient {
    fn annotate(&self, png: &[u8], language: &str) -> Option<Value> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&annotate_request(png, language))
            .send();

        let response = match resp {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "vision request failed");
                return None;
            }
        };
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().unwrap_or_default();
            tracing::warn!(%status, body = %body_text, "vision API error");
            return None;
        }
        match response.json::<Value>() {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(error = %e, "vision response was not JSON");
                None
            }
        }
    }
}

/// Persisted OCR result for one page (`rm_output/{i} - {id}.ocr.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRecord {
    /// Hash of the stroke file the render was made from.
    pub rm_hash: Option<String>,
    #[serde(default)]
    pub backing_index: Option<u32>,
    /// Size of the page render in points.
    pub pdf_width_pt: f64,
    pub pdf_height_pt: f64,
    /// Size of the image sent for recognition.
    pub img_width_px: u32,
    pub img_height_px: u32,
    pub dpi: u32,
    pub timestamp: DateTime<Utc>,
    pub gcv_response: Value,
}

impl OcrRecord {
    pub fn load(path: &Path) -> BuildResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| BuildError::io(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> BuildResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(|e| BuildError::io(path, e))
    }

    pub fn source_size(&self) -> Dimensions {
        Dimensions::new(self.pdf_width_pt, self.pdf_height_pt)
    }

    pub fn image_size(&self) -> Dimensions {
        Dimensions::new(f64::from(self.img_width_px), f64::from(self.img_height_px))
    }

    fn annotations(&self) -> &[Value] {
        self.gcv_response
            .get("responses")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("textAnnotations"))
            .and_then(|a| a.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[])
    }

    /// Whole-page transcription, empty if nothing was recognized.
    pub fn full_text(&self) -> String {
        self.annotations()
            .first()
            .and_then(|a| a.get("description"))
            .and_then(|d| d.as_str())
            .unwrap_or("")
            .trim()
            .to_string()
    }

    /// Word annotations in response order. Missing vertex coordinates
    /// read as zero.
    pub fn words(&self) -> Vec<RecognizedWord> {
        self.annotations()
            .iter()
            .skip(1)
            .map(|word| {
                let text = word
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or("")
                    .to_string();
                let vertices = word
                    .get("boundingPoly")
                    .and_then(|b| b.get("vertices"))
                    .and_then(|v| v.as_array())
                    .map(|vs| vs.iter().map(vertex).collect())
                    .unwrap_or_default();
                RecognizedWord {
                    text,
                    quad: Quad { vertices },
                }
            })
            .collect()
    }
}

fn vertex(v: &Value) -> Point {
    let coord = |key: &str| v.get(key).and_then(|c| c.as_f64()).unwrap_or(0.0);
    Point::new(coord("x"), coord("y"))
}

/// What happened to a page's recognition step.
#[derive(Debug, Clone, PartialEq)]
pub enum OcrOutcome {
    Recognized(OcrRecord),
    Reused(OcrRecord),
    /// Recognition failed; the page gets no text layer.
    Unavailable(String),
    /// No stroke render, or recognition is switched off.
    Skipped,
}

/// Settings for one recognition call.
#[derive(Debug, Clone)]
pub struct OcrRequest<'a> {
    pub language: &'a str,
    pub dpi: u32,
}

/// Rasterize the single-page render at `render_pdf` and recognize it.
pub fn recognize_page(
    renderer: &dyn Renderer,
    engine: &dyn OcrEngine,
    render_pdf: &Path,
    page: &RawPage,
    request: &OcrRequest<'_>,
) -> OcrOutcome {
    let Some(source) = pdf::page_size(render_pdf, 0) else {
        return OcrOutcome::Unavailable(format!("unreadable page render {}", render_pdf.display()));
    };
    let image = match renderer.rasterize(render_pdf, 0, request.dpi) {
        Ok(img) => img,
        Err(e) => return OcrOutcome::Unavailable(format!("rasterize failed: {}", e)),
    };
    let mut png = Vec::new();
    if let Err(e) = image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png) {
        return OcrOutcome::Unavailable(format!("png encode failed: {}", e));
    }

    tracing::info!(page = %page.id, "sending OCR request");
    match engine.annotate(&png, request.language) {
        Some(response) => OcrOutcome::Recognized(OcrRecord {
            rm_hash: page.content_hash.clone(),
            backing_index: page.backing_index,
            pdf_width_pt: source.width,
            pdf_height_pt: source.height,
            img_width_px: image.width(),
            img_height_px: image.height(),
            dpi: request.dpi,
            timestamp: Utc::now(),
            gcv_response: response,
        }),
        None => OcrOutcome::Unavailable("recognition service unavailable".into()),
    }
}
