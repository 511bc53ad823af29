//! # inkmirror
//!
//! Incremental mirror of a reMarkable notebook store into a tree of derived
//! artifacts: a rendered PDF per document with a searchable layer of
//! recognized handwriting, per-page renders, OCR results and thumbnails.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────────┐
//! │ xochitl dir  │──▶│ SyncCoordinator │──▶│ PageBuildPipeline │
//! │ <id>.content │   │ (sync)          │   │ (pipeline)        │
//! └──────────────┘   └───────┬────────┘   └────────┬─────────┘
//!                            │                     │
//!                            ▼                     ▼
//!                    metadata.json        ArtifactCache ─ Renderer
//!                    errors.json          geometry      ─ OcrEngine
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! inkmirror sync ./xochitl ./out            # render, OCR, stitch
//! inkmirror sync ./xochitl ./out --no-ocr   # render only
//! inkmirror check-config
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Source items and pages |
//! | [`scanner`] | Source store parsing and hashing |
//! | [`metadata`] | Run-level records |
//! | [`cache`] | Per-page artifact reuse |
//! | [`geometry`] | Word quad → text placement |
//! | [`overlay`] | Text-layer stitching |
//! | [`search_index`] | Per-document text index |
//! | [`render`] | Renderer collaborator |
//! | [`ocr`] | OCR collaborator and records |
//! | [`pipeline`] | One-document build |
//! | [`sync`] | Whole-tree reconciliation |

pub mod cache;
pub mod config;
pub mod error;
pub mod font_metrics;
pub mod geometry;
pub mod metadata;
pub mod models;
pub mod ocr;
pub mod overlay;
pub mod pdf;
pub mod pipeline;
pub mod render;
pub mod scanner;
pub mod search_index;
pub mod sync;
pub mod thumbnails;
