//! Typed errors for the build pipeline.
//!
//! The coordinator and the binary work in `anyhow::Result`; the layers below
//! them return these enums so callers can tell a per-item fatal error
//! (no rendered output) apart from plain I/O or PDF failures.

use std::path::PathBuf;

/// Failure reported by a [`Renderer`](crate::render::Renderer).
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// The collaborator ran but produced nothing at the expected path.
    #[error("renderer produced no output at {0}")]
    NoOutput(PathBuf),

    /// No command is configured for the requested operation.
    #[error("renderer not configured: {0}")]
    NotConfigured(String),

    /// The external command exited unsuccessfully.
    #[error("render command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("raster decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure while building one document.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// The document renderer produced no `out.pdf`; fatal for the document.
    #[error("rendering produced no output for \"{name}\"")]
    NoOutput { name: String },

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("pdf error: {0}")]
    Pdf(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn pdf(msg: impl std::fmt::Display) -> Self {
        Self::Pdf(msg.to_string())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type BuildResult<T> = Result<T, BuildError>;

/// Failure reading or writing the run-level metadata files.
#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(BuildError::pdf("x").to_string().contains("pdf error:"));
        assert!(BuildError::NoOutput {
            name: "Notes".into()
        }
        .to_string()
        .contains("no output for \"Notes\""));
        assert!(RenderError::NotConfigured("document_command".into())
            .to_string()
            .contains("not configured"));
    }

    #[test]
    fn render_error_converts_into_build_error() {
        let err: BuildError = RenderError::NoOutput(PathBuf::from("/tmp/x.pdf")).into();
        assert!(matches!(err, BuildError::Render(RenderError::NoOutput(_))));
        assert!(err.to_string().contains("/tmp/x.pdf"));
    }

    #[test]
    fn io_preserves_path() {
        let err = BuildError::io("/out/doc", std::io::Error::other("boom"));
        let msg = err.to_string();
        assert!(msg.contains("/out/doc"));
        assert!(msg.contains("boom"));
    }
}
