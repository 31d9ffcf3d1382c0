//! Error taxonomy for a single city run.
//!
//! The first four variants are fatal for the affected city: the pipeline
//! aborts before any document is produced. Statistical degeneracies (empty
//! zones, undefined correlations, sparse bins) are never errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::raster::LayerKind;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid geometry in {source_name}: {reason}")]
    InvalidGeometry { source_name: String, reason: String },

    #[error("{layer} has shape {found:?}; expected it to align with {expected:?}")]
    ShapeMismatch {
        layer: LayerKind,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("land-cover code {0} is not in the classification table")]
    UnknownLandCoverCode(i32),

    #[error("{0} has no finite pixels inside the zoned region")]
    EmptyLayer(LayerKind),

    #[error("least-squares solve failed: {0}")]
    Regression(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
