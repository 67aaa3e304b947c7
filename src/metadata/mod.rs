//! Explanation metadata: entity records, the top-level envelope, and the
//! indices explainers read from it.

pub mod domain;
pub mod embedding;
pub mod enums;
pub mod envelope;
mod fields;
pub mod indices;
pub mod input;
mod json;
pub mod keys;
pub mod output;
pub mod sigdef;
pub mod visualization;

use std::path::PathBuf;

use thiserror::Error;

use crate::version::VersionError;

pub use domain::FeatureDomain;
pub use embedding::EmbeddingMetadata;
pub use enums::{Encoding, Framework, Modality, OverlayType, Polarity, VisualizationType};
pub use envelope::{ExplainMetadata, ExplainMetadataBuilder};
pub use indices::{SparseTensorNames, TensorIndices};
pub use input::{InputMetadata, InputMetadataBuilder};
pub use keys::FieldKeys;
pub use output::{IndexNames, OutputMetadata, OutputMetadataBuilder};
pub use sigdef::SigDefInputMetadata;
pub use visualization::{Visualization, VisualizationKind};

/// Upper bound on the number of baselines a single input may carry.
pub const MAX_NUM_BASELINES: usize = 10;

/// Errors produced while building, validating, or (de)serialising metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// A structural or cross-field rule was violated.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    /// The framework name is not one of the supported frameworks.
    #[error("unsupported framework \"{framework}\"")]
    Unsupported { framework: String },
    #[error(transparent)]
    Version(#[from] VersionError),
    /// The document is not valid JSON.
    #[error("failed to parse metadata JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to access metadata file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MetadataError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidMetadata(message.into())
    }

    /// Whether this error reports a violated metadata rule.
    #[must_use]
    pub fn is_invalid_metadata(&self) -> bool {
        matches!(self, Self::InvalidMetadata(_))
    }
}
