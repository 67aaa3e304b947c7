//! Core library entry point.
//! Re-exports the metadata model, feed batching, and data utilities.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod data;
pub mod metadata;
pub mod tensor;
pub mod version;

#[cfg(feature = "cli")]
pub use cli::XmetaArgs;
pub use config::BatchingConfig;
pub use data::DataError;
pub use metadata::{
    EmbeddingMetadata, ExplainMetadata, Framework, InputMetadata, MetadataError, OutputMetadata,
    SigDefInputMetadata,
};
pub use tensor::{BatchError, Feed, SparseTensor, TensorValue};
pub use version::{SemanticVersion, VersionError};
