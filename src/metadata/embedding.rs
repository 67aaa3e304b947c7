//! Metadata for embedding tensors exposed alongside the inputs.

use indexmap::IndexMap;
use serde_json::Value;

use super::{
    MetadataError,
    fields::{Dict, as_dict, check_known_keys, emit, lowercase_keys, opt_string, string_value},
    keys::EmbeddingKey,
};

/// A named embedding tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingMetadata {
    name: String,
    embedding_tensor_name: String,
    embedding_tensor_dtype: Option<String>,
}

impl EmbeddingMetadata {
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] if either name is empty.
    pub fn new(
        name: impl Into<String>,
        embedding_tensor_name: impl Into<String>,
    ) -> Result<Self, MetadataError> {
        let embedding = Self {
            name: name.into(),
            embedding_tensor_name: embedding_tensor_name.into(),
            embedding_tensor_dtype: None,
        };
        if embedding.name.is_empty() {
            return Err(MetadataError::invalid(
                "embedding name must be a non-empty string",
            ));
        }
        if embedding.embedding_tensor_name.is_empty() {
            return Err(MetadataError::invalid(format!(
                "embeddings.{}.embedding_tensor_name must be a non-empty string",
                embedding.name
            )));
        }
        Ok(embedding)
    }

    #[must_use]
    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.embedding_tensor_dtype = Some(dtype.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn embedding_tensor_name(&self) -> &str {
        &self.embedding_tensor_name
    }

    #[must_use]
    pub fn embedding_tensor_dtype(&self) -> Option<&str> {
        self.embedding_tensor_dtype.as_deref()
    }

    pub fn set_embedding_tensor_dtype(&mut self, dtype: impl Into<String>) {
        self.embedding_tensor_dtype = Some(dtype.into());
    }

    #[must_use]
    pub fn tensor_dtypes(&self) -> IndexMap<String, String> {
        self.embedding_tensor_dtype
            .iter()
            .map(|dtype| (self.embedding_tensor_name.clone(), dtype.clone()))
            .collect()
    }

    /// Parse the entry stored under `embeddings.<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] for unknown keys, wrong
    /// types, or a missing `embedding_tensor_name`.
    pub fn from_dict(name: &str, value: &Value) -> Result<Self, MetadataError> {
        let ctx = format!("embeddings.{name}");
        let dict = lowercase_keys(as_dict(value, &ctx)?, &ctx)?;
        check_known_keys::<EmbeddingKey>(&dict, &[], &ctx)?;
        let tensor = opt_string(&dict, EmbeddingKey::EmbeddingTensorName, &ctx)?
            .ok_or_else(|| {
                MetadataError::invalid(format!("{ctx}.embedding_tensor_name is required"))
            })?;
        let mut embedding = Self::new(name, tensor)?;
        embedding.embedding_tensor_dtype =
            opt_string(&dict, EmbeddingKey::EmbeddingTensorDtype, &ctx)?;
        Ok(embedding)
    }

    #[must_use]
    pub fn to_dict(&self, full: bool) -> Dict {
        let mut out = Dict::new();
        emit(
            &mut out,
            EmbeddingKey::EmbeddingTensorName,
            Some(Value::String(self.embedding_tensor_name.clone())),
            full,
        );
        emit(
            &mut out,
            EmbeddingKey::EmbeddingTensorDtype,
            string_value(self.embedding_tensor_dtype.as_ref()),
            full,
        );
        out
    }
}
