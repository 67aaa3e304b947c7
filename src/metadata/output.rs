//! Metadata for a model output the explainer attributes against.

use indexmap::IndexMap;
use serde_json::Value;

use super::{
    MetadataError,
    fields::{
        Dict, as_dict, check_known_keys, emit, ensure_unique, lowercase_keys, opt_string,
        opt_string_list, string_value,
    },
    keys::OutputKey,
};

/// How output positions map to human-readable labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexNames {
    /// Ordered, unique labels for each output position.
    Labels(Vec<String>),
    /// Key of a tensor in the prediction that carries the labels.
    Key(String),
}

/// Describes one model output.
///
/// # Examples
///
/// ```
/// use explain_metadata::metadata::OutputMetadata;
///
/// let output = OutputMetadata::builder("probabilities")
///     .output_tensor_name("softmax:0")
///     .index_name_mapping(["cat", "dog"])
///     .build()
///     .unwrap();
/// assert_eq!(output.labels(), Some(&["cat".to_owned(), "dog".to_owned()][..]));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMetadata {
    name: String,
    output_tensor_name: Option<String>,
    output_tensor_dtype: Option<String>,
    index_names: Option<IndexNames>,
}

/// Incremental constructor for [`OutputMetadata`].
#[derive(Debug, Clone)]
#[must_use]
pub struct OutputMetadataBuilder {
    inner: OutputMetadata,
}

impl OutputMetadataBuilder {
    pub fn output_tensor_name(mut self, name: impl Into<String>) -> Self {
        self.inner.output_tensor_name = Some(name.into());
        self
    }

    pub fn output_tensor_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.inner.output_tensor_dtype = Some(dtype.into());
        self
    }

    pub fn index_name_mapping<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.index_names = Some(IndexNames::Labels(
            labels.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn index_name_mapping_key(mut self, key: impl Into<String>) -> Self {
        self.inner.index_names = Some(IndexNames::Key(key.into()));
        self
    }

    /// Validate and return the record.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] for an empty name or
    /// repeated labels.
    pub fn build(self) -> Result<OutputMetadata, MetadataError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

impl OutputMetadata {
    pub fn builder(name: impl Into<String>) -> OutputMetadataBuilder {
        OutputMetadataBuilder {
            inner: Self {
                name: name.into(),
                output_tensor_name: None,
                output_tensor_dtype: None,
                index_names: None,
            },
        }
    }

    fn validate(&self) -> Result<(), MetadataError> {
        if self.name.is_empty() {
            return Err(MetadataError::invalid("output name must be a non-empty string"));
        }
        if let Some(IndexNames::Labels(labels)) = &self.index_names {
            ensure_unique(labels, &format!("outputs.{}.index_name_mapping", self.name))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The output tensor; the friendly name when unset.
    #[must_use]
    pub fn output_tensor_name(&self) -> &str {
        self.output_tensor_name.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn has_output_tensor_name(&self) -> bool {
        self.output_tensor_name.is_some()
    }

    #[must_use]
    pub fn output_tensor_dtype(&self) -> Option<&str> {
        self.output_tensor_dtype.as_deref()
    }

    #[must_use]
    pub fn index_names(&self) -> Option<&IndexNames> {
        self.index_names.as_ref()
    }

    /// The explicit label list, if the output carries one.
    #[must_use]
    pub fn labels(&self) -> Option<&[String]> {
        match &self.index_names {
            Some(IndexNames::Labels(labels)) => Some(labels),
            _ => None,
        }
    }

    pub fn set_output_tensor_dtype(&mut self, dtype: impl Into<String>) {
        self.output_tensor_dtype = Some(dtype.into());
    }

    #[must_use]
    pub fn tensor_dtypes(&self) -> IndexMap<String, String> {
        self.output_tensor_dtype
            .iter()
            .map(|dtype| (self.output_tensor_name().to_owned(), dtype.clone()))
            .collect()
    }

    /// Parse the entry stored under `outputs.<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] for unknown keys, wrong
    /// types, both label forms at once, or repeated labels.
    pub fn from_dict(name: &str, value: &Value) -> Result<Self, MetadataError> {
        let ctx = format!("outputs.{name}");
        let dict = lowercase_keys(as_dict(value, &ctx)?, &ctx)?;
        check_known_keys::<OutputKey>(&dict, &[], &ctx)?;
        let labels = opt_string_list(&dict, OutputKey::IndexNameMapping, &ctx)?;
        let key = opt_string(&dict, OutputKey::IndexNameMappingKey, &ctx)?;
        let index_names = match (labels, key) {
            (Some(_), Some(_)) => {
                return Err(MetadataError::invalid(format!(
                    "{ctx}: only one of index_name_mapping and index_name_mapping_key may be set"
                )));
            }
            (Some(labels), None) => Some(IndexNames::Labels(labels)),
            (None, Some(key)) => Some(IndexNames::Key(key)),
            (None, None) => None,
        };
        let output = Self {
            name: name.to_owned(),
            output_tensor_name: opt_string(&dict, OutputKey::OutputTensorName, &ctx)?,
            output_tensor_dtype: opt_string(&dict, OutputKey::OutputTensorDtype, &ctx)?,
            index_names,
        };
        output.validate()?;
        Ok(output)
    }

    #[must_use]
    pub fn to_dict(&self, full: bool) -> Dict {
        let mut out = Dict::new();
        emit(
            &mut out,
            OutputKey::OutputTensorName,
            string_value(self.output_tensor_name.as_ref()),
            full,
        );
        emit(
            &mut out,
            OutputKey::OutputTensorDtype,
            string_value(self.output_tensor_dtype.as_ref()),
            full,
        );
        let (labels, key) = match &self.index_names {
            Some(IndexNames::Labels(labels)) => (
                Some(Value::Array(labels.iter().cloned().map(Value::String).collect())),
                None,
            ),
            Some(IndexNames::Key(key)) => (None, Some(Value::String(key.clone()))),
            None => (None, None),
        };
        emit(&mut out, OutputKey::IndexNameMapping, labels, full);
        emit(&mut out, OutputKey::IndexNameMappingKey, key, full);
        out
    }
}
