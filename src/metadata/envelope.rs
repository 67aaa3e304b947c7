//! The top-level explanation metadata document.

use std::{fs, path::Path};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use super::{
    EmbeddingMetadata, InputMetadata, MetadataError, OutputMetadata, SigDefInputMetadata,
    enums::Framework,
    fields::{
        Dict, as_dict, check_known_keys, lowercase_keys, opt_string, opt_string_list, opt_value,
    },
    indices::TensorIndices,
    json,
    keys::{EnvelopeKey, FieldKeys},
};
use crate::version::SemanticVersion;

/// Validated explanation metadata for one model.
///
/// Entity collections keep their construction order; baseline slot `i` of
/// every input binds positionally, so the order is part of the contract.
/// All derived lookup tables are computed on construction and exposed
/// through [`ExplainMetadata::indices`].
///
/// # Examples
///
/// ```
/// use explain_metadata::metadata::ExplainMetadata;
///
/// let metadata = ExplainMetadata::from_json(
///     r#"{"inputs": {"x": {"input_tensor_name": "x:0"}},
///         "outputs": {"y": {"output_tensor_name": "y:0"}},
///         "framework": "tensorflow"}"#,
/// )
/// .unwrap();
/// assert_eq!(metadata.indices().dense_tensor_names["x"], "x:0");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainMetadata {
    inputs: IndexMap<String, InputMetadata>,
    outputs: IndexMap<String, OutputMetadata>,
    embeddings: IndexMap<String, EmbeddingMetadata>,
    sigdef_inputs: IndexMap<String, SigDefInputMetadata>,
    framework: Framework,
    preparer_version: Option<SemanticVersion>,
    tags: Vec<String>,
    indices: TensorIndices,
}

/// Collects entities before validating them as a whole.
#[derive(Debug, Clone)]
#[must_use]
pub struct ExplainMetadataBuilder {
    framework: Framework,
    inputs: Vec<InputMetadata>,
    outputs: Vec<OutputMetadata>,
    embeddings: Vec<EmbeddingMetadata>,
    sigdef_inputs: Vec<SigDefInputMetadata>,
    preparer_version: Option<SemanticVersion>,
    tags: Vec<String>,
}

impl ExplainMetadataBuilder {
    pub fn input(mut self, input: InputMetadata) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn inputs(mut self, inputs: impl IntoIterator<Item = InputMetadata>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    pub fn output(mut self, output: OutputMetadata) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn outputs(mut self, outputs: impl IntoIterator<Item = OutputMetadata>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn embedding(mut self, embedding: EmbeddingMetadata) -> Self {
        self.embeddings.push(embedding);
        self
    }

    pub fn sigdef_input(mut self, sigdef: SigDefInputMetadata) -> Self {
        self.sigdef_inputs.push(sigdef);
        self
    }

    pub fn preparer_version(mut self, version: SemanticVersion) -> Self {
        self.preparer_version = Some(version);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Check cross-entity rules and compute the derived indices.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] for duplicate entity names
    /// or inputs that disagree on the number of baselines.
    pub fn build(self) -> Result<ExplainMetadata, MetadataError> {
        let inputs = keyed(self.inputs, "inputs", InputMetadata::name)?;
        let outputs = keyed(self.outputs, "outputs", OutputMetadata::name)?;
        let embeddings = keyed(self.embeddings, "embeddings", EmbeddingMetadata::name)?;
        let sigdef_inputs = keyed(
            self.sigdef_inputs,
            "sigdef_inputs",
            SigDefInputMetadata::name,
        )?;
        let indices = TensorIndices::build(
            inputs.values(),
            outputs.values(),
            embeddings.values(),
            sigdef_inputs.values(),
        )?;
        debug!(
            framework = %self.framework,
            inputs = inputs.len(),
            outputs = outputs.len(),
            embeddings = embeddings.len(),
            sigdef_inputs = sigdef_inputs.len(),
            baselines = indices.num_baselines(),
            "built explanation metadata"
        );
        Ok(ExplainMetadata {
            inputs,
            outputs,
            embeddings,
            sigdef_inputs,
            framework: self.framework,
            preparer_version: self.preparer_version,
            tags: self.tags,
            indices,
        })
    }
}

fn keyed<T>(
    items: Vec<T>,
    section: &str,
    name: impl Fn(&T) -> &str,
) -> Result<IndexMap<String, T>, MetadataError> {
    let mut out = IndexMap::with_capacity(items.len());
    for item in items {
        let key = name(&item).to_owned();
        if out.contains_key(&key) {
            return Err(MetadataError::invalid(format!(
                "{section} contains \"{key}\" more than once"
            )));
        }
        out.insert(key, item);
    }
    Ok(out)
}

fn section<'a>(dict: &'a Dict, key: EnvelopeKey) -> Result<Option<&'a Dict>, MetadataError> {
    opt_value(dict, key)
        .map(|v| as_dict(v, key.as_str()))
        .transpose()
}

fn parse_section<T>(
    dict: &Dict,
    key: EnvelopeKey,
    parse: impl Fn(&str, &Value) -> Result<T, MetadataError>,
) -> Result<Vec<T>, MetadataError> {
    section(dict, key)?
        .into_iter()
        .flatten()
        .map(|(name, value)| parse(name, value))
        .collect()
}

fn entity_map<T>(entities: &IndexMap<String, T>, render: impl Fn(&T) -> Dict) -> Value {
    Value::Object(
        entities
            .iter()
            .map(|(name, entity)| (name.clone(), Value::Object(render(entity))))
            .collect(),
    )
}

impl ExplainMetadata {
    pub fn builder(framework: Framework) -> ExplainMetadataBuilder {
        ExplainMetadataBuilder {
            framework,
            inputs: Vec::new(),
            outputs: Vec::new(),
            embeddings: Vec::new(),
            sigdef_inputs: Vec::new(),
            preparer_version: None,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn framework(&self) -> Framework {
        self.framework
    }

    #[must_use]
    pub fn preparer_version(&self) -> Option<&SemanticVersion> {
        self.preparer_version.as_ref()
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Inputs keyed by friendly name, in construction order.
    #[must_use]
    pub fn inputs(&self) -> &IndexMap<String, InputMetadata> {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &IndexMap<String, OutputMetadata> {
        &self.outputs
    }

    #[must_use]
    pub fn embeddings(&self) -> &IndexMap<String, EmbeddingMetadata> {
        &self.embeddings
    }

    #[must_use]
    pub fn sigdef_inputs(&self) -> &IndexMap<String, SigDefInputMetadata> {
        &self.sigdef_inputs
    }

    #[must_use]
    pub fn input_by_name(&self, name: &str) -> Option<&InputMetadata> {
        self.inputs.get(name)
    }

    #[must_use]
    pub fn output_by_name(&self, name: &str) -> Option<&OutputMetadata> {
        self.outputs.get(name)
    }

    #[must_use]
    pub fn embedding_by_name(&self, name: &str) -> Option<&EmbeddingMetadata> {
        self.embeddings.get(name)
    }

    #[must_use]
    pub fn sigdef_input_by_name(&self, name: &str) -> Option<&SigDefInputMetadata> {
        self.sigdef_inputs.get(name)
    }

    /// Derived lookup tables for the explainer runtime.
    #[must_use]
    pub fn indices(&self) -> &TensorIndices {
        &self.indices
    }

    /// Baselines per input, shared by every input that declares any.
    #[must_use]
    pub fn num_baselines(&self) -> usize {
        self.indices.num_baselines()
    }

    /// Gradient tensors for `output_name` across all inputs.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] when an input declares
    /// gradients but none for `output_name`.
    pub fn gradient_tensor_names_for(
        &self,
        output_name: &str,
    ) -> Result<IndexSet<String>, MetadataError> {
        self.indices.gradient_tensor_names_for(output_name)
    }

    /// Register a signature-only input discovered after construction.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] if the name is taken. The
    /// envelope is unchanged on error.
    pub fn append_sigdef_input(&mut self, sigdef: SigDefInputMetadata) -> Result<(), MetadataError> {
        if self.sigdef_inputs.contains_key(sigdef.name()) {
            return Err(MetadataError::invalid(format!(
                "sigdef_inputs contains \"{}\" more than once",
                sigdef.name()
            )));
        }
        self.indices
            .sigdef_input_tensor_names
            .insert(sigdef.name().to_owned(), sigdef.sigdef_input_tensor_name().to_owned());
        self.indices
            .tensor_name_to_dtype_mapping
            .extend(sigdef.tensor_dtypes());
        self.sigdef_inputs.insert(sigdef.name().to_owned(), sigdef);
        Ok(())
    }

    /// Parse a metadata mapping. Top-level keys are matched
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] for unknown keys, a missing
    /// or unknown framework, or any entity or cross-entity rule violation,
    /// and [`MetadataError::Version`] for a malformed `preparer_version`.
    pub fn from_dict(value: &Value) -> Result<Self, MetadataError> {
        let ctx = "metadata";
        let dict = lowercase_keys(as_dict(value, ctx)?, ctx)?;
        check_known_keys::<EnvelopeKey>(&dict, &[], ctx)?;

        let framework_name = opt_string(&dict, EnvelopeKey::Framework, ctx)?
            .filter(|f| !f.is_empty())
            .ok_or_else(|| MetadataError::invalid("metadata.framework is required"))?;
        let framework = Framework::parse(&framework_name).map_err(|_| {
            MetadataError::invalid(format!(
                "metadata.framework \"{framework_name}\" is not supported; expected one of {:?}",
                Framework::values()
            ))
        })?;

        let mut builder = Self::builder(framework)
            .inputs(parse_section(&dict, EnvelopeKey::Inputs, InputMetadata::from_dict)?)
            .outputs(parse_section(&dict, EnvelopeKey::Outputs, OutputMetadata::from_dict)?);
        for embedding in parse_section(&dict, EnvelopeKey::Embeddings, EmbeddingMetadata::from_dict)? {
            builder = builder.embedding(embedding);
        }
        for sigdef in parse_section(
            &dict,
            EnvelopeKey::SigdefInputs,
            SigDefInputMetadata::from_dict,
        )? {
            builder = builder.sigdef_input(sigdef);
        }
        if let Some(version) = opt_string(&dict, EnvelopeKey::PreparerVersion, ctx)? {
            builder = builder.preparer_version(SemanticVersion::parse(&version)?);
        }
        if let Some(tags) = opt_string_list(&dict, EnvelopeKey::Tags, ctx)? {
            builder = builder.tags(tags);
        }
        builder.build()
    }

    /// # Errors
    ///
    /// Returns [`MetadataError::Json`] for malformed JSON, otherwise as
    /// [`ExplainMetadata::from_dict`].
    pub fn from_json(text: &str) -> Result<Self, MetadataError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_dict(&value)
    }

    /// Read and parse a metadata file.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Io`] if the file cannot be read, otherwise as
    /// [`ExplainMetadata::from_json`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = text.len(), "read metadata file");
        Self::from_json(&text)
    }

    /// Render the document. Empty optional sections are omitted.
    #[must_use]
    pub fn to_dict(&self) -> Dict {
        let mut out = Dict::new();
        for key in EnvelopeKey::ALL {
            let value = match key {
                EnvelopeKey::Outputs => Some(entity_map(&self.outputs, |o| o.to_dict(false))),
                EnvelopeKey::Inputs => Some(entity_map(&self.inputs, |i| i.to_dict(false))),
                EnvelopeKey::Embeddings => (!self.embeddings.is_empty())
                    .then(|| entity_map(&self.embeddings, |e| e.to_dict(false))),
                EnvelopeKey::PreparerVersion => self
                    .preparer_version
                    .as_ref()
                    .map(|v| Value::String(v.to_string())),
                EnvelopeKey::Framework => Some(Value::String(self.framework.to_string())),
                EnvelopeKey::SigdefInputs => (!self.sigdef_inputs.is_empty())
                    .then(|| entity_map(&self.sigdef_inputs, |s| s.to_dict(false))),
                EnvelopeKey::Tags => (!self.tags.is_empty()).then(|| {
                    Value::Array(self.tags.iter().cloned().map(Value::String).collect())
                }),
            };
            if let Some(value) = value {
                out.insert(key.as_str().to_owned(), value);
            }
        }
        out
    }

    /// Render as JSON text.
    ///
    /// `indent` and `separators` behave as in Python's `json.dumps`: with no
    /// indent the separators default to `(", ", ": ")`, with an indent to
    /// `(",", ": ")`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Json`] if serialisation fails.
    pub fn to_json(
        &self,
        indent: Option<usize>,
        separators: Option<(&str, &str)>,
    ) -> Result<String, MetadataError> {
        Ok(json::to_string(&self.to_dict(), indent, separators)?)
    }

    /// Write the document with a 4-space indent and `(", ", ": ")`
    /// separators.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Io`] if the file cannot be written.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), MetadataError> {
        let path = path.as_ref();
        let text = self.to_json(Some(4), Some((", ", ": ")))?;
        fs::write(path, &text).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = text.len(), "wrote metadata file");
        Ok(())
    }
}

impl Serialize for ExplainMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_dict().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExplainMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_dict(&value).map_err(serde::de::Error::custom)
    }
}
