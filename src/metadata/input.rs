//! Metadata for a single explainable input feature.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use super::{
    MAX_NUM_BASELINES, MetadataError,
    domain::FeatureDomain,
    enums::{Encoding, Modality},
    fields::{
        Dict, as_dict, check_known_keys, emit, ensure_unique, lowercase_keys, opt_bool, opt_list,
        opt_string, opt_string_list, opt_string_map, opt_value, string_list_value,
        string_map_value, string_value,
    },
    keys::{DEPRECATED_INPUT_KEYS, InputKey},
    visualization::Visualization,
};

/// Describes how the explainer reads one input feature of the model.
///
/// Built through [`InputMetadata::builder`]; every constructor validates the
/// record before returning it.
///
/// # Examples
///
/// ```
/// use explain_metadata::metadata::{Encoding, InputMetadata};
///
/// let input = InputMetadata::builder("words")
///     .input_tensor_name("words:0")
///     .encoded_tensor_name("embedding/lookup:0")
///     .encoding(Encoding::CombinedEmbedding)
///     .build()
///     .unwrap();
/// assert_eq!(input.input_tensor_name(), "words:0");
/// assert!(!input.is_sparse());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct InputMetadata {
    name: String,
    input_tensor_name: Option<String>,
    input_tensor_dtype: Option<String>,
    indices_tensor_name: Option<String>,
    indices_tensor_dtype: Option<String>,
    dense_shape_tensor_name: Option<String>,
    dense_shape_tensor_dtype: Option<String>,
    encoded_tensor_name: Option<String>,
    encoded_tensor_dtype: Option<String>,
    modality: Modality,
    encoding: Encoding,
    input_baselines: Option<Vec<Value>>,
    encoded_baselines: Option<Vec<Value>>,
    index_feature_mapping: Option<Vec<String>>,
    gradient_tensor_names: Option<IndexMap<String, String>>,
    gradient_tensor_dtypes: Option<IndexMap<String, String>>,
    weight_values_name: Option<String>,
    weight_values_dtype: Option<String>,
    weight_indices_name: Option<String>,
    weight_indices_dtype: Option<String>,
    weight_dense_shape_name: Option<String>,
    weight_dense_shape_dtype: Option<String>,
    domain: Option<FeatureDomain>,
    visualization: Option<Visualization>,
    group_name: Option<String>,
    is_sequential: bool,
}

/// Incremental constructor for [`InputMetadata`].
#[derive(Debug, Clone)]
#[must_use]
pub struct InputMetadataBuilder {
    inner: InputMetadata,
}

macro_rules! builder_strings {
    ($($(#[$meta:meta])* $field:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $field(mut self, value: impl Into<String>) -> Self {
                self.inner.$field = Some(value.into());
                self
            }
        )+
    };
}

impl InputMetadataBuilder {
    builder_strings!(
        /// Tensor fed with the raw feature. Defaults to the friendly name.
        input_tensor_name,
        input_tensor_dtype,
        /// Indices tensor of a sparse input.
        indices_tensor_name,
        indices_tensor_dtype,
        /// Dense-shape tensor of a sparse input.
        dense_shape_tensor_name,
        dense_shape_tensor_dtype,
        /// Transformed tensor the explainer attributes against.
        encoded_tensor_name,
        encoded_tensor_dtype,
        weight_values_name,
        weight_values_dtype,
        weight_indices_name,
        weight_indices_dtype,
        weight_dense_shape_name,
        weight_dense_shape_dtype,
        group_name,
    );

    pub fn modality(mut self, modality: Modality) -> Self {
        self.inner.modality = modality;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.inner.encoding = encoding;
        self
    }

    pub fn input_baselines(mut self, baselines: Vec<Value>) -> Self {
        self.inner.input_baselines = Some(baselines);
        self
    }

    pub fn encoded_baselines(mut self, baselines: Vec<Value>) -> Self {
        self.inner.encoded_baselines = Some(baselines);
        self
    }

    pub fn index_feature_mapping<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.index_feature_mapping = Some(features.into_iter().map(Into::into).collect());
        self
    }

    /// Gradient routes keyed by output friendly name.
    pub fn gradient_tensors(
        mut self,
        names: IndexMap<String, String>,
        dtypes: IndexMap<String, String>,
    ) -> Self {
        self.inner.gradient_tensor_names = Some(names);
        self.inner.gradient_tensor_dtypes = Some(dtypes);
        self
    }

    /// Sparse weight tensors for a weighted feature column.
    pub fn weight_tensors(
        self,
        values: impl Into<String>,
        indices: impl Into<String>,
        dense_shape: impl Into<String>,
    ) -> Self {
        self.weight_values_name(values)
            .weight_indices_name(indices)
            .weight_dense_shape_name(dense_shape)
    }

    pub fn domain(mut self, domain: FeatureDomain) -> Self {
        self.inner.domain = Some(domain);
        self
    }

    pub fn visualization(mut self, visualization: Visualization) -> Self {
        self.inner.visualization = Some(visualization);
        self
    }

    pub fn is_sequential(mut self, sequential: bool) -> Self {
        self.inner.is_sequential = sequential;
        self
    }

    /// Validate and return the record.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] when any per-input rule is
    /// violated.
    pub fn build(self) -> Result<InputMetadata, MetadataError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

impl InputMetadata {
    /// Start building an input with friendly name `name`.
    pub fn builder(name: impl Into<String>) -> InputMetadataBuilder {
        InputMetadataBuilder {
            inner: Self {
                name: name.into(),
                input_tensor_name: None,
                input_tensor_dtype: None,
                indices_tensor_name: None,
                indices_tensor_dtype: None,
                dense_shape_tensor_name: None,
                dense_shape_tensor_dtype: None,
                encoded_tensor_name: None,
                encoded_tensor_dtype: None,
                modality: Modality::default(),
                encoding: Encoding::default(),
                input_baselines: None,
                encoded_baselines: None,
                index_feature_mapping: None,
                gradient_tensor_names: None,
                gradient_tensor_dtypes: None,
                weight_values_name: None,
                weight_values_dtype: None,
                weight_indices_name: None,
                weight_indices_dtype: None,
                weight_dense_shape_name: None,
                weight_dense_shape_dtype: None,
                domain: None,
                visualization: None,
                group_name: None,
                is_sequential: false,
            },
        }
    }

    fn context(&self) -> String {
        format!("inputs.{}", self.name)
    }

    fn validate(&self) -> Result<(), MetadataError> {
        let ctx = self.context();
        if self.name.is_empty() {
            return Err(MetadataError::invalid("input name must be a non-empty string"));
        }
        self.validate_index_feature_mapping(&ctx)?;
        check_baselines(
            self.input_baselines.as_deref(),
            self.encoded_baselines.as_deref(),
            &ctx,
        )?;
        check_gradient_keys(
            self.gradient_tensor_names.as_ref(),
            self.gradient_tensor_dtypes.as_ref(),
            &ctx,
        )?;
        self.validate_sparse_tensors(&ctx)?;
        if let Some(domain) = &self.domain {
            if domain.has_range() && self.encoding != Encoding::Identity {
                return Err(MetadataError::invalid(format!(
                    "{ctx}: domain min/max require encoding \"identity\", got \"{}\"",
                    self.encoding
                )));
            }
        }
        if let Some(vis) = &self.visualization {
            vis.validate()
                .map_err(|e| MetadataError::invalid(format!("{ctx}: {e}")))?;
        }
        Ok(())
    }

    fn validate_index_feature_mapping(&self, ctx: &str) -> Result<(), MetadataError> {
        let mapping = self
            .index_feature_mapping
            .as_deref()
            .filter(|m| !m.is_empty());
        match (self.encoding.requires_index_feature_mapping(), mapping) {
            (true, None) => Err(MetadataError::invalid(format!(
                "{ctx}: encoding \"{}\" requires a non-empty index_feature_mapping",
                self.encoding
            ))),
            (false, Some(_)) => Err(MetadataError::invalid(format!(
                "{ctx}: index_feature_mapping is only valid with encodings \
                 bag_of_features, bag_of_features_sparse or indicator, got \"{}\"",
                self.encoding
            ))),
            (_, Some(m)) => ensure_unique(m, &format!("{ctx}.index_feature_mapping")),
            (false, None) => Ok(()),
        }
    }

    fn validate_sparse_tensors(&self, ctx: &str) -> Result<(), MetadataError> {
        if self.indices_tensor_name.is_some() != self.dense_shape_tensor_name.is_some() {
            return Err(MetadataError::invalid(format!(
                "{ctx}: indices_tensor_name and dense_shape_tensor_name must be set together"
            )));
        }
        let trio = [
            ("weight_values_name", &self.weight_values_name),
            ("weight_indices_name", &self.weight_indices_name),
            ("weight_dense_shape_name", &self.weight_dense_shape_name),
        ];
        let missing: Vec<&str> = trio
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() && missing.len() < trio.len() {
            return Err(MetadataError::invalid(format!(
                "{ctx}: weight tensors must be all present or all absent; missing {missing:?}"
            )));
        }
        let dtype_without_name = [
            ("weight_values_dtype", &self.weight_values_dtype, &self.weight_values_name),
            ("weight_indices_dtype", &self.weight_indices_dtype, &self.weight_indices_name),
            (
                "weight_dense_shape_dtype",
                &self.weight_dense_shape_dtype,
                &self.weight_dense_shape_name,
            ),
        ]
        .into_iter()
        .find(|(_, dtype, name)| dtype.is_some() && name.is_none());
        if let Some((key, _, _)) = dtype_without_name {
            return Err(MetadataError::invalid(format!(
                "{ctx}: {key} is set but the weight tensors are not"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tensor fed with this feature; the friendly name when unset.
    #[must_use]
    pub fn input_tensor_name(&self) -> &str {
        self.input_tensor_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether an input tensor name was given explicitly.
    #[must_use]
    pub fn has_input_tensor_name(&self) -> bool {
        self.input_tensor_name.is_some()
    }

    #[must_use]
    pub fn input_tensor_dtype(&self) -> Option<&str> {
        self.input_tensor_dtype.as_deref()
    }

    #[must_use]
    pub fn indices_tensor_name(&self) -> Option<&str> {
        self.indices_tensor_name.as_deref()
    }

    #[must_use]
    pub fn dense_shape_tensor_name(&self) -> Option<&str> {
        self.dense_shape_tensor_name.as_deref()
    }

    #[must_use]
    pub fn encoded_tensor_name(&self) -> Option<&str> {
        self.encoded_tensor_name.as_deref()
    }

    #[must_use]
    pub fn encoded_tensor_dtype(&self) -> Option<&str> {
        self.encoded_tensor_dtype.as_deref()
    }

    #[must_use]
    pub fn modality(&self) -> Modality {
        self.modality
    }

    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[must_use]
    pub fn input_baselines(&self) -> Option<&[Value]> {
        self.input_baselines.as_deref()
    }

    #[must_use]
    pub fn encoded_baselines(&self) -> Option<&[Value]> {
        self.encoded_baselines.as_deref()
    }

    #[must_use]
    pub fn index_feature_mapping(&self) -> Option<&[String]> {
        self.index_feature_mapping.as_deref()
    }

    #[must_use]
    pub fn gradient_tensor_names(&self) -> Option<&IndexMap<String, String>> {
        self.gradient_tensor_names.as_ref()
    }

    #[must_use]
    pub fn gradient_tensor_dtypes(&self) -> Option<&IndexMap<String, String>> {
        self.gradient_tensor_dtypes.as_ref()
    }

    /// The `(values, indices, dense_shape)` weight tensors, if declared.
    #[must_use]
    pub fn weight_tensor_names(&self) -> Option<(&str, &str, &str)> {
        match (
            &self.weight_values_name,
            &self.weight_indices_name,
            &self.weight_dense_shape_name,
        ) {
            (Some(v), Some(i), Some(d)) => Some((v, i, d)),
            _ => None,
        }
    }

    #[must_use]
    pub fn domain(&self) -> Option<&FeatureDomain> {
        self.domain.as_ref()
    }

    #[must_use]
    pub fn visualization(&self) -> Option<&Visualization> {
        self.visualization.as_ref()
    }

    #[must_use]
    pub fn group_name(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    /// Whether the feature is a sequence belonging to a single prediction.
    /// Such inputs cannot be split across sub-batches.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        self.is_sequential
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.indices_tensor_name.is_some()
    }

    #[must_use]
    pub fn is_encoded(&self) -> bool {
        self.encoded_tensor_name.is_some()
    }

    pub fn set_input_tensor_dtype(&mut self, dtype: impl Into<String>) {
        self.input_tensor_dtype = Some(dtype.into());
    }

    pub fn set_indices_tensor_dtype(&mut self, dtype: impl Into<String>) {
        self.indices_tensor_dtype = Some(dtype.into());
    }

    pub fn set_dense_shape_tensor_dtype(&mut self, dtype: impl Into<String>) {
        self.dense_shape_tensor_dtype = Some(dtype.into());
    }

    pub fn set_encoded_tensor_dtype(&mut self, dtype: impl Into<String>) {
        self.encoded_tensor_dtype = Some(dtype.into());
    }

    /// Attach dtypes to the declared gradient tensors.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] unless `dtypes` is keyed by
    /// exactly the outputs of the gradient tensor names. The record is left
    /// unchanged on error.
    pub fn set_gradient_tensor_dtypes(
        &mut self,
        dtypes: IndexMap<String, String>,
    ) -> Result<(), MetadataError> {
        check_gradient_keys(
            self.gradient_tensor_names.as_ref(),
            Some(&dtypes),
            &self.context(),
        )?;
        self.gradient_tensor_dtypes = Some(dtypes);
        Ok(())
    }

    /// Attach dtypes to the weight tensors.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] if the input has no weight
    /// tensors.
    pub fn set_weight_dtypes(
        &mut self,
        values: impl Into<String>,
        indices: impl Into<String>,
        dense_shape: impl Into<String>,
    ) -> Result<(), MetadataError> {
        if self.weight_tensor_names().is_none() {
            return Err(MetadataError::invalid(format!(
                "{}: cannot set weight dtypes without weight tensors",
                self.context()
            )));
        }
        self.weight_values_dtype = Some(values.into());
        self.weight_indices_dtype = Some(indices.into());
        self.weight_dense_shape_dtype = Some(dense_shape.into());
        Ok(())
    }

    /// Replace the input baselines.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] if encoded baselines are
    /// already set or more than [`MAX_NUM_BASELINES`] are given.
    pub fn set_input_baselines(&mut self, baselines: Vec<Value>) -> Result<(), MetadataError> {
        check_baselines(
            Some(&baselines),
            self.encoded_baselines.as_deref(),
            &self.context(),
        )?;
        self.input_baselines = Some(baselines);
        Ok(())
    }

    /// Replace the encoded baselines.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] if input baselines are
    /// already set or more than [`MAX_NUM_BASELINES`] are given.
    pub fn set_encoded_baselines(&mut self, baselines: Vec<Value>) -> Result<(), MetadataError> {
        check_baselines(
            self.input_baselines.as_deref(),
            Some(&baselines),
            &self.context(),
        )?;
        self.encoded_baselines = Some(baselines);
        Ok(())
    }

    /// Every tensor this input references that has a known dtype.
    #[must_use]
    pub fn tensor_dtypes(&self) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        let mut add = |name: Option<&str>, dtype: Option<&String>| {
            if let (Some(name), Some(dtype)) = (name, dtype) {
                out.insert(name.to_owned(), dtype.clone());
            }
        };
        add(Some(self.input_tensor_name()), self.input_tensor_dtype.as_ref());
        add(
            self.indices_tensor_name.as_deref(),
            self.indices_tensor_dtype.as_ref(),
        );
        add(
            self.dense_shape_tensor_name.as_deref(),
            self.dense_shape_tensor_dtype.as_ref(),
        );
        add(
            self.encoded_tensor_name.as_deref(),
            self.encoded_tensor_dtype.as_ref(),
        );
        if let (Some(names), Some(dtypes)) = (&self.gradient_tensor_names, &self.gradient_tensor_dtypes)
        {
            for (output, tensor) in names {
                add(Some(tensor), dtypes.get(output));
            }
        }
        add(
            self.weight_values_name.as_deref(),
            self.weight_values_dtype.as_ref(),
        );
        add(
            self.weight_indices_name.as_deref(),
            self.weight_indices_dtype.as_ref(),
        );
        add(
            self.weight_dense_shape_name.as_deref(),
            self.weight_dense_shape_dtype.as_ref(),
        );
        out
    }

    /// Parse the entry stored under `inputs.<name>`.
    ///
    /// Keys are matched case-insensitively. Deprecated keys are dropped with
    /// a warning; any other unknown key is an error.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] for unknown keys, wrongly
    /// typed values, or violated input rules.
    pub fn from_dict(name: &str, value: &Value) -> Result<Self, MetadataError> {
        let ctx = format!("inputs.{name}");
        let mut dict = lowercase_keys(as_dict(value, &ctx)?, &ctx)?;
        check_known_keys::<InputKey>(&dict, DEPRECATED_INPUT_KEYS, &ctx)?;
        for key in DEPRECATED_INPUT_KEYS {
            if dict.remove(*key).is_some() {
                warn!(input = name, key, "dropping deprecated input key");
            }
        }

        let s = |key| opt_string(&dict, key, &ctx);
        let mut builder = Self::builder(name);
        let inner = &mut builder.inner;
        inner.input_tensor_name = s(InputKey::InputTensorName)?;
        inner.input_tensor_dtype = s(InputKey::InputTensorDtype)?;
        inner.indices_tensor_name = s(InputKey::IndicesTensorName)?;
        inner.indices_tensor_dtype = s(InputKey::IndicesTensorDtype)?;
        inner.dense_shape_tensor_name = s(InputKey::DenseShapeTensorName)?;
        inner.dense_shape_tensor_dtype = s(InputKey::DenseShapeTensorDtype)?;
        inner.encoded_tensor_name = s(InputKey::EncodedTensorName)?;
        inner.encoded_tensor_dtype = s(InputKey::EncodedTensorDtype)?;
        inner.weight_values_name = s(InputKey::WeightValuesName)?;
        inner.weight_values_dtype = s(InputKey::WeightValuesDtype)?;
        inner.weight_indices_name = s(InputKey::WeightIndicesName)?;
        inner.weight_indices_dtype = s(InputKey::WeightIndicesDtype)?;
        inner.weight_dense_shape_name = s(InputKey::WeightDenseShapeName)?;
        inner.weight_dense_shape_dtype = s(InputKey::WeightDenseShapeDtype)?;
        inner.group_name = s(InputKey::GroupName)?;
        if let Some(modality) = s(InputKey::Modality)? {
            inner.modality = modality
                .to_lowercase()
                .parse()
                .map_err(|e| MetadataError::invalid(format!("{ctx}: {e}")))?;
        }
        if let Some(encoding) = s(InputKey::Encoding)? {
            inner.encoding = encoding
                .to_lowercase()
                .parse()
                .map_err(|e| MetadataError::invalid(format!("{ctx}: {e}")))?;
        }
        inner.input_baselines = opt_list(&dict, InputKey::InputBaselines, &ctx)?;
        inner.encoded_baselines = opt_list(&dict, InputKey::EncodedBaselines, &ctx)?;
        inner.index_feature_mapping =
            opt_string_list(&dict, InputKey::IndexFeatureMapping, &ctx)?;
        inner.gradient_tensor_names =
            opt_string_map(&dict, InputKey::GradientTensorNames, &ctx)?;
        inner.gradient_tensor_dtypes =
            opt_string_map(&dict, InputKey::GradientTensorDtypes, &ctx)?;
        inner.domain = opt_value(&dict, InputKey::Domain)
            .map(|v| FeatureDomain::from_value(v, &ctx))
            .transpose()?;
        inner.visualization = opt_value(&dict, InputKey::Visualization)
            .map(|v| Visualization::from_value(v, &ctx))
            .transpose()?;
        inner.is_sequential = opt_bool(&dict, InputKey::IsSequential, &ctx)?.unwrap_or(false);
        builder.build()
    }

    /// Render the entry stored under `inputs.<name>`.
    ///
    /// Absent optional fields are dropped unless `full` is set, in which case
    /// they are emitted as `null`.
    #[must_use]
    pub fn to_dict(&self, full: bool) -> Dict {
        let mut out = Dict::new();
        let text = |v: &Option<String>| string_value(v.as_ref());
        let list = |v: &Option<Vec<Value>>| v.clone().map(Value::Array);
        for key in <InputKey as super::keys::FieldKeys>::ALL {
            let value = match key {
                InputKey::InputTensorName => text(&self.input_tensor_name),
                InputKey::InputTensorDtype => text(&self.input_tensor_dtype),
                InputKey::IndicesTensorName => text(&self.indices_tensor_name),
                InputKey::IndicesTensorDtype => text(&self.indices_tensor_dtype),
                InputKey::DenseShapeTensorName => text(&self.dense_shape_tensor_name),
                InputKey::DenseShapeTensorDtype => text(&self.dense_shape_tensor_dtype),
                InputKey::EncodedTensorName => text(&self.encoded_tensor_name),
                InputKey::EncodedTensorDtype => text(&self.encoded_tensor_dtype),
                InputKey::Modality => Some(Value::String(self.modality.to_string())),
                InputKey::Encoding => Some(Value::String(self.encoding.to_string())),
                InputKey::InputBaselines => list(&self.input_baselines),
                InputKey::EncodedBaselines => list(&self.encoded_baselines),
                InputKey::IndexFeatureMapping => {
                    string_list_value(self.index_feature_mapping.as_ref())
                }
                InputKey::GradientTensorNames => {
                    string_map_value(self.gradient_tensor_names.as_ref())
                }
                InputKey::GradientTensorDtypes => {
                    string_map_value(self.gradient_tensor_dtypes.as_ref())
                }
                InputKey::WeightValuesName => text(&self.weight_values_name),
                InputKey::WeightValuesDtype => text(&self.weight_values_dtype),
                InputKey::WeightIndicesName => text(&self.weight_indices_name),
                InputKey::WeightIndicesDtype => text(&self.weight_indices_dtype),
                InputKey::WeightDenseShapeName => text(&self.weight_dense_shape_name),
                InputKey::WeightDenseShapeDtype => text(&self.weight_dense_shape_dtype),
                InputKey::Domain => self.domain.as_ref().map(|d| d.to_value(full)),
                InputKey::Visualization => {
                    self.visualization.as_ref().map(|v| v.to_value(full))
                }
                InputKey::GroupName => text(&self.group_name),
                InputKey::IsSequential => Some(Value::Bool(self.is_sequential)),
            };
            emit(&mut out, *key, value, full);
        }
        out
    }
}

fn check_baselines(
    input: Option<&[Value]>,
    encoded: Option<&[Value]>,
    ctx: &str,
) -> Result<(), MetadataError> {
    if input.is_some() && encoded.is_some() {
        return Err(MetadataError::invalid(format!(
            "{ctx}: only one of input_baselines and encoded_baselines may be set"
        )));
    }
    if let Some(list) = input.or(encoded) {
        if list.len() > MAX_NUM_BASELINES {
            return Err(MetadataError::invalid(format!(
                "{ctx}: {} baselines given but at most {MAX_NUM_BASELINES} are allowed",
                list.len()
            )));
        }
    }
    Ok(())
}

fn check_gradient_keys(
    names: Option<&IndexMap<String, String>>,
    dtypes: Option<&IndexMap<String, String>>,
    ctx: &str,
) -> Result<(), MetadataError> {
    match (names, dtypes) {
        (None, None) => Ok(()),
        (Some(names), Some(dtypes)) => {
            let missing: Vec<&String> = names.keys().filter(|k| !dtypes.contains_key(*k)).collect();
            let extra: Vec<&String> = dtypes.keys().filter(|k| !names.contains_key(*k)).collect();
            if missing.is_empty() && extra.is_empty() {
                Ok(())
            } else {
                Err(MetadataError::invalid(format!(
                    "{ctx}: gradient_tensor_names and gradient_tensor_dtypes must share keys; \
                     missing dtypes for {missing:?}, dtypes without tensors for {extra:?}"
                )))
            }
        }
        (Some(_), None) => Err(MetadataError::invalid(format!(
            "{ctx}: gradient_tensor_names requires gradient_tensor_dtypes"
        ))),
        (None, Some(_)) => Err(MetadataError::invalid(format!(
            "{ctx}: gradient_tensor_dtypes requires gradient_tensor_names"
        ))),
    }
}
