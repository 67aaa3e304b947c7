//! Lookup tables the explainer runtime reads from an envelope.
//!
//! [`TensorIndices::build`] walks every collection once and materialises all
//! indices up front. The tables are pure functions of the collections, so an
//! envelope rebuilds them whenever a collection changes.

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use super::{
    EmbeddingMetadata, InputMetadata, MetadataError, OutputMetadata, SigDefInputMetadata,
    output::IndexNames,
};

/// Suffix appended to a feature name to key its weight trio in
/// [`TensorIndices::all_sparse_tensor_names`].
pub const WEIGHTS_SUFFIX: &str = "__weights";

/// Tensor names of one compact sparse tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SparseTensorNames {
    pub values: String,
    pub indices: String,
    pub dense_shape: String,
}

impl SparseTensorNames {
    fn new(values: &str, indices: &str, dense_shape: &str) -> Self {
        Self {
            values: values.to_owned(),
            indices: indices.to_owned(),
            dense_shape: dense_shape.to_owned(),
        }
    }

    /// The three names in `(values, indices, dense_shape)` order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [
            self.values.as_str(),
            self.indices.as_str(),
            self.dense_shape.as_str(),
        ]
        .into_iter()
    }
}

/// Derived indices over the entity collections, keyed by friendly name
/// unless stated otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorIndices {
    pub input_tensor_names: IndexMap<String, String>,
    pub indices_tensor_names: IndexMap<String, String>,
    pub dense_shape_tensor_names: IndexMap<String, String>,
    pub encoded_tensor_names: IndexMap<String, String>,
    pub sparse_tensor_names: IndexMap<String, SparseTensorNames>,
    /// Input tensors of encoded inputs that are not sparse.
    pub sparse_input_dense_tensor_names: IndexMap<String, String>,
    /// The tensor the explainer perturbs for each input.
    pub dense_tensor_names: IndexMap<String, String>,
    /// Feature name to output name to gradient tensor.
    pub gradient_tensor_names: IndexMap<String, IndexMap<String, String>>,
    pub weight_tensor_names: IndexMap<String, SparseTensorNames>,
    /// Sparse inputs plus weight trios, the latter keyed `<name>__weights`.
    pub all_sparse_tensor_names: IndexMap<String, SparseTensorNames>,
    pub output_tensor_names: IndexMap<String, String>,
    /// Output tensor name to friendly name, for explicitly named tensors.
    pub output_names: IndexMap<String, String>,
    /// Labels keyed by output name and by explicit output tensor name.
    pub outputs_index_name_mapping: IndexMap<String, Vec<String>>,
    pub embedding_tensor_names: IndexMap<String, String>,
    pub sigdef_input_tensor_names: IndexMap<String, String>,
    /// Slot `i` maps each feature to its `i`-th input baseline.
    pub input_baselines: Vec<IndexMap<String, Value>>,
    /// Slot `i` maps each feature to its `i`-th encoded baseline.
    pub encoded_baselines: Vec<IndexMap<String, Value>>,
    pub explained_tensor_names: IndexSet<String>,
    pub tensor_name_to_dtype_mapping: IndexMap<String, String>,
    num_baselines: usize,
}

impl TensorIndices {
    /// Build every index and check that all inputs agree on the number of
    /// baselines.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] when inputs carry differing
    /// baseline counts.
    pub fn build<'a>(
        inputs: impl IntoIterator<Item = &'a InputMetadata>,
        outputs: impl IntoIterator<Item = &'a OutputMetadata>,
        embeddings: impl IntoIterator<Item = &'a EmbeddingMetadata>,
        sigdef_inputs: impl IntoIterator<Item = &'a SigDefInputMetadata>,
    ) -> Result<Self, MetadataError> {
        let mut idx = Self::default();
        for input in inputs {
            idx.add_input(input);
        }
        for output in outputs {
            idx.add_output(output);
        }
        for embedding in embeddings {
            idx.embedding_tensor_names.insert(
                embedding.name().to_owned(),
                embedding.embedding_tensor_name().to_owned(),
            );
            idx.tensor_name_to_dtype_mapping
                .extend(embedding.tensor_dtypes());
        }
        for sigdef in sigdef_inputs {
            idx.sigdef_input_tensor_names.insert(
                sigdef.name().to_owned(),
                sigdef.sigdef_input_tensor_name().to_owned(),
            );
            idx.tensor_name_to_dtype_mapping.extend(sigdef.tensor_dtypes());
        }
        idx.num_baselines = idx.uniform_baseline_count()?;
        Ok(idx)
    }

    fn add_input(&mut self, input: &InputMetadata) {
        let name = input.name().to_owned();
        let tensor = input.input_tensor_name();
        self.input_tensor_names
            .insert(name.clone(), tensor.to_owned());

        let sparse = match (input.indices_tensor_name(), input.dense_shape_tensor_name()) {
            (Some(indices), Some(dense_shape)) => {
                self.indices_tensor_names
                    .insert(name.clone(), indices.to_owned());
                self.dense_shape_tensor_names
                    .insert(name.clone(), dense_shape.to_owned());
                let names = SparseTensorNames::new(tensor, indices, dense_shape);
                self.explained_tensor_names
                    .extend(names.iter().map(str::to_owned));
                self.sparse_tensor_names
                    .insert(name.clone(), names.clone());
                self.all_sparse_tensor_names
                    .insert(name.clone(), names);
                true
            }
            _ => false,
        };

        let dense = match input.encoded_tensor_name() {
            Some(encoded) => {
                self.encoded_tensor_names
                    .insert(name.clone(), encoded.to_owned());
                if !sparse {
                    self.sparse_input_dense_tensor_names
                        .insert(name.clone(), tensor.to_owned());
                }
                self.explained_tensor_names.insert(encoded.to_owned());
                encoded
            }
            None if sparse => input.name(),
            None => {
                self.explained_tensor_names.insert(tensor.to_owned());
                tensor
            }
        };
        self.dense_tensor_names
            .insert(name.clone(), dense.to_owned());

        if let Some(gradients) = input.gradient_tensor_names() {
            self.gradient_tensor_names
                .insert(name.clone(), gradients.clone());
        }

        if let Some((values, indices, dense_shape)) = input.weight_tensor_names() {
            let names = SparseTensorNames::new(values, indices, dense_shape);
            self.explained_tensor_names
                .extend(names.iter().map(str::to_owned));
            self.all_sparse_tensor_names
                .insert(format!("{name}{WEIGHTS_SUFFIX}"), names.clone());
            self.weight_tensor_names.insert(name.clone(), names);
        }

        if let Some(baselines) = input.input_baselines() {
            fill_slots(&mut self.input_baselines, &name, baselines);
        }
        if let Some(baselines) = input.encoded_baselines() {
            fill_slots(&mut self.encoded_baselines, &name, baselines);
        }

        self.tensor_name_to_dtype_mapping
            .extend(input.tensor_dtypes());
    }

    fn add_output(&mut self, output: &OutputMetadata) {
        let name = output.name().to_owned();
        let tensor = output.output_tensor_name().to_owned();
        self.output_tensor_names
            .insert(name.clone(), tensor.clone());
        if output.has_output_tensor_name() {
            self.output_names.insert(tensor.clone(), name.clone());
        }
        if let Some(IndexNames::Labels(labels)) = output.index_names() {
            if output.has_output_tensor_name() {
                self.outputs_index_name_mapping
                    .insert(tensor, labels.clone());
            }
            self.outputs_index_name_mapping
                .insert(name, labels.clone());
        }
        self.tensor_name_to_dtype_mapping
            .extend(output.tensor_dtypes());
    }

    /// Count slot appearances per feature across both baseline tables; every
    /// feature must appear the same number of times.
    fn uniform_baseline_count(&self) -> Result<usize, MetadataError> {
        let mut counter: IndexMap<&str, usize> = IndexMap::new();
        for slot in self.input_baselines.iter().chain(&self.encoded_baselines) {
            for feature in slot.keys() {
                *counter.entry(feature.as_str()).or_default() += 1;
            }
        }
        let counts: IndexSet<usize> = counter.values().copied().collect();
        match counts.len() {
            0 => Ok(0),
            1 => Ok(counts.first().copied().unwrap_or_default()),
            _ => Err(MetadataError::invalid(
                "Not all inputs have the same number of baselines.",
            )),
        }
    }

    /// The baseline count shared by every input that declares baselines, or
    /// zero when none do.
    #[must_use]
    pub fn num_baselines(&self) -> usize {
        self.num_baselines
    }

    /// Gradient tensors that attribute `output_name` across all inputs.
    ///
    /// Inputs without gradients are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidMetadata`] when an input declares
    /// gradients but none for `output_name`.
    pub fn gradient_tensor_names_for(
        &self,
        output_name: &str,
    ) -> Result<IndexSet<String>, MetadataError> {
        self.gradient_tensor_names
            .iter()
            .map(|(feature, gradients)| {
                gradients.get(output_name).cloned().ok_or_else(|| {
                    MetadataError::invalid(format!(
                        "output \"{output_name}\" has no gradient tensor for input \"{feature}\"; \
                         known outputs are {:?}",
                        gradients.keys().collect::<Vec<_>>()
                    ))
                })
            })
            .collect()
    }
}

fn fill_slots(slots: &mut Vec<IndexMap<String, Value>>, name: &str, baselines: &[Value]) {
    if slots.len() < baselines.len() {
        slots.resize_with(baselines.len(), IndexMap::new);
    }
    for (slot, baseline) in slots.iter_mut().zip(baselines) {
        slot.insert(name.to_owned(), baseline.clone());
    }
}
